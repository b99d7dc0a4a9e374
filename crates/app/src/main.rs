mod config;
mod console;

use anyhow::{bail, Context, Result};
use chat_host::{ChatStreamer, ChatStateStore, PromptManager, StreamRequest};
use clap::{Parser, Subcommand};
use console::{ConsoleHooks, ReplyPrinter};
use parking_lot::RwLock;
use providers::ollama::{resolve_ollama_api_url, OllamaClient};
use providers::OllamaChatTransport;
use services::PromptStore;
use shared::attachment::{DiskFile, FileAttachment};
use shared::prompt::{NewPrompt, PromptUpdate};
use shared::settings::AppSettings;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "builder-chat", version, about = "Chat with local models and manage saved prompts")]
struct Cli {
    /// Settings file to use instead of the per-user one
    #[arg(long, global = true, env = "BUILDER_CHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List models installed in the local Ollama server
    Models,
    /// Manage the prompt library
    Prompts {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Send a prompt and stream the reply
    Chat {
        #[arg(long)]
        chat_id: Option<i64>,
        /// Document to inline into the prompt (repeatable)
        #[arg(long = "doc")]
        docs: Vec<PathBuf>,
        /// File forwarded as a plain attachment (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        /// Saved prompt to put in front of the message
        #[arg(long)]
        template: Option<i64>,
        #[arg(long)]
        model: Option<String>,
        prompt: Vec<String>,
    },
    /// Show the effective settings
    Config {
        /// Write default settings if no settings file exists yet
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum PromptAction {
    List,
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        description: Option<String>,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        description: Option<String>,
    },
    Rm {
        id: i64,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn prompt_manager(settings: &AppSettings) -> Result<PromptManager> {
    let store = PromptStore::new(&config::data_dir(settings)?)?;
    Ok(PromptManager::new(Arc::new(store)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let (settings, _from_disk) = config::load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Models => list_models(&settings).await,
        Command::Prompts { action } => manage_prompts(&settings, action).await,
        Command::Chat {
            chat_id,
            docs,
            attachments,
            template,
            model,
            prompt,
        } => {
            let mut attached: Vec<FileAttachment> = docs
                .into_iter()
                .map(|p| FileAttachment::rag_document(DiskFile::new(p)))
                .collect();
            attached.extend(
                attachments
                    .into_iter()
                    .map(|p| FileAttachment::other(DiskFile::new(p))),
            );
            let request = StreamRequest {
                prompt: prompt.join(" "),
                chat_id: chat_id.unwrap_or_else(shared::random_number_id),
                redo: false,
                attachments: attached,
                selected_component: None,
            };
            chat(settings, request, template, model).await
        }
        Command::Config { init } => show_config(&settings, cli.config, init),
    }
}

async fn list_models(settings: &AppSettings) -> Result<()> {
    let listing = providers::fetch_ollama_models(settings.ollama_host.as_deref()).await?;
    if listing.models.is_empty() {
        println!("No local models installed.");
    }
    for model in listing.models {
        println!("{:<32} {}", model.model_name, model.display_name);
    }
    Ok(())
}

async fn manage_prompts(settings: &AppSettings, action: PromptAction) -> Result<()> {
    let manager = prompt_manager(settings)?;
    match action {
        PromptAction::List => {
            for item in manager.prompts().await?.iter() {
                match &item.description {
                    Some(d) => println!("{:>4}  {}  ({})", item.id, item.title, d),
                    None => println!("{:>4}  {}", item.id, item.title),
                }
            }
        }
        PromptAction::Add {
            title,
            content,
            description,
        } => {
            let item = manager
                .create_prompt(NewPrompt {
                    title,
                    description,
                    content,
                })
                .await?;
            println!("Created prompt {}", item.id);
        }
        PromptAction::Edit {
            id,
            title,
            content,
            description,
        } => {
            manager
                .update_prompt(PromptUpdate {
                    id,
                    title,
                    description,
                    content,
                })
                .await?;
            println!("Updated prompt {}", id);
        }
        PromptAction::Rm { id } => {
            manager.delete_prompt(id).await?;
            println!("Deleted prompt {}", id);
        }
    }
    Ok(())
}

async fn chat(
    mut settings: AppSettings,
    mut request: StreamRequest,
    template: Option<i64>,
    model: Option<String>,
) -> Result<()> {
    if let Some(id) = template {
        let prompts = prompt_manager(&settings)?.prompts().await?;
        let saved = prompts
            .iter()
            .find(|p| p.id == id)
            .with_context(|| format!("No saved prompt with id {}", id))?;
        request.prompt = format!("{}\n\n{}", saved.content, request.prompt);
    }
    if let Some(model) = model {
        settings.default_model = model;
    }

    let client = OllamaClient::with_base_url(
        resolve_ollama_api_url(settings.ollama_host.as_deref()),
        settings.default_model.clone(),
    );
    let state = Arc::new(ChatStateStore::new());
    let streamer = ChatStreamer::new(
        Arc::new(OllamaChatTransport::new(client)),
        state.clone(),
        Arc::new(ConsoleHooks),
        Arc::new(RwLock::new(settings)),
    );

    let chat_id = request.chat_id;
    let mut changes = state.subscribe();
    let mut printer = ReplyPrinter::new(chat_id);
    let stream = streamer.stream_message(request);
    tokio::pin!(stream);
    loop {
        tokio::select! {
            _ = &mut stream => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                printer.flush(&state);
            }
        }
    }
    printer.flush(&state);
    if printer.printed_anything() {
        println!();
    }

    if let Some(error) = streamer.error(chat_id) {
        bail!("Chat {} failed: {}", chat_id, error);
    }
    Ok(())
}

fn show_config(settings: &AppSettings, explicit: Option<PathBuf>, init: bool) -> Result<()> {
    let path = explicit
        .or_else(config::config_path)
        .context("Could not find a config directory")?;
    if init && !path.exists() {
        config::save_settings(&AppSettings::default(), &path)?;
        println!("Wrote default settings to {}", path.display());
    }
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(settings)?);
    println!(
        "# Ollama endpoint: {}",
        resolve_ollama_api_url(settings.ollama_host.as_deref())
    );
    Ok(())
}
