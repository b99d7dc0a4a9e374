//! Model providers: the local Ollama server and the chat streaming transport
//! built on top of it.

pub mod ollama;
pub mod transport;

pub use ollama::{fetch_ollama_models, get_ollama_api_url, OllamaClient, OllamaError};
pub use transport::{ChatTransport, OllamaChatTransport, StreamOptions};
