//! Settings file handling.

use anyhow::{Context, Result};
use shared::settings::AppSettings;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Get the config file path
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("builder_chat");
        p.push("settings.json");
        p
    })
}

fn read_settings(path: &Path) -> Result<AppSettings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {:?}", path))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Settings file {:?} is not valid", path))
}

/// Load settings from an explicit file, the user config file, or a
/// `seed-settings.json` shipped next to the binary, in that order.
///
/// An explicit path must exist. Otherwise a broken or missing file falls
/// back to defaults. The flag is true when settings came from disk.
pub fn load_settings(explicit: Option<&Path>) -> Result<(AppSettings, bool)> {
    if let Some(path) = explicit {
        return read_settings(path).map(|s| (s, true));
    }

    if let Some(path) = config_path() {
        if path.exists() {
            match read_settings(&path) {
                Ok(settings) => return Ok((settings, true)),
                Err(e) => warn!("{:#}; using defaults", e),
            }
        }
    }

    // First-run helper: a tester build can bundle its settings.
    if let Some(seed) = seed_settings_path() {
        if let Ok(settings) = read_settings(&seed) {
            info!("Imported seed settings from {:?}", seed);
            if let Some(path) = config_path() {
                if let Err(e) = save_settings(&settings, &path) {
                    warn!("Could not persist seed settings: {:#}", e);
                }
            }
            return Ok((settings, true));
        }
    }

    Ok((AppSettings::default(), false))
}

fn seed_settings_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join("seed-settings.json");
    candidate.is_file().then_some(candidate)
}

pub fn save_settings(settings: &AppSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

/// Directory holding the prompt library.
pub fn data_dir(settings: &AppSettings) -> Result<PathBuf> {
    settings
        .data_dir
        .clone()
        .or_else(|| dirs::data_dir().map(|p| p.join("builder_chat")))
        .context("Could not find app data directory")
}
