mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Locations searched, in order, when no config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "./frameseek.toml",
    "~/.config/frameseek/config.toml",
    "/etc/frameseek/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// First existing file among [`DEFAULT_CONFIG_PATHS`].
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .find(|p| p.exists())
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        return load_config(Path::new(&path));
    }

    match find_default_config() {
        Some(path) => {
            tracing::debug!("Using config file {:?}", path);
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.demux.read_chunk_size == 0 {
        anyhow::bail!("demux.read_chunk_size must be greater than 0");
    }
    if config.demux.batch_size == 0 {
        anyhow::bail!("demux.batch_size must be greater than 0");
    }
    if config.demux.max_atom_size < 4096 {
        anyhow::bail!(
            "demux.max_atom_size must be at least 4096 bytes (got {})",
            config.demux.max_atom_size
        );
    }

    if config.player.flush_timeout_ms == 0 {
        anyhow::bail!("player.flush_timeout_ms must be greater than 0");
    }
    if config.player.max_decode_queue == 0 {
        anyhow::bail!("player.max_decode_queue must be greater than 0");
    }
    if !config.player.backend.is_available() {
        anyhow::bail!(
            "Decoder backend '{}' is not compiled in (rebuild with --features {})",
            config.player.backend,
            config.player.backend
        );
    }

    Ok(())
}
