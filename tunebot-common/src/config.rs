//! Data folder and configuration file resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the data folder
pub const DATA_FOLDER_ENV: &str = "TUNEBOT_DATA_FOLDER";

/// Resolve the data folder (database, downloaded songs) in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `data_folder` value from the TOML config file
/// 4. OS-dependent default
pub fn resolve_data_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    default_data_folder()
}

/// Locate the default configuration file for the platform
///
/// On Linux `~/.config/tunebot/config.toml` wins over `/etc/tunebot/config.toml`.
pub fn default_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tunebot").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/tunebot/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::NoConfigFile)
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("tunebot"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tunebot"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("tunebot"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tunebot"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("tunebot"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tunebot"))
    } else {
        PathBuf::from("./tunebot_data")
    }
}
