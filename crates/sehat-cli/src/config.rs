use std::env;
use std::path::PathBuf;

use sehat_core::config::SyncSettings;
use sehat_core::util::normalize_text_option;

use crate::error::CliError;

pub const DB_PATH_ENV: &str = "SEHAT_DB_PATH";
pub const CONFIG_PATH_ENV: &str = "SEHAT_CONFIG";
const APP_DIR: &str = "sehat";
const CONFIG_FILE_NAME: &str = "config.json";

/// Where the CLI keeps its state, after flags and environment are applied.
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub force_offline: bool,
}

impl Context {
    pub fn resolve(
        db_path: Option<PathBuf>,
        config_path: Option<PathBuf>,
        force_offline: bool,
    ) -> Result<Self, CliError> {
        let db_path = match db_path.or_else(|| env_path(DB_PATH_ENV)) {
            Some(path) => path,
            None => default_db_path()?,
        };
        let config_path = match config_path.or_else(|| env_path(CONFIG_PATH_ENV)) {
            Some(path) => path,
            None => default_config_path()?,
        };
        Ok(Self {
            db_path,
            config_path,
            force_offline,
        })
    }

    /// Settings file merged with `SEHAT_*` overrides.
    pub fn load_settings(&self) -> Result<SyncSettings, CliError> {
        let settings = SyncSettings::load_from_path(&self.config_path)?
            .apply_env_overrides()
            .validate()?;
        Ok(settings)
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("sehat.db"))
        .ok_or(CliError::NoHomeDirectory("data"))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
        .ok_or(CliError::NoHomeDirectory("config"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    normalize_text_option(env::var(key).ok()).map(PathBuf::from)
}
