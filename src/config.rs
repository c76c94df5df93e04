#![forbid(unsafe_code)]

//! Settings resolution for the exporter. Values come, in order of
//! precedence, from explicit overrides (CLI flags), process environment
//! variables, a `.env` file, and built-in defaults.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_INPUT_PATH: &str = "./input/url_list.txt";
pub const DEFAULT_OUTPUT_PATH: &str = "./output";
pub const DEFAULT_SECRET_NAME: &str = "youtube-api-key";

/// Where the URL list is read from and where CSV files are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Local,
    Cloud,
}

/// Fully resolved runtime settings, constructed once at startup and passed
/// by reference to whoever needs them. No process-wide singleton.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_mode: StorageMode,
    /// Set in local mode; in cloud mode the key is fetched from Secret
    /// Manager and this stays `None` unless the variable is present anyway.
    pub api_key: Option<String>,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub gcp_project_id: Option<String>,
    pub gcs_bucket: Option<String>,
    pub secret_name: String,
}

impl Settings {
    /// Returns the API key or fails if none is configured.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))
    }

    pub fn require_bucket(&self) -> Result<&str> {
        self.gcs_bucket
            .as_deref()
            .ok_or_else(|| anyhow!("GCS_BUCKET_NAME not set"))
    }

    pub fn require_project(&self) -> Result<&str> {
        self.gcp_project_id
            .as_deref()
            .ok_or_else(|| anyhow!("GCP_PROJECT_ID not set"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub env_path: Option<PathBuf>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
}

pub fn load_settings() -> Result<Settings> {
    resolve_settings(SettingsOverrides::default())
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let local_mode = lookup_value("LOCAL_MODE", file_vars, &env_lookup)
        .map(|value| value.to_lowercase() == "true")
        .unwrap_or(true);
    let storage_mode = if local_mode {
        StorageMode::Local
    } else {
        StorageMode::Cloud
    };

    let api_key = lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup);

    let input_path = overrides
        .input_path
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("LOCAL_INPUT_PATH", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_INPUT_PATH.to_string());
    let output_path = overrides
        .output_path
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("LOCAL_OUTPUT_PATH", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string());

    let gcp_project_id = lookup_value("GCP_PROJECT_ID", file_vars, &env_lookup);
    let gcs_bucket = lookup_value("GCS_BUCKET_NAME", file_vars, &env_lookup);
    let secret_name = lookup_value("SECRET_NAME", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_SECRET_NAME.to_string());

    let settings = Settings {
        storage_mode,
        api_key,
        input_path: PathBuf::from(input_path),
        output_path: PathBuf::from(output_path),
        gcp_project_id,
        gcs_bucket,
        secret_name,
    };

    if settings.storage_mode == StorageMode::Cloud {
        settings.require_project()?;
        settings.require_bucket()?;
    }

    Ok(settings)
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a `.env`-style file. Handles `export` prefixes, single- and
/// double-quoted values, comments and blank lines. A missing file simply
/// yields no variables.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
