use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_NAME_TEMPLATE: &str = "@user's channel";

/// Typed service configuration, loaded from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub discord_token: String,
    pub command_prefix: String,

    // Persistence
    pub data_dir: PathBuf,

    // Rate limiting
    pub rate_limit_window: Duration,
    pub rate_limit_ban_threshold: u32,

    // Behavior
    pub max_triggers_per_guild: usize,
    pub default_name_template: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let discord_token = env_str("DISCORD_TOKEN").unwrap_or_default();
        if discord_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_TOKEN environment variable is required".to_string(),
            ));
        }

        let command_prefix = env_str("DVC_COMMAND_PREFIX")
            .and_then(non_empty)
            .unwrap_or_else(|| "dvc!".to_string());

        let data_dir = env_path("DVC_DATA_DIR").unwrap_or_else(|| PathBuf::from("./data"));

        let rate_limit_window =
            Duration::from_secs(env_u64("DVC_RATE_LIMIT_WINDOW_SECS").unwrap_or(15));
        let rate_limit_ban_threshold = env_u32("DVC_RATE_LIMIT_BAN_THRESHOLD")
            .unwrap_or(3)
            .max(1);

        let max_triggers_per_guild = env_usize("DVC_MAX_TRIGGERS_PER_GUILD").unwrap_or(25);
        let default_name_template = env_str("DVC_DEFAULT_NAME")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_NAME_TEMPLATE.to_string());

        Ok(Self {
            discord_token,
            command_prefix,
            data_dir,
            rate_limit_window,
            rate_limit_ban_threshold,
            max_triggers_per_guild,
            default_name_template,
        })
    }

    /// Config for tests and embedding: no token, everything else at defaults.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "dvc!".to_string(),
            data_dir: data_dir.into(),
            rate_limit_window: Duration::from_secs(15),
            rate_limit_ban_threshold: 3,
            max_triggers_per_guild: 25,
            default_name_template: DEFAULT_NAME_TEMPLATE.to_string(),
        }
    }

    pub fn configs_file(&self) -> PathBuf {
        self.data_dir.join("configs.json")
    }

    pub fn channels_file(&self) -> PathBuf {
        self.data_dir.join("channels.json")
    }

    pub fn blacklists_file(&self) -> PathBuf {
        self.data_dir.join("blacklists.json")
    }

    pub fn bans_file(&self) -> PathBuf {
        self.data_dir.join("bans.json")
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
