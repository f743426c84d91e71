use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command-line interface. Every option can also come from the environment.
#[derive(Parser, Debug)]
#[command(name = "vkbot")]
#[command(version, about = "VK long-poll chat bot")]
pub struct Cli {
    /// VK access token
    #[arg(long, env = "VK_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Optional TOML file with tuning options
    #[arg(short, long, env = "VKBOT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(skip)]
    pub token: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub longpoll: LongPollConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub version: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LongPollConfig {
    /// Seconds the server holds the request open.
    #[serde(default = "default_wait")]
    pub wait: u64,
    /// Bitmask of extra fields requested from the server (2 = attachments).
    #[serde(default = "default_mode")]
    pub mode: u32,
    #[serde(default = "default_lp_version")]
    pub version: u32,
    #[serde(default)]
    pub need_pts: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: char,
    /// Reply to direct messages with their own text.
    #[serde(default)]
    pub echo: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// How long a restart waits for the old worker to finish its queue.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.vk.com/method/".to_string()
}

fn default_api_version() -> String {
    "5.131".to_string()
}

fn default_wait() -> u64 {
    25
}

fn default_mode() -> u32 {
    2
}

fn default_lp_version() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    100
}

fn default_command_prefix() -> char {
    '/'
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            version: default_api_version(),
        }
    }
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            wait: default_wait(),
            mode: default_mode(),
            version: default_lp_version(),
            need_pts: false,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            command_prefix: default_command_prefix(),
            echo: false,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// First non-blank token, preferring the flag / `VK_ACCESS_TOKEN` value.
fn pick_token(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    let non_blank = |t: &String| !t.trim().is_empty();
    primary.filter(non_blank).or_else(|| fallback.filter(non_blank))
}

impl Config {
    /// Build the configuration from parsed flags. `ACCESS_TOKEN` is accepted
    /// as a fallback for older deployments.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let token = pick_token(cli.token, std::env::var("ACCESS_TOKEN").ok());
        let Some(token) = token else {
            bail!("No access token: pass --token or set VK_ACCESS_TOKEN");
        };

        let mut config = match cli.config {
            Some(path) => Self::load(&path)?,
            None => Config::default(),
        };
        config.token = token;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.dispatch.queue_capacity == 0 {
            bail!("dispatch.queue_capacity must be greater than zero");
        }
        if config.longpoll.wait == 0 {
            bail!("longpoll.wait must be greater than zero");
        }
        Ok(config)
    }
}
