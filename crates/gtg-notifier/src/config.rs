// config.rs — NotifierConfig: gtg.toml plus environment overrides.
//
// Resolution order: `--config <path>`, else `$XDG_CONFIG_HOME/gtg/gtg.toml`,
// else built-in defaults. Environment variables are applied on top, so a
// daemon can run from env alone:
//
//   TWITCH_TARGET_USER   monitored entity id
//   TWITCH_BOT_ID        bot account; enables chat monitoring
//   TELEGRAM_BOT_TOKEN   delivery bot token
//   TELEGRAM_CHAT_ID     fixed chat; switches to single-target mode
//   GTG_TARGETS_FILE     target store location

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gtg_targets::RegistrationPolicy;

use crate::context::MonitoredEntity;
use crate::error::ConfigError;
use crate::strategy::NotificationStrategy;
use crate::supervisor::SupervisorConfig;

/// Top-level configuration from gtg.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub targets: TargetsConfig,

    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,

    #[serde(default)]
    pub desktop: DesktopConfig,

    #[serde(default)]
    pub source: SourceConfig,
}

/// The watched channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Upstream user id. Required.
    pub entity_id: Option<String>,

    /// Name used in messages when events carry none.
    pub display_name: Option<String>,

    /// Login used for the channel link.
    pub login: Option<String>,

    #[serde(default = "default_url_base")]
    pub url_base: String,

    /// Subscribe to chat messages as well (needs `bot_user_id`).
    #[serde(default)]
    pub chat_monitoring: bool,

    /// Bot account that reads chat.
    pub bot_user_id: Option<String>,

    /// Send "went offline" messages.
    #[serde(default = "default_true")]
    pub notify_offline: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            entity_id: None,
            display_name: None,
            login: None,
            url_base: default_url_base(),
            chat_monitoring: false,
            bot_user_id: None,
            notify_offline: true,
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. Required.
    pub bot_token: Option<String>,

    /// Override for the Bot API base URL.
    pub api_base: Option<String>,

    /// Fixed chat: notify only this chat instead of the registry.
    pub chat_id: Option<String>,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: None,
            chat_id: None,
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsConfig {
    /// Where registered chats are persisted. Defaults to the user data dir.
    pub store_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub include_direct: bool,

    #[serde(default = "default_true")]
    pub auto_register_groups: bool,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            include_direct: true,
            auto_register_groups: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    /// Recreate subscriptions after this long.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often renewal is checked.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            tick_secs: default_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_desktop_command")]
    pub command: String,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_desktop_command(),
        }
    }
}

/// External process that owns the upstream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// First delay before restarting an exited bridge; doubles while it
    /// keeps failing.
    #[serde(default = "default_restart_secs")]
    pub restart_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            command: default_source_command(),
            args: Vec::new(),
            restart_secs: default_restart_secs(),
        }
    }
}

impl SourceConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_secs.max(1))
    }
}

// Serde default functions
fn default_true() -> bool {
    true
}

fn default_url_base() -> String {
    "https://twitch.tv/".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_tick_secs() -> u64 {
    60
}

fn default_desktop_command() -> String {
    "notify-send".to_string()
}

fn default_source_command() -> String {
    "gtg-eventsub-bridge".to_string()
}

fn default_restart_secs() -> u64 {
    2
}

impl NotifierConfig {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// `$XDG_CONFIG_HOME/gtg/gtg.toml`, if a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gtg").join("gtg.toml"))
    }

    /// Load from the default path, or defaults if there is no file there.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TWITCH_TARGET_USER") {
            self.monitor.entity_id = Some(v);
        }
        if let Some(v) = get("TWITCH_BOT_ID") {
            self.monitor.bot_user_id = Some(v);
            self.monitor.chat_monitoring = true;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = get("GTG_TARGETS_FILE") {
            self.targets.store_path = Some(PathBuf::from(v));
        }
    }

    /// Check required settings, reporting every missing one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if is_blank(&self.monitor.entity_id) {
            missing.push("monitor.entity_id (TWITCH_TARGET_USER)".to_string());
        }
        if is_blank(&self.telegram.bot_token) {
            missing.push("telegram.bot_token (TELEGRAM_BOT_TOKEN)".to_string());
        }
        if self.monitor.chat_monitoring && is_blank(&self.monitor.bot_user_id) {
            missing.push("monitor.bot_user_id (TWITCH_BOT_ID)".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        RegistrationPolicy {
            auto_register_groups: self.targets.auto_register_groups,
            include_direct: self.targets.include_direct,
        }
    }

    /// Single-target mode when a fixed chat is configured, else broadcast.
    pub fn strategy(&self) -> NotificationStrategy {
        match self.telegram.chat_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => NotificationStrategy::SingleTarget {
                target_id: id.to_string(),
            },
            _ => NotificationStrategy::Broadcast,
        }
    }

    pub fn entity(&self) -> MonitoredEntity {
        let mut entity = MonitoredEntity::new(self.monitor.entity_id.clone().unwrap_or_default());
        entity.display_name = self.monitor.display_name.clone();
        entity.login = self.monitor.login.clone();
        entity.url_base = self.monitor.url_base.clone();
        entity
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let bot = if self.monitor.chat_monitoring {
            self.monitor.bot_user_id.clone()
        } else {
            None
        };
        let mut config = SupervisorConfig::for_bot(bot);
        config.ttl = Duration::from_secs(self.subscriptions.ttl_secs.max(1));
        config.tick = Duration::from_secs(self.subscriptions.tick_secs.max(1));
        config
    }

    /// Explicit store path, else `<data dir>/gtg/telegram_chats.json`.
    pub fn store_path(&self) -> PathBuf {
        if let Some(path) = &self.targets.store_path {
            return path.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("gtg").join("telegram_chats.json"))
            .unwrap_or_else(|| PathBuf::from("telegram_chats.json"))
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
