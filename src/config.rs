// Конфигурация звонка: ICE серверы, метка канала, таймеры, логирование

use crate::peer::types::ServerConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование выключено

/// Фильтр по умолчанию, если переменная окружения не задана
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "symphony_lib=debug,symphony=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Переменная окружения для переопределения фильтра
pub const LOG_ENV_VAR: &str = "SYMPHONY_LOG";

pub const DEFAULT_CHANNEL_LABEL: &str = "symphony-data";
pub const DEFAULT_GESTURE_COOLDOWN_MS: u64 = 3000;
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;
pub const DEFAULT_ICE_CANDIDATE_POOL_SIZE: u8 = 10;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Настройки одного звонка
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub channel_label: String,
    pub gesture_cooldown_ms: u64,
    /// `None` — ждать ответа бесконечно
    pub negotiation_timeout_secs: Option<u64>,
    pub grace_period_secs: u64,
    pub log: LogConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: DEFAULT_ICE_CANDIDATE_POOL_SIZE,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            gesture_cooldown_ms: DEFAULT_GESTURE_COOLDOWN_MS,
            negotiation_timeout_secs: Some(DEFAULT_NEGOTIATION_TIMEOUT_SECS),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            log: LogConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Читает конфигурацию из JSON, отсутствующие поля берутся по умолчанию
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "ICE server {} has an empty url",
                    server.id
                )));
            }

            if server.r#type == "turn"
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }

        if self.channel_label.is_empty() {
            return Err(Error::InvalidConfig("channel label cannot be empty".into()));
        }

        // 0 сразу роняет сессию в AwaitingRemote; для «без ограничения» есть None
        if self.negotiation_timeout_secs == Some(0) {
            return Err(Error::InvalidConfig(
                "negotiation timeout must be positive, use null for no timeout".into(),
            ));
        }

        if self.gesture_cooldown_ms == 0 {
            return Err(Error::InvalidConfig(
                "gesture cooldown must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn gesture_cooldown(&self) -> Duration {
        Duration::from_millis(self.gesture_cooldown_ms)
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_secs.map(Duration::from_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Публичные STUN серверы Google
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-2".into(),
            r#type: "stun".into(),
            url: "stun:stun2.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
