use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::dedup::{CreationRule, Rounding, ThresholdPolicy};
use crate::notifier::NotifyMode;
use crate::tracker::RetentionMode;
use crate::window::WindowPolicy;

pub const DEFAULT_THRESHOLD_STEP: u64 = 50;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://fence_thresholds.db";
/// `DATABASE_URL` value that keeps thresholds in process memory only.
pub const IN_PROCESS_DATABASE_URL: &str = "memory";
pub const DEFAULT_GATEWAY_BASE_URL: &str = "http://localhost:3042";
pub const DEFAULT_CHAT_PRO_BASE_URL: &str = "https://v5.chatpro.com.br";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub auth_path: String,
    pub query_path: String,
    pub query_name: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ChatProSettings {
    pub base_url: String,
    pub instance_id: String,
    pub number: String,
    pub bearer_token: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub threshold: ThresholdPolicy,
    pub retention: RetentionMode,
    pub window: WindowPolicy,
    pub poll_interval: Duration,
    pub notify_mode: NotifyMode,
    pub database_url: String,
    pub gateway: GatewaySettings,
    pub chat_pro: Option<ChatProSettings>,
}

impl AppConfig {
    pub fn uses_in_process_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case(IN_PROCESS_DATABASE_URL)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset keys take their
    /// defaults; set but invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let step: u64 = parse_or(&get, "THRESHOLD_STEP", DEFAULT_THRESHOLD_STEP)?;
        let rounding: Rounding = parse_or(&get, "THRESHOLD_ROUNDING", Rounding::default())?;
        let creation: CreationRule = parse_or(&get, "THRESHOLD_CREATION", CreationRule::default())?;
        let threshold = ThresholdPolicy::new(step, rounding, creation)
            .ok_or_else(|| anyhow!("THRESHOLD_STEP must be greater than zero"))?;

        let offset_hours: i32 = parse_or(&get, "REFERENCE_UTC_OFFSET_HOURS", 0)?;
        if !(-23..=23).contains(&offset_hours) {
            return Err(anyhow!("REFERENCE_UTC_OFFSET_HOURS must be within -23..=23"));
        }
        let window_hours: u32 = parse_or(&get, "WINDOW_HOURS", 12)?;
        let window = WindowPolicy::new(offset_hours, window_hours)
            .map_err(|e| anyhow!("WINDOW_HOURS: {e}"))?;

        let poll_secs: u64 = parse_or(&get, "POLL_INTERVAL_SECS", 60)?;
        if poll_secs == 0 {
            return Err(anyhow!("POLL_INTERVAL_SECS must be greater than zero"));
        }

        let gateway = GatewaySettings {
            base_url: base_url(get("GATEWAY_BASE_URL"), DEFAULT_GATEWAY_BASE_URL),
            auth_path: get("GATEWAY_AUTH_PATH")
                .unwrap_or_else(|| "/api/v1/get/authentication".to_string()),
            query_path: get("GATEWAY_QUERY_PATH")
                .unwrap_or_else(|| "/api/v1/create/query-data".to_string()),
            query_name: get("GATEWAY_QUERY_NAME")
                .unwrap_or_else(|| "fence_alert_get_alert_map_list".to_string()),
            username: get("QUERY_GATEWAY_USERNAME")
                .ok_or_else(|| anyhow!("QUERY_GATEWAY_USERNAME must be set"))?,
            password: get("QUERY_GATEWAY_PASSWORD")
                .ok_or_else(|| anyhow!("QUERY_GATEWAY_PASSWORD must be set"))?,
        };

        let chat_pro = match (
            get("CHAT_PRO_INSTANCE_ID"),
            get("CHAT_PRO_NUMBER"),
            get("CHAT_PRO_BEARER_TOKEN"),
        ) {
            (Some(instance_id), Some(number), Some(bearer_token)) => Some(ChatProSettings {
                base_url: base_url(get("CHAT_PRO_BASE_URL"), DEFAULT_CHAT_PRO_BASE_URL),
                instance_id,
                number,
                bearer_token,
            }),
            _ => None,
        };

        Ok(Self {
            threshold,
            retention: parse_or(&get, "RETENTION_MODE", RetentionMode::default())?,
            window,
            poll_interval: Duration::from_secs(poll_secs),
            notify_mode: parse_or(&get, "NOTIFY_MODE", NotifyMode::default())?,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            gateway,
            chat_pro,
        })
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| values.get(key).cloned())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid {key} value {raw:?}: {e}")),
        None => Ok(default),
    }
}

fn base_url(raw: Option<String>, default: &str) -> String {
    raw.unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
