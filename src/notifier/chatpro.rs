use async_trait::async_trait;
use tracing::{info, warn};

use super::{Notifier, NotifyError};
use crate::config::{AppConfig, ChatProSettings};
use crate::utils::{mask_secret, mask_url};

/// Delivers messages to a WhatsApp number through the ChatPro API.
#[derive(Debug, Clone)]
pub struct ChatProNotifier {
    settings: ChatProSettings,
    client: reqwest::Client,
}

impl ChatProNotifier {
    pub fn new(settings: ChatProSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    pub fn maybe_from_config(config: &AppConfig) -> Option<Self> {
        config.chat_pro.clone().map(Self::new)
    }

    fn send_url(&self) -> String {
        format!(
            "{}/{}/api/v1/send_message",
            self.settings.base_url, self.settings.instance_id
        )
    }
}

#[async_trait]
impl Notifier for ChatProNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "message": message,
            "number": self.settings.number,
        });

        let response = self
            .client
            .post(self.send_url())
            .header(reqwest::header::AUTHORIZATION, &self.settings.bearer_token)
            .query(&[("instance_id", &self.settings.instance_id)])
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(
                "Notification sent to ChatPro number {}",
                mask_secret(&self.settings.number)
            );
            Ok(())
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                "ChatPro rejected notification at {}: {} {}",
                mask_url(&self.send_url()),
                status,
                body
            );
            Err(NotifyError::Rejected { status, body })
        }
    }
}
