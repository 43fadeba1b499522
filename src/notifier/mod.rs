mod chatpro;
mod console;
mod message;

pub use chatpro::ChatProNotifier;
pub use console::ConsoleNotifier;
pub use message::{render_block, render_messages, NotifyMode};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification channel answered {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Always writes to the console and forwards to ChatPro when configured.
pub struct NotifierHub {
    console: ConsoleNotifier,
    chat_pro: Option<ChatProNotifier>,
}

impl NotifierHub {
    pub fn new(console: ConsoleNotifier, chat_pro: Option<ChatProNotifier>) -> Self {
        Self { console, chat_pro }
    }

    pub fn has_remote_channel(&self) -> bool {
        self.chat_pro.is_some()
    }
}

#[async_trait]
impl Notifier for NotifierHub {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        self.console.send(message).await?;

        if let Some(chat_pro) = &self.chat_pro {
            chat_pro.send(message).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatProSettings;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn console_only_hub_always_succeeds() {
        let hub = NotifierHub::new(ConsoleNotifier::new(), None);
        assert!(!hub.has_remote_channel());
        assert!(hub.send("📌 test").await.is_ok());
    }

    #[tokio::test]
    async fn hub_forwards_to_chat_pro_and_surfaces_failures() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/inst-1/api/v1/send_message")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let chat_pro = ChatProNotifier::new(ChatProSettings {
            base_url: server.url(),
            instance_id: "inst-1".to_string(),
            number: "5511999990000".to_string(),
            bearer_token: "token".to_string(),
        });
        let hub = NotifierHub::new(ConsoleNotifier::new(), Some(chat_pro));

        let err = hub.send("hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { ref body, .. } if body == "upstream down"));
        mock.assert_async().await;
    }
}
