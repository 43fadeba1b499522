use async_trait::async_trait;
use tracing::info;

use super::{Notifier, NotifyError};

#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        println!("{message}\n");
        info!("Notification written to console ({} lines)", message.lines().count());
        Ok(())
    }
}
