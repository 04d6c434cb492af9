use tokio::sync::Mutex;

use slog::Logger;

use crate::config::MailConfig;
use crate::error::{Result, SatelliteError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outgoing mail. Only the `simulate` sender is available: messages are logged
/// and kept in memory.
pub struct MailService {
    logger: Logger,
    from: String,
    sent: Mutex<Vec<Message>>,
}

impl MailService {
    pub fn new(logger: Logger, config: &MailConfig) -> Result<Self> {
        match config.auth_type.as_str() {
            "" | "simulate" => Ok(Self {
                logger,
                from: config.from.clone(),
                sent: Mutex::new(Vec::new()),
            }),
            other => Err(SatelliteError::UnsupportedBackend(format!(
                "mail auth type {other:?}"
            ))),
        }
    }

    pub async fn send(&self, message: Message) -> Result<()> {
        slog::debug!(self.logger, "Mail sent";
            "from" => &self.from, "to" => &message.to, "subject" => &message.subject);
        self.sent.lock().await.push(message);
        Ok(())
    }

    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }
}
