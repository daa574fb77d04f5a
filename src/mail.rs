//! Confirmation mail delivery

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use crate::types::{Result, TrackerError};

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a confirmation token to `email`
    async fn send_confirmation(&self, email: &str, token: &str) -> Result<()>;
}

/// Records deliveries in the log instead of sending mail
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_confirmation(&self, email: &str, token: &str) -> Result<()> {
        info!(email, token, "Confirmation token issued");
        Ok(())
    }
}

/// Keeps every delivery in memory
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent token mailed to `email`
    pub fn last_token(&self, email: &str) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        sent.iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send_confirmation(&self, email: &str, token: &str) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| TrackerError::Internal("mailer lock poisoned".into()))?
            .push((email.to_string(), token.to_string()));
        Ok(())
    }
}
