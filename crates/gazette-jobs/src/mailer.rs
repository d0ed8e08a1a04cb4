//! Mailer implementations.
//!
//! Delivery goes through an SMTP relay in production; this crate ships a
//! tracing-backed mailer for environments without one, and a recording
//! mailer for tests.

use async_trait::async_trait;
use tokio::sync::Mutex;

use gazette_core::{Mail, Mailer, Result};

/// Logs outbound mail instead of delivering it.
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        tracing::info!(
            subsystem = "mail",
            to = %mail.to,
            subject = %mail.subject,
            "Outbound mail"
        );
        Ok(())
    }
}

/// Captures outbound mail for assertions.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All mail sent so far, in order.
    pub async fn sent(&self) -> Vec<Mail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        self.sent.lock().await.push(mail.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_mailer_keeps_order() {
        let mailer = RecordingMailer::new();
        for n in 0..3 {
            mailer
                .send(&Mail {
                    to: format!("user-{n}@example.org"),
                    subject: format!("mail {n}"),
                    body: String::new(),
                })
                .await
                .unwrap();
        }
        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].to, "user-0@example.org");
        assert_eq!(sent[2].subject, "mail 2");
    }
}
