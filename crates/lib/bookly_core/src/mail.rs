//! Background mail dispatch.
//!
//! Request handlers build a [`MailMessage`] and hand it to [`MailQueue`],
//! which returns immediately. A worker task drains the queue and delivers
//! through a [`MailTransport`], retrying failed sends a bounded number of
//! times before dropping the message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivery attempts per message.
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt; doubles after each failure.
const SEND_BACKOFF: Duration = Duration::from_millis(500);

/// Mail errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Mail queue closed")]
    QueueClosed,
}

/// An HTML email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

/// Delivers a message. Implementations own connection handling and
/// credentials.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Transport that records messages in the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(
            recipients = message.recipients.len(),
            subject = %message.subject,
            "mail delivered to log transport"
        );
        debug!(body = %message.html_body, "mail body");
        Ok(())
    }
}

/// Fire-and-forget handle to the mail worker.
#[derive(Clone, Debug)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<MailMessage>,
}

impl MailQueue {
    /// Spawn the worker. It stops once `shutdown` is cancelled and every
    /// message already queued has been attempted.
    pub fn start(
        transport: Arc<dyn MailTransport>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(rx, transport, shutdown));
        (Self { tx }, handle)
    }

    /// Queue a message for delivery.
    pub fn enqueue(&self, message: MailMessage) -> Result<(), MailError> {
        self.tx.send(message).map_err(|_| MailError::QueueClosed)
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<MailMessage>,
    transport: Arc<dyn MailTransport>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => deliver(transport.as_ref(), &message).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(message) = rx.recv().await {
                    deliver(transport.as_ref(), &message).await;
                }
                break;
            }
        }
    }
    info!("mail worker stopped");
}

async fn deliver(transport: &dyn MailTransport, message: &MailMessage) {
    for attempt in 0..MAX_SEND_ATTEMPTS {
        match transport.send(message).await {
            Ok(()) => return,
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, subject = %message.subject, "mail send failed");
                if attempt + 1 < MAX_SEND_ATTEMPTS {
                    sleep(SEND_BACKOFF.saturating_mul(2u32.saturating_pow(attempt))).await;
                }
            }
        }
    }
    error!(subject = %message.subject, "mail dropped after {MAX_SEND_ATTEMPTS} attempts");
}

/// Message bodies for the auth flows.
pub mod templates {
    use super::MailMessage;

    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
    }

    pub fn verify_email(recipient: &str, link: &str) -> MailMessage {
        let link = escape(link);
        MailMessage {
            recipients: vec![recipient.to_string()],
            subject: "Verify Your Email".into(),
            html_body: format!(
                "<h1>Verify your Email</h1>\n\
                 <p>Click this link to verify your account:</p>\n\
                 <a href=\"{link}\">{link}</a>"
            ),
        }
    }

    pub fn account_verified(recipient: &str, first_name: &str) -> MailMessage {
        MailMessage {
            recipients: vec![recipient.to_string()],
            subject: "Your Account is Verified!".into(),
            html_body: format!(
                "<h1>Account Verified</h1>\n\
                 <p>Hi {},</p>\n\
                 <p>Your account has been successfully verified. You can now log in!</p>",
                escape(first_name)
            ),
        }
    }

    pub fn password_reset(recipient: &str, link: &str) -> MailMessage {
        let link = escape(link);
        MailMessage {
            recipients: vec![recipient.to_string()],
            subject: "Reset Your Password".into(),
            html_body: format!(
                "<h1>Reset Your Password</h1>\n\
                 <p>Click this link to reset your password:</p>\n\
                 <a href=\"{link}\">{link}</a>"
            ),
        }
    }

    pub fn welcome(recipients: Vec<String>) -> MailMessage {
        MailMessage {
            recipients,
            subject: "Welcome to our app".into(),
            html_body: "<h1>Welcome to the app</h1>".into(),
        }
    }
}
