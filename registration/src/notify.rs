//! Delivery of verification codes.
//!
//! The record store never sends anything itself; the registration flow calls
//! a [`CodeSender`] after the record is stored. Transports are pluggable so a
//! real mail integration can live outside this workspace.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use uuid::Uuid;

use prism_types::{DeliveryId, EmailAddress, OtpCode};

pub type SendFut<'a> = Pin<Box<dyn Future<Output = Result<DeliveryId, NotifyError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail transport failed: {0}")]
    Transport(String),
}

pub trait CodeSender: Send + Sync {
    fn send_code<'a>(
        &'a self,
        address: &'a EmailAddress,
        code: &'a OtpCode,
        display_name: &'a str,
    ) -> SendFut<'a>;
}

/// Mail account used by an SMTP-style transport.
#[derive(Clone, PartialEq, Eq)]
pub struct MailCredentials {
    /// Provider name understood by the transport (e.g. `gmail`).
    pub service: String,
    pub user: String,
    pub pass: String,
}

// Manual Debug impl to prevent leaking the password in logs.
impl std::fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailCredentials")
            .field("service", &self.service)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .finish()
    }
}

/// Writes deliveries to the log instead of sending mail.
///
/// Used whenever no mail transport is wired in. The code itself is never
/// logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

impl LogSender {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CodeSender for LogSender {
    fn send_code<'a>(
        &'a self,
        address: &'a EmailAddress,
        _code: &'a OtpCode,
        display_name: &'a str,
    ) -> SendFut<'a> {
        Box::pin(async move {
            let delivery = DeliveryId::new(format!("log-{}", Uuid::new_v4()));
            tracing::info!(%address, display_name, %delivery, "Verification code issued");
            Ok(delivery)
        })
    }
}
