//! Email-verified sign-up.
//!
//! `begin` stores the pending account under a fresh code and hands the code
//! to a [`CodeSender`]; `confirm` trades a matching code for the account.
//! The store lock is never held while a send is in flight.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use prism_registration::{
    Clock, CodeSender, NotifyError, RecordStore, RegistrationPolicy, SystemClock, VerifyError,
    generate_code,
};
use prism_types::{DeliveryId, EmailAddress, InvalidEmail, InvalidOtpCode, OtpCode, PendingUser};

/// Shortest period `spawn_reaper` will tick at.
pub const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    InvalidEmail(#[from] InvalidEmail),
    #[error(transparent)]
    InvalidCode(#[from] InvalidOtpCode),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("failed to deliver verification code: {0}")]
    Delivery(#[from] NotifyError),
}

pub struct RegistrationService<C = SystemClock> {
    store: Arc<RecordStore<PendingUser, C>>,
    sender: Arc<dyn CodeSender>,
}

impl<C> Clone for RegistrationService<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl RegistrationService<SystemClock> {
    #[must_use]
    pub fn new(policy: RegistrationPolicy, sender: Arc<dyn CodeSender>) -> Self {
        Self::with_store(Arc::new(RecordStore::new(policy)), sender)
    }
}

impl<C: Clock + 'static> RegistrationService<C> {
    #[must_use]
    pub fn with_store(
        store: Arc<RecordStore<PendingUser, C>>,
        sender: Arc<dyn CodeSender>,
    ) -> Self {
        Self { store, sender }
    }

    /// Store a pending account for `email` and send it a verification code.
    ///
    /// Starting again for the same address replaces the earlier code. If the
    /// send fails the record this call stored is removed, unless a newer
    /// `begin` has already replaced it.
    pub async fn begin(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<DeliveryId, RegistrationError> {
        let address = EmailAddress::parse(email)?;
        let code = generate_code();
        let user = PendingUser {
            name: name.to_string(),
            password_hash: password_hash.to_string(),
        };
        let ticket = self.store.put(address.clone(), code.clone(), user);

        match self.sender.send_code(&address, &code, name).await {
            Ok(delivery) => {
                tracing::info!(
                    %address,
                    %delivery,
                    expires_at = %ticket.expires_at,
                    "Registration started"
                );
                Ok(delivery)
            }
            Err(err) => {
                let removed = self.store.remove_put(&address, ticket);
                tracing::warn!(
                    %address,
                    removed,
                    error = %err,
                    "Verification code delivery failed"
                );
                Err(err.into())
            }
        }
    }

    /// Exchange a code for the pending account. Success consumes the record.
    pub fn confirm(&self, email: &str, code: &str) -> Result<PendingUser, RegistrationError> {
        let address = EmailAddress::parse(email)?;
        let code = OtpCode::parse(code)?;
        match self.store.verify(&address, &code) {
            Ok(user) => {
                tracing::info!(%address, "Registration confirmed");
                Ok(user)
            }
            Err(err) => {
                tracing::debug!(%address, error = %err, "Registration not confirmed");
                Err(err.into())
            }
        }
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore<PendingUser, C> {
        &self.store
    }

    /// Periodically drop expired records from memory.
    ///
    /// Expired records are already unreadable; this only reclaims space.
    /// Periods below [`MIN_REAP_INTERVAL`] are raised to it. Abort the
    /// returned handle to stop the reaper.
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        if interval < MIN_REAP_INTERVAL {
            tracing::warn!(
                ?interval,
                min = ?MIN_REAP_INTERVAL,
                "Reap interval too short, clamping"
            );
        }
        let interval = interval.max(MIN_REAP_INTERVAL);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.reap_expired();
            }
        })
    }
}

impl<C> std::fmt::Debug for RegistrationService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationService").finish_non_exhaustive()
    }
}
