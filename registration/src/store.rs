//! Pending-registration records with an absolute TTL and bounded attempts.
//!
//! # Expiry
//!
//! Every read compares the injected clock against `expires_at`, so an expired
//! record is never returned even if nobody has called
//! [`RecordStore::reap_expired`]. Reaping only reclaims memory.
//!
//! # Concurrency
//!
//! All mutation happens under a single mutex that is never held across an
//! await point. Two concurrent `verify` calls for the same identity are
//! therefore serialized: the attempt counter is checked and incremented
//! atomically, and only one caller can consume a matching record.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use prism_types::{EmailAddress, OtpCode};

use crate::clock::{Clock, SystemClock};

/// Lifetime of a pending registration.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
/// Failed verifications tolerated before a record is locked until it expires.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("max verification attempts must be greater than zero")]
    ZeroAttempts,
    #[error("record TTL must be greater than zero")]
    ZeroTtl,
    #[error("record TTL of {0:?} is too large to represent")]
    TtlOutOfRange(Duration),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no pending registration for this address")]
    NotFound,
    #[error("too many failed attempts (limit {max_attempts})")]
    AttemptsExceeded { max_attempts: u32 },
    #[error("verification code does not match ({attempts_remaining} attempts remaining)")]
    CodeMismatch { attempts_remaining: u32 },
}

/// Validated TTL and attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationPolicy {
    ttl: TimeDelta,
    max_attempts: u32,
}

impl RegistrationPolicy {
    pub fn new(ttl: Duration, max_attempts: u32) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if ttl.is_zero() {
            return Err(PolicyError::ZeroTtl);
        }
        let ttl = TimeDelta::from_std(ttl).map_err(|_| PolicyError::TtlOutOfRange(ttl))?;
        Ok(Self { ttl, max_attempts })
    }

    #[must_use]
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            ttl: TimeDelta::seconds(DEFAULT_TTL.as_secs() as i64),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
struct PendingRecord<P> {
    code: OtpCode,
    payload: P,
    attempts: u32,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    generation: u64,
}

impl<P> PendingRecord<P> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Read-only view of a live record, without the code or payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStatus {
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Identifies the record written by one [`RecordStore::put`].
///
/// A later `put` for the same identity gets a new ticket, so a stale ticket
/// can never remove its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutTicket {
    pub expires_at: DateTime<Utc>,
    generation: u64,
}

/// Keyed store of short-lived records awaiting a one-time code.
pub struct RecordStore<P, C = SystemClock> {
    records: Mutex<HashMap<EmailAddress, PendingRecord<P>>>,
    next_generation: AtomicU64,
    clock: C,
    policy: RegistrationPolicy,
}

impl<P> RecordStore<P, SystemClock> {
    #[must_use]
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<P, C: Clock> RecordStore<P, C> {
    #[must_use]
    pub fn with_clock(policy: RegistrationPolicy, clock: C) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            clock,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EmailAddress, PendingRecord<P>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace the record for `identity`.
    pub fn put(&self, identity: EmailAddress, code: OtpCode, payload: P) -> PutTicket {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.policy.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let record = PendingRecord {
            code,
            payload,
            attempts: 0,
            created_at: now,
            expires_at,
            generation,
        };
        let replaced = self.lock().insert(identity, record).is_some();
        tracing::debug!(replaced, %expires_at, "Pending registration stored");
        PutTicket {
            expires_at,
            generation,
        }
    }

    /// Check `submitted` against the live record for `identity`.
    ///
    /// A match consumes the record and yields its payload. A mismatch costs
    /// one attempt. Once the limit is reached every call fails with
    /// [`VerifyError::AttemptsExceeded`] until the record expires.
    pub fn verify(&self, identity: &EmailAddress, submitted: &OtpCode) -> Result<P, VerifyError> {
        let now = self.clock.now();
        let max_attempts = self.policy.max_attempts;
        let mut records = self.lock();

        let Entry::Occupied(mut entry) = records.entry(identity.clone()) else {
            return Err(VerifyError::NotFound);
        };
        if entry.get().is_expired(now) {
            entry.remove();
            return Err(VerifyError::NotFound);
        }

        let record = entry.get_mut();
        if record.attempts >= max_attempts {
            tracing::warn!(max_attempts, "Verification attempted on locked registration");
            return Err(VerifyError::AttemptsExceeded { max_attempts });
        }
        if !record.code.matches(submitted) {
            record.attempts += 1;
            tracing::debug!(attempts = record.attempts, "Verification code mismatch");
            return Err(VerifyError::CodeMismatch {
                attempts_remaining: max_attempts - record.attempts,
            });
        }

        Ok(entry.remove().payload)
    }

    /// Status of the live record for `identity`, if any.
    #[must_use]
    pub fn status(&self, identity: &EmailAddress) -> Option<RecordStatus> {
        let now = self.clock.now();
        self.lock()
            .get(identity)
            .filter(|record| !record.is_expired(now))
            .map(|record| RecordStatus {
                attempts: record.attempts,
                created_at: record.created_at,
                expires_at: record.expires_at,
            })
    }

    /// Failed attempts against the live record for `identity`.
    #[must_use]
    pub fn attempts(&self, identity: &EmailAddress) -> Option<u32> {
        self.status(identity).map(|status| status.attempts)
    }

    #[must_use]
    pub fn contains(&self, identity: &EmailAddress) -> bool {
        self.status(identity).is_some()
    }

    /// Drop the record for `identity` regardless of state. Returns the payload
    /// if a live record was removed.
    pub fn remove(&self, identity: &EmailAddress) -> Option<P> {
        let now = self.clock.now();
        self.lock()
            .remove(identity)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.payload)
    }

    /// Drop the record for `identity` only if it is still the one `ticket`
    /// was issued for. Returns whether anything was removed.
    pub fn remove_put(&self, identity: &EmailAddress, ticket: PutTicket) -> bool {
        let mut records = self.lock();
        match records.entry(identity.clone()) {
            Entry::Occupied(entry) if entry.get().generation == ticket.generation => {
                entry.remove();
                true
            }
            _ => false,
        }
    }

    /// Delete every expired record. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let reaped = before - records.len();
        if reaped > 0 {
            tracing::debug!(reaped, remaining = records.len(), "Reaped expired registrations");
        }
        reaped
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .values()
            .filter(|record| !record.is_expired(now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P, C> std::fmt::Debug for RecordStore<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stored = self.records.lock().map(|r| r.len()).unwrap_or_default();
        f.debug_struct("RecordStore")
            .field("stored", &stored)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
