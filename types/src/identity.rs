use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of digits in a one-time verification code.
pub const OTP_CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEmail {
    #[error("email address is empty")]
    Empty,
    #[error("email address must contain exactly one '@' (got {0:?})")]
    MissingAt(String),
    #[error("email address has an empty local part or domain (got {0:?})")]
    EmptyPart(String),
    #[error("email address must not contain whitespace (got {0:?})")]
    Whitespace(String),
}

/// A normalized email address: trimmed and ASCII-lowercased.
///
/// Two addresses that differ only in case compare equal, which makes this
/// the identity key for pending registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, InvalidEmail> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidEmail::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(InvalidEmail::Whitespace(trimmed.to_string()));
        }
        let Some((local, domain)) = trimmed.split_once('@') else {
            return Err(InvalidEmail::MissingAt(trimmed.to_string()));
        };
        if domain.contains('@') {
            return Err(InvalidEmail::MissingAt(trimmed.to_string()));
        }
        if local.is_empty() || domain.is_empty() {
            return Err(InvalidEmail::EmptyPart(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = InvalidEmail;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("verification code must be {OTP_CODE_LEN} ASCII digits")]
pub struct InvalidOtpCode;

/// A one-time verification code of [`OTP_CODE_LEN`] ASCII digits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OtpCode(String);

impl OtpCode {
    pub fn parse(raw: &str) -> Result<Self, InvalidOtpCode> {
        let trimmed = raw.trim();
        if trimmed.len() == OTP_CODE_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidOtpCode)
        }
    }

    /// Build a code from a number below `10^OTP_CODE_LEN`, zero-padded.
    #[must_use]
    pub fn from_number(value: u32) -> Self {
        Self(format!("{:0width$}", value % 1_000_000, width = OTP_CODE_LEN))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare without short-circuiting on the first differing digit.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0
            .bytes()
            .zip(other.0.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
            && self.0.len() == other.0.len()
    }
}

// Codes are secrets; keep them out of logs.
impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OtpCode([REDACTED])")
    }
}

impl fmt::Display for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account data held back until the owner proves control of the address.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUser {
    pub name: String,
    /// Already hashed by the caller; never a plaintext secret.
    pub password_hash: String,
}

impl fmt::Debug for PendingUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUser")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
