//! OTP-gated pending registrations.
//!
//! - [`RecordStore`] holds one short-lived record per email address and
//!   enforces the TTL and the attempt limit.
//! - [`generate_code`] draws the one-time code.
//! - [`CodeSender`] is the delivery contract; the store never calls it.
//! - [`Clock`] lets tests move time by hand.

mod clock;
mod code;
mod notify;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use code::generate_code;
pub use notify::{CodeSender, LogSender, MailCredentials, NotifyError, SendFut};
pub use store::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_TTL, PolicyError, PutTicket, RecordStatus,
    RecordStore, RegistrationPolicy, VerifyError,
};
