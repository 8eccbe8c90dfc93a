use prism_types::OtpCode;

/// Draw a fresh six-digit verification code.
#[must_use]
pub fn generate_code() -> OtpCode {
    OtpCode::from_number(rand::random_range(0..1_000_000))
}
