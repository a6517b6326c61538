//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types the relay uses for viewer bearer tokens.
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one stays safe to pass to `tracing`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ViewerCredential {
//!     user: String,
//!     token: SecretString,
//! }
//!
//! let cred = ViewerCredential {
//!     user: "alice".to_string(),
//!     token: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{cred:?}").contains("hunter2"));
//! assert_eq!(cred.token.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Compare a presented secret against a stored one without early exit on the
/// first mismatching byte.
#[must_use]
pub fn constant_time_eq(presented: &str, stored: &SecretString) -> bool {
    let a = presented.as_bytes();
    let b = stored.expose_secret().as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
