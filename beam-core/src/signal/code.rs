//! Rendezvous codes — the short shared secret both peers type.

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::BeamError;

/// Codes are exactly this many alphanumeric characters.
pub const CODE_LENGTH: usize = 8;

/// Generate a fresh code from the OS-seeded CSPRNG.
pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// Accept exactly [`CODE_LENGTH`] characters from `[A-Za-z0-9]`.
pub fn validate_code(code: &str) -> Result<(), BeamError> {
    if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BeamError::InvalidCode(code.to_string()));
    }
    Ok(())
}
