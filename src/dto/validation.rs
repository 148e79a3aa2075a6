//! Validation helpers for DTOs.

use validator::ValidationError;

/// Characters used in join codes; visually ambiguous ones (0/O, 1/I) are left out.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of generated join codes.
pub const JOIN_CODE_LENGTH: usize = 6;
/// Longest accepted player or host identity.
pub const MAX_IDENTITY_LENGTH: usize = 64;

/// Validates that a join code has the generated shape.
///
/// # Examples
///
/// ```ignore
/// validate_join_code("K7WQ2M") // Ok
/// validate_join_code("k7wq2m") // Err - lowercase
/// validate_join_code("K7WQ2")  // Err - too short
/// ```
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != JOIN_CODE_LENGTH {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(
            format!(
                "Join code must be exactly {JOIN_CODE_LENGTH} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.bytes().all(|byte| JOIN_CODE_ALPHABET.contains(&byte)) {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code contains characters outside of its alphabet".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a persistent identity: non-blank, bounded, no control characters.
pub fn validate_identity(identity: &str) -> Result<(), ValidationError> {
    if identity.trim().is_empty() {
        let mut err = ValidationError::new("identity_blank");
        err.message = Some("Identity must not be blank".into());
        return Err(err);
    }

    if identity.len() > MAX_IDENTITY_LENGTH {
        let mut err = ValidationError::new("identity_length");
        err.message = Some(
            format!("Identity must be at most {MAX_IDENTITY_LENGTH} bytes (got {})", identity.len())
                .into(),
        );
        return Err(err);
    }

    if identity.chars().any(char::is_control) {
        let mut err = ValidationError::new("identity_format");
        err.message = Some("Identity must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}
