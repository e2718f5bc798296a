//! Short participant codes, unique across all registrations.

use rand::Rng;
use tracing::{debug, warn};

use crate::backend::{BackendError, RegistrationStore};
use crate::error::ApiError;
use crate::models::{NewRegistration, Registration};

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_CODE_LENGTH: usize = 5;

/// Upper bound on insert attempts when the store reports code collisions
pub const MAX_INSERT_ATTEMPTS: u32 = 8;

pub fn generate_code_with<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn generate_code(length: usize) -> String {
    generate_code_with(&mut rand::rng(), length)
}

/// Draw codes until one is not already taken.
///
/// Only a best effort: another request may claim the same code before the
/// insert, which [`insert_with_unique_code`] handles.
pub async fn generate_unique_code(
    store: &dyn RegistrationStore,
    length: usize,
) -> Result<String, BackendError> {
    loop {
        let code = generate_code(length);
        if !store.hacker_code_exists(&code).await? {
            return Ok(code);
        }
        debug!(code = %code, "Hacker code already taken, regenerating");
    }
}

/// Insert a registration with a fresh code, retrying on code collisions.
pub async fn insert_with_unique_code<F>(
    store: &dyn RegistrationStore,
    build: F,
) -> Result<Registration, ApiError>
where
    F: Fn(String) -> NewRegistration,
{
    for attempt in 1..=MAX_INSERT_ATTEMPTS {
        let code = generate_unique_code(store, DEFAULT_CODE_LENGTH)
            .await
            .map_err(|e| ApiError::upstream("Failed to save registration", e))?;

        match store.insert_registration(&build(code)).await {
            Ok(registration) => return Ok(registration),
            Err(e) if e.is_unique_violation_on("hacker_code") => {
                warn!(attempt, "Hacker code collided on insert, retrying");
            }
            Err(e) if e.is_unique_violation_on("user_id") => {
                return Err(ApiError::BadRequest("You have already registered".to_string()));
            }
            Err(e) => return Err(ApiError::upstream("Failed to save registration", e)),
        }
    }

    Err(ApiError::Internal(format!(
        "no free hacker code after {} attempts",
        MAX_INSERT_ATTEMPTS
    )))
}
