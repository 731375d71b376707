//! Argon2id hashing for account passwords and chat-lock passcodes.

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::{Result, StoreError};

pub fn hash(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    hasher()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| StoreError::PasswordHash(e.to_string()))
}

/// `Ok(false)` on mismatch; `Err` only if the stored hash is unreadable.
pub fn verify(secret: &str, phc: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|e| StoreError::PasswordHash(e.to_string()))?;
    Ok(hasher().verify_password(secret.as_bytes(), &parsed).is_ok())
}

#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

// Minimum cost keeps the test suite fast; the PHC string records the
// parameters, so verification is unaffected.
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    use argon2::{Algorithm, Params, Version};
    let params = Params::new(Params::MIN_M_COST, 1, 1, None).expect("static argon2 params");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}
