//! Guest secret generation and hashing.
//!
//! A raw [`Secret`] is returned to the caller exactly once and is otherwise
//! only ever handled as a SHA-512 crypt hash.

use rand::Rng;
use rand::distr::Alphanumeric;
use sha_crypt::{ROUNDS_DEFAULT, Sha512Params, sha512_check, sha512_simple};
use std::fmt;
use vmforge_shared::{VmforgeError, VmforgeResult};

use crate::runtime::constants::guest_defaults::MIN_SECRET_LENGTH;

/// A guest login secret.
///
/// `Debug` and `Display` never print the value; use [`Secret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Random alphanumeric secret of at least `len` characters.
///
/// Lengths below [`MIN_SECRET_LENGTH`] are raised to it.
pub fn generate_secret(len: usize) -> Secret {
    let len = len.max(MIN_SECRET_LENGTH);
    let value: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Secret(value)
}

/// SHA-512 crypt (`$6$...`) hash with a fresh random salt.
///
/// Hashing the same secret twice yields different strings.
pub fn hash_secret(secret: &Secret) -> VmforgeResult<String> {
    let params = Sha512Params::new(ROUNDS_DEFAULT)
        .map_err(|e| VmforgeError::Internal(format!("invalid hash parameters: {:?}", e)))?;
    sha512_simple(secret.expose(), &params)
        .map_err(|e| VmforgeError::Internal(format!("failed to hash secret: {:?}", e)))
}

/// Whether `hash` was produced from `secret`.
pub fn verify_secret(secret: &Secret, hash: &str) -> bool {
    sha512_check(secret.expose(), hash).is_ok()
}
