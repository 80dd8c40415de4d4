//! Key material and Argon2id key derivation.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a derived symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Upper bounds accepted when parameters come from an untrusted container.
const MAX_MEMORY_KIB: u32 = 1024 * 1024; // 1 GiB
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters.
///
/// These travel inside every sealed container so that a future version can
/// raise the defaults without breaking blobs produced by an older one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Rejects parameters that Argon2 cannot run or that would be
    /// unreasonably expensive to honour.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(CryptoError::InvalidParams(format!(
                "parallelism {} outside 1..={MAX_PARALLELISM}",
                self.parallelism
            )));
        }
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(CryptoError::InvalidParams(format!(
                "iterations {} outside 1..={MAX_ITERATIONS}",
                self.iterations
            )));
        }
        let min_memory = 8 * self.parallelism;
        if self.memory_kib < min_memory || self.memory_kib > MAX_MEMORY_KIB {
            return Err(CryptoError::InvalidParams(format!(
                "memory {} KiB outside {min_memory}..={MAX_MEMORY_KIB}",
                self.memory_kib
            )));
        }
        Ok(())
    }
}

/// Random salt for key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// A 256-bit symmetric key. Wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derives a key from a passphrase with Argon2id (v0x13).
pub fn derive_key(passphrase: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    params.validate()?;

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::InvalidParams(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = [0u8; KEY_SIZE];
    argon
        .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = DerivedKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Generates a random key (not passphrase-bound).
pub fn generate_random_key() -> DerivedKey {
    DerivedKey::from_bytes(rand::random())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn same_inputs_derive_same_key() {
        let salt = Salt::from_bytes([7u8; SALT_SIZE]);
        let a = derive_key("correct horse", &salt, &cheap()).unwrap();
        let b = derive_key("correct horse", &salt, &cheap()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salt_derives_different_key() {
        let a = derive_key("pw", &Salt::from_bytes([1u8; SALT_SIZE]), &cheap()).unwrap();
        let b = derive_key("pw", &Salt::from_bytes([2u8; SALT_SIZE]), &cheap()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let params = KdfParams {
            parallelism: 0,
            ..cheap()
        };
        assert!(matches!(params.validate(), Err(CryptoError::InvalidParams(_))));
    }

    #[test]
    fn oversized_memory_rejected() {
        let params = KdfParams {
            memory_kib: u32::MAX,
            ..cheap()
        };
        assert!(derive_key("pw", &Salt::random(), &params).is_err());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = generate_random_key();
        assert_eq!(format!("{key:?}"), "DerivedKey([REDACTED])");
    }
}
