//! Encryption layer for CloudChain.
//!
//! Provides the primitives behind the state export blob:
//! - Argon2id for key derivation from passphrases
//! - ChaCha20-Poly1305 for authenticated encryption with associated data
//! - Secure key handling with zeroization
//!
//! # Architecture
//!
//! Keys are never stored. The export key is derived from the operator's
//! passphrase and a per-export random salt each time a blob is sealed or
//! opened. The AEAD tag is kept detached from the ciphertext so container
//! formats can carry it as its own field, and every container header field
//! is bound as associated data so tampering with any of them fails the
//! authentication check.

mod cipher;
mod error;
mod key;

pub use cipher::{generate_nonce, open_detached, seal_detached, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
