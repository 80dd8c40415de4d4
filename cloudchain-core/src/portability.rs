//! Passphrase-encrypted export of the complete local state.
//!
//! The blob is a JSON document whose binary fields are base64:
//!
//! ```text
//! { format_version, algorithm, kdf_params, salt, nonce, ciphertext, auth_tag }
//! ```
//!
//! The key is derived with Argon2id from the passphrase and salt; the
//! payload is sealed with ChaCha20-Poly1305 and every header field is bound
//! as associated data, so changing any byte of the blob fails authentication.
//! Payload files are not part of the export.

use crate::error::{ChainError, ChainResult};
use crate::ledger::Ledger;
use crate::types::ChainState;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cloudchain_crypto::{
    derive_key, generate_nonce, open_detached, seal_detached, KdfParams, Salt, NONCE_SIZE,
    SALT_SIZE, TAG_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const FORMAT_VERSION: u32 = 1;
pub const ALGORITHM: &str = "argon2id+chacha20poly1305";

/// Everything an export carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBundle {
    pub chain: ChainState,
    pub ledgers: Vec<Ledger>,
    /// Raw credential files keyed by account directory name.
    #[serde(default)]
    pub credentials: BTreeMap<String, Vec<u8>>,
}

/// On-disk container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportBlob {
    pub format_version: u32,
    pub algorithm: String,
    pub kdf_params: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub auth_tag: String,
}

impl ExportBlob {
    /// Header fields in a fixed order, used as AEAD associated data.
    fn associated_data(&self) -> ChainResult<Vec<u8>> {
        let header = (
            self.format_version,
            &self.algorithm,
            &self.kdf_params,
            &self.salt,
            &self.nonce,
        );
        serde_json::to_vec(&header).map_err(|e| ChainError::Encoding(e.to_string()))
    }
}

/// Encrypts the state with default KDF parameters.
pub fn export(
    chain: &ChainState,
    ledgers: &[Ledger],
    credentials: &BTreeMap<String, Vec<u8>>,
    passphrase: &str,
) -> ChainResult<Vec<u8>> {
    export_with_params(chain, ledgers, credentials, passphrase, &KdfParams::default())
}

/// Encrypts the state with explicit KDF parameters.
pub fn export_with_params(
    chain: &ChainState,
    ledgers: &[Ledger],
    credentials: &BTreeMap<String, Vec<u8>>,
    passphrase: &str,
    params: &KdfParams,
) -> ChainResult<Vec<u8>> {
    let bundle = StateBundle {
        chain: chain.clone(),
        ledgers: ledgers.to_vec(),
        credentials: credentials.clone(),
    };
    check_bundle(&bundle).map_err(ChainError::Encoding)?;

    let plaintext = Zeroizing::new(
        serde_json::to_vec(&bundle).map_err(|e| ChainError::Encoding(e.to_string()))?,
    );

    let salt = Salt::random();
    let nonce = generate_nonce();
    let key = derive_key(passphrase, &salt, params)
        .map_err(|e| ChainError::Encoding(e.to_string()))?;

    let mut blob = ExportBlob {
        format_version: FORMAT_VERSION,
        algorithm: ALGORITHM.to_string(),
        kdf_params: *params,
        salt: STANDARD.encode(salt.as_bytes()),
        nonce: STANDARD.encode(nonce),
        ciphertext: String::new(),
        auth_tag: String::new(),
    };
    let aad = blob.associated_data()?;
    let (ciphertext, tag) = seal_detached(&key, &nonce, &aad, &plaintext)
        .map_err(|e| ChainError::Encoding(e.to_string()))?;
    blob.ciphertext = STANDARD.encode(ciphertext);
    blob.auth_tag = STANDARD.encode(tag);

    info!(
        "exported chain {} ({} account(s), {} ledger(s))",
        chain.base,
        chain.accounts.len(),
        ledgers.len()
    );
    serde_json::to_vec_pretty(&blob).map_err(|e| ChainError::Encoding(e.to_string()))
}

/// Decrypts and validates an export blob without touching the disk.
///
/// Every way a blob can be unusable short of a valid decryption (bad JSON,
/// unknown version, tampered header, wrong passphrase) is reported as
/// [`ChainError::Authentication`].
pub fn restore(blob: &[u8], passphrase: &str) -> ChainResult<StateBundle> {
    let parsed: ExportBlob = serde_json::from_slice(blob)
        .map_err(|e| ChainError::Authentication(format!("unreadable export: {e}")))?;

    if parsed.format_version != FORMAT_VERSION {
        return Err(ChainError::Authentication(format!(
            "unsupported export format version {}",
            parsed.format_version
        )));
    }
    if parsed.algorithm != ALGORITHM {
        return Err(ChainError::Authentication(format!(
            "unsupported algorithm {}",
            parsed.algorithm
        )));
    }
    parsed
        .kdf_params
        .validate()
        .map_err(|e| ChainError::Authentication(e.to_string()))?;

    let salt: [u8; SALT_SIZE] = decode_fixed(&parsed.salt, "salt")?;
    let nonce: [u8; NONCE_SIZE] = decode_fixed(&parsed.nonce, "nonce")?;
    let tag: [u8; TAG_SIZE] = decode_fixed(&parsed.auth_tag, "auth_tag")?;
    let ciphertext = STANDARD
        .decode(&parsed.ciphertext)
        .map_err(|_| ChainError::Authentication("ciphertext is not base64".into()))?;

    let key = derive_key(passphrase, &Salt::from_bytes(salt), &parsed.kdf_params)
        .map_err(|e| ChainError::Authentication(e.to_string()))?;
    let aad = parsed.associated_data()?;
    let plaintext = open_detached(&key, &nonce, &aad, &ciphertext, &tag)
        .map_err(|_| ChainError::Authentication("wrong passphrase or tampered export".into()))?;

    let bundle: StateBundle = serde_json::from_slice(&plaintext)
        .map_err(|e| ChainError::Encoding(format!("decrypted state is unreadable: {e}")))?;
    check_bundle(&bundle).map_err(ChainError::CorruptState)?;

    debug!(
        "decrypted export of chain {} with {} account(s)",
        bundle.chain.base,
        bundle.chain.accounts.len()
    );
    Ok(bundle)
}

fn decode_fixed<const N: usize>(field: &str, what: &str) -> ChainResult<[u8; N]> {
    let bytes = STANDARD
        .decode(field)
        .map_err(|_| ChainError::Authentication(format!("{what} is not base64")))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Authentication(format!("{what} has the wrong length")))
}

/// Chain invariants hold and every ledger and credential belongs to an
/// account of the chain, at most once.
fn check_bundle(bundle: &StateBundle) -> Result<(), String> {
    bundle.chain.check_invariants()?;

    let mut seen = BTreeSet::new();
    for ledger in &bundle.ledgers {
        if bundle.chain.account(ledger.account_index).is_none() {
            return Err(format!(
                "ledger for unknown account {}",
                ledger.account_index
            ));
        }
        if !seen.insert(ledger.account_index) {
            return Err(format!("duplicate ledger for account {}", ledger.account_index));
        }
        ledger.check_entries().map_err(|e| e.to_string())?;
        if let Some(entry) = ledger
            .entries()
            .find(|e| e.owning_account_index != ledger.account_index)
        {
            return Err(format!(
                "entry {} in ledger {} claims account {}",
                entry.name, ledger.account_index, entry.owning_account_index
            ));
        }
    }

    let dirs: BTreeSet<&str> = bundle.chain.accounts.iter().map(|a| a.dir_name()).collect();
    if let Some(unknown) = bundle
        .credentials
        .keys()
        .find(|k| !dirs.contains(k.as_str()))
    {
        return Err(format!("credential for unknown account directory {unknown}"));
    }
    Ok(())
}
