//! On-disk layout of the local root.
//!
//! ```text
//! <root>/
//!   chain.json                      chain state
//!   .cloudchain.lock                advisory lock for the running invocation
//!   <base><NNN>.cloudchain/         one directory per account
//!     ledger.json
//!     token.json                    optional credential handle
//!     <payload files by basename>
//! ```
//!
//! Every persisted file is written to a temp file in the same directory and
//! renamed into place, so readers never observe a half-written file.

use crate::error::{ChainError, ChainResult};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CHAIN_FILE: &str = "chain.json";
pub const LEDGER_FILE: &str = "ledger.json";
pub const TOKEN_FILE: &str = "token.json";
pub const LOCK_FILE: &str = ".cloudchain.lock";

/// Prefix of in-flight temp files; never a valid payload name.
pub const TEMP_PREFIX: &str = ".cloudchain-tmp";

/// Handle to the local root directory.
#[derive(Clone, Debug)]
pub struct LocalRoot {
    path: PathBuf,
}

impl LocalRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the root directory if it does not exist.
    pub fn ensure(&self) -> ChainResult<()> {
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    pub fn chain_file(&self) -> PathBuf {
        self.path.join(CHAIN_FILE)
    }

    pub fn account_dir(&self, dir_name: &str) -> PathBuf {
        self.path.join(dir_name)
    }

    pub fn ledger_file(&self, dir_name: &str) -> PathBuf {
        self.account_dir(dir_name).join(LEDGER_FILE)
    }

    pub fn token_file(&self, dir_name: &str) -> PathBuf {
        self.account_dir(dir_name).join(TOKEN_FILE)
    }

    /// Where the local copy of payload `name` lives for an account.
    pub fn mirror_path(&self, dir_name: &str, name: &str) -> PathBuf {
        self.account_dir(dir_name).join(name)
    }

    /// Lists payload files (name, size) in an account directory, skipping
    /// layout files, temp files and subdirectories.
    pub fn payload_files(&self, dir_name: &str) -> ChainResult<Vec<(String, u64)>> {
        let dir = self.account_dir(dir_name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("skipping non-UTF-8 file name in {}", dir.display());
                continue;
            };
            if is_reserved(&name) || name.starts_with(TEMP_PREFIX) {
                continue;
            }
            files.push((name, meta.len()));
        }
        files.sort();
        Ok(files)
    }

    /// Removes an account directory with everything in it.
    pub fn remove_account_dir(&self, dir_name: &str) -> ChainResult<()> {
        match fs::remove_dir_all(self.account_dir(dir_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// True for file names the layout itself uses inside an account directory.
pub fn is_reserved(name: &str) -> bool {
    name == LEDGER_FILE || name == TOKEN_FILE
}

/// Payload names are plain basenames that cannot collide with layout files.
pub fn validate_payload_name(name: &str) -> ChainResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(ChainError::InvalidName(format!("{name:?} is not a file name")));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ChainError::InvalidName(format!(
            "{name:?} must not contain path separators"
        )));
    }
    if is_reserved(name) || name.starts_with(TEMP_PREFIX) {
        return Err(ChainError::InvalidName(format!("{name:?} is reserved")));
    }
    Ok(())
}

/// Writes `data` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> ChainResult<()> {
    let mut tmp = temp_file_beside(path)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like [`write_atomic`], but the file is readable by the owner only.
pub fn write_secret(path: &Path, data: &[u8]) -> ChainResult<()> {
    let mut tmp = temp_file_beside(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Copies `src` to `dest` via temp file + rename. Returns bytes copied.
pub fn copy_atomic(src: &Path, dest: &Path) -> ChainResult<u64> {
    let mut reader = File::open(src)?;
    let mut tmp = temp_file_beside(dest)?;
    let copied = io::copy(&mut reader, &mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(copied)
}

fn temp_file_beside(path: &Path) -> ChainResult<tempfile::NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| ChainError::Config(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?)
}

/// Reads a JSON file. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ChainResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ChainResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Exclusive advisory lock on the local root.
///
/// Held for as long as the value lives; dropping it (on any exit path)
/// releases the lock. A second invocation fails fast instead of waiting.
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    pub fn acquire(root: &LocalRoot) -> ChainResult<Self> {
        root.ensure()?;
        let path = root.path().join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = fs2::FileExt::try_lock_exclusive(&file) {
            let contended = e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            return if contended {
                Err(ChainError::RootLocked(root.path().to_path_buf()))
            } else {
                Err(e.into())
            };
        }

        // Holder info is diagnostic only; the flock is what excludes.
        file.set_len(0)?;
        writeln!(file, "pid={} since={}", std::process::id(), Utc::now().to_rfc3339())?;

        debug!("acquired root lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("failed to release root lock {}: {e}", self.path.display());
        }
    }
}
