use std::path::Path;

use cloudchain_core::BackupPool;

use crate::passphrase::{existing_passphrase, new_passphrase};
use crate::Outcome;

pub(crate) fn run_export(pool: &BackupPool, path: &Path) -> anyhow::Result<Outcome> {
    // Fail before prompting.
    pool.chain().state()?;
    let passphrase = new_passphrase()?;
    pool.export_to(path, &passphrase)?;
    println!("Exported {} account(s) to {}.", pool.chain().accounts().len(), path.display());
    println!("Payload files are not included; download them again after restoring.");
    Ok(Outcome::Done)
}

pub(crate) fn run_restore(pool: &mut BackupPool, path: &Path) -> anyhow::Result<Outcome> {
    if pool.chain().is_initialized() {
        anyhow::bail!(
            "{} already holds a chain; restore needs an empty root (see `cloudchain reset`)",
            pool.root().path().display()
        );
    }
    let passphrase = existing_passphrase()?;
    let reports = pool.restore_from(path, &passphrase)?;
    let state = pool.chain().state()?;
    println!("Restored chain '{}' with {} account(s).", state.base, state.accounts.len());
    let missing: usize = reports.iter().map(|r| r.changed.len()).sum();
    if missing > 0 {
        println!("{missing} file(s) are cloud-only now; run `cloudchain sync --cloud-to-local` per account.");
    }
    Ok(Outcome::Done)
}
