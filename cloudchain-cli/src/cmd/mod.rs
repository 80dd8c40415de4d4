pub(crate) mod chain;
pub(crate) mod ledger;
pub(crate) mod state;
pub(crate) mod transfer;

use cloudchain_core::BackupPool;

/// The account a command addresses: the given index or the active one.
pub(crate) fn account_or_active(pool: &BackupPool, account: Option<u32>) -> anyhow::Result<u32> {
    match account {
        Some(index) => {
            pool.chain().account(index)?;
            Ok(index)
        }
        None => Ok(pool.chain().active()?.index),
    }
}
