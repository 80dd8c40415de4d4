use std::path::PathBuf;

use cloudchain_core::{BackupPool, ChainError, SyncDirection, SyncReport};
use tracing::info;

use super::account_or_active;
use crate::format::{format_bytes, presence_label};
use crate::Outcome;

pub(crate) async fn run_upload(pool: &mut BackupPool, paths: &[PathBuf]) -> anyhow::Result<Outcome> {
    let mut uploaded = 0usize;
    let mut failed = 0usize;
    let mut last_error = None;

    for (pos, path) in paths.iter().enumerate() {
        match pool.upload(path).await {
            Ok(outcome) => {
                uploaded += 1;
                println!(
                    "{}  {}  -> account {}",
                    outcome.entry.name,
                    format_bytes(outcome.entry.size_bytes),
                    outcome.entry.owning_account_index
                );
                if outcome.rollover_required {
                    eprintln!("Active account is now full; run `cloudchain add` before uploading more.");
                }
            }
            Err(e @ ChainError::QuotaExceeded { .. }) => {
                let left = paths.len() - pos;
                eprintln!("{}: {e}", path.display());
                eprintln!("Skipping {left} remaining file(s); run `cloudchain add` first.");
                failed += left;
                last_error = Some(e);
                break;
            }
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                failed += 1;
                last_error = Some(e);
            }
        }
    }

    info!("upload batch: {uploaded} uploaded, {failed} failed");
    match last_error {
        None => Ok(Outcome::Done),
        Some(e) if uploaded == 0 => Err(e.into()),
        Some(_) => Ok(Outcome::Partial),
    }
}

pub(crate) async fn run_download(
    pool: &mut BackupPool,
    name: &str,
    account: Option<u32>,
) -> anyhow::Result<Outcome> {
    let index = account_or_active(pool, account)?;
    let path = pool.download(index, name).await?;
    println!("{name} -> {}", path.display());
    Ok(Outcome::Done)
}

pub(crate) async fn run_sync(
    pool: &mut BackupPool,
    local_to_cloud: bool,
    account: Option<u32>,
) -> anyhow::Result<Outcome> {
    let direction = if local_to_cloud {
        SyncDirection::LocalToCloud
    } else {
        SyncDirection::CloudToLocal
    };
    let report = pool.sync(direction, account).await?;
    print_report(direction, &report);
    Ok(if report.is_complete() {
        Outcome::Done
    } else {
        Outcome::Partial
    })
}

fn print_report(direction: SyncDirection, report: &SyncReport) {
    let verb = match direction {
        SyncDirection::LocalToCloud => "uploaded",
        SyncDirection::CloudToLocal => "downloaded",
    };
    for name in &report.transferred {
        println!("{verb}  {name}");
    }
    for failure in &report.failures {
        if failure.attempts == 0 {
            eprintln!("failed  {}: {}", failure.name, failure.reason);
        } else {
            eprintln!(
                "failed  {} after {} attempt(s): {}",
                failure.name, failure.attempts, failure.reason
            );
        }
    }
    println!(
        "Account {}: {} {verb}, {} skipped, {} failed.",
        report.account_index,
        report.transferred.len(),
        report.skipped,
        report.failures.len()
    );
}

pub(crate) async fn run_rm(
    pool: &mut BackupPool,
    name: &str,
    local: bool,
    account: Option<u32>,
) -> anyhow::Result<Outcome> {
    let index = account_or_active(pool, account)?;
    let remaining = if local {
        pool.delete_local(index, name)?
    } else {
        pool.delete_cloud(index, name).await?
    };
    let side = if local { "local mirror" } else { "cloud" };
    match remaining {
        Some(presence) => println!("Removed {name} from {side}; now {}.", presence_label(Some(presence))),
        None => println!("Removed {name} from {side}; no copies left, entry dropped."),
    }
    Ok(Outcome::Done)
}
