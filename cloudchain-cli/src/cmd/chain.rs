use cloudchain_core::{BackupPool, ChainError};
use tracing::warn;

use crate::format::{quota_summary, status_label};
use crate::prompt::confirm_typed;
use crate::table::CliTableTheme;
use crate::Outcome;

pub(crate) fn run_init(pool: &mut BackupPool, base: &str, identifier: &str) -> anyhow::Result<Outcome> {
    let account = pool.initialize(base, identifier)?;
    println!(
        "Initialized chain '{base}' with account {} ({}).",
        account.index, account.identifier
    );
    println!("Local mirror: {}", pool.root().account_dir(account.dir_name()).display());
    Ok(Outcome::Done)
}

pub(crate) async fn run_add(
    pool: &mut BackupPool,
    identifier: Option<&str>,
    force: bool,
) -> anyhow::Result<Outcome> {
    let Some(identifier) = identifier else {
        let next = pool.propose_next()?;
        println!("Next account: {}", next.identifier);
        println!("Create it with the provider, then run: cloudchain add {}", next.identifier);
        return Ok(Outcome::Done);
    };

    if pool.is_connected() && !force {
        if let Err(e) = pool.refresh_quota().await {
            warn!("could not refresh quota before adding: {e}");
        }
    }

    let account = match pool.add_account(identifier, force) {
        Ok(account) => account,
        Err(ChainError::RolloverNotRequired { used, total }) => {
            anyhow::bail!(
                "active account still has room ({used} of {total} bytes used); \
                 pass --force to add {identifier} anyway"
            );
        }
        Err(e) => return Err(e.into()),
    };
    println!("Added account {} ({}); it is now active.", account.index, account.identifier);
    Ok(Outcome::Done)
}

pub(crate) async fn run_status(pool: &mut BackupPool, refresh: bool) -> anyhow::Result<Outcome> {
    if refresh {
        pool.refresh_quota().await?;
    }
    let state = pool.chain().state()?;
    let active = pool.chain().active()?;
    let rollover = pool.chain().rollover_required()?;

    let theme = CliTableTheme::detect();
    let mut table = theme.kv_table();
    theme.kv_row(&mut table, "Chain", &state.base);
    theme.kv_row(&mut table, "Accounts", state.accounts.len());
    theme.kv_row(&mut table, "Active", format!("{} ({})", active.index, active.identifier));
    theme.kv_row(&mut table, "Quota", quota_summary(active.quota.as_ref()));
    if let Some(q) = &active.quota {
        theme.kv_row(&mut table, "Observed", q.observed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    theme.kv_row(&mut table, "Rollover", if rollover { "required" } else { "no" });
    theme.kv_row(&mut table, "Root", pool.root().path().display());
    println!("{table}");

    if rollover {
        println!();
        println!("The active account is full. Run `cloudchain add` to see the next account.");
    }
    Ok(Outcome::Done)
}

pub(crate) fn run_accounts(pool: &BackupPool) -> anyhow::Result<Outcome> {
    let theme = CliTableTheme::detect();
    let mut table = theme.data_table(&["#", "IDENTIFIER", "STATUS", "QUOTA"]);
    for account in pool.chain().state()?.accounts.iter() {
        table.add_row(vec![
            account.index.to_string(),
            account.identifier.clone(),
            status_label(account.status).to_string(),
            quota_summary(account.quota.as_ref()),
        ]);
    }
    println!("{table}");
    Ok(Outcome::Done)
}

pub(crate) fn run_reset(pool: &mut BackupPool, yes: bool) -> anyhow::Result<Outcome> {
    if !pool.chain().is_initialized() {
        return Err(ChainError::NotInitialized.into());
    }
    if !yes {
        let message = format!(
            "WARNING: this deletes the chain, every ledger, every credential and every \
             local mirror under {}. Remote data is not touched.",
            pool.root().path().display()
        );
        if !confirm_typed(&message, "reset")? {
            eprintln!("Aborted.");
            return Ok(Outcome::Declined);
        }
    }
    pool.reset()?;
    println!("Local state removed.");
    Ok(Outcome::Done)
}
