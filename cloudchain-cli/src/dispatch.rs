use std::sync::Arc;

use anyhow::Context;
use cloudchain_core::{BackupPool, ChainConfig, FsRemote, LocalTokenProvider};
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::cmd;
use crate::Outcome;

/// Resolves the configuration: file first, then command-line overrides.
pub(crate) fn resolve_config(cli: &Cli) -> anyhow::Result<ChainConfig> {
    let mut config = match &cli.config {
        Some(path) => ChainConfig::load(path)?,
        None => ChainConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(remote) = &cli.remote {
        config.remote_dir = Some(remote.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Opens the pool and attaches the directory remote when one is configured.
fn open_pool(config: ChainConfig) -> anyhow::Result<BackupPool> {
    let remote = config
        .remote_dir
        .clone()
        .map(|dir| FsRemote::new(dir, config.remote_quota_bytes));
    let mut pool = BackupPool::open(config)?;
    if let Some(remote) = remote {
        let provider = Arc::new(LocalTokenProvider::new(pool.root().clone()));
        pool.connect(Arc::new(remote), provider);
    }
    debug!("opened pool at {}", pool.root().path().display());
    Ok(pool)
}

pub(crate) async fn run(cli: &Cli) -> anyhow::Result<Outcome> {
    let config = resolve_config(cli)?;
    let mut pool = open_pool(config).context("cannot open backup pool")?;

    match &cli.command {
        Commands::Init { base, identifier } => cmd::chain::run_init(&mut pool, base, identifier),
        Commands::Add { identifier, force } => {
            cmd::chain::run_add(&mut pool, identifier.as_deref(), *force).await
        }
        Commands::Status { refresh } => cmd::chain::run_status(&mut pool, *refresh).await,
        Commands::Accounts => cmd::chain::run_accounts(&pool),
        Commands::Reset { yes } => cmd::chain::run_reset(&mut pool, *yes),
        Commands::Upload { paths } => cmd::transfer::run_upload(&mut pool, paths).await,
        Commands::Download { name, account } => {
            cmd::transfer::run_download(&mut pool, name, *account).await
        }
        Commands::Sync {
            local_to_cloud,
            account,
            ..
        } => cmd::transfer::run_sync(&mut pool, *local_to_cloud, *account).await,
        Commands::Rm {
            name,
            local,
            account,
            ..
        } => cmd::transfer::run_rm(&mut pool, name, *local, *account).await,
        Commands::List { account } => cmd::ledger::run_list(&mut pool, *account),
        Commands::Heal { adopt, account } => cmd::ledger::run_heal(&mut pool, *adopt, *account),
        Commands::Export { path } => cmd::state::run_export(&pool, path),
        Commands::Restore { path } => cmd::state::run_restore(&mut pool, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(&file, r#"{ "root": "/from/file", "transfer_attempts": 7 }"#).unwrap();

        let cli = Cli::try_parse_from([
            "cloudchain",
            "--config",
            file.to_str().unwrap(),
            "--root",
            "/from/flag",
            "--remote",
            "/remote",
            "accounts",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();

        assert_eq!(config.root, PathBuf::from("/from/flag"));
        assert_eq!(config.remote_dir, Some(PathBuf::from("/remote")));
        assert_eq!(config.transfer_attempts, 7);
    }
}
