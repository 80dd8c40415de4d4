use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cloudchain",
    version,
    about = "Pool free-tier storage accounts into one sequential backup target",
    after_help = "\
Configuration:
  --config <path> loads a JSON config file; --root and --remote override it.

Environment variables:
  CLOUDCHAIN_ROOT         Local root directory (same as --root)
  CLOUDCHAIN_REMOTE       Directory backing the remote accounts (same as --remote)
  CLOUDCHAIN_PASSPHRASE   Export passphrase (skips the interactive prompt)
  RUST_LOG                Log filter (overrides -v)

Exit codes:
  0  success
  1  failed without side effects; fix the input and retry
  2  failed with possible side effects, or a batch had failures
  3  reset declined"
)]
pub(crate) struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Local root holding chain state, ledgers and mirrors
    #[arg(long, env = "CLOUDCHAIN_ROOT")]
    pub root: Option<PathBuf>,

    /// Directory backing the remote accounts
    #[arg(long, env = "CLOUDCHAIN_REMOTE")]
    pub remote: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Create the chain with its first account
    Init {
        /// Base name shared by every account of the chain
        base: String,

        /// Identifier of the first account, e.g. <base>001.cloudchain@gmail.com
        identifier: String,
    },

    /// Show the next account to create, or confirm it once created
    Add {
        /// Identifier of the account just created; omit to see the proposal
        identifier: Option<String>,

        /// Add even though the active account is not full yet
        #[arg(long)]
        force: bool,
    },

    /// Upload files to the active account
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Download a backed-up file into its account's mirror
    Download {
        /// Payload name as listed by `cloudchain list`
        name: String,

        /// Account index (defaults to the active account)
        #[arg(short, long)]
        account: Option<u32>,
    },

    /// Transfer every file that exists on one side only
    #[command(group(ArgGroup::new("direction").required(true).args(["local_to_cloud", "cloud_to_local"])))]
    Sync {
        /// Upload local-only files of the active account
        #[arg(long)]
        local_to_cloud: bool,

        /// Download cloud-only files
        #[arg(long)]
        cloud_to_local: bool,

        /// Account index (defaults to the active account)
        #[arg(short, long)]
        account: Option<u32>,
    },

    /// Remove a file from the local mirror or from the cloud
    #[command(group(ArgGroup::new("side").required(true).args(["local", "cloud"])))]
    Rm {
        /// Payload name
        name: String,

        /// Delete the local mirror copy
        #[arg(long)]
        local: bool,

        /// Delete the cloud copy
        #[arg(long)]
        cloud: bool,

        /// Account index (defaults to the active account)
        #[arg(short, long)]
        account: Option<u32>,
    },

    /// Show the active account and its quota
    Status {
        /// Ask the remote for fresh usage numbers first
        #[arg(long)]
        refresh: bool,
    },

    /// List the accounts of the chain
    Accounts,

    /// List tracked files and where they exist
    List {
        /// Only this account (defaults to all)
        #[arg(short, long)]
        account: Option<u32>,
    },

    /// Reconcile ledgers with the local mirror
    Heal {
        /// Start tracking untracked local files as local-only
        #[arg(long)]
        adopt: bool,

        /// Only this account (defaults to all)
        #[arg(short, long)]
        account: Option<u32>,
    },

    /// Write a passphrase-encrypted export of the local state
    Export {
        /// Destination file
        path: PathBuf,
    },

    /// Restore an export into an empty root
    Restore {
        /// Export file
        path: PathBuf,
    },

    /// Delete all local state (remote data is untouched)
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_requires_a_direction() {
        assert!(Cli::try_parse_from(["cloudchain", "sync"]).is_err());
        assert!(
            Cli::try_parse_from(["cloudchain", "sync", "--local-to-cloud", "--cloud-to-local"])
                .is_err()
        );
        let cli = Cli::try_parse_from(["cloudchain", "sync", "--cloud-to-local", "-a", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync {
                cloud_to_local: true,
                account: Some(2),
                ..
            }
        ));
    }

    #[test]
    fn rm_requires_a_side() {
        assert!(Cli::try_parse_from(["cloudchain", "rm", "a.bin"]).is_err());
        let cli = Cli::try_parse_from(["cloudchain", "rm", "a.bin", "--local"]).unwrap();
        assert!(matches!(cli.command, Commands::Rm { local: true, .. }));
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["cloudchain", "-vv", "accounts"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn add_without_identifier_is_a_proposal() {
        let cli = Cli::try_parse_from(["cloudchain", "add"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Add {
                identifier: None,
                force: false
            }
        ));
    }
}
