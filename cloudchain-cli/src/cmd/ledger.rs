use cloudchain_core::{BackupPool, HealReport};

use super::account_or_active;
use crate::format::{entry_presence, format_bytes, format_time};
use crate::table::CliTableTheme;
use crate::Outcome;

pub(crate) fn run_list(pool: &mut BackupPool, account: Option<u32>) -> anyhow::Result<Outcome> {
    let entries = pool.list_entries(account)?;
    if entries.is_empty() {
        println!("No tracked files.");
        return Ok(Outcome::Done);
    }

    let theme = CliTableTheme::detect();
    let mut table = theme.data_table(&["ACCOUNT", "NAME", "SIZE", "WHERE", "UPLOADED"]);
    for entry in &entries {
        table.add_row(vec![
            entry.owning_account_index.to_string(),
            entry.name.clone(),
            format_bytes(entry.size_bytes),
            entry_presence(entry).to_string(),
            format_time(entry.uploaded_at),
        ]);
    }
    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!("{table}");
    println!();
    println!("{} file(s), {}", entries.len(), format_bytes(total));
    Ok(Outcome::Done)
}

pub(crate) fn run_heal(pool: &mut BackupPool, adopt: bool, account: Option<u32>) -> anyhow::Result<Outcome> {
    let reports = match account {
        Some(_) => {
            let index = account_or_active(pool, account)?;
            vec![pool.heal(index)?]
        }
        None => pool.heal_all()?,
    };

    let mut adopted = 0usize;
    for report in &reports {
        print_heal(report);
        if adopt {
            for file in &report.untracked {
                pool.adopt(report.account_index, &file.name)?;
                println!("  adopted {} ({})", file.name, format_bytes(file.size_bytes));
                adopted += 1;
            }
        }
    }

    let untracked: usize = reports.iter().map(|r| r.untracked.len()).sum();
    if untracked > adopted {
        println!("{} untracked file(s); rerun with --adopt to track them.", untracked - adopted);
    }
    Ok(Outcome::Done)
}

fn print_heal(report: &HealReport) {
    if report.is_noop() && report.untracked.is_empty() {
        println!("Account {}: in sync.", report.account_index);
        return;
    }
    println!("Account {}:", report.account_index);
    for name in &report.changed {
        println!("  updated {name}");
    }
    for name in &report.pruned {
        println!("  pruned  {name}");
    }
    for file in &report.untracked {
        println!("  untracked {}", file.name);
    }
}
