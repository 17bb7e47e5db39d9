use tidemark_common::Error;
use tidemark_config::ConfigLoader;
use tidemark_db::LockHolder;
use tidemark_engine::{DownReport, MigrationState, StatusReport, UpReport};

use crate::scaffold::{Initialized, NewMigration};

pub fn print_init(loader: &ConfigLoader, created: &Initialized) {
    println!("  Config written to {}", created.config_path.display());
    if created.created_dir {
        println!("  Created {}", created.migrations_dir.display());
    } else {
        println!("  Using existing {}", created.migrations_dir.display());
    }
    println!();
    println!(
        "  Run `tidemark new --name <name>` to add a migration (config: {}).",
        loader.path().display()
    );
}

pub fn print_new(created: &NewMigration) {
    println!("  Created {}", created.up.display());
    println!("  Created {}", created.down.display());
}

pub fn print_up(report: &UpReport) {
    if report.is_noop() {
        println!(
            "Nothing to apply, {} migrations up to date.",
            report.already_applied
        );
    } else {
        for migration in &report.applied {
            println!("  applied   {migration}");
        }
        println!("Applied {} migrations.", report.applied.len());
    }
    for migration in &report.orphaned {
        println!("  warning: {migration} is applied but missing from the source");
    }
    for migration in &report.drifted {
        println!("  warning: {migration} changed since it was applied");
    }
}

pub fn print_down(report: &DownReport) {
    if report.nothing_to_revert() {
        println!("Nothing to revert.");
        return;
    }
    for migration in &report.reverted {
        println!("  reverted  {migration}");
    }
    println!("Reverted {} migrations.", report.reverted.len());
}

pub fn print_status(report: &StatusReport, holder: Option<&LockHolder>) {
    if report.entries.is_empty() && report.orphaned.is_empty() {
        println!("No migrations found.");
    }

    let name_w = report
        .entries
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0)
        .max(4);

    if !report.entries.is_empty() {
        println!("  {:<16}{:<name_w$}  STATE", "VERSION", "NAME");
    }
    for entry in &report.entries {
        let state = match &entry.state {
            MigrationState::Applied { applied_at, drifted } => {
                let mut s = format!("applied {}", applied_at.format("%Y-%m-%d %H:%M:%S UTC"));
                if *drifted {
                    s.push_str(" (changed since applied)");
                }
                s
            }
            MigrationState::Pending => "pending".to_string(),
        };
        let irreversible = if entry.reversible { "" } else { " [irreversible]" };
        println!(
            "  {:<16}{:<name_w$}  {state}{irreversible}",
            entry.version.to_string(),
            entry.name
        );
    }

    if !report.orphaned.is_empty() {
        println!();
        println!("Applied but missing from the source:");
        for record in &report.orphaned {
            println!("  {}", record.to_ref());
        }
    }

    println!();
    println!(
        "{} applied, {} pending.",
        report.applied_count(),
        report.pending_count()
    );
    if let Some(holder) = holder {
        println!(
            "Locked by {} since {} (last heartbeat {}).",
            holder.owner,
            holder.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"),
            holder.heartbeat_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

pub fn print_error(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
    match err.downcast_ref::<Error>() {
        Some(Error::LockContention { .. }) => {
            eprintln!(
                "  another run holds the lock; it is reclaimed automatically once its \
                 heartbeat is older than safety.lock_stale_after_secs"
            );
        }
        Some(e) => {
            if let Some(failure) = e.run_failure() {
                if failure.completed.is_empty() {
                    eprintln!("  no migration completed before the failure");
                } else {
                    let done: Vec<String> =
                        failure.completed.iter().map(ToString::to_string).collect();
                    eprintln!("  completed in this run: {}", done.join(", "));
                }
            }
        }
        None => {}
    }
}
