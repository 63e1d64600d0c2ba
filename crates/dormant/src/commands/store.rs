//! Store command - inspect and purge passivated sessions.

use anyhow::{Context as _, Result};
use chrono::{TimeDelta, Utc};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::json;
use tracing::info;

use dormant_cache::SessionKey;

use super::Context;

/// Arguments for the store command.
#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    /// List passivated sessions
    List,

    /// Delete one passivated session
    Remove {
        /// Session key (UUID)
        key: String,
    },

    /// Delete passivated sessions older than a cutoff
    Purge {
        /// Age in seconds; records stored earlier than this are deleted
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        older_than_secs: i64,
    },
}

/// Run the store command.
pub async fn run(args: StoreArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;

    match args.command {
        StoreCommand::List => {
            let mut records = store.records().context("failed to list records")?;
            records.sort_by_key(|r| r.stored_at);

            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }

            if records.is_empty() {
                println!("{}", Style::new().dim().apply_to("No passivated sessions"));
                return Ok(());
            }

            println!("{}", style("Passivated Sessions").bold());
            println!("{}", Style::new().dim().apply_to("─".repeat(70)));
            println!();
            for record in &records {
                println!(
                    "  {}  {:>8} B  {}",
                    style(record.key).cyan(),
                    record.size,
                    Style::new()
                        .dim()
                        .apply_to(record.stored_at.format("%Y-%m-%d %H:%M:%S UTC"))
                );
            }
            println!();
            println!("  {} record(s) in {} store", records.len(), ctx.config.store.kind);
        }

        StoreCommand::Remove { key } => {
            let key: SessionKey = key.parse().context("invalid session key")?;
            let removed = store.remove(&key).context("failed to remove record")?;
            info!(key = %key, removed, "Store remove");

            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "key": key, "removed": removed }))?
                );
            } else if removed {
                println!("{} Removed {}", style("✓").green(), key);
            } else {
                println!("{} No record for {}", style("·").dim(), key);
            }
        }

        StoreCommand::Purge { older_than_secs } => {
            let cutoff = TimeDelta::try_seconds(older_than_secs)
                .and_then(|age| Utc::now().checked_sub_signed(age))
                .with_context(|| format!("--older-than-secs {older_than_secs} is out of range"))?;
            let purged = store
                .purge_older_than(cutoff)
                .context("failed to purge records")?;
            info!(count = purged.len(), %cutoff, "Store purge");

            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "cutoff": cutoff,
                        "purged": purged,
                    }))?
                );
            } else {
                println!(
                    "{} Purged {} record(s) stored before {}",
                    style("✓").green(),
                    purged.len(),
                    cutoff.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }

    Ok(())
}
