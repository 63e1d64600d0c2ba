//! Config command - show the effective configuration and its sources.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::json;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files were checked
    Which,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let effective = ctx.config.to_config();

    if ctx.json_output {
        let sources: Vec<_> = ctx
            .sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.display().to_string())
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "sources": sources,
                "warnings": ctx.warnings,
                "config": effective,
            }))?
        );
        return Ok(());
    }

    let dim = Style::new().dim();
    let loaded: Vec<_> = ctx.sources.iter().filter(|s| s.loaded).collect();
    if loaded.is_empty() {
        println!("{}", dim.apply_to("# No config files loaded, showing defaults"));
    } else {
        for source in loaded {
            println!("{}", dim.apply_to(format!("# Loaded from {}", source.path.display())));
        }
    }
    for warning in &ctx.warnings {
        println!("{}", Style::new().yellow().apply_to(format!("# Warning: {warning}")));
    }
    println!();

    let rendered = effective
        .to_toml()
        .context("failed to render configuration")?;
    print!("{rendered}");

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<_> = ctx
            .sources
            .iter()
            .map(|s| json!({ "path": s.path.display().to_string(), "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("{}", style("Config Sources").bold());
    println!("{}", Style::new().dim().apply_to("─".repeat(50)));
    println!();
    for source in &ctx.sources {
        let marker = if source.loaded {
            style("✓").green()
        } else {
            style("·").dim()
        };
        println!("  {} {}", marker, source.path.display());
    }
    println!();
    println!(
        "  {}",
        Style::new()
            .dim()
            .apply_to("Later files override earlier ones; CLI flags override all files.")
    );

    Ok(())
}
