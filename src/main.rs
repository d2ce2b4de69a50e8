// ncts-intake - place the monthly NCTS snapshot files and shortages export

use anyhow::{Context, Result};
use clap::Parser;
use ncts_monthly::cli::CommonArgs;
use ncts_monthly::{exit_code, logging, run_intake, IntakeReport};
use std::process::ExitCode;

/// Unpack the latest NCTS distribution into the upload tree and copy the
/// Medicine Shortages export under its standard name.
#[derive(Debug, Parser)]
#[command(name = "ncts-intake", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.common.config()?;
    let report = run_intake(&config).context("Distribution intake failed")?;

    if cli.common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &IntakeReport) {
    println!("📦 NCTS Distribution Intake");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Archive: {}", report.snapshots.archive.display());
    for placed in &report.snapshots.placed {
        println!(
            "✓ {} → {} ({} bytes, sha256 {})",
            placed.source_entry,
            placed.destination.display(),
            placed.bytes,
            &placed.sha256[..12]
        );
    }
    for marker in &report.snapshots.skipped {
        println!("⚠️  No member for {} (optional, skipped)", marker);
    }

    match &report.shortages {
        Some(copy) => println!(
            "✓ Shortages: {} → {}",
            copy.source.display(),
            copy.destination.display()
        ),
        None => println!("⚠️  No Medicine Shortages file found (skipped)"),
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Intake complete");
}
