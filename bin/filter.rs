// filter-medicinal-products - medicinal products from the SNOMED CT-AU change report

use anyhow::{Context, Result};
use clap::Parser;
use ncts_monthly::change_report::{NCTS_DOWNLOAD_PAGE, REPORT_PATTERN};
use ncts_monthly::cli::CommonArgs;
use ncts_monthly::{exit_code, library_error, logging, run_filter, Error, FilterReport};
use std::path::PathBuf;
use std::process::ExitCode;

/// Filter the latest change report down to medicinal products and add
/// their SNOMED URIs.
#[derive(Debug, Parser)]
#[command(name = "filter-medicinal-products", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Where the filtered CSV is written [default: the working dir]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Counts only, no per-product listing
    #[arg(long)]
    brief: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            if let Some(Error::NoInputFound { dir, .. }) = library_error(&err) {
                print_download_hint(dir);
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = cli.common.config()?;
    if let Some(dir) = &cli.output_dir {
        config.report_output_dir = Some(cli.common.root.join(dir));
    }

    let today = chrono::Local::now().date_naive();
    let report = run_filter(&config, today).context("Change-report filter failed")?;

    if cli.common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, !cli.brief);
    }
    Ok(())
}

fn print_summary(report: &FilterReport, list_products: bool) {
    println!("📂 Reading from: {}", report.input.display());
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("FILTERING SUMMARY");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total rows processed: {}", report.rows_scanned);
    println!("Medicinal Products found: {}", report.rows_matched);
    println!("Output file: {}", report.output.display());
    if !report.span.from_file_name {
        println!("⚠️  No date span in input name, used today's date");
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !list_products {
        return;
    }
    if report.products.is_empty() {
        println!("\nNo medicinal products found in the report.");
        return;
    }

    println!("\nMedicinal Products identified ({}):", report.products.len());
    for (idx, mp) in report.products.iter().enumerate() {
        let mut status = format!("[{}]", mp.status.as_deref().unwrap_or("?"));
        if let Some(change) = &mp.change_type {
            status.push_str(&format!(" ({})", change));
        }
        if let Some(reason) = &mp.inactive_reason {
            status.push_str(&format!(" - {}", reason));
        }

        println!(
            "{}. {} {}",
            idx + 1,
            mp.preferred_term.as_deref().unwrap_or("(no preferred term)"),
            status
        );
        println!("   SNOMED Code: {}", mp.concept_id);
        println!("   SNOMED URI: {}", mp.uri);
        if let Some(target) = &mp.target_concept_id {
            println!(
                "   → Target: {} (ID: {})",
                mp.target_preferred_term.as_deref().unwrap_or("?"),
                target
            );
        }
        println!();
    }
}

fn print_download_hint(dir: &std::path::Path) {
    eprintln!("\nThe change report must be downloaded first:");
    eprintln!("   1. Open {}", NCTS_DOWNLOAD_PAGE);
    eprintln!("   2. Click \"Download as CSV\"");
    eprintln!(
        "   3. Save it in {} as {} (e.g. SNOMEDCT-AU-concept-changes-YYYYMMDD-YYYYMMDD.csv)",
        dir.display(),
        REPORT_PATTERN
    );
    eprintln!("Then run this command again.");
}
