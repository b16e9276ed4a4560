use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use catalog_qa::config::QaConfig;
use catalog_qa::pipeline::orchestrator::Orchestrator;
use catalog_qa::report::write_report;
use catalog_qa::taxonomy::DivisionTaxonomy;
use catalog_qa::types::CatalogRecord;

#[derive(Parser)]
#[command(name = "catalog_qa")]
#[command(about = "Quality assurance pipeline for coded catalogue extractions")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full quality pipeline over a batch of extracted records
    Validate {
        /// JSON file holding an array of {division, code, title} records
        input: PathBuf,
        /// TOML configuration file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the detailed JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Source document the batch was extracted from (enables spot-check sampling)
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    catalog_qa::logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            input,
            config,
            report,
            source,
        } => {
            let config = match config {
                Some(path) => QaConfig::load(&path)?,
                None => QaConfig::default(),
            };

            let raw = fs::read_to_string(&input)
                .with_context(|| format!("failed to read records from {}", input.display()))?;
            let batch: Vec<CatalogRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse records from {}", input.display()))?;
            info!("loaded {} records from {}", batch.len(), input.display());

            let orchestrator = Orchestrator::new(config, DivisionTaxonomy::masterformat());
            let result = orchestrator.run(&batch, source.as_deref())?;

            println!("\n📊 Quality pipeline result:");
            println!("   Status: {}", result.status);
            println!("   Overall confidence: {:.1}%", result.overall_confidence);
            println!(
                "   Issues: {} (critical: {}, high: {}, medium: {}, low: {})",
                result.total_issues,
                result.critical_issues,
                result.high_issues,
                result.medium_issues,
                result.low_issues
            );
            println!("   Human review required: {}", result.requires_human_review);
            println!("   Recommendation: {}", result.recommendation);

            if let Some(path) = report {
                // The verdict stands either way; a lost report is only a warning.
                match write_report(&result, &batch, &path) {
                    Ok(()) => println!("   Report written to {}", path.display()),
                    Err(e) => warn!("failed to write report to {}: {}", path.display(), e),
                }
            }
        }
    }

    Ok(())
}
