use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use themis::config::AppConfig;
use themis::logging::configure_logging;
use themis::{AssessmentResult, Assessor, BackendStatus};

#[derive(Parser)]
#[command(author, version, about = "Assess whether an academic venue is legitimate or predatory", long_about = None)]
struct Cli {
    /// Venue name, optionally with ISSN, e.g. "Nature (ISSN: 0028-0836)"
    query: Option<String>,

    /// Print the full assessment as JSON
    #[arg(long)]
    json: bool,

    /// Remove expired rows from every cache table before anything else
    #[arg(long)]
    cleanup: bool,

    /// Drop every cached assessment
    #[arg(long)]
    clear_cache: bool,

    /// Print per-source membership counts and table sizes
    #[arg(long)]
    stats: bool,
}

fn print_assessment(result: &AssessmentResult) {
    println!("Query:       {}", result.input_query);
    println!(
        "Assessment:  {} (confidence {:.2}, score {:+.2}){}",
        result.assessment.as_str().to_uppercase(),
        result.confidence,
        result.overall_score,
        if result.cached { " [cached]" } else { "" }
    );
    println!("Time:        {:.2}s", result.processing_time);

    println!("\nReasoning:");
    for line in &result.reasoning {
        println!("  - {}", line);
    }

    println!("\nBackends:");
    for backend in &result.backend_results {
        let detail = match backend.status {
            BackendStatus::Found => format!(
                "{} {:.2}",
                backend.assessment.map(|a| a.as_str()).unwrap_or("-"),
                backend.confidence
            ),
            _ => backend.error_message.clone().unwrap_or_default(),
        };
        println!(
            "  {:<30} {:<13} {:>6.2}s  {}",
            backend.backend_name,
            backend.status.to_string(),
            backend.response_time,
            detail
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logging();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let assessor = Assessor::new(&config)
        .await
        .context("Failed to initialize assessor")?;

    if cli.cleanup {
        let removed = assessor.cleanup().await?;
        info!("Removed {} expired cache rows", removed);
        println!("Removed {} expired cache rows", removed);
    }

    if cli.clear_cache {
        let removed = assessor.database().clear_assessment_cache().await?;
        println!("Cleared {} cached assessments", removed);
    }

    if cli.stats {
        let counts = assessor.database().collect_stats().await?;
        println!("Table rows (assessments:sources:entries:kv:metrics:retractions:retraction_stats:organizations)");
        println!("  {}", counts);
        for stats in assessor.database().get_source_statistics().await? {
            println!(
                "{:<32} {:<13} {:>8}",
                stats.source_name, stats.assessment.as_str(), stats.entries
            );
        }
    }

    let Some(query) = cli.query else {
        if cli.cleanup || cli.clear_cache || cli.stats {
            return Ok(());
        }
        bail!("No venue given. Usage: themis \"<venue name or ISSN>\"");
    };

    let result = assessor.assess(&query).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_assessment(&result);
    }

    Ok(())
}
