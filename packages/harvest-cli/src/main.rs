// Entry point for the PNCP tender harvester

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pncp_harvester::{
    CdpBrowser, DownloadPolicy, HarvestConfig, PostgresTenderStore, RegionCode, TenderPipeline,
};

/// Harvest public procurement notices from the PNCP portal into Postgres.
#[derive(Debug, Parser)]
#[command(name = "harvest", version, about)]
struct Cli {
    /// Regions to harvest (two-letter UF codes, comma separated or repeated)
    #[arg(long, value_delimiter = ',')]
    regions: Vec<RegionCode>,

    /// Harvest every federative unit
    #[arg(long, conflicts_with_all = ["regions", "priority"])]
    all: bool,

    /// Harvest the high-volume regions only
    #[arg(long, conflicts_with = "regions")]
    priority: bool,

    /// Maximum tenders per region
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Attachment handling: save, simulate or list
    #[arg(long, value_name = "POLICY", default_value = "simulate")]
    files: DownloadPolicy,

    /// Directory for saved attachments
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Regions harvested concurrently
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// Write the harvested batch to this path as pretty JSON
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    headed: bool,

    /// Create the tenders table and indexes before running
    #[arg(long)]
    ensure_schema: bool,
}

fn resolve_regions(cli: &Cli) -> Result<Vec<RegionCode>> {
    let mut regions = if cli.all {
        RegionCode::ALL.to_vec()
    } else if cli.priority {
        RegionCode::PRIORITY.to_vec()
    } else {
        cli.regions.clone()
    };
    if regions.is_empty() {
        anyhow::bail!("no regions selected; pass --regions, --priority or --all");
    }
    let mut seen = HashSet::new();
    regions.retain(|region| seen.insert(*region));
    Ok(regions)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pncp_harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let regions = resolve_regions(&cli)?;
    tracing::info!(
        regions = regions.len(),
        limit = cli.limit,
        "Starting PNCP tender harvest"
    );

    let mut config = HarvestConfig::from_env().with_download_policy(cli.files);
    if let Some(dir) = &cli.download_dir {
        config = config.with_download_dir(dir.clone());
    }
    if let Some(parallel) = cli.parallel {
        config = config.with_max_concurrent_regions(parallel);
    }

    // Connect to database
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    let store = PostgresTenderStore::from_pool(pool);
    if cli.ensure_schema {
        store
            .ensure_schema()
            .await
            .context("Failed to ensure tender schema")?;
        tracing::info!("Schema ensured");
    }

    // Launch browser; without one there is no run
    let browser = CdpBrowser::launch(!cli.headed)
        .await
        .context("Failed to launch browser")?;
    tracing::info!(headed = cli.headed, "Browser launched");

    let pipeline = TenderPipeline::new(browser, store, config);

    // First Ctrl-C finishes the current wave and reconciles what it has
    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal, finishing current wave");
        cancel.cancel();
    });

    let summary = pipeline.run(&regions, cli.limit).await?;

    for report in &summary.regions {
        tracing::info!(
            region = %report.region,
            tenders = report.tenders,
            structural = report.structural,
            fallback = report.fallback,
            failures = report.failures,
            aborted = report.aborted,
            "region summary"
        );
    }
    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        failed = summary.failed,
        "Harvest finished"
    );

    if let Some(path) = &cli.out {
        let json = serde_json::to_string_pretty(&summary.records)
            .context("Failed to serialize harvested batch")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), records = summary.records.len(), "Batch exported");
    }

    pipeline.into_factory().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_flags_parse() {
        Cli::command().debug_assert();

        let cli = Cli::parse_from([
            "harvest",
            "--regions",
            "sp,rj",
            "--limit",
            "3",
            "--files",
            "save",
            "--headed",
        ]);
        assert_eq!(cli.regions, vec![RegionCode::Sp, RegionCode::Rj]);
        assert_eq!(cli.limit, 3);
        assert_eq!(cli.files, DownloadPolicy::Save);
        assert!(cli.headed);
        assert!(!cli.ensure_schema);
    }

    #[test]
    fn test_region_resolution_shorthands() {
        let all = Cli::parse_from(["harvest", "--all"]);
        assert_eq!(resolve_regions(&all).unwrap().len(), 27);

        let priority = Cli::parse_from(["harvest", "--priority"]);
        assert_eq!(resolve_regions(&priority).unwrap(), RegionCode::PRIORITY);

        let dupes = Cli::parse_from(["harvest", "--regions", "SP,RJ,SP"]);
        assert_eq!(
            resolve_regions(&dupes).unwrap(),
            vec![RegionCode::Sp, RegionCode::Rj]
        );

        let none = Cli::parse_from(["harvest"]);
        assert!(resolve_regions(&none).is_err());
    }
}
