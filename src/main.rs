//! CLI entry point for the vaccination race tool.
//!
//! Provides subcommands for deriving the coverage tables, ranking a
//! snapshot, comparing one person's cohort against the rest of the country
//! and watching the published snapshot for updates.

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use vac_race::{
    age_band::SIXTEEN_PLUS,
    compare::{Cohort, VacStatus, age_group_for, compare_age_group, compare_region},
    config::{AgeBanding, Settings},
    fetch::BasicClient,
    output::{print_json, write_json, write_rank_csv, write_table_csv},
    pipeline::Tables,
    ranker::{RankMetric, best_in_class, rank_snapshot},
    source::DataSource,
    types::DerivedRow,
};

#[derive(Parser)]
#[command(name = "vac_race")]
#[command(about = "Derive, project and rank vaccination coverage", long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Path to file or URL to fetch, overriding the configured data URL
    #[arg(short, long, global = true, value_name = "FILE_OR_URL")]
    source: Option<String>,

    /// Fold 5-year bands into 10-year buckets
    #[arg(long, global = true, default_value_t = false)]
    decade_bands: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TableArg {
    Region,
    AgeGroup,
    RegionAgeGroup,
}

impl TableArg {
    fn select(self, tables: &Tables) -> &[DerivedRow] {
        match self {
            TableArg::Region => &tables.region,
            TableArg::AgeGroup => &tables.age_group,
            TableArg::RegionAgeGroup => &tables.region_age_group,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the region, age-group and region-by-age-group tables as CSV
    Derive {
        /// Directory to write the tables to
        #[arg(short, long, default_value = "out")]
        output_dir: String,
    },
    /// Rank every group of one age group on a snapshot date
    Rank {
        #[arg(short, long, value_enum, default_value_t = TableArg::Region)]
        table: TableArg,

        /// Age group to rank
        #[arg(short, long, default_value = SIXTEEN_PLUS)]
        age_group: String,

        /// Snapshot date (YYYY-MM-DD); the latest date when omitted
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// JSON file to write the ranking to
        #[arg(short, long)]
        output: Option<String>,

        /// CSV file to write the flattened ranking to
        #[arg(long)]
        csv: Option<String>,
    },
    /// Compare one cohort against the same cohort elsewhere
    Compare {
        #[arg(short, long)]
        region: String,

        /// Age band, e.g. 35-39
        #[arg(short, long, required_unless_present = "age")]
        age_group: Option<String>,

        /// Age in years; picks the region's band containing it
        #[arg(long, conflicts_with = "age_group")]
        age: Option<u16>,

        /// Number of doses received (0, 1 or 2)
        #[arg(short = 'n', long, default_value_t = 1)]
        doses: u8,

        /// Whole-region group the region comparison is made on
        #[arg(long, default_value = SIXTEEN_PLUS)]
        cohort_label: String,

        /// JSON file to write both comparisons to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Re-read the snapshot on an interval and report the leaders
    Watch {
        /// Seconds between reads; the cache TTL decides when data is refetched
        #[arg(short, long, default_value_t = 60)]
        interval: u64,

        /// Number of reads (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/vac_race.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("vac_race.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let source = DataSource::new(BasicClient::with_timeout(Duration::from_secs(60))?, settings);

    match cli.command {
        Commands::Derive { output_dir } => {
            let tables = source.tables(Utc::now()).await?;
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("creating output directory '{output_dir}'"))?;
            for (name, rows) in [
                ("region", &tables.region),
                ("age_group", &tables.age_group),
                ("region_age_group", &tables.region_age_group),
            ] {
                let path = format!("{output_dir}/{name}.csv");
                write_table_csv(&path, rows)?;
                info!(path = %path, rows = rows.len(), "Table written");
            }
        }
        Commands::Rank {
            table,
            age_group,
            date,
            output,
            csv,
        } => {
            let tables = source.tables(Utc::now()).await?;
            let peers: Vec<DerivedRow> = table
                .select(&tables)
                .iter()
                .filter(|r| r.age_group == age_group)
                .cloned()
                .collect();
            let ranked = rank_snapshot(&peers, date, &source.settings().engine)
                .with_context(|| format!("ranking age group '{age_group}'"))?;

            for row in &ranked {
                info!(
                    region = %row.region,
                    age_group = %row.age_group,
                    vac_rate = ?row.vac_rate,
                    vac_rate_rank = ?row.vac_rate_rank,
                    dose1_pct = ?row.dose1_pct,
                    dose2_pct = ?row.dose2_pct,
                    state = ?row.state(),
                    "Ranked"
                );
            }
            match output {
                Some(path) => write_json(&path, &ranked)?,
                None => print_json(&ranked)?,
            }
            if let Some(path) = csv {
                write_rank_csv(&path, &ranked)?;
            }
        }
        Commands::Compare {
            region,
            age_group,
            age,
            doses,
            cohort_label,
            output,
        } => {
            let tables = source.tables(Utc::now()).await?;
            let age_group = match (age_group, age) {
                (Some(band), _) => band,
                (None, Some(age)) => age_group_for(&tables.region_age_group, &region, age)?,
                (None, None) => bail!("either --age-group or --age is required"),
            };
            let cohort = Cohort {
                region,
                age_group,
                vac_status: VacStatus::try_from(doses)?,
            };
            let engine = &source.settings().engine;

            let by_region = compare_region(&cohort, &tables.region, &cohort_label, engine)?;
            let by_age_group = compare_age_group(&cohort, &tables.region_age_group, engine)?;
            println!("{}\n", by_region.narrative());
            println!("{}", by_age_group.narrative());

            if let Some(path) = output {
                write_json(&path, &[&by_region, &by_age_group])?;
            }
        }
        Commands::Watch { interval, count } => {
            watch(&source, interval, count).await?;
        }
    }

    Ok(())
}

/// Settings from the optional file, then the environment, then CLI flags.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let mut settings = settings.with_env_overrides()?;
    if let Some(source) = &cli.source {
        settings.data_url = source.clone();
    }
    if cli.decade_bands {
        settings.banding = AgeBanding::Decade;
    }
    Ok(settings)
}

/// Reads the tables every `interval` seconds and logs the current leaders.
/// A failed read is logged and retried on the next tick.
#[tracing::instrument(skip(source))]
async fn watch(source: &DataSource<BasicClient>, interval: u64, count: usize) -> Result<()> {
    if count == 0 {
        info!(interval, "Watching indefinitely. Press Ctrl+C to stop.");
    }
    let mut reads = 0;
    let mut last_date = None;

    loop {
        if count > 0 && reads >= count {
            break;
        }
        reads += 1;

        match source.tables(Utc::now()).await {
            Ok(tables) => {
                let latest = tables.latest_date();
                if latest != last_date {
                    info!(date = ?latest, "New snapshot");
                    last_date = latest;
                }
                let peers: Vec<DerivedRow> = tables
                    .region
                    .iter()
                    .filter(|r| r.age_group == SIXTEEN_PLUS)
                    .cloned()
                    .collect();
                match rank_snapshot(&peers, None, &source.settings().engine) {
                    Ok(ranked) => {
                        let metrics =
                            [RankMetric::VacRate, RankMetric::Dose1Pct, RankMetric::Dose2Pct];
                        for metric in metrics {
                            if let Some(leader) = best_in_class(&ranked, metric) {
                                info!(metric = %metric, region = %leader.region, "Leader");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Ranking failed"),
                }
            }
            Err(e) => error!(error = %e, "Snapshot read failed"),
        }

        if count == 0 || reads < count {
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    info!(reads, "Finished watching");
    Ok(())
}
