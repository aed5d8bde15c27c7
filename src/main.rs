use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use location_mapper_lib::{
    init_tracing, parse_geo_markup, require_input, AppConfig, BatchProgress, DirectoryDownloadSink,
    LocationResolver, MapSession, ProgressObserver, TelemetryClient, TracingMapSink,
};

#[derive(Parser, Debug)]
#[command(
    name = "location-mapper",
    version,
    about = "Resolve free-text locations to map markers and KML"
)]
struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve every row of a CSV file and export the markers.
    Process {
        input: Option<PathBuf>,
        #[arg(long, default_value = ".", help = "Directory that receives markers.kml")]
        out_dir: PathBuf,
        #[arg(long, help = "Rows per batch")]
        batch_size: Option<usize>,
        #[arg(long, help = "Rows resolved at once inside a batch (1 = sequential)")]
        concurrency: Option<usize>,
        #[arg(long, help = "Extraction model identifier")]
        model: Option<String>,
        #[arg(long, default_value_t = false, help = "Also export markers.csv")]
        csv: bool,
    },
    /// Resolve one typed description and export it as a marker.
    Locate {
        description: String,
        #[arg(long, default_value = "1", help = "Identifier shown on the marker")]
        id: String,
        #[arg(long, default_value = ".", help = "Directory that receives markers.kml")]
        out_dir: PathBuf,
        #[arg(long, help = "Extraction model identifier")]
        model: Option<String>,
    },
    /// Summarise an exported KML file.
    Inspect { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            out_dir,
            batch_size,
            concurrency,
            model,
            csv,
        } => {
            let input = match require_input(input.as_deref()) {
                Ok(path) => path.to_path_buf(),
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(err.exit_code());
                }
            };

            let mut config = AppConfig::from_env();
            if let Some(size) = batch_size {
                config.batch_size = size.max(1);
            }
            if let Some(limit) = concurrency {
                config.resolve_concurrency = limit.max(1);
            }
            if let Some(model) = model {
                config.extraction_model = model;
            }
            info!(
                config = ?config.public_profile(),
                policy = ?config.concurrency_policy(),
                "loaded configuration"
            );
            let session = open_session(config)?;

            let observer: ProgressObserver = Arc::new(|progress: BatchProgress| {
                if progress.processed == progress.total || progress.processed % 25 == 0 {
                    info!(
                        chunk = progress.chunk_index + 1,
                        chunks = progress.chunk_count,
                        processed = progress.processed,
                        total = progress.total,
                        failed = progress.failed,
                        "progress"
                    );
                }
            });
            let result = session
                .process_csv_with_progress(Some(input.as_path()), Some(observer))
                .await
                .with_context(|| format!("failed to process {}", input.display()))?;

            let sink = DirectoryDownloadSink::new(out_dir);
            let kml_path = session.export_kml(&sink)?;
            let csv_path = if csv {
                Some(session.export_csv(&sink)?)
            } else {
                None
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if let Some(toast) = session.notifier().current() {
                    println!("{}", toast.message);
                }
                println!("Exported {} markers to {}", result.resolved, kml_path.display());
                if let Some(path) = csv_path {
                    println!("Exported CSV to {}", path.display());
                }
            }
        }
        Commands::Locate {
            description,
            id,
            out_dir,
            model,
        } => {
            let mut config = AppConfig::from_env();
            if let Some(model) = model {
                config.extraction_model = model;
            }
            info!(config = ?config.public_profile(), "loaded configuration");
            let session = open_session(config)?;

            let point = session.resolve_one(&description, &id).await;
            let kml_path = session.export_kml(&DirectoryDownloadSink::new(out_dir))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&point)?);
            } else if let Some(point) = &point {
                println!(
                    "Marked ID {} at {:.6}, {:.6}; exported to {}",
                    point.id(),
                    point.lat(),
                    point.lng(),
                    kml_path.display()
                );
            } else if let Some(toast) = session.notifier().current() {
                println!("{}", toast.message);
            }
            if point.is_none() {
                std::process::exit(1);
            }
        }
        Commands::Inspect { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let points = parse_geo_markup(&bytes)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                println!("{} placemarks in {}", points.len(), path.display());
                for point in &points {
                    println!(
                        "{}\t{:.6}\t{:.6}\t{}",
                        point.id(),
                        point.lat(),
                        point.lng(),
                        point.description()
                    );
                }
            }
        }
    }

    Ok(())
}

fn open_session(config: AppConfig) -> Result<MapSession> {
    let resolver = LocationResolver::from_config(&config)?;
    let telemetry = TelemetryClient::new(&config.data_dir, &config)
        .context("failed to open telemetry journal")?;
    Ok(MapSession::new(
        config,
        resolver,
        Arc::new(TracingMapSink::default()),
        Some(telemetry),
    ))
}
