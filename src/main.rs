use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use video_indexer::timecode::parse_time_query;
use video_indexer::{BatchProcessor, Config, MetadataRecord, MetadataStore, Modality, VideoIndexer};

fn cli() -> Command {
    Command::new("video-indexer")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Index what videos show and say into a searchable timeline")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to video-indexer.toml)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .value_name("FILE")
                .help("Metadata database file")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("process")
                .about("Index video files and directories")
                .arg(
                    Arg::new("inputs")
                        .value_name("PATH")
                        .help("Video files or directories to search recursively")
                        .value_parser(value_parser!(PathBuf))
                        .num_args(1..)
                        .required(true),
                )
                .arg(
                    Arg::new("workers")
                        .short('w')
                        .long("workers")
                        .value_name("NUM")
                        .help("Number of videos processed in parallel")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("reset")
                        .long("reset")
                        .help("Reset the store before processing")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("summary")
                        .long("summary")
                        .value_name("FILE")
                        .help("Write a JSON summary of the batch")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Find records whose transcription or on-screen text contains a query")
                .arg(Arg::new("query").required(true))
                .arg(
                    Arg::new("group")
                        .long("group")
                        .help("Group results by video")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print results as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("videos").about("List indexed videos"))
        .subcommand(
            Command::new("near")
                .about("Show records around a moment of a video")
                .arg(Arg::new("video").required(true))
                .arg(Arg::new("time").required(true).help("HH:MM:SS or seconds"))
                .arg(
                    Arg::new("tolerance")
                        .short('t')
                        .long("tolerance")
                        .value_name("SECONDS")
                        .default_value("1.0")
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("timestamps")
                .about("List the distinct timestamps of a video")
                .arg(Arg::new("video").required(true)),
        )
        .subcommand(
            Command::new("stats")
                .about("Show record counts for a video")
                .arg(Arg::new("video").required(true)),
        )
        .subcommand(Command::new("reset").about("Remove every record from the store"))
        .subcommand(
            Command::new("serve")
                .about("Serve the HTTP API (requires the `api` feature)")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .default_value("8080")
                        .value_parser(value_parser!(u16)),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(database) = matches.get_one::<PathBuf>("database") {
        config.storage.database_path = database.clone();
    }

    Ok(config)
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("video_indexer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("video_indexer={},warn", config.output.log_level)))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_record(record: &MetadataRecord) {
    let label = match record.modality() {
        Modality::Visual => "screen",
        Modality::Speech => "speech",
        Modality::Unknown => "record",
    };
    println!(
        "{}  [{}]  {}: {}",
        record.video_name,
        record.timestamp,
        label,
        record.text().unwrap_or_default()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    init_logging(&config, matches.get_flag("verbose"));
    config.validate()?;

    match matches.subcommand() {
        Some(("process", sub)) => process(config, sub).await,
        Some(("serve", sub)) => serve(config, sub).await,
        Some((name, sub)) => query(config, name, sub).await,
        None => Err(anyhow!("no subcommand given")),
    }
}

async fn process(mut config: Config, matches: &ArgMatches) -> Result<()> {
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.processing.max_workers = *workers;
    }
    if matches.get_flag("reset") {
        config.processing.reset_before_processing = true;
    }
    if let Some(summary) = matches.get_one::<PathBuf>("summary") {
        config.processing.summary_path = Some(summary.clone());
    }

    let inputs: Vec<PathBuf> = matches
        .get_many::<PathBuf>("inputs")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default();

    info!("🚀 Video indexer starting...");
    info!("{}", config.summary());

    let workers = config.processing.max_workers;
    let indexer = VideoIndexer::from_config(config)
        .await
        .context("failed to initialize the indexing pipeline")?;
    let processor = BatchProcessor::new(indexer, workers);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, finishing the current units...");
            on_interrupt.cancel();
        }
    });

    let results = processor.process_paths_with_cancel(&inputs, &cancel).await?;

    info!("🎉 Processing completed in {:.2}s", results.total_time.as_secs_f64());
    info!("✅ Successful: {}", results.successful);
    info!("❌ Failed: {}", results.failed);
    info!("📊 Records written: {}", results.total_records);

    for result in &results.results {
        println!(
            "{:<40} {:?}  {} visual, {} speech{}",
            result.video_name,
            result.status,
            result.visual.records_written,
            result.speech.records_written,
            result
                .error_message
                .as_deref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }

    if results.total > 0 && results.successful == 0 {
        return Err(anyhow!("no video was indexed"));
    }
    Ok(())
}

#[cfg(feature = "api")]
async fn serve(config: Config, matches: &ArgMatches) -> Result<()> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let indexer = VideoIndexer::from_config(config)
        .await
        .context("failed to initialize the indexing pipeline")?;
    video_indexer::api::ApiServer::new(indexer, port).start().await
}

#[cfg(not(feature = "api"))]
async fn serve(_config: Config, _matches: &ArgMatches) -> Result<()> {
    Err(anyhow!("this build has no HTTP API; rebuild with `--features api`"))
}

async fn query(config: Config, command: &str, matches: &ArgMatches) -> Result<()> {
    let store = MetadataStore::open(&config.storage).await?;
    let video = || {
        matches
            .get_one::<String>("video")
            .cloned()
            .ok_or_else(|| anyhow!("missing video name"))
    };

    match command {
        "search" => {
            let query = matches
                .get_one::<String>("query")
                .ok_or_else(|| anyhow!("missing query"))?;
            let records = store.search(query).await.unwrap_or_else(|e| {
                error!("Search for '{}' failed: {}", query, e);
                Vec::new()
            });

            if matches.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No results for '{}'", query);
            } else if matches.get_flag("group") {
                let mut grouped: BTreeMap<&str, Vec<&MetadataRecord>> = BTreeMap::new();
                for record in &records {
                    grouped.entry(record.video_name.as_str()).or_default().push(record);
                }
                for (video_name, records) in grouped {
                    println!("== {} ({} matches)", video_name, records.len());
                    records.into_iter().for_each(print_record);
                }
            } else {
                records.iter().for_each(print_record);
            }
        }
        "videos" => {
            for name in store.list_videos().await? {
                println!("{}", name);
            }
        }
        "near" => {
            let video = video()?;
            let time = matches
                .get_one::<String>("time")
                .ok_or_else(|| anyhow!("missing time"))?;
            let tolerance = matches.get_one::<f64>("tolerance").copied().unwrap_or(1.0);
            let seconds = parse_time_query(time)?;

            let records = store.records_near(&video, seconds, tolerance).await?;
            if records.is_empty() {
                println!("Nothing recorded within {}s of {}", tolerance, time);
            }
            records.iter().for_each(print_record);
        }
        "timestamps" => {
            let video = video()?;
            for seconds in store.timestamps(&video).await? {
                println!("{}", video_indexer::timecode::format_whole_seconds(seconds));
            }
        }
        "stats" => {
            let video = video()?;
            let stats = store.stats(&video).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "reset" => {
            store.reset().await?;
            info!("🧹 Store reset: {}", config.storage.database_path.display());
        }
        other => return Err(anyhow!("unknown command: {}", other)),
    }

    store.close().await;
    Ok(())
}
