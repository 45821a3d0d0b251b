use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use snapcull::analysis::{find_photo_series, find_similar_groups, SortMethod};
use snapcull::clip::ClipEmbedder;
use snapcull::config::Config;
use snapcull::db::Database;
use snapcull::embedding::{EmbeddingProcessor, LocalFileSource, ProcessorConfig, ProcessorEvent};
use snapcull::logging;
use snapcull::review::ReviewSession;
use snapcull::scanner::Scanner;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Scan { dir: PathBuf, prune: bool },
    Embed,
    Similar {
        threshold: Option<f32>,
        gap_hours: Option<f64>,
        sort: Option<SortMethod>,
        json: bool,
    },
    Series {
        min_size: Option<usize>,
        max_gap_minutes: Option<f64>,
        min_density: Option<f64>,
        json: bool,
    },
    Status,
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T> {
    let Some(raw) = value else {
        bail!("{flag} requires a value");
    };
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {flag}: {raw}"))
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config_path = None;
    let mut positional: Vec<String> = Vec::new();
    let mut threshold = None;
    let mut gap_hours = None;
    let mut sort = None;
    let mut min_size = None;
    let mut max_gap_minutes = None;
    let mut min_density = None;
    let mut json = false;
    let mut prune = false;

    let mut i = 0;
    while i < args.len() {
        let next = args.get(i + 1);
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("snapcull {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(parse_value::<String>("--config", next)?));
                i += 1;
            }
            "--threshold" => {
                threshold = Some(parse_value("--threshold", next)?);
                i += 1;
            }
            "--gap-hours" => {
                gap_hours = Some(parse_value("--gap-hours", next)?);
                i += 1;
            }
            "--sort" => {
                sort = Some(parse_value("--sort", next)?);
                i += 1;
            }
            "--min-size" => {
                min_size = Some(parse_value("--min-size", next)?);
                i += 1;
            }
            "--max-gap-minutes" => {
                max_gap_minutes = Some(parse_value("--max-gap-minutes", next)?);
                i += 1;
            }
            "--min-density" => {
                min_density = Some(parse_value("--min-density", next)?);
                i += 1;
            }
            "--json" => json = true,
            "--prune" => prune = true,
            flag if flag.starts_with('-') => bail!("Unknown argument: {flag}"),
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("scan") => Command::Scan {
            dir: PathBuf::from(positional.next().context("scan requires a directory")?),
            prune,
        },
        Some("embed") => Command::Embed,
        Some("similar") => Command::Similar {
            threshold,
            gap_hours,
            sort,
            json,
        },
        Some("series") => Command::Series {
            min_size,
            max_gap_minutes,
            min_density,
            json,
        },
        Some("status") => Command::Status,
        Some("get") => Command::Get {
            key: positional.next().context("get requires a key")?,
        },
        Some("set") => Command::Set {
            key: positional.next().context("set requires a key")?,
            value: positional.next().context("set requires a value")?,
        },
        Some(other) => bail!("Unknown command: {other}"),
        None => bail!("No command given"),
    };

    if let Some(extra) = positional.next() {
        bail!("Unexpected argument: {extra}");
    }

    Ok(Cli {
        config_path,
        command,
    })
}

fn print_help() {
    println!(
        r#"snapcull - find near-duplicate photos and bursts

USAGE:
    snapcull [OPTIONS] <COMMAND>

COMMANDS:
    scan <DIR> [--prune]        Add images under DIR to the library
    embed                       Generate embeddings for new photos (Ctrl-C pauses)
    similar                     List groups of visually similar photos
        --threshold F           Cosine similarity a photo must exceed (default 0.93)
        --gap-hours F           Session gap in hours (default 1)
        --sort METHOD           size, date-asc or date-desc
        --json                  Print the review session as JSON
    series                      List bursts of rapid shots
        --min-size N            Minimum photos per series (default 20)
        --max-gap-minutes F     Largest gap inside a series (default 5)
        --min-density F         Minimum photos per minute (default 3)
        --json                  Print the review session as JSON
    status                      Show embedding progress
    get <KEY>                   Read a stored setting
    set <KEY> <VALUE>           Write a stored setting

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SNAPCULL_CONFIG     Path to config file (overrides default location)
    SNAPCULL_LOG        Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/snapcull/config.toml"#
    );
}

fn print_session(session: &ReviewSession, json: bool, label: &str) -> Result<()> {
    if json {
        println!("{}", session.to_json()?);
        return Ok(());
    }

    println!("{} {label}", session.groups.len());
    for (index, group) in session.groups.iter().enumerate() {
        let when = chrono::DateTime::from_timestamp_millis(group.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("\n#{} {} ({} photos)", index + 1, when, group.len());
        for photo in &group.photos {
            let mark = if group.best.as_deref() == Some(photo.file_id.as_str()) {
                "keep"
            } else if group.is_selected(&photo.file_id) {
                "drop"
            } else {
                ""
            };
            println!("  {mark:>4}  {}", photo.path);
        }
    }
    Ok(())
}

async fn run_embed(config: &Config, db: Arc<Database>) -> Result<()> {
    let factory = ClipEmbedder::factory(config.embedding.clip_options(), Arc::new(LocalFileSource));
    let processor = EmbeddingProcessor::new(db, factory, ProcessorConfig::from(&config.embedding));
    let mut events = processor.subscribe();

    if !processor.start().await? {
        println!("Nothing to embed");
        return Ok(());
    }
    let total = processor.queue_length();
    println!("Embedding {total} photos with {} workers", processor.get_state().worker_count);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ProcessorEvent::PhotoFailed { file_id, error }) => {
                    eprintln!("failed {file_id}: {error}");
                }
                Some(ProcessorEvent::Drained { processed, failed }) => {
                    println!("Done: {processed} processed, {failed} failed");
                    break;
                }
                Some(_) => {}
                None => break,
            },
            _ = tick.tick() => {
                let state = processor.get_state();
                if !state.is_processing && !state.is_paused {
                    break;
                }
                eprint!("\r{}/{} ({} failed)", state.processed, total, state.failed);
            }
            _ = &mut ctrl_c => {
                eprintln!("\nPausing, waiting for in-flight photos...");
                processor.pause();
                processor.wait_until_idle().await;
                let state = processor.get_state();
                println!(
                    "Paused: {} processed, {} still queued; run `snapcull embed` to continue",
                    state.processed, state.queue_length
                );
                break;
            }
        }
    }

    processor.terminate_workers();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(None) {
        eprintln!("Warning: logging unavailable: {e:#}");
    }

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    db.initialize()?;
    let db = Arc::new(db);
    config.apply_store_overrides(db.as_ref());

    match cli.command {
        Command::Scan { dir, prune } => {
            let scanner = Scanner::new(&config.scanner);
            let result = scanner.scan_directory(&dir, db.as_ref(), |p| {
                if p.current % 100 == 0 || p.current == p.total {
                    eprint!("\rScanning {}/{}", p.current, p.total);
                }
            })?;
            eprintln!();
            println!(
                "Found {}: {} new, {} updated, {} changed, {} failed",
                result.total_found, result.new, result.updated, result.reset, result.failed
            );
            if prune {
                let removed = scanner.prune_missing(&dir, db.as_ref())?;
                println!("Removed {removed} missing photos");
            }
        }
        Command::Embed => run_embed(&config, db).await?,
        Command::Similar {
            threshold,
            gap_hours,
            sort,
            json,
        } => {
            let analysis = &mut config.analysis;
            if let Some(threshold) = threshold {
                analysis.similarity_threshold = threshold;
            }
            if let Some(gap_hours) = gap_hours {
                analysis.session_gap_hours = gap_hours;
            }
            if let Some(sort) = sort {
                analysis.sort = sort;
            }

            let photos = db.get_all_photos_with_embedding()?;
            let groups = find_similar_groups(&photos, |_| {}, &analysis.similarity_options());
            print_session(&ReviewSession::from_similarity(groups), json, "similar groups")?;
        }
        Command::Series {
            min_size,
            max_gap_minutes,
            min_density,
            json,
        } => {
            let series_config = &mut config.series;
            if let Some(min_size) = min_size {
                series_config.min_group_size = min_size;
            }
            if let Some(max_gap) = max_gap_minutes {
                series_config.max_gap_minutes = max_gap;
            }
            if let Some(min_density) = min_density {
                series_config.min_density = min_density;
            }

            let photos = db.get_all_photos()?;
            let series = find_photo_series(&photos, &series_config.series_options(), |_| {});
            print_session(&ReviewSession::from_series(series), json, "series")?;
        }
        Command::Status => {
            let counts = db.count_by_status()?;
            println!("Photos:   {}", counts.total());
            println!("Embedded: {}", counts.done);
            println!("Pending:  {}", counts.new);
            println!("Workers:  {}", config.embedding.worker_count);
            println!("Database: {}", config.db_path.display());
        }
        Command::Get { key } => match db.get_setting(&key)? {
            Some(value) => println!("{value}"),
            None => {
                eprintln!("{key} is not set");
                std::process::exit(1);
            }
        },
        Command::Set { key, value } => {
            db.set_setting(&key, &value)?;
            tracing::info!(key = %key, value = %value, "Setting updated");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_similar() {
        let cli = parse_args(&args("-c /tmp/c.toml similar --threshold 0.9 --sort date-asc --json")).unwrap();
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(
            cli.command,
            Command::Similar {
                threshold: Some(0.9),
                gap_hours: None,
                sort: Some(SortMethod::DateAsc),
                json: true,
            }
        );
    }

    #[test]
    fn test_parse_scan_and_set() {
        let cli = parse_args(&args("scan /photos --prune")).unwrap();
        assert_eq!(
            cli.command,
            Command::Scan {
                dir: PathBuf::from("/photos"),
                prune: true
            }
        );

        let cli = parse_args(&args("set embedding.worker_count 2")).unwrap();
        assert_eq!(
            cli.command,
            Command::Set {
                key: "embedding.worker_count".into(),
                value: "2".into()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args("")).is_err());
        assert!(parse_args(&args("scan")).is_err());
        assert!(parse_args(&args("frobnicate")).is_err());
        assert!(parse_args(&args("similar --threshold")).is_err());
        assert!(parse_args(&args("similar --threshold high")).is_err());
        assert!(parse_args(&args("status extra")).is_err());
        assert!(parse_args(&args("status --bogus")).is_err());
    }
}
