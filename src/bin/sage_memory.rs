//! Inspect and maintain Sage's tiered memory from the command line.

use anyhow::{Context, bail};
use sage::config::SageConfig;
use sage::memory::{Collaborators, MemoryStore, Role, SearchQuery};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const DEFAULT_LONG_TERM_LIMIT: usize = 20;
const DEFAULT_RECENT_LIMIT: usize = 10;

fn main() {
    let _guard = init_logging();
    if let Err(e) = run() {
        eprintln!("sage-memory failed: {e:#}");
        std::process::exit(1);
    }
}

/// stderr plus a daily rolling `sage.log`. The file layer is skipped if the
/// logs directory is unusable.
fn init_logging() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sage=info"));

    let (file_layer, guard) = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("sage.log")
        .build(sage::sage_dirs::logs_dir())
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn run() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_option(&mut args, "--config")?.map(PathBuf::from);

    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    let command = args.remove(0);
    match command.as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "context" => {
            let store = open_store(config_path)?;
            for turn in store.context() {
                println!("{}: {}", turn.role, turn.message);
            }
            Ok(())
        }
        "long-term" => {
            let limit = parse_limit(args.first(), DEFAULT_LONG_TERM_LIMIT)?;
            let store = open_store(config_path)?;
            for turn in store.long_term_context(limit) {
                println!("{}: {}", turn.role, turn.message);
            }
            Ok(())
        }
        "recent" => {
            let limit = parse_limit(args.first(), DEFAULT_RECENT_LIMIT)?;
            let store = open_store(config_path)?;
            println!("{}", store.summarize_recent(limit));
            Ok(())
        }
        "search" => {
            let role = take_option(&mut args, "--role")?
                .map(|r| r.parse::<Role>())
                .transpose()?;
            let tag = take_option(&mut args, "--tag")?;
            if args.is_empty() && role.is_none() && tag.is_none() {
                bail!("search requires a query, --role, or --tag");
            }
            let query = SearchQuery {
                text: (!args.is_empty()).then(|| args.join(" ")),
                tag,
                role,
            };
            let store = open_store(config_path)?;
            let hits = store.search(&query);
            if hits.is_empty() {
                println!("no matching entries");
            }
            for entry in hits {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.timestamp.to_rfc3339(),
                    entry.role,
                    entry.importance,
                    entry.message
                );
            }
            Ok(())
        }
        "trim" => {
            let store = open_store(config_path)?;
            let report = store.trim()?;
            println!(
                "kept {} entries (dropped {} medium, evicted {} high, summarized {} low); \
                 migrated {} to long-term ({} total)",
                report.kept,
                report.dropped_medium,
                report.evicted_high,
                report.summarized_low,
                report.migrated,
                report.long_term_len
            );
            Ok(())
        }
        "clear" => {
            let store = open_store(config_path)?;
            store.clear()?;
            println!("short-term memory cleared");
            Ok(())
        }
        other => bail!("unknown command `{other}` (see `sage-memory help`)"),
    }
}

fn open_store(config_path: Option<PathBuf>) -> anyhow::Result<MemoryStore> {
    let config = match config_path {
        Some(path) => SageConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let path = SageConfig::default_config_path();
            if path.exists() {
                SageConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?
            } else {
                SageConfig::default()
            }
        }
    };
    let collaborators = Collaborators::offline(config.memory.embedding_dim);
    Ok(MemoryStore::open(config.memory, collaborators)?)
}

/// Remove `--name value` from `args`, returning the value.
fn take_option(args: &mut Vec<String>, name: &str) -> anyhow::Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{name} requires a value");
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn parse_limit(arg: Option<&String>, default: usize) -> anyhow::Result<usize> {
    match arg {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid limit `{raw}`")),
        None => Ok(default),
    }
}

fn print_usage() {
    println!(
        "usage: sage-memory [--config <path>] <command>\n\n\
         commands:\n  \
         context                              print short-term memory\n  \
         long-term [limit]                    print the newest long-term entries (default {DEFAULT_LONG_TERM_LIMIT})\n  \
         recent [limit]                       summarize the newest entries (default {DEFAULT_RECENT_LIMIT})\n  \
         search <query> [--role R] [--tag T]  filter short-term memory\n  \
         trim                                 enforce the short-term cap now\n  \
         clear                                empty short-term memory\n  \
         help                                 show this message"
    );
}
