//! hashup - Distributed file inventory
//!
//! Entry point for the CLI application.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use tracing::error;
use tracing_subscriber::EnvFilter;

use hashup::cache::{self, FileCache, DEFAULT_BUDGET_MIB};
use hashup::config::{self, Config, Overrides};
use hashup::processor::nats::{NatsProcessor, NatsProcessorOptions, TlsOptions};
use hashup::processor::Processor;
use hashup::progress::{print_scan_summary, ProgressReporter};
use hashup::scanner::{DirectoryScanner, ScanOptions};
use hashup::store::stats::{self, ProcessStats};
use hashup::store::{NatsListener, NatsListenerOptions, SqliteStorage};

/// Distributed file inventory tool
#[derive(Parser, Debug)]
#[command(
    name = "hashup",
    version,
    about = "Distributed file inventory over NATS JetStream",
    long_about = "Scans filesystems, hashes every regular file and publishes\n\
                  encrypted records onto a durable work queue. A store consumer\n\
                  drains the queue into a SQLite catalog.\n\n\
                  Run `hashup store` near the broker, then `hashup scan` on any\n\
                  number of hosts."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan files recursively and publish them to the work queue
    Scan {
        /// Directory to scan
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        /// NATS server URL
        #[arg(long, env = "HASHUP_NATS_URL", value_name = "URL")]
        nats_url: Option<String>,

        /// Key used to encrypt records in transit
        #[arg(long, env = "HASHUP_ENCRYPTION_KEY", value_name = "KEY")]
        encryption_key: Option<String>,

        /// Stream name on the broker
        #[arg(long, value_name = "NAME")]
        stream: Option<String>,

        /// Subject records are published on
        #[arg(long, value_name = "NAME")]
        subject: Option<String>,

        /// Number of concurrent hash-and-publish workers
        #[arg(long, value_name = "NUM")]
        concurrency: Option<usize>,

        /// File cache checkpoint location
        #[arg(long, value_name = "FILE")]
        cache_path: Option<PathBuf>,

        /// File with path patterns to ignore, one regex per line
        #[arg(long, value_name = "FILE")]
        ignore_file: Option<PathBuf>,

        /// Do not scan hidden files and directories
        #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
        ignore_hidden: bool,

        /// TLS client certificate
        #[arg(long, value_name = "FILE")]
        client_cert: Option<String>,

        /// TLS client key
        #[arg(long, value_name = "FILE")]
        client_key: Option<String>,

        /// TLS CA certificate
        #[arg(long, value_name = "FILE")]
        ca_cert: Option<String>,

        /// Quiet mode - suppress progress output
        #[arg(short = 'q', long)]
        quiet: bool,
    },

    /// Consume published records into the catalog
    Store {
        /// NATS server URL
        #[arg(long, env = "HASHUP_NATS_URL", value_name = "URL")]
        nats_url: Option<String>,

        /// Key used to decrypt records
        #[arg(long, env = "HASHUP_ENCRYPTION_KEY", value_name = "KEY")]
        encryption_key: Option<String>,

        /// Catalog database file
        #[arg(long, env = "HASHUP_DB_PATH", value_name = "FILE")]
        db_path: Option<PathBuf>,

        /// Seconds between stats dumps, 0 disables them
        #[arg(long, value_name = "SECS")]
        stats_interval: Option<u64>,

        /// Stream name on the broker
        #[arg(long, value_name = "NAME")]
        stream: Option<String>,

        /// Subject to consume records from
        #[arg(long, value_name = "NAME")]
        subject: Option<String>,

        /// Durable consumer name
        #[arg(long, value_name = "NAME")]
        consumer: Option<String>,

        /// TLS client certificate
        #[arg(long, value_name = "FILE")]
        client_cert: Option<String>,

        /// TLS client key
        #[arg(long, value_name = "FILE")]
        client_key: Option<String>,

        /// TLS CA certificate
        #[arg(long, value_name = "FILE")]
        ca_cert: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.debug)?;

    // Handle Ctrl+C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if shutdown_handler.load(Ordering::Relaxed) {
            eprintln!("\nForced exit!");
            std::process::exit(130);
        }
        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut cfg = Config::load(&config_path).context("Failed to load config")?;

    match cli.command {
        Command::Scan {
            path,
            nats_url,
            encryption_key,
            stream,
            subject,
            concurrency,
            cache_path,
            ignore_file,
            ignore_hidden,
            client_cert,
            client_key,
            ca_cert,
            quiet,
        } => {
            cfg.apply(&Overrides {
                nats_url,
                encryption_key,
                stream,
                subject,
                concurrency,
                cache_path,
                client_cert,
                client_key,
                ca_cert,
                ..Default::default()
            });
            cfg.validate().context("Invalid configuration")?;
            run_scan(&cfg, &path, ignore_file.as_deref(), ignore_hidden, quiet, shutdown).await
        }

        Command::Store {
            nats_url,
            encryption_key,
            db_path,
            stats_interval,
            stream,
            subject,
            consumer,
            client_cert,
            client_key,
            ca_cert,
        } => {
            cfg.apply(&Overrides {
                nats_url,
                encryption_key,
                db_path,
                stats_interval,
                stream,
                subject,
                client_cert,
                client_key,
                ca_cert,
                ..Default::default()
            });
            cfg.validate().context("Invalid configuration")?;
            run_store(&cfg, consumer.as_deref(), shutdown).await
        }
    }
}

fn tls_options(cfg: &Config) -> TlsOptions {
    TlsOptions {
        client_cert: cfg.main.client_cert.as_ref().map(PathBuf::from),
        client_key: cfg.main.client_key.as_ref().map(PathBuf::from),
        ca_cert: cfg.main.ca_cert.as_ref().map(PathBuf::from),
    }
}

async fn run_scan(
    cfg: &Config,
    path: &std::path::Path,
    ignore_file: Option<&std::path::Path>,
    ignore_hidden: bool,
    quiet: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let ignore_list = match ignore_file {
        Some(file) => config::read_ignore_list(file).context("Failed to read ignore list")?,
        None => Vec::new(),
    };

    let cache = Arc::new(FileCache::new(
        DEFAULT_BUDGET_MIB,
        cfg.scanner.cache_path.clone(),
    ));
    let saver = cache::spawn_saver(Arc::clone(&cache));

    let processor = Arc::new(
        NatsProcessor::connect(NatsProcessorOptions {
            url: cfg.main.nats_server_url.clone(),
            stream: cfg.main.nats_stream.clone(),
            subject: cfg.main.nats_subject.clone(),
            encryption_key: Some(cfg.main.encryption_key.clone()),
            tls: tls_options(cfg),
        })
        .await
        .context("Failed to create NATS processor")?,
    );

    let scanner = DirectoryScanner::new(
        path,
        ScanOptions {
            ignore_hidden,
            ignore_list,
            concurrency: cfg.scanner.scanning_concurrency,
        },
        Arc::clone(&cache),
        Arc::clone(&shutdown),
    )
    .context("Invalid scanner configuration")?;
    let counters = scanner.counters();

    if !quiet {
        eprintln!(
            "{} Scanning {} with {} workers",
            style("[scan]").cyan().bold(),
            path.display(),
            cfg.scanner.scanning_concurrency,
        );
    }

    let progress = if quiet {
        None
    } else {
        let reporter = ProgressReporter::new();
        reporter.set_status("Starting directory scan...");
        let task_reporter = reporter.clone();
        let task_counters = Arc::clone(&counters);
        let handle = tokio::spawn(async move {
            loop {
                task_reporter.update(&task_counters.snapshot());
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
        Some((reporter, handle))
    };

    let start = Instant::now();
    let dyn_processor: Arc<dyn Processor> = processor.clone();
    let result = scanner.scan(dyn_processor).await;

    saver.abort();
    if let Some((reporter, handle)) = progress {
        handle.abort();
        if shutdown.load(Ordering::Relaxed) {
            reporter.finish("Scan interrupted");
        } else {
            reporter.finish("Scan completed");
        }
    }

    if let Err(e) = processor.close().await {
        error!("failed to close processor: {e}");
    }

    let count = result.context("Scan failed")?;
    print_scan_summary(&counters.snapshot(), start.elapsed());
    tracing::debug!("scanned {count} files in {:?}", path);

    Ok(())
}

async fn run_store(
    cfg: &Config,
    consumer_name: Option<&str>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let storage =
        SqliteStorage::open(&cfg.store.db_path).context("Failed to open database")?;

    let stats = Arc::new(ProcessStats::new());
    let printers = stats::spawn_printers(
        Arc::clone(&stats),
        cfg.store.stats_interval,
        Arc::clone(&shutdown),
    );

    let mut options = NatsListenerOptions {
        url: cfg.main.nats_server_url.clone(),
        stream: cfg.main.nats_stream.clone(),
        subject: cfg.main.nats_subject.clone(),
        encryption_key: cfg.main.encryption_key.clone(),
        tls: tls_options(cfg),
        ..Default::default()
    };
    if let Some(name) = consumer_name {
        options.consumer_name = name.to_string();
    }

    eprintln!(
        "{} Listening for files on {}",
        style("[store]").cyan().bold(),
        cfg.main.nats_subject,
    );
    eprintln!(
        "{} Saving data to {}",
        style("[store]").cyan().bold(),
        cfg.store.db_path.display(),
    );
    if cfg.store.stats_interval > 0 {
        eprintln!(
            "{} Statistics will be printed every {} seconds",
            style("[store]").cyan().bold(),
            cfg.store.stats_interval,
        );
    }

    let mut listener = NatsListener::new(options, storage, Arc::clone(&stats))
        .context("Failed to create listener")?;
    let result = listener.listen(&shutdown).await;

    for printer in printers {
        printer.abort();
    }

    println!("\n\nFinal statistics:");
    stats.print_stats();

    result.context("Listener failed")?;
    Ok(())
}

fn setup_logging(debug: bool) -> Result<()> {
    let directive = if debug { "hashup=debug" } else { "hashup=warn" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(directive.parse().context("Invalid log directive")?),
        )
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
