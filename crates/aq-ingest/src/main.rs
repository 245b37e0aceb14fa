//! aq-ingest - Main entry point

use anyhow::{Context, Result};
use aq_common::logging::{init_logging, LogConfig, LogLevel};
use clap::Parser;
use sqlx::PgPool;
use std::io::Read;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use aq_ingest::{
    cli::{Cli, Commands, MarkTarget},
    config::IngestConfig,
    crawl::crawl,
    fetchlog::{postgres::KeySelector, FetchLogStore, PgFetchLogStore, MESSAGE_SUCCESS},
    handler::IngestHandler,
    ingress::IngressHandler,
    loader::{ClaimingLoader, LoaderSet, RecordSink, StagingSink},
    runner::run_periodic,
    scheduler::DrainScheduler,
    storage::{ObjectStore, S3ObjectStore},
    Category,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let defaults = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("aq-ingest")
        .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
        .build();

    // Environment variables take precedence over the defaults above.
    let log_config = match defaults.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {e:#}");
            defaults
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            None
        },
    };

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Database, object store and configuration shared by every command
struct App {
    config: IngestConfig,
    pool: PgPool,
    store: Arc<PgFetchLogStore>,
}

impl App {
    fn load_config() -> Result<IngestConfig> {
        let config = IngestConfig::from_env().context("Failed to load configuration")?;
        info!(
            timeout_secs = config.drain.timeout_secs,
            limits = ?config.drain.limits,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn with_pool(config: IngestConfig, pool: PgPool) -> Self {
        let store = Arc::new(PgFetchLogStore::with_lease(
            pool.clone(),
            Duration::from_secs(config.claim_lease_secs),
        ));
        Self { config, pool, store }
    }

    /// Connect eagerly and bring the schema up to date.
    async fn connect() -> Result<Self> {
        let config = Self::load_config()?;

        let pool = config
            .database
            .pool_options()
            .connect(&config.database.url)
            .await
            .context("Failed to connect to database")?;
        info!("Database connection pool established");

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        info!("Database migrations completed");

        Ok(Self::with_pool(config, pool))
    }

    /// Trigger handling mode: no connection or migration up front, so an
    /// unavailable database is reported by the handler instead of aborting.
    fn connect_lazy() -> Result<Self> {
        let config = Self::load_config()?;
        let pool = config
            .database
            .connect_lazy()
            .context("Invalid database URL")?;
        Ok(Self::with_pool(config, pool))
    }

    async fn objects(&self) -> Result<Arc<S3ObjectStore>> {
        let objects = S3ObjectStore::new(&self.config.storage).await?;
        Ok(Arc::new(objects))
    }

    async fn handler(&self) -> Result<IngestHandler> {
        let objects: Arc<dyn ObjectStore> = self.objects().await?;
        let store: Arc<dyn FetchLogStore> = self.store.clone();

        let sink: Arc<dyn RecordSink> = match &self.config.sql_dir {
            Some(dir) => Arc::new(StagingSink::with_scripts_from_dir(self.pool.clone(), dir)?),
            None => Arc::new(StagingSink::new(self.pool.clone())),
        };

        let loaders = Category::DRAIN_ORDER
            .into_iter()
            .fold(LoaderSet::new(), |set, category| {
                set.with(
                    category,
                    Arc::new(ClaimingLoader::new(
                        category,
                        self.config.buckets.bucket_for(category),
                        store.clone(),
                        objects.clone(),
                        sink.clone(),
                    )),
                )
            });

        Ok(IngestHandler::new(
            IngressHandler::new(store.clone(), objects),
            DrainScheduler::new(store, loaders),
            self.config.drain,
        ))
    }
}

async fn execute_command(cli: Cli) -> Result<()> {
    let app = match cli.command {
        Commands::Handle { .. } => App::connect_lazy()?,
        _ => App::connect().await?,
    };

    match cli.command {
        Commands::Handle { event } => {
            let raw = match event {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                },
            };

            let outcome = app.handler().await?.handle_raw(&raw).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        },

        Commands::Drain(args) => {
            let handler = app.handler().await?;
            let mut drain = *handler.drain_config();
            args.apply(&mut drain);

            let report = handler.scheduler().run(&drain).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },

        Commands::Run => {
            let handler = app.handler().await?;
            let every = Duration::from_secs(app.config.schedule_interval_secs);
            info!(every_secs = every.as_secs(), "Starting drain loop");

            let runs = run_periodic(handler.scheduler(), handler.drain_config(), every, shutdown_signal()).await;
            info!(runs, "Drain loop stopped");
        },

        Commands::Crawl { bucket, prefix, since } => {
            let objects = app.objects().await?;
            let report = crawl(objects.as_ref(), app.store.as_ref(), &bucket, &prefix, since).await?;
            println!("listed {} objects, registered {}", report.listed, report.registered);
        },

        Commands::Mark { target, reset, message } => {
            let MarkTarget { key, pattern } = target;
            let selector = match pattern {
                Some(pattern) => KeySelector::Pattern(pattern),
                None => KeySelector::Keys(key),
            };
            let message = message.unwrap_or_else(|| {
                if reset {
                    "reset".to_string()
                } else {
                    MESSAGE_SUCCESS.to_string()
                }
            });

            let rows = app.store.mark(&selector, &message, reset).await?;
            println!("{} {rows} fetch logs", if reset { "reset" } else { "marked" });
        },

        Commands::Errors { limit } => {
            for row in app.store.recent_errors(limit).await? {
                println!("{}", serde_json::to_string(&row)?);
            }
        },

        Commands::Logs { pattern, limit } => {
            for row in app.store.find_by_pattern(&pattern, limit).await? {
                println!("{}", serde_json::to_string(&row)?);
            }
        },

        Commands::Status => {
            for category in Category::DRAIN_ORDER {
                let pending = app.store.count_pending(category.pattern()).await?;
                println!(
                    "{:<10} {:>8} pending (limit {})",
                    category.as_str(),
                    pending,
                    app.config.drain.limits.get(category)
                );
            }
        },
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current drain");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current drain");
        },
    }
}
