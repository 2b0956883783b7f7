//! photopost - folders of photos in, static photo posts out.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photopost::{
    config::{Cli, Command, ServeConfig, SweepConfig},
    derivative::{DerivativeCache, ImageResizer},
    server::{create_router, AppState, RouterConfig},
    site::{CommandBuilder, FolderScanner, JsonMetadataStore, MetadataStore, RebuildCoalescer},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sweep(config) => run_sweep(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    if !config.watch_dir.is_dir() {
        error!(
            "Watch directory {} does not exist",
            config.watch_dir.display()
        );
        return ExitCode::FAILURE;
    }

    info!("photopost v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Watch dir: {}", config.watch_dir.display());
    info!("  Cache dir: {}", config.cache_dir.display());
    info!("  Metadata: {}", config.metadata.display());
    info!(
        "  Cache: ttl {}s, {} concurrent resizes",
        config.cache_ttl, config.max_resizes
    );
    match (&config.builder, &config.site_dir) {
        (Some(builder), Some(site)) => {
            info!("  Builder: {} -> {}", builder.display(), site.display())
        }
        _ => warn!("  Builder: not configured, rebuilds disabled"),
    }

    // Folder metadata
    let store = match JsonMetadataStore::open(&config.watch_dir, &config.metadata).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open metadata store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let scanner = FolderScanner::new(&config.watch_dir, &config.media_extensions());
    let report = match scanner.scan(&*store).await {
        Ok(report) => report,
        Err(e) => {
            error!("Folder scan failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Site rebuilds
    let rebuild = build_coalescer(&config);
    if let Some(ref rebuild) = rebuild {
        if report.changed() {
            let rebuild = rebuild.clone();
            tokio::spawn(async move {
                let outcome = rebuild.trigger().await;
                info!(?outcome, "Startup rebuild finished");
            });
        }
    }

    // Derivative cache
    let cache = match DerivativeCache::open(config.cache_config(), ImageResizer::new()).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to open derivative cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = cache.spawn_maintenance(shutdown_rx);

    let store: Arc<dyn MetadataStore> = store;
    let mut state = AppState::new(cache, store);
    if let Some(rebuild) = rebuild {
        state = state.with_rebuild(rebuild).with_scanner(scanner);
    }

    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/images/<folder_id>/<file>?w=800", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop maintenance; it writes a final snapshot on the way out.
    let _ = shutdown_tx.send(true);
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Cache maintenance task failed");
    }

    if let Err(e) = served {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Shut down cleanly");
    ExitCode::SUCCESS
}

/// Build the rebuild coalescer if a site builder is configured.
fn build_coalescer(config: &ServeConfig) -> Option<RebuildCoalescer> {
    let program = config.builder.as_ref()?;
    let destination = config.site_dir.as_ref()?;

    let builder = CommandBuilder::new(program, config.site_source(), destination)
        .with_timeout(Duration::from_secs(config.build_timeout));

    Some(
        RebuildCoalescer::new(builder)
            .with_settle_delay(Duration::from_secs(config.settle_delay)),
    )
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_retry_after(config.retry_after)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    if let Some(ref site) = config.site_dir {
        router_config = router_config.with_site_dir(site);
    }

    router_config
}

/// Resolve when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// =============================================================================
// Sweep Command
// =============================================================================

async fn run_sweep(config: SweepConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = match DerivativeCache::open(config.cache_config(), ImageResizer::new()).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to open derivative cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = cache.sweep().await;
    info!(
        expired = report.expired,
        orphans = report.orphans,
        errors = report.errors,
        "Sweep complete"
    );

    match cache.save_snapshot().await {
        Ok(count) => info!(entries = count, "Cache snapshot written"),
        Err(e) => {
            error!("Failed to write cache snapshot: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Logging
// =============================================================================

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "photopost=debug,tower_http=debug"
    } else {
        "photopost=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
