//! streamable-rpc binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use streamable_rpc::{
    cli, logging, ApiKeyAuthorizer, CacheSessionHandler, Config, MemoryCache, Server,
    SessionBackend,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Try 'streamable-rpc --help' for more information.");
            return ExitCode::FAILURE;
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if logging::init_with_filter(config.log_filter()).is_err() {
        eprintln!("warning: logging was already initialized");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("streamable-rpc v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_address()?;
    let mut builder = Server::builder()
        .transport_config(config.to_transport_config()?)
        .session_config(config.to_session_config())
        .page_limit(config.pagination.limit);

    if config.session.backend == SessionBackend::Cache {
        builder = builder.session_handler(Arc::new(CacheSessionHandler::new(
            Arc::new(MemoryCache::new()),
            config.session.ttl_secs,
        )));
    }

    if let Some(store) = config.to_event_store() {
        builder = builder.event_store(Arc::new(store));
    }

    if config.auth.enabled {
        let authorizer = ApiKeyAuthorizer::new(config.to_auth_config());
        for key in &config.auth.api_keys {
            authorizer.add_key(key.clone());
        }
        if authorizer.count() == 0 {
            return Err("authentication is enabled but no API key is configured".into());
        }
        info!(keys = authorizer.count(), "API key authentication enabled");
        builder = builder.authorizer(Arc::new(authorizer));
    } else {
        info!("authentication disabled");
    }

    let server = builder.build();
    server.serve(addr, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
