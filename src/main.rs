mod auth;
mod compute;
mod config;
mod error;
mod marketplace;
mod models;
mod quota;
mod server;

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use auth::{AzureCredential, MANAGEMENT_RESOURCE, MARKETPLACE_RESOURCE};
use compute::ComputeUsageClient;
use config::{MeteringConfig, QuotaConfig, ServerConfig};
use marketplace::MarketplaceClient;
use quota::QuotaService;
use server::ServerState;

/// How long to wait for in-flight requests after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adapter {
    Metering,
    Quota,
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args: Vec<String> = env::args().collect();

    let mut adapter: Option<Adapter> = None;
    let mut port: Option<u16> = None;
    let mut host: Option<String> = None;
    let mut debug = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "metering" => adapter = Some(Adapter::Metering),
            "quota" => adapter = Some(Adapter::Quota),
            "--port" | "-p" => {
                i += 1;
                match args.get(i).and_then(|v| v.parse::<u16>().ok()) {
                    Some(p) if p > 0 => port = Some(p),
                    _ => {
                        eprintln!("\x1b[31mInvalid port:\x1b[0m --port requires a port number (1-65535)");
                        std::process::exit(1);
                    }
                }
            }
            "--host" => {
                i += 1;
                match args.get(i) {
                    Some(h) => host = Some(h.clone()),
                    None => {
                        eprintln!("\x1b[31mMissing value:\x1b[0m --host requires a hostname or IP address");
                        std::process::exit(1);
                    }
                }
            }
            "--debug" | "-d" => debug = true,
            "-h" | "--help" | "help" => {
                print_help();
                return;
            }
            "-V" | "--version" | "version" => {
                println!("azure-adapter {}", env!("CARGO_PKG_VERSION"));
                return;
            }
            arg => {
                eprintln!("\x1b[31mUnknown argument:\x1b[0m {}", arg);
                eprintln!();
                eprintln!("Run 'azure-adapter --help' for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(adapter) = adapter else {
        eprintln!("\x1b[31mMissing command:\x1b[0m expected 'metering' or 'quota'");
        eprintln!();
        eprintln!("Run 'azure-adapter --help' for usage information.");
        std::process::exit(1);
    };

    let server_config = match ServerConfig::from_env() {
        Ok(cfg) => cfg.with_overrides(port, host, debug),
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&server_config.log_level);

    let credential = Arc::new(AzureCredential::from_environment());

    let state = match adapter {
        Adapter::Metering => {
            let metering_config = match MeteringConfig::from_env() {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!(error = %e, "Failed to load metering configuration");
                    std::process::exit(1);
                }
            };

            verify_credential(&credential, MARKETPLACE_RESOURCE).await;

            info!(
                resource_uri = %metering_config.resource_uri,
                plan_id = %metering_config.plan_id,
                "Starting marketplace metering adapter"
            );

            ServerState {
                metering: Some(MarketplaceClient::new(credential, metering_config)),
                quota: None,
                request_timeout: server_config.request_timeout,
            }
        }
        Adapter::Quota => {
            let quota_config = match QuotaConfig::from_env() {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!(error = %e, "Failed to load quota configuration");
                    std::process::exit(1);
                }
            };

            verify_credential(&credential, MANAGEMENT_RESOURCE).await;

            info!(
                location = %quota_config.location,
                machine_type = %quota_config.machine_type,
                "Starting compute quota adapter"
            );

            let usage_client =
                ComputeUsageClient::new(credential.clone(), quota_config.subscription_id.clone());

            ServerState {
                metering: None,
                quota: Some(QuotaService::new(quota_config, usage_client)),
                request_timeout: server_config.request_timeout,
            }
        }
    };

    let addr = format!("{}:{}", server_config.host, server_config.port);
    if let Err(e) = run_server_with_shutdown(&addr, Arc::new(state)).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Acquire an initial token so a broken credential setup fails at startup
/// instead of on the first request.
async fn verify_credential(credential: &AzureCredential, resource: &str) {
    if let Err(e) = credential.access_token(resource).await {
        error!(error = %e, "Failed to acquire Azure credentials");
        if let Some(suggestion) = e.suggestion() {
            error!("{}", suggestion);
        }
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("azure_adapter={},warn", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

async fn run_server_with_shutdown(addr: &str, state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal, stopping server");
                break;
            }
            // Reap finished connection tasks; disabled while the set is empty
            Some(_) = connections.join_next() => {}
            result = listener.accept() => {
                let (stream, remote_addr) = result?;
                let state = state.clone();

                connections.spawn(async move {
                    if let Err(e) = server::handle_connection(stream, remote_addr, state).await {
                        warn!(error = %e, remote = %remote_addr, "Connection error");
                    }
                });
            }
        }
    }

    drop(listener);

    // Bounded wait for in-flight requests to complete
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            in_flight = connections.len(),
            "Shutdown grace period elapsed, aborting remaining connections"
        );
        connections.abort_all();
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_help() {
    println!(
        r#"azure-adapter {version}
HTTP adapters bridging an internal platform to Azure billing/compute APIs

USAGE:  azure-adapter <COMMAND> [OPTIONS]

COMMANDS:
  metering    Serve the marketplace metering adapter
                POST /metering/usageEvent
                POST /metering/batchUsageEvent
  quota       Serve the compute quota adapter
                GET /available/gpu
  version     Show version information
  help        Show this help message

OPTIONS:
  -p, --port <PORT>    Override the PORT environment variable
      --host <HOST>    Override the HOST environment variable
  -d, --debug          Enable debug logging
  -h, --help           Show this help message
  -V, --version        Show version information

ENVIRONMENT:
  PORT, HOST, REQUEST_TIMEOUT (minutes), LOG_LEVEL
  metering: MANAGED_APP_RESOURCE_URI, MANAGED_APP_PLAN_ID
  quota:    AZURE_SUBSCRIPTION_ID, LOCATION, MACHINE_TYPE
  credentials: AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET or an
  Azure CLI session ('az login')

Both adapters also serve GET /healthz and GET /readyz."#,
        version = env!("CARGO_PKG_VERSION")
    );
}
