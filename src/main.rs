use anyhow::{anyhow, Context, Result};
use moni_router::config::AppConfig;
use moni_router::distributor::Distributor;
use moni_router::identity::StaticDirectory;
use moni_router::ledger::TracingLedger;
use moni_router::router::api::{create_api_router, ApiState};
use moni_router::router::{CrossChainRouter, ExecutorSettings, TransferExecutor};
use moni_router::signing::OperatorKey;
use moni_router::transport::jsonrpc::RpcConnector;
use moni_router::transport::{NetworkRegistry, RetryPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal router error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration from environment")?;
    let registry_file = config.load_registry().context("load network registry")?;
    let builder_code = config.builder_code().context("parse builder code")?;
    let operator = Arc::new(
        OperatorKey::from_hex(&config.operator_key_hex).context("parse operator key")?,
    );

    let connector = RpcConnector::new(&config.rpc, Arc::clone(&operator))
        .context("initialize JSON-RPC connector")?;
    let registry = Arc::new(
        NetworkRegistry::new(
            registry_file.networks.clone(),
            Arc::new(connector),
            RetryPolicy::from_settings(&config.rpc),
        )
        .context("build network registry")?,
    );

    let executor = Arc::new(TransferExecutor::new(
        Arc::clone(&registry),
        builder_code,
        ExecutorSettings::from(&config.rpc),
    ));
    let router = Arc::new(CrossChainRouter::new(executor, Arc::new(TracingLedger)));
    let directory = Arc::new(StaticDirectory::from_registry(&registry_file));
    let distributor = Arc::new(Distributor::new(Arc::clone(&router), directory));

    let app = App {
        config: Arc::new(config),
        operator,
        registry,
        router,
        distributor,
    };

    app.run().await
}

struct App {
    config: Arc<AppConfig>,
    operator: Arc<OperatorKey>,
    registry: Arc<NetworkRegistry>,
    router: Arc<CrossChainRouter>,
    distributor: Arc<Distributor>,
}

impl App {
    async fn run(self) -> Result<()> {
        info!(
            operator = %self.operator.address(),
            networks = self.registry.networks().count(),
            builder_code = ?self.config.builder_code,
            "moni router online"
        );
        for network in self.registry.networks() {
            info!(
                network = %network.id,
                chain_id = network.chain_id,
                endpoints = network.endpoints.len(),
                symbol = %network.symbol,
                decimals = network.decimals,
                builder_suffix = network.builder_suffix,
                "network registered"
            );
        }

        let api_addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .with_context(|| format!("parse listen address {}", self.config.listen_addr))?;
        let api_router = create_api_router(ApiState {
            router: Arc::clone(&self.router),
            distributor: Arc::clone(&self.distributor),
        })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
        let listener = tokio::net::TcpListener::bind(&api_addr)
            .await
            .with_context(|| format!("bind API server address {api_addr}"))?;

        info!(address = %api_addr, "HTTP API server starting");
        let _api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, api_router).await {
                warn!(error = %e, "API server error");
            }
        });

        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.router.get_stats();
                    info!(
                        total_executions = stats.total_executions,
                        successful = stats.successful_executions,
                        failed = stats.failed_executions,
                        rerouted = stats.rerouted_transfers,
                        success_rate = stats.success_rate,
                        "router heartbeat"
                    );
                    for network in self.registry.networks() {
                        if self.registry.cursor(network.id.as_str()).unwrap_or_default() > 0 {
                            warn!(
                                network = %network.id,
                                endpoint = ?self.registry.current_endpoint(network.id.as_str()),
                                "network running on a fallback endpoint"
                            );
                        }
                    }
                }
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!(error = %err, "ctrl_c listener error");
                    }
                    info!("Shutdown signal received, exiting");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn init_tracing() -> Result<()> {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
