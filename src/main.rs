use anyhow::Context;
use nlgraph::config::{AppConfig, StoreBackend};
use nlgraph::gateway::{Dataset, EmbeddedGateway, GraphGateway, RemoteGateway};
use nlgraph::graph::GraphStore;
use nlgraph::http::HttpServer;
use nlgraph::nlq::{NLQClient, NLQPipeline};
use nlgraph::SchemaDescriptor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config path: first argument, else NLGRAPH_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NLGRAPH_CONFIG").ok())
        .map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("nlgraph v{}", nlgraph::version());

    let gateway = build_gateway(&config)?;
    let model = NLQClient::new(&config.llm).context("creating language model client")?;
    info!(provider = ?model.provider(), model = %config.llm.model, "language model configured");

    let pipeline = Arc::new(NLQPipeline::new(
        Arc::new(SchemaDescriptor::default_registry()),
        gateway,
        Arc::new(model),
        config.pipeline.clone(),
    ));

    HttpServer::new(pipeline, config.server_address())
        .start()
        .await
        .context("running HTTP server")?;
    Ok(())
}

fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn GraphGateway>> {
    match config.store.backend {
        StoreBackend::Remote => {
            let timeout = Duration::from_millis(config.pipeline.exploration_timeout_ms.max(1_000) * 6);
            let gateway = RemoteGateway::new(&config.store.remote_url, timeout)
                .context("creating remote graph store client")?;
            Ok(Arc::new(gateway))
        }
        StoreBackend::Embedded => {
            let dataset = match &config.store.dataset_path {
                Some(path) => Dataset::from_file(path)
                    .with_context(|| format!("loading dataset {}", path.display()))?,
                None => {
                    warn!("no dataset configured, seeding the built-in sample");
                    Dataset::sample()
                }
            };

            let mut gateway = EmbeddedGateway::default();
            for version in &config.store.versions {
                let mut store = GraphStore::new();
                dataset
                    .load_into(&mut store)
                    .with_context(|| format!("seeding graph version {}", version))?;
                info!(
                    version = %version,
                    nodes = store.node_count(),
                    edges = store.edge_count(),
                    "graph version ready"
                );
                gateway = gateway.with_graph(version.clone(), store);
            }
            Ok(Arc::new(gateway))
        }
    }
}
