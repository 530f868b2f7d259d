use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

use vetter::batched_engine::BatchedEngineWrapper;
use vetter::classifier::Classifier;
use vetter::config::{BatchConfig, Config, FetchConfig};
use vetter::fetcher::RemoteFetcher;
use vetter::resnet_engine::{ResnetConfig, ResnetEngine};
use vetter::resource::ResourceHandler;
use vetter::scorer::Scorer;
use vetter::{AppState, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,vetter=debug".into());
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    tracing::info!("Starting image scoring server with config: {:?}", config);

    if config.model_id.is_none() && config.model_path.is_none() {
        anyhow::bail!("Either --model-id or --model-path must be provided");
    }

    let batch_config = BatchConfig::from(&config);

    let resnet_config = ResnetConfig {
        model_id: config.model_id.clone(),
        model_path: config.model_path.clone(),
        revision: config.model_revision.clone(),
        cpu: config.cpu_only,
    };

    tracing::info!("Loading ResNet model...");
    let resnet_engine = ResnetEngine::new(resnet_config).await?;
    tracing::info!("Model loaded successfully");

    let (engine, processor) = BatchedEngineWrapper::new(batch_config.clone(), resnet_engine);

    tokio::spawn(async move {
        tracing::info!("Starting batch processor");
        if let Err(e) = processor.run_forever().await {
            tracing::error!("Batch processor error: {}", e);
        }
    });

    let resources = ResourceHandler::new(config.file_processing_mode, &config.image_dir);
    tracing::info!(
        mode = ?resources.mode(),
        image_dir = %resources.image_dir().display(),
        "Upload storage configured"
    );

    let classifier = Classifier::new(
        Scorer::new(Arc::new(engine), config.inference_timeout()),
        RemoteFetcher::new(&FetchConfig::from(&config))?,
        resources,
    );

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = create_router(
        AppState::new(classifier, config.batch_concurrency),
        config.max_upload_bytes,
    )
    .route("/metrics", get(|| async move { metric_handle.render() }))
    .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());
    tracing::info!(
        "Inference batch size: {}, Tick duration: {:?}, Batch concurrency: {}",
        batch_config.batch_size,
        batch_config.tick_duration,
        config.batch_concurrency
    );

    axum::serve(listener, app).await?;
    Ok(())
}
