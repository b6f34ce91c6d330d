use anyhow::{Context, Result};
use futures::future;
use sensor_pipeline::alerts::{AlertConsumer, LogAlertSink, MqttAlertPublisher};
use sensor_pipeline::cache::RedisSnapshotCache;
use sensor_pipeline::config::Config;
use sensor_pipeline::generator::run_generator;
use sensor_pipeline::http::{router, HttpState};
use sensor_pipeline::mqtt::{run_consumer, subscription_filter, MqttPublisher};
use sensor_pipeline::pipeline::{IngestPipeline, IngestStats, MessageHandler};
use sensor_pipeline::read_service::ReadService;
use sensor_pipeline::startup::connect_with_retry;
use sensor_pipeline::store::{build_pool, PgReadingStore};
use std::sync::Arc;
use tokio::task::JoinHandle;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_pipeline=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "sensor-pipeline"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

fn spawn_consumer(
    config: &Config,
    client_id: String,
    filter: String,
    handler: Arc<dyn MessageHandler>,
) -> JoinHandle<()> {
    let config = config.clone();
    tokio::spawn(async move {
        if let Err(err) = run_consumer(config, client_id.clone(), filter, handler).await {
            tracing::error!(error=%err, client_id=%client_id, "consumer exited");
        }
    })
}

async fn wait_any(handles: &mut [JoinHandle<()>]) {
    if handles.is_empty() {
        future::pending::<()>().await;
        return;
    }
    let (result, index, _) = future::select_all(handles.iter_mut()).await;
    if let Err(err) = result {
        tracing::error!(error=%err, task = index, "role task failed");
    } else {
        tracing::warn!(task = index, "role task exited");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let retry_delay = config.connect_retry_delay();
    let pool = connect_with_retry("postgres", config.connect_attempts, retry_delay, || {
        build_pool(&config.database_url, config.db_pool_size, config.db_timeout())
    })
    .await?;
    let store = PgReadingStore::new(pool, config.db_timeout());
    store
        .ensure_schema()
        .await
        .context("failed to prepare sensor_data table")?;
    let store = Arc::new(store);

    let cache = connect_with_retry("redis", config.connect_attempts, retry_delay, || {
        RedisSnapshotCache::connect(&config.redis_url, config.cache_timeout())
    })
    .await?;
    let cache = Arc::new(cache);

    let stats = Arc::new(IngestStats::new());
    let (publisher, publisher_handle) =
        MqttPublisher::new(&config, &format!("{}-publisher", config.mqtt_client_id));

    let mut roles: Vec<JoinHandle<()>> = Vec::new();

    if config.enable_ingest {
        let pipeline: Arc<dyn MessageHandler> = Arc::new(IngestPipeline::new(
            store.clone(),
            cache.clone(),
            Arc::new(MqttAlertPublisher::new(
                publisher.clone(),
                config.alerts_topic.clone(),
            )),
            config.thresholds,
            config.cache_ttl(),
            stats.clone(),
        ));
        let filter = subscription_filter(&config.readings_topic, config.mqtt_share_group.as_deref());
        for worker in 0..config.ingest_workers {
            roles.push(spawn_consumer(
                &config,
                config.ingest_client_id(worker),
                filter.clone(),
                pipeline.clone(),
            ));
        }
        tracing::info!(workers = config.ingest_workers, topic = %filter, "ingest enabled");
    }

    if config.enable_notifier {
        let consumer: Arc<dyn MessageHandler> =
            Arc::new(AlertConsumer::new(Arc::new(LogAlertSink), stats.clone()));
        roles.push(spawn_consumer(
            &config,
            format!("{}-notifier", config.mqtt_client_id),
            config.alerts_topic.clone(),
            consumer,
        ));
        tracing::info!(topic = %config.alerts_topic, "notifier enabled");
    }

    if config.enable_http {
        let reads = ReadService::new(store.clone(), cache.clone(), config.cache_ttl());
        let app = router(HttpState { reads });
        let listener = tokio::net::TcpListener::bind(&config.http_bind)
            .await
            .with_context(|| format!("failed to bind {}", config.http_bind))?;
        tracing::info!(bind = %config.http_bind, "http api listening");
        roles.push(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error=%err, "http server exited");
            }
        }));
    }

    if config.enable_generator {
        let generator_publisher = publisher.clone();
        let topic = config.readings_topic.clone();
        let interval = config.generator_interval();
        roles.push(tokio::spawn(async move {
            run_generator(generator_publisher, topic, interval).await
        }));
        tracing::info!(topic = %config.readings_topic, "sensor generator enabled");
    }

    let stats_handle = {
        let stats = stats.clone();
        let interval = config.stats_log_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                stats.log_summary();
            }
        })
    };

    tokio::select! {
        _ = wait_any(&mut roles) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Consumers go first so no handler is mid-publish when the publisher stops.
    // A reading is only acknowledged after its alert's PUBACK.
    for role in &roles {
        role.abort();
    }
    stats_handle.abort();
    publisher_handle.abort();
    stats.log_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::normalize_otlp_http_endpoint;

    #[test]
    fn appends_trace_path_to_otlp_endpoint() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }
}
