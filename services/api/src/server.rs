use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryNotificationPublisher};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use careerlink::config::AppConfig;
use careerlink::error::AppError;
use careerlink::telemetry;
use careerlink::workflows::store::InMemoryStore;
use careerlink::workflows::Platform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(InMemoryNotificationPublisher::default());
    let platform = Arc::new(Platform::new(store, notifier, config.engine.clone()));

    let app = with_operational_routes(platform)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        organization_limit = config.engine.organization_application_limit,
        "careerlink engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
