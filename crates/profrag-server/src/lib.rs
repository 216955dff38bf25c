use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::header::{CONTENT_TYPE, HeaderName, HeaderValue},
    http::{Method, Request},
    middleware,
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use clap::Parser;
use dotenvy::dotenv;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use profrag_core::ReviewPipeline;

pub mod config;
pub mod error;
pub mod handlers;

use config::{build_pipeline, UpstreamArgs, UpstreamConfig};
use error::ApiError;
use handlers::{chat, health};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_millis(200);
const BODY_LIMIT_BYTES: usize = 256 * 1024;
const DEFAULT_LOG_FILTER: &str = "profrag_server=info,profrag_core=info,tower_http=info";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "profrag-server",
    about = "Streams professor recommendations grounded in indexed student reviews"
)]
struct Cli {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Server port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Comma separated list of allowed CORS origins
    #[arg(long, env = "CORS_ORIGINS", default_value = "http://localhost:3000")]
    cors_origins: String,

    #[command(flatten)]
    upstream: UpstreamArgs,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    fn from_cli(cli: Cli) -> Result<Self, ApiError> {
        let cors_origins = cli
            .cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>();

        let upstream = UpstreamConfig::from_args(cli.upstream)?;

        Ok(Self {
            host: cli.host,
            port: cli.port,
            cors_origins,
            upstream,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: ReviewPipeline,
    pub config: AppConfig,
    pub readiness: Arc<AtomicBool>,
}

pub type SharedState = Arc<AppState>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

async fn attach_request_id_context(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    error::with_request_id(request_id, next.run(req)).await
}

pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let trace_header = request_id_header.clone();

    let trace = TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(&trace_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    let api_routes = Router::new().route("/chat", post(chat::chat));

    Router::new()
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .nest("/api", api_routes)
        .layer(middleware::from_fn(attach_request_id_context))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid,
        ))
        .layer(cors)
        .with_state(state)
}

/// State around an already-built pipeline, for driving the router in tests
pub fn test_state(pipeline: ReviewPipeline) -> SharedState {
    let upstream = UpstreamConfig {
        hf_token: "hf_test".into(),
        inference_url: "http://localhost:0".into(),
        chat_url: "http://localhost:0".into(),
        embedding_model: "test-embedding".into(),
        chat_model: "test-chat".into(),
        index: config::IndexConfig::Qdrant {
            url: "http://localhost:6334".into(),
            api_key: None,
            collection: "professor_reviews".into(),
            namespace: "professor-reviews".into(),
        },
        settings: pipeline.settings().clone(),
        timeout: Duration::from_secs(1),
    };

    Arc::new(AppState {
        pipeline,
        config: AppConfig {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            cors_origins: vec!["http://localhost:3000".into()],
            upstream,
        },
        readiness: Arc::new(AtomicBool::new(true)),
    })
}

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> Result<(), ApiError> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli)?;

    let pipeline = build_pipeline(&config.upstream)
        .await
        .map_err(|err| ApiError::Internal(format!("failed to set up vector index: {err}")))?;

    let state = Arc::new(AppState {
        pipeline,
        config: config.clone(),
        readiness: Arc::new(AtomicBool::new(true)),
    });

    let addr = SocketAddr::new(config.host, config.port);
    let app = create_router(state.clone());

    info!(%addr, "profrag-server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    info!("profrag-server stopped");
    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested, draining");
    state.readiness.store(false, Ordering::SeqCst);

    // Let load balancers see /readyz fail before new connections stop
    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use profrag_core::testing::{
        sample_matches, RecordingEmbedder, RecordingGenerator, RecordingIndex,
    };
    use profrag_core::PipelineSettings;
    use tower::ServiceExt;

    pub(crate) fn fake_state() -> SharedState {
        test_state(ReviewPipeline::new(
            Arc::new(RecordingEmbedder::new(vec![0.1; 4])),
            Arc::new(RecordingIndex::new(sample_matches())),
            Arc::new(RecordingGenerator::new(vec!["ok"])),
            PipelineSettings::default(),
        ))
    }

    #[tokio::test]
    async fn sets_request_id_when_missing() {
        let app = create_router(fake_state());

        let response = app
            .oneshot(Request::builder().uri("/livez").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn propagates_caller_request_id() {
        let app = create_router(fake_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/livez")
                    .header(REQUEST_ID_HEADER, "caller-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "caller-42");
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let cli = Cli::parse_from([
            "profrag-server",
            "--hf-token",
            "hf_test",
            "--vector-backend",
            "qdrant",
            "--cors-origins",
            "http://localhost:3000, https://rate.example.edu ,",
        ]);

        let config = AppConfig::from_cli(cli).unwrap();

        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "https://rate.example.edu"]
        );
        assert_eq!(config.port, 3000);
    }
}
