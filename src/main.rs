use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use target_scout::core::config;
use target_scout::{AppState, ScanRequest, ScanResult, Scanner};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["TARGET_SCOUT_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

/// `--url <u>` / `--url=<u>` runs one scan and prints the result as JSON.
fn parse_url_from_args() -> Option<String> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--url" {
            if let Some(v) = args.next() {
                return Some(v);
            }
        } else if let Some(rest) = a.strip_prefix("--url=") {
            return Some(rest.to_string());
        }
    }
    None
}

async fn health() -> &'static str {
    "ok"
}

async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> Json<ScanResult> {
    Json(state.scanner.scan(&req.url).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let timings = config::load_scout_config().scan.resolve();
    let scanner = Scanner::new(timings);

    // One-shot mode: scan a single URL, print the result, exit.
    if let Some(url) = parse_url_from_args() {
        let result = scanner.scan(&url).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("Starting target-scout");

    let state = AppState::new(scanner);
    let app = Router::new()
        .route("/health", get(health))
        .route("/scan", post(scan_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port = parse_port_from_args().or_else(port_from_env).unwrap_or(3400);
    let addr = format!("0.0.0.0:{port}");
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
