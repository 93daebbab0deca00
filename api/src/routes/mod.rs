pub mod analyze;
pub mod health;
pub mod jobs;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::CorsLayer;

use crate::AppState;

/// Multipart framing on top of the raw upload
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(analyze::routes())
        .merge(health::routes())
        .merge(jobs::routes())
}

/// Routes plus CORS, per-IP rate limiting and the upload body limit
pub fn build_app(state: Arc<AppState>) -> Result<Router, String> {
    let config = &state.config;

    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second)
        .burst_size(config.rate_limit_burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| "invalid rate limit configuration".to_string())?;

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    let origin: HeaderValue = config
        .cors_origin
        .parse()
        .map_err(|e| format!("invalid CORS_ORIGIN {:?}: {}", config.cors_origin, e))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    let body_limit = usize::try_from(config.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_OVERHEAD);

    Ok(build_routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(rate_limit_layer)
        .layer(cors)
        .with_state(state))
}
