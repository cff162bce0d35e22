//! HTTP front for owc-proxy.
//!
//! Every path is handled by one fallback handler that forwards to the
//! configured Open Web Calendar upstream. See `owc-core` for the logic.

pub mod routes;
pub mod state;
pub mod upstream;

use axum::{
    Router,
    http::{HeaderValue, header},
};
use tower_http::set_header::SetResponseHeaderLayer;

pub use state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .fallback(routes::proxy::handle)
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
}
