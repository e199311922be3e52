use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the application router.
///
/// The CSRF guard wraps every route: read-only requests get a token cookie
/// minted when they have none, and every mutating request must present the
/// double-submit pair. The session-protected group additionally requires a
/// live session cookie.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/csrf", get(handlers::auth::csrf_token))
        .route("/api/auth/sessions", post(handlers::auth::issue_session))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .route("/api/oauth/state", post(handlers::auth::oauth_start))
        .route(
            "/api/oauth/state/complete",
            post(handlers::auth::oauth_complete),
        )
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/logout-all", post(handlers::auth::logout_all))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(from_fn_with_state(
            state,
            middleware_layer::csrf::verify_csrf,
        ))
        .layer(CookieManagerLayer::new())
}
