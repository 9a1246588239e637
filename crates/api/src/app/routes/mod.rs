use axum::routing::MethodRouter;
use axum::Router;

pub mod jobs;
pub mod products;
pub mod system;
pub mod uploads;
pub mod webhooks;

/// Router for every `/api` endpoint.
pub fn router() -> Router {
    Router::new()
        .merge(uploads::router())
        .merge(jobs::router())
        .merge(products::router())
        .merge(webhooks::router())
}

/// Register a collection endpoint with and without the trailing slash.
pub(crate) fn collection(router: Router, path: &str, methods: MethodRouter) -> Router {
    router.route(path, methods.clone()).route(&format!("{path}/"), methods)
}
