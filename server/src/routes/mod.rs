use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, Config, RateLimitLayer, SecurityHeadersLayer};
use crate::handlers::{events, health_check, queued_tickets, tickets, users};
use crate::state::AppState;

fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(events::list_events).post(events::create_event))
        .route(
            "/:id",
            get(events::get_event)
                .patch(events::update_event)
                .delete(events::delete_event),
        )
        .route("/:id/tickets", get(events::list_event_tickets))
        .route("/:id/ticket-count", get(events::count_event_tickets))
        .layer(DefaultBodyLimit::max(events::MAX_UPLOAD_BYTES))
}

fn ticket_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(tickets::list_own_tickets).post(tickets::create_ticket))
        .route("/all", get(tickets::list_all_tickets))
        .route("/user/:uid", get(tickets::list_user_tickets))
        .route("/search", post(tickets::search_ticket))
        .route("/scan", post(tickets::scan_ticket))
        .route(
            "/:id",
            get(tickets::get_ticket)
                .patch(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
}

fn queued_ticket_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(queued_tickets::list_queued_tickets).post(queued_tickets::create_queued_ticket),
        )
        .route("/:id", axum::routing::delete(queued_tickets::delete_queued_ticket))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(users::list_users))
        .route("/add", post(users::register_user))
        .route(
            "/:id",
            get(users::get_user).patch(users::update_user).delete(users::delete_user),
        )
}

/// API routes bound to their state, without middleware.
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/events", event_routes())
        .nest("/tickets", ticket_routes())
        .nest("/queuedtickets", queued_ticket_routes())
        .nest("/users", user_routes())
        .with_state(state)
}

/// The full application: routes wrapped in the HTTP middleware stack.
pub fn create_app(state: AppState, config: &Config) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(create_cors_layer(&config.cors_allowed_origins))
        .layer(SecurityHeadersLayer::for_environment(config.environment))
        .layer(
            RateLimitLayer::per_minute(config.rate_limit_per_minute)
                .trust_proxy_headers(config.trust_proxy_headers),
        )
        .layer(TimeoutLayer::new(config.request_timeout));

    create_routes(state).layer(middleware)
}
