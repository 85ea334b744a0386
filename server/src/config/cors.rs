use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const PREFLIGHT_MAX_AGE_SECS: u64 = 86400;

pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static("x-requested-with"),
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
        .max_age(Duration::from_secs(PREFLIGHT_MAX_AGE_SECS));

    match parse_origins(origins) {
        // credentials cannot be combined with a wildcard origin
        None => layer.allow_origin(AllowOrigin::any()),
        Some(list) => layer.allow_origin(list).allow_credentials(true),
    }
}

fn parse_origins(origins: &[String]) -> Option<Vec<HeaderValue>> {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "CORS: ignoring invalid origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::warn!("CORS: no valid origins configured, allowing any origin");
        None
    } else {
        tracing::info!(count = parsed.len(), "CORS: configured allowed origins");
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_origins_are_dropped() {
        let origins = vec!["http://localhost:3000".to_string(), "bad\norigin".to_string()];
        assert_eq!(parse_origins(&origins).map(|list| list.len()), Some(1));
        assert!(parse_origins(&[]).is_none());
    }

    #[test]
    fn test_layer_builds_for_empty_and_listed_origins() {
        let _any = create_cors_layer(&[]);
        let _listed = create_cors_layer(&["https://tickets.example.org".to_string()]);
    }
}
