use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

pub mod cors;
pub mod rate_limit;
pub mod security;

pub use cors::create_cors_layer;
pub use rate_limit::RateLimitLayer;
pub use security::SecurityHeadersLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn current() -> Self {
        match env::var("FRASERTICKETS_ENV").map(|v| v.to_lowercase()).as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Loads `.env.<environment>`; a missing file is not an error.
pub fn load_env() -> Environment {
    let environment = Environment::current();
    let _ = dotenvy::from_filename(format!(".env.{}", environment.as_str()));
    environment
}

/// Structured logging: JSON in production, human readable otherwise.
pub fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match environment {
        Environment::Production => builder.json().try_init(),
        Environment::Development => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub firebase_project_id: String,
    pub firebase_api_key: String,
    pub identity_toolkit_url: String,
    pub google_access_token: Option<String>,
    pub media_bucket: String,
    pub storage_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub request_timeout: Duration,
    pub rate_limit_per_minute: u32,
    /// Key rate limits on `X-Forwarded-For` / `X-Real-IP`. Only safe behind a
    /// proxy that overwrites them.
    pub trust_proxy_headers: bool,
    pub batch_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            port: 3001,
            database_url: "postgres://localhost/frasertickets".to_string(),
            database_max_connections: 5,
            firebase_project_id: String::new(),
            firebase_api_key: String::new(),
            identity_toolkit_url: "https://identitytoolkit.googleapis.com".to_string(),
            google_access_token: None,
            media_bucket: "frasertickets-media".to_string(),
            storage_url: "https://storage.googleapis.com".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            request_timeout: Duration::from_secs(60),
            rate_limit_per_minute: 120,
            trust_proxy_headers: false,
            batch_concurrency: 16,
        }
    }
}

fn string_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    match string_var(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                variable = name,
                value = %raw,
                "Ignoring unparseable configuration value"
            );
            default
        }),
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            environment: Environment::current(),
            port: parsed_var("PORT", defaults.port),
            database_url: string_var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parsed_var(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            firebase_project_id: string_var("FIREBASE_PROJECT_ID")
                .unwrap_or(defaults.firebase_project_id),
            firebase_api_key: string_var("FIREBASE_API_KEY").unwrap_or(defaults.firebase_api_key),
            identity_toolkit_url: string_var("IDENTITY_TOOLKIT_URL")
                .unwrap_or(defaults.identity_toolkit_url),
            google_access_token: string_var("GOOGLE_ACCESS_TOKEN"),
            media_bucket: string_var("GCP_MEDIA_BUCKET_NAME").unwrap_or(defaults.media_bucket),
            storage_url: string_var("STORAGE_URL").unwrap_or(defaults.storage_url),
            cors_allowed_origins: string_var("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.cors_allowed_origins),
            request_timeout: Duration::from_secs(parsed_var(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            rate_limit_per_minute: parsed_var(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            trust_proxy_headers: parsed_var("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers),
            batch_concurrency: parsed_var("BATCH_CONCURRENCY", defaults.batch_concurrency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.batch_concurrency, 16);
        assert!(!config.trust_proxy_headers);
    }

    #[test]
    fn test_unparseable_value_falls_back() {
        env::set_var("FT_TEST_NUMBER", "many");
        assert_eq!(parsed_var("FT_TEST_NUMBER", 7u32), 7);
        env::set_var("FT_TEST_NUMBER", " 9 ");
        assert_eq!(parsed_var("FT_TEST_NUMBER", 7u32), 9);
        env::remove_var("FT_TEST_NUMBER");
    }
}
