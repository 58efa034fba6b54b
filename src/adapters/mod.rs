pub mod auth;
pub mod cache;
pub mod health;
pub mod http_client;
pub mod rate_limit;
pub mod repository;

/// Re-export commonly used types from adapters
pub use auth::JwtValidator;
pub use cache::{MemoryCache, NoopCache, RedisCache};
pub use http_client::HttpClientAdapter;
pub use rate_limit::RedisRateLimiter;
pub use repository::{InMemoryRouteRepository, PostgresRouteRepository};
