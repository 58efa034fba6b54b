pub mod breaker;
pub mod catalog;
pub mod proxy;
pub mod rate_limit;
pub mod route;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker};
pub use catalog::RouteCatalog;
pub use proxy::ProxyEngine;
pub use rate_limit::{MemoryRateLimiter, RateLimiter};
pub use route::Route;
