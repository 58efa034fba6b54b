use async_trait::async_trait;
use thiserror::Error;

use crate::core::route::Route;

/// Errors surfaced by the route store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    /// No route is registered under the given path.
    #[error("route not found: {0}")]
    NotFound(String),

    /// A route with the same path already exists.
    #[error("route already exists: {0}")]
    Duplicate(String),

    /// The route descriptor failed validation at the store boundary.
    #[error("invalid route: {0}")]
    Invalid(String),

    /// The backing store failed (connection, query, IO).
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// RouteRepository defines the port over the authoritative route store.
///
/// The route `path` is the natural key. Implementations must persist the
/// full descriptor (including the monotonic metric counters) and treat
/// `update_metrics` as a best-effort increment.
#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Fetch every registered route descriptor.
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>>;

    /// Fetch a single route by its exact registered path.
    async fn get_route(&self, path: &str) -> RepositoryResult<Route>;

    /// Register a new route. Fails with `Duplicate` if the path is taken.
    async fn add_route(&self, route: &Route) -> RepositoryResult<()>;

    /// Replace the descriptor stored under `route.path`.
    async fn update_route(&self, route: &Route) -> RepositoryResult<()>;

    /// Remove the route registered under `path`.
    async fn delete_route(&self, path: &str) -> RepositoryResult<()>;

    /// Increment the call counter and accumulated response time for a route.
    /// `NotFound` is not fatal for callers; the counters are lossy.
    async fn update_metrics(
        &self,
        path: &str,
        call_count: i64,
        total_response_ms: i64,
    ) -> RepositoryResult<()>;

    /// Verify the store is reachable.
    async fn ping(&self) -> RepositoryResult<()>;
}
