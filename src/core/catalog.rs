//! The route catalogue: authoritative queries over the route store with a
//! read-through cache in front.
//!
//! Reads prefer the cache and fall back to the store; cache failures on the
//! read path are logged and ignored so a degraded cache never takes the
//! gateway down. Mutations go to the store first and invalidate the affected
//! cache keys only after the store commit.

use std::{sync::Arc, time::Duration};

use crate::{
    core::route::{MatchKind, Route, match_route_path},
    ports::{
        cache::{Cache, CacheError, get_json, set_json},
        repository::{RepositoryError, RepositoryResult, RouteRepository},
    },
};

/// Cache key holding the full route list.
const ROUTES_KEY: &str = "routes";

/// Default time-to-live for catalogue cache entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

fn route_key(path: &str) -> String {
    format!("route:{path}")
}

/// Read-through catalogue over the route store. Cheap to clone via `Arc`s.
pub struct RouteCatalog {
    repo: Arc<dyn RouteRepository>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
}

impl RouteCatalog {
    pub fn new(repo: Arc<dyn RouteRepository>, cache: Arc<dyn Cache>, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache,
            cache_ttl,
        }
    }

    /// All registered routes, served from cache when possible.
    pub async fn get_routes(&self) -> RepositoryResult<Vec<Route>> {
        match get_json::<Vec<Route>>(self.cache.as_ref(), ROUTES_KEY).await {
            Ok(Some(routes)) => return Ok(routes),
            Ok(None) => {}
            Err(err @ CacheError::Decode { .. }) => {
                tracing::warn!(error = %err, "dropping undecodable route list from cache");
                self.invalidate(ROUTES_KEY).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cache read failed, falling through to store");
            }
        }

        let routes = self.repo.get_routes().await?;

        if let Err(err) = set_json(self.cache.as_ref(), ROUTES_KEY, &routes, self.cache_ttl).await {
            tracing::warn!(error = %err, "failed to cache route list");
        }

        Ok(routes)
    }

    /// Resolve the route serving `path`.
    ///
    /// Tries `route:<path>` in the cache first, then walks every stored
    /// route applying the pattern rules. When several patterns match, the
    /// winner is the best-ranked one (exact > placeholder > wildcard); ties
    /// within a rank go to the lexicographically smallest pattern so that
    /// concurrent callers always resolve the same route.
    pub async fn get_route_by_path(&self, path: &str) -> RepositoryResult<Route> {
        let key = route_key(path);

        match get_json::<Route>(self.cache.as_ref(), &key).await {
            Ok(Some(route)) => return Ok(route),
            Ok(None) => {}
            Err(err @ CacheError::Decode { .. }) => {
                tracing::warn!(error = %err, path, "dropping undecodable route from cache");
                self.invalidate(&key).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, path, "cache read failed, falling through to store");
            }
        }

        let routes = self.repo.get_routes().await?;

        let mut winner: Option<(MatchKind, &Route)> = None;
        for route in &routes {
            if let Some(kind) = match_route_path(&route.path, path) {
                let better = match &winner {
                    None => true,
                    Some((best_kind, best_route)) => {
                        kind < *best_kind || (kind == *best_kind && route.path < best_route.path)
                    }
                };
                if better {
                    winner = Some((kind, route));
                }
            }
        }

        match winner {
            Some((kind, route)) => {
                tracing::debug!(
                    pattern = %route.path,
                    path,
                    match_kind = ?kind,
                    service_url = %route.service_url,
                    "route resolved"
                );
                if let Err(err) =
                    set_json(self.cache.as_ref(), &key, route, self.cache_ttl).await
                {
                    tracing::warn!(error = %err, path, "failed to cache resolved route");
                }
                Ok(route.clone())
            }
            None => Err(RepositoryError::NotFound(path.to_string())),
        }
    }

    /// Register a new route. Validates the descriptor, writes to the store
    /// and invalidates the cached route list.
    pub async fn add_route(&self, route: &Route) -> RepositoryResult<()> {
        route
            .validate()
            .map_err(|e| RepositoryError::Invalid(e.to_string()))?;

        self.repo.add_route(route).await?;
        self.invalidate(ROUTES_KEY).await;
        Ok(())
    }

    /// Update an existing route and invalidate both its entry and the list.
    pub async fn update_route(&self, route: &Route) -> RepositoryResult<()> {
        route
            .validate()
            .map_err(|e| RepositoryError::Invalid(e.to_string()))?;

        self.repo.update_route(route).await?;
        self.invalidate(&route_key(&route.path)).await;
        self.invalidate(ROUTES_KEY).await;
        Ok(())
    }

    /// Delete a route and invalidate both its entry and the list.
    pub async fn delete_route(&self, path: &str) -> RepositoryResult<()> {
        self.repo.delete_route(path).await?;
        self.invalidate(&route_key(path)).await;
        self.invalidate(ROUTES_KEY).await;
        Ok(())
    }

    /// Best-effort counter increment for a proxied request.
    pub async fn update_metrics(
        &self,
        path: &str,
        call_count: i64,
        total_response_ms: i64,
    ) -> RepositoryResult<()> {
        self.repo
            .update_metrics(path, call_count, total_response_ms)
            .await
    }

    /// Whether `method` is allowed for the route resolving `path`.
    pub async fn is_method_allowed(&self, path: &str, method: &str) -> RepositoryResult<bool> {
        let route = self.get_route_by_path(path).await?;
        Ok(route.is_method_allowed(method))
    }

    /// Drop the cached route list and every cached per-path entry.
    /// Idempotent: clearing an already-empty cache succeeds.
    pub async fn clear_cache(&self) -> RepositoryResult<()> {
        self.invalidate(ROUTES_KEY).await;

        let routes = self.repo.get_routes().await?;
        for route in &routes {
            self.invalidate(&route_key(&route.path)).await;
        }

        tracing::info!(count = routes.len(), "route cache cleared");
        Ok(())
    }

    async fn invalidate(&self, key: &str) {
        if let Err(err) = self.cache.delete(key).await {
            tracing::warn!(error = %err, key, "cache invalidation failed");
        }
    }
}
