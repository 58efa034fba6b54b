//! In-memory route repository, used for development runs without a database
//! and as the backing store in tests. Supports seeding from a JSON document
//! of route descriptors.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    core::route::Route,
    ports::repository::{RepositoryError, RepositoryResult, RouteRepository},
};

fn default_active() -> bool {
    true
}

/// The shape accepted by [`InMemoryRouteRepository::seed_from_json`]:
/// descriptor fields only, counters and timestamps are assigned on load.
#[derive(Debug, Deserialize)]
struct SeedRoute {
    path: String,
    service_url: String,
    methods: Vec<String>,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    required_headers: Vec<String>,
    #[serde(default)]
    description: String,
    #[serde(default = "default_active")]
    is_active: bool,
}

pub struct InMemoryRouteRepository {
    routes: RwLock<HashMap<String, Route>>,
}

impl InMemoryRouteRepository {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_routes(routes: Vec<Route>) -> Self {
        let map = routes.into_iter().map(|r| (r.path.clone(), r)).collect();
        Self {
            routes: RwLock::new(map),
        }
    }

    /// Load route descriptors from a JSON array, replacing nothing: seeded
    /// paths that already exist are skipped with a warning.
    pub fn seed_from_json(&self, raw: &str) -> RepositoryResult<usize> {
        let seeds: Vec<SeedRoute> =
            serde_json::from_str(raw).map_err(|e| RepositoryError::Invalid(e.to_string()))?;

        let mut map = self.routes.write().expect("route map lock poisoned");
        let mut loaded = 0;
        for seed in seeds {
            if map.contains_key(&seed.path) {
                tracing::warn!(path = %seed.path, "seed route already registered, skipping");
                continue;
            }

            let mut route = Route::new(seed.path.clone(), seed.service_url, seed.methods);
            route.headers = seed.headers;
            route.required_headers = seed.required_headers;
            route.description = seed.description;
            route.is_active = seed.is_active;

            route
                .validate()
                .map_err(|e| RepositoryError::Invalid(format!("{}: {e}", seed.path)))?;

            map.insert(route.path.clone(), route);
            loaded += 1;
        }

        tracing::info!(loaded, "seeded routes from JSON");
        Ok(loaded)
    }
}

impl Default for InMemoryRouteRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteRepository for InMemoryRouteRepository {
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>> {
        let map = self.routes.read().expect("route map lock poisoned");
        Ok(map.values().cloned().collect())
    }

    async fn get_route(&self, path: &str) -> RepositoryResult<Route> {
        let map = self.routes.read().expect("route map lock poisoned");
        map.get(path)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(path.to_string()))
    }

    async fn add_route(&self, route: &Route) -> RepositoryResult<()> {
        let mut map = self.routes.write().expect("route map lock poisoned");
        if map.contains_key(&route.path) {
            return Err(RepositoryError::Duplicate(route.path.clone()));
        }
        map.insert(route.path.clone(), route.clone());
        Ok(())
    }

    async fn update_route(&self, route: &Route) -> RepositoryResult<()> {
        let mut map = self.routes.write().expect("route map lock poisoned");
        match map.get_mut(&route.path) {
            Some(existing) => {
                let mut updated = route.clone();
                updated.created_at = existing.created_at;
                updated.updated_at = chrono::Utc::now();
                *existing = updated;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(route.path.clone())),
        }
    }

    async fn delete_route(&self, path: &str) -> RepositoryResult<()> {
        let mut map = self.routes.write().expect("route map lock poisoned");
        map.remove(path)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(path.to_string()))
    }

    async fn update_metrics(
        &self,
        path: &str,
        call_count: i64,
        total_response_ms: i64,
    ) -> RepositoryResult<()> {
        let mut map = self.routes.write().expect("route map lock poisoned");
        match map.get_mut(path) {
            Some(route) => {
                route.call_count += call_count;
                route.total_response_ms += total_response_ms;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(path.to_string())),
        }
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str) -> Route {
        Route::new(path, "http://svc:9000", vec!["GET".to_string()])
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let repo = InMemoryRouteRepository::new();
        repo.add_route(&route("/api/users")).await.unwrap();

        let loaded = repo.get_route("/api/users").await.unwrap();
        assert_eq!(loaded.service_url, "http://svc:9000");
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let repo = InMemoryRouteRepository::new();
        repo.add_route(&route("/api/users")).await.unwrap();

        let err = repo.add_route(&route("/api/users")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_update_metrics_accumulates() {
        let repo = InMemoryRouteRepository::new();
        repo.add_route(&route("/api/users")).await.unwrap();

        repo.update_metrics("/api/users", 1, 120).await.unwrap();
        repo.update_metrics("/api/users", 1, 80).await.unwrap();

        let loaded = repo.get_route("/api/users").await.unwrap();
        assert_eq!(loaded.call_count, 2);
        assert_eq!(loaded.total_response_ms, 200);
        assert_eq!(loaded.average_response_ms(), 100);
    }

    #[tokio::test]
    async fn test_update_metrics_for_unknown_path() {
        let repo = InMemoryRouteRepository::new();
        let err = repo.update_metrics("/nope", 1, 10).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_seed_from_json() {
        let repo = InMemoryRouteRepository::new();
        let loaded = repo
            .seed_from_json(
                r#"[
                    {"path": "/api/users", "service_url": "http://users:9000", "methods": ["GET"]},
                    {"path": "/api/orders", "service_url": "http://orders:9000", "methods": ["GET", "POST"], "is_active": false}
                ]"#,
            )
            .unwrap();

        assert_eq!(loaded, 2);
        let orders = repo.get_route("/api/orders").await.unwrap();
        assert!(!orders.is_active);
    }

    #[tokio::test]
    async fn test_seed_rejects_invalid_service_url() {
        let repo = InMemoryRouteRepository::new();
        let result = repo.seed_from_json(
            r#"[{"path": "/x", "service_url": "not a url", "methods": ["GET"]}]"#,
        );
        assert!(matches!(result, Err(RepositoryError::Invalid(_))));
    }
}
