//! Postgres-backed route repository.
//!
//! Method and header lists are stored as JSONB columns; the route `path` is
//! the primary key. All queries are runtime-checked so the crate builds
//! without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::PgPoolOptions,
    types::Json,
};

use crate::{
    core::route::Route,
    ports::repository::{RepositoryError, RepositoryResult, RouteRepository},
};

#[derive(sqlx::FromRow)]
struct RouteRow {
    path: String,
    service_url: String,
    methods: Json<Vec<String>>,
    headers: Json<Vec<String>>,
    required_headers: Json<Vec<String>>,
    description: String,
    is_active: bool,
    call_count: i64,
    total_response_ms: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RouteRow> for Route {
    fn from(row: RouteRow) -> Self {
        Route {
            path: row.path,
            service_url: row.service_url,
            methods: row.methods.0,
            headers: row.headers.0,
            required_headers: row.required_headers.0,
            description: row.description,
            is_active: row.is_active,
            call_count: row.call_count,
            total_response_ms: row.total_response_ms,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = "path, service_url, methods, headers, required_headers, \
     description, is_active, call_count, total_response_ms, created_at, updated_at";

pub struct PostgresRouteRepository {
    pool: PgPool,
}

impl PostgresRouteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a bounded pool and verify the connection.
    pub async fn connect(dsn: &str, max_connections: u32) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        tracing::info!(max_connections, "connected to route store");
        Ok(Self { pool })
    }

    fn map_error(path: &str, err: sqlx::Error) -> RepositoryError {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(path.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Duplicate(path.to_string())
            }
            _ => RepositoryError::Storage(err.to_string()),
        }
    }
}

#[async_trait]
impl RouteRepository for PostgresRouteRepository {
    async fn get_routes(&self) -> RepositoryResult<Vec<Route>> {
        let rows: Vec<RouteRow> =
            sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM routes"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Route::from).collect())
    }

    async fn get_route(&self, path: &str) -> RepositoryResult<Route> {
        let row: Option<RouteRow> =
            sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM routes WHERE path = $1"))
                .bind(path)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Self::map_error(path, e))?;

        row.map(Route::from)
            .ok_or_else(|| RepositoryError::NotFound(path.to_string()))
    }

    async fn add_route(&self, route: &Route) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO routes \
             (path, service_url, methods, headers, required_headers, description, \
              is_active, call_count, total_response_ms, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, now(), now())",
        )
        .bind(&route.path)
        .bind(&route.service_url)
        .bind(Json(&route.methods))
        .bind(Json(&route.headers))
        .bind(Json(&route.required_headers))
        .bind(&route.description)
        .bind(route.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_error(&route.path, e))?;

        Ok(())
    }

    async fn update_route(&self, route: &Route) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE routes SET service_url = $2, methods = $3, headers = $4, \
             required_headers = $5, description = $6, is_active = $7, updated_at = now() \
             WHERE path = $1",
        )
        .bind(&route.path)
        .bind(&route.service_url)
        .bind(Json(&route.methods))
        .bind(Json(&route.headers))
        .bind(Json(&route.required_headers))
        .bind(&route.description)
        .bind(route.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_error(&route.path, e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(route.path.clone()));
        }
        Ok(())
    }

    async fn delete_route(&self, path: &str) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM routes WHERE path = $1")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::map_error(path, e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn update_metrics(
        &self,
        path: &str,
        call_count: i64,
        total_response_ms: i64,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE routes SET call_count = call_count + $2, \
             total_response_ms = total_response_ms + $3 WHERE path = $1",
        )
        .bind(path)
        .bind(call_count)
        .bind(total_response_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_error(path, e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> RepositoryResult<()> {
        let row = sqlx::query("SELECT 1 AS one")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let one: i32 = row
            .try_get("one")
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        debug_assert_eq!(one, 1);
        Ok(())
    }
}
