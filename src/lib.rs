//! Gantry - a store-backed HTTP/HTTPS API gateway and reverse proxy.
//!
//! Gantry accepts client requests on a public edge, matches each one against
//! a dynamic catalogue of routes persisted in a relational store, applies a
//! fixed pipeline of cross-cutting policies (authentication, rate limiting,
//! header validation, security headers, observability), and forwards the
//! request to its upstream service, streaming the response back.
//!
//! # Features
//! - Dynamic route catalogue with read-through caching (in-process, Redis
//!   or disabled) and exact / placeholder / wildcard pattern matching
//! - Per-upstream circuit breakers (closed / open / half-open)
//! - Windowed rate limiting per client IP, per route and per user, backed
//!   by Redis with an in-process fallback
//! - Bearer-token authentication with role gating
//! - Resilient reverse proxying: per-request deadlines, typed error
//!   classification, streaming bodies, no retries
//! - Liveness / readiness / detailed health surface
//! - Metrics via the `metrics` facade and structured tracing via `tracing`
//! - HTTP, manual TLS and ACME edge listeners with graceful shutdown
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping business logic inside `core`. The binary
//! wires everything together from a configuration document whose keys can
//! all be overridden with `AG_`-prefixed environment variables.
//!
//! # Error Handling
//! Application-edge APIs return `eyre::Result<T>`; ports and core expose
//! domain error enums. Client-visible failures all flow through
//! [`error::GatewayError`], which renders the JSON error body.

pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;
pub mod middleware;

// Re-export the specific types needed by the binary crate and tests
pub use crate::{
    adapters::{
        HttpClientAdapter, InMemoryRouteRepository, JwtValidator, MemoryCache, NoopCache,
        PostgresRouteRepository, RedisCache, RedisRateLimiter,
    },
    app::{AppState, build_router},
    core::{BreakerRegistry, ProxyEngine, Route, RouteCatalog},
    error::GatewayError,
    utils::GracefulShutdown,
};
