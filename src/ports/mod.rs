pub mod auth;
pub mod cache;
pub mod http_client;
pub mod repository;
