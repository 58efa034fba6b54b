pub mod memory;
pub mod postgres;

pub use memory::InMemoryRouteRepository;
pub use postgres::PostgresRouteRepository;
