pub mod memory;
pub mod noop;
pub mod redis;

pub use self::memory::MemoryCache;
pub use self::noop::NoopCache;
pub use self::redis::RedisCache;
