//! Production storage adapters behind the kernel's contracts.

pub mod postgres;
pub mod redis;

pub use postgres::{create_pool, run_migrations, PgAuditSink, PgDirectory};
pub use redis::RedisKv;
