pub mod cache;
pub mod circuit_breaker;
pub mod connection;
pub mod database;
pub mod rbmq;
