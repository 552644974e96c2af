pub mod circuit_breaker;
pub mod message;
pub mod record;
pub mod response;
pub mod retry;
