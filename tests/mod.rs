mod support;

mod cache_tests;
mod circuit_breaker_tests;
