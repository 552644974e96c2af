pub mod api;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod enrichment;
pub mod models;
pub mod utils;
