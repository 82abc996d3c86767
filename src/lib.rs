pub mod config;
pub mod error;
pub mod server;
pub mod services;
pub mod tasks;

// Layered boundaries: use cases and ports, then the adapters behind them
pub mod app;
pub mod infra;

// Data shapes shared across layers
pub mod domain;

pub mod observability;
