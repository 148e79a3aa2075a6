//! Library crate for trivia-live-back, exposing modules for binaries and integration tests.

pub mod config;
/// Storage contract and its in-memory implementation.
pub mod dao;
/// REST and WebSocket data transfer objects.
pub mod dto;
/// Service error type and its wire codes.
pub mod error;
/// HTTP and WebSocket routes.
pub mod routes;
/// Event handlers and background services.
pub mod services;
/// Shared application state.
pub mod state;
