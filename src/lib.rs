// Library crate for the bank session service
// This file exposes the public API for the binary and integration tests

pub mod config;
pub mod session;
pub mod shared;

// Re-export commonly used types for easier access in tests
pub use config::AppConfig;
pub use session::{
    router, start_sweep_task, InMemorySessionStore, SessionConfig, SessionManager, SessionStore,
    SigningKey, SweepConfig, TokenIssuer,
};
pub use shared::{AppError, AppState};
