// Public API - what other modules can use
pub use handlers::router;
pub use keys::{KeyAlgorithm, SigningKey};
pub use middleware::jwt_auth;
pub use models::{SessionRecord, SessionStatus};
pub use repository::{InMemorySessionStore, SessionStore};
pub use service::{SessionConfig, SessionManager};
pub use sweeper::{start_sweep_task, SweepConfig};
pub use token::TokenIssuer;
pub use types::{
    ActiveSession, CreateSessionRequest, SessionClaims, SessionResponse, SessionStats,
    SessionView, TokenResponse,
};

// Internal modules
mod creator;
pub mod generators;
mod handlers;
pub mod keys;
mod middleware;
pub mod models;
pub mod repository;
pub mod service;
mod sweeper;
pub mod token;
mod types;
