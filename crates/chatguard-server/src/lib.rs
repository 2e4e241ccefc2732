//! ChatGuard Server
//!
//! Session-based chat relay that screens every turn with the moderation
//! rules before and after calling the upstream completion API.

pub mod cli;
pub mod config;
pub mod gateway;
pub mod relay;
pub mod routes;
pub mod security;
pub mod session;

pub use cli::Cli;
pub use config::ServerConfig;
pub use gateway::{CompletionGateway, GatewayError, OpenAiGateway};
pub use relay::{MessageOutcome, Relay, RelayError};
pub use routes::{create_router, AppState};
pub use session::{InMemorySessionStore, Session, SessionError, SessionStore};
