//! The authentication and session-security core.
//!
//! Layering, top to bottom: HTTP handlers (`login`, `refresh`, `logout`,
//! `sessions`) → orchestration helpers (`principal`) → the four engines
//! (`token`, `revocation`, `registry`, `lockout`) → collaborator traits
//! (`directory`). `device`, `cookies`, and `utils` are pure helpers.

pub mod cookies;
pub mod device;
pub mod directory;
pub mod error;
pub mod lockout;
pub mod login;
pub mod logout;
pub mod principal;
pub mod refresh;
pub mod registry;
pub mod revocation;
pub mod sessions;
pub mod state;
pub mod token;
pub mod types;
pub mod utils;

pub use error::AuthError;
pub use principal::{authenticate, Principal};
pub use state::{AuthConfig, AuthState};
