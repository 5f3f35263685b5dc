//! # farmsync server
//!
//! Transport-agnostic request handling for the farmsync sync protocol.
//!
//! This crate provides:
//! - Sync, push and pull entry points, blocking and async
//! - Raw JSON body dispatch by endpoint path
//! - Tenant authentication (HMAC-SHA256 tokens)
//! - Request size limits
//! - Mapping of engine failures to `{kind, message}` bodies and status codes
//!
//! # Authentication
//!
//! The tenant of a call is never read from the request body. A transport
//! either forwards a bearer token or, when the server does not require
//! authentication, a tenant already verified upstream:
//!
//! ```rust,ignore
//! use farmsync_server::{AuthConfig, Caller, ServerConfig, SyncServer, TokenValidator};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::new(ServerConfig::default().with_auth(secret.clone()))?;
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(tenant, user)?;
//! let response = server.handle_sync(&Caller::Token(token), &request)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenClaims, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{Caller, HandlerContext, RequestHandler};
pub use server::{Endpoint, SyncServer};
