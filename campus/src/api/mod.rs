//! HTTP and WebSocket API.
//!
//! Thin handlers: extract the caller and input, call [`crate::service::RsvpService`]
//! or a job, map errors through [`error::AppError`].

pub mod admin;
pub mod error;
pub mod events;
pub mod identity;
pub mod middleware;
pub mod rsvp;
pub mod websocket;

pub use error::AppError;
pub use identity::{Caller, RequireAdmin};
