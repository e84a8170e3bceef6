//! # Auth Module
//!
//! This module handles all authentication-related functionality including:
//! - Google and GitHub OAuth sign-in
//! - Database-backed sessions behind a signed cookie
//! - Reconciling a new provider with an existing account (pending links)
//! - AuthedUser extractor for protected routes

pub mod cookies;
pub mod extractors;
pub mod handlers;
pub mod identity_store;
pub mod linking;
pub mod models;
pub mod pending_link;
pub mod providers;
pub mod resolver;
pub mod routes;
pub mod session;


pub use extractors::AuthedUser;
pub use identity_store::{IdentityStore, SqliteIdentityStore};
pub use routes::auth_routes;
