//! The browser side of the OAuth2 authorization code grant: starting an
//! authorization, handling the redirect back, exchanging the code for tokens
//! and keeping the result in a cookie-bound session.

pub mod auth;
pub mod components;
pub mod config;
pub mod cookies;
pub mod db;
pub mod errors;
pub mod oauth;
pub mod routes;
pub mod server;
pub mod setup;
pub mod state;
pub mod traits;

pub use state::AppState;
