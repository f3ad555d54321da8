pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod mirror;
pub mod reconciler;
pub mod registry;
