// Library root for the Jutzo identity and session engine

pub mod auth;
pub mod config;
pub mod core;
pub mod engine;
pub mod schema;
pub mod state;
pub mod store;
pub mod utils;

pub use config::{Config, ConfigurationProvider, EnvConfigProvider, MapConfigProvider};
pub use core::errors::IdentityError;
pub use engine::AuthorizationEngine;
