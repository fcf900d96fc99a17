//! Application configuration

mod schema;
mod store;

pub use schema::{AppConfig, IceConfig, MediaConfig, ServerConfig, SignalingConfig, TurnServer};
pub use store::{ConfigChange, ConfigStore};
