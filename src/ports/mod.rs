//! Port traits between the domain and its adapters.

pub mod bar_port;
pub mod config_port;
pub mod feature_port;
pub mod registry_port;
