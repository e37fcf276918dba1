//! Core domain types and logic.

pub mod error;
pub mod bar;
pub mod session;
pub mod orb;
pub mod simulator;
pub mod features;
pub mod costs;
pub mod instrument;
pub mod performance;
pub mod candidate;
pub mod setup;
pub mod promotion;
pub mod config_sync;
pub mod config_validation;
pub mod pipeline;
