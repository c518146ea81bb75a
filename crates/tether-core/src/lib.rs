//! # tether-core
//!
//! Core types, the pairing state machine, the plan-limit gate, configuration,
//! and error handling for the Tether pairing client.

pub mod config;
pub mod device;
pub mod error;
pub mod message;
pub mod pairing;
pub mod plan;
pub mod traits;
