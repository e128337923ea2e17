//! Application and matching engine for a multi-tenant career guidance platform.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
