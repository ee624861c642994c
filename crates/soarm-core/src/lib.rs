// soarm-core: Types, config, time, errors shared across the soarm IK stack.

pub mod config;
pub mod error;
pub mod time;
pub mod types;
