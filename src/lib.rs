pub mod collectors;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod state;
