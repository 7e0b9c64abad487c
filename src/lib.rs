pub mod actor;
pub mod chain;
pub mod config;
pub mod error;
pub mod idea;
pub mod meta;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
