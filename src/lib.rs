pub mod catalog;
pub mod config;
pub mod error;
pub mod pii;
pub mod sandbox;
pub mod server;
pub mod skill_store;
pub mod state;
pub mod stats;
pub mod tools;
pub mod workspace;
