pub mod analysis;
pub mod audit;
pub mod config;
pub mod error;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod webhook;
pub mod workflow;
