pub mod clock;
pub mod config;
pub mod fs;
pub mod hook;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod nginx;
pub mod requester;
pub mod state_storage;
pub mod types;
