pub mod config;
pub mod http;
pub mod lock;
pub mod paths;
pub mod progress;
