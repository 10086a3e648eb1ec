pub mod cli;
pub mod core;
pub mod hub;
pub mod server;
pub mod utils;
