pub mod config;
pub mod database;
pub mod monitoring;
pub mod pool;
