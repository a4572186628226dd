pub mod config;
pub mod stack;
pub mod stats;
