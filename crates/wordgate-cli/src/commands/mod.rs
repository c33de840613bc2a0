pub mod config;
pub mod daemon;
pub mod helpers;
pub mod learn;
pub mod monitor;
pub mod word;
