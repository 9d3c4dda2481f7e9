pub mod agents;
pub mod audit;
pub mod browser;
pub mod cli;
pub mod config;
pub mod db;
pub mod detector;
pub mod engine;
pub mod errors;
pub mod storage;
pub mod utils;
pub mod validators;

#[cfg(test)]
pub mod testing;
