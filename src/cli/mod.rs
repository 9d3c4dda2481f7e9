pub mod batch;
pub mod check;
pub mod commands;
pub mod run;
pub mod tasks;
pub mod validate;

pub use commands::{Cli, Commands};
