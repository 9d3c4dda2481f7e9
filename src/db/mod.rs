//! Local SQLite task store: task definitions and their recorded attempts.

pub mod attempts;
pub mod connection;
pub mod schema;
pub mod tasks;

pub use attempts::{NewAttempt, TaskAttemptRow};
pub use connection::Database;
pub use tasks::{NewTask, TaskRow};
