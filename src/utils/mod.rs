pub mod formatting;
pub mod time;

pub use formatting::{format_duration, preview};
pub use time::sleep_or_cancel;
