pub mod completion_logger;
pub mod conversation;
pub mod utils;

pub use completion_logger::{
    load_record, CompletionLogger, CompletionSession, SharedCompletionLogger,
    SUPERSEDED_REASON,
};
pub use conversation::save_conversation;
pub use utils::{atomic_write, clean_name};
