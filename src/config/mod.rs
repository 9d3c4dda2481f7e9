pub mod parser;
pub mod types;

pub use types::*;
pub use parser::{
    inject_agent_type, into_task_config, load_config, load_task_list, merge_task_config,
    parse_task_config, parse_task_list, TaskList,
};
