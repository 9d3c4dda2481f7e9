pub const SCHEMA_VERSION: &str = "1";

pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS _autowebprompt_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name TEXT NOT NULL,
    task_starting_files TEXT NOT NULL DEFAULT '[]',
    task_solution_files TEXT NOT NULL DEFAULT '[]',
    task_source TEXT,
    deprecated INTEGER NOT NULL DEFAULT 0,
    deprecation_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    prompt_files TEXT NOT NULL DEFAULT '[]',
    start_end_times TEXT NOT NULL DEFAULT '[]',
    agent_model_name TEXT,
    agent_model_type TEXT,
    attempt_files TEXT NOT NULL DEFAULT '[]',
    time_taken_mins REAL,
    cost REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_task_name ON tasks(task_name);
CREATE INDEX IF NOT EXISTS idx_tasks_source ON tasks(task_source);
CREATE INDEX IF NOT EXISTS idx_task_attempts_task_id ON task_attempts(task_id);
";
