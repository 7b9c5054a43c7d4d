pub mod blocklist;
pub mod content;
pub mod event_log;
pub mod sqlite;
