use crate::command::DEFAULT_HISTORY_LIMIT;
use crate::db;
use crate::table::DEFAULT_PAGE_SIZE;
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;

pub const PAGE_SIZE_KEY: &str = "table.pageSize";
pub const HISTORY_LIMIT_KEY: &str = "command.historyLimit";

/// School administration sidecar: newline-delimited JSON requests on stdin,
/// one JSON response per line on stdout, logs on stderr.
#[derive(Debug, Clone, Parser)]
#[command(name = "schoold", version)]
pub struct DaemonConfig {
    /// Workspace directory to open at startup.
    #[arg(long, env = "SCHOOLD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `schoold=debug`.
    #[arg(long = "log", env = "SCHOOLD_LOG", default_value = "info")]
    pub log_filter: String,

    /// Rows per table page when the request does not say.
    #[arg(long, env = "SCHOOLD_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Command history entries kept per workspace.
    #[arg(long, env = "SCHOOLD_HISTORY_LIMIT", default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,
}

impl DaemonConfig {
    /// Workspace settings win over flags.
    pub fn page_size(&self, conn: Option<&Connection>) -> usize {
        conn.and_then(|c| db::settings_get_usize(c, PAGE_SIZE_KEY))
            .filter(|n| *n > 0)
            .unwrap_or(self.page_size)
            .max(1)
    }

    pub fn history_limit(&self, conn: Option<&Connection>) -> usize {
        conn.and_then(|c| db::settings_get_usize(c, HISTORY_LIMIT_KEY))
            .filter(|n| *n > 0)
            .unwrap_or(self.history_limit)
            .max(1)
    }
}
