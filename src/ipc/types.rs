use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::command::CommandSession;
use crate::config::DaemonConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: DaemonConfig,
    pub commands: CommandSession,
}

impl AppState {
    pub fn new(config: DaemonConfig) -> Self {
        AppState {
            workspace: None,
            db: None,
            config,
            commands: CommandSession::default(),
        }
    }
}
