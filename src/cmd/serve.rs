//! Board server commands: `flowboard serve` and `flowboard init-db`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;

use flowboard::board::db::BoardDb;
use flowboard::board::server::start_server;
use flowboard::config::BoardConfig;

pub async fn cmd_serve(
    config: &BoardConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let mut server = config.server_config(dev)?;
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(path) = db_path {
        server.db_path = path;
    }
    start_server(server).await
}

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    BoardDb::new(db_path)?;
    println!(
        "{} Board database initialized at {}",
        style("✓").green(),
        db_path.display()
    );
    Ok(())
}
