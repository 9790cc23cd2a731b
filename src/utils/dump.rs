//! Database dump collaborator
//!
//! Produces a plain dump file from a connection descriptor by invoking the
//! database's own CLI tool. Passwords go through the tool's environment
//! variable, never the argument list.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::DbConnection;

use super::command;

#[async_trait]
pub trait DatabaseDumper: Send + Sync {
    async fn dump(&self, conn: &DbConnection, output: &Path) -> Result<()>;
}

/// Dumper dispatching on the connection scheme to `pg_dump` or `mysqldump`
#[derive(Debug, Clone, Default)]
pub struct CliDumper {
    pub timeout: Option<Duration>,
}

#[async_trait]
impl DatabaseDumper for CliDumper {
    async fn dump(&self, conn: &DbConnection, output: &Path) -> Result<()> {
        info!(
            "Dumping database '{}' from {}:{}",
            conn.database, conn.host, conn.port
        );

        let output_str = output.display().to_string();
        let port = conn.port.to_string();

        match conn.scheme.as_str() {
            "postgres" | "postgresql" => {
                command::run_command(
                    "pg_dump",
                    &[
                        "--host", &conn.host,
                        "--port", &port,
                        "--username", &conn.user,
                        "--file", &output_str,
                        &conn.database,
                    ],
                    &[("PGPASSWORD", &conn.password)],
                    self.timeout,
                )
                .await
                .with_context(|| format!("pg_dump failed for '{}'", conn.database))?;
            }
            "mysql" | "mariadb" => {
                let out = command::run_command(
                    "mysqldump",
                    &[
                        "--host", &conn.host,
                        "--port", &port,
                        "--user", &conn.user,
                        &conn.database,
                    ],
                    &[("MYSQL_PWD", &conn.password)],
                    self.timeout,
                )
                .await
                .with_context(|| format!("mysqldump failed for '{}'", conn.database))?;
                tokio::fs::write(output, &out.stdout)
                    .await
                    .with_context(|| format!("Failed to write dump file {}", output.display()))?;
            }
            other => anyhow::bail!("Unsupported database scheme: {}", other),
        }

        Ok(())
    }
}
