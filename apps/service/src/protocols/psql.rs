//! PostgreSQL login check.
//!
//!    db.example.com must run psql with username 'monitor' [with password 'secret'] [with port 5432] [with database 'app'] [with tls verify-full]
//!
//! A full login is performed and the connection closed again. The check
//! fails with the server message when the login is refused.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use tokio::time::timeout;
use tracing::info;

use super::{PORT_PATTERN, ProtocolTest, Registry, port_argument};
use crate::monitoring::types::{Options, Test};

const ARGUMENTS: &[(&str, &str)] = &[
    ("port", PORT_PATTERN),
    ("username", ".*"),
    ("password", ".*"),
    ("database", "^[^\\s]+$"),
    ("tls", "^(disable|require|verify-ca|verify-full)$"),
];

pub struct PsqlTest;

fn ssl_mode(test: &Test) -> PgSslMode {
    match test.arguments.get("tls").map(String::as_str) {
        Some("require") => PgSslMode::Require,
        Some("verify-ca") => PgSslMode::VerifyCa,
        Some("verify-full") => PgSslMode::VerifyFull,
        _ => PgSslMode::Disable,
    }
}

#[async_trait::async_trait]
impl ProtocolTest for PsqlTest {
    fn arguments(&self) -> &[(&'static str, &'static str)] {
        ARGUMENTS
    }

    fn should_resolve_hostname(&self) -> bool {
        true
    }

    async fn run_test(&self, test: &Test, target: &str, options: &Options) -> Result<()> {
        let port = port_argument(test, Some(5432))?;
        let username = match test.arguments.get("username") {
            Some(username) if !username.is_empty() => username.as_str(),
            _ => bail!("no username specified"),
        };

        // ~/.pgpass is not consulted, credentials come from the test line only.
        let mut connect_options = PgConnectOptions::new_without_pgpass()
            .host(target)
            .port(port)
            .username(username)
            .ssl_mode(ssl_mode(test))
            .application_name("vigil");
        if let Some(password) = test.arguments.get("password") {
            connect_options = connect_options.password(password);
        }
        if let Some(database) = test.arguments.get("database") {
            connect_options = connect_options.database(database);
        }

        if options.verbose {
            info!(host = target, port, username, "Logging in to PostgreSQL");
        }

        let connection = timeout(options.timeout, PgConnection::connect_with(&connect_options))
            .await
            .map_err(|_| anyhow!("PostgreSQL login timed out"))?
            .map_err(|e| anyhow!("PostgreSQL login failed: {}", e))?;

        connection.close().await.map_err(|e| anyhow!("failed to close PostgreSQL connection: {}", e))
    }

    fn example(&self) -> &str {
        "db.example.com must run psql with username 'monitor' [with password 'secret'] [with port 5432] [with database 'app'] [with tls disable|require|verify-ca|verify-full]\n\n  Logs in and disconnects again, TLS is off unless requested."
    }
}

pub fn register(registry: &mut Registry) {
    registry.register("psql", || Arc::new(PsqlTest));
}
