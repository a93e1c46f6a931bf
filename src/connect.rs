//! Opening PostgreSQL sessions from connection profiles.

use relay_core::DatabaseError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info, warn};

use crate::postgresql::PostgresDatabase;

/// Everything needed to reach one database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    /// "source" or "target".
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    /// Require TLS.
    pub ssl: bool,
    pub connect_timeout: Option<Duration>,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl", &self.ssl)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl ConnectionProfile {
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .application_name("pg-relay")
            .ssl_mode(if self.ssl {
                SslMode::Require
            } else {
                SslMode::Disable
            });
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }
        config
    }

    /// `user@host:port/database`, safe to log.
    pub fn display_target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Open a session for one step.
///
/// The returned handle owns the session; dropping it (or calling
/// [`PostgresDatabase::close`]) releases the connection.
pub async fn connect(
    profile: &ConnectionProfile,
    schema: &str,
) -> Result<PostgresDatabase, DatabaseError> {
    let config = profile.to_pg_config();
    let label = profile.name.clone();
    info!(
        database = %label,
        target = %profile.display_target(),
        tls = profile.ssl,
        "Connecting to PostgreSQL"
    );

    let (client, driver) = if profile.ssl {
        let tls = tls_connector().map_err(|e| DatabaseError::connection(&label, e))?;
        let (client, connection) = config
            .connect(tls)
            .await
            .map_err(|e| DatabaseError::connection(&label, e))?;
        let driver_label = label.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(database = %driver_label, "PostgreSQL connection error: {e}");
            }
        });
        (client, driver)
    } else {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| DatabaseError::connection(&label, e))?;
        let driver_label = label.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(database = %driver_label, "PostgreSQL connection error: {e}");
            }
        });
        (client, driver)
    };

    Ok(PostgresDatabase::new(label, schema, client, driver))
}

/// TLS connector trusting the platform's root certificates.
fn tls_connector() -> Result<MakeRustlsConnect, rustls::Error> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("Skipping unreadable system certificate: {err}");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Loaded system root certificates");

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ConnectionProfile {
        ConnectionProfile {
            name: "target".to_string(),
            host: "localhost".to_string(),
            port: 5433,
            database: "app_dev".to_string(),
            user: "postgres".to_string(),
            password: Some("hunter2".to_string()),
            ssl: true,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    #[test]
    fn test_pg_config_from_profile() {
        let config = profile().to_pg_config();
        assert_eq!(config.get_ports(), &[5433]);
        assert_eq!(config.get_dbname(), Some("app_dev"));
        assert_eq!(config.get_user(), Some("postgres"));
        assert_eq!(config.get_ssl_mode(), SslMode::Require);
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(10)));
    }

    #[test]
    fn test_profile_debug_and_display_hide_password() {
        let profile = profile();
        assert_eq!(profile.display_target(), "postgres@localhost:5433/app_dev");
        assert!(!format!("{profile:?}").contains("hunter2"));
    }
}
