//! Configuration: an optional TOML file layered under CLI flags.
//!
//! ```toml
//! snapshot_dir = "./migration-data"
//! schema = "public"
//! tables = ["users", "posts", "comments"]
//! conflict_policy = "skip"
//!
//! [source]
//! host = "prod-db.internal"
//! database = "app"
//! user = "readonly"
//! ssl = true
//! connect_timeout = "30s"
//!
//! [target]
//! host = "localhost"
//! database = "app_dev"
//! user = "postgres"
//!
//! [consolidation]
//! target_type = "brand"
//! separator = " - "
//! events_table = "click_events"
//! ```
//!
//! Flags and their environment variables always win over the file.

pub mod duration;

use relay_core::ConflictPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::connect::ConnectionProfile;
use crate::database::ConsolidationTables;
use crate::{PlanOpts, SourceOpts, TargetOpts};

pub const DEFAULT_SNAPSHOT_DIR: &str = "./migration-data";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_SEPARATOR: &str = " - ";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("{profile} connection is missing '{field}' (use --{profile}-{flag} or [{profile}] {field} in the config file)")]
    MissingField {
        profile: String,
        field: &'static str,
        flag: &'static str,
    },

    #[error("invalid {profile} connect timeout: {message}")]
    InvalidTimeout { profile: String, message: String },
}

/// Connection settings for one side, every field optional until resolved.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub connect_timeout: Option<String>,
}

impl fmt::Debug for ProfileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileConfig")
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

impl ProfileConfig {
    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: Option<&ProfileConfig>) -> ProfileConfig {
        let Some(fallback) = fallback else {
            return self;
        };
        ProfileConfig {
            host: self.host.or_else(|| fallback.host.clone()),
            port: self.port.or(fallback.port),
            database: self.database.or_else(|| fallback.database.clone()),
            user: self.user.or_else(|| fallback.user.clone()),
            password: self.password.or_else(|| fallback.password.clone()),
            ssl: self.ssl.or(fallback.ssl),
            connect_timeout: self
                .connect_timeout
                .or_else(|| fallback.connect_timeout.clone()),
        }
    }

    pub fn into_profile(self, name: &str) -> Result<ConnectionProfile, ConfigError> {
        let missing = |field, flag| ConfigError::MissingField {
            profile: name.to_string(),
            field,
            flag,
        };
        let connect_timeout = match self.connect_timeout.as_deref() {
            Some(raw) => Some(duration::parse_duration(raw).map_err(|e| {
                ConfigError::InvalidTimeout {
                    profile: name.to_string(),
                    message: format!("{e:#}"),
                }
            })?),
            None => None,
        };

        Ok(ConnectionProfile {
            name: name.to_string(),
            host: self.host.ok_or_else(|| missing("host", "host"))?,
            port: self.port.unwrap_or(DEFAULT_PORT),
            database: self.database.ok_or_else(|| missing("database", "database"))?,
            user: self.user.ok_or_else(|| missing("user", "user"))?,
            password: self.password,
            ssl: self.ssl.unwrap_or(false),
            connect_timeout,
        })
    }
}

impl From<&SourceOpts> for ProfileConfig {
    fn from(opts: &SourceOpts) -> Self {
        Self {
            host: opts.source_host.clone(),
            port: opts.source_port,
            database: opts.source_database.clone(),
            user: opts.source_user.clone(),
            password: opts.source_password.clone(),
            ssl: opts.source_ssl,
            connect_timeout: opts.source_connect_timeout.clone(),
        }
    }
}

impl From<&TargetOpts> for ProfileConfig {
    fn from(opts: &TargetOpts) -> Self {
        Self {
            host: opts.target_host.clone(),
            port: opts.target_port,
            database: opts.target_database.clone(),
            user: opts.target_user.clone(),
            password: opts.target_password.clone(),
            ssl: opts.target_ssl,
            connect_timeout: opts.target_connect_timeout.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConsolidationSettings {
    pub target_type: Option<String>,
    pub separator: Option<String>,
    #[serde(flatten)]
    pub tables: ConsolidationTables,
}

/// Contents of the TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub snapshot_dir: Option<PathBuf>,
    pub schema: Option<String>,
    pub tables: Option<Vec<String>>,
    pub conflict_policy: Option<ConflictPolicy>,
    pub source: Option<ProfileConfig>,
    pub target: Option<ProfileConfig>,
    #[serde(default)]
    pub consolidation: ConsolidationSettings,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Settings shared by every step once flags and file are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub snapshot_dir: PathBuf,
    pub schema: String,
    /// Explicitly requested tables; empty means "derive from the source".
    pub tables: Vec<String>,
    pub conflict_policy: ConflictPolicy,
    pub consolidation: ConsolidationSettings,
    source: Option<ProfileConfig>,
    target: Option<ProfileConfig>,
}

impl Settings {
    /// Merge plan flags over the config file named by `--config`, if any.
    pub fn load(opts: &PlanOpts) -> Result<Self, ConfigError> {
        let file = match &opts.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        Ok(Self::merge(opts, file))
    }

    pub fn merge(opts: &PlanOpts, file: RelayConfig) -> Self {
        let tables = if opts.tables.is_empty() {
            file.tables.unwrap_or_default()
        } else {
            opts.tables.clone()
        };
        Self {
            snapshot_dir: opts
                .snapshot_dir
                .clone()
                .or(file.snapshot_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            schema: opts
                .schema
                .clone()
                .or(file.schema)
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            tables,
            conflict_policy: file.conflict_policy.unwrap_or_default(),
            consolidation: file.consolidation,
            source: file.source,
            target: file.target,
        }
    }

    pub fn source_profile(&self, opts: &SourceOpts) -> Result<ConnectionProfile, ConfigError> {
        ProfileConfig::from(opts)
            .or(self.source.as_ref())
            .into_profile("source")
    }

    pub fn target_profile(&self, opts: &TargetOpts) -> Result<ConnectionProfile, ConfigError> {
        ProfileConfig::from(opts)
            .or(self.target.as_ref())
            .into_profile("target")
    }

    pub fn separator(&self) -> &str {
        self.consolidation
            .separator
            .as_deref()
            .unwrap_or(DEFAULT_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"
snapshot_dir = "/var/lib/relay"
tables = ["users", "posts"]
conflict_policy = "fail"

[source]
host = "prod-db.internal"
database = "app"
user = "readonly"
password = "s3cret"
ssl = true
connect_timeout = "2m"

[target]
host = "localhost"
database = "app_dev"
user = "postgres"

[consolidation]
target_type = "brand"
events_table = "link_clicks"
"#;

    fn sample() -> RelayConfig {
        RelayConfig::parse(SAMPLE, Path::new("relay.toml")).unwrap()
    }

    #[test]
    fn test_file_values_used_when_flags_absent() {
        let settings = Settings::merge(&PlanOpts::default(), sample());

        assert_eq!(settings.snapshot_dir, PathBuf::from("/var/lib/relay"));
        assert_eq!(settings.schema, "public");
        assert_eq!(settings.tables, vec!["users", "posts"]);
        assert_eq!(settings.conflict_policy, ConflictPolicy::FailOnConflict);
        assert_eq!(settings.consolidation.target_type.as_deref(), Some("brand"));
        assert_eq!(settings.consolidation.tables.events_table, "link_clicks");
        assert_eq!(settings.consolidation.tables.targets_table, "analytics_targets");
        assert_eq!(settings.separator(), " - ");

        let source = settings.source_profile(&SourceOpts::default()).unwrap();
        assert_eq!(source.host, "prod-db.internal");
        assert_eq!(source.port, 5432);
        assert!(source.ssl);
        assert_eq!(source.connect_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_flags_override_file() {
        let opts = PlanOpts {
            tables: vec!["comments".to_string()],
            schema: Some("app".to_string()),
            ..Default::default()
        };
        let settings = Settings::merge(&opts, sample());
        assert_eq!(settings.tables, vec!["comments"]);
        assert_eq!(settings.schema, "app");

        let target_opts = TargetOpts {
            target_host: Some("staging-db".to_string()),
            target_port: Some(6543),
            ..Default::default()
        };
        let target = settings.target_profile(&target_opts).unwrap();
        assert_eq!(target.host, "staging-db");
        assert_eq!(target.port, 6543);
        assert_eq!(target.database, "app_dev");
    }

    #[test]
    fn test_missing_field_names_flag() {
        let settings = Settings::merge(&PlanOpts::default(), RelayConfig::default());
        let err = settings
            .target_profile(&TargetOpts::default())
            .unwrap_err();
        assert!(err.to_string().contains("--target-host"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = RelayConfig::parse("snapshot_directory = \"x\"", Path::new("relay.toml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_debug_redacts_password() {
        let profile = sample().source.unwrap();
        let rendered = format!("{profile:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
