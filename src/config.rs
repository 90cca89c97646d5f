//! Harness configuration

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every harness operation
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Substring of the charm label identifying the data-store family (default: "mongodb")
    pub family_marker: String,
    /// Database user the admin password belongs to (default: "operator")
    pub username: String,
    /// Authentication database placed in the URI path (default: "admin")
    pub auth_database: String,
    /// Database holding the workload collections (default: "new-db")
    pub database: String,
    /// Collection the generator writes to (default: "test_collection")
    pub writes_collection: String,
    /// Collection used by replication scenarios (default: "test_ubuntu_collection")
    pub replication_collection: String,
    /// Action returning the admin password (default: "get-admin-password")
    pub password_action: String,
    /// Result field of the password action (default: "admin-password")
    pub password_field: String,
    /// Generator executable (default: "continuous-writes", looked up on PATH)
    pub writer_program: PathBuf,
    /// Command-line fragment identifying a running generator (default: "continuous-writes")
    pub writer_signature: String,
    /// Upper bound on waiting for a killed generator to disappear (default: 30s)
    pub stop_timeout: Duration,
    /// Interval between process-table and status polls (default: 500ms)
    pub poll_interval: Duration,
    /// Data-store daemon killed by the restart scenario (default: "/usr/bin/mongod")
    pub daemon_process: String,
    /// Upper bound on waiting for the daemon to self-restart (default: 120s)
    pub restart_timeout: Duration,
    /// Upper bound on waiting for the cluster to settle (default: 1000s)
    pub idle_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            family_marker: "mongodb".to_string(),
            username: "operator".to_string(),
            auth_database: "admin".to_string(),
            database: "new-db".to_string(),
            writes_collection: "test_collection".to_string(),
            replication_collection: "test_ubuntu_collection".to_string(),
            password_action: "get-admin-password".to_string(),
            password_field: "admin-password".to_string(),
            writer_program: PathBuf::from("continuous-writes"),
            writer_signature: "continuous-writes".to_string(),
            stop_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            daemon_process: "/usr/bin/mongod".to_string(),
            restart_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(1000),
        }
    }
}

impl HarnessConfig {
    /// Target a different data-store family
    pub fn with_family_marker(mut self, marker: impl Into<String>) -> Self {
        self.family_marker = marker.into();
        self
    }

    /// Use a different generator executable and process signature
    pub fn with_writer(mut self, program: impl Into<PathBuf>, signature: impl Into<String>) -> Self {
        self.writer_program = program.into();
        self.writer_signature = signature.into();
        self
    }

    /// Use a different workload database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_restart_timeout(mut self, timeout: Duration) -> Self {
        self.restart_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Collections dropped at cleanup, in drop order
    pub fn workload_collections(&self) -> [&str; 2] {
        [&self.writes_collection, &self.replication_collection]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_charm_conventions() {
        let config = HarnessConfig::default();
        assert_eq!(config.family_marker, "mongodb");
        assert_eq!(config.username, "operator");
        assert_eq!(config.database, "new-db");
        assert_eq!(
            config.workload_collections(),
            ["test_collection", "test_ubuntu_collection"]
        );
    }

    #[test]
    fn test_builders_override_fields() {
        let config = HarnessConfig::default()
            .with_writer("/opt/bin/writer", "writer")
            .with_stop_timeout(Duration::from_secs(1))
            .with_poll_interval(Duration::from_millis(10));
        assert_eq!(config.writer_program, PathBuf::from("/opt/bin/writer"));
        assert_eq!(config.writer_signature, "writer");
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }
}
