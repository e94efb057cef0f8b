use std::time::Duration;

/// Connection parameters.
///
/// DSN and environment resolution, TLS and credential files are handled
/// by higher layers; this is the already-resolved form the engine needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub branch: String,
    pub secret_key: Option<String>,
    pub connect_timeout: Duration,
    pub wait_for_message_timeout: Option<Duration>,
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Config {
        Config {
            host: host.into(),
            port,
            user: "edgedb".into(),
            password: None,
            database: "edgedb".into(),
            branch: "__default__".into(),
            secret_key: None,
            connect_timeout: Duration::from_secs(10),
            wait_for_message_timeout: None,
        }
    }
    pub fn user(mut self, user: impl Into<String>) -> Config {
        self.user = user.into();
        self
    }
    pub fn password(mut self, password: impl Into<String>) -> Config {
        self.password = Some(password.into());
        self
    }
    pub fn database(mut self, database: impl Into<String>) -> Config {
        self.database = database.into();
        self
    }
    pub fn branch(mut self, branch: impl Into<String>) -> Config {
        self.branch = branch.into();
        self
    }
    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Config {
        self.secret_key = Some(secret_key.into());
        self
    }
    pub fn connect_timeout(mut self, timeout: Duration) -> Config {
        self.connect_timeout = timeout;
        self
    }
    /// A per-message receive deadline; `None` waits indefinitely.
    pub fn wait_for_message_timeout(mut self, timeout: Duration) -> Config {
        self.wait_for_message_timeout = Some(timeout);
        self
    }

    pub(crate) fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
