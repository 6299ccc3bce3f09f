//! PostgreSQL connection configuration.
//!
//! Connection parameters travel to the link as a libpq-style DSN:
//! whitespace separated `key=value` pairs, with single-quoted values where
//! a value is empty or contains spaces, quotes or backslashes.
//!
//! ```
//! use pqlink_postgres::config::PgConfig;
//!
//! let config = PgConfig::parse("host=db.example.com dbname=app user=web password='s3 cret'").unwrap();
//! assert_eq!(config.host, "db.example.com");
//! assert_eq!(config.password.as_deref(), Some("s3 cret"));
//! assert_eq!(PgConfig::parse(&config.to_dsn()).unwrap(), config);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use pqlink_core::{Error, Result};

/// The `sslmode` connection parameter.
///
/// pqlink does not negotiate TLS itself; the mode is handed to the link in
/// the DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    /// Plain first, TLS on refusal
    Allow,
    /// TLS first, plain on refusal
    #[default]
    Prefer,
    Require,
    /// TLS with a trusted certificate chain
    VerifyCa,
    /// TLS with a trusted chain issued for the host name
    VerifyFull,
}

impl SslMode {
    /// Whether the link should offer TLS at all.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Whether a plain connection is unacceptable.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
        )
    }

    /// The DSN spelling of the mode.
    pub const fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(Error::programming(format!(
                "invalid sslmode value: \"{other}\""
            ))),
        }
    }
}

/// Parameters of one server connection.
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct PgConfig {
    /// Host name, address, or Unix socket directory
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    /// Reported to the server as `application_name`
    pub application_name: Option<String>,
    /// Connection timeout; `None` waits indefinitely
    pub connect_timeout: Option<Duration>,
    /// SSL mode
    pub ssl_mode: SslMode,
    /// Any other `key=value` parameter, passed through untouched
    pub options: BTreeMap<String, String>,
}

impl fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("ssl_mode", &self.ssl_mode)
            .field("options", &self.options)
            .finish()
    }
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: None,
            dbname: String::new(),
            application_name: None,
            connect_timeout: None,
            ssl_mode: SslMode::default(),
            options: BTreeMap::new(),
        }
    }
}

impl PgConfig {
    /// Configuration for `user` on `dbname` at `host`, default port.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            dbname: dbname.into(),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Give up connecting after `timeout`, rounded down to whole seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Pass an arbitrary `key=value` parameter through to the link.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse a `key=value` connection string.
    ///
    /// Unknown keys are kept in [`PgConfig::options`].
    pub fn parse(dsn: &str) -> Result<Self> {
        let mut config = PgConfig::default();
        for (key, value) in parse_pairs(dsn)? {
            config.set(&key, value)?;
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "host" => self.host = value,
            "port" => {
                self.port = value.parse().map_err(|_| {
                    Error::programming(format!("invalid port number: \"{value}\""))
                })?;
            }
            "user" => self.user = value,
            "password" => self.password = Some(value),
            "dbname" => self.dbname = value,
            "application_name" => self.application_name = Some(value),
            "connect_timeout" => {
                let secs: u64 = value.parse().map_err(|_| {
                    Error::programming(format!(
                        "invalid integer value \"{value}\" for connection option \"connect_timeout\""
                    ))
                })?;
                self.connect_timeout = Some(Duration::from_secs(secs));
            }
            "sslmode" => self.ssl_mode = SslMode::parse(&value)?,
            _ => {
                self.options.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Render the configuration as a connection string.
    pub fn to_dsn(&self) -> String {
        let mut pairs: Vec<(&str, String)> = vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
        ];
        if !self.user.is_empty() {
            pairs.push(("user", self.user.clone()));
        }
        if let Some(password) = &self.password {
            pairs.push(("password", password.clone()));
        }
        if !self.dbname.is_empty() {
            pairs.push(("dbname", self.dbname.clone()));
        }
        if let Some(name) = &self.application_name {
            pairs.push(("application_name", name.clone()));
        }
        if let Some(timeout) = self.connect_timeout {
            pairs.push(("connect_timeout", timeout.as_secs().to_string()));
        }
        if self.ssl_mode != SslMode::default() {
            pairs.push(("sslmode", self.ssl_mode.as_str().to_string()));
        }
        for (key, value) in &self.options {
            pairs.push((key.as_str(), value.clone()));
        }

        pairs
            .iter()
            .map(|(key, value)| format!("{key}={}", quote_value(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn parse_pairs(dsn: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = dsn.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(Error::programming(format!(
                "missing \"=\" after \"{key}\" in connection info string"
            )));
        }
        if key.is_empty() {
            return Err(Error::programming(
                "missing key before \"=\" in connection info string",
            ));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            let mut terminated = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => {
                        terminated = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !terminated {
                return Err(Error::programming(
                    "unterminated quoted string in connection info string",
                ));
            }
            pairs.push((key, value));
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
            pairs.push((key, value));
        }
    }
    Ok(pairs)
}
