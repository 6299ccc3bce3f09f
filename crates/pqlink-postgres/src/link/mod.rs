//! The database link abstraction.
//!
//! A link is one session with the server, provided by a lower-level client
//! library. The connection core drives it through the [`Link`] trait and
//! never touches the transport directly. [`Connector`] is the factory that
//! establishes links from a DSN.
//!
//! [`memory`] contains an in-process implementation used for testing.

pub mod memory;

use std::fmt;

pub use memory::{MemoryLink, MemoryServer};

/// Callback receiving every out-of-band message delivered by the server.
pub type NoticeProcessor = Box<dyn FnMut(&str) + Send>;

/// Establishes links to a server.
pub trait Connector: Send + Sync {
    /// Try to establish a link described by `dsn`.
    ///
    /// `None` means no link object could be created at all. A link that was
    /// created but failed to connect is returned with [`LinkStatus::Bad`].
    fn connect(&self, dsn: &str) -> Option<Box<dyn Link>>;
}

/// One session with a database server.
///
/// All calls may block on network I/O.
pub trait Link: Send {
    /// Status of the underlying session.
    fn status(&self) -> LinkStatus;

    /// The most recent error message reported by the link.
    fn error_message(&self) -> String;

    /// Switch the link's send/receive mode. Returns `false` on failure.
    fn set_nonblocking(&mut self, nonblocking: bool) -> bool;

    /// Execute `sql` and wait for its result.
    ///
    /// `None` means the link failed before a result was produced (lost
    /// connection, out of memory); [`Link::error_message`] explains why.
    fn execute(&mut self, sql: &[u8]) -> Option<LinkResult>;

    /// Install the callback that receives notices.
    fn set_notice_processor(&mut self, processor: NoticeProcessor);

    /// Frontend/backend protocol version in use.
    fn protocol_version(&self) -> i32;

    /// Server version as an integer (e.g. 90224 for 9.2.24).
    fn server_version(&self) -> i32;

    /// Process id of the server backend serving this session.
    fn backend_pid(&self) -> i32;

    /// Read whatever input is available without blocking.
    fn consume_input(&mut self) -> bool;

    /// Drain the asynchronous notifications received so far.
    fn take_notifications(&mut self) -> Vec<Notification>;

    /// Close the session and release its resources.
    fn finish(&mut self);
}

/// Session status reported by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Ok,
    Bad,
}

/// Status of a statement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The query string was empty
    EmptyQuery,
    /// A command returning no rows completed
    CommandOk,
    /// A query returning rows completed
    TuplesOk,
    /// COPY TO STDOUT started
    CopyOut,
    /// COPY FROM STDIN started
    CopyIn,
    /// The server's response was not understood
    BadResponse,
    /// A notice or warning occurred
    NonfatalError,
    /// The command failed
    FatalError,
}

impl ExecStatus {
    /// Whether the statement completed without error.
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            ExecStatus::EmptyQuery
                | ExecStatus::CommandOk
                | ExecStatus::TuplesOk
                | ExecStatus::CopyOut
                | ExecStatus::CopyIn
        )
    }
}

/// Error fields reported by the server for a failed statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Severity (ERROR, FATAL, PANIC)
    pub severity: String,
    /// SQLSTATE code (e.g., "23505" for unique_violation)
    pub code: Option<String>,
    /// Primary error message
    pub message: String,
    /// Optional secondary message with more detail
    pub detail: Option<String>,
    /// Optional suggestion for fixing the problem
    pub hint: Option<String>,
}

impl ServerError {
    /// An `ERROR` severity failure with the given SQLSTATE.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR".to_string(),
            code: Some(code.into()),
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:  {}", self.severity, self.message)
    }
}

/// Result of one executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkResult {
    pub status: ExecStatus,
    /// Rows in text format; `None` cells are SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
    /// Rows affected by the command, when the server reports it
    pub affected: Option<u64>,
    /// Error fields when `status` is a failure
    pub error: Option<ServerError>,
}

impl LinkResult {
    /// A successful command without rows.
    pub fn command_ok(affected: Option<u64>) -> Self {
        Self {
            status: ExecStatus::CommandOk,
            rows: Vec::new(),
            affected,
            error: None,
        }
    }

    /// A successful query with rows.
    pub fn tuples(rows: Vec<Vec<Option<String>>>) -> Self {
        let affected = Some(rows.len() as u64);
        Self {
            status: ExecStatus::TuplesOk,
            rows,
            affected,
            error: None,
        }
    }

    /// A failed statement.
    pub fn fatal(error: ServerError) -> Self {
        Self {
            status: ExecStatus::FatalError,
            rows: Vec::new(),
            affected: None,
            error: Some(error),
        }
    }

    /// Text value of a single cell.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|cell| cell.as_deref())
    }
}

/// An asynchronous notification raised by `NOTIFY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process id of the notifying backend
    pub pid: i32,
    /// Channel name
    pub channel: String,
    /// Optional payload
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_status_success() {
        assert!(ExecStatus::CommandOk.is_success());
        assert!(ExecStatus::TuplesOk.is_success());
        assert!(ExecStatus::EmptyQuery.is_success());
        assert!(!ExecStatus::FatalError.is_success());
        assert!(!ExecStatus::BadResponse.is_success());
        assert!(!ExecStatus::NonfatalError.is_success());
    }

    #[test]
    fn cell_access() {
        let result = LinkResult::tuples(vec![vec![Some("UTF8".to_string()), None]]);
        assert_eq!(result.value(0, 0), Some("UTF8"));
        assert_eq!(result.value(0, 1), None);
        assert_eq!(result.value(1, 0), None);
        assert_eq!(result.affected, Some(1));
    }

    #[test]
    fn server_error_display() {
        let err = ServerError::error("42601", "syntax error at or near \"SELEC\"");
        assert_eq!(err.to_string(), "ERROR:  syntax error at or near \"SELEC\"");
    }
}
