//! In-process link implementation.
//!
//! [`MemoryServer`] simulates the small part of a PostgreSQL backend the
//! connection core talks to: session setup statements, client encodings,
//! transaction statements and LISTEN/NOTIFY. Everything else is accepted and
//! recorded. Failures, notices, latency and unreachable or refusing servers
//! can be injected, and the server keeps track of how many link operations
//! were in flight at the same time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::{
    Connector, ExecStatus, Link, LinkResult, LinkStatus, NoticeProcessor, Notification,
    ServerError,
};

/// Client encodings the simulated server accepts in `SET client_encoding`.
const SERVER_ENCODINGS: &[&str] = &[
    "SQL_ASCII",
    "UTF8",
    "LATIN1",
    "LATIN2",
    "LATIN9",
    "WIN1250",
    "WIN1251",
    "WIN1252",
    "KOI8R",
    "EUC_JP",
    "SJIS",
    "GBK",
    "BIG5",
    "EUC_CN",
    "UHC",
    "JOHAB",
];

#[derive(Debug)]
enum Injected {
    Error(ServerError),
    Disconnect,
}

struct ServerState {
    statements: Vec<String>,
    client_encoding: String,
    protocol_version: i32,
    server_version: i32,
    next_pid: i32,
    unreachable: bool,
    refuse: Option<String>,
    fail_nonblocking: bool,
    failures: Vec<(String, Injected)>,
    notices: Vec<(String, String)>,
    rows: Vec<(String, Vec<Vec<Option<String>>>)>,
    listeners: HashMap<String, HashSet<i32>>,
    queues: HashMap<i32, Vec<Notification>>,
    latency: Duration,
    in_flight: usize,
    max_in_flight: usize,
    connects: usize,
    finished: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            statements: Vec::new(),
            client_encoding: "UTF8".to_string(),
            protocol_version: 3,
            server_version: 160_002,
            next_pid: 4000,
            unreachable: false,
            refuse: None,
            fail_nonblocking: false,
            failures: Vec::new(),
            notices: Vec::new(),
            rows: Vec::new(),
            listeners: HashMap::new(),
            queues: HashMap::new(),
            latency: Duration::ZERO,
            in_flight: 0,
            max_in_flight: 0,
            connects: 0,
            finished: 0,
        }
    }
}

/// A simulated server shared by any number of [`MemoryLink`]s.
///
/// Cloning is cheap and every clone refers to the same server.
///
/// ```
/// use pqlink_postgres::link::{Connector, Link, LinkStatus, MemoryServer};
///
/// let server = MemoryServer::new();
/// let link = server.connect("dbname=test").unwrap();
/// assert_eq!(link.status(), LinkStatus::Ok);
/// ```
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryServer")
            .field("client_encoding", &state.client_encoding)
            .field("server_version", &state.server_version)
            .field("statements", &state.statements.len())
            .finish_non_exhaustive()
    }
}

impl MemoryServer {
    /// A reachable server speaking protocol 3 with `UTF8` as default encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoding new sessions start with.
    pub fn with_encoding(self, encoding: impl Into<String>) -> Self {
        self.lock().client_encoding = encoding.into();
        self
    }

    /// Set the protocol version reported by new links.
    pub fn with_protocol_version(self, version: i32) -> Self {
        self.lock().protocol_version = version;
        self
    }

    /// Set the server version reported by new links.
    pub fn with_server_version(self, version: i32) -> Self {
        self.lock().server_version = version;
        self
    }

    /// Make every link operation take at least `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Make `connect` return no link at all.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make `connect` return links in [`LinkStatus::Bad`] with `message`.
    pub fn refuse_connections(&self, message: impl Into<String>) {
        self.lock().refuse = Some(message.into());
    }

    /// Make `set_nonblocking` fail on every link.
    pub fn fail_nonblocking(&self, fail: bool) {
        self.lock().fail_nonblocking = fail;
    }

    /// Fail every statement starting with `prefix` with a server error.
    pub fn fail_on(&self, prefix: impl Into<String>, error: ServerError) {
        self.lock()
            .failures
            .push((prefix.into(), Injected::Error(error)));
    }

    /// Drop the session when a statement starting with `prefix` is executed.
    pub fn disconnect_on(&self, prefix: impl Into<String>) {
        self.lock()
            .failures
            .push((prefix.into(), Injected::Disconnect));
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Deliver `message` as a notice whenever a statement starting with
    /// `prefix` is executed.
    pub fn notice_on(&self, prefix: impl Into<String>, message: impl Into<String>) {
        self.lock().notices.push((prefix.into(), message.into()));
    }

    /// Answer queries starting with `prefix` with `rows`.
    pub fn respond_with(&self, prefix: impl Into<String>, rows: Vec<Vec<Option<String>>>) {
        self.lock().rows.push((prefix.into(), rows));
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Number of executed statements starting with `prefix`.
    pub fn count_statements(&self, prefix: &str) -> usize {
        self.lock()
            .statements
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    /// Forget the statement log.
    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    /// Highest number of link operations observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Number of links handed out by `connect`.
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Number of links that were finished.
    pub fn finished(&self) -> usize {
        self.lock().finished
    }

    /// Raise a notification on `channel` from outside any session.
    pub fn notify(&self, channel: &str, payload: &str) {
        let mut state = self.lock();
        state.deliver(0, channel, payload);
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServerState {
    fn deliver(&mut self, pid: i32, channel: &str, payload: &str) {
        let Some(listeners) = self.listeners.get(channel) else {
            return;
        };
        for listener in listeners.clone() {
            self.queues.entry(listener).or_default().push(Notification {
                pid,
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
    }

    fn injected(&self, sql: &str) -> Option<&Injected> {
        self.failures
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, injected)| injected)
    }
}

impl Connector for MemoryServer {
    fn connect(&self, dsn: &str) -> Option<Box<dyn Link>> {
        let mut state = self.lock();
        if state.unreachable {
            return None;
        }
        state.connects += 1;
        state.next_pid += 1;
        let (status, error_message) = match &state.refuse {
            Some(message) => (LinkStatus::Bad, message.clone()),
            None => (LinkStatus::Ok, String::new()),
        };
        tracing::trace!(dsn = %dsn, pid = state.next_pid, "memory link created");
        Some(Box::new(MemoryLink {
            server: self.clone(),
            pid: state.next_pid,
            status,
            error_message,
            encoding: state.client_encoding.clone(),
            protocol_version: state.protocol_version,
            server_version: state.server_version,
            nonblocking: false,
            in_transaction: false,
            notice_processor: None,
            pending: Vec::new(),
        }))
    }
}

/// One simulated session on a [`MemoryServer`].
pub struct MemoryLink {
    server: MemoryServer,
    pid: i32,
    status: LinkStatus,
    error_message: String,
    encoding: String,
    protocol_version: i32,
    server_version: i32,
    nonblocking: bool,
    in_transaction: bool,
    notice_processor: Option<NoticeProcessor>,
    pending: Vec<Notification>,
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("pid", &self.pid)
            .field("status", &self.status)
            .field("encoding", &self.encoding)
            .field("nonblocking", &self.nonblocking)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl MemoryLink {
    fn run(&mut self, state: &mut ServerState, sql: &str) -> Option<LinkResult> {
        let statement = sql.trim();
        let upper = statement.to_ascii_uppercase();

        match state.injected(statement) {
            Some(Injected::Error(error)) => return Some(LinkResult::fatal(error.clone())),
            Some(Injected::Disconnect) => {
                self.status = LinkStatus::Bad;
                self.error_message =
                    "server closed the connection unexpectedly".to_string();
                return None;
            }
            None => {}
        }

        if upper.is_empty() {
            return Some(LinkResult {
                status: ExecStatus::EmptyQuery,
                rows: Vec::new(),
                affected: None,
                error: None,
            });
        }

        if upper.starts_with("SHOW CLIENT_ENCODING") {
            return Some(LinkResult::tuples(vec![vec![Some(self.encoding.clone())]]));
        }

        if upper.starts_with("SET CLIENT_ENCODING") {
            let requested = quoted_argument(statement).unwrap_or_default();
            let canonical = requested.to_ascii_uppercase().replace(['-', '_'], "");
            return match SERVER_ENCODINGS
                .iter()
                .find(|name| name.replace('_', "") == canonical)
            {
                Some(name) => {
                    self.encoding = (*name).to_string();
                    Some(LinkResult::command_ok(None))
                }
                None => Some(LinkResult::fatal(ServerError::error(
                    "22023",
                    format!("invalid value for parameter \"client_encoding\": \"{requested}\""),
                ))),
            };
        }

        if upper.starts_with("BEGIN") {
            self.in_transaction = true;
            return Some(LinkResult::command_ok(None));
        }

        if upper.starts_with("COMMIT") || upper.starts_with("ROLLBACK") || upper.starts_with("ABORT")
        {
            self.in_transaction = false;
            return Some(LinkResult::command_ok(None));
        }

        if let Some(channel) = upper.strip_prefix("LISTEN ") {
            let channel = channel.trim().to_ascii_lowercase();
            state.listeners.entry(channel).or_default().insert(self.pid);
            return Some(LinkResult::command_ok(None));
        }

        if let Some(channel) = upper.strip_prefix("UNLISTEN ") {
            let channel = channel.trim().to_ascii_lowercase();
            if channel == "*" {
                for pids in state.listeners.values_mut() {
                    pids.remove(&self.pid);
                }
            } else if let Some(pids) = state.listeners.get_mut(&channel) {
                pids.remove(&self.pid);
            }
            return Some(LinkResult::command_ok(None));
        }

        if upper.starts_with("NOTIFY ") {
            let rest = statement[7..].trim();
            let (channel, payload) = match rest.split_once(',') {
                Some((channel, payload)) => (
                    channel.trim().to_ascii_lowercase(),
                    quoted_argument(payload).unwrap_or_default(),
                ),
                None => (rest.to_ascii_lowercase(), String::new()),
            };
            state.deliver(self.pid, &channel, &payload);
            return Some(LinkResult::command_ok(None));
        }

        if let Some((_, rows)) = state
            .rows
            .iter()
            .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
        {
            return Some(LinkResult::tuples(rows.clone()));
        }

        if upper.starts_with("SELECT") || upper.starts_with("SHOW") {
            return Some(LinkResult::tuples(Vec::new()));
        }

        let affected = ["INSERT", "UPDATE", "DELETE"]
            .iter()
            .any(|verb| upper.starts_with(verb))
            .then_some(1);
        Some(LinkResult::command_ok(affected))
    }
}

/// The first single-quoted argument in `sql`, with doubled quotes collapsed.
fn quoted_argument(sql: &str) -> Option<String> {
    let start = sql.find('\'')? + 1;
    let mut out = String::new();
    let mut chars = sql[start..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
            } else {
                return Some(out);
            }
        } else {
            out.push(c);
        }
    }
    None
}

impl Link for MemoryLink {
    fn status(&self) -> LinkStatus {
        self.status
    }

    fn error_message(&self) -> String {
        self.error_message.clone()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> bool {
        if self.server.lock().fail_nonblocking {
            self.error_message = "could not set socket to non-blocking mode".to_string();
            return false;
        }
        self.nonblocking = nonblocking;
        true
    }

    fn execute(&mut self, sql: &[u8]) -> Option<LinkResult> {
        if self.status == LinkStatus::Bad {
            self.error_message = "no connection to the server".to_string();
            return None;
        }

        let latency = {
            let mut state = self.server.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let text = String::from_utf8_lossy(sql).into_owned();
        let server = self.server.clone();
        let (result, notices) = {
            let mut state = server.lock();
            state.statements.push(text.clone());
            let result = self.run(&mut state, &text);
            let notices: Vec<String> = state
                .notices
                .iter()
                .filter(|(prefix, _)| text.trim().starts_with(prefix.as_str()))
                .map(|(_, message)| message.clone())
                .collect();
            if let Some(queued) = state.queues.remove(&self.pid) {
                self.pending.extend(queued);
            }
            state.in_flight -= 1;
            (result, notices)
        };

        if let Some(processor) = self.notice_processor.as_mut() {
            for notice in &notices {
                processor(notice);
            }
        }
        if let Some(LinkResult {
            error: Some(error), ..
        }) = &result
        {
            self.error_message = error.to_string();
        }
        result
    }

    fn set_notice_processor(&mut self, processor: NoticeProcessor) {
        self.notice_processor = Some(processor);
    }

    fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    fn server_version(&self) -> i32 {
        self.server_version
    }

    fn backend_pid(&self) -> i32 {
        self.pid
    }

    fn consume_input(&mut self) -> bool {
        if self.status == LinkStatus::Bad {
            return false;
        }
        let mut state = self.server.lock();
        if let Some(queued) = state.queues.remove(&self.pid) {
            self.pending.extend(queued);
        }
        true
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }

    fn finish(&mut self) {
        let mut state = self.server.lock();
        state.finished += 1;
        for pids in state.listeners.values_mut() {
            pids.remove(&self.pid);
        }
        state.queues.remove(&self.pid);
        self.status = LinkStatus::Bad;
        self.notice_processor = None;
    }
}
