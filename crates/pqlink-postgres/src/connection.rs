//! The connection core.
//!
//! A [`PgConnection`] owns exactly one [`Link`]. Every operation that touches
//! the link or the transaction, encoding and cursor bookkeeping runs with the
//! connection's mutex held for its full duration, including the blocking
//! wait for the server. Operations on one connection are therefore totally
//! ordered by lock acquisition, and at most one link operation per
//! connection is ever in flight.
//!
//! Cursors are tracked as weak dependents. Closing the connection orphans
//! them before the link is released, so a cursor racing with `close` sees
//! either a live connection or none at all.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use pqlink_core::{Error, OperationalError, Result};

use crate::adapt::{AdapterRegistry, global_registry};
use crate::config::PgConfig;
use crate::cursor::{Cursor, CursorShared};
use crate::encoding::ClientEncoding;
use crate::error::{error_from_notice, error_from_server};
use crate::link::{Connector, ExecStatus, Link, LinkResult, LinkStatus, Notification};
use crate::notice::NoticeSink;
use crate::transaction::{TransactionState, TransactionStatus};

const DATESTYLE_SQL: &str = "SET DATESTYLE TO 'ISO'";
const SHOW_ENCODING_SQL: &str = "SHOW client_encoding";
const MAX_ENCODING_NAME: usize = 24;

fn closed_error() -> Error {
    Error::interface("connection already closed")
}

/// Whether `name` is short and made only of `[A-Za-z0-9_-]`.
fn valid_encoding_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ENCODING_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn link_failure(link: &dyn Link) -> Error {
    let message = link.error_message();
    if message.is_empty() {
        Error::operational("no result from the server")
    } else {
        Error::operational(message.trim_end())
    }
}

/// Mutable state guarded by the connection lock.
struct ConnState {
    /// `Some` exactly while `closed` is false
    link: Option<Box<dyn Link>>,
    closed: bool,
    tx: TransactionState,
    encoding: ClientEncoding,
    cursors: Vec<Weak<CursorShared>>,
    notifies: Vec<Notification>,
}

impl ConnState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(closed_error())
        } else {
            Ok(())
        }
    }

    /// Send one statement and translate its outcome.
    ///
    /// A critical notice recorded while the statement ran takes precedence
    /// over the statement's own status.
    fn run(&mut self, sink: &NoticeSink, sql: &[u8]) -> Result<LinkResult> {
        let link = self.link.as_deref_mut().ok_or_else(closed_error)?;
        tracing::trace!(sql = %String::from_utf8_lossy(sql), "sending statement");
        let result = link.execute(sql);
        self.notifies.extend(link.take_notifications());

        if let Some(critical) = sink.take_critical() {
            return Err(error_from_notice(&critical));
        }
        match result {
            None => Err(link_failure(link)),
            Some(result) if result.status.is_success() => Ok(result),
            Some(result) => Err(match &result.error {
                Some(error) => error_from_server(error),
                None => link_failure(link),
            }),
        }
    }

    fn command(&mut self, sink: &NoticeSink, sql: &str) -> Result<()> {
        self.run(sink, sql.as_bytes()).map(|_| ())
    }

    fn begin_if_needed(&mut self, sink: &NoticeSink) -> Result<()> {
        if let Some(sql) = self.tx.begin_sql() {
            self.command(sink, &sql)?;
            self.tx.mark_begun();
            tracing::debug!(isolation_level = self.tx.isolation_level(), "transaction begun");
        }
        Ok(())
    }

    /// Commit the open transaction, if any. The transaction is over
    /// afterwards whatever the outcome.
    fn commit(&mut self, sink: &NoticeSink) -> Result<()> {
        let outcome = match self.tx.commit_sql() {
            Some(sql) => self.command(sink, sql),
            None => Ok(()),
        };
        self.tx.mark_ready();
        outcome
    }

    /// Abort the open transaction, if any.
    fn abort(&mut self, sink: &NoticeSink) -> Result<()> {
        let outcome = match self.tx.abort_sql() {
            Some(sql) => self.command(sink, sql),
            None => Ok(()),
        };
        self.tx.mark_ready();
        outcome
    }
}

/// One connection to a PostgreSQL server.
///
/// Connections are shared between threads through an [`Arc`]; cursors are
/// created from that `Arc` and must not be shared.
pub struct PgConnection {
    state: Mutex<ConnState>,
    /// Mirror of the closed flag readable without the lock
    closed: AtomicBool,
    notices: Arc<NoticeSink>,
    protocol_version: i32,
    server_version: i32,
    backend_pid: i32,
    registry: Option<Arc<AdapterRegistry>>,
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("backend_pid", &self.backend_pid)
            .field("protocol_version", &self.protocol_version)
            .field("server_version", &self.server_version)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

impl PgConnection {
    /// Connect using a libpq-style DSN.
    ///
    /// On success the session date style is ISO, the client encoding is
    /// known and the link is in non-blocking mode. On failure the link, if
    /// one was created, is released and no connection exists.
    ///
    /// ```
    /// use pqlink_postgres::{MemoryServer, PgConnection};
    ///
    /// let server = MemoryServer::new();
    /// let conn = PgConnection::connect(&server, "dbname=test").unwrap();
    /// assert_eq!(conn.encoding(), "UTF8");
    /// assert_eq!(conn.protocol_version(), 3);
    /// ```
    #[tracing::instrument(level = "debug", skip(connector, dsn))]
    pub fn connect<C: Connector + ?Sized>(connector: &C, dsn: &str) -> Result<Arc<Self>> {
        Self::establish(connector, dsn, None)
    }

    /// Connect using a parsed configuration.
    pub fn connect_config<C: Connector + ?Sized>(
        connector: &C,
        config: &PgConfig,
    ) -> Result<Arc<Self>> {
        tracing::debug!(?config, "connecting");
        Self::establish(connector, &config.to_dsn(), None)
    }

    /// Connect with a connection-scoped adapter registry instead of the
    /// process-wide one.
    #[tracing::instrument(level = "debug", skip(connector, dsn, registry))]
    pub fn connect_with_registry<C: Connector + ?Sized>(
        connector: &C,
        dsn: &str,
        registry: Arc<AdapterRegistry>,
    ) -> Result<Arc<Self>> {
        Self::establish(connector, dsn, Some(registry))
    }

    fn establish<C: Connector + ?Sized>(
        connector: &C,
        dsn: &str,
        registry: Option<Arc<AdapterRegistry>>,
    ) -> Result<Arc<Self>> {
        let Some(mut link) = connector.connect(dsn) else {
            return Err(Error::operational("PQconnectdb() failed"));
        };
        if link.status() == LinkStatus::Bad {
            let err = link_failure(&*link);
            link.finish();
            return Err(err);
        }

        let notices = Arc::new(NoticeSink::new());
        link.set_notice_processor(notices.processor());

        match Self::setup(&mut *link) {
            Ok(encoding) => {
                let conn = PgConnection {
                    protocol_version: link.protocol_version(),
                    server_version: link.server_version(),
                    backend_pid: link.backend_pid(),
                    closed: AtomicBool::new(false),
                    notices,
                    registry,
                    state: Mutex::new(ConnState {
                        link: Some(link),
                        closed: false,
                        tx: TransactionState::default(),
                        encoding: encoding.clone(),
                        cursors: Vec::new(),
                        notifies: Vec::new(),
                    }),
                };
                tracing::debug!(
                    backend_pid = conn.backend_pid,
                    protocol_version = conn.protocol_version,
                    encoding = %encoding,
                    "connected"
                );
                Ok(Arc::new(conn))
            }
            Err(err) => {
                link.finish();
                Err(err)
            }
        }
    }

    /// Session setup run before anyone else can see the link.
    fn setup(link: &mut dyn Link) -> Result<ClientEncoding> {
        tracing::trace!(sql = DATESTYLE_SQL, "sending statement");
        match link.execute(DATESTYLE_SQL.as_bytes()) {
            Some(result) if result.status == ExecStatus::CommandOk => {}
            _ => return Err(Error::operational("can't set datestyle to ISO")),
        }

        tracing::trace!(sql = SHOW_ENCODING_SQL, "sending statement");
        let name = match link.execute(SHOW_ENCODING_SQL.as_bytes()) {
            Some(result) if result.status == ExecStatus::TuplesOk => {
                result.value(0, 0).map(str::to_string)
            }
            _ => None,
        };
        let Some(name) = name else {
            return Err(Error::operational("can't fetch client_encoding"));
        };
        let encoding = ClientEncoding::from_server(&name);
        if !encoding.has_codec() {
            tracing::warn!(
                encoding = %encoding,
                "no codec for the server encoding, only ASCII text can be sent"
            );
        }

        if !link.set_nonblocking(true) {
            return Err(Error::operational("PQsetnonblocking() failed"));
        }
        Ok(encoding)
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the connection.
    ///
    /// Idempotent. The open transaction, if any, is rolled back on a best
    /// effort basis, every dependent cursor is orphaned and then the link is
    /// released.
    #[tracing::instrument(level = "debug", skip(self), fields(backend_pid = self.backend_pid))]
    pub fn close(&self) {
        let mut guard = self.lock();
        if guard.closed {
            return;
        }
        guard.closed = true;
        self.closed.store(true, Ordering::Release);

        if let Err(e) = guard.abort(&self.notices) {
            tracing::warn!(error = %e, "rollback during close failed, ignoring");
        }

        // Detached connection handles are dropped after the lock is released.
        let detached: Vec<Arc<PgConnection>> = guard
            .cursors
            .drain(..)
            .filter_map(|cursor| cursor.upgrade())
            .filter_map(|cursor| cursor.orphan())
            .collect();
        tracing::debug!(orphaned = detached.len(), "cursors orphaned");

        if let Some(mut link) = guard.link.take() {
            link.finish();
            tracing::debug!("link released");
        }
        drop(guard);
        drop(detached);
    }

    /// Whether [`close`](Self::close) was called.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Commit the current transaction.
    ///
    /// A no-op when no transaction is open. The transaction is over after
    /// the call even when the commit failed.
    #[tracing::instrument(level = "debug", skip(self), fields(backend_pid = self.backend_pid))]
    pub fn commit(&self) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.commit(&self.notices)
    }

    /// Roll back the current transaction. A no-op when none is open.
    #[tracing::instrument(level = "debug", skip(self), fields(backend_pid = self.backend_pid))]
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.abort(&self.notices)
    }

    /// Switch the isolation level used for the next transaction.
    ///
    /// Moving away from a transaction-scoped level rolls back the open
    /// transaction first. The level is changed even if that rollback fails;
    /// the rollback error is returned.
    #[tracing::instrument(level = "debug", skip(self), fields(backend_pid = self.backend_pid))]
    pub fn set_isolation_level(&self, level: u32) -> Result<()> {
        let mut state = self.lock();
        state.ensure_open()?;

        let outcome = if state.tx.switch_requires_abort(level) {
            state.abort(&self.notices)
        } else {
            Ok(())
        };
        let previous = state.tx.isolation_level();
        state.tx.set_isolation_level(level);
        tracing::debug!(previous, level, "isolation level switched");
        outcome
    }

    /// Change the client encoding.
    ///
    /// The open transaction is rolled back first. The name must be a short
    /// identifier naming a server encoding; both are checked before anything
    /// is sent. If the server refuses the
    /// change, the encoding the server reports afterwards is kept, falling
    /// back to the previous one.
    ///
    /// Must not be called while a non-blocking operation is outstanding on
    /// this connection; that is the caller's responsibility.
    #[tracing::instrument(level = "debug", skip(self), fields(backend_pid = self.backend_pid))]
    pub fn set_client_encoding(&self, name: &str) -> Result<()> {
        if !valid_encoding_name(name) {
            return Err(Error::programming(format!(
                "invalid encoding name: {name:?}"
            )));
        }
        let target = ClientEncoding::lookup(name)?;

        let mut state = self.lock();
        state.ensure_open()?;
        state.abort(&self.notices)?;

        let sql = format!("SET client_encoding = '{name}'");
        match state.command(&self.notices, &sql) {
            Ok(()) => {
                tracing::debug!(encoding = %target, "client encoding changed");
                state.encoding = target;
                Ok(())
            }
            Err(cause) => {
                if let Ok(result) = state.run(&self.notices, SHOW_ENCODING_SQL.as_bytes()) {
                    if let Some(current) = result
                        .value(0, 0)
                        .filter(|name| valid_encoding_name(name))
                        .map(ClientEncoding::from_server)
                    {
                        state.encoding = current;
                    }
                }
                tracing::debug!(
                    requested = name,
                    encoding = %state.encoding,
                    error = %cause,
                    "client encoding change refused"
                );
                Err(Error::Operational(OperationalError {
                    message: format!("can't set encoding to '{name}'"),
                    sqlstate: cause.sqlstate().map(str::to_string),
                    source: Some(Box::new(cause)),
                }))
            }
        }
    }

    /// Execute one rendered statement.
    ///
    /// Opens a transaction first when the isolation level asks for one and
    /// none is open.
    pub fn execute(&self, sql: &[u8]) -> Result<LinkResult> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.begin_if_needed(&self.notices)?;
        state.run(&self.notices, sql)
    }

    /// Collect notifications that arrived without running a statement.
    ///
    /// Returns how many were received.
    pub fn poll(&self) -> Result<usize> {
        let mut guard = self.lock();
        guard.ensure_open()?;
        let state = &mut *guard;
        let link = state.link.as_deref_mut().ok_or_else(closed_error)?;
        if !link.consume_input() {
            return Err(link_failure(link));
        }
        let received = link.take_notifications();
        let count = received.len();
        state.notifies.extend(received);
        Ok(count)
    }

    /// Notifications received so far, oldest first.
    pub fn notifies(&self) -> Vec<Notification> {
        self.lock().notifies.clone()
    }

    /// Drain the received notifications.
    pub fn take_notifies(&self) -> Vec<Notification> {
        std::mem::take(&mut self.lock().notifies)
    }

    /// Routine notices received so far, oldest first.
    pub fn notices(&self) -> Vec<String> {
        self.notices.notices()
    }

    /// Forget the routine notices received so far.
    pub fn clear_notices(&self) {
        self.notices.clear();
    }

    /// Create a cursor bound to this connection.
    pub fn cursor(self: &Arc<Self>) -> Result<Cursor> {
        let mut state = self.lock();
        state.ensure_open()?;
        let cursor = Cursor::new(Arc::clone(self));
        state.cursors.retain(|weak| weak.strong_count() > 0);
        state.cursors.push(Arc::downgrade(cursor.shared()));
        Ok(cursor)
    }

    /// Canonical name of the client encoding, e.g. `UTF8`.
    pub fn encoding(&self) -> String {
        self.lock().encoding.name().to_string()
    }

    pub fn client_encoding(&self) -> ClientEncoding {
        self.lock().encoding.clone()
    }

    pub fn isolation_level(&self) -> u32 {
        self.lock().tx.isolation_level()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.lock().tx.status()
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn server_version(&self) -> i32 {
        self.server_version
    }

    /// Process id of the server backend.
    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// The adapter registry used to render parameters for this connection.
    pub fn registry(&self) -> &AdapterRegistry {
        self.registry.as_deref().unwrap_or_else(|| global_registry())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.close();
    }
}
