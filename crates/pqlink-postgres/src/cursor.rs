//! Cursor handles.
//!
//! A [`Cursor`] holds a back-reference to the connection that created it,
//! and the connection holds only a weak reference to the cursor. When the
//! connection closes it clears the back-reference (orphaning): the cursor
//! stays valid for inspection but every operation that would touch the
//! connection fails with an interface error. Cursors re-check the reference
//! right before each such operation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pqlink_core::{Error, Result};

use crate::connection::PgConnection;
use crate::mogrify::{Params, mogrify};

type Rows = Vec<Vec<Option<String>>>;

#[derive(Debug)]
struct CursorState {
    closed: bool,
    rowcount: i64,
    rows: Rows,
}

/// The part of a cursor the connection can reach.
pub(crate) struct CursorShared {
    conn: Mutex<Option<Arc<PgConnection>>>,
    state: Mutex<CursorState>,
}

impl CursorShared {
    /// Clear the back-reference, handing it to the caller.
    pub(crate) fn orphan(&self) -> Option<Arc<PgConnection>> {
        lock(&self.conn).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cursor executing statements on a [`PgConnection`].
///
/// ```
/// use pqlink_postgres::{MemoryServer, PgConnection, Value};
///
/// let server = MemoryServer::new();
/// let conn = PgConnection::connect(&server, "dbname=test").unwrap();
/// let cursor = conn.cursor().unwrap();
/// cursor.execute("INSERT INTO t (name) VALUES (%s)", [Value::from("it's")]).unwrap();
/// assert_eq!(cursor.rowcount(), 1);
///
/// conn.close();
/// assert!(cursor.is_orphaned());
/// ```
pub struct Cursor {
    shared: Arc<CursorShared>,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("Cursor")
            .field("orphaned", &self.is_orphaned())
            .field("closed", &state.closed)
            .field("rowcount", &state.rowcount)
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub(crate) fn new(conn: Arc<PgConnection>) -> Self {
        Self {
            shared: Arc::new(CursorShared {
                conn: Mutex::new(Some(conn)),
                state: Mutex::new(CursorState {
                    closed: false,
                    rowcount: -1,
                    rows: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<CursorShared> {
        &self.shared
    }

    /// The owning connection, `None` once orphaned.
    pub fn connection(&self) -> Option<Arc<PgConnection>> {
        lock(&self.shared.conn).clone()
    }

    pub fn is_orphaned(&self) -> bool {
        lock(&self.shared.conn).is_none()
    }

    /// Whether [`close`](Self::close) was called.
    pub fn closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// The connection to run the next operation on.
    ///
    /// The slot lock is released before the connection is used, so a
    /// concurrent close can never wait on this cursor.
    fn live_connection(&self) -> Result<Arc<PgConnection>> {
        if self.closed() {
            return Err(Error::interface("cursor already closed"));
        }
        let conn = self
            .connection()
            .ok_or_else(|| Error::interface("cursor is not attached to a connection"))?;
        if conn.closed() {
            return Err(Error::interface("connection already closed"));
        }
        Ok(conn)
    }

    /// Render `query` with `params` exactly as [`execute`](Self::execute)
    /// would send it.
    pub fn mogrify(&self, query: &str, params: impl Into<Params>) -> Result<Vec<u8>> {
        let conn = self.live_connection()?;
        mogrify(query, &params.into(), conn.registry(), Some(&conn))
    }

    /// Render and execute one statement.
    ///
    /// Rendering happens before anything is sent; a parameter that cannot
    /// be adapted fails the call without I/O.
    pub fn execute(&self, query: &str, params: impl Into<Params>) -> Result<()> {
        let conn = self.live_connection()?;
        let sql = mogrify(query, &params.into(), conn.registry(), Some(&conn))?;
        let result = conn.execute(&sql)?;

        let mut state = lock(&self.shared.state);
        state.rowcount = result
            .affected
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1);
        state.rows = result.rows;
        Ok(())
    }

    /// Rows affected or returned by the last statement, -1 when unknown.
    pub fn rowcount(&self) -> i64 {
        lock(&self.shared.state).rowcount
    }

    /// Raw text cells of the last result.
    pub fn rows(&self) -> Rows {
        lock(&self.shared.state).rows.clone()
    }

    /// Close the cursor. The connection stays open.
    pub fn close(&self) {
        let mut state = lock(&self.shared.state);
        state.closed = true;
        state.rows.clear();
    }
}
