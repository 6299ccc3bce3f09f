//! Transaction bookkeeping for a connection.
//!
//! [`TransactionState`] does no I/O. It decides which statement, if any, has
//! to be sent for a begin, commit or abort, and the connection reports back
//! once the statement was sent.

/// Autocommit: every statement runs in its own implicit transaction.
pub const ISOLATION_LEVEL_AUTOCOMMIT: u32 = 0;
/// Transactions are opened implicitly with READ COMMITTED isolation.
pub const ISOLATION_LEVEL_READ_COMMITTED: u32 = 1;
/// Transactions are opened implicitly with REPEATABLE READ isolation.
pub const ISOLATION_LEVEL_REPEATABLE_READ: u32 = 2;
/// Transactions are opened implicitly with SERIALIZABLE isolation.
pub const ISOLATION_LEVEL_SERIALIZABLE: u32 = 3;

/// Whether a transaction block is open on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// No transaction open
    #[default]
    Ready,
    /// A transaction was begun and not yet committed or aborted
    Begin,
}

/// Isolation level and transaction status of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionState {
    isolation_level: u32,
    status: TransactionStatus,
}

impl Default for TransactionState {
    fn default() -> Self {
        Self::new(ISOLATION_LEVEL_READ_COMMITTED)
    }
}

/// SQL name of an isolation level above autocommit.
pub fn isolation_level_sql(level: u32) -> &'static str {
    match level {
        0 | 1 => "READ COMMITTED",
        2 => "REPEATABLE READ",
        _ => "SERIALIZABLE",
    }
}

impl TransactionState {
    /// Start with no open transaction.
    pub const fn new(isolation_level: u32) -> Self {
        Self {
            isolation_level,
            status: TransactionStatus::Ready,
        }
    }

    pub const fn isolation_level(&self) -> u32 {
        self.isolation_level
    }

    pub const fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Whether a transaction block is open.
    pub const fn in_transaction(&self) -> bool {
        matches!(self.status, TransactionStatus::Begin)
    }

    /// Whether the next statement runs outside an explicit transaction.
    pub const fn is_autocommit(&self) -> bool {
        self.isolation_level == ISOLATION_LEVEL_AUTOCOMMIT
    }

    /// Statement opening a transaction before the next command, if one is needed.
    pub fn begin_sql(&self) -> Option<String> {
        if self.is_autocommit() || self.in_transaction() {
            return None;
        }
        Some(format!(
            "BEGIN; SET TRANSACTION ISOLATION LEVEL {}",
            isolation_level_sql(self.isolation_level)
        ))
    }

    /// Statement committing the open transaction, if any.
    pub fn commit_sql(&self) -> Option<&'static str> {
        self.in_transaction().then_some("COMMIT")
    }

    /// Statement aborting the open transaction, if any.
    pub fn abort_sql(&self) -> Option<&'static str> {
        self.in_transaction().then_some("ROLLBACK")
    }

    /// Record that the begin statement was sent successfully.
    pub fn mark_begun(&mut self) {
        self.status = TransactionStatus::Begin;
    }

    /// Record the end of the transaction, whatever the outcome of the
    /// commit or abort statement was.
    pub fn mark_ready(&mut self) {
        self.status = TransactionStatus::Ready;
    }

    /// Whether switching to `level` must abort the open transaction first.
    ///
    /// Only a change of level while in a transaction-scoped mode needs the
    /// abort; leaving autocommit never does.
    pub const fn switch_requires_abort(&self, level: u32) -> bool {
        self.isolation_level != level && self.isolation_level > ISOLATION_LEVEL_AUTOCOMMIT
    }

    /// Set the isolation level used by the next begin.
    pub fn set_isolation_level(&mut self, level: u32) {
        self.isolation_level = level;
    }
}
