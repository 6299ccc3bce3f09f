//! Collection of out-of-band server messages.
//!
//! The link delivers notices through a callback while it waits for server
//! activity. Messages are appended to a log in arrival order, except for
//! messages starting with [`CRITICAL_PREFIX`]: servers speaking the old
//! protocols report some command failures (notably during COPY) only through
//! the notice channel, so those are held as the connection's critical
//! condition and raised by the next operation that checks for it.
//!
//! The prefix test is a compatibility shim. Notice text is translated by the
//! server's locale, so it only catches the untranslated legacy messages.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::link::NoticeProcessor;

/// Notice prefix that marks an error smuggled through the notice channel.
pub const CRITICAL_PREFIX: &str = "ERROR";

/// Accumulates notices for one connection.
#[derive(Debug, Default)]
pub struct NoticeSink {
    notices: Mutex<Vec<String>>,
    critical: Mutex<Option<String>>,
}

impl NoticeSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one message delivered by the link.
    pub fn on_notice(&self, text: &str) {
        if text.starts_with(CRITICAL_PREFIX) {
            tracing::warn!(notice = %text.trim_end(), "error reported through notice channel");
            *lock(&self.critical) = Some(text.to_string());
        } else {
            tracing::debug!(notice = %text.trim_end(), "server notice");
            lock(&self.notices).push(text.to_string());
        }
    }

    /// Snapshot of the routine notice log, oldest first.
    pub fn notices(&self) -> Vec<String> {
        lock(&self.notices).clone()
    }

    /// Number of routine notices received so far.
    pub fn len(&self) -> usize {
        lock(&self.notices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the routine notice log.
    pub fn clear(&self) {
        lock(&self.notices).clear();
    }

    /// The pending critical condition, if any.
    pub fn critical(&self) -> Option<String> {
        lock(&self.critical).clone()
    }

    /// Take the pending critical condition, clearing it.
    pub fn take_critical(&self) -> Option<String> {
        lock(&self.critical).take()
    }

    /// A link callback feeding this sink.
    pub fn processor(self: &Arc<Self>) -> NoticeProcessor {
        let sink = Arc::clone(self);
        Box::new(move |text: &str| sink.on_notice(text))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_notices_keep_arrival_order() {
        let sink = NoticeSink::new();
        sink.on_notice("NOTICE:  first\n");
        sink.on_notice("WARNING:  second\n");
        sink.on_notice("NOTICE:  third\n");

        assert_eq!(
            sink.notices(),
            vec!["NOTICE:  first\n", "WARNING:  second\n", "NOTICE:  third\n"]
        );
        assert_eq!(sink.len(), 3);
        assert!(sink.critical().is_none());
    }

    #[test]
    fn error_prefix_is_escalated() {
        let sink = NoticeSink::new();
        sink.on_notice("ERROR:  relation \"missing\" does not exist\n");

        assert!(sink.is_empty());
        assert_eq!(
            sink.take_critical().as_deref(),
            Some("ERROR:  relation \"missing\" does not exist\n")
        );
        assert!(sink.take_critical().is_none());
    }

    #[test]
    fn prefix_must_be_at_the_start() {
        let sink = NoticeSink::new();
        sink.on_notice("NOTICE:  ERROR in the middle is fine");
        sink.on_notice("error in lowercase is routine");

        assert_eq!(sink.len(), 2);
        assert!(sink.critical().is_none());
    }

    #[test]
    fn processor_feeds_the_sink() {
        let sink = Arc::new(NoticeSink::new());
        let mut processor = sink.processor();
        processor("NOTICE:  hello");
        processor("ERROR:  boom");

        assert_eq!(sink.notices(), vec!["NOTICE:  hello"]);
        assert_eq!(sink.critical().as_deref(), Some("ERROR:  boom"));

        sink.clear();
        assert!(sink.is_empty());
    }
}
