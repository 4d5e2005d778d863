//! Engine connections and the scoped-release guard around them.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::value::{QueryResult, SqlValue};

/// One open session with an engine.
///
/// `execute` takes positional `?` parameters; statements without a result set
/// return an empty [`QueryResult`].
#[async_trait]
pub trait DbConnection: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, EngineError>;

    /// `false` when statements run inside an explicit transaction that
    /// [`commit`](Self::commit) or [`rollback`](Self::rollback) ends.
    fn autocommit(&self) -> bool {
        true
    }

    async fn commit(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Owns a connection for the duration of one unit of work.
///
/// Callers run their statements through [`connection`](Self::connection) and
/// hand the outcome to [`finish`](Self::finish), which commits or rolls back
/// and always closes. A scope dropped without `finish` cannot close an async
/// connection and logs a warning instead.
pub struct ScopedConnection {
    conn: Box<dyn DbConnection>,
    label: String,
    released: bool,
}

impl ScopedConnection {
    pub fn new(conn: Box<dyn DbConnection>, label: impl Into<String>) -> Self {
        Self {
            conn,
            label: label.into(),
            released: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn connection(&mut self) -> &mut dyn DbConnection {
        self.conn.as_mut()
    }

    /// End the unit of work and release the connection.
    ///
    /// With autocommit off, a successful outcome is committed and a failed one
    /// rolled back. A commit or close failure turns a successful outcome into
    /// an error via `map_err`. Failures while cleaning up after an error are
    /// logged and the original error is returned.
    pub async fn finish<T, E>(
        mut self,
        outcome: Result<T, E>,
        map_err: impl FnOnce(EngineError) -> E,
    ) -> Result<T, E> {
        self.released = true;
        let mut outcome = outcome;
        let mut cleanup_err = None;

        if !self.conn.autocommit() {
            if outcome.is_ok() {
                if let Err(e) = self.conn.commit().await {
                    cleanup_err = Some(e);
                }
            } else if let Err(e) = self.conn.rollback().await {
                warn!("Rollback on {} failed: {}", self.label, e);
            }
        }

        match self.conn.close().await {
            Ok(()) => debug!("Released connection {}", self.label),
            Err(e) if cleanup_err.is_none() && outcome.is_ok() => cleanup_err = Some(e),
            Err(e) => warn!("Closing connection {} failed: {}", self.label, e),
        }

        if let (Some(e), true) = (cleanup_err, outcome.is_ok()) {
            outcome = Err(map_err(e));
        }
        outcome
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if !self.released {
            warn!("Connection {} dropped without being released", self.label);
        }
    }
}
