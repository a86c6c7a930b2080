//! The process's session handle, shared between the command loop and the
//! signal handler.

use std::sync::Arc;

use eyre::eyre;
use notebox_core::{BoardConfig, BoardError, Departure, NoteError, SegmentError, Session};
use parking_lot::Mutex;
use tracing::debug;

/// Attach attempts when the segment is torn down under us.
const OPEN_ATTEMPTS: usize = 3;

/// A cloneable handle on this process's session.
///
/// The session is taken out exactly once, by whichever of the command loop
/// or the signal handler leaves first. Operations after that fail.
#[derive(Clone)]
pub struct Board {
    inner: Arc<Mutex<Option<Session>>>,
}

impl Board {
    /// Acquire and join the board, retrying if the last session tore the
    /// segment down while we were attaching.
    pub fn open(config: &BoardConfig) -> Result<Self, BoardError> {
        let mut attempt = 1;
        loop {
            match Session::open(config) {
                Err(BoardError::Segment(SegmentError::Retired)) if attempt < OPEN_ATTEMPTS => {
                    debug!(attempt, "segment retired while attaching; retrying");
                    attempt += 1;
                }
                result => {
                    return result.map(|session| Self {
                        inner: Arc::new(Mutex::new(Some(session))),
                    });
                }
            }
        }
    }

    /// Run `f` against the session.
    ///
    /// Recoverable note errors come back in the inner result; anything else
    /// is fatal.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&Session) -> Result<T, BoardError>,
    ) -> eyre::Result<Result<T, NoteError>> {
        let guard = self.inner.lock();
        let session = guard
            .as_ref()
            .ok_or_else(|| eyre!("session has already left the board"))?;
        match f(session) {
            Ok(value) => Ok(Ok(value)),
            Err(BoardError::Note(e)) => Ok(Err(e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Leave the board. `None` if someone already did.
    pub fn leave(&self) -> Option<Result<Departure, BoardError>> {
        self.inner.lock().take().map(Session::leave)
    }
}
