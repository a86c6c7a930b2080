//! Session bookkeeping and the board operations.
//!
//! A [`Session`] is this process's membership in the shared board. Joining
//! increments the shared session count; leaving decrements it, and the
//! session that brings it to zero destroys the segment. Decrement and zero
//! check happen under one lock acquisition, so exactly one process tears
//! down.
//!
//! Every board operation takes the segment lock for its full duration and
//! releases it before returning. Nothing here waits on user input.
//!
//! When the lock comes back recovered from a dead holder, any note that
//! holder was in the middle of rewriting is dropped before the caller sees
//! the board. Creates and deletes cannot tear: their slot flips state in a
//! single store.

use tracing::{debug, warn};

use crate::bounded::{Author, NoteText, Timestamp};
use crate::config::BoardConfig;
use crate::error::{BoardError, SegmentError};
use crate::layout::BoardState;
use crate::lock::LockGuard;
use crate::segment::{Origin, Segment};
use crate::table::Note;

/// Outcome of [`Session::leave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// This was the last session; the segment has been destroyed.
    LastOut,
    /// Other sessions remain; only this process detached.
    StillAttached,
}

/// Counters read under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardStats {
    pub sessions: u32,
    pub active_notes: usize,
    pub capacity: usize,
}

/// A joined session on the shared board.
///
/// Dropping a session without calling [`leave`](Self::leave) leaves on a
/// best-effort basis, so every unwinding exit path detaches exactly once.
pub struct Session {
    segment: Option<Segment>,
}

impl Session {
    /// Acquire the segment for `config` and join it.
    pub fn open(config: &BoardConfig) -> Result<Self, BoardError> {
        Self::join(Segment::acquire(config)?)
    }

    /// Register this process as a session on `segment`.
    pub fn join(segment: Segment) -> Result<Self, BoardError> {
        {
            let mut board = lock_board(&segment)?;
            if segment.is_retired() {
                return Err(SegmentError::Retired.into());
            }
            board.session_count += 1;
            debug!(
                sessions = board.session_count,
                origin = ?segment.origin(),
                "joined board"
            );
        }
        Ok(Self {
            segment: Some(segment),
        })
    }

    /// Leave the board, destroying the segment if this was the last session.
    pub fn leave(mut self) -> Result<Departure, BoardError> {
        match self.segment.take() {
            Some(segment) => depart(segment),
            None => Ok(Departure::StillAttached),
        }
    }

    /// Every active note, in index order, as one consistent snapshot.
    pub fn list(&self) -> Result<Vec<Note>, BoardError> {
        Ok(self.lock()?.notes.snapshot())
    }

    /// Active notes written by `author`.
    pub fn list_by(&self, author: &Author) -> Result<Vec<Note>, BoardError> {
        Ok(self.lock()?.notes.snapshot_by(author))
    }

    /// Post a note into the lowest free slot and return its index.
    pub fn create(&self, author: &Author, text: &NoteText) -> Result<usize, BoardError> {
        let stamp = Timestamp::now();
        let index = self.lock()?.notes.create(author, text, &stamp)?;
        debug!(index, %author, "created note");
        Ok(index)
    }

    /// Replace the text of one of `author`'s notes.
    pub fn update(&self, index: usize, author: &Author, text: &NoteText) -> Result<(), BoardError> {
        let stamp = Timestamp::now();
        self.lock()?.notes.update(index, author, text, &stamp)?;
        debug!(index, %author, "updated note");
        Ok(())
    }

    /// Delete one of `author`'s notes.
    pub fn delete(&self, index: usize, author: &Author) -> Result<(), BoardError> {
        self.lock()?.notes.delete(index, author)?;
        debug!(index, %author, "deleted note");
        Ok(())
    }

    pub fn stats(&self) -> Result<BoardStats, BoardError> {
        let board = self.lock()?;
        Ok(BoardStats {
            sessions: board.session_count.max(0) as u32,
            active_notes: board.notes.active_count(),
            capacity: board.notes.capacity(),
        })
    }

    /// Whether this process created the segment.
    pub fn origin(&self) -> Origin {
        self.segment().origin()
    }

    /// Whether the lock recovers from a holder dying.
    pub fn is_robust(&self) -> bool {
        self.segment().is_robust()
    }

    fn lock(&self) -> Result<LockGuard<'_, BoardState>, BoardError> {
        lock_board(self.segment())
    }

    fn segment(&self) -> &Segment {
        self.segment
            .as_ref()
            .unwrap_or_else(|| unreachable!("segment is only taken when the session ends"))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            match depart(segment) {
                Ok(departure) => debug!(?departure, "left board on drop"),
                Err(e) => warn!(error = %e, "failed to leave board on drop"),
            }
        }
    }
}

/// Take the segment lock, repairing the table if the previous holder died.
fn lock_board(segment: &Segment) -> Result<LockGuard<'_, BoardState>, BoardError> {
    let mut board = segment.board().lock()?;
    if board.recovered() {
        let torn = board.notes.drop_torn();
        if !torn.is_empty() {
            warn!(?torn, "dropped notes left half-rewritten by a dead lock holder");
        }
    }
    Ok(board)
}

fn depart(segment: Segment) -> Result<Departure, BoardError> {
    let last_out = {
        let mut board = lock_board(&segment)?;
        board.session_count -= 1;
        let last_out = board.session_count <= 0;
        if last_out {
            board.session_count = 0;
            segment.retire();
        }
        debug!(sessions = board.session_count, "left board");
        last_out
    };

    if last_out {
        segment.destroy()?;
        Ok(Departure::LastOut)
    } else {
        segment.release();
        Ok(Departure::StillAttached)
    }
}
