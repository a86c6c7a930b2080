//! Error types.
//!
//! Two tiers: [`NoteError`] is recoverable and never changes shared state;
//! [`SegmentError`] and [`LockError`] are fatal for the process.
//! [`BoardError`] wraps all three for the session API.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::layout::LayoutError;

/// Recoverable, per-operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteError {
    /// No free slot for a new note.
    Full,
    /// Index out of range or slot inactive.
    NotFound { index: usize },
    /// The slot belongs to another author.
    Unauthorized { index: usize },
}

impl fmt::Display for NoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "board is full"),
            Self::NotFound { index } => write!(f, "no note at index {}", index),
            Self::Unauthorized { index } => {
                write!(f, "note {} belongs to another author", index)
            }
        }
    }
}

impl std::error::Error for NoteError {}

/// Failures of the cross-process lock.
#[derive(Debug)]
pub enum LockError {
    /// One of the initialization calls failed.
    Init {
        step: &'static str,
        source: io::Error,
    },
    /// A robust lock's holder died and the state was never made consistent.
    NotRecoverable,
    /// Any other pthread failure.
    Os {
        op: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { step, source } => write!(f, "{} failed: {}", step, source),
            Self::NotRecoverable => write!(f, "lock is not recoverable"),
            Self::Os { op, source } => write!(f, "{} failed: {}", op, source),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Init { source, .. } | Self::Os { source, .. } => Some(source),
            Self::NotRecoverable => None,
        }
    }
}

/// Failures acquiring, attaching or removing the segment.
#[derive(Debug)]
pub enum SegmentError {
    /// `ftok` failed (or the key path was unusable).
    KeyDerivation { path: PathBuf, source: io::Error },
    /// Exclusive create failed for a reason other than "already exists".
    Create(io::Error),
    /// Looking up the existing segment failed.
    Attach(io::Error),
    /// `shmat` failed.
    Map(io::Error),
    /// The creator failed to initialize the lock.
    Lock(LockError),
    /// The creator never published the segment.
    NotReady { waited: Duration },
    /// The segment header is not ours.
    Layout(LayoutError),
    /// The segment was torn down by its last session while we attached.
    Retired,
    /// `shmctl(IPC_RMID)` failed.
    Remove(io::Error),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyDerivation { path, source } => {
                write!(f, "ftok failed for {}: {}", path.display(), source)
            }
            Self::Create(e) => write!(f, "shmget (create) failed: {}", e),
            Self::Attach(e) => write!(f, "shmget (attach) failed: {}", e),
            Self::Map(e) => write!(f, "shmat failed: {}", e),
            Self::Lock(e) => write!(f, "lock initialization: {}", e),
            Self::NotReady { waited } => {
                write!(f, "segment not initialized after {:?}", waited)
            }
            Self::Layout(e) => write!(f, "layout error: {}", e),
            Self::Retired => write!(f, "segment was torn down while attaching"),
            Self::Remove(e) => write!(f, "shmctl (IPC_RMID) failed: {}", e),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::KeyDerivation { source, .. } => Some(source),
            Self::Create(e) | Self::Attach(e) | Self::Map(e) | Self::Remove(e) => Some(e),
            Self::Lock(e) => Some(e),
            Self::Layout(e) => Some(e),
            Self::NotReady { .. } | Self::Retired => None,
        }
    }
}

/// Any failure surfaced by a [`Session`](crate::Session).
#[derive(Debug)]
pub enum BoardError {
    Note(NoteError),
    Segment(SegmentError),
    Lock(LockError),
}

impl BoardError {
    /// True for operation-level failures after which the session is still
    /// usable and shared state is unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Note(_))
    }

    /// The note error, if this is one.
    pub fn as_note(&self) -> Option<NoteError> {
        match self {
            Self::Note(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Note(e) => write!(f, "{}", e),
            Self::Segment(e) => write!(f, "segment error: {}", e),
            Self::Lock(e) => write!(f, "lock error: {}", e),
        }
    }
}

impl std::error::Error for BoardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Note(e) => Some(e),
            Self::Segment(e) => Some(e),
            Self::Lock(e) => Some(e),
        }
    }
}

impl From<NoteError> for BoardError {
    fn from(e: NoteError) -> Self {
        Self::Note(e)
    }
}

impl From<SegmentError> for BoardError {
    fn from(e: SegmentError) -> Self {
        Self::Segment(e)
    }
}

impl From<LockError> for BoardError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}
