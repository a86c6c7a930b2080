//! Segment memory layout definitions.
//!
//! This module defines the `repr(C)` structures that make up the shared
//! segment. Every attached process maps the same bytes, so these layouts are
//! the wire format between processes.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Segment Header (64 bytes, cache-line aligned)                       │
//! │    magic, version, flags, readiness state                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Cross-process lock (pthread_mutex_t, process-shared)                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Note table (20 × 256-byte records)                                  │
//! │    text[200] | author[32] | timestamp[20] | active: i32              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  session_count: i32                                                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The note table and session counter are only touched while the lock is
//! held. The header is written once by the creator before it flips `state`
//! to [`STATE_READY`]; attachers read it only after observing that store.

use std::fmt;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU32, Ordering, compiler_fence};

use static_assertions::{assert_eq_size, const_assert_eq};

use crate::bounded::{Author, NoteText, Timestamp};
use crate::lock::CrossProcessLock;
use crate::table::{Note, NoteTable};

/// Magic bytes identifying a notebox segment.
pub const MAGIC: [u8; 8] = *b"NOTEBOX\0";

/// Current layout version (major.minor packed into u32).
/// Major = high 16 bits, minor = low 16 bits.
pub const LAYOUT_VERSION: u32 = 1 << 16; // v1.0

/// Number of note slots.
pub const MAX_NOTES: usize = 20;

/// Size of the note body field, terminator included.
pub const TEXT_LEN: usize = 200;

/// Size of the author field, terminator included.
pub const AUTHOR_LEN: usize = 32;

/// Size of the timestamp field, terminator included.
pub const TIMESTAMP_LEN: usize = 20;

// =============================================================================
// Header state & flags
// =============================================================================

/// Fresh segments are zero-filled by the kernel, so this is the initial state.
pub const STATE_UNINIT: u32 = 0;
/// Header, lock and table are initialized; attachers may proceed.
pub const STATE_READY: u32 = 1;
/// The last session has left; the segment is being torn down.
pub const STATE_RETIRED: u32 = 2;

/// The lock was created with robust (owner-death recovery) semantics.
pub const FLAG_ROBUST_LOCK: u32 = 1 << 0;

// =============================================================================
// Slot states (`NoteRecord::active`)
// =============================================================================

pub const SLOT_FREE: i32 = 0;
pub const SLOT_ACTIVE: i32 = 1;
/// Text and timestamp are being overwritten. Only ever observed after the
/// writer died holding the lock.
pub const SLOT_REWRITING: i32 = 2;

// =============================================================================
// Segment Header
// =============================================================================

/// Segment header at the start of the region (64 bytes).
#[repr(C, align(64))]
pub struct SegmentHeader {
    /// Magic bytes: "NOTEBOX\0".
    pub magic: [u8; 8],
    /// Layout version (major.minor packed).
    pub version: u32,
    /// Feature flags.
    pub flags: u32,
    /// One of `STATE_UNINIT`, `STATE_READY`, `STATE_RETIRED`.
    pub state: AtomicU32,
    /// Padding to 64 bytes.
    pub _pad: [u8; 44],
}

assert_eq_size!(SegmentHeader, [u8; 64]);

impl SegmentHeader {
    /// Write the static header fields. Leaves `state` untouched.
    ///
    /// # Safety
    ///
    /// `this` must point to a mapped header that only the caller writes.
    pub unsafe fn init(this: *mut Self, flags: u32) {
        unsafe {
            addr_of_mut!((*this).magic).write(MAGIC);
            addr_of_mut!((*this).version).write(LAYOUT_VERSION);
            addr_of_mut!((*this).flags).write(flags);
            addr_of_mut!((*this)._pad).write([0; 44]);
        }
    }

    /// Make the segment visible to attachers.
    pub fn publish(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    /// Mark the segment as being torn down.
    pub fn retire(&self) {
        self.state.store(STATE_RETIRED, Ordering::Release);
    }

    pub fn state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    /// Validate magic and major version.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.magic != MAGIC {
            return Err(LayoutError::InvalidMagic);
        }
        if self.version >> 16 != LAYOUT_VERSION >> 16 {
            return Err(LayoutError::IncompatibleVersion {
                expected: LAYOUT_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Note Record
// =============================================================================

/// One note slot as stored in the segment (256 bytes).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NoteRecord {
    pub text: [u8; TEXT_LEN],
    pub author: [u8; AUTHOR_LEN],
    pub timestamp: [u8; TIMESTAMP_LEN],
    /// One of `SLOT_FREE`, `SLOT_ACTIVE`, `SLOT_REWRITING`.
    pub active: i32,
}

assert_eq_size!(NoteRecord, [u8; 256]);

impl NoteRecord {
    pub const EMPTY: Self = Self {
        text: [0; TEXT_LEN],
        author: [0; AUTHOR_LEN],
        timestamp: [0; TIMESTAMP_LEN],
        active: SLOT_FREE,
    };

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active != SLOT_FREE
    }

    /// Whether a rewrite was started and never finished.
    #[inline]
    pub fn is_torn(&self) -> bool {
        self.active == SLOT_REWRITING
    }

    /// Overwrite every field of a free slot and mark it active.
    ///
    /// `active` is written last so a writer that dies midway leaves the slot
    /// free.
    pub fn occupy(&mut self, author: &Author, text: &NoteText, stamp: &Timestamp) {
        author.write_to(&mut self.author);
        text.write_to(&mut self.text);
        stamp.write_to(&mut self.timestamp);
        self.set_state(SLOT_ACTIVE);
    }

    /// Replace text and timestamp of an active slot.
    ///
    /// The slot is flagged `SLOT_REWRITING` for the duration, so a writer
    /// that dies midway leaves a slot that [`is_torn`](Self::is_torn).
    pub fn rewrite(&mut self, text: &NoteText, stamp: &Timestamp) {
        self.begin_rewrite();
        text.write_to(&mut self.text);
        stamp.write_to(&mut self.timestamp);
        self.set_state(SLOT_ACTIVE);
    }

    pub(crate) fn begin_rewrite(&mut self) {
        self.set_state(SLOT_REWRITING);
    }

    pub fn vacate(&mut self) {
        self.set_state(SLOT_FREE);
    }

    /// Store the slot state, ordered against the field writes around it.
    ///
    /// Another process only reads the record after taking the lock, possibly
    /// from a holder that died between two of these stores.
    fn set_state(&mut self, state: i32) {
        compiler_fence(Ordering::SeqCst);
        // SAFETY: `active` is a valid, aligned i32 borrowed mutably.
        unsafe { std::ptr::write_volatile(&mut self.active, state) };
        compiler_fence(Ordering::SeqCst);
    }

    pub fn is_owned_by(&self, author: &Author) -> bool {
        author.matches(&self.author)
    }

    /// Decode into an owned note. Callers check `is_active` first.
    pub fn to_note(&self, index: usize) -> Note {
        Note {
            index,
            author: Author::from_bytes(&self.author),
            timestamp: Timestamp::from_bytes(&self.timestamp),
            text: NoteText::from_bytes(&self.text),
        }
    }
}

// =============================================================================
// Board
// =============================================================================

/// Everything guarded by the segment lock.
#[repr(C)]
pub struct BoardState {
    pub notes: NoteTable,
    /// Number of joined sessions across all processes.
    pub session_count: i32,
}

impl BoardState {
    pub const EMPTY: Self = Self {
        notes: NoteTable::EMPTY,
        session_count: 0,
    };
}

/// The complete segment.
#[repr(C)]
pub struct BoardLayout {
    pub header: SegmentHeader,
    pub board: CrossProcessLock<BoardState>,
}

const_assert_eq!(core::mem::size_of::<NoteTable>(), MAX_NOTES * 256);
const_assert_eq!(core::mem::offset_of!(BoardLayout, board), 64);

/// Size in bytes of the segment.
pub const SEGMENT_SIZE: usize = core::mem::size_of::<BoardLayout>();

// =============================================================================
// Errors
// =============================================================================

/// Header validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    InvalidMagic,
    IncompatibleVersion { expected: u32, found: u32 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid magic bytes"),
            Self::IncompatibleVersion { expected, found } => write!(
                f,
                "incompatible layout version: expected {}.{}, found {}.{}",
                expected >> 16,
                expected & 0xffff,
                found >> 16,
                found & 0xffff
            ),
        }
    }
}

impl std::error::Error for LayoutError {}
