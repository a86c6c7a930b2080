//! A note board shared by independent processes through System V shared memory.
//!
//! One segment holds a fixed table of 20 notes, a session counter and a
//! process-shared pthread mutex that serializes every access. The first
//! process to acquire the segment creates and initializes it; later ones
//! attach. The last session to leave removes it.
//!
//! # Layers
//!
//! - [`bounded`]: length-checked string fields.
//! - [`table`]: slot scanning, authorization and mutation.
//! - [`lock`]: the cross-process mutex.
//! - [`segment`]: key derivation, create-or-attach, detach and removal.
//! - [`session`]: join/leave bookkeeping and the locked board operations.
//!
//! ```no_run
//! use notebox_core::{Author, BoardConfig, NoteText, Session};
//!
//! let session = Session::open(&BoardConfig::default())?;
//! let me = Author::truncate("alice");
//! let index = session.create(&me, &NoteText::truncate("hello"))?;
//! for note in session.list()? {
//!     println!("[{}] {} {}: {}", note.index, note.timestamp, note.author, note.text);
//! }
//! session.delete(index, &me)?;
//! session.leave()?;
//! # Ok::<(), notebox_core::BoardError>(())
//! ```

#[cfg(not(unix))]
compile_error!("notebox-core requires System V shared memory and pthreads");

pub mod bounded;
pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod segment;
pub mod session;
pub mod table;

pub use bounded::{Author, BoundedStr, BoundedStrError, NoteText, Timestamp};
pub use config::BoardConfig;
pub use error::{BoardError, LockError, NoteError, SegmentError};
pub use layout::{LayoutError, MAX_NOTES};
pub use lock::{CrossProcessLock, LockGuard};
pub use segment::{Origin, Segment, SegmentKey};
pub use session::{BoardStats, Departure, Session};
pub use table::{Note, NoteTable};
