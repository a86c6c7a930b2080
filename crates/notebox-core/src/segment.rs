//! System V shared memory segment lifecycle.
//!
//! - [`Segment::acquire`]: exclusive create, falling back to attach when the
//!   segment already exists. Only the creator initializes the header, the
//!   lock and the table.
//! - [`Segment::release`]: detach this process's mapping.
//! - [`Segment::destroy`]: de-initialize the lock and remove the segment.
//!   Reserved for the last session (see [`Session`](crate::Session)).

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{NonNull, addr_of_mut};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::BoardConfig;
use crate::error::SegmentError;
use crate::layout::{
    BoardLayout, BoardState, FLAG_ROBUST_LOCK, SEGMENT_SIZE, STATE_READY, STATE_RETIRED,
    SegmentHeader,
};
use crate::lock::CrossProcessLock;

/// Poll interval while waiting for a concurrent creator.
const READY_POLL: Duration = Duration::from_millis(1);

/// A System V IPC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey(libc::key_t);

impl SegmentKey {
    /// Derive the key with `ftok`. `path` must exist.
    pub fn derive(path: &Path, project_id: u8) -> Result<Self, SegmentError> {
        let key_error = |source| SegmentError::KeyDerivation {
            path: path.to_path_buf(),
            source,
        };
        if project_id == 0 {
            return Err(key_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "project id must be non-zero",
            )));
        }
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            key_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path contains a NUL byte",
            ))
        })?;

        let key = unsafe { libc::ftok(c_path.as_ptr(), project_id as libc::c_int) };
        if key == -1 {
            return Err(key_error(io::Error::last_os_error()));
        }
        Ok(Self(key))
    }

    pub fn raw(&self) -> libc::key_t {
        self.0
    }
}

/// How this process came to hold the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This process created and initialized it.
    Created,
    /// It already existed and this process attached to it.
    Attached,
}

/// This process's attachment (`shmat`) to the segment.
struct Mapping {
    base: NonNull<BoardLayout>,
}

impl Mapping {
    fn attach(shm_id: libc::c_int) -> Result<Self, SegmentError> {
        let addr = unsafe { libc::shmat(shm_id, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(SegmentError::Map(io::Error::last_os_error()));
        }
        NonNull::new(addr as *mut BoardLayout)
            .map(|base| Self { base })
            .ok_or_else(|| SegmentError::Map(io::Error::other("shmat returned null")))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base was returned by shmat and is detached exactly once here.
        let rc = unsafe { libc::shmdt(self.base.as_ptr() as *const libc::c_void) };
        if rc == -1 {
            warn!(error = %io::Error::last_os_error(), "shmdt failed");
        }
    }
}

/// One process's handle on the shared board segment.
pub struct Segment {
    mapping: Mapping,
    shm_id: libc::c_int,
    key: SegmentKey,
    origin: Origin,
}

// SAFETY: the mapping is process-wide, not thread-local; all access to the
// shared state goes through the process-shared lock.
unsafe impl Send for Segment {}

impl Segment {
    /// Create the segment, or attach to it if it already exists.
    pub fn acquire(config: &BoardConfig) -> Result<Self, SegmentError> {
        let key = SegmentKey::derive(&config.key_path, config.project_id)?;
        let mode = (config.permissions & 0o777) as libc::c_int;

        let shm_id =
            unsafe { libc::shmget(key.raw(), SEGMENT_SIZE, libc::IPC_CREAT | libc::IPC_EXCL | mode) };
        if shm_id != -1 {
            return Self::initialize(key, shm_id, config);
        }

        // Read errno straight from the exclusive create; nothing may run in
        // between.
        let create_error = io::Error::last_os_error();
        if create_error.raw_os_error() != Some(libc::EEXIST) {
            return Err(SegmentError::Create(create_error));
        }
        Self::attach(key, mode, config.ready_timeout)
    }

    fn initialize(key: SegmentKey, shm_id: libc::c_int, config: &BoardConfig) -> Result<Self, SegmentError> {
        let mapping = match Mapping::attach(shm_id) {
            Ok(mapping) => mapping,
            Err(e) => {
                remove_id(shm_id).ok();
                return Err(e);
            }
        };
        let layout = mapping.base.as_ptr();

        // SAFETY: the segment was created exclusively by this call, so no
        // other process has seen a READY header yet.
        let robust = unsafe {
            CrossProcessLock::init_in_place(
                addr_of_mut!((*layout).board),
                BoardState::EMPTY,
                config.robust_lock,
            )
        };
        let robust = match robust {
            Ok(robust) => robust,
            Err(e) => {
                drop(mapping);
                remove_id(shm_id).ok();
                return Err(SegmentError::Lock(e));
            }
        };

        let flags = if robust { FLAG_ROBUST_LOCK } else { 0 };
        unsafe {
            let header = addr_of_mut!((*layout).header);
            SegmentHeader::init(header, flags);
            (*header).publish();
        }

        debug!(key = key.raw(), shm_id, robust, "created segment");
        Ok(Self {
            mapping,
            shm_id,
            key,
            origin: Origin::Created,
        })
    }

    fn attach(key: SegmentKey, mode: libc::c_int, timeout: Duration) -> Result<Self, SegmentError> {
        let shm_id = unsafe { libc::shmget(key.raw(), SEGMENT_SIZE, mode) };
        if shm_id == -1 {
            return Err(SegmentError::Attach(io::Error::last_os_error()));
        }
        let mapping = Mapping::attach(shm_id)?;
        let segment = Self {
            mapping,
            shm_id,
            key,
            origin: Origin::Attached,
        };

        let deadline = Instant::now() + timeout;
        loop {
            match segment.header().state() {
                STATE_READY => break,
                STATE_RETIRED => return Err(SegmentError::Retired),
                _ if Instant::now() >= deadline => {
                    return Err(SegmentError::NotReady { waited: timeout });
                }
                _ => std::thread::sleep(READY_POLL),
            }
        }
        segment.header().validate().map_err(SegmentError::Layout)?;

        debug!(key = key.raw(), shm_id, "attached to segment");
        Ok(segment)
    }

    /// Detach this process only. Other processes are unaffected.
    pub fn release(self) {
        trace!(shm_id = self.shm_id, "releasing segment");
    }

    /// De-initialize the lock, mark the segment for removal and detach.
    ///
    /// Only the last session may call this; the lock must not be held.
    pub fn destroy(self) -> Result<(), SegmentError> {
        // A late attacher may still hold the lock. Removal proceeds anyway.
        if let Err(e) = unsafe { self.board().destroy() } {
            warn!(error = %e, "lock teardown failed");
        }
        remove_id(self.shm_id)?;
        debug!(key = self.key.raw(), shm_id = self.shm_id, "destroyed segment");
        Ok(())
    }

    /// Remove the segment for `config`'s key no matter who is attached.
    ///
    /// Processes still attached keep their mapping until they detach. Returns
    /// `false` if no segment existed.
    pub fn purge(config: &BoardConfig) -> Result<bool, SegmentError> {
        let key = SegmentKey::derive(&config.key_path, config.project_id)?;
        let shm_id = unsafe { libc::shmget(key.raw(), 0, 0) };
        if shm_id == -1 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(libc::ENOENT) {
                return Ok(false);
            }
            return Err(SegmentError::Attach(e));
        }
        remove_id(shm_id)?;
        debug!(key = key.raw(), shm_id, "purged segment");
        Ok(true)
    }

    /// The lock and the state it guards.
    pub fn board(&self) -> &CrossProcessLock<BoardState> {
        &self.layout().board
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn key(&self) -> SegmentKey {
        self.key
    }

    pub fn id(&self) -> libc::c_int {
        self.shm_id
    }

    /// Whether the creator set the lock up with owner-death recovery.
    pub fn is_robust(&self) -> bool {
        self.header().flags & FLAG_ROBUST_LOCK != 0
    }

    /// Whether the last session has started tearing the segment down.
    pub fn is_retired(&self) -> bool {
        self.header().state() == STATE_RETIRED
    }

    pub(crate) fn retire(&self) {
        self.header().retire();
    }

    fn header(&self) -> &SegmentHeader {
        &self.layout().header
    }

    fn layout(&self) -> &BoardLayout {
        // SAFETY: the mapping stays attached for as long as `self` lives.
        unsafe { self.mapping.base.as_ref() }
    }
}

fn remove_id(shm_id: libc::c_int) -> Result<(), SegmentError> {
    let rc = unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc == -1 {
        return Err(SegmentError::Remove(io::Error::last_os_error()));
    }
    Ok(())
}
