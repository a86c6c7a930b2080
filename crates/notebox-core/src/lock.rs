//! Process-shared mutex embedded in the segment.
//!
//! [`CrossProcessLock<T>`] pairs a `pthread_mutex_t` created with
//! `PTHREAD_PROCESS_SHARED` with the data it guards. Both live in the mapped
//! region, so every process that maps the segment contends on the same lock
//! word regardless of the address it was mapped at.
//!
//! On Linux the mutex can additionally be made robust: if the holder dies,
//! the next locker gets a guard flagged as [`recovered`](LockGuard::recovered)
//! instead of blocking forever.

use std::cell::UnsafeCell;
use std::io;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::ptr::addr_of_mut;

use tracing::warn;

use crate::error::LockError;

/// A mutex usable by unrelated processes sharing the memory it lives in.
#[repr(C)]
pub struct CrossProcessLock<T> {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the pthread mutex, the same
// contract as `std::sync::Mutex`.
unsafe impl<T: Send> Send for CrossProcessLock<T> {}
unsafe impl<T: Send> Sync for CrossProcessLock<T> {}

/// Whether this platform supports owner-death recovery.
pub const fn robust_supported() -> bool {
    cfg!(target_os = "linux")
}

impl<T> CrossProcessLock<T> {
    /// Initialize the mutex and the guarded value in place.
    ///
    /// Returns whether the mutex was created robust, which is only the case
    /// when `robust` is requested and [`robust_supported`] holds.
    ///
    /// # Safety
    ///
    /// - `this` must point to writable memory valid for `Self`.
    /// - No other thread or process may touch the memory until this returns.
    /// - The memory must not hold a live, initialized mutex.
    pub unsafe fn init_in_place(this: *mut Self, value: T, robust: bool) -> Result<bool, LockError> {
        let mutex = unsafe { UnsafeCell::raw_get(addr_of_mut!((*this).mutex)) };
        let robust = robust && robust_supported();

        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check_init("pthread_mutexattr_init", unsafe {
            libc::pthread_mutexattr_init(attr.as_mut_ptr())
        })?;
        let attr = attr.as_mut_ptr();

        let result = (|| {
            check_init("pthread_mutexattr_setpshared", unsafe {
                libc::pthread_mutexattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED)
            })?;
            #[cfg(target_os = "linux")]
            if robust {
                check_init("pthread_mutexattr_setrobust", unsafe {
                    libc::pthread_mutexattr_setrobust(attr, libc::PTHREAD_MUTEX_ROBUST)
                })?;
            }
            check_init("pthread_mutex_init", unsafe {
                libc::pthread_mutex_init(mutex, attr)
            })
        })();

        unsafe { libc::pthread_mutexattr_destroy(attr) };
        result?;

        unsafe { addr_of_mut!((*this).data).write(UnsafeCell::new(value)) };
        Ok(robust)
    }

    /// Block until the lock is held by this thread.
    pub fn lock(&self) -> Result<LockGuard<'_, T>, LockError> {
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        self.guard_for("pthread_mutex_lock", rc)
    }

    /// Take the lock if it is free, without blocking.
    pub fn try_lock(&self) -> Result<Option<LockGuard<'_, T>>, LockError> {
        let rc = unsafe { libc::pthread_mutex_trylock(self.mutex.get()) };
        if rc == libc::EBUSY {
            return Ok(None);
        }
        self.guard_for("pthread_mutex_trylock", rc).map(Some)
    }

    /// De-initialize the mutex.
    ///
    /// # Safety
    ///
    /// No process may use the lock afterwards. Only the last session calls
    /// this, right before the segment is removed.
    pub unsafe fn destroy(&self) -> Result<(), LockError> {
        match unsafe { libc::pthread_mutex_destroy(self.mutex.get()) } {
            0 => Ok(()),
            rc => Err(LockError::Os {
                op: "pthread_mutex_destroy",
                source: io::Error::from_raw_os_error(rc),
            }),
        }
    }

    fn guard_for(&self, op: &'static str, rc: libc::c_int) -> Result<LockGuard<'_, T>, LockError> {
        match rc {
            0 => Ok(LockGuard::new(self, false)),
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                let rc = unsafe { libc::pthread_mutex_consistent(self.mutex.get()) };
                if rc != 0 {
                    unsafe { libc::pthread_mutex_unlock(self.mutex.get()) };
                    return Err(LockError::Os {
                        op: "pthread_mutex_consistent",
                        source: io::Error::from_raw_os_error(rc),
                    });
                }
                warn!("previous lock holder died while holding the lock; recovered");
                Ok(LockGuard::new(self, true))
            }
            #[cfg(target_os = "linux")]
            libc::ENOTRECOVERABLE => Err(LockError::NotRecoverable),
            rc => Err(LockError::Os {
                op,
                source: io::Error::from_raw_os_error(rc),
            }),
        }
    }
}

/// RAII guard; the lock is released when it drops.
///
/// Not `Send`: a pthread mutex must be unlocked by the thread that locked it.
pub struct LockGuard<'a, T> {
    lock: &'a CrossProcessLock<T>,
    recovered: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> LockGuard<'a, T> {
    fn new(lock: &'a CrossProcessLock<T>, recovered: bool) -> Self {
        Self {
            lock,
            recovered,
            _not_send: PhantomData,
        }
    }

    /// True if the previous holder died while holding the lock.
    pub fn recovered(&self) -> bool {
        self.recovered
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { libc::pthread_mutex_unlock(self.lock.mutex.get()) };
    }
}

#[inline]
fn check_init(step: &'static str, rc: libc::c_int) -> Result<(), LockError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(LockError::Init {
            step,
            source: io::Error::from_raw_os_error(rc),
        })
    }
}
