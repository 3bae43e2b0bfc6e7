//! Named recursive mutexes shared across processes.
//!
//! The `pthread_mutex_t` itself lives in a POSIX shared-memory object, so
//! every process (and every module within one process) that opens the same
//! name locks the same mutex. The mutex is recursive: the holding thread may
//! re-acquire it any number of times and must release it as often.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;

use crate::error::ShmError;

/// Maximum length of a POSIX shared-memory name on this platform,
/// including the leading `/`.
pub fn max_shm_name_len() -> usize {
    // Under macOS the limit is PSHMNAMLEN, which is much shorter than NAME_MAX.
    #[cfg(target_os = "macos")]
    {
        31
    }
    #[cfg(not(target_os = "macos"))]
    {
        255
    }
}

fn shm_name(name: &str) -> Result<CString, ShmError> {
    let full = format!("/{name}");
    if full.len() > max_shm_name_len() {
        return Err(ShmError::NameTooLong {
            name: name.to_string(),
            max: max_shm_name_len(),
        });
    }
    CString::new(full).map_err(|_| ShmError::Platform {
        op: "shm_open",
        name: name.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "name contains a NUL byte"),
    })
}

/// Open (or create) the named shared-memory object, returning the fd and
/// whether this call created it.
pub(crate) fn open_or_create(c_name: &CString, name: &str) -> Result<(i32, bool), ShmError> {
    let fd = unsafe {
        libc::shm_open(
            c_name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600 as libc::mode_t,
        )
    };
    if fd != -1 {
        return Ok((fd, true));
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EEXIST) {
        return Err(ShmError::Platform {
            op: "shm_open",
            name: name.to_string(),
            source: err,
        });
    }
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600 as libc::mode_t) };
    if fd == -1 {
        return Err(ShmError::platform("shm_open", name));
    }
    Ok((fd, false))
}

/// Process-shared recursive lock identified by a name.
pub struct NamedRecursiveMutex {
    mutex: *mut libc::pthread_mutex_t,
    shm_name: CString,
    name: String,
}

// SAFETY: the underlying pthread mutex is created PTHREAD_PROCESS_SHARED and
// is designed for concurrent use from any thread or process.
unsafe impl Send for NamedRecursiveMutex {}
unsafe impl Sync for NamedRecursiveMutex {}

impl NamedRecursiveMutex {
    /// Create or open the mutex named `name`.
    ///
    /// The first creator initializes the pthread mutex; later openers attach
    /// to the already-initialized object.
    pub fn new(name: &str) -> Result<Self, ShmError> {
        let c_name = shm_name(name)?;
        let size = mem::size_of::<libc::pthread_mutex_t>();

        let (fd, created) = open_or_create(&c_name, name)?;

        if created {
            // ftruncate only on creation: on macOS it fails with EINVAL when
            // the object has already been sized by a previous creator.
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } == -1 {
                let err = ShmError::platform("ftruncate", name);
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        }

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if addr == libc::MAP_FAILED {
            let err = ShmError::platform("mmap", name);
            if created {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            return Err(err);
        }

        let mutex = addr as *mut libc::pthread_mutex_t;

        if created {
            unsafe {
                let mut attr: libc::pthread_mutexattr_t = mem::zeroed();
                libc::pthread_mutexattr_init(&mut attr);
                libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
                let rc = libc::pthread_mutex_init(mutex, &attr);
                libc::pthread_mutexattr_destroy(&mut attr);
                if rc != 0 {
                    libc::munmap(addr, size);
                    libc::shm_unlink(c_name.as_ptr());
                    return Err(ShmError::platform_code("pthread_mutex_init", name, rc));
                }
            }
        }

        Ok(Self {
            mutex,
            shm_name: c_name,
            name: name.to_string(),
        })
    }

    /// Acquire the lock, blocking until available. Recursive: the holding
    /// thread may call this again.
    pub fn lock(&self) -> Result<(), ShmError> {
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex) };
        if rc != 0 {
            return Err(ShmError::platform_code(
                "pthread_mutex_lock",
                &self.name,
                rc,
            ));
        }
        Ok(())
    }

    /// Release one acquisition of the lock.
    pub fn unlock(&self) -> Result<(), ShmError> {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex) };
        if rc != 0 {
            return Err(ShmError::platform_code(
                "pthread_mutex_unlock",
                &self.name,
                rc,
            ));
        }
        Ok(())
    }

    /// Acquire the lock and return a guard that releases it on drop.
    pub fn guard(&self) -> Result<MutexGuard<'_>, ShmError> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedRecursiveMutex {
    fn drop(&mut self) {
        // Leave the pthread object intact for other holders: drop our mapping
        // and retire the name. ENOENT just means another holder unlinked first.
        unsafe {
            libc::munmap(
                self.mutex as *mut libc::c_void,
                mem::size_of::<libc::pthread_mutex_t>(),
            );
        }
        if unsafe { libc::shm_unlink(self.shm_name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                tracing::warn!(name = %self.name, %err, "failed to unlink mutex shared memory");
            }
        }
    }
}

/// Scoped acquisition of a [`NamedRecursiveMutex`].
pub struct MutexGuard<'a> {
    mutex: &'a NamedRecursiveMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.unlock() {
            tracing::error!(name = %self.mutex.name(), %err, "failed to release named mutex");
        }
    }
}
