//! Named fixed-capacity shared memory segments.
//!
//! A `SharedSegment` pairs a POSIX shared-memory mapping with a
//! [`NamedRecursiveMutex`]; both names derive from one identifier (`s_<id>`
//! and `m_<id>`), so cooperating processes agree on the pair. Capacity is
//! fixed at first creation: opening an existing segment adopts its actual
//! size and ignores the requested one.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;

use crate::error::ShmError;
use crate::mutex::{self, MutexGuard, NamedRecursiveMutex, max_shm_name_len};

/// Fixed-capacity shared byte region identified by a name, serialized by a
/// paired named recursive mutex.
pub struct SharedSegment {
    addr: *mut u8,
    capacity: usize,
    shm_name: CString,
    id: String,
    mutex: NamedRecursiveMutex,
}

// SAFETY: the raw mapping is only dereferenced by callers holding the paired
// mutex (see `data`), which serializes access across threads and processes.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create the segment `s_<id>` with the given capacity, or open it if it
    /// already exists (the existing capacity then wins).
    pub fn new(id: &str, capacity: usize) -> Result<Self, ShmError> {
        if capacity == 0 {
            return Err(ShmError::Platform {
                op: "shm_open",
                name: id.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "capacity must be > 0"),
            });
        }

        let mutex = NamedRecursiveMutex::new(&format!("m_{id}"))?;
        let name = format!("s_{id}");
        let full = format!("/{name}");
        if full.len() > max_shm_name_len() {
            return Err(ShmError::NameTooLong {
                name,
                max: max_shm_name_len(),
            });
        }
        let c_name = CString::new(full).map_err(|_| ShmError::Platform {
            op: "shm_open",
            name: name.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "name contains a NUL byte"),
        })?;

        let (addr, actual_capacity) = {
            let _guard = mutex.guard()?;

            let (fd, created) = mutex::open_or_create(&c_name, &name)?;

            let actual = if created {
                if unsafe { libc::ftruncate(fd, capacity as libc::off_t) } == -1 {
                    let err = ShmError::platform("ftruncate", &name);
                    unsafe {
                        libc::close(fd);
                        libc::shm_unlink(c_name.as_ptr());
                    }
                    return Err(err);
                }
                capacity
            } else {
                let mut stat: libc::stat = unsafe { mem::zeroed() };
                if unsafe { libc::fstat(fd, &mut stat) } == -1 {
                    let err = ShmError::platform("fstat", &name);
                    unsafe { libc::close(fd) };
                    return Err(err);
                }
                stat.st_size as usize
            };

            let addr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    actual,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            unsafe { libc::close(fd) };
            if addr == libc::MAP_FAILED {
                let err = ShmError::platform("mmap", &name);
                if created {
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                }
                return Err(err);
            }
            (addr as *mut u8, actual)
        };

        tracing::debug!(id, capacity = actual_capacity, "created or opened shared segment");

        Ok(Self {
            addr,
            capacity: actual_capacity,
            shm_name: c_name,
            id: id.to_string(),
            mutex,
        })
    }

    /// Base address of the mapped region. Only dereference while holding the
    /// guard from [`SharedSegment::lock`].
    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.addr
    }

    /// Fixed capacity of the segment in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire the paired mutex for the duration of the returned guard.
    pub fn lock(&self) -> Result<MutexGuard<'_>, ShmError> {
        self.mutex.guard()
    }

    /// The paired named recursive mutex.
    pub fn mutex(&self) -> &NamedRecursiveMutex {
        &self.mutex
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        let guard = self.mutex.guard();
        if let Err(err) = &guard {
            tracing::error!(id = %self.id, %err, "failed to lock segment mutex during teardown");
        }
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.capacity);
        }
        // Unlink retires the name; the kernel keeps the object alive until
        // the last holder unmaps.
        if unsafe { libc::shm_unlink(self.shm_name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                tracing::warn!(id = %self.id, %err, "failed to unlink segment shared memory");
            }
        }
    }
}
