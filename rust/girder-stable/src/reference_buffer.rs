//! Byte buffers with one reference count per process, keyed by address.
//!
//! A module compiled by one toolchain can hand a raw block to a module
//! compiled by another; both resolve the block's count through the same
//! shared map, so the count never forks. The map is a [`StableMap`] named
//! after the process id, held through the singleton registry — shared-memory
//! machinery, but deliberately per-process.
//!
//! The blocks themselves are plain `malloc` allocations; only the counts
//! live in shared memory. The sentinel key 0 in the map stores the initial
//! count for newly allocated blocks, which [`DelayDeallocation`] scopes
//! raise while active.

use std::collections::BTreeSet;
use std::ptr;
use std::sync::Arc;

use girder_lifecycle::singleton;

use crate::error::StableError;
use crate::map::StableMap;

const RC_MAP_SINGLETON: &str = "girder.reference_buffer.use_count";
const RC_MAP_ENV: &str = "CBEAM_SRB_MAP_BYTES";
const RC_MAP_DEFAULT_BYTES: usize = 64 * 1024;
const RC_MAP_MIN_BYTES: usize = 1024;
/// Map key 0 is never a block address; it stores the initial count.
const INITIAL_COUNT_KEY: usize = 0;

type UseCountMap = StableMap<usize, i64>;

pub(crate) fn rc_map_bytes() -> usize {
    match std::env::var(RC_MAP_ENV) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) if value as usize >= RC_MAP_MIN_BYTES => value as usize,
            _ => RC_MAP_DEFAULT_BYTES,
        },
        Err(_) => RC_MAP_DEFAULT_BYTES,
    }
}

fn use_count_map() -> Result<Option<Arc<UseCountMap>>, StableError> {
    singleton::get_or_try_init(RC_MAP_SINGLETON, || {
        // Named after the process so the map is per-process even though it
        // uses shared-memory machinery: every module loaded into this
        // process resolves the same map, and no other process does.
        let id = format!("{}.srb", std::process::id());
        StableMap::new(&id, rc_map_bytes())
    })
}

fn require_use_count_map() -> Result<Arc<UseCountMap>, StableError> {
    use_count_map()?.ok_or(StableError::ShuttingDown)
}

fn initial_use_count(rc: &UseCountMap) -> Result<i64, StableError> {
    rc.at_or_default(&INITIAL_COUNT_KEY, 1)
}

/// A byte buffer whose reference count has cross-module identity.
///
/// Cloning aliases the block and bumps its count; dropping the last holder
/// frees it. Appending while other holders exist copies first (the old
/// bytes stay untouched for everyone else).
pub struct StableReferenceBuffer {
    base: *mut u8,
    len: usize,
    rc: Arc<UseCountMap>,
}

// SAFETY: every count transition and every free happens under the count
// map's named recursive mutex, so instances can move between threads.
unsafe impl Send for StableReferenceBuffer {}

impl StableReferenceBuffer {
    /// An instance holding no block. Use [`append`](Self::append) to
    /// allocate one.
    pub fn new() -> Result<Self, StableError> {
        Ok(Self {
            base: ptr::null_mut(),
            len: 0,
            rc: require_use_count_map()?,
        })
    }

    /// Allocate a block of `count * elem_size` bytes (uninitialized) and
    /// register it with the current initial count.
    pub fn allocate(count: usize, elem_size: usize) -> Result<Self, StableError> {
        let bytes = count
            .checked_mul(elem_size)
            .ok_or_else(|| StableError::InvalidArgument("allocation size overflows".into()))?;
        if bytes == 0 {
            return Self::new();
        }
        let rc = require_use_count_map()?;
        let guard = rc.lock()?;

        let base = unsafe { libc::malloc(bytes) } as *mut u8;
        if base.is_null() {
            return Err(StableError::OutOfMemory { requested: bytes });
        }
        let initial = initial_use_count(&rc)?;
        if let Err(err) = rc.update_or_insert(base as usize, |count| *count += 1, initial) {
            unsafe { libc::free(base as *mut libc::c_void) };
            return Err(err);
        }
        tracing::debug!(addr = base as usize, count = initial, "allocated block");
        drop(guard);
        Ok(Self {
            base,
            len: bytes,
            rc,
        })
    }

    /// Adopt a raw address previously handed out by another instance,
    /// bumping its count. The length is unknown (reported as 0), and
    /// [`append`](Self::append) is rejected on such instances.
    pub fn from_raw(addr: *const u8) -> Result<Self, StableError> {
        if addr.is_null() {
            return Err(StableError::InvalidArgument("null address".into()));
        }
        let rc = require_use_count_map()?;
        let guard = rc.lock()?;
        match rc.update(&(addr as usize), |count| *count += 1) {
            Ok(count) => {
                tracing::debug!(addr = addr as usize, count, "adopted raw address");
                drop(guard);
                Ok(Self {
                    base: addr as *mut u8,
                    len: 0,
                    rc,
                })
            }
            Err(StableError::KeyMissing) => Err(StableError::InvalidArgument(format!(
                "address {addr:p} is not managed by any reference buffer"
            ))),
            Err(err) => Err(err),
        }
    }

    /// Raw pointer to the block, or null for an empty instance. The caller
    /// must keep a reference (or a delay scope) alive while using it.
    pub fn get(&self) -> *mut u8 {
        self.base
    }

    /// Like [`get`](Self::get), but refuses to hand out the pointer when
    /// this instance is the only thing keeping the block alive.
    pub fn safe_get(&self) -> *mut u8 {
        if self.use_count() <= 1 {
            tracing::error!(
                "refusing raw pointer access with use_count <= 1: the block would die with \
                 this instance; hold another reference or a delay-deallocation scope"
            );
            return ptr::null_mut();
        }
        self.base
    }

    /// Length in bytes; 0 for empty instances and for foreign raw wrappers.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of instances referring to this block, 0 when none is held.
    pub fn use_count(&self) -> usize {
        if self.base.is_null() {
            return 0;
        }
        match self.rc.at_or_default(&(self.base as usize), 0) {
            Ok(count) if count > 0 => count as usize,
            Ok(_) => 0,
            Err(err) => {
                tracing::error!(%err, "failed to read use count");
                0
            }
        }
    }

    /// Whether `addr` is currently a managed block address.
    pub fn is_known(addr: *const u8) -> bool {
        if addr.is_null() {
            return false;
        }
        match use_count_map() {
            Ok(Some(rc)) => rc.count(&(addr as usize)).map(|n| n == 1).unwrap_or(false),
            _ => false,
        }
    }

    /// Append bytes to the block, allocating it if absent.
    ///
    /// If other instances still reference the block this copies into a new
    /// allocation first, so their bytes never move under them. An exclusive
    /// owner reallocates in place; if the address changes, the count moves
    /// with it.
    pub fn append(&mut self, data: &[u8]) -> Result<(), StableError> {
        let rc = Arc::clone(&self.rc);
        let _guard = rc.lock()?;

        if self.len == 0 && !self.base.is_null() {
            return Err(StableError::UnknownLength);
        }
        if data.is_empty() {
            return Ok(());
        }

        let shared = !self.base.is_null() && rc.at_or_default(&(self.base as usize), 0)? > 1;
        let new_len = self.len + data.len();

        if shared {
            let new_base = unsafe { libc::malloc(new_len) } as *mut u8;
            if new_base.is_null() {
                return Err(StableError::OutOfMemory { requested: new_len });
            }
            unsafe {
                ptr::copy_nonoverlapping(self.base, new_base, self.len);
                ptr::copy_nonoverlapping(data.as_ptr(), new_base.add(self.len), data.len());
            }

            let old_addr = self.base as usize;
            let remaining = match rc.update(&old_addr, |count| *count -= 1) {
                Ok(count) => count,
                Err(StableError::KeyMissing) => 0,
                Err(err) => {
                    unsafe { libc::free(new_base as *mut libc::c_void) };
                    return Err(err);
                }
            };
            if remaining == 0 {
                unsafe { libc::free(self.base as *mut libc::c_void) };
                rc.erase(&old_addr)?;
            } else if remaining < 0 {
                tracing::error!(addr = old_addr, count = remaining, "negative use count");
                debug_assert!(remaining >= 0, "negative use count after detach");
            }

            self.base = new_base;
            self.len = new_len;
            rc.insert(self.base as usize, initial_use_count(&rc)?)?;
        } else {
            let old_base = self.base;
            let old_count = if old_base.is_null() {
                0
            } else {
                rc.at_or_default(&(old_base as usize), initial_use_count(&rc)?)?
            };

            let new_base =
                unsafe { libc::realloc(self.base as *mut libc::c_void, new_len) } as *mut u8;
            if new_base.is_null() {
                return Err(StableError::OutOfMemory { requested: new_len });
            }
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), new_base.add(self.len), data.len());
            }
            self.base = new_base;
            self.len = new_len;

            if self.base != old_base {
                if old_base.is_null() {
                    rc.insert(self.base as usize, initial_use_count(&rc)?)?;
                } else {
                    // the move carries the count to the new address
                    rc.insert(self.base as usize, old_count)?;
                    rc.erase(&(old_base as usize))?;
                }
            }
        }
        Ok(())
    }

    /// Drop this instance's reference, freeing the block if it was the last.
    pub fn reset(&mut self) {
        if self.base.is_null() {
            self.len = 0;
            return;
        }
        let addr = self.base as usize;
        let rc = Arc::clone(&self.rc);
        let released: Result<(), StableError> = (|| {
            let _guard = rc.lock()?;
            if rc.count(&addr)? == 1 {
                let remaining = rc.update(&addr, |count| *count -= 1)?;
                if remaining == 0 {
                    tracing::debug!(addr, "deallocating block");
                    rc.erase(&addr)?;
                    unsafe { libc::free(self.base as *mut libc::c_void) };
                } else if remaining < 0 {
                    tracing::error!(addr, count = remaining, "negative use count on release");
                    debug_assert!(remaining >= 0, "negative use count on release");
                } else {
                    tracing::debug!(addr, remaining, "removed reference");
                }
            }
            Ok(())
        })();
        if let Err(err) = released {
            tracing::error!(%err, addr, "failed to release block reference");
        }
        self.base = ptr::null_mut();
        self.len = 0;
    }

    /// Exchange blocks with another instance. Counts are unaffected: each
    /// block keeps its holders, they just trade hands.
    pub fn swap(&mut self, other: &mut Self) -> Result<(), StableError> {
        let _guard = self.rc.lock()?;
        std::mem::swap(&mut self.base, &mut other.base);
        std::mem::swap(&mut self.len, &mut other.len);
        Ok(())
    }
}

impl Clone for StableReferenceBuffer {
    /// Alias the block and bump its count. Cloning an empty instance yields
    /// another empty instance.
    fn clone(&self) -> Self {
        if !self.base.is_null() {
            let addr = self.base as usize;
            match self.rc.update(&addr, |count| *count += 1) {
                Ok(count) => tracing::debug!(addr, count, "added reference"),
                Err(err) => tracing::error!(%err, addr, "failed to add reference on clone"),
            }
        }
        Self {
            base: self.base,
            len: self.len,
            rc: Arc::clone(&self.rc),
        }
    }
}

impl Drop for StableReferenceBuffer {
    fn drop(&mut self) {
        self.reset();
    }
}

/// While at least one of these scopes is alive, blocks created inside it
/// survive until the scope exits even if every instance referencing them is
/// reset — each active scope contributes one extra initial reference.
///
/// Scopes nest; exits never panic.
pub struct DelayDeallocation {
    rc: Arc<UseCountMap>,
    preexisting: BTreeSet<usize>,
    initial_on_entry: i64,
}

impl DelayDeallocation {
    pub fn new() -> Result<Self, StableError> {
        let rc = require_use_count_map()?;
        let guard = rc.lock()?;
        let initial_on_entry = initial_use_count(&rc)?;
        let mut preexisting = BTreeSet::new();
        rc.for_each(|addr, _| {
            preexisting.insert(*addr);
            true
        })?;
        rc.insert(INITIAL_COUNT_KEY, initial_on_entry + 1)?;
        drop(guard);
        Ok(Self {
            rc,
            preexisting,
            initial_on_entry,
        })
    }
}

impl Drop for DelayDeallocation {
    fn drop(&mut self) {
        let released: Result<(), StableError> = (|| {
            let _guard = self.rc.lock()?;

            let mut created_in_scope = Vec::new();
            self.rc.for_each(|addr, _| {
                if *addr != INITIAL_COUNT_KEY && !self.preexisting.contains(addr) {
                    created_in_scope.push(*addr);
                }
                true
            })?;

            for addr in created_in_scope {
                let remaining = match self.rc.update(&addr, |count| *count -= 1) {
                    Ok(count) => count,
                    // released elsewhere meanwhile; no longer this scope's
                    Err(StableError::KeyMissing) => continue,
                    Err(err) => return Err(err),
                };
                if remaining == 0 {
                    tracing::debug!(addr, "deallocating block on delay scope exit");
                    self.rc.erase(&addr)?;
                    unsafe { libc::free(addr as *mut libc::c_void) };
                } else if remaining < 0 {
                    tracing::error!(addr, count = remaining, "negative use count in delay scope");
                    debug_assert!(remaining >= 0, "negative use count in delay scope");
                }
            }

            self.rc.insert(INITIAL_COUNT_KEY, self.initial_on_entry)
        })();
        if let Err(err) = released {
            tracing::error!(%err, "delay-deallocation scope exit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    /// Tears down the singleton refcount map after the test (even on
    /// panic), so every test starts from a fresh map.
    struct Teardown;

    impl Drop for Teardown {
        fn drop(&mut self) {
            singleton::reset_all();
            singleton::set_operational();
        }
    }

    #[test]
    #[serial]
    fn allocate_registers_and_reset_frees() {
        let _cleanup = Teardown;
        let buffer = StableReferenceBuffer::allocate(16, 1).expect("allocate");
        let addr = buffer.get();
        assert!(!addr.is_null());
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.use_count(), 1);
        assert!(StableReferenceBuffer::is_known(addr));

        drop(buffer);
        assert!(!StableReferenceBuffer::is_known(addr));
    }

    #[test]
    #[serial]
    fn clone_bumps_and_drop_decrements() {
        let _cleanup = Teardown;
        let buffer = StableReferenceBuffer::allocate(8, 1).expect("allocate");
        let alias = buffer.clone();
        assert_eq!(buffer.use_count(), 2);
        assert_eq!(alias.get(), buffer.get());
        drop(alias);
        assert_eq!(buffer.use_count(), 1);
    }

    #[test]
    #[serial]
    fn append_grows_an_exclusive_owner() {
        let _cleanup = Teardown;
        let mut buffer = StableReferenceBuffer::new().expect("new");
        buffer.append(&3u32.to_ne_bytes()).expect("first append");
        buffer.append(&5u32.to_ne_bytes()).expect("second append");
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.use_count(), 1);

        let bytes = unsafe { std::slice::from_raw_parts(buffer.get(), buffer.len()) };
        assert_eq!(&bytes[..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[4..], &5u32.to_ne_bytes());
    }

    #[test]
    #[serial]
    fn foreign_wrapper_rejects_append() {
        let _cleanup = Teardown;
        let owner = StableReferenceBuffer::allocate(4, 1).expect("allocate");
        let mut foreign = StableReferenceBuffer::from_raw(owner.get()).expect("adopt");
        assert_eq!(foreign.len(), 0, "adopted length is unknown");
        assert_eq!(owner.use_count(), 2);
        assert!(matches!(
            foreign.append(b"x"),
            Err(StableError::UnknownLength)
        ));
    }

    #[test]
    #[serial]
    fn from_raw_of_unmanaged_address_fails() {
        let _cleanup = Teardown;
        let local = [0u8; 4];
        assert!(matches!(
            StableReferenceBuffer::from_raw(local.as_ptr()),
            Err(StableError::InvalidArgument(_))
        ));
        assert!(StableReferenceBuffer::from_raw(ptr::null()).is_err());
    }

    #[test]
    #[serial]
    fn safe_get_requires_a_second_reference() {
        let _cleanup = Teardown;
        let buffer = StableReferenceBuffer::allocate(4, 1).expect("allocate");
        assert!(buffer.safe_get().is_null(), "sole owner gets null");
        let _alias = buffer.clone();
        assert!(!buffer.safe_get().is_null());
    }

    #[test]
    #[serial]
    fn swap_trades_blocks_without_touching_counts() {
        let _cleanup = Teardown;
        let mut a = StableReferenceBuffer::allocate(4, 1).expect("allocate a");
        let mut b = StableReferenceBuffer::allocate(8, 1).expect("allocate b");
        let (addr_a, addr_b) = (a.get(), b.get());
        a.swap(&mut b).expect("swap");
        assert_eq!(a.get(), addr_b);
        assert_eq!(b.get(), addr_a);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 4);
        assert_eq!(a.use_count(), 1);
        assert_eq!(b.use_count(), 1);
    }

    #[test]
    #[serial]
    fn env_override_respects_minimum() {
        let _cleanup = Teardown;
        // SAFETY: test runs serialized; no other thread reads the env here.
        unsafe { std::env::set_var(RC_MAP_ENV, "512") };
        assert_eq!(rc_map_bytes(), RC_MAP_DEFAULT_BYTES, "below minimum is ignored");
        unsafe { std::env::set_var(RC_MAP_ENV, "garbage") };
        assert_eq!(rc_map_bytes(), RC_MAP_DEFAULT_BYTES);
        unsafe { std::env::set_var(RC_MAP_ENV, "2048") };
        assert_eq!(rc_map_bytes(), 2048);
        unsafe { std::env::remove_var(RC_MAP_ENV) };
        assert_eq!(rc_map_bytes(), RC_MAP_DEFAULT_BYTES);
    }
}
