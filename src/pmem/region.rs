//! Backing Store
//!
//! Owns the memory mapping. Every raw pointer dereference in the crate
//! happens here, behind a bounds check that routes violations to the
//! configured fault hook.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};

use crate::config::{Durability, FaultHook};
use crate::error::{NvkvError, Result};

/// Description of an invalid access to the mapped region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFault {
    pub offset: usize,
    pub len: usize,
    pub region_len: usize,
    pub reason: &'static str,
}

impl fmt::Display for AccessFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} access at offset {} (len {}) in region of {} bytes",
            self.reason, self.offset, self.len, self.region_len
        )
    }
}

/// A fixed-size mapped region with durable-write primitives
///
/// ## Concurrency:
/// - All methods take `&self`; callers partition the region so that no
///   two threads write the same bytes without external ordering
/// - 8-byte words used for publication go through `load_u64`/`store_u64`
pub struct BackingStore {
    map: MmapMut,
    base: *mut u8,
    len: usize,
    durability: Durability,
    fault_hook: FaultHook,
    /// The backing file held data before this open
    existed: bool,
    anonymous: bool,
}

// SAFETY: the mapping lives as long as `map`; concurrent access is
// coordinated by the engine (shard ownership, seqlocks, atomics).
unsafe impl Send for BackingStore {}
unsafe impl Sync for BackingStore {}

impl BackingStore {
    /// Open or create a file-backed region of exactly `size` bytes
    pub fn open(
        path: &Path,
        size: usize,
        durability: Durability,
        fault_hook: FaultHook,
    ) -> Result<Self> {
        if size == 0 {
            return Err(NvkvError::Config("region size must be non-zero".into()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let current = file.metadata()?.len();
        let existed = current > 0;
        if existed && current != size as u64 {
            return Err(NvkvError::LayoutMismatch(format!(
                "{} is {} bytes, configured size is {}",
                path.display(),
                current,
                size
            )));
        }
        if !existed {
            file.set_len(size as u64)?;
        }

        // SAFETY: the file is sized to `size` above and not truncated while mapped.
        let mut map = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        let base = map.as_mut_ptr();

        tracing::debug!(path = %path.display(), size, existed, "mapped backing file");

        Ok(Self {
            map,
            base,
            len: size,
            durability,
            fault_hook,
            existed,
            anonymous: false,
        })
    }

    /// Map an anonymous zero-filled region (nothing survives a restart)
    pub fn anonymous(size: usize, durability: Durability, fault_hook: FaultHook) -> Result<Self> {
        if size == 0 {
            return Err(NvkvError::Config("region size must be non-zero".into()));
        }

        let mut map = MmapOptions::new().len(size).map_anon()?;
        let base = map.as_mut_ptr();

        tracing::debug!(size, "mapped anonymous region");

        Ok(Self {
            map,
            base,
            len: size,
            durability,
            fault_hook,
            existed: false,
            anonymous: true,
        })
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the backing file already held data when opened
    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the region
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len(), 1);
        // SAFETY: bounds checked above; `dst` cannot alias the mapping.
        unsafe { ptr::copy_nonoverlapping(self.base.add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Copy `src` into the region at `offset` (not yet durable)
    pub fn write(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len(), 1);
        // SAFETY: bounds checked above; `src` cannot alias the mapping.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(offset), src.len()) }
    }

    /// Atomically load an aligned 8-byte word
    pub fn load_u64(&self, offset: usize) -> u64 {
        self.atomic_at(offset).load(Ordering::Acquire)
    }

    /// Atomically store an aligned 8-byte word
    pub fn store_u64(&self, offset: usize, value: u64) {
        self.atomic_at(offset).store(value, Ordering::Release)
    }

    /// Make `[offset, offset + len)` durable according to the durability mode
    pub fn persist(&self, offset: usize, len: usize) -> Result<()> {
        self.check(offset, len, 1);
        match self.durability {
            Durability::Sync => self.map.flush_range(offset, len)?,
            Durability::Async => self.map.flush_async_range(offset, len)?,
            Durability::None => {}
        }
        Ok(())
    }

    /// Order all previous writes and persists before any later ones
    pub fn drain(&self) {
        fence(Ordering::SeqCst);
    }

    fn atomic_at(&self, offset: usize) -> &AtomicU64 {
        self.check(offset, 8, 8);
        // SAFETY: in bounds and 8-byte aligned (the mapping is page aligned);
        // the word is only ever accessed atomically.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    #[inline]
    fn check(&self, offset: usize, len: usize, align: usize) {
        let in_bounds = offset
            .checked_add(len)
            .map_or(false, |end| end <= self.len);
        if !in_bounds {
            self.fault(offset, len, "out-of-bounds");
        }
        if offset % align != 0 {
            self.fault(offset, len, "misaligned");
        }
    }

    #[cold]
    #[inline(never)]
    fn fault(&self, offset: usize, len: usize, reason: &'static str) -> ! {
        let fault = AccessFault {
            offset,
            len,
            region_len: self.len,
            reason,
        };
        self.fault_hook.invoke(&fault);
        panic!("{}", fault);
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStore")
            .field("len", &self.len)
            .field("durability", &self.durability)
            .field("existed", &self.existed)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}
