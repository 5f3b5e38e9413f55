use log::debug;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::{Error, ErrorKind, Result};

/// Backing storage for one allocated region
enum Backing {
    Heap(#[allow(dead_code)] Vec<u8>),
    Anon(#[allow(dead_code)] MmapMut),
    File {
        #[allow(dead_code)]
        mmap: MmapMut,
        #[allow(dead_code)]
        file: File,
    },
}

/// A named, fixed-size, zero-initialized byte region.
///
/// Writes go through raw pointers and are only legal from the single
/// ingestion thread; readers see them once the owning structure publishes
/// its visibility counter with a release store. The region never moves or
/// resizes, so offsets handed to readers stay valid for its lifetime.
pub struct PinnedBuffer {
    ptr: *mut u8,
    len: usize,
    context: String,
    _backing: Backing,
}

unsafe impl Send for PinnedBuffer {}
unsafe impl Sync for PinnedBuffer {}

impl PinnedBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    #[inline]
    pub fn write_i32(&self, offset: usize, value: i32) {
        debug_assert!(offset + 4 <= self.len);
        unsafe { self.ptr.add(offset).cast::<i32>().write_unaligned(value) }
    }

    #[inline]
    pub fn read_i32(&self, offset: usize) -> i32 {
        debug_assert!(offset + 4 <= self.len);
        unsafe { self.ptr.add(offset).cast::<i32>().read_unaligned() }
    }

    #[inline]
    pub fn write_i64(&self, offset: usize, value: i64) {
        debug_assert!(offset + 8 <= self.len);
        unsafe { self.ptr.add(offset).cast::<i64>().write_unaligned(value) }
    }

    #[inline]
    pub fn read_i64(&self, offset: usize) -> i64 {
        debug_assert!(offset + 8 <= self.len);
        unsafe { self.ptr.add(offset).cast::<i64>().read_unaligned() }
    }

    #[inline]
    pub fn write_u64(&self, offset: usize, value: u64) {
        debug_assert!(offset + 8 <= self.len);
        unsafe { self.ptr.add(offset).cast::<u64>().write_unaligned(value) }
    }

    #[inline]
    pub fn read_u64(&self, offset: usize) -> u64 {
        debug_assert!(offset + 8 <= self.len);
        unsafe { self.ptr.add(offset).cast::<u64>().read_unaligned() }
    }

    #[inline]
    pub fn write_f32(&self, offset: usize, value: f32) {
        self.write_i32(offset, value.to_bits() as i32)
    }

    #[inline]
    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.read_i32(offset) as u32)
    }

    #[inline]
    pub fn write_f64(&self, offset: usize, value: f64) {
        self.write_i64(offset, value.to_bits() as i64)
    }

    #[inline]
    pub fn read_f64(&self, offset: usize) -> f64 {
        f64::from_bits(self.read_i64(offset) as u64)
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) {
        debug_assert!(offset + src.len() <= self.len);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
        }
    }

    pub fn read_vec(&self, offset: usize, len: usize) -> Vec<u8> {
        debug_assert!(offset + len <= self.len);
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), out.as_mut_ptr(), len);
        }
        out
    }

    /// Reset the whole region to zeroes. Writer-side only.
    pub fn zero(&self) {
        unsafe { std::ptr::write_bytes(self.ptr, 0, self.len) }
    }
}

/// Where regions come from
#[derive(Debug, Clone)]
pub enum MemoryMode {
    /// Plain heap allocations, used by unit tests
    Heap,
    /// Anonymous memory-mapped regions
    OffHeap,
    /// Regions backed by unlinked files in a spill directory
    MmapDir(PathBuf),
}

/// Allocator of named off-heap regions for one segment.
///
/// Owned exclusively by the segment; subcomponents hold shared handles.
/// Tracks total allocated bytes and guarantees every region is released
/// on teardown. Context strings follow the convention
/// `<segmentName>:<columnName><indexKind>` and exist for observability only.
pub struct MemoryManager {
    mode: MemoryMode,
    regions: Mutex<Vec<Arc<PinnedBuffer>>>,
    total_allocated: AtomicUsize,
}

impl MemoryManager {
    pub fn new(mode: MemoryMode) -> Self {
        MemoryManager {
            mode,
            regions: Mutex::new(Vec::new()),
            total_allocated: AtomicUsize::new(0),
        }
    }

    pub fn heap() -> Self {
        Self::new(MemoryMode::Heap)
    }

    pub fn off_heap() -> Self {
        Self::new(MemoryMode::OffHeap)
    }

    pub fn mmap_dir(dir: PathBuf) -> Self {
        Self::new(MemoryMode::MmapDir(dir))
    }

    pub fn allocate(&self, len: usize, context: &str) -> Result<Arc<PinnedBuffer>> {
        let backing = self.allocate_backing(len, context)?;
        let (ptr, backing) = match backing {
            Backing::Heap(mut data) => {
                let ptr = data.as_mut_ptr();
                (ptr, Backing::Heap(data))
            }
            Backing::Anon(mut mmap) => {
                let ptr = mmap.as_mut_ptr();
                (ptr, Backing::Anon(mmap))
            }
            Backing::File { mut mmap, file } => {
                let ptr = mmap.as_mut_ptr();
                (ptr, Backing::File { mmap, file })
            }
        };

        let buffer = Arc::new(PinnedBuffer {
            ptr,
            len,
            context: context.to_string(),
            _backing: backing,
        });

        self.regions.lock().push(Arc::clone(&buffer));
        self.total_allocated.fetch_add(len, Ordering::Relaxed);
        Ok(buffer)
    }

    fn allocate_backing(&self, len: usize, context: &str) -> Result<Backing> {
        match &self.mode {
            MemoryMode::Heap => Ok(Backing::Heap(vec![0u8; len])),
            MemoryMode::OffHeap => {
                let mmap = MmapMut::map_anon(len).map_err(|e| {
                    Error::new(
                        ErrorKind::OutOfMemory,
                        format!("Failed to map {} bytes for {}: {}", len, context, e),
                    )
                })?;
                Ok(Backing::Anon(mmap))
            }
            MemoryMode::MmapDir(dir) => {
                let file = tempfile::tempfile_in(dir).map_err(|e| {
                    Error::new(
                        ErrorKind::OutOfMemory,
                        format!("Failed to create spill file for {}: {}", context, e),
                    )
                })?;
                file.set_len(len as u64)?;
                let mmap = unsafe {
                    MmapOptions::new().len(len).map_mut(&file).map_err(|e| {
                        Error::new(
                            ErrorKind::OutOfMemory,
                            format!("Failed to map {} bytes for {}: {}", len, context, e),
                        )
                    })?
                };
                Ok(Backing::File { mmap, file })
            }
        }
    }

    /// Total bytes handed out over the manager's lifetime
    pub fn total_allocated(&self) -> usize {
        self.total_allocated.load(Ordering::Relaxed)
    }

    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// Drop every tracked region. Regions still referenced by live views
    /// stay mapped until the last handle drops.
    pub fn release_all(&self) {
        let mut regions = self.regions.lock();
        debug!(
            "Releasing {} regions ({} bytes)",
            regions.len(),
            self.total_allocated.load(Ordering::Relaxed)
        );
        regions.clear();
    }
}
