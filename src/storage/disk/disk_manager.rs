use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::common::{BurrowError, PageId, Result, INVALID_PAGE_ID, META_PAGE_ID, PAGE_SIZE};
use crate::storage::page::{BitmapPage, DiskFileMetaPage, MAX_EXTENTS};

/// Number of data pages governed by one bitmap page.
pub const EXTENT_SIZE: u32 = BitmapPage::<PAGE_SIZE>::max_supported_size() as u32;

/// Identifies an extent: one bitmap page followed by `EXTENT_SIZE` data pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtentId(u32);

impl ExtentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Splits a logical page id into its extent and the offset inside it.
    pub fn of(page_id: PageId) -> (Self, u32) {
        (
            Self(page_id.as_u32() / EXTENT_SIZE),
            page_id.as_u32() % EXTENT_SIZE,
        )
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// First logical page id of this extent.
    pub fn start_page(&self) -> PageId {
        PageId::new(self.0 * EXTENT_SIZE)
    }

    /// Physical index of this extent's bitmap page.
    pub fn bitmap_physical_page(&self) -> u32 {
        META_PAGE_ID + 1 + self.0 * (EXTENT_SIZE + 1)
    }
}

struct DiskInner {
    file: File,
    meta: DiskFileMetaPage,
    closed: bool,
}

impl DiskInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BurrowError::DiskClosed);
        }
        Ok(())
    }

    fn read_physical(&mut self, physical: u32, data: &mut [u8]) -> Result<()> {
        let offset = u64::from(physical) * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        // Reading beyond the end of the file yields zeros
        let mut filled = 0;
        while filled < data.len() {
            match self.file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        data[filled..].fill(0);
        Ok(())
    }

    fn write_physical(&mut self, physical: u32, data: &[u8]) -> Result<()> {
        let offset = u64::from(physical) * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    fn read_bitmap(&mut self, extent: ExtentId) -> Result<BitmapPage<PAGE_SIZE>> {
        let mut data = [0u8; PAGE_SIZE];
        self.read_physical(extent.bitmap_physical_page(), &mut data)?;
        BitmapPage::from_bytes(&data)
    }

    fn write_bitmap(&mut self, extent: ExtentId, bitmap: &BitmapPage<PAGE_SIZE>) -> Result<()> {
        self.write_physical(extent.bitmap_physical_page(), bitmap.as_bytes())
    }

    fn write_meta(&mut self) -> Result<()> {
        let mut data = [0u8; PAGE_SIZE];
        self.meta.write_to(&mut data);
        self.write_physical(META_PAGE_ID, &data)
    }
}

/// DiskManager owns the database file. It hands out logical page ids from
/// per-extent bitmaps and translates them to physical offsets for page I/O.
///
/// All file access and metadata updates go through a single lock.
pub struct DiskManager {
    inner: Mutex<DiskInner>,
    /// Path to the database file
    db_path: String,
    /// Number of logical page reads performed
    num_reads: AtomicU32,
    /// Number of logical page writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at the given path, creating it and any
    /// missing parent directories if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let fresh = file.metadata()?.len() == 0;

        let mut inner = DiskInner {
            file,
            meta: DiskFileMetaPage::new(),
            closed: false,
        };

        let mut data = [0u8; PAGE_SIZE];
        inner.read_physical(META_PAGE_ID, &mut data)?;
        inner.meta = DiskFileMetaPage::from_bytes(&data)?;
        if fresh {
            inner.write_meta()?;
        }

        info!(
            path = %path.display(),
            fresh,
            allocated = inner.meta.num_allocated_pages(),
            extents = inner.meta.num_extents(),
            "opened database file"
        );

        Ok(Self {
            inner: Mutex::new(inner),
            db_path: path.to_string_lossy().to_string(),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Translates a logical page id to its physical page index in the file.
    pub fn map_page_id(page_id: PageId) -> u32 {
        let (extent, offset) = ExtentId::of(page_id);
        extent.bitmap_physical_page() + 1 + offset
    }

    fn check_page_id(page_id: PageId) -> Result<ExtentId> {
        let (extent, _) = ExtentId::of(page_id);
        if page_id == INVALID_PAGE_ID || extent.as_usize() >= MAX_EXTENTS {
            return Err(BurrowError::InvalidPageId(page_id));
        }
        Ok(extent)
    }

    /// Allocates a logical page from the first extent with spare capacity.
    /// Returns `None` when every supported extent is full.
    pub fn allocate_page(&self) -> Result<Option<PageId>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.ensure_open()?;

        for index in 0..MAX_EXTENTS {
            if inner.meta.extent_used_page(index) >= EXTENT_SIZE {
                continue;
            }

            let extent = ExtentId::new(index as u32);
            let mut bitmap = inner.read_bitmap(extent)?;
            let offset = bitmap.allocate_page().ok_or_else(|| {
                BurrowError::CorruptFormat(format!(
                    "extent {index} bitmap is full but metadata records {} used pages",
                    inner.meta.extent_used_page(index)
                ))
            })?;

            inner.write_bitmap(extent, &bitmap)?;
            inner.meta.record_allocation(index);
            inner.write_meta()?;

            let page_id = PageId::new(extent.start_page().as_u32() + offset);
            debug!(%page_id, "allocated page");
            return Ok(Some(page_id));
        }

        warn!("every extent is full, cannot allocate a page");
        Ok(None)
    }

    /// Returns a logical page to its extent's bitmap. Freeing a page that is
    /// already free is logged and otherwise ignored.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let extent = Self::check_page_id(page_id)?;
        let (_, offset) = ExtentId::of(page_id);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.ensure_open()?;

        let mut bitmap = inner.read_bitmap(extent)?;
        if !bitmap.deallocate_page(offset) {
            warn!(%page_id, "deallocating a page that is already free");
            return Ok(());
        }

        inner.write_bitmap(extent, &bitmap)?;
        inner.meta.record_deallocation(extent.as_usize());
        inner.write_meta()?;
        debug!(%page_id, "deallocated page");
        Ok(())
    }

    /// Returns true if the logical page is not currently allocated.
    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        let extent = Self::check_page_id(page_id)?;
        let (_, offset) = ExtentId::of(page_id);

        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.meta.extent_used_page(extent.as_usize()) == 0 {
            return Ok(true);
        }
        let bitmap = inner.read_bitmap(extent)?;
        Ok(bitmap.is_page_free(offset))
    }

    /// Reads a logical page into the provided buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        Self::check_page_id(page_id)?;

        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.read_physical(Self::map_page_id(page_id), data)?;

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a logical page from the provided buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        Self::check_page_id(page_id)?;

        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.write_physical(Self::map_page_id(page_id), data)?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the number of logical pages currently allocated.
    pub fn num_allocated_pages(&self) -> u32 {
        self.inner.lock().meta.num_allocated_pages()
    }

    /// Returns the number of extents with at least one allocated page.
    pub fn num_extents(&self) -> u32 {
        self.inner.lock().meta.num_extents()
    }

    /// Returns the number of allocated pages inside an extent.
    pub fn extent_used_page(&self, extent: ExtentId) -> u32 {
        self.inner.lock().meta.extent_used_page(extent.as_usize())
    }

    /// Returns the number of disk reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Syncs the file and refuses further I/O.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.file.sync_all()?;
        inner.closed = true;
        info!(path = %self.db_path, "closed database file");
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.closed {
            let _ = inner.file.sync_all();
        }
    }
}
