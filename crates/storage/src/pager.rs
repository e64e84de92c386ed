//! Pager: file-backed page manager with an in-memory buffer pool.
//!
//! Page 0 holds the [`FileHeader`]; data pages start at 1. Freed pages are
//! linked through their first four bytes into a freelist and reused before the
//! file grows. The pool evicts the least recently used frame, writing it back
//! first if dirty. There is no journal: `flush_all` writes dirty pages in place.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::config::{validate_page_size, TreeConfig};
use crate::error::{Result, StorageError};
use crate::header::FileHeader;
use crate::page::{Page, PageIndex, PageManager};

/// A single in-memory page frame.
struct Frame {
    data: Vec<u8>,
    /// Modified since it was last written to the file.
    dirty: bool,
    /// Access counter value for LRU tracking.
    last_access: u64,
}

/// Manages page I/O between a file and a fixed-size buffer pool.
pub struct Pager {
    file: File,
    header: FileHeader,
    header_dirty: bool,
    page_size: usize,
    pool: HashMap<PageIndex, Frame>,
    max_frames: usize,
    access_counter: u64,
}

impl Pager {
    /// Open or create a page-store file with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, &TreeConfig::default())
    }

    /// Open or create a page-store file. `config.page_size` applies only when
    /// the file is new; an existing file keeps the page size in its header.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: &TreeConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let exists = path.exists() && std::fs::metadata(path)?.len() > 0;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists {
            file.seek(SeekFrom::Start(0))?;
            let header = FileHeader::read_from(&mut file)?;
            validate_page_size(header.page_size as usize)?;
            if header.page_size as usize != config.page_size {
                warn!(
                    "{}: using stored page size {} instead of configured {}",
                    path.display(),
                    header.page_size,
                    config.page_size
                );
            }
            header
        } else {
            let header = FileHeader::with_page_size(config.page_size as u32);
            let mut page0 = vec![0u8; config.page_size];
            header.serialize(&mut page0);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&page0)?;
            file.sync_all()?;
            header
        };

        debug!(
            "opened {} (page_size={}, pages={}, free={})",
            path.display(),
            header.page_size,
            header.page_count,
            header.freelist_count
        );

        Ok(Self {
            file,
            page_size: header.page_size as usize,
            header,
            header_dirty: false,
            pool: HashMap::new(),
            max_frames: config.pool_frames,
            access_counter: 0,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Mutable header access; the header is written on the next flush.
    pub fn header_mut(&mut self) -> &mut FileHeader {
        self.header_dirty = true;
        &mut self.header
    }

    /// Total pages in the file, header page and free pages included.
    pub fn file_page_count(&self) -> u32 {
        self.header.page_count
    }

    /// Allocate a page, popping the freelist before extending the file.
    pub fn allocate_page(&mut self) -> Result<PageIndex> {
        let page_num = if self.header.freelist_head != 0 {
            let page_num = self.header.freelist_head;
            self.check_in_file(page_num, "freelist head")?;
            let next_head = BigEndian::read_u32(&self.frame_mut(page_num)?.data[0..4]);
            if next_head != 0 {
                self.check_in_file(next_head, "freelist next pointer")?;
            }

            self.header.freelist_head = next_head;
            self.header.freelist_count = self.header.freelist_count.saturating_sub(1);

            let frame = self.frame_mut(page_num)?;
            frame.data.fill(0);
            frame.dirty = true;
            page_num
        } else {
            let page_num = self.header.page_count;
            self.header.page_count += 1;
            self.maybe_evict()?;
            let frame = Frame {
                data: vec![0u8; self.page_size],
                dirty: true,
                last_access: self.next_access(),
            };
            self.pool.insert(page_num, frame);
            page_num
        };

        self.header_dirty = true;
        trace!("pager: allocated page {}", page_num);
        Ok(page_num)
    }

    /// Push a page onto the freelist.
    pub fn free_page(&mut self, page_num: PageIndex) -> Result<()> {
        if page_num == 0 {
            return Err(StorageError::InvalidArgument(
                "cannot free header page 0".to_string(),
            ));
        }
        if page_num >= self.header.page_count {
            return Err(StorageError::PageNotFound(page_num));
        }
        if self.freelist_contains(page_num)? {
            return Err(StorageError::InvalidArgument(format!(
                "page {} is already on the freelist",
                page_num
            )));
        }

        let next_head = self.header.freelist_head;
        let frame = self.frame_mut(page_num)?;
        frame.data.fill(0);
        BigEndian::write_u32(&mut frame.data[0..4], next_head);
        frame.dirty = true;

        self.header.freelist_head = page_num;
        self.header.freelist_count = self.header.freelist_count.saturating_add(1);
        self.header_dirty = true;
        trace!("pager: freed page {}", page_num);
        Ok(())
    }

    /// Write the header and every dirty page to the file, then sync.
    pub fn flush_all(&mut self) -> Result<()> {
        if self.header_dirty {
            self.stage_header_page()?;
        }

        let mut dirty_pages: Vec<PageIndex> = self
            .pool
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(&pn, _)| pn)
            .collect();
        dirty_pages.sort_unstable();

        for page_num in &dirty_pages {
            self.flush_page(*page_num)?;
        }
        self.file.sync_all()?;
        self.header_dirty = false;
        debug!("pager: flushed {} dirty pages", dirty_pages.len());
        Ok(())
    }

    fn flush_page(&mut self, page_num: PageIndex) -> Result<()> {
        let page_size = self.page_size as u64;
        let frame = self
            .pool
            .get_mut(&page_num)
            .ok_or(StorageError::PageNotFound(page_num))?;
        self.file.seek(SeekFrom::Start(page_num as u64 * page_size))?;
        self.file.write_all(&frame.data)?;
        frame.dirty = false;
        Ok(())
    }

    /// Copy the in-memory header into page 0 and mark it dirty.
    fn stage_header_page(&mut self) -> Result<()> {
        let header = self.header.clone();
        let frame = self.frame_mut(0)?;
        header.serialize(&mut frame.data);
        frame.dirty = true;
        Ok(())
    }

    /// Load a page if needed, bump its LRU stamp and return its frame.
    fn frame_mut(&mut self, page_num: PageIndex) -> Result<&mut Frame> {
        self.ensure_loaded(page_num)?;
        let ts = self.next_access();
        let frame = self
            .pool
            .get_mut(&page_num)
            .ok_or(StorageError::PageNotFound(page_num))?;
        frame.last_access = ts;
        Ok(frame)
    }

    fn ensure_loaded(&mut self, page_num: PageIndex) -> Result<()> {
        if self.pool.contains_key(&page_num) {
            return Ok(());
        }
        if page_num >= self.header.page_count {
            return Err(StorageError::PageNotFound(page_num));
        }

        self.maybe_evict()?;

        let mut data = vec![0u8; self.page_size];
        self.file
            .seek(SeekFrom::Start(page_num as u64 * self.page_size as u64))?;
        self.file.read_exact(&mut data)?;

        let frame = Frame {
            data,
            dirty: false,
            last_access: self.next_access(),
        };
        self.pool.insert(page_num, frame);
        Ok(())
    }

    fn maybe_evict(&mut self) -> Result<()> {
        while self.pool.len() >= self.max_frames {
            let victim = self
                .pool
                .iter()
                .min_by_key(|(_, f)| f.last_access)
                .map(|(&pn, f)| (pn, f.dirty));

            match victim {
                Some((page_num, dirty)) => {
                    if dirty {
                        self.flush_page(page_num)?;
                    }
                    self.pool.remove(&page_num);
                    trace!("pager: evicted page {}", page_num);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn freelist_contains(&mut self, target: PageIndex) -> Result<bool> {
        let mut current = self.header.freelist_head;
        let mut seen = 0u32;
        while current != 0 {
            self.check_in_file(current, "freelist page")?;
            if current == target {
                return Ok(true);
            }
            current = BigEndian::read_u32(&self.frame_mut(current)?.data[0..4]);
            seen = seen.saturating_add(1);
            if seen > self.header.page_count {
                return Err(StorageError::corrupt_page(current, "freelist loop detected"));
            }
        }
        Ok(false)
    }

    fn check_in_file(&self, page_num: PageIndex, what: &str) -> Result<()> {
        if page_num >= self.header.page_count {
            return Err(StorageError::corrupt_page(
                page_num,
                format!(
                    "{} out of range (page_count={})",
                    what, self.header.page_count
                ),
            ));
        }
        Ok(())
    }

    /// Page 0 is the header and is not addressable through [`PageManager`].
    fn check_data_page(&self, page_num: PageIndex) -> Result<()> {
        if page_num == 0 || page_num >= self.header.page_count {
            return Err(StorageError::PageNotFound(page_num));
        }
        Ok(())
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }
}

impl PageManager for Pager {
    fn create_page(&mut self) -> Result<Page> {
        let index = self.allocate_page()?;
        Ok(Page::zeroed(index, self.page_size))
    }

    fn get_page(&mut self, index: PageIndex) -> Result<Page> {
        self.check_data_page(index)?;
        let data = self.frame_mut(index)?.data.clone();
        Ok(Page::new(index, data))
    }

    fn release_page(&mut self, page: Page) -> Result<()> {
        let index = page.index();
        self.check_data_page(index)?;
        if page.size() != self.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "page {} has size {}, expected {}",
                index,
                page.size(),
                self.page_size
            )));
        }
        let frame = self.frame_mut(index)?;
        frame.data = page.into_data();
        frame.dirty = true;
        Ok(())
    }

    fn remove_page(&mut self, page: Page) -> Result<()> {
        self.check_data_page(page.index())?;
        self.free_page(page.index())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> usize {
        self.header
            .page_count
            .saturating_sub(1)
            .saturating_sub(self.header.freelist_count) as usize
    }
}
