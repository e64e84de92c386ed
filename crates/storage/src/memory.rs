//! Heap-resident page manager.
//!
//! Pages live in a vector of slots; removed slots are recycled before the
//! vector grows. Nothing is persisted.

use log::trace;

use crate::config::{validate_page_size, TreeConfig};
use crate::error::{Result, StorageError};
use crate::page::{Page, PageIndex, PageManager};

/// A [`PageManager`] that keeps every page in memory.
#[derive(Debug)]
pub struct MemoryPageManager {
    page_size: usize,
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<PageIndex>,
    live: usize,
}

impl MemoryPageManager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Build a manager with the configured page size.
    pub fn from_config(config: &TreeConfig) -> Result<Self> {
        validate_page_size(config.page_size)?;
        Ok(Self::new(config.page_size))
    }

    /// Number of slots ever allocated, live or free.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, index: PageIndex) -> Result<&mut Vec<u8>> {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(StorageError::PageNotFound(index))
    }
}

impl PageManager for MemoryPageManager {
    fn create_page(&mut self) -> Result<Page> {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(vec![0u8; self.page_size]);
                index
            }
            None => {
                let index = PageIndex::try_from(self.slots.len()).map_err(|_| {
                    StorageError::InvalidArgument("page index space exhausted".to_string())
                })?;
                self.slots.push(Some(vec![0u8; self.page_size]));
                index
            }
        };
        self.live += 1;
        trace!("memory pager: created page {}", index);
        Ok(Page::zeroed(index, self.page_size))
    }

    fn get_page(&mut self, index: PageIndex) -> Result<Page> {
        let data = self.slot_mut(index)?.clone();
        Ok(Page::new(index, data))
    }

    fn release_page(&mut self, page: Page) -> Result<()> {
        let index = page.index();
        if page.size() != self.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "page {} has size {}, expected {}",
                index,
                page.size(),
                self.page_size
            )));
        }
        *self.slot_mut(index)? = page.into_data();
        Ok(())
    }

    fn remove_page(&mut self, page: Page) -> Result<()> {
        let index = page.index();
        self.slot_mut(index)?;
        self.slots[index as usize] = None;
        self.free.push(index);
        self.live -= 1;
        trace!("memory pager: removed page {}", index);
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> usize {
        self.live
    }
}
