//! Free page management and recycling
//!
//! This module manages the list of free pages that can be reused
//! instead of allocating new pages from the end of the file.

use crate::error::{Error, PageId, Result, TransactionId};
use crate::meta::DbInfo;
use crate::page::{Page, PageFlags, PAGE_SIZE};
use crate::txn::Transaction;
use std::collections::{BTreeMap, BTreeSet};

/// Order in which freed pages are handed back out by `alloc_page`.
///
/// `Fifo` (the default) reuses the oldest-freed, lowest-numbered pages
/// first, which tends to keep the file compact. `Lifo` (`LIFORECLAIM`)
/// reuses the most recently freed pages first, trading file compactness
/// for fewer full free-list scans under write-heavy workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimPolicy {
    /// Reuse the smallest free page number first.
    Fifo,
    /// Reuse the largest free page number first.
    Lifo,
}

/// Free list manager
#[derive(Clone)]
pub struct FreeList {
    /// Set of free pages available for reuse
    free_pages: BTreeSet<PageId>,
    /// Pages freed in the current transaction (cannot be reused yet)
    pending_pages: BTreeSet<PageId>,
    /// Map of transaction ID to pages freed in that transaction
    /// Used for tracking which pages can be reused
    txn_free_pages: BTreeMap<TransactionId, Vec<PageId>>,
    /// Oldest reader transaction ID (pages can only be reused after this)
    oldest_reader: TransactionId,
    /// Track if the freelist needs to be saved
    needs_save: bool,
    /// Page reuse order
    reclaim_policy: ReclaimPolicy,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    /// Create a new free list
    pub fn new() -> Self {
        Self {
            free_pages: BTreeSet::new(),
            pending_pages: BTreeSet::new(),
            txn_free_pages: BTreeMap::new(),
            oldest_reader: TransactionId(0),
            needs_save: false,
            reclaim_policy: ReclaimPolicy::Fifo,
        }
    }

    /// Create a free list that reclaims pages in the given order.
    pub fn with_policy(policy: ReclaimPolicy) -> Self {
        Self { reclaim_policy: policy, ..Self::new() }
    }

    /// Set the reclaim policy (applies to subsequent allocations).
    pub fn set_reclaim_policy(&mut self, policy: ReclaimPolicy) {
        self.reclaim_policy = policy;
    }

    /// Load free pages from the free database
    pub fn load<'txn>(
        txn: &Transaction<'txn, impl crate::txn::mode::Mode>,
        free_db: &DbInfo,
    ) -> Result<Self> {
        let mut freelist = Self::new();

        if free_db.root.0 == 0 {
            // No free pages yet
            return Ok(freelist);
        }

        // Create a cursor to iterate through the free database
        // The free database stores: txn_id -> list of page IDs
        let current_page_id = free_db.root;
        let mut stack = vec![current_page_id];

        while let Some(page_id) = stack.pop() {
            let page = txn.get_page(page_id)?;

            if page.header.flags.contains(PageFlags::LEAF) {
                // Process leaf page entries
                for i in 0..page.header.num_keys as usize {
                    let node = page.node(i)?;
                    let txn_id_bytes = node.key()?;
                    let page_list_bytes = node.value()?;

                    // Decode transaction ID (8 bytes)
                    if txn_id_bytes.len() != 8 {
                        continue;
                    }
                    let txn_id = TransactionId(u64::from_le_bytes([
                        txn_id_bytes[0],
                        txn_id_bytes[1],
                        txn_id_bytes[2],
                        txn_id_bytes[3],
                        txn_id_bytes[4],
                        txn_id_bytes[5],
                        txn_id_bytes[6],
                        txn_id_bytes[7],
                    ]));

                    // Decode the page list using the same IDL wire format
                    // the allocator uses for pghead/free_pgs (spec.md §4.3).
                    let pages: Vec<PageId> = crate::idl::Idl::from_bytes(&page_list_bytes).iter().collect();

                    freelist.txn_free_pages.insert(txn_id, pages);
                }
            } else {
                // Branch page - add children to stack
                for i in 0..page.header.num_keys as usize {
                    let node = page.node(i)?;
                    stack.push(node.page_number()?);
                }
            }
        }

        Ok(freelist)
    }

    /// Set the oldest reader transaction ID
    pub fn set_oldest_reader(&mut self, txn_id: TransactionId) {
        self.oldest_reader = txn_id;
    }

    /// Add a page to the free list (to be freed after transaction commits)
    pub fn free_page(&mut self, page_id: PageId) {
        self.pending_pages.insert(page_id);
    }

    /// Try to allocate a page from the free list
    pub fn alloc_page(&mut self) -> Option<PageId> {
        let page_id = match self.reclaim_policy {
            ReclaimPolicy::Fifo => self.free_pages.iter().next().copied(),
            ReclaimPolicy::Lifo => self.free_pages.iter().next_back().copied(),
        }?;
        self.free_pages.remove(&page_id);
        Some(page_id)
    }

    /// Commit pending pages to the free list
    /// This should be called after a transaction commits successfully
    pub fn commit_pending(&mut self, txn_id: TransactionId) {
        if !self.pending_pages.is_empty() {
            // Store pending pages with this transaction ID
            let pages: Vec<PageId> = self.pending_pages.iter().cloned().collect();
            self.txn_free_pages.insert(txn_id, pages);
            self.pending_pages.clear();
            self.needs_save = true;
        }

        // Check which pages can be made available for reuse
        self.update_free_pages();
    }

    /// Update the free pages based on the oldest reader
    pub fn update_free_pages(&mut self) {
        // Remove transactions that are safe to reuse
        let mut safe_txns = Vec::new();

        for &txn_id in self.txn_free_pages.keys() {
            // Pages from a transaction can be reused when:
            // 1. There are no active readers (oldest_reader == 0), OR
            // 2. The transaction is older than the oldest reader
            if self.oldest_reader.0 == 0 || txn_id.0 < self.oldest_reader.0 {
                safe_txns.push(txn_id);
            }
        }

        // Move pages from safe transactions to free_pages
        for txn_id in safe_txns {
            if let Some(pages) = self.txn_free_pages.remove(&txn_id) {
                for page_id in pages {
                    self.free_pages.insert(page_id);
                }
            }
        }
    }

    /// Get serialized freelist data for saving
    pub fn get_save_data(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut result = Vec::new();

        for (&txn_id, pages) in &self.txn_free_pages {
            // Encode transaction ID as key (8 bytes)
            let key = txn_id.0.to_le_bytes().to_vec();

            // Encode the page list with the IDL wire format (spec.md §4.3).
            let value = crate::idl::Idl::from_slice(pages).to_bytes();

            result.push((key, value));
        }

        result
    }

    /// Get the number of free pages
    pub fn len(&self) -> usize {
        self.free_pages.len()
    }

    /// Check if the free list is empty
    pub fn is_empty(&self) -> bool {
        self.free_pages.is_empty()
    }

    /// Get the number of pending pages
    pub fn pending_len(&self) -> usize {
        self.pending_pages.len()
    }

    /// Check if there are any transaction free pages
    pub fn has_txn_free_pages(&self) -> bool {
        !self.txn_free_pages.is_empty()
    }

    /// Check if the freelist needs to be saved
    pub fn needs_save(&self) -> bool {
        self.needs_save
    }
}

/// Free page header for storing lists of free pages
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FreePageHeader {
    /// Number of page IDs in this page
    pub count: u16,
    /// Padding for alignment
    pub _pad: u16,
    /// Next free list page (0 if last)
    pub next: PageId,
}

impl FreePageHeader {
    /// Size of the header
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Maximum number of page IDs that fit in a page
    pub const MAX_IDS: usize =
        (PAGE_SIZE - crate::page::PageHeader::SIZE - Self::SIZE) / std::mem::size_of::<u64>();
}

/// A page containing a list of free page IDs
pub struct FreePage<'a> {
    page: &'a Page,
}

impl<'a> FreePage<'a> {
    /// Create a free page view from a page
    pub fn from_page(page: &'a Page) -> Result<Self> {
        if !page.header.flags.contains(PageFlags::OVERFLOW) {
            return Err(Error::Corrupted { details: format!("expected {:?} page, found {:?}", crate::error::PageType::Overflow, page.header.page_type()), page_id: None });
        }

        Ok(Self { page })
    }

    /// Get the header
    pub fn header(&self) -> &FreePageHeader {
        unsafe { &*(self.page.data.as_ptr() as *const FreePageHeader) }
    }

    /// Get the page IDs
    pub fn page_ids(&self) -> &[PageId] {
        let header = self.header();
        let count = header.count as usize;

        unsafe {
            let ids_ptr = self.page.data.as_ptr().add(FreePageHeader::SIZE) as *const PageId;
            std::slice::from_raw_parts(ids_ptr, count)
        }
    }
}

/// Mutable free page
pub struct FreePageMut<'a> {
    page: &'a mut Page,
}

impl<'a> FreePageMut<'a> {
    /// Create a new free page
    pub fn new(page: &'a mut Page) -> Self {
        page.header.flags = PageFlags::OVERFLOW; // Reuse overflow flag for free pages

        // Initialize header
        let header = FreePageHeader { count: 0, _pad: 0, next: PageId(0) };

        unsafe {
            let header_ptr = page.data.as_mut_ptr() as *mut FreePageHeader;
            *header_ptr = header;
        }

        Self { page }
    }

    /// Get mutable header
    pub fn header_mut(&mut self) -> &mut FreePageHeader {
        unsafe { &mut *(self.page.data.as_mut_ptr() as *mut FreePageHeader) }
    }

    /// Add a page ID to the list
    pub fn add_page_id(&mut self, page_id: PageId) -> Result<()> {
        let count = self.header_mut().count as usize;
        if count >= FreePageHeader::MAX_IDS {
            return Err(Error::Problem("Free page is full".into()));
        }

        unsafe {
            let ids_ptr = self.page.data.as_mut_ptr().add(FreePageHeader::SIZE) as *mut PageId;
            *ids_ptr.add(count) = page_id;
        }

        self.header_mut().count += 1;
        Ok(())
    }

    /// Set the next page
    pub fn set_next(&mut self, next: PageId) {
        self.header_mut().next = next;
    }
}
