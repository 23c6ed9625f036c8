//! Segregated free list for paged spaces.
//!
//! Reclaimed regions are threaded through the memory itself as [`FreeSpace`]
//! nodes (`{map, size, next}`) and bucketed into size categories:
//!
//! ```text
//!  category   0    1    2    3   ...  15    16    17   ...   23
//!  from      24   32   48   64   ... 256   512  1024  ... 65536
//! ```
//!
//! Categories up to 256 bytes are 16 bytes wide; above that they double.
//! Allocation does a best-fit search in the smallest category that may hold
//! the request and takes the head of any larger one. Regions under three
//! words cannot carry a node; they become fillers and count as wasted.
//! Adjacent dead objects are coalesced by the sweeper before they get here.

use crate::memory::PageMetadata;
use crate::objects::layout::MIN_FREE_SPACE_SIZE;
use crate::objects::{FreeSpace, HeapObject, ReadOnlyRoots, create_filler};
use strata_core::{Address, WORD_SIZE};

/// Smallest region kept on the list.
pub const MIN_BLOCK_SIZE: usize = MIN_FREE_SPACE_SIZE;

/// Lower bound of each category, in bytes.
pub const CATEGORY_BOUNDARIES: [usize; NUM_CATEGORIES] = [
    24, 32, 48, 64, 80, 96, 112, 128, 144, 160, 176, 192, 208, 224, 240, 256, 512, 1024, 2048,
    4096, 8192, 16384, 32768, 65536,
];

/// Number of size categories.
pub const NUM_CATEGORIES: usize = 24;

/// Last category with 16-byte granularity.
const LAST_PRECISE_CATEGORY: usize = 15;
const PRECISE_CATEGORY_MAX_SIZE: usize = 256;

/// A region handed out by the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRegion {
    /// First byte.
    pub start: Address,
    /// Size in bytes.
    pub size: usize,
}

impl FreeRegion {
    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> Address {
        self.start.offset(self.size)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Category {
    head: Option<Address>,
    available: usize,
    length: usize,
}

/// Free list of one paged space.
pub struct FreeList {
    categories: [Category; NUM_CATEGORIES],
    available: usize,
    wasted_bytes: usize,
    roots: ReadOnlyRoots,
}

#[inline]
fn node(address: Address) -> FreeSpace {
    FreeSpace::unchecked(HeapObject::from_address(address))
}

#[inline]
fn page_of(address: Address) -> crate::memory::PageRef {
    HeapObject::from_address(address).page()
}

impl FreeList {
    /// Create an empty free list.
    pub fn new(roots: ReadOnlyRoots) -> Self {
        Self {
            categories: [Category::default(); NUM_CATEGORIES],
            available: 0,
            wasted_bytes: 0,
            roots,
        }
    }

    /// Category holding regions of `size` bytes.
    #[inline]
    pub fn category_for(size: usize) -> usize {
        debug_assert!(size >= MIN_BLOCK_SIZE);
        if size <= PRECISE_CATEGORY_MAX_SIZE {
            return (size >> 4) - 1;
        }
        let doublings = (size / PRECISE_CATEGORY_MAX_SIZE).ilog2() as usize;
        (LAST_PRECISE_CATEGORY + doublings).min(NUM_CATEGORIES - 1)
    }

    /// Return `[start, start + size)` to the list.
    ///
    /// Returns the number of bytes wasted (too small to reuse).
    pub fn add(&mut self, start: Address, size: usize) -> usize {
        debug_assert!(start.is_aligned(WORD_SIZE) && size % WORD_SIZE == 0);
        create_filler(start, size, &self.roots);
        if size < MIN_BLOCK_SIZE {
            self.wasted_bytes += size;
            return size;
        }

        let index = Self::category_for(size);
        let category = &mut self.categories[index];
        node(start).set_next(category.head);
        category.head = Some(start);
        category.available += size;
        category.length += 1;
        self.available += size;
        page_of(start).decrement_allocated_bytes(size);
        0
    }

    /// Take a region of at least `size` bytes.
    pub fn allocate(&mut self, size: usize) -> Option<FreeRegion> {
        let size = size.max(MIN_BLOCK_SIZE);
        let first = Self::category_for(size);

        let region = self
            .take_best_fit(first, size)
            .or_else(|| (first + 1..NUM_CATEGORIES).find_map(|index| self.take_head(index)))?;

        page_of(region.start).increment_allocated_bytes(region.size);
        Some(region)
    }

    fn take_head(&mut self, index: usize) -> Option<FreeRegion> {
        let head = self.categories[index].head?;
        let free = node(head);
        let size = free.size();
        self.unlink(index, None, head, free.next(), size);
        Some(FreeRegion { start: head, size })
    }

    fn take_best_fit(&mut self, index: usize, size: usize) -> Option<FreeRegion> {
        let mut best: Option<(Option<Address>, Address, usize)> = None;
        let mut previous = None;
        let mut cursor = self.categories[index].head;
        while let Some(current) = cursor {
            let candidate = node(current).size();
            if candidate >= size && best.is_none_or(|(_, _, best_size)| candidate < best_size) {
                best = Some((previous, current, candidate));
                if candidate == size {
                    break;
                }
            }
            previous = Some(current);
            cursor = node(current).next();
        }

        let (previous, start, found) = best?;
        let next = node(start).next();
        self.unlink(index, previous, start, next, found);
        Some(FreeRegion { start, size: found })
    }

    fn unlink(
        &mut self,
        index: usize,
        previous: Option<Address>,
        _current: Address,
        next: Option<Address>,
        size: usize,
    ) {
        match previous {
            Some(previous) => node(previous).set_next(next),
            None => self.categories[index].head = next,
        }
        let category = &mut self.categories[index];
        category.available -= size;
        category.length -= 1;
        self.available -= size;
    }

    /// Remove every node that lies on `page`. Returns the bytes removed.
    pub fn evict_page(&mut self, page: &PageMetadata) -> usize {
        let mut removed = 0;
        for index in 0..NUM_CATEGORIES {
            let mut previous = None;
            let mut cursor = self.categories[index].head;
            while let Some(current) = cursor {
                let free = node(current);
                let next = free.next();
                if page.contains(current) {
                    let size = free.size();
                    self.unlink(index, previous, current, next, size);
                    removed += size;
                } else {
                    previous = Some(current);
                }
                cursor = next;
            }
        }
        removed
    }

    /// Drop every node without touching memory.
    pub fn reset(&mut self) {
        self.categories = [Category::default(); NUM_CATEGORIES];
        self.available = 0;
        self.wasted_bytes = 0;
    }

    /// Bytes available for reuse.
    #[inline]
    pub fn available(&self) -> usize {
        self.available
    }

    /// Bytes turned into fillers because they were too small to reuse.
    #[inline]
    pub fn wasted_bytes(&self) -> usize {
        self.wasted_bytes
    }

    /// Check whether the list holds no node.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Nodes in one category.
    pub fn category_length(&self, index: usize) -> usize {
        self.categories[index].length
    }

    /// Every region currently on the list, category by category.
    pub fn iter_regions(&self) -> impl Iterator<Item = FreeRegion> + '_ {
        self.categories.iter().flat_map(|category| {
            std::iter::successors(category.head, |&current| node(current).next()).map(|start| {
                FreeRegion {
                    start,
                    size: node(start).size(),
                }
            })
        })
    }
}
