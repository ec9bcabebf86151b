use std::ptr::NonNull;

use super::page::Page;
use super::{AllocError, Allocator, AllocatorKind, GrowthPolicy};
use crate::profile_plot;

struct PoolPage {
    page: Page,
    /// Offset of the first slot after aligning the page base.
    first_slot: usize,
    occupied: Vec<bool>,
}

/// Allocator of equally sized slots.
///
/// Requests larger than the element size (or stricter than its alignment)
/// are rejected. Used memory is always `allocations * element_size`.
///
/// ```
/// use tde_core::memory::{Allocator, GrowthPolicy, create_pool_allocator};
///
/// let mut pool = create_pool_allocator(32, 8, 1024, GrowthPolicy::Fixed).unwrap();
/// assert!(pool.allocate(64, 8).is_none());
///
/// let a = pool.allocate(32, 8).unwrap();
/// let _b = pool.allocate(16, 4).unwrap();
/// assert_eq!(pool.used_memory_size(), 64);
///
/// pool.deallocate(a).unwrap();
/// assert_eq!(pool.allocations_count(), 1);
/// ```
pub struct PoolAllocator {
    pages: Vec<PoolPage>,
    /// Free slots as `(page, slot)` pairs; popped from the back.
    free_list: Vec<(usize, usize)>,
    element_size: usize,
    element_align: usize,
    stride: usize,
    page_size: usize,
    growth: GrowthPolicy,
    allocations: usize,
}

impl PoolAllocator {
    pub(super) fn new(
        element_size: usize,
        element_align: usize,
        page_size: usize,
        growth: GrowthPolicy,
    ) -> Self {
        let mut pool = Self {
            pages: Vec::new(),
            free_list: Vec::new(),
            element_size,
            element_align,
            stride: super::aligned_address(element_size, element_align),
            page_size,
            growth,
            allocations: 0,
        };
        pool.add_page();
        pool
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of elements a single page holds.
    pub fn slots_per_page(&self) -> usize {
        self.pages.first().map_or(0, |page| page.occupied.len())
    }

    fn add_page(&mut self) {
        let page = Page::new(self.page_size);
        let first_slot = super::padding(page.base_address(), self.element_align);
        let slots = (self.page_size - first_slot - self.element_size) / self.stride + 1;

        let page_index = self.pages.len();
        self.pages.push(PoolPage {
            page,
            first_slot,
            occupied: vec![false; slots],
        });
        // Reverse so that slot 0 is handed out first.
        self.free_list
            .extend((0..slots).rev().map(|slot| (page_index, slot)));
    }

    fn reset_free_list(&mut self) {
        self.free_list.clear();
        for (page_index, page) in self.pages.iter_mut().enumerate().rev() {
            page.occupied.fill(false);
            self.free_list
                .extend((0..page.occupied.len()).rev().map(|slot| (page_index, slot)));
        }
    }

    fn slot_of(&self, ptr: NonNull<u8>) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(index, pool_page)| {
            let offset = pool_page.page.offset_of(ptr)?;
            let relative = offset.checked_sub(pool_page.first_slot)?;
            let slot = relative / self.stride;
            (relative % self.stride == 0 && slot < pool_page.occupied.len()).then_some((index, slot))
        })
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0
            || size > self.element_size
            || !align.is_power_of_two()
            || align > self.element_align
        {
            return None;
        }

        if self.free_list.is_empty() {
            match self.growth {
                GrowthPolicy::Fixed => return None,
                GrowthPolicy::Grow => {
                    log::trace!("pool allocator grows to {} pages", self.pages.len() + 1);
                    self.add_page();
                }
            }
        }

        let (page_index, slot) = self.free_list.pop()?;
        self.allocations += 1;
        profile_plot!("Pool allocator used bytes", self.used_memory_size());

        let pool_page = &mut self.pages[page_index];
        pool_page.occupied[slot] = true;
        let offset = pool_page.first_slot + slot * self.stride;
        pool_page.page.ptr_at(offset)
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let address = ptr.as_ptr() as usize;
        let (page_index, slot) = self
            .slot_of(ptr)
            .ok_or(AllocError::ForeignPointer(address))?;

        let occupied = &mut self.pages[page_index].occupied[slot];
        if !*occupied {
            return Err(AllocError::DoubleFree(address));
        }
        *occupied = false;
        self.free_list.push((page_index, slot));
        self.allocations -= 1;
        profile_plot!("Pool allocator used bytes", self.used_memory_size());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), AllocError> {
        self.reset_free_list();
        self.allocations = 0;
        profile_plot!("Pool allocator used bytes", 0);
        Ok(())
    }

    fn total_memory_size(&self) -> usize {
        self.pages.len() * self.page_size
    }

    fn used_memory_size(&self) -> usize {
        self.allocations * self.element_size
    }

    fn allocations_count(&self) -> usize {
        self.allocations
    }

    fn memory_mut(&mut self, ptr: NonNull<u8>, len: usize) -> Option<&mut [u8]> {
        if len > self.element_size {
            return None;
        }
        let (page_index, slot) = self.slot_of(ptr)?;
        let pool_page = &mut self.pages[page_index];
        if !pool_page.occupied[slot] {
            return None;
        }
        let offset = pool_page.first_slot + slot * self.stride;
        pool_page.page.bytes_mut(offset, len)
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::create_pool_allocator;

    const ELEMENT: usize = 64;
    const PAGE: usize = 1024;

    #[test]
    fn test_oversized_request_fails() {
        let mut allocator = create_pool_allocator(ELEMENT, 8, PAGE, GrowthPolicy::Fixed).unwrap();
        assert!(allocator.allocate(ELEMENT + 1, 8).is_none());
        assert!(allocator.allocate(ELEMENT, 16).is_none());
        assert_eq!(allocator.allocations_count(), 0);
    }

    #[test]
    fn test_exact_size_allocations_use_element_size() {
        let mut allocator = create_pool_allocator(ELEMENT, 8, PAGE, GrowthPolicy::Fixed).unwrap();
        let count = 10;
        for _ in 0..count {
            assert!(allocator.allocate(ELEMENT, 8).is_some());
        }
        assert_eq!(allocator.used_memory_size(), count * ELEMENT);
        assert_eq!(allocator.allocations_count(), count);
    }

    #[test]
    fn test_clear_keeps_pages() {
        let mut allocator = create_pool_allocator(ELEMENT, 8, PAGE, GrowthPolicy::Grow).unwrap();
        let per_page = allocator.slots_per_page();
        for _ in 0..per_page * 2 + 1 {
            allocator.allocate(ELEMENT, 8).unwrap();
        }
        let pages = allocator.page_count();
        assert_eq!(pages, 3);

        allocator.clear().unwrap();
        assert_eq!(allocator.used_memory_size(), 0);
        assert_eq!(allocator.total_memory_size(), pages * PAGE);
    }

    #[test]
    fn test_fixed_pool_exhausts_and_recycles() {
        let mut allocator = create_pool_allocator(ELEMENT, 8, PAGE, GrowthPolicy::Fixed).unwrap();
        let blocks: Vec<_> = std::iter::from_fn(|| allocator.allocate(ELEMENT, 8)).collect();
        assert_eq!(blocks.len(), allocator.slots_per_page());

        allocator.deallocate(blocks[3]).unwrap();
        assert_eq!(allocator.allocate(ELEMENT, 8), Some(blocks[3]));
    }

    #[test]
    fn test_invalid_frees() {
        let mut allocator = create_pool_allocator(ELEMENT, 8, PAGE, GrowthPolicy::Fixed).unwrap();
        let ptr = allocator.allocate(ELEMENT, 8).unwrap();
        allocator.deallocate(ptr).unwrap();
        assert_eq!(allocator.deallocate(ptr).unwrap_err().kind(), ErrorKind::Fail);

        let misaligned = NonNull::new(ptr.as_ptr().wrapping_add(1)).unwrap();
        assert_eq!(
            allocator.deallocate(misaligned).unwrap_err().kind(),
            ErrorKind::InvalidArgs
        );
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let mut allocator = create_pool_allocator(24, 8, 256, GrowthPolicy::Fixed).unwrap();
        let a = allocator.allocate(24, 8).unwrap();
        let b = allocator.allocate(24, 8).unwrap();
        assert_eq!(a.as_ptr() as usize % 8, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 24);

        allocator.memory_mut(a, 24).unwrap().fill(1);
        allocator.memory_mut(b, 24).unwrap().fill(2);
        assert!(allocator.memory_mut(a, 24).unwrap().iter().all(|&v| v == 1));
        assert!(allocator.memory_mut(a, 25).is_none());
    }
}
