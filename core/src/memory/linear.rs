use std::ptr::NonNull;

use super::page::{self, Page};
use super::{AllocError, Allocator, AllocatorKind, GrowthPolicy};
use crate::profile_plot;

/// Bump allocator: allocations are carved sequentially from the current page
/// and only released together by [`Allocator::clear`].
///
/// ```
/// use tde_core::memory::{Allocator, GrowthPolicy, create_linear_allocator};
///
/// let mut arena = create_linear_allocator(256, GrowthPolicy::Fixed).unwrap();
/// assert!(arena.allocate(512, 1).is_none()); // larger than the arena
///
/// for _ in 0..4 {
///     arena.allocate(64, 1).unwrap();
/// }
/// assert_eq!(arena.used_memory_size(), 256);
/// assert!(arena.allocate(1, 1).is_none());
/// ```
#[derive(Debug)]
pub struct LinearAllocator {
    pages: Vec<Page>,
    current: usize,
    page_size: usize,
    growth: GrowthPolicy,
    allocations: usize,
}

impl LinearAllocator {
    pub(super) fn new(page_size: usize, growth: GrowthPolicy) -> Self {
        Self {
            pages: vec![Page::new(page_size)],
            current: 0,
            page_size,
            growth,
            allocations: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl Allocator for LinearAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 || !align.is_power_of_two() || size > self.page_size {
            return None;
        }

        loop {
            if let Some((offset, _)) = self.pages[self.current].bump(size, align, 0) {
                self.allocations += 1;
                profile_plot!("Linear allocator used bytes", self.used_memory_size());
                return self.pages[self.current].ptr_at(offset);
            }

            // Pages kept by a previous `clear` are reused before growing.
            if self.current + 1 < self.pages.len() {
                self.current += 1;
                continue;
            }

            match self.growth {
                GrowthPolicy::Fixed => return None,
                GrowthPolicy::Grow => {
                    log::trace!("linear allocator grows to {} pages", self.pages.len() + 1);
                    self.pages.push(Page::new(self.page_size));
                    self.current = self.pages.len() - 1;
                }
            }
        }
    }

    fn deallocate(&mut self, _ptr: NonNull<u8>) -> Result<(), AllocError> {
        Err(AllocError::Unsupported {
            allocator: AllocatorKind::Linear,
            operation: "deallocate",
        })
    }

    fn clear(&mut self) -> Result<(), AllocError> {
        for page in &mut self.pages {
            page.top = 0;
        }
        self.current = 0;
        self.allocations = 0;
        profile_plot!("Linear allocator used bytes", 0);
        Ok(())
    }

    fn total_memory_size(&self) -> usize {
        self.pages.len() * self.page_size
    }

    fn used_memory_size(&self) -> usize {
        self.pages.iter().map(|page| page.top).sum()
    }

    fn allocations_count(&self) -> usize {
        self.allocations
    }

    fn memory_mut(&mut self, ptr: NonNull<u8>, len: usize) -> Option<&mut [u8]> {
        let (index, offset) = page::locate(&self.pages, ptr)?;
        let page = &mut self.pages[index];
        if offset.checked_add(len)? > page.top {
            return None;
        }
        page.bytes_mut(offset, len)
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Linear
    }
}
