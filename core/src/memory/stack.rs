use std::ptr::NonNull;

use super::page::{self, Page};
use super::{AllocError, Allocator, AllocatorKind, GrowthPolicy};
use crate::profile_plot;

/// Bytes reserved in front of every block; they store the page top that was
/// current before the block was pushed.
pub(super) const HEADER_SIZE: usize = std::mem::size_of::<usize>();

struct StackRecord {
    page: usize,
    offset: usize,
    freed: bool,
}

/// LIFO allocator with individually freed blocks.
///
/// Freeing the top block rewinds the stack immediately. Blocks freed out of
/// order are marked and reclaimed as soon as everything above them is gone,
/// so releasing all blocks in any order always returns the allocator to an
/// empty state.
///
/// Bulk [`clear`](Allocator::clear) is not supported and always fails.
pub struct StackAllocator {
    pages: Vec<Page>,
    current: usize,
    page_size: usize,
    growth: GrowthPolicy,
    records: Vec<StackRecord>,
    live: usize,
}

impl StackAllocator {
    pub(super) fn new(page_size: usize, growth: GrowthPolicy) -> Self {
        Self {
            pages: vec![Page::new(page_size)],
            current: 0,
            page_size,
            growth,
            records: Vec::new(),
            live: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn write_header(&mut self, page: usize, offset: usize, previous_top: usize) {
        if let Some(header) = self.pages[page].bytes_mut(offset - HEADER_SIZE, HEADER_SIZE) {
            header.copy_from_slice(&previous_top.to_le_bytes());
        }
    }

    fn read_header(&self, page: usize, offset: usize) -> usize {
        let previous_top = self.pages[page]
            .bytes(offset - HEADER_SIZE, HEADER_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
            .map(usize::from_le_bytes);
        debug_assert!(previous_top.is_some(), "stack header out of page bounds");
        previous_top.unwrap_or(offset - HEADER_SIZE)
    }

    /// Pops freed blocks off the top of the stack.
    fn unwind(&mut self) {
        while let Some(record) = self.records.last() {
            if !record.freed {
                break;
            }
            let (page, offset) = (record.page, record.offset);
            self.records.pop();

            self.pages[page].top = self.read_header(page, offset);
            if self.pages[page].top == 0 && page == self.current && self.current > 0 {
                self.current -= 1;
            }
        }
    }
}

impl Allocator for StackAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 || !align.is_power_of_two() || size + HEADER_SIZE > self.page_size {
            return None;
        }

        loop {
            if let Some((offset, previous_top)) =
                self.pages[self.current].bump(size, align, HEADER_SIZE)
            {
                let page = self.current;
                self.write_header(page, offset, previous_top);
                self.records.push(StackRecord {
                    page,
                    offset,
                    freed: false,
                });
                self.live += 1;
                profile_plot!("Stack allocator used bytes", self.used_memory_size());
                return self.pages[page].ptr_at(offset);
            }

            if self.current + 1 < self.pages.len() {
                self.current += 1;
                continue;
            }

            match self.growth {
                GrowthPolicy::Fixed => return None,
                GrowthPolicy::Grow => {
                    log::trace!("stack allocator grows to {} pages", self.pages.len() + 1);
                    self.pages.push(Page::new(self.page_size));
                    self.current = self.pages.len() - 1;
                }
            }
        }
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let address = ptr.as_ptr() as usize;
        let (page, offset) =
            page::locate(&self.pages, ptr).ok_or(AllocError::ForeignPointer(address))?;

        let record = self
            .records
            .iter_mut()
            .rev()
            .find(|record| record.page == page && record.offset == offset)
            .ok_or(AllocError::DoubleFree(address))?;
        if record.freed {
            return Err(AllocError::DoubleFree(address));
        }

        record.freed = true;
        self.live -= 1;
        self.unwind();
        profile_plot!("Stack allocator used bytes", self.used_memory_size());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), AllocError> {
        Err(AllocError::Unsupported {
            allocator: AllocatorKind::Stack,
            operation: "clear",
        })
    }

    fn total_memory_size(&self) -> usize {
        self.pages.len() * self.page_size
    }

    fn used_memory_size(&self) -> usize {
        self.pages.iter().map(|page| page.top).sum()
    }

    fn allocations_count(&self) -> usize {
        self.live
    }

    fn memory_mut(&mut self, ptr: NonNull<u8>, len: usize) -> Option<&mut [u8]> {
        let (page, offset) = page::locate(&self.pages, ptr)?;
        let live = self
            .records
            .iter()
            .any(|record| record.page == page && record.offset == offset && !record.freed);
        if !live || offset.checked_add(len)? > self.pages[page].top {
            return None;
        }
        self.pages[page].bytes_mut(offset, len)
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::create_stack_allocator;

    const TOTAL: usize = 4096;

    #[test]
    fn test_clear_always_fails() {
        let mut allocator = create_stack_allocator(TOTAL, GrowthPolicy::Fixed).unwrap();
        assert_eq!(allocator.clear().unwrap_err().kind(), ErrorKind::Fail);

        allocator.allocate(32, 8).unwrap();
        assert_eq!(allocator.clear().unwrap_err().kind(), ErrorKind::Fail);
    }

    #[test]
    fn test_headers_count_towards_used_memory() {
        let mut allocator = create_stack_allocator(TOTAL, GrowthPolicy::Fixed).unwrap();
        for _ in 0..10 {
            allocator.allocate(128, 8).unwrap();
        }
        assert_eq!(allocator.allocations_count(), 10);
        assert!(allocator.used_memory_size() >= 10 * (128 + HEADER_SIZE));
    }

    #[test]
    fn test_deallocate_in_allocation_order() {
        let mut allocator = create_stack_allocator(TOTAL, GrowthPolicy::Fixed).unwrap();
        let blocks: Vec<_> = (0..10).map(|_| allocator.allocate(128, 8).unwrap()).collect();

        for (freed, ptr) in blocks.into_iter().enumerate() {
            allocator.deallocate(ptr).unwrap();
            assert_eq!(allocator.allocations_count(), 10 - freed - 1);
        }
        assert_eq!(allocator.allocations_count(), 0);
        assert_eq!(allocator.used_memory_size(), 0);
    }

    #[test]
    fn test_lifo_release_rewinds_top() {
        let mut allocator = create_stack_allocator(TOTAL, GrowthPolicy::Fixed).unwrap();
        let first = allocator.allocate(64, 8).unwrap();
        let used_after_first = allocator.used_memory_size();
        let second = allocator.allocate(64, 8).unwrap();

        allocator.deallocate(second).unwrap();
        assert_eq!(allocator.used_memory_size(), used_after_first);

        // The freed region is handed out again.
        let third = allocator.allocate(64, 8).unwrap();
        assert_eq!(third, second);

        allocator.deallocate(third).unwrap();
        allocator.deallocate(first).unwrap();
        assert_eq!(allocator.used_memory_size(), 0);
    }

    #[test]
    fn test_double_free_and_foreign_pointer() {
        let mut allocator = create_stack_allocator(TOTAL, GrowthPolicy::Fixed).unwrap();
        let bottom = allocator.allocate(16, 8).unwrap();
        let _top = allocator.allocate(16, 8).unwrap();

        allocator.deallocate(bottom).unwrap();
        assert_eq!(
            allocator.deallocate(bottom).unwrap_err(),
            AllocError::DoubleFree(bottom.as_ptr() as usize)
        );

        let mut other = create_stack_allocator(TOTAL, GrowthPolicy::Fixed).unwrap();
        let foreign = other.allocate(16, 8).unwrap();
        assert_eq!(
            allocator.deallocate(foreign).unwrap_err().kind(),
            ErrorKind::InvalidArgs
        );
    }

    #[test]
    fn test_grows_and_shrinks_across_pages() {
        let mut allocator = create_stack_allocator(256, GrowthPolicy::Grow).unwrap();
        let blocks: Vec<_> = (0..6).map(|_| allocator.allocate(100, 8).unwrap()).collect();
        assert!(allocator.page_count() > 1);

        for ptr in blocks.into_iter().rev() {
            allocator.deallocate(ptr).unwrap();
        }
        assert_eq!(allocator.allocations_count(), 0);
        assert_eq!(allocator.used_memory_size(), 0);
    }

    #[test]
    fn test_fixed_stack_exhausts() {
        let mut allocator = create_stack_allocator(256, GrowthPolicy::Fixed).unwrap();
        assert!(allocator.allocate(256, 1).is_none());
        assert!(allocator.allocate(200, 8).is_some());
        assert!(allocator.allocate(200, 8).is_none());
    }
}
