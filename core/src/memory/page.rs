use std::ptr::NonNull;

/// A contiguous block of bytes owned by an allocator.
///
/// Pages never move or resize once created, so pointers handed out into
/// them stay stable for the lifetime of the page.
#[derive(Debug)]
pub(crate) struct Page {
    data: Box<[u8]>,
    /// First unused byte offset (bump pointer) for linear and stack pages.
    pub(crate) top: usize,
}

impl Page {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            top: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn base_address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Offset of `ptr` in this page, if the page contains it.
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let address = ptr.as_ptr() as usize;
        let base = self.base_address();
        (address >= base && address < base + self.capacity()).then(|| address - base)
    }

    pub(crate) fn ptr_at(&mut self, offset: usize) -> Option<NonNull<u8>> {
        if offset >= self.capacity() {
            return None;
        }
        NonNull::new(self.data.as_mut_ptr().wrapping_add(offset))
    }

    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        self.data.get_mut(offset..end)
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.data.get(offset..end)
    }

    /// Bump-allocates `size` bytes aligned to `align` after `header` bytes.
    ///
    /// Returns the offset of the aligned block and the offset the page's
    /// top had before the allocation.
    pub(crate) fn bump(&mut self, size: usize, align: usize, header: usize) -> Option<(usize, usize)> {
        let start = self.top;
        let address = self.base_address() + start;
        let padding = if header == 0 {
            super::padding(address, align)
        } else {
            super::padding_with_header(address, align, header)
        };
        let offset = start.checked_add(padding)?;
        let end = offset.checked_add(size)?;
        if end > self.capacity() {
            return None;
        }
        self.top = end;
        Some((offset, start))
    }
}

/// Finds the page owning `ptr` and returns its index and the offset inside it.
pub(crate) fn locate(pages: &[Page], ptr: NonNull<u8>) -> Option<(usize, usize)> {
    pages
        .iter()
        .enumerate()
        .find_map(|(index, page)| page.offset_of(ptr).map(|offset| (index, offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_respects_alignment_and_capacity() {
        let mut page = Page::new(64);
        let (offset, start) = page.bump(10, 8, 0).unwrap();
        assert_eq!(start, 0);
        assert_eq!((page.base_address() + offset) % 8, 0);

        assert!(page.bump(128, 1, 0).is_none());
        // A failed bump leaves the page untouched.
        assert_eq!(page.top, offset + 10);
    }

    #[test]
    fn test_locate() {
        let mut pages = vec![Page::new(32), Page::new(32)];
        let ptr = pages[1].ptr_at(5).unwrap();
        assert_eq!(locate(&pages, ptr), Some((1, 5)));

        let mut outside = Page::new(8);
        let foreign = outside.ptr_at(0).unwrap();
        assert_eq!(locate(&pages, foreign), None);
    }
}
