//! Uncached DMA memory provider: wires the mailbox allocate/lock round trip
//! to a `/dev/mem` mapping of the resulting bus address, and hands back a
//! [`dma_pool::UncachedBlock`] the rest of the engine can use to compute
//! bus addresses for control-block fields.

use std::sync::Arc;

use dma_pool::UncachedBlock;

use crate::board::PAGE_SIZE;
use crate::error::PwmResult;
use crate::hardware::{HardwareAccess, RegisterWindow};
use crate::mailbox;

/// A page-aligned uncached block plus the mapping that keeps its virtual
/// address valid. Dropping this releases the VideoCore-side allocation.
///
/// Holds the hardware handle by `Arc` rather than by reference so channels
/// (and the pages within them) can outlive any particular borrow of the
/// engine that created them, while still sharing one `/dev/vcio` handle.
pub struct UncachedPages {
    hw: Arc<dyn HardwareAccess>,
    block: UncachedBlock,
    _mapping: RegisterWindow,
}

impl UncachedPages {
    /// Allocate, lock, and map `pages` page-sized, page-aligned blocks.
    pub fn allocate(hw: Arc<dyn HardwareAccess>, pages: usize) -> PwmResult<Self> {
        let size = (pages * PAGE_SIZE) as u32;
        let alloc = mailbox::allocate_and_lock(hw.as_ref(), size, PAGE_SIZE as u32)?;
        let mapping = hw.mmap_bus(alloc.bus_addr, size as usize)?;
        let block = UncachedBlock::new(
            size as usize,
            PAGE_SIZE,
            alloc.handle,
            alloc.bus_addr,
            mapping.as_mut_ptr(),
        );
        Ok(Self {
            hw,
            block,
            _mapping: mapping,
        })
    }

    pub fn block(&self) -> &UncachedBlock {
        &self.block
    }
}

impl Drop for UncachedPages {
    fn drop(&mut self) {
        // Best effort: there is no way to propagate a teardown failure from
        // here, and a leaked VideoCore handle is preferable to a panic in a
        // destructor that may run during process exit.
        let _ = mailbox::unlock_and_release(self.hw.as_ref(), self.block.mb_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FakeHardware {
        release_calls: AtomicU32,
    }

    impl HardwareAccess for FakeHardware {
        fn mmap_physical(&self, _: u64, len: usize) -> PwmResult<RegisterWindow> {
            Ok(RegisterWindow::new_heap(len))
        }

        fn mailbox_call(&self, buffer: &mut [u32]) -> PwmResult<()> {
            let tag = buffer[2];
            buffer[1] = 0x8000_0000;
            match tag {
                0x0003_000C => buffer[5] = 42,          // AllocateMemory -> handle
                0x0003_000D => buffer[5] = 0x1E00_0000, // LockMemory -> bus addr
                0x0003_000E | 0x0003_000F => {
                    self.release_calls.fetch_add(1, Ordering::SeqCst);
                }
                _ => panic!("unexpected tag {tag:#x}"),
            }
            Ok(())
        }

        fn sleep(&self, _: Duration) {}
    }

    #[test]
    fn allocate_produces_a_page_sized_block() {
        let hw: Arc<dyn HardwareAccess> = Arc::new(FakeHardware {
            release_calls: AtomicU32::new(0),
        });
        let pages = UncachedPages::allocate(hw, 4).unwrap();
        assert_eq!(pages.block().size(), 4 * PAGE_SIZE);
        assert_eq!(pages.block().mb_handle(), 42);
        assert_eq!(pages.block().bus_addr(), 0x1E00_0000);
    }

    #[test]
    fn drop_releases_the_mailbox_allocation() {
        let hw = Arc::new(FakeHardware {
            release_calls: AtomicU32::new(0),
        });
        {
            let _pages = UncachedPages::allocate(hw.clone(), 1).unwrap();
        }
        assert_eq!(hw.release_calls.load(Ordering::SeqCst), 2);
    }
}
