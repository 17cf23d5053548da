//! Host access seam: memory-mapped register windows, sleeps, and the mailbox
//! round trip, behind one trait so the CB-ring/board/clock arithmetic can be
//! exercised without root or real silicon.
//!
//! Volatile MMIO ordering and the ARM memory barriers real firmware relies on
//! are approximated here with [`std::sync::atomic::fence`], since this crate
//! runs as a Linux userspace process rather than bare metal.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{PwmError, PwmResult};

/// Minimum datasheet-required settle time after a clock/PWM/DMA register
/// mutation.
pub const REGISTER_SETTLE: Duration = Duration::from_micros(10);

/// A mapped block of device registers (or, in tests, a heap stand-in with the
/// same byte layout) accessed with volatile reads/writes and barriers.
pub struct RegisterWindow {
    base: *mut u8,
    len: usize,
    _backing: RegisterWindowBacking,
}

enum RegisterWindowBacking {
    Mmap(MmapMut),
    Heap(Box<[u8]>),
}

// SAFETY: the window owns its backing storage for its entire lifetime and
// every access goes through volatile read/write; nothing here assumes any
// particular thread affinity.
unsafe impl Send for RegisterWindow {}

impl RegisterWindow {
    fn from_mmap(mmap: MmapMut) -> Self {
        let base = mmap.as_ptr() as *mut u8;
        let len = mmap.len();
        Self {
            base,
            len,
            _backing: RegisterWindowBacking::Mmap(mmap),
        }
    }

    /// A heap-backed window for host-side tests of register sequencing logic.
    pub fn new_heap(len: usize) -> Self {
        let mut heap = vec![0u8; len].into_boxed_slice();
        let base = heap.as_mut_ptr();
        Self {
            base,
            len,
            _backing: RegisterWindowBacking::Heap(heap),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Volatile 32-bit read at `byte_offset`, fenced so it cannot be reordered
    /// past neighboring register accesses.
    ///
    /// # Panics
    /// If `byte_offset + 4 > len()`.
    pub fn read32(&self, byte_offset: usize) -> u32 {
        assert!(byte_offset + 4 <= self.len, "register read out of bounds");
        fence(Ordering::SeqCst);
        // SAFETY: offset checked above; base is valid for len bytes.
        let value = unsafe { ptr::read_volatile(self.base.add(byte_offset) as *const u32) };
        fence(Ordering::SeqCst);
        value
    }

    /// Volatile 32-bit write at `byte_offset`, fenced on both sides.
    ///
    /// # Panics
    /// If `byte_offset + 4 > len()`.
    pub fn write32(&self, byte_offset: usize, value: u32) {
        assert!(byte_offset + 4 <= self.len, "register write out of bounds");
        fence(Ordering::SeqCst);
        // SAFETY: offset checked above; base is valid for len bytes.
        unsafe { ptr::write_volatile(self.base.add(byte_offset) as *mut u32, value) };
        fence(Ordering::SeqCst);
    }

    /// Base pointer, for callers (the uncached memory provider) that need to
    /// hand out raw addresses for DMA source/destination fields.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }
}

/// Everything the engine needs from the host OS, isolated so tests can supply
/// a fake and drive the CB-ring/channel/clock state machines without root.
///
/// `Send + Sync` because [`crate::PwmEngine`] lives behind the process-wide
/// `Mutex` in [`crate::global_engine`]; the trait itself still promises
/// nothing about concurrent calls, leaving that to the caller.
pub trait HardwareAccess: Send + Sync {
    /// mmap a `len`-byte window of physical memory at `phys_addr` via `/dev/mem`.
    fn mmap_physical(&self, phys_addr: u64, len: usize) -> PwmResult<RegisterWindow>;

    /// mmap a `len`-byte window of bus-addressed memory (used for the uncached
    /// provider's `map` step, after masking off the VideoCore alias bits).
    fn mmap_bus(&self, bus_addr: u32, len: usize) -> PwmResult<RegisterWindow> {
        self.mmap_physical((bus_addr & !0xC000_0000) as u64, len)
    }

    /// Issue one mailbox property-tag round trip over `/dev/vcio`.
    ///
    /// `buffer` is filled in place with the VideoCore's response, matching the
    /// in-place semantics of the real `IOCTL_MBOX_PROPERTY` call.
    fn mailbox_call(&self, buffer: &mut [u32]) -> PwmResult<()>;

    /// Sleep for at least the requested duration. The only suspension point
    /// the engine exposes to callers.
    fn sleep(&self, duration: Duration);
}

/// Real Linux implementation: `/dev/mem` for peripheral/bus windows, `/dev/vcio`
/// for the mailbox, `nanosleep` (via [`std::thread::sleep`]) for settle delays.
pub struct LinuxHardware {
    vcio: std::fs::File,
}

impl LinuxHardware {
    pub fn open() -> PwmResult<Self> {
        let vcio = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/vcio")
            .map_err(|e| PwmError::MapFailed(format!("open /dev/vcio: {e}")))?;
        Ok(Self { vcio })
    }
}

impl HardwareAccess for LinuxHardware {
    fn mmap_physical(&self, phys_addr: u64, len: usize) -> PwmResult<RegisterWindow> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|e| PwmError::MapFailed(format!("open /dev/mem: {e}")))?;
        // SAFETY: /dev/mem mmap of a page-aligned peripheral window; the
        // resulting region is accessed only through volatile reads/writes.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(phys_addr)
                .len(len)
                .map_mut(&file)
        }
        .map_err(|e| PwmError::MapFailed(format!("mmap {phys_addr:#x}: {e}")))?;
        Ok(RegisterWindow::from_mmap(mmap))
    }

    fn mailbox_call(&self, buffer: &mut [u32]) -> PwmResult<()> {
        // Property interface: _IOWR(100, 0, char*). The ioctl number is
        // request-coded with direction=RW, magic=100 ('d' historically used by
        // the firmware headers), number=0, size=size_of::<usize>() (a pointer).
        const IOCTL_MBOX_PROPERTY: libc::c_ulong = mbox_property_ioctl();

        let ret = unsafe {
            libc::ioctl(
                self.vcio.as_raw_fd(),
                IOCTL_MBOX_PROPERTY,
                buffer.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(PwmError::MailboxFailed(format!(
                "ioctl failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Compute `_IOWR(100, 0, char*)` the same way the Linux `<sys/ioctl.h>`
/// macros do, without depending on a generated binding for this one request.
const fn mbox_property_ioctl() -> libc::c_ulong {
    const DIR_READ_WRITE: libc::c_ulong = 3;
    const TYPE_BITS: u32 = 8;
    const NR_BITS: u32 = 8;
    const SIZE_BITS: u32 = 14;
    const NR_SHIFT: u32 = 0;
    const TYPE_SHIFT: u32 = NR_SHIFT + NR_BITS;
    const SIZE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;
    const DIR_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;

    let nr: libc::c_ulong = 0;
    let ty: libc::c_ulong = 100;
    // Every known userspace VideoCore mailbox client hardcodes this as a
    // 4-byte (`char*` on ILP32) argument size regardless of host pointer
    // width, which is what makes the request code the fixed `0xC0046400`.
    let size: libc::c_ulong = 4;

    (DIR_READ_WRITE << DIR_SHIFT) | (ty << TYPE_SHIFT) | (nr << NR_SHIFT) | (size << SIZE_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_window_roundtrips() {
        let window = RegisterWindow::new_heap(16);
        window.write32(0, 0xDEAD_BEEF);
        window.write32(4, 0x1234_5678);
        assert_eq!(window.read32(0), 0xDEAD_BEEF);
        assert_eq!(window.read32(4), 0x1234_5678);
    }

    #[test]
    #[should_panic]
    fn heap_window_rejects_out_of_bounds_read() {
        let window = RegisterWindow::new_heap(4);
        window.read32(4);
    }

    #[test]
    fn ioctl_request_code_matches_known_mailbox_constant() {
        assert_eq!(mbox_property_ioctl() as u64, 0xC004_6400);
    }
}
