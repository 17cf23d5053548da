//! A single DMA channel's lifecycle: request, double-buffered CB generation,
//! arm/disable, and release.

use std::sync::Arc;

use crate::board::PAGE_SIZE;
use crate::cb::{self, CbPlan, CbTargets, ControlBlock};
use crate::error::{PwmError, PwmResult};
use crate::hardware::{HardwareAccess, RegisterWindow, REGISTER_SETTLE};
use crate::memory::UncachedPages;
use crate::registers::dma;

/// Bus addresses fixed for the channel's whole lifetime: the GPIO set/clear
/// registers and the PWM FIFO, all shared by every channel in the pool.
#[derive(Clone, Copy)]
pub struct ChannelTargets {
    pub gpset0_bus: u32,
    pub gpclr0_bus: u32,
    pub pwm_fifo_bus: u32,
}

/// One entry of the fixed seven-channel pool.
pub struct Channel {
    physical_index: u8,
    dma_offset: usize,
    targets: ChannelTargets,
    cb_pages: [UncachedPages; 2],
    mask_pages: [UncachedPages; 2],
    selected_buf: usize,
    enabled: bool,
    seq_built: bool,
    plan: Option<CbPlan>,
    gpios: Vec<u8>,
}

impl Channel {
    /// Allocate both CB buffers and both mask words for physical DMA channel
    /// `physical_index`, and compute its register window offset.
    pub fn request(
        hw: Arc<dyn HardwareAccess>,
        physical_index: u8,
        pages: usize,
        targets: ChannelTargets,
    ) -> PwmResult<Self> {
        let cb_pages = [
            UncachedPages::allocate(hw.clone(), pages)?,
            UncachedPages::allocate(hw.clone(), pages)?,
        ];
        let mask_pages = [
            UncachedPages::allocate(hw.clone(), 1)?,
            UncachedPages::allocate(hw, 1)?,
        ];
        Ok(Self {
            physical_index,
            dma_offset: physical_index as usize * dma::CHANNEL_STRIDE,
            targets,
            cb_pages,
            mask_pages,
            selected_buf: 1,
            enabled: false,
            seq_built: false,
            plan: None,
            gpios: Vec::new(),
        })
    }

    pub fn physical_index(&self) -> u8 {
        self.physical_index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_seq_built(&self) -> bool {
        self.seq_built
    }

    pub fn plan(&self) -> Option<&CbPlan> {
        self.plan.as_ref()
    }

    /// Build a new CB ring into the inactive buffer for `gpios` at `freq_hz`/
    /// `duty_percent`. If the channel is already enabled, this live-updates
    /// the running DMA stream once the new ring is complete.
    #[allow(clippy::too_many_arguments)]
    pub fn set_pwm(
        &mut self,
        hw: &dyn HardwareAccess,
        dma: &RegisterWindow,
        gpio: &RegisterWindow,
        gpios: &[u8],
        freq_hz: f64,
        duty_percent: f64,
        pulse_width_us: f64,
        page_budget: usize,
    ) -> PwmResult<()> {
        if gpios.is_empty() || gpios.iter().any(|&g| g > 31) {
            return Err(PwmError::InvalidGpio);
        }

        let plan = cb::derive(pulse_width_us, freq_hz, duty_percent)?;
        let needed = plan.pages_needed(PAGE_SIZE);
        if needed > page_budget {
            return Err(PwmError::OutOfMemory {
                needed,
                budget: page_budget,
            });
        }

        let next_buf = 1 - self.selected_buf;
        let mask: u32 = gpios.iter().fold(0u32, |acc, &g| acc | (1 << g));

        let mask_block = self.mask_pages[next_buf].block();
        // SAFETY: the mask page is exclusively owned by this channel and
        // holds at least two `u32` words (set_mask, clear_mask).
        unsafe {
            let words = mask_block.as_ptr::<u32>();
            std::ptr::write_volatile(words, mask);
            std::ptr::write_volatile(words.add(1), mask);
        }
        let set_mask_bus = mask_block.bus_addr();
        let clear_mask_bus = set_mask_bus + std::mem::size_of::<u32>() as u32;

        for &g in gpios {
            crate::registers::gpio::set_output(gpio, g);
        }

        let cb_block = self.cb_pages[next_buf].block();
        let ring_len = plan.seq_total as usize;
        let mut bus_addrs = Vec::with_capacity(ring_len);
        for i in 0..ring_len {
            // SAFETY: `i < ring_len <= pages_needed * (PAGE_SIZE / CB_SIZE)`,
            // already checked against `page_budget` above.
            let ptr = unsafe { cb_block.as_ptr::<ControlBlock>().add(i) as *const u8 };
            bus_addrs.push(
                cb_block
                    .virt_to_bus(ptr)
                    .map_err(|_| PwmError::OutOfMemory {
                        needed,
                        budget: page_budget,
                    })?,
            );
        }

        let targets = CbTargets {
            set_mask_bus,
            clear_mask_bus,
            gpset0_bus: self.targets.gpset0_bus,
            gpclr0_bus: self.targets.gpclr0_bus,
            pwm_fifo_bus: self.targets.pwm_fifo_bus,
            dummy_word_bus: set_mask_bus,
        };

        // SAFETY: `cb_block` is exclusively owned by this channel and sized
        // for at least `ring_len` control blocks (checked via page_budget above).
        let cb_slice = unsafe {
            std::slice::from_raw_parts_mut(cb_block.as_ptr::<ControlBlock>(), ring_len)
        };
        cb::emit(&plan, cb_slice, |i| bus_addrs[i], &targets);

        self.selected_buf = next_buf;
        self.seq_built = true;
        self.plan = Some(plan);
        self.gpios = gpios.to_vec();

        if self.enabled {
            self.arm(hw, dma)?;
        }
        Ok(())
    }

    /// Arm the DMA engine onto the currently selected buffer.
    pub fn enable(&mut self, hw: &dyn HardwareAccess, dma: &RegisterWindow) -> PwmResult<()> {
        if !self.seq_built {
            return Err(PwmError::PwmNotSet);
        }
        self.arm(hw, dma)
    }

    fn arm(&mut self, hw: &dyn HardwareAccess, dma: &RegisterWindow) -> PwmResult<()> {
        let off = self.dma_offset;

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs | dma::CS_ABORT);
        hw.sleep(REGISTER_SETTLE);

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs & !dma::CS_ACTIVE);

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs | dma::CS_END);

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs | dma::CS_RESET);
        hw.sleep(REGISTER_SETTLE);

        let head_bus = self.cb_pages[self.selected_buf].block().bus_addr();
        dma.write32(off + dma::CONBLK_AD, head_bus);
        dma.write32(off + dma::CS, dma::cs_load_priority());

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs | dma::CS_ACTIVE);

        self.enabled = true;
        Ok(())
    }

    /// Halt the DMA stream and drive every previously-set GPIO low, since the
    /// stream may have left a pin high.
    pub fn disable(&mut self, hw: &dyn HardwareAccess, dma: &RegisterWindow, gpio: &RegisterWindow) {
        let off = self.dma_offset;

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs | dma::CS_ABORT);
        hw.sleep(REGISTER_SETTLE);

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs & !dma::CS_ACTIVE);

        let cs = dma.read32(off + dma::CS);
        dma.write32(off + dma::CS, cs | dma::CS_RESET);

        for &g in &self.gpios {
            gpio.write32(crate::registers::gpio::GPCLR0, 1 << g);
        }

        self.enabled = false;
    }

    /// Release this channel's memory. Disabling first is the caller's
    /// responsibility (the engine always disables before freeing).
    pub fn release(self) {
        // Dropping `self` releases `cb_pages`/`mask_pages` via
        // `UncachedPages`'s `Drop`, which unlocks and frees the mailbox
        // allocation.
    }
}
