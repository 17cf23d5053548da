//! Peripheral register offsets and bitfields.
//!
//! Plain constants, not a `bitflags` type: every register here is written as
//! one composed `u32` at a single call site, so a flags type would buy
//! nothing beyond what `|` between named constants already reads as.
//!
//! Offsets and bit positions come from the BCM2835 ARM Peripherals datasheet
//! (GPIO, DMA controller, PWM chapters) plus the clock manager layout as
//! reverse-engineered by the Linux `clk-bcm2835` driver and the wider
//! community (the datasheet itself never documents the clock manager).

/// GPIO register block, offset from the peripheral base.
pub mod gpio {
    use crate::hardware::RegisterWindow;

    /// `GPFSELn`: function-select registers, 3 bits per pin, 10 pins per word.
    pub const GPFSEL0: usize = 0x00;

    /// `GPSET0`: writing a 1 to bit `n` sets GPIO `n` high.
    pub const GPSET0: usize = 0x1C;

    /// `GPCLR0`: writing a 1 to bit `n` drives GPIO `n` low.
    pub const GPCLR0: usize = 0x28;

    /// Output function-select value (`001`) common to all `GPFSELn` fields.
    pub const FSEL_OUTPUT: u32 = 0b001;

    /// Compute the `GPFSELn` register offset and bit shift for GPIO `pin`.
    pub fn fsel_location(pin: u8) -> (usize, u32) {
        let reg = GPFSEL0 + (pin as usize / 10) * 4;
        let shift = (pin as u32 % 10) * 3;
        (reg, shift)
    }

    /// Drive GPIO `pin`'s function-select field to output.
    pub fn set_output(window: &RegisterWindow, pin: u8) {
        let (reg, shift) = fsel_location(pin);
        let mut value = window.read32(reg);
        value &= !(0b111 << shift);
        value |= FSEL_OUTPUT << shift;
        window.write32(reg, value);
    }
}

/// DMA controller register block. Channel `n`'s window starts at
/// `0x100 * n` from the controller base.
pub mod dma {
    pub const CHANNEL_STRIDE: usize = 0x100;

    pub const CS: usize = 0x00;
    pub const CONBLK_AD: usize = 0x04;

    pub const CS_ACTIVE: u32 = 1 << 0;
    pub const CS_END: u32 = 1 << 1;
    pub const CS_RESET: u32 = 1 << 31;
    pub const CS_ABORT: u32 = 1 << 30;
    pub const CS_WAIT_FOR_OUTSTANDING_WRITES: u32 = 1 << 28;
    pub const CS_PANIC_PRIORITY_SHIFT: u32 = 20;
    pub const CS_PRIORITY_SHIFT: u32 = 16;

    /// `PANIC_PRIO(7) | PRIO(7) | WAIT_FOR_OUTSTANDING_WRITES`, the priority
    /// bits loaded into `CS` right before setting `ACTIVE`.
    pub fn cs_load_priority() -> u32 {
        (7 << CS_PANIC_PRIORITY_SHIFT) | (7 << CS_PRIORITY_SHIFT) | CS_WAIT_FOR_OUTSTANDING_WRITES
    }

    /// Control-block `info` field bits.
    pub mod info {
        pub const NO_WIDE_BURSTS: u32 = 1 << 26;
        pub const WAIT_RESP: u32 = 1 << 3;
        pub const DREQ: u32 = 1 << 6;

        /// `PER_MAP(n)`: select peripheral `n` as the DREQ source, bits 16..20.
        pub fn per_map(peripheral: u32) -> u32 {
            (peripheral & 0x1F) << 16
        }

        /// Peripheral index for the PWM FIFO's DREQ.
        pub const PWM_PERIPHERAL: u32 = 5;
    }
}

/// PWM controller register block.
pub mod pwm {
    pub const CTL: usize = 0x00;
    pub const DMAC: usize = 0x08;
    pub const RNG1: usize = 0x10;
    pub const FIF1: usize = 0x18;

    pub const CTL_PWEN1: u32 = 1 << 0;
    pub const CTL_USEF1: u32 = 1 << 5;
    pub const CTL_CLRF1: u32 = 1 << 6;

    pub const DMAC_ENAB: u32 = 1 << 31;

    /// `DREQ_THRESH(15) | PANIC_THRESH(15<<8)`.
    pub fn dmac_thresholds() -> u32 {
        DMAC_ENAB | 15 | (15 << 8)
    }
}

/// PWM clock manager register block (`CM_PWMCTL`/`CM_PWMDIV`), not to be
/// confused with the generic clock manager (`CM_GNRICCTL`/`CM_GNRICDIV` at
/// offsets `0x00`/`0x04` in the same window). The PWM peripheral is paced by
/// its own dedicated clock generator further into the clock manager block.
pub mod clock_manager {
    pub const CTL: usize = 0xA0;
    pub const DIV: usize = 0xA4;

    /// Bits 31:24 of every clock-manager write.
    pub const PASSWORD: u32 = 0x5A << 24;

    pub const CTL_SRC_PLLD: u32 = 6;
    pub const CTL_ENAB: u32 = 1 << 4;

    pub const DIV_SHIFT: u32 = 12;

    /// PLLD frequency feeding the clock manager.
    pub const SOURCE_HZ: f64 = 500_000_000.0;
}
