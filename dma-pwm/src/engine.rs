//! The process-wide engine: configuration, first-time hardware bring-up, and
//! orchestration of the channel pool.
//!
//! Exposed as a single opaque handle rather than free functions operating on
//! module-level globals; see [`crate::global_engine`] for the process-wide
//! singleton wrapper built on top of it.

use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::board::{self, BoardFamily, PAGE_SIZE};
use crate::channel::{Channel, ChannelTargets};
use crate::error::{PwmError, PwmResult};
use crate::hardware::{HardwareAccess, RegisterWindow, REGISTER_SETTLE};
use crate::registers::{clock_manager as cm, gpio, pwm};

/// Lower bound on `pulse_width_us`.
pub const MIN_PULSE_WIDTH_US: f64 = 0.4;
/// Upper bound on `pulse_width_us`.
pub const MAX_PULSE_WIDTH_US: f64 = 3.517_578_214_6e10;

/// The PWM range (period count) a freshly-constructed engine starts with,
/// before any `config_pwm` call. `config_pwm` only holds the *current* range
/// constant, so this is the bootstrap value the engine assumes until the
/// first call changes it.
pub const DEFAULT_PWM_RANGE: u32 = 1000;

/// Physical DMA channel indices tried in order, channel 10 preferred, falling
/// back through the rest of the range the VideoCore firmware leaves free for
/// Linux.
pub const DEFAULT_VALID_CHANNELS: &[u8] = &[10, 8, 9, 11, 12, 13, 14];

struct HardwareState {
    board: BoardFamily,
    gpio: RegisterWindow,
    dma: RegisterWindow,
    #[allow(dead_code)] // mapping kept alive for its Drop; never read back after bring-up
    pwm: RegisterWindow,
    #[allow(dead_code)] // kept for Debug/diagnostics; never re-read after init
    clock: RegisterWindow,
    targets: ChannelTargets,
}

/// The process-wide PWM engine, exposed as an opaque handle rather than
/// module-level globals; see [`crate::global_engine`] for the `OnceLock`/mutex
/// wrapper that makes this a true process singleton.
pub struct PwmEngine {
    hw: Arc<dyn HardwareAccess>,
    divisor: u32,
    pwm_range: u32,
    pulse_width_us: f64,
    pages: usize,
    valid_channels: &'static [u8],
    channels: Vec<Option<Channel>>,
    hardware: Option<HardwareState>,
}

impl PwmEngine {
    /// Construct a not-yet-initialized engine. Hardware bring-up (board
    /// detection, peripheral mmaps, clock/PWM programming) is deferred to the
    /// first [`PwmEngine::request_pwm`] call.
    pub fn new(hw: Arc<dyn HardwareAccess>, valid_channels: &'static [u8]) -> Self {
        Self {
            hw,
            divisor: 1,
            pwm_range: DEFAULT_PWM_RANGE,
            pulse_width_us: 0.0,
            pages: 16,
            valid_channels,
            channels: std::iter::repeat_with(|| None)
                .take(valid_channels.len())
                .collect(),
            hardware: None,
        }
    }

    pub fn with_default_channels(hw: Arc<dyn HardwareAccess>) -> Self {
        Self::new(hw, DEFAULT_VALID_CHANNELS)
    }

    fn any_channel_requested(&self) -> bool {
        self.channels.iter().any(Option::is_some)
    }

    /// Set the engine's page budget and quantum.
    pub fn config_pwm(&mut self, pages: usize, pulse_width_us: f64) -> PwmResult<()> {
        if self.any_channel_requested() {
            return Err(PwmError::ChannelAlreadyRequested);
        }
        let (divisor, range, achieved) = derive_clock_params(pulse_width_us, self.pwm_range)?;
        debug!(
            "config_pwm: pages={pages} pulse_width_us={pulse_width_us} -> divisor={divisor} range={range} achieved={achieved}"
        );
        self.pages = pages;
        self.divisor = divisor;
        self.pwm_range = range;
        self.pulse_width_us = achieved;
        Ok(())
    }

    /// Reserve a channel, triggering first-time hardware init if needed.
    pub fn request_pwm(&mut self) -> PwmResult<usize> {
        if self.hardware.is_none() {
            info!("first channel request: bringing up hardware");
            self.hardware = Some(bring_up_hardware(
                self.hw.as_ref(),
                self.divisor,
                self.pwm_range,
            )?);
        }

        let slot = self
            .channels
            .iter()
            .position(Option::is_none)
            .ok_or(PwmError::NoFreeChannel)?;

        let hardware = self.hardware.as_ref().expect("hardware just initialized");
        let physical_index = self.valid_channels[slot];
        trace!("request_pwm: slot={slot} physical_index={physical_index}");
        let channel = Channel::request(
            self.hw.clone(),
            physical_index,
            self.pages,
            hardware.targets,
        )?;
        self.channels[slot] = Some(channel);
        Ok(slot)
    }

    fn channel_mut(&mut self, index: usize) -> PwmResult<&mut Channel> {
        self.channels
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(PwmError::InvalidChannel)
    }

    fn hardware(&self) -> PwmResult<&HardwareState> {
        self.hardware.as_ref().ok_or(PwmError::InvalidChannel)
    }

    /// Build a new CB ring for `channel` at `freq_hz`/`duty_percent`, live
    /// updating if already enabled.
    pub fn set_pwm(
        &mut self,
        channel: usize,
        gpios: &[u8],
        freq_hz: f64,
        duty_percent: f64,
    ) -> PwmResult<()> {
        let pulse_width_us = self.pulse_width_us;
        let pages = self.pages;
        let hw = self.hw.clone();
        let hardware = self.hardware()?;
        let dma = &hardware.dma;
        let gpio_win = &hardware.gpio;
        let ch = self.channel_mut(channel)?;
        ch.set_pwm(
            hw.as_ref(),
            dma,
            gpio_win,
            gpios,
            freq_hz,
            duty_percent,
            pulse_width_us,
            pages,
        )
    }

    /// Arm DMA for `channel`.
    pub fn enable_pwm(&mut self, channel: usize) -> PwmResult<()> {
        let hw = self.hw.clone();
        let hardware = self.hardware()?;
        let dma = &hardware.dma;
        let ch = self.channel_mut(channel)?;
        ch.enable(hw.as_ref(), dma)
    }

    /// Halt DMA for `channel` and drive its pins low.
    pub fn disable_pwm(&mut self, channel: usize) -> PwmResult<()> {
        let hw = self.hw.clone();
        let hardware = self.hardware()?;
        let dma = &hardware.dma;
        let gpio_win = &hardware.gpio;
        let ch = self.channel_mut(channel)?;
        ch.disable(hw.as_ref(), dma, gpio_win);
        Ok(())
    }

    /// Release `channel`'s memory and mark it free. Idempotent.
    pub fn free_pwm(&mut self, channel: usize) -> PwmResult<()> {
        let slot = self
            .channels
            .get_mut(channel)
            .ok_or(PwmError::InvalidChannel)?;
        if let Some(mut ch) = slot.take() {
            if ch.is_enabled() {
                let hw = self.hw.clone();
                if let Some(hardware) = &self.hardware {
                    ch.disable(hw.as_ref(), &hardware.dma, &hardware.gpio);
                }
            }
            ch.release();
        }
        Ok(())
    }

    /// Release every requested channel. Used by [`crate::signal`]'s
    /// termination handler and by [`PwmEngine::free_pwm`]'s internals.
    pub fn free_all(&mut self) {
        for slot in 0..self.channels.len() {
            let _ = self.free_pwm(slot);
        }
    }

    pub fn achieved_frequency(&self, channel: usize) -> PwmResult<f64> {
        self.channel_ref(channel)?
            .plan()
            .map(|p| p.achieved_freq)
            .ok_or(PwmError::PwmNotSet)
    }

    pub fn achieved_duty(&self, channel: usize) -> PwmResult<f64> {
        self.channel_ref(channel)?
            .plan()
            .map(|p| p.achieved_duty)
            .ok_or(PwmError::PwmNotSet)
    }

    pub fn pulse_width_us(&self) -> f64 {
        self.pulse_width_us
    }

    /// The detected board family, once hardware has been brought up by a
    /// first `request_pwm` call.
    pub fn board_family(&self) -> Option<BoardFamily> {
        self.hardware.as_ref().map(|h| h.board)
    }

    fn channel_ref(&self, index: usize) -> PwmResult<&Channel> {
        self.channels
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(PwmError::InvalidChannel)
    }
}

/// Derive `(divisor, range, achieved_pulse_width_us)` holding `current_range`
/// constant where possible, clamping the divisor to `[1, 4095]` and
/// recomputing the range only when clamping was necessary.
fn derive_clock_params(pulse_width_us: f64, current_range: u32) -> PwmResult<(u32, u32, f64)> {
    if !(MIN_PULSE_WIDTH_US..=MAX_PULSE_WIDTH_US).contains(&pulse_width_us) {
        return Err(PwmError::InvalidPulseWidth);
    }

    let mut range = current_range as f64;
    let unclamped_divisor = pulse_width_us * cm::SOURCE_HZ / (1e6 * range);

    let divisor = if unclamped_divisor < 1.0 {
        range = pulse_width_us * cm::SOURCE_HZ / (1e6 * 1.0);
        1u32
    } else if unclamped_divisor > 4095.0 {
        range = pulse_width_us * cm::SOURCE_HZ / (1e6 * 4095.0);
        4095u32
    } else {
        unclamped_divisor.round() as u32
    };

    if range < 1.0 {
        return Err(PwmError::InvalidPulseWidth);
    }
    let range = range.round() as u32;

    let achieved_pw = range as f64 * divisor as f64 / cm::SOURCE_HZ * 1e6;
    Ok((divisor, range, achieved_pw))
}

/// Detect the board, map the four peripheral windows, and run the
/// clock/PWM bring-up sequence.
fn bring_up_hardware(
    hw: &dyn HardwareAccess,
    divisor: u32,
    pwm_range: u32,
) -> PwmResult<HardwareState> {
    let board = board::detect_board_family()?;
    info!("detected board: {} ({})", board.soc_name(), board.legacy_version());
    let base = board.peripheral_base();

    let gpio_win = hw
        .mmap_physical(base + board::offset::GPIO, PAGE_SIZE)
        .map_err(|e| {
            warn!("failed to map GPIO window: {e}");
            e
        })?;
    let dma_win = hw.mmap_physical(base + board::offset::DMA, PAGE_SIZE)?;
    let pwm_win = hw.mmap_physical(base + board::offset::PWM, PAGE_SIZE)?;
    let clock_win = hw.mmap_physical(base + board::offset::CLOCK_MANAGER, PAGE_SIZE)?;

    // Clock/PWM bring-up, each step separated by the datasheet's ≥10 µs
    // settle time.
    pwm_win.write32(pwm::CTL, 0);
    hw.sleep(REGISTER_SETTLE);

    clock_win.write32(cm::CTL, cm::PASSWORD | cm::CTL_SRC_PLLD);
    hw.sleep(REGISTER_SETTLE);

    clock_win.write32(cm::DIV, cm::PASSWORD | (divisor << cm::DIV_SHIFT));
    hw.sleep(REGISTER_SETTLE);

    clock_win.write32(cm::CTL, cm::PASSWORD | cm::CTL_SRC_PLLD | cm::CTL_ENAB);
    hw.sleep(REGISTER_SETTLE);

    pwm_win.write32(pwm::RNG1, pwm_range);
    hw.sleep(REGISTER_SETTLE);

    pwm_win.write32(pwm::DMAC, pwm::dmac_thresholds());
    hw.sleep(REGISTER_SETTLE);

    pwm_win.write32(pwm::CTL, pwm::CTL_CLRF1);
    hw.sleep(REGISTER_SETTLE);

    pwm_win.write32(pwm::CTL, pwm::CTL_USEF1 | pwm::CTL_PWEN1);
    hw.sleep(REGISTER_SETTLE);

    let targets = ChannelTargets {
        gpset0_bus: (board::BUS_BASE + board::offset::GPIO + gpio::GPSET0 as u64) as u32,
        gpclr0_bus: (board::BUS_BASE + board::offset::GPIO + gpio::GPCLR0 as u64) as u32,
        pwm_fifo_bus: (board::BUS_BASE + board::offset::PWM + pwm::FIF1 as u64) as u32,
    };

    Ok(HardwareState {
        board,
        gpio: gpio_win,
        dma: dma_win,
        pwm: pwm_win,
        clock: clock_win,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_default_range_yields_known_divisor_and_pulse_width() {
        let (divisor, range, achieved) = derive_clock_params(5000.0, DEFAULT_PWM_RANGE).unwrap();
        assert_eq!(divisor, 2500);
        assert_eq!(range, 1000);
        assert!((achieved - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn pulse_width_below_minimum_is_invalid() {
        let err = derive_clock_params(0.3, DEFAULT_PWM_RANGE).unwrap_err();
        assert_eq!(err, PwmError::InvalidPulseWidth);
    }

    #[test]
    fn pulse_width_above_maximum_is_invalid() {
        let err = derive_clock_params(MAX_PULSE_WIDTH_US * 2.0, DEFAULT_PWM_RANGE).unwrap_err();
        assert_eq!(err, PwmError::InvalidPulseWidth);
    }

    #[test]
    fn divisor_clamps_to_upper_bound_and_range_is_recomputed() {
        // A very small pulse width at the default range drives the divisor
        // below 1, forcing the clamp-and-recompute branch.
        let (divisor, range, achieved) = derive_clock_params(0.4, DEFAULT_PWM_RANGE).unwrap();
        assert_eq!(divisor, 1);
        assert!(range >= 1);
        assert!(achieved > 0.0);
    }
}
