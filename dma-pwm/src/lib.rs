//! DMA-paced software PWM engine for the Broadcom SoCs found in Raspberry Pi
//! boards (BCM2835/2836/2837/2711).
//!
//! The engine builds a linked ring of DMA control blocks that toggle GPIO
//! set/clear registers and paces itself against the hardware PWM FIFO's DREQ
//! signal, so the resulting waveform is immune to CPU scheduling jitter. The
//! hardware PWM peripheral itself is used only as a timing oracle; no signal
//! ever reaches the PWM0/PWM1 output pins.
//!
//! # Layout
//! - [`board`]: board revision detection and peripheral base addresses.
//! - [`mailbox`] / [`memory`]: the VideoCore mailbox and the uncached DMA
//!   memory it hands back.
//! - [`cb`]: the control-block sequence generator, the arithmetic heart of
//!   the engine.
//! - [`channel`]: a single DMA channel's double-buffered lifecycle.
//! - [`engine`]: the process-wide [`PwmEngine`] that owns the channel pool.
//! - [`legacy`]: a free-function ABI mirroring the original library's
//!   negated-integer error codes, for callers that want that surface verbatim.
//! - [`signal`]: the termination signal handler that releases every channel.
//!
//! Callers that just want the idiomatic surface construct a [`PwmEngine`]
//! directly (see that type's docs); [`legacy`] and the process-wide handle in
//! this module exist for callers that want the original C-shaped
//! global-singleton ABI.

pub mod board;
pub mod cb;
pub mod channel;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod legacy;
pub mod mailbox;
pub mod memory;
pub mod registers;
pub mod signal;

pub use board::BoardFamily;
pub use engine::PwmEngine;
pub use error::{PwmError, PwmResult};
pub use hardware::{HardwareAccess, LinuxHardware};

use std::sync::{Arc, Mutex, OnceLock};

/// The process-wide engine handle, exposed as a single opaque lock rather
/// than via ad-hoc module globals. Lazily created by the first call that
/// needs it, via [`global_engine`].
static ENGINE: OnceLock<Mutex<PwmEngine>> = OnceLock::new();

/// Get (creating on first call) the process-wide [`PwmEngine`], opening the
/// VideoCore mailbox device and installing the termination signal handler the
/// first time it is needed.
///
/// Two threads racing their first call here may each construct a
/// [`LinuxHardware`] before one wins [`OnceLock::set`]; the loser's handle is
/// simply dropped. This crate does not add a lock around that race; calling
/// `request_pwm` concurrently from multiple threads without external
/// synchronization is left undefined by design, same as the rest of the
/// engine's single-caller assumption.
pub fn global_engine() -> PwmResult<&'static Mutex<PwmEngine>> {
    if let Some(cell) = ENGINE.get() {
        return Ok(cell);
    }
    let hw: Arc<dyn HardwareAccess> = Arc::new(LinuxHardware::open()?);
    let _ = ENGINE.set(Mutex::new(PwmEngine::with_default_channels(hw)));
    signal::install()?;
    Ok(ENGINE.get().expect("just initialized above"))
}

/// The process-wide engine handle, if [`global_engine`] has already been
/// called. Used by [`signal`]'s handler, which must never *create* the
/// engine (that would allocate and open files from signal context) but only
/// release one that already exists.
pub(crate) fn global_engine_if_present() -> Option<&'static Mutex<PwmEngine>> {
    ENGINE.get()
}
