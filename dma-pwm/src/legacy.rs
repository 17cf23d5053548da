//! Free-function ABI mirroring the original library's external interface:
//! every operation returns `0` on success or a negated error code from
//! [`crate::error::PwmError::legacy_code`].
//!
//! This module exists purely for callers replaying the original call
//! sequence verbatim; idiomatic Rust callers should use [`crate::PwmEngine`]
//! directly and get `Result<T, PwmError>` instead of sign-encoded integers.
//! Both surfaces drive the same [`crate::global_engine`] singleton, so they
//! can be mixed within one process, subject to the same caller-serialization
//! requirement as the rest of the engine.

use crate::error::PwmError;
use crate::global_engine;

/// `config_pwm(pages, pulse_width_us) -> 0 | -ECHNLREQ | -EINVPW`.
pub fn config_pwm(pages: i32, pulse_width_us: f64) -> i32 {
    run(|engine| engine.config_pwm(pages.max(0) as usize, pulse_width_us))
}

/// `request_pwm() -> channel_id | -ENOFREECHNL | -ENOPIVER | -EMAPFAIL | -ESIGHDNFAIL`.
pub fn request_pwm() -> i32 {
    match global_engine() {
        Ok(cell) => match cell.lock().unwrap().request_pwm() {
            Ok(channel) => channel as i32,
            Err(e) => -e.legacy_code(),
        },
        Err(e) => -e.legacy_code(),
    }
}

/// `set_pwm(channel, gpios, freq_hz, duty_percent) -> 0 | -EINVCHNL | -EINVGPIO | -EINVDUTY | -EFREQNOTMET`.
pub fn set_pwm(channel: i32, gpios: &[u8], freq_hz: f64, duty_percent: f64) -> i32 {
    run_on_channel(channel, |engine, ch| {
        engine.set_pwm(ch, gpios, freq_hz, duty_percent)
    })
}

/// `enable_pwm(channel) -> 0 | -EINVCHNL | -EPWMNOTSET`.
pub fn enable_pwm(channel: i32) -> i32 {
    run_on_channel(channel, |engine, ch| engine.enable_pwm(ch))
}

/// `disable_pwm(channel) -> 0 | -EINVCHNL`.
pub fn disable_pwm(channel: i32) -> i32 {
    run_on_channel(channel, |engine, ch| engine.disable_pwm(ch))
}

/// `free_pwm(channel) -> 0 | -EINVCHNL`.
pub fn free_pwm(channel: i32) -> i32 {
    run_on_channel(channel, |engine, ch| engine.free_pwm(ch))
}

/// `get_achieved_freq(channel) -> Hz, or a negative error code`. Achieved
/// frequency is always positive, so a negative return unambiguously signals
/// `-legacy_code()`.
pub fn get_achieved_freq(channel: i32) -> f64 {
    accessor(channel, |engine, ch| engine.achieved_frequency(ch))
}

/// `get_achieved_duty(channel) -> duty percent in [0, 100], or a negative
/// error code`.
pub fn get_achieved_duty(channel: i32) -> f64 {
    accessor(channel, |engine, ch| engine.achieved_duty(ch))
}

fn accessor(channel: i32, f: impl FnOnce(&crate::PwmEngine, usize) -> Result<f64, PwmError>) -> f64 {
    match channel_index(channel) {
        Ok(ch) => match global_engine().and_then(|cell| f(&cell.lock().unwrap(), ch)) {
            Ok(value) => value,
            Err(e) => -(e.legacy_code() as f64),
        },
        Err(e) => -(e.legacy_code() as f64),
    }
}

fn channel_index(channel: i32) -> Result<usize, PwmError> {
    usize::try_from(channel).map_err(|_| PwmError::InvalidChannel)
}

fn run(f: impl FnOnce(&mut crate::PwmEngine) -> Result<(), PwmError>) -> i32 {
    match global_engine() {
        Ok(cell) => match f(&mut cell.lock().unwrap()) {
            Ok(()) => 0,
            Err(e) => -e.legacy_code(),
        },
        Err(e) => -e.legacy_code(),
    }
}

fn run_on_channel(
    channel: i32,
    f: impl FnOnce(&mut crate::PwmEngine, usize) -> Result<(), PwmError>,
) -> i32 {
    let ch = match channel_index(channel) {
        Ok(ch) => ch,
        Err(e) => return -e.legacy_code(),
    };
    run(|engine| f(engine, ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_channel_is_invalid_channel_not_a_panic() {
        assert_eq!(set_pwm(-1, &[26], 1.0, 50.0), -PwmError::InvalidChannel.legacy_code());
        assert_eq!(enable_pwm(-1), -PwmError::InvalidChannel.legacy_code());
        assert_eq!(get_achieved_freq(-1), -(PwmError::InvalidChannel.legacy_code() as f64));
    }
}
