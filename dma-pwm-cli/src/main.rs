//! Demonstration entry point for the `dma-pwm` engine.
//!
//! Mirrors the original project's test program: configure the engine,
//! request a channel, drive one GPIO at a literal frequency/duty, sleep,
//! live-update to a different frequency/duty, disable, and free. This
//! binary is the thin external collaborator that exercises the engine;
//! it carries none of the engine's own logic.

use std::thread;
use std::time::Duration;

use log::{error, info};

/// A pin typically free on the 40-pin header.
const DEMO_GPIO: u8 = 26;

/// Matches the original test program's `LED_PULSE_WIDTH` constant from
/// `dma_pwm.h`, suited to driving an LED or similarly slow load rather than
/// the finer `MOTOR_PULSE_WIDTH`/`SERVO_PULSE_WIDTH` constants it also defines.
const LED_PULSE_WIDTH_US: f64 = 10_000.0;
const DEFAULT_PAGES: usize = 16;

fn main() -> std::process::ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> dma_pwm::PwmResult<()> {
    let engine = dma_pwm::global_engine()?;
    let mut engine = engine.lock().expect("engine mutex poisoned");

    engine.config_pwm(DEFAULT_PAGES, LED_PULSE_WIDTH_US)?;
    info!("configured: {} pages, {:.1} us pulse width", DEFAULT_PAGES, LED_PULSE_WIDTH_US);

    let channel = engine.request_pwm()?;
    info!("channel {channel} requested");

    let gpios = [DEMO_GPIO];
    let outcome = drive(&mut engine, channel, &gpios);

    // Clean up regardless of how far `drive` got, matching the original test
    // program's every error path calling `free_pwm` before returning.
    let _ = engine.free_pwm(channel);
    info!("channel {channel} freed");

    outcome
}

fn drive(engine: &mut dma_pwm::PwmEngine, channel: usize, gpios: &[u8]) -> dma_pwm::PwmResult<()> {
    engine.set_pwm(channel, gpios, 1.0, 75.0)?;
    info!(
        "channel {channel} PWM signal set: {:.3} Hz, {:.3}% duty",
        engine.achieved_frequency(channel)?,
        engine.achieved_duty(channel)?
    );

    engine.enable_pwm(channel)?;
    info!("channel {channel} enabled");
    thread::sleep(Duration::from_secs(5));

    engine.set_pwm(channel, gpios, 5.0, 50.0)?;
    info!(
        "channel {channel} PWM signal updated: {:.3} Hz, {:.3}% duty",
        engine.achieved_frequency(channel)?,
        engine.achieved_duty(channel)?
    );
    thread::sleep(Duration::from_secs(5));

    engine.disable_pwm(channel)?;
    info!("channel {channel} disabled");
    Ok(())
}
