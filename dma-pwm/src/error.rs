//! Error kinds for the PWM engine.

use thiserror::Error;

/// Everything a public operation on [`crate::PwmEngine`] can fail with.
///
/// Each variant's doc comment carries the legacy error code from the original
/// library's ABI (see [`PwmError::legacy_code`]); the numeric values themselves
/// are never part of the idiomatic API, only of the compatibility shim in
/// [`crate::legacy`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PwmError {
    /// `ECHNLREQ`: reconfiguring the engine after a channel has been requested.
    #[error("at least one channel has already been requested")]
    ChannelAlreadyRequested,

    /// `EINVPW`: pulse width outside `[0.4, 3.5175782146e10]` µs, or the
    /// resulting PWM range would be below 1.
    #[error("pulse width is not achievable with a valid clock divisor/range")]
    InvalidPulseWidth,

    /// `ENOFREECHNL`: the fixed pool of seven DMA channels is fully requested.
    #[error("no free DMA channel is available")]
    NoFreeChannel,

    /// `EINVCHNL`: the channel index is out of range or not currently requested.
    #[error("channel index is invalid or not requested")]
    InvalidChannel,

    /// `EINVDUTY`: duty cycle outside `[0, 100]`.
    #[error("duty cycle must lie in [0, 100]")]
    InvalidDuty,

    /// `EINVGPIO`: a GPIO number outside `0..=31`, or an empty GPIO list.
    #[error("GPIO pin number is invalid")]
    InvalidGpio,

    /// `EFREQNOTMET`: the requested frequency rounds down to zero control blocks
    /// at the engine's configured pulse width.
    #[error("requested frequency is not achievable at the configured pulse width")]
    FrequencyNotMet,

    /// `EPWMNOTSET`: `enable_pwm` called before `set_pwm` built a CB ring.
    #[error("PWM signal has not been set on this channel")]
    PwmNotSet,

    /// `ENOPIVER`: `/proc/cpuinfo` revision string matched no known board.
    #[error("could not determine Raspberry Pi board revision")]
    NoPiVersion,

    /// `EMAPFAIL`: mmap of a peripheral or `/dev/mem` window failed.
    #[error("failed to map peripheral memory: {0}")]
    MapFailed(String),

    /// `ESIGHDNFAIL`: installing the termination signal handler failed.
    #[error("failed to install signal handler")]
    SignalHandlerFailed,

    /// Requested control-block sequence needs more pages than the engine's
    /// configured page budget allows. Not a distinct code in the original ABI;
    /// it shares `EFREQNOTMET`'s slot there (see [`PwmError::legacy_code`]).
    #[error("control block sequence requires more pages than configured ({needed} > {budget})")]
    OutOfMemory { needed: usize, budget: usize },

    /// The VideoCore mailbox returned an error or malformed response.
    #[error("mailbox request failed: {0}")]
    MailboxFailed(String),
}

impl PwmError {
    /// The negated-return-value error code from the original C-shaped ABI.
    ///
    /// Every public legacy function (`config_pwm`, `request_pwm`, ...) returns
    /// `-self.legacy_code()` on failure; see [`crate::legacy`].
    pub fn legacy_code(&self) -> i32 {
        match self {
            PwmError::ChannelAlreadyRequested => 1,
            PwmError::InvalidPulseWidth => 2,
            PwmError::NoFreeChannel => 3,
            PwmError::InvalidChannel => 4,
            PwmError::InvalidDuty => 5,
            PwmError::InvalidGpio => 6,
            PwmError::FrequencyNotMet | PwmError::OutOfMemory { .. } => 7,
            PwmError::PwmNotSet => 8,
            PwmError::NoPiVersion => 9,
            PwmError::MapFailed(_) => 10,
            PwmError::SignalHandlerFailed => 11,
            // The mailbox has no dedicated code in the original surface; it
            // only ever shows up wrapped behind EMAPFAIL-shaped failures there.
            PwmError::MailboxFailed(_) => 10,
        }
    }
}

pub type PwmResult<T> = Result<T, PwmError>;
