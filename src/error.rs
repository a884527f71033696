use std::time::Duration;
use thiserror::Error;

/// Errors reported by caenkit.
///
/// Validation errors (`Configuration`, `InvalidAddress`) are raised before
/// any hardware interaction. Communication and device errors propagate to the
/// caller unmodified; the library performs no automatic retries.
#[derive(Error, Debug)]
pub enum CaenError {
    /// Conflicting or missing construction parameters.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A board or channel id outside its legal domain. Raised before any I/O.
    #[error("invalid {kind} id {value}; must be within 0..={max}")]
    InvalidAddress {
        kind: &'static str,
        value: i64,
        max: i64,
    },
    /// A response started to arrive but was not completed within the
    /// configured window. A window that elapses with *no* bytes at all is the
    /// instrument's documented silent-failure behaviour and is reported as an
    /// empty (unsuccessful) response instead.
    #[error("incomplete response after {0:?}")]
    CommunicationTimeout(Duration),
    /// The command reached the instrument but it reported failure. Carries
    /// the raw response text for diagnosis.
    #[error("instrument reported failure: {0}")]
    Device(String),
    /// A call into libCAENDigitizer returned a nonzero status code. The code
    /// is the vendor's, surfaced verbatim.
    #[error("libCAENDigitizer returned error code {0}")]
    Native(i32),
    /// The polarity parameter read back as something other than `+` or `-`.
    #[error("unexpected polarity reading {0:?}")]
    UnexpectedPolarity(String),
    /// A monitored value violated its assumed domain.
    #[error("unexpected value {value:?} for parameter {parameter}")]
    UnexpectedValue { parameter: String, value: String },
    /// The channel was still ramping past the ETA-plus-slack window.
    #[error("voltage did not settle after {elapsed:?} (lower-bound ETA was {expected:?})")]
    RampTimeout {
        elapsed: Duration,
        expected: Duration,
    },
    /// The digitizer was asked to start a second acquisition while one is
    /// already active. The existing acquisition is left untouched.
    #[error("an acquisition is already active")]
    AlreadyAcquiring,
    /// A readout was requested while no acquisition is active.
    #[error("no acquisition is active")]
    NotAcquiring,
    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serial port failure.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, CaenError>;
