//! Error types for the reasoner, the fall relay and the device drivers.
//!
//! Configuration errors are fatal at construction. Input contract errors are
//! raised per call and never touch state outside the offending model.
//! Transport errors are handled by the driving loops themselves.

/// Failure reported by a line transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No data within the transport's read timeout. Retry.
    #[error("transport read timed out")]
    Timeout,

    /// Bytes arrived but could not be decoded as a text line. Skip and retry.
    #[error("transport delivered an undecodable line: {0}")]
    Garbled(String),

    /// The device is gone or the stream is broken.
    #[error("transport failed: {0}")]
    Failed(String),
}

impl TransportError {
    /// Timeouts and garbled reads leave the stream usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Garbled(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HmpError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model index {index} out of range (model count {count})")]
    ModelOutOfRange { index: usize, count: usize },

    #[error("non-monotonic sample for model {model}: {sample} after {last}")]
    NonMonotonicSample {
        model: String,
        sample: u64,
        last: u64,
    },

    #[error("invalid possibility {value} for model {model} at sample {sample}")]
    InvalidPossibility {
        model: String,
        sample: u64,
        value: f32,
    },

    #[error("possibility vector has {actual} entries, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("interval for {0} is already closed")]
    ClosedInterval(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HmpError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        HmpError::MalformedLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Bad input from a caller or a device line, as opposed to a broken
    /// configuration, transport or internal bug.
    pub fn is_input_contract(&self) -> bool {
        matches!(
            self,
            HmpError::ModelOutOfRange { .. }
                | HmpError::NonMonotonicSample { .. }
                | HmpError::InvalidPossibility { .. }
                | HmpError::DimensionMismatch { .. }
                | HmpError::MalformedLine { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HmpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_contract_classification() {
        assert!(HmpError::ModelOutOfRange { index: 3, count: 2 }.is_input_contract());
        assert!(HmpError::malformed("F", "missing payload").is_input_contract());
        assert!(!HmpError::Configuration("empty".into()).is_input_contract());
        assert!(!HmpError::ClosedInterval("Walk".into()).is_input_contract());
        assert!(!HmpError::Transport(TransportError::Timeout).is_input_contract());
    }

    #[test]
    fn transport_recoverability() {
        assert!(TransportError::Timeout.is_recoverable());
        assert!(TransportError::Garbled("bad utf-8".into()).is_recoverable());
        assert!(!TransportError::Failed("unplugged".into()).is_recoverable());
    }

    #[test]
    fn messages_name_the_model() {
        let err = HmpError::NonMonotonicSample {
            model: "Sit".into(),
            sample: 4,
            last: 5,
        };
        assert_eq!(err.to_string(), "non-monotonic sample for model Sit: 4 after 5");
    }
}
