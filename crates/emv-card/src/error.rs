//! Error types for card operations

use emv_common::DecodeError;
use thiserror::Error;

use crate::apdu::describe_status;
use crate::transport::TransportError;
use crate::workflow::Phase;

/// Errors surfaced by the engine and card operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmvError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{phase}: malformed response: {source}")]
    Decode {
        phase: Phase,
        #[source]
        source: DecodeError,
    },

    #[error("{phase}: card returned {sw:04X} ({})", describe(.sw))]
    Protocol { phase: Phase, sw: u16 },

    #[error("no application could be selected")]
    ExhaustedCandidates,

    #[error("{phase}: response is missing {what}")]
    MissingData { phase: Phase, what: &'static str },

    #[error("command data is {0} bytes, more than a short APDU can carry")]
    CommandTooLong(usize),

    #[error("PIN must be 4 to 12 decimal digits")]
    InvalidPin,
}

fn describe(sw: &u16) -> &'static str {
    describe_status(*sw)
}

impl EmvError {
    /// Status word behind a protocol error
    pub fn status_word(&self) -> Option<u16> {
        match self {
            EmvError::Protocol { sw, .. } => Some(*sw),
            _ => None,
        }
    }
}
