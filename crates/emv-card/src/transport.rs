//! Command transmission channel consumed by the engine

use thiserror::Error;

/// Failures of the underlying channel
///
/// These are always fatal to the transaction in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timed out waiting for the card")]
    Timeout,

    #[error("card disconnected: {0}")]
    Disconnected(String),

    #[error("reader error: {0}")]
    Reader(String),

    #[error("response shorter than a status word ({0} bytes)")]
    ShortResponse(usize),
}

/// A synchronous half-duplex channel to a card
///
/// One call to `transmit` is exactly one command/response round trip. The
/// engine assumes exclusive use of the channel for a whole transaction.
pub trait Transport {
    /// Send a command APDU and return the raw response (data + SW1 SW2)
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }
}
