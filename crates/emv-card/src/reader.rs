//! PC/SC card reader management

use std::ffi::CString;

use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use tracing::debug;

use crate::transport::{Transport, TransportError};

/// Card reader wrapper for managing PC/SC connections
pub struct CardReader {
    context: Context,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_str().unwrap_or("Unknown").to_string())
            .collect())
    }

    /// Connect to the first available reader
    pub fn connect_first(&self) -> Result<(PcscTransport, String), pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        if let Some(reader) = readers.next() {
            let reader_name = reader.to_str().unwrap_or("Unknown").to_string();
            let card = self.context.connect(reader, ShareMode::Shared, Protocols::ANY)?;
            Ok((PcscTransport { card }, reader_name))
        } else {
            Err(pcsc::Error::NoReadersAvailable)
        }
    }

    /// Connect to a specific reader by name
    pub fn connect(&self, reader_name: &str) -> Result<PcscTransport, pcsc::Error> {
        let name = CString::new(reader_name).map_err(|_| pcsc::Error::UnknownReader)?;
        let card = self
            .context
            .connect(&name, ShareMode::Shared, Protocols::ANY)?;
        Ok(PcscTransport { card })
    }
}

/// [`Transport`] over a connected PC/SC card
pub struct PcscTransport {
    card: Card,
}

impl Transport for PcscTransport {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = self.card.transmit(command, &mut rapdu_buf)?;
        debug!(len = rapdu.len(), "PC/SC transmit complete");
        Ok(rapdu.to_vec())
    }
}

impl From<pcsc::Error> for TransportError {
    fn from(err: pcsc::Error) -> Self {
        match err {
            pcsc::Error::Timeout => TransportError::Timeout,
            pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard => {
                TransportError::Disconnected(err.to_string())
            }
            other => TransportError::Reader(other.to_string()),
        }
    }
}
