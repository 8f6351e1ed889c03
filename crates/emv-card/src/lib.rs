//! EMV Card - EMV transaction engine over an abstract card channel
//!
//! This crate builds EMV command APDUs, drives a card through application
//! selection, GET PROCESSING OPTIONS and record reading, classifies the
//! result and hands everything to a persistence sink. PC/SC readers are
//! supported through [`reader::CardReader`]; any other channel implements
//! [`transport::Transport`].

pub mod apdu;
pub mod classify;
pub mod config;
pub mod dol;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod record;
pub mod sink;
pub mod transport;
pub mod workflow;

pub use apdu::{ApduCommand, ApduResponse, CryptogramType, StatusClass};
pub use classify::{Brand, Classification, OfflineAuth, TransactionMode};
pub use config::{EngineConfig, Interface, KnownAid};
pub use dol::{generate_random_bytes, DolBuilder};
pub use error::EmvError;
pub use protocol::{EmvCard, GenerateAcResponse, PinVerification};
pub use reader::{CardReader, PcscTransport};
pub use record::{AflEntry, AidCandidate, TransactionRecord};
pub use sink::{MemorySink, PersistenceSink};
pub use transport::{Transport, TransportError};
pub use workflow::{Phase, TransactionEngine, TransactionFailure};
