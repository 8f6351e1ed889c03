//! Engine configuration

use std::fmt;

use serde::Serialize;

use crate::apdu::commands::{PPSE, PSE};
use crate::dol::DolBuilder;

/// Physical interface the card is read over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interface {
    Contact,
    Contactless,
}

impl Interface {
    /// Directory to select first: PSE for contact, PPSE for contactless
    pub fn directory_name(self) -> &'static [u8] {
        match self {
            Interface::Contact => PSE,
            Interface::Contactless => PPSE,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Interface::Contact => "contact",
            Interface::Contactless => "contactless",
        })
    }
}

/// Known EMV Application Identifiers (AIDs)
pub mod aids {
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];
    pub const VISA_ELECTRON: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x10];
    pub const V_PAY: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x20];
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];
    pub const MAESTRO: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x30, 0x60];
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x25, 0x01];
    pub const DISCOVER: &[u8] = &[0xA0, 0x00, 0x00, 0x01, 0x52, 0x30, 0x10];
    pub const JCB: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x65, 0x10, 0x10];
    pub const UNIONPAY: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x33, 0x01, 0x01, 0x01];
    pub const INTERAC: &[u8] = &[0xA0, 0x00, 0x00, 0x02, 0x77, 0x10, 0x10];
}

/// An AID tried directly when no directory is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownAid {
    pub name: String,
    pub aid: Vec<u8>,
}

impl KnownAid {
    pub fn new(name: &str, aid: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            aid: aid.to_vec(),
        }
    }
}

/// Settings for one [`TransactionEngine`](crate::workflow::TransactionEngine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub interface: Interface,
    /// Highest directory record number read before giving up on 6A83
    pub max_directory_records: u8,
    /// AIDs tried in order when the directory is missing or empty
    pub fallback_aids: Vec<KnownAid>,
    /// Terminal values used to answer PDOL/CDOL/DDOL requests
    pub terminal: DolBuilder,
}

impl EngineConfig {
    pub fn new(interface: Interface) -> Self {
        Self {
            interface,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: Interface::Contactless,
            max_directory_records: 16,
            fallback_aids: vec![
                KnownAid::new("Visa", aids::VISA),
                KnownAid::new("Visa Electron", aids::VISA_ELECTRON),
                KnownAid::new("V PAY", aids::V_PAY),
                KnownAid::new("Mastercard", aids::MASTERCARD),
                KnownAid::new("Maestro", aids::MAESTRO),
                KnownAid::new("American Express", aids::AMEX),
                KnownAid::new("Discover", aids::DISCOVER),
                KnownAid::new("JCB", aids::JCB),
                KnownAid::new("UnionPay", aids::UNIONPAY),
                KnownAid::new("Interac", aids::INTERAC),
            ],
            terminal: DolBuilder::new().with_defaults(),
        }
    }
}
