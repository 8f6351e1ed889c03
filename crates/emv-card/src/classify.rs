//! Card brand and transaction mode derived from the AID and AIP

use std::fmt;

use serde::Serialize;

use crate::config::Interface;

/// Payment scheme owning an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Brand {
    Visa,
    Mastercard,
    Maestro,
    Amex,
    Discover,
    Jcb,
    UnionPay,
    Interac,
    Unknown,
}

impl Brand {
    /// Identify the scheme from an AID (RID plus, for co-branded RIDs, PIX)
    pub fn from_aid(aid: &[u8]) -> Self {
        // Longest prefixes first
        const PREFIXES: &[(&[u8], Brand)] = &[
            (&[0xA0, 0x00, 0x00, 0x00, 0x04, 0x30, 0x60], Brand::Maestro),
            (&[0xA0, 0x00, 0x00, 0x00, 0x03], Brand::Visa),
            (&[0xA0, 0x00, 0x00, 0x00, 0x04], Brand::Mastercard),
            (&[0xA0, 0x00, 0x00, 0x00, 0x25], Brand::Amex),
            (&[0xA0, 0x00, 0x00, 0x01, 0x52], Brand::Discover),
            (&[0xA0, 0x00, 0x00, 0x00, 0x65], Brand::Jcb),
            (&[0xA0, 0x00, 0x00, 0x03, 0x33], Brand::UnionPay),
            (&[0xA0, 0x00, 0x00, 0x02, 0x77], Brand::Interac),
        ];

        PREFIXES
            .iter()
            .find(|(prefix, _)| aid.starts_with(prefix))
            .map_or(Brand::Unknown, |&(_, brand)| brand)
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Brand::Visa => "Visa",
            Brand::Mastercard => "Mastercard",
            Brand::Maestro => "Maestro",
            Brand::Amex => "American Express",
            Brand::Discover => "Discover",
            Brand::Jcb => "JCB",
            Brand::UnionPay => "UnionPay",
            Brand::Interac => "Interac",
            Brand::Unknown => "Unknown",
        })
    }
}

/// How the card will run the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionMode {
    /// Contactless magnetic stripe emulation
    Msd,
    /// Full contact EMV chip transaction
    Vsdc,
    /// Contactless EMV (qVSDC for Visa, M/Chip for Mastercard)
    QvsdcMchip,
    /// Combined DDA / Application Cryptogram generation
    Cda,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionMode::Msd => "MSD",
            TransactionMode::Vsdc => "VSDC",
            TransactionMode::QvsdcMchip => "qVSDC/M-Chip",
            TransactionMode::Cda => "CDA",
        })
    }
}

/// Offline data authentication method supported by the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OfflineAuth {
    None,
    Sda,
    Dda,
    Cda,
}

/// Result of the Classify phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub brand: Brand,
    pub mode: TransactionMode,
    pub offline_auth: OfflineAuth,
}

// AIP byte 1
const AIP_SDA: u8 = 0x40;
const AIP_DDA: u8 = 0x20;
const AIP_CDA: u8 = 0x01;
// AIP byte 2: EMV mode supported over contactless
const AIP_EMV_MODE: u8 = 0x80;

/// Detect authentication method from AIP, preferring CDA > DDA > SDA
pub fn detect_offline_auth(aip: [u8; 2]) -> OfflineAuth {
    let byte1 = aip[0];
    if byte1 & AIP_CDA != 0 {
        OfflineAuth::Cda
    } else if byte1 & AIP_DDA != 0 {
        OfflineAuth::Dda
    } else if byte1 & AIP_SDA != 0 {
        OfflineAuth::Sda
    } else {
        OfflineAuth::None
    }
}

/// Determine the transaction mode
///
/// CDA support wins on any interface. Over contactless, AIP byte 2 bit 8
/// separates EMV mode from magnetic stripe mode; contact cards always run
/// a full chip transaction.
pub fn detect_mode(aip: [u8; 2], interface: Interface) -> TransactionMode {
    if aip[0] & AIP_CDA != 0 {
        return TransactionMode::Cda;
    }
    match interface {
        Interface::Contact => TransactionMode::Vsdc,
        Interface::Contactless if aip[1] & AIP_EMV_MODE != 0 => TransactionMode::QvsdcMchip,
        Interface::Contactless => TransactionMode::Msd,
    }
}

pub fn classify(aid: &[u8], aip: [u8; 2], interface: Interface) -> Classification {
    Classification {
        brand: Brand::from_aid(aid),
        mode: detect_mode(aip, interface),
        offline_auth: detect_offline_auth(aip),
    }
}
