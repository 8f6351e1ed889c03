//! Data Object Lists (PDOL, CDOL1/2, DDOL) and the terminal data that fills them

use std::collections::BTreeMap;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use emv_common::tlv::read_tag;
use emv_common::{tag_format, tags, DecodeError, TagFormat, TagId};

/// One `tag + length` pair of a Data Object List
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DolEntry {
    pub tag: TagId,
    pub length: usize,
}

/// Largest amount of terminal data one command can carry
const MAX_DOL_DATA: usize = 0xFF;

/// Parse a Data Object List (tags and lengths, no values)
///
/// DOL lengths are a single binary byte, and the requested values must
/// fit in one command's data field.
pub fn parse_dol(dol: &[u8]) -> Result<Vec<DolEntry>, DecodeError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    let mut total = 0;
    while offset < dol.len() {
        let (tag, next) = read_tag(dol, offset)?;
        let length = *dol
            .get(next)
            .ok_or(DecodeError::UnexpectedEnd { offset: next })? as usize;
        total += length;
        if total > MAX_DOL_DATA {
            return Err(DecodeError::DataObjectListTooLong { offset, total });
        }
        entries.push(DolEntry { tag, length });
        offset = next + 1;
    }
    Ok(entries)
}

/// Terminal-side values used to answer a Data Object List
///
/// Tags the card asks for that have no value here are answered with zeros
/// of the requested length.
#[derive(Debug, Clone, Default)]
pub struct DolBuilder {
    values: BTreeMap<TagId, Vec<u8>>,
}

impl DolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in values every terminal supplies: date, time, TVR, CVM
    /// results, capabilities, TTQ, USD/US defaults and a fresh
    /// unpredictable number
    pub fn with_defaults(self) -> Self {
        self.set_datetime(Local::now().naive_local())
            .set_amount(0)
            .set_amount_other(0)
            .set_currency(840)
            .set_terminal_country(840)
            .set_transaction_type(0x00)
            .set_terminal_type(0x22)
            .set(tags::TERMINAL_VERIFICATION_RESULTS, vec![0x00; 5])
            .set(tags::CVM_RESULTS, vec![0x3F, 0x00, 0x00])
            .set(tags::TERMINAL_CAPABILITIES, vec![0xE0, 0xF0, 0xC8])
            .set(
                tags::ADDITIONAL_TERMINAL_CAPABILITIES,
                vec![0x60, 0x00, 0xF0, 0xA0, 0x01],
            )
            .set_ttq([0x36, 0x00, 0x40, 0x00])
            .set_unpredictable_number(generate_random_bytes(4))
    }

    /// Set an arbitrary tag value
    pub fn set(mut self, tag: TagId, value: Vec<u8>) -> Self {
        self.values.insert(tag, value);
        self
    }

    /// Amount, Authorised (9F02) in minor currency units
    pub fn set_amount(self, amount: u64) -> Self {
        self.set(tags::AMOUNT_AUTHORISED, bcd(amount, 6))
    }

    /// Amount, Other (9F03) in minor currency units
    pub fn set_amount_other(self, amount: u64) -> Self {
        self.set(tags::AMOUNT_OTHER, bcd(amount, 6))
    }

    /// Transaction Currency Code (5F2A), ISO 4217 numeric
    pub fn set_currency(self, code: u16) -> Self {
        self.set(tags::TRANSACTION_CURRENCY_CODE, bcd(code as u64, 2))
    }

    /// Terminal Country Code (9F1A), ISO 3166-1 numeric
    pub fn set_terminal_country(self, code: u16) -> Self {
        self.set(tags::TERMINAL_COUNTRY_CODE, bcd(code as u64, 2))
    }

    pub fn set_transaction_type(self, transaction_type: u8) -> Self {
        self.set(tags::TRANSACTION_TYPE, vec![transaction_type])
    }

    pub fn set_terminal_type(self, terminal_type: u8) -> Self {
        self.set(tags::TERMINAL_TYPE, vec![terminal_type])
    }

    /// Terminal Transaction Qualifiers (9F66)
    pub fn set_ttq(self, ttq: [u8; 4]) -> Self {
        self.set(tags::TERMINAL_TRANSACTION_QUALIFIERS, ttq.to_vec())
    }

    pub fn set_unpredictable_number(self, number: Vec<u8>) -> Self {
        self.set(tags::UNPREDICTABLE_NUMBER, number)
    }

    /// Transaction Date (9A) and Time (9F21)
    pub fn set_datetime(self, at: NaiveDateTime) -> Self {
        let date = (at.year().rem_euclid(100) as u64) * 10_000
            + at.month() as u64 * 100
            + at.day() as u64;
        let time = at.hour() as u64 * 10_000 + at.minute() as u64 * 100 + at.second() as u64;
        self.set(tags::TRANSACTION_DATE, bcd(date, 3))
            .set(tags::TRANSACTION_TIME, bcd(time, 3))
    }

    pub fn value(&self, tag: TagId) -> Option<&[u8]> {
        self.values.get(&tag).map(Vec::as_slice)
    }

    /// Build the concatenated values requested by a raw DOL
    pub fn build(&self, dol: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(self.build_entries(&parse_dol(dol)?))
    }

    /// Build the concatenated values for already parsed DOL entries
    ///
    /// Each value occupies exactly the length the card asked for.
    pub fn build_entries(&self, entries: &[DolEntry]) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in entries {
            match self.values.get(&entry.tag) {
                Some(value) => out.extend(fit(value, entry.length, tag_format(entry.tag))),
                None => out.extend(std::iter::repeat(0x00).take(entry.length)),
            }
        }
        out
    }
}

/// Generate random bytes for unpredictable numbers and challenges
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;

    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encode `value` as `len` bytes of packed BCD, keeping the rightmost digits
pub fn bcd(mut value: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for byte in out.iter_mut().rev() {
        let pair = (value % 100) as u8;
        *byte = ((pair / 10) << 4) | (pair % 10);
        value /= 100;
    }
    out
}

// EMV Book 3 section 5.4 length rules
fn fit(value: &[u8], length: usize, format: TagFormat) -> Vec<u8> {
    match format {
        TagFormat::Numeric => {
            if value.len() >= length {
                value[value.len() - length..].to_vec()
            } else {
                let mut out = vec![0x00; length - value.len()];
                out.extend_from_slice(value);
                out
            }
        }
        TagFormat::CompressedNumeric => pad_right(value, length, 0xFF),
        _ => pad_right(value, length, 0x00),
    }
}

fn pad_right(value: &[u8], length: usize, filler: u8) -> Vec<u8> {
    let mut out: Vec<u8> = value.iter().copied().take(length).collect();
    out.resize(length, filler);
    out
}
