//! Field formatters for human-readable output

use clap::ValueEnum;
use emv_common::{tag_format, TagFormat, TagId};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
    /// Machine-readable JSON
    Json,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Raw => "Raw",
            FormatMode::Human => "Human-Readable",
            FormatMode::Json => "JSON",
        }
    }
}

/// Format a field value based on its tag type
pub fn format_value(tag: TagId, value: &[u8], mode: FormatMode) -> String {
    if mode != FormatMode::Human {
        return hex::encode_upper(value);
    }

    match tag.value() {
        // Application Expiration Date (YYMMDD)
        0x5F24 => {
            if value.len() == 3 {
                format!("20{:02X}/{:02X} (Year/Month)", value[0], value[1])
            } else {
                hex::encode_upper(value)
            }
        }

        // Application Effective Date (YYMMDD)
        0x5F25 => {
            if value.len() == 3 {
                format!(
                    "20{:02X}/{:02X}/{:02X} (YY/MM/DD)",
                    value[0], value[1], value[2]
                )
            } else {
                hex::encode_upper(value)
            }
        }

        // Issuer Country Code, Terminal Country Code
        0x5F28 | 0x9F1A => match bcd_number(value) {
            Some(code) => match get_country_name(code) {
                Some(country) => format!("{} ({})", code, country),
                None => format!("{}", code),
            },
            None => hex::encode_upper(value),
        },

        // Currency Codes
        0x5F2A | 0x9F42 => match bcd_number(value) {
            Some(code) => match get_currency_name(code) {
                Some(currency) => currency.to_string(),
                None => format!("Currency Code {}", code),
            },
            None => hex::encode_upper(value),
        },

        // Amounts in minor units
        0x9F02 | 0x9F03 => match bcd_number(value) {
            Some(amount) => format!("{}.{:02}", amount / 100, amount % 100),
            None => hex::encode_upper(value),
        },

        // Application PAN Sequence Number
        0x5F34 => {
            if value.len() == 1 {
                format!("{:02X}", value[0])
            } else {
                hex::encode_upper(value)
            }
        }

        // Application Interchange Profile
        0x82 => {
            if value.len() == 2 {
                format!("{} ({})", hex::encode_upper(value), describe_aip(value))
            } else {
                hex::encode_upper(value)
            }
        }

        // Counters
        0x9F36 | 0x9F13 | 0x9F17 => {
            let count = value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
            format!("{} (0x{})", count, hex::encode_upper(value))
        }

        // Exponents
        0x9F32 | 0x9F47 => {
            if value.len() <= 3 {
                let exp = value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
                format!("{} (0x{})", exp, hex::encode_upper(value))
            } else {
                hex::encode_upper(value)
            }
        }

        // Large binary fields (certificates, signatures)
        0x90 | 0x92 | 0x93 | 0x9F46 | 0x9F48 | 0x9F4B => {
            if value.len() > 32 {
                format!(
                    "{} ... ({} bytes total)",
                    hex::encode_upper(&value[..32]),
                    value.len()
                )
            } else {
                hex::encode_upper(value)
            }
        }

        // Track 2 Data
        0x57 | 0x9F6B => {
            let hex_str = hex::encode_upper(value);
            hex_str.replace('D', " | ")
        }

        _ => match tag_format(tag) {
            TagFormat::Text => String::from_utf8(value.to_vec())
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| hex::encode_upper(value)),
            _ => hex::encode_upper(value),
        },
    }
}

/// Decimal value of packed BCD digits
fn bcd_number(value: &[u8]) -> Option<u64> {
    value.iter().try_fold(0u64, |acc, &byte| {
        let (high, low) = (byte >> 4, byte & 0x0F);
        (high <= 9 && low <= 9).then(|| acc * 100 + (high * 10 + low) as u64)
    })
}

fn describe_aip(aip: &[u8]) -> String {
    const BITS: &[(u8, &str)] = &[
        (0x40, "SDA"),
        (0x20, "DDA"),
        (0x10, "cardholder verification"),
        (0x08, "terminal risk management"),
        (0x04, "issuer authentication"),
        (0x01, "CDA"),
    ];
    let supported: Vec<&str> = BITS
        .iter()
        .filter(|(bit, _)| aip[0] & bit != 0)
        .map(|&(_, name)| name)
        .collect();
    if supported.is_empty() {
        "none".to_string()
    } else {
        supported.join(", ")
    }
}

/// ISO 3166-1 numeric country codes (subset)
fn get_country_name(code: u64) -> Option<&'static str> {
    match code {
        124 => Some("Canada"),
        840 => Some("United States"),
        826 => Some("United Kingdom"),
        276 => Some("Germany"),
        250 => Some("France"),
        380 => Some("Italy"),
        724 => Some("Spain"),
        528 => Some("Netherlands"),
        156 => Some("China"),
        392 => Some("Japan"),
        _ => None,
    }
}

/// ISO 4217 numeric currency codes (subset)
fn get_currency_name(code: u64) -> Option<&'static str> {
    match code {
        124 => Some("CAD (Canadian Dollar)"),
        840 => Some("USD (US Dollar)"),
        978 => Some("EUR (Euro)"),
        826 => Some("GBP (Pound Sterling)"),
        392 => Some("JPY (Japanese Yen)"),
        156 => Some("CNY (Chinese Yuan)"),
        _ => None,
    }
}
