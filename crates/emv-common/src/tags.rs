//! EMV tag registry: names and data formats of known tags

use crate::tlv::TagId;

// Application metadata
pub const APPLICATION_IDENTIFIER: TagId = TagId::new(0x4F);
pub const APPLICATION_LABEL: TagId = TagId::new(0x50);
pub const APPLICATION_PAN: TagId = TagId::new(0x5A);
pub const APPLICATION_EXPIRATION_DATE: TagId = TagId::new(0x5F24);
pub const APPLICATION_EFFECTIVE_DATE: TagId = TagId::new(0x5F25);
pub const APPLICATION_PAN_SEQUENCE_NUMBER: TagId = TagId::new(0x5F34);
pub const APPLICATION_PRIORITY_INDICATOR: TagId = TagId::new(0x87);
pub const APPLICATION_PREFERRED_NAME: TagId = TagId::new(0x9F12);
pub const APPLICATION_USAGE_CONTROL: TagId = TagId::new(0x9F07);
pub const APPLICATION_VERSION_NUMBER: TagId = TagId::new(0x9F08);
pub const APPLICATION_CURRENCY_CODE: TagId = TagId::new(0x9F42);
pub const APPLICATION_CURRENCY_EXPONENT: TagId = TagId::new(0x9F44);
pub const DEDICATED_FILE_NAME: TagId = TagId::new(0x84);
pub const SHORT_FILE_IDENTIFIER: TagId = TagId::new(0x88);

// Cardholder data
pub const CARDHOLDER_NAME: TagId = TagId::new(0x5F20);
pub const TRACK_1_DATA: TagId = TagId::new(0x56);
pub const TRACK_2_EQUIVALENT_DATA: TagId = TagId::new(0x57);
pub const TRACK_2_DATA: TagId = TagId::new(0x9F6B);

// Issuer data
pub const ISSUER_COUNTRY_CODE: TagId = TagId::new(0x5F28);
pub const LANGUAGE_PREFERENCE: TagId = TagId::new(0x5F2D);
pub const SERVICE_CODE: TagId = TagId::new(0x5F30);

// Cryptography and certificates
pub const CA_PUBLIC_KEY_INDEX: TagId = TagId::new(0x8F);
pub const ISSUER_PUBLIC_KEY_CERTIFICATE: TagId = TagId::new(0x90);
pub const ISSUER_PUBLIC_KEY_EXPONENT: TagId = TagId::new(0x9F32);
pub const ISSUER_PUBLIC_KEY_REMAINDER: TagId = TagId::new(0x92);
pub const ICC_PUBLIC_KEY_CERTIFICATE: TagId = TagId::new(0x9F46);
pub const ICC_PUBLIC_KEY_EXPONENT: TagId = TagId::new(0x9F47);
pub const ICC_PUBLIC_KEY_REMAINDER: TagId = TagId::new(0x9F48);
pub const ICC_PIN_ENCIPHERMENT_PUBLIC_KEY_CERTIFICATE: TagId = TagId::new(0x9F2D);
pub const SIGNED_STATIC_APPLICATION_DATA: TagId = TagId::new(0x93);
pub const SIGNED_DYNAMIC_APPLICATION_DATA: TagId = TagId::new(0x9F4B);
pub const STATIC_DATA_AUTHENTICATION_TAG_LIST: TagId = TagId::new(0x9F4A);
pub const ICC_DYNAMIC_NUMBER: TagId = TagId::new(0x9F4C);

// Transaction processing
pub const AIP: TagId = TagId::new(0x82);
pub const AFL: TagId = TagId::new(0x94);
pub const PDOL: TagId = TagId::new(0x9F38);
pub const CDOL1: TagId = TagId::new(0x8C);
pub const CDOL2: TagId = TagId::new(0x8D);
pub const DDOL: TagId = TagId::new(0x9F49);
pub const CVM_LIST: TagId = TagId::new(0x8E);
pub const COMMAND_TEMPLATE: TagId = TagId::new(0x83);
pub const APPLICATION_CRYPTOGRAM: TagId = TagId::new(0x9F26);
pub const CRYPTOGRAM_INFORMATION_DATA: TagId = TagId::new(0x9F27);
pub const APPLICATION_TRANSACTION_COUNTER: TagId = TagId::new(0x9F36);
pub const ISSUER_APPLICATION_DATA: TagId = TagId::new(0x9F10);
pub const PIN_TRY_COUNTER: TagId = TagId::new(0x9F17);
pub const LAST_ONLINE_ATC: TagId = TagId::new(0x9F13);

// Terminal data
pub const AMOUNT_AUTHORISED: TagId = TagId::new(0x9F02);
pub const AMOUNT_OTHER: TagId = TagId::new(0x9F03);
pub const TERMINAL_COUNTRY_CODE: TagId = TagId::new(0x9F1A);
pub const TRANSACTION_CURRENCY_CODE: TagId = TagId::new(0x5F2A);
pub const TRANSACTION_DATE: TagId = TagId::new(0x9A);
pub const TRANSACTION_TIME: TagId = TagId::new(0x9F21);
pub const TRANSACTION_TYPE: TagId = TagId::new(0x9C);
pub const TERMINAL_VERIFICATION_RESULTS: TagId = TagId::new(0x95);
pub const TERMINAL_CAPABILITIES: TagId = TagId::new(0x9F33);
pub const ADDITIONAL_TERMINAL_CAPABILITIES: TagId = TagId::new(0x9F40);
pub const TERMINAL_TYPE: TagId = TagId::new(0x9F35);
pub const CVM_RESULTS: TagId = TagId::new(0x9F34);
pub const UNPREDICTABLE_NUMBER: TagId = TagId::new(0x9F37);
pub const TERMINAL_TRANSACTION_QUALIFIERS: TagId = TagId::new(0x9F66);
pub const MERCHANT_NAME_AND_LOCATION: TagId = TagId::new(0x9F4E);

// Templates
pub const APPLICATION_TEMPLATE: TagId = TagId::new(0x61);
pub const FCI_TEMPLATE: TagId = TagId::new(0x6F);
pub const RECORD_TEMPLATE: TagId = TagId::new(0x70);
pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_1: TagId = TagId::new(0x80);
pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_2: TagId = TagId::new(0x77);
pub const FCI_PROPRIETARY_TEMPLATE: TagId = TagId::new(0xA5);
pub const FCI_ISSUER_DISCRETIONARY_DATA: TagId = TagId::new(0xBF0C);

/// Data format of a tag's value, as listed in EMV Book 3 Annex A
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    /// Raw binary (b)
    Binary,
    /// BCD digits, right justified and left padded with zeros (n)
    Numeric,
    /// BCD digits, left justified and right padded with `F` (cn)
    CompressedNumeric,
    /// Alphanumeric or printable text (a, an, ans)
    Text,
    /// Constructed template
    Template,
    /// Data object list (tag + length pairs)
    DataObjectList,
}

fn lookup(tag: TagId) -> Option<(&'static str, TagFormat)> {
    use TagFormat::*;

    let entry = match tag.value() {
        0x4F => ("Application Identifier (AID)", Binary),
        0x50 => ("Application Label", Text),
        0x56 => ("Track 1 Data", Binary),
        0x57 => ("Track 2 Equivalent Data", Binary),
        0x5A => ("Application PAN", CompressedNumeric),
        0x5F20 => ("Cardholder Name", Text),
        0x5F24 => ("Application Expiration Date", Numeric),
        0x5F25 => ("Application Effective Date", Numeric),
        0x5F28 => ("Issuer Country Code", Numeric),
        0x5F2A => ("Transaction Currency Code", Numeric),
        0x5F2D => ("Language Preference", Text),
        0x5F30 => ("Service Code", Numeric),
        0x5F34 => ("Application PAN Sequence Number", Numeric),
        0x61 => ("Application Template", Template),
        0x6F => ("File Control Information (FCI) Template", Template),
        0x70 => ("Record Template", Template),
        0x77 => ("Response Message Template Format 2", Template),
        0x80 => ("Response Message Template Format 1", Binary),
        0x82 => ("Application Interchange Profile", Binary),
        0x83 => ("Command Template", Binary),
        0x84 => ("Dedicated File (DF) Name", Binary),
        0x87 => ("Application Priority Indicator", Binary),
        0x88 => ("Short File Identifier (SFI)", Binary),
        0x8C => ("CDOL1", DataObjectList),
        0x8D => ("CDOL2", DataObjectList),
        0x8E => ("Cardholder Verification Method (CVM) List", Binary),
        0x8F => ("CA Public Key Index", Binary),
        0x90 => ("Issuer Public Key Certificate", Binary),
        0x92 => ("Issuer Public Key Remainder", Binary),
        0x93 => ("Signed Static Application Data", Binary),
        0x94 => ("Application File Locator", Binary),
        0x95 => ("Terminal Verification Results", Binary),
        0x9A => ("Transaction Date", Numeric),
        0x9C => ("Transaction Type", Numeric),
        0x9F02 => ("Amount, Authorised", Numeric),
        0x9F03 => ("Amount, Other", Numeric),
        0x9F07 => ("Application Usage Control", Binary),
        0x9F08 => ("Application Version Number (Card)", Binary),
        0x9F0D => ("Issuer Action Code - Default", Binary),
        0x9F0E => ("Issuer Action Code - Denial", Binary),
        0x9F0F => ("Issuer Action Code - Online", Binary),
        0x9F10 => ("Issuer Application Data", Binary),
        0x9F11 => ("Issuer Code Table Index", Numeric),
        0x9F12 => ("Application Preferred Name", Text),
        0x9F13 => ("Last Online ATC Register", Binary),
        0x9F17 => ("PIN Try Counter", Binary),
        0x9F1A => ("Terminal Country Code", Numeric),
        0x9F1F => ("Track 1 Discretionary Data", Text),
        0x9F21 => ("Transaction Time", Numeric),
        0x9F26 => ("Application Cryptogram", Binary),
        0x9F27 => ("Cryptogram Information Data", Binary),
        0x9F2D => ("ICC PIN Encipherment Public Key Certificate", Binary),
        0x9F32 => ("Issuer Public Key Exponent", Binary),
        0x9F33 => ("Terminal Capabilities", Binary),
        0x9F34 => ("CVM Results", Binary),
        0x9F35 => ("Terminal Type", Numeric),
        0x9F36 => ("Application Transaction Counter (ATC)", Binary),
        0x9F37 => ("Unpredictable Number", Binary),
        0x9F38 => ("Processing Options Data Object List (PDOL)", DataObjectList),
        0x9F40 => ("Additional Terminal Capabilities", Binary),
        0x9F42 => ("Application Currency Code", Numeric),
        0x9F44 => ("Application Currency Exponent", Numeric),
        0x9F46 => ("ICC Public Key Certificate", Binary),
        0x9F47 => ("ICC Public Key Exponent", Binary),
        0x9F48 => ("ICC Public Key Remainder", Binary),
        0x9F49 => ("Dynamic Data Authentication Data Object List (DDOL)", DataObjectList),
        0x9F4A => ("Static Data Authentication Tag List", Binary),
        0x9F4B => ("Signed Dynamic Application Data", Binary),
        0x9F4C => ("ICC Dynamic Number", Binary),
        0x9F4E => ("Merchant Name and Location", Text),
        0x9F66 => ("Terminal Transaction Qualifiers (TTQ)", Binary),
        0x9F6B => ("Track 2 Data", Binary),
        0x9F6C => ("Card Transaction Qualifiers (CTQ)", Binary),
        0xA5 => ("FCI Proprietary Template", Template),
        0xBF0C => ("FCI Issuer Discretionary Data", Template),
        _ => return None,
    };
    Some(entry)
}

/// Get a human-readable name for an EMV tag
pub fn get_tag_name(tag: TagId) -> &'static str {
    lookup(tag).map_or("Unknown Tag", |(name, _)| name)
}

/// Get the value format of an EMV tag
///
/// Unknown constructed tags are reported as templates, everything else
/// unknown as binary.
pub fn tag_format(tag: TagId) -> TagFormat {
    match lookup(tag) {
        Some((_, format)) => format,
        None if tag.is_constructed() => TagFormat::Template,
        None => TagFormat::Binary,
    }
}

/// Whether the registry knows this tag
pub fn is_known(tag: TagId) -> bool {
    lookup(tag).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(get_tag_name(APPLICATION_PAN), "Application PAN");
        assert_eq!(get_tag_name(PDOL), "Processing Options Data Object List (PDOL)");
        assert_eq!(get_tag_name(TagId::new(0xDF01)), "Unknown Tag");
    }

    #[test]
    fn test_tag_formats() {
        assert_eq!(tag_format(AMOUNT_AUTHORISED), TagFormat::Numeric);
        assert_eq!(tag_format(APPLICATION_PAN), TagFormat::CompressedNumeric);
        assert_eq!(tag_format(CDOL1), TagFormat::DataObjectList);
        assert_eq!(tag_format(TagId::new(0xBF20)), TagFormat::Template);
        assert_eq!(tag_format(TagId::new(0xDF20)), TagFormat::Binary);
        assert!(is_known(FCI_TEMPLATE));
    }
}
