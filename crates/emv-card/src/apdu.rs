//! APDU (Application Protocol Data Unit) command handling

use std::fmt;

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response into data and status word
    ///
    /// Returns `None` if the response is shorter than a status word.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let (data, sw) = raw.split_at(raw.len().checked_sub(2)?);
        Some(Self {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.status_word() == sw::SUCCESS
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }

    pub fn status(&self) -> StatusClass {
        StatusClass::of(self.status_word())
    }

    /// Raw response bytes including the status word
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = self.data.clone();
        raw.extend_from_slice(&[self.sw1, self.sw2]);
        raw
    }
}

/// Status word constants (ISO/IEC 7816-4, EMV Book 1)
pub mod sw {
    pub const SUCCESS: u16 = 0x9000;
    pub const WARNING_SELECTED_FILE_INVALIDATED: u16 = 0x6283;
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const AUTH_METHOD_BLOCKED: u16 = 0x6983;
    pub const REFERENCE_DATA_NOT_USABLE: u16 = 0x6984;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const WRONG_DATA: u16 = 0x6A80;
    pub const FUNCTION_NOT_SUPPORTED: u16 = 0x6A81;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const RECORD_NOT_FOUND: u16 = 0x6A83;
    pub const REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;
    pub const WRONG_P1_P2: u16 = 0x6B00;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
}

/// How the engine reacts to a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 9000
    Success,
    /// 61XX: XX more bytes available through GET RESPONSE
    MoreData(u8),
    /// 6CXX: resend with Le = XX
    WrongLe(u8),
    /// 6700: resend with an Le byte
    WrongLength,
    /// 6A82 file or application not found, 6A83 record not found
    NotFound,
    /// Anything else, reported verbatim
    Failure(u16),
}

impl StatusClass {
    pub fn of(sw: u16) -> Self {
        let [sw1, sw2] = sw.to_be_bytes();
        match (sw1, sw2) {
            (0x90, 0x00) => Self::Success,
            (0x61, n) => Self::MoreData(n),
            (0x6C, n) => Self::WrongLe(n),
            (0x67, 0x00) => Self::WrongLength,
            (0x6A, 0x82) | (0x6A, 0x83) => Self::NotFound,
            _ => Self::Failure(sw),
        }
    }
}

/// Human-readable meaning of a status word, for diagnostics
pub fn describe_status(status: u16) -> &'static str {
    match status {
        sw::SUCCESS => "success",
        0x6100..=0x61FF => "more data available",
        0x6200..=0x62FF => "warning: non-volatile memory unchanged",
        0x63C0..=0x63CF => "verification failed, counter in SW2",
        0x6300..=0x63FF => "warning: non-volatile memory changed",
        sw::WRONG_LENGTH => "wrong length",
        sw::SECURITY_STATUS_NOT_SATISFIED => "security status not satisfied",
        sw::AUTH_METHOD_BLOCKED => "authentication method blocked",
        sw::REFERENCE_DATA_NOT_USABLE => "referenced data invalidated",
        sw::CONDITIONS_NOT_SATISFIED => "conditions of use not satisfied",
        0x6900..=0x69FF => "command not allowed",
        sw::WRONG_DATA => "incorrect data field",
        sw::FUNCTION_NOT_SUPPORTED => "function not supported",
        sw::FILE_NOT_FOUND => "file or application not found",
        sw::RECORD_NOT_FOUND => "record not found",
        sw::REFERENCED_DATA_NOT_FOUND => "referenced data not found",
        0x6A00..=0x6AFF => "wrong parameters P1-P2",
        sw::WRONG_P1_P2 => "wrong parameters P1-P2",
        0x6C00..=0x6CFF => "wrong Le, exact length in SW2",
        sw::INS_NOT_SUPPORTED => "instruction not supported",
        sw::CLA_NOT_SUPPORTED => "class not supported",
        _ => "unknown status",
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn ins(&self) -> u8 {
        self.ins
    }

    pub fn command_data(&self) -> &[u8] {
        &self.data
    }

    pub fn expected_length(&self) -> Option<u8> {
        self.le
    }

    /// Build the APDU command bytes
    ///
    /// Data longer than 255 bytes does not fit a short APDU; callers check
    /// this before sending.
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }
}

impl fmt::Display for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.build()))
    }
}

/// GENERATE AC cryptogram types (P1 reference control bits 8-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptogramType {
    /// Application Authentication Cryptogram (decline)
    Aac,
    /// Transaction Certificate (approve offline)
    Tc,
    /// Authorisation Request Cryptogram (go online)
    Arqc,
}

impl CryptogramType {
    pub fn reference_control(self) -> u8 {
        match self {
            Self::Aac => 0x00,
            Self::Tc => 0x40,
            Self::Arqc => 0x80,
        }
    }

    /// Decode the cryptogram type from Cryptogram Information Data
    pub fn from_cid(cid: u8) -> Option<Self> {
        match cid & 0xC0 {
            0x00 => Some(Self::Aac),
            0x40 => Some(Self::Tc),
            0x80 => Some(Self::Arqc),
            _ => None,
        }
    }
}

impl fmt::Display for CryptogramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aac => "AAC",
            Self::Tc => "TC",
            Self::Arqc => "ARQC",
        })
    }
}

/// Common EMV APDU commands
pub mod commands {
    use emv_common::{tags, Tag};

    use super::{ApduCommand, CryptogramType};

    /// Payment System Environment directory (contact)
    pub const PSE: &[u8] = b"1PAY.SYS.DDF01";

    /// Proximity Payment System Environment directory (contactless)
    pub const PPSE: &[u8] = b"2PAY.SYS.DDF01";

    /// SELECT command (by name/AID)
    pub fn select(name: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x00)
            .data(name.to_vec())
            .le(0x00)
    }

    /// GET PROCESSING OPTIONS command
    ///
    /// The PDOL data is wrapped in a command template (tag 83). The trailing
    /// Le byte is mandatory; contactless readers answer 6700 without it.
    pub fn get_processing_options(pdol_data: &[u8]) -> ApduCommand {
        let template = Tag::primitive(tags::COMMAND_TEMPLATE, pdol_data.to_vec());
        ApduCommand::new(0x80, 0xA8, 0x00, 0x00)
            .data(emv_common::encode(&template))
            .le(0x00)
    }

    /// READ RECORD command
    pub fn read_record(record_number: u8, sfi: u8) -> ApduCommand {
        let p2 = (sfi << 3) | 0x04;
        ApduCommand::new(0x00, 0xB2, record_number, p2).le(0x00)
    }

    /// GENERATE AC command
    pub fn generate_ac(
        cryptogram_type: CryptogramType,
        request_cda: bool,
        cdol_data: &[u8],
    ) -> ApduCommand {
        let mut p1 = cryptogram_type.reference_control();
        if request_cda {
            p1 |= 0x10;
        }
        ApduCommand::new(0x80, 0xAE, p1, 0x00)
            .data(cdol_data.to_vec())
            .le(0x00)
    }

    /// INTERNAL AUTHENTICATE command (for DDA)
    pub fn internal_authenticate(ddol_data: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0x88, 0x00, 0x00)
            .data(ddol_data.to_vec())
            .le(0x00)
    }

    /// GET CHALLENGE command - request an 8 byte random number
    pub fn get_challenge() -> ApduCommand {
        ApduCommand::new(0x00, 0x84, 0x00, 0x00).le(0x00)
    }

    /// VERIFY command with a plaintext offline PIN block
    pub fn verify(pin_block: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0x20, 0x00, 0x80).data(pin_block.to_vec())
    }

    /// GET RESPONSE command, fetching `length` pending bytes
    pub fn get_response(length: u8) -> ApduCommand {
        ApduCommand::new(0x00, 0xC0, 0x00, 0x00).le(length)
    }

    /// GET DATA command - request a specific primitive data object
    pub fn get_data(tag: emv_common::TagId) -> ApduCommand {
        let [_, _, p1, p2] = tag.value().to_be_bytes();
        ApduCommand::new(0x80, 0xCA, p1, p2).le(0x00)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_ppse() {
        let cmd = commands::select(commands::PPSE);
        let mut expected = vec![0x00, 0xA4, 0x04, 0x00, 0x0E];
        expected.extend_from_slice(b"2PAY.SYS.DDF01");
        expected.push(0x00);
        assert_eq!(cmd.build(), expected);
        assert_eq!(commands::PSE.len(), 14);
    }

    #[test]
    fn test_read_record() {
        assert_eq!(
            commands::read_record(1, 2).build(),
            vec![0x00, 0xB2, 0x01, 0x14, 0x00]
        );
    }

    #[test]
    fn test_gpo_without_pdol() {
        assert_eq!(
            commands::get_processing_options(&[]).build(),
            vec![0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00, 0x00]
        );
    }

    #[test]
    fn test_gpo_with_pdol_data() {
        let cmd = commands::get_processing_options(&[0x36, 0x00, 0x40, 0x00]);
        assert_eq!(
            cmd.build(),
            vec![0x80, 0xA8, 0x00, 0x00, 0x06, 0x83, 0x04, 0x36, 0x00, 0x40, 0x00, 0x00]
        );
    }

    #[test]
    fn test_generate_ac() {
        let cmd = commands::generate_ac(CryptogramType::Arqc, true, &[0x01, 0x02]);
        assert_eq!(cmd.build(), vec![0x80, 0xAE, 0x90, 0x00, 0x02, 0x01, 0x02, 0x00]);
        let cmd = commands::generate_ac(CryptogramType::Aac, false, &[0x01]);
        assert_eq!(cmd.build(), vec![0x80, 0xAE, 0x00, 0x00, 0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_misc_commands() {
        assert_eq!(commands::get_challenge().build(), vec![0x00, 0x84, 0x00, 0x00, 0x00]);
        assert_eq!(commands::get_response(0x1C).build(), vec![0x00, 0xC0, 0x00, 0x00, 0x1C]);
        assert_eq!(
            commands::get_data(emv_common::TagId::new(0x9F36)).build(),
            vec![0x80, 0xCA, 0x9F, 0x36, 0x00]
        );
        assert_eq!(
            commands::internal_authenticate(&[0xAA, 0xBB, 0xCC, 0xDD]).build(),
            vec![0x00, 0x88, 0x00, 0x00, 0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0x00]
        );
    }

    #[test]
    fn test_response_parsing() {
        let response = ApduResponse::from_bytes(&[0x6F, 0x00, 0x90, 0x00]).unwrap();
        assert!(response.is_success());
        assert_eq!(response.data, vec![0x6F, 0x00]);
        assert_eq!(response.status_string(), "9000");
        assert!(ApduResponse::from_bytes(&[0x90]).is_none());
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::of(0x9000), StatusClass::Success);
        assert_eq!(StatusClass::of(0x6115), StatusClass::MoreData(0x15));
        assert_eq!(StatusClass::of(0x6C20), StatusClass::WrongLe(0x20));
        assert_eq!(StatusClass::of(0x6700), StatusClass::WrongLength);
        assert_eq!(StatusClass::of(0x6A82), StatusClass::NotFound);
        assert_eq!(StatusClass::of(0x6A83), StatusClass::NotFound);
        assert_eq!(StatusClass::of(0x6985), StatusClass::Failure(0x6985));
        assert_eq!(describe_status(0x63C2), "verification failed, counter in SW2");
    }

    #[test]
    fn test_cryptogram_type_from_cid() {
        assert_eq!(CryptogramType::from_cid(0x80), Some(CryptogramType::Arqc));
        assert_eq!(CryptogramType::from_cid(0x40), Some(CryptogramType::Tc));
        assert_eq!(CryptogramType::from_cid(0x00), Some(CryptogramType::Aac));
        assert_eq!(CryptogramType::from_cid(0xC0), None);
    }
}
