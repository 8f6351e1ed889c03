//! EMV card session: command exchange and card-level operations
//!
//! [`EmvCard`] turns one logical command into the physical round trips the
//! card needs (length correction, GET RESPONSE chaining) and keeps a log of
//! every round trip for the persistence sink.

use emv_common::{decode, find_tag, tags, Tag, TagId};
use tracing::{debug, warn};

use crate::apdu::{commands, sw, ApduCommand, ApduResponse, CryptogramType, StatusClass};
use crate::error::EmvError;
use crate::sink::CommandLogEntry;
use crate::transport::{Transport, TransportError};
use crate::workflow::Phase;

/// Upper bound on chained GET RESPONSE commands for one logical command
const MAX_GET_RESPONSE: usize = 32;

/// GENERATE AC request parameters
#[derive(Debug, Clone)]
pub struct GenerateAcRequest {
    pub cryptogram_type: CryptogramType,
    /// Terminal data answering CDOL1
    pub cdol_data: Vec<u8>,
    /// Ask for a CDA signature alongside the cryptogram
    pub request_cda: bool,
}

/// Parsed GENERATE AC response. Cryptograms are surfaced, not verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateAcResponse {
    /// Cryptogram Information Data (9F27)
    pub cid: Option<u8>,
    /// Application Transaction Counter (9F36)
    pub atc: Option<u16>,
    /// Application Cryptogram (9F26)
    pub cryptogram: Option<Vec<u8>>,
    /// Issuer Application Data (9F10)
    pub iad: Option<Vec<u8>>,
    /// Signed Dynamic Application Data (9F4B), present with CDA
    pub sdad: Option<Vec<u8>>,
    pub raw_data: Vec<u8>,
}

impl GenerateAcResponse {
    /// Parse a response in format 1 (tag 80) or format 2 (tag 77)
    pub fn parse(data: &[u8]) -> Result<Self, EmvError> {
        let phase = Phase::GenerateAc;
        let decoded = decode(data)
            .into_result()
            .map_err(|source| EmvError::Decode { phase, source })?;

        if let Some(format1) =
            find_tag(&decoded, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1).and_then(Tag::bytes)
        {
            // CID (1) | ATC (2) | AC (8) | IAD (optional)
            if format1.len() < 11 {
                return Err(EmvError::MissingData {
                    phase,
                    what: "application cryptogram",
                });
            }
            return Ok(Self {
                cid: Some(format1[0]),
                atc: Some(u16::from_be_bytes([format1[1], format1[2]])),
                cryptogram: Some(format1[3..11].to_vec()),
                iad: (format1.len() > 11).then(|| format1[11..].to_vec()),
                sdad: None,
                raw_data: data.to_vec(),
            });
        }

        let value = |id: TagId| find_tag(&decoded, id).and_then(Tag::bytes);
        Ok(Self {
            cid: value(tags::CRYPTOGRAM_INFORMATION_DATA).and_then(|v| v.first().copied()),
            atc: value(tags::APPLICATION_TRANSACTION_COUNTER)
                .filter(|v| v.len() == 2)
                .map(|v| u16::from_be_bytes([v[0], v[1]])),
            cryptogram: value(tags::APPLICATION_CRYPTOGRAM).map(<[u8]>::to_vec),
            iad: value(tags::ISSUER_APPLICATION_DATA).map(<[u8]>::to_vec),
            sdad: value(tags::SIGNED_DYNAMIC_APPLICATION_DATA).map(<[u8]>::to_vec),
            raw_data: data.to_vec(),
        })
    }

    /// Cryptogram type the card actually returned
    pub fn cryptogram_type(&self) -> Option<CryptogramType> {
        self.cid.and_then(CryptogramType::from_cid)
    }
}

/// INTERNAL AUTHENTICATE response. The signature is surfaced, not verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicAuthResponse {
    /// Signed Dynamic Application Data
    pub signed_data: Option<Vec<u8>>,
    pub raw_data: Vec<u8>,
}

/// Outcome of an offline PIN VERIFY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinVerification {
    Verified,
    Rejected { tries_remaining: u8 },
    Blocked,
}

/// EMV card interface over a [`Transport`]
pub struct EmvCard<T> {
    transport: T,
    log: Vec<CommandLogEntry>,
    last_status_word: Option<u16>,
}

impl<T: Transport> EmvCard<T> {
    /// Create a new EMV card interface
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            log: Vec::new(),
            last_status_word: None,
        }
    }

    /// Status word of the most recent round trip
    pub fn last_status_word(&self) -> Option<u16> {
        self.last_status_word
    }

    /// Drain the round trips logged since the last call
    pub fn take_log(&mut self) -> Vec<CommandLogEntry> {
        std::mem::take(&mut self.log)
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send one logical command and return its final response
    ///
    /// `6700` on a command without Le is retried once with Le=00, `6CXX`
    /// once with Le=XX. A second length complaint is returned as is.
    /// `61XX` responses are completed with GET RESPONSE.
    pub fn exchange(
        &mut self,
        phase: Phase,
        command: &ApduCommand,
    ) -> Result<ApduResponse, EmvError> {
        let mut response = self.round_trip(phase, command)?;

        match response.status() {
            StatusClass::WrongLength if command.expected_length().is_none() => {
                debug!(%phase, "Wrong length, retrying with Le");
                response = self.round_trip(phase, &command.clone().le(0x00))?;
            }
            StatusClass::WrongLe(le) => {
                debug!(%phase, le, "Wrong Le, retrying with card supplied length");
                response = self.round_trip(phase, &command.clone().le(le))?;
            }
            _ => {}
        }

        self.fetch_remaining(phase, response)
    }

    /// Send GENERATE AC
    pub fn generate_ac(
        &mut self,
        request: &GenerateAcRequest,
    ) -> Result<GenerateAcResponse, EmvError> {
        let phase = Phase::GenerateAc;
        let command = commands::generate_ac(
            request.cryptogram_type,
            request.request_cda,
            &request.cdol_data,
        );
        let response = self.exchange(phase, &command)?;
        expect_success(phase, &response)?;
        GenerateAcResponse::parse(&response.data)
    }

    /// Send INTERNAL AUTHENTICATE with DDOL data
    pub fn internal_authenticate(
        &mut self,
        ddol_data: &[u8],
    ) -> Result<DynamicAuthResponse, EmvError> {
        let phase = Phase::InternalAuthenticate;
        let response = self.exchange(phase, &commands::internal_authenticate(ddol_data))?;
        expect_success(phase, &response)?;

        let decoded = decode(&response.data)
            .into_result()
            .map_err(|source| EmvError::Decode { phase, source })?;
        let signed_data = find_tag(&decoded, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1)
            .or_else(|| find_tag(&decoded, tags::SIGNED_DYNAMIC_APPLICATION_DATA))
            .and_then(Tag::bytes)
            .map(<[u8]>::to_vec);

        Ok(DynamicAuthResponse {
            signed_data,
            raw_data: response.data,
        })
    }

    /// Request an 8 byte random number from the card
    pub fn get_challenge(&mut self) -> Result<Vec<u8>, EmvError> {
        let phase = Phase::GetChallenge;
        let response = self.exchange(phase, &commands::get_challenge())?;
        expect_success(phase, &response)?;
        Ok(response.data)
    }

    /// Verify a plaintext offline PIN
    pub fn verify_pin(&mut self, pin: &str) -> Result<PinVerification, EmvError> {
        let block = plaintext_pin_block(pin).ok_or(EmvError::InvalidPin)?;
        let response = self.exchange(Phase::Verify, &commands::verify(&block))?;

        match response.status_word() {
            sw::SUCCESS => Ok(PinVerification::Verified),
            0x63C0..=0x63CF => Ok(PinVerification::Rejected {
                tries_remaining: response.sw2 & 0x0F,
            }),
            sw::AUTH_METHOD_BLOCKED | sw::REFERENCE_DATA_NOT_USABLE => {
                Ok(PinVerification::Blocked)
            }
            status => Err(EmvError::Protocol {
                phase: Phase::Verify,
                sw: status,
            }),
        }
    }

    /// Read a single data object with GET DATA
    ///
    /// Returns `None` if the card does not hold the object.
    pub fn get_data(&mut self, tag: TagId) -> Result<Option<Vec<u8>>, EmvError> {
        let phase = Phase::GetData;
        let response = self.exchange(phase, &commands::get_data(tag))?;
        match response.status_word() {
            sw::SUCCESS => {}
            sw::REFERENCED_DATA_NOT_FOUND | sw::FILE_NOT_FOUND => return Ok(None),
            status => return Err(EmvError::Protocol { phase, sw: status }),
        }

        let decoded = decode(&response.data)
            .into_result()
            .map_err(|source| EmvError::Decode { phase, source })?;
        Ok(find_tag(&decoded, tag)
            .and_then(Tag::bytes)
            .map(<[u8]>::to_vec))
    }

    fn fetch_remaining(
        &mut self,
        phase: Phase,
        mut response: ApduResponse,
    ) -> Result<ApduResponse, EmvError> {
        let mut data = Vec::new();
        let mut chained = 0;

        while let StatusClass::MoreData(available) = response.status() {
            if chained == MAX_GET_RESPONSE {
                warn!(%phase, "Too many chained GET RESPONSE commands");
                break;
            }
            data.append(&mut response.data);
            response = self.round_trip(phase, &commands::get_response(available))?;
            chained += 1;
        }

        if chained > 0 {
            data.append(&mut response.data);
            response.data = data;
        }
        Ok(response)
    }

    fn round_trip(
        &mut self,
        phase: Phase,
        command: &ApduCommand,
    ) -> Result<ApduResponse, EmvError> {
        let data_len = command.command_data().len();
        if data_len > 0xFF {
            return Err(EmvError::CommandTooLong(data_len));
        }

        let bytes = command.build();
        debug!(%phase, apdu = %hex::encode_upper(&bytes), "C-APDU");

        let result = self
            .transport
            .transmit(&bytes)
            .and_then(|raw| {
                let parsed = ApduResponse::from_bytes(&raw);
                match parsed {
                    Some(response) => Ok((raw, response)),
                    None => Err(TransportError::ShortResponse(raw.len())),
                }
            });

        match result {
            Ok((raw, response)) => {
                let status = response.status_word();
                debug!(%phase, apdu = %hex::encode_upper(&raw), "R-APDU");
                self.last_status_word = Some(status);
                self.log.push(CommandLogEntry {
                    phase,
                    command: bytes,
                    response: raw,
                    status_word: Some(status),
                });
                Ok(response)
            }
            Err(err) => {
                warn!(%phase, error = %err, "Transport failure");
                self.log.push(CommandLogEntry {
                    phase,
                    command: bytes,
                    response: Vec::new(),
                    status_word: None,
                });
                Err(err.into())
            }
        }
    }
}

fn expect_success(phase: Phase, response: &ApduResponse) -> Result<(), EmvError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(EmvError::Protocol {
            phase,
            sw: response.status_word(),
        })
    }
}

/// Build an ISO 9564 format 2 plaintext PIN block (4 to 12 digits)
pub fn plaintext_pin_block(pin: &str) -> Option<[u8; 8]> {
    if !(4..=12).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut nibbles = vec![0x2, pin.len() as u8];
    nibbles.extend(pin.bytes().map(|b| b - b'0'));
    nibbles.resize(16, 0xF);

    let mut block = [0u8; 8];
    for (byte, pair) in block.iter_mut().zip(nibbles.chunks(2)) {
        *byte = (pair[0] << 4) | pair[1];
    }
    Some(block)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Transport answering from a fixed queue and recording what was sent
    struct ScriptedTransport {
        responses: VecDeque<Result<Vec<u8>, TransportError>>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<&[u8]>) -> Self {
            Self {
                responses: responses.into_iter().map(|r| Ok(r.to_vec())).collect(),
                sent: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
            self.sent.push(command.to_vec());
            self.responses
                .pop_front()
                .unwrap_or(Err(TransportError::Timeout))
        }
    }

    #[test]
    fn test_wrong_length_retried_once_with_le() {
        let transport = ScriptedTransport::new(vec![&[0x67, 0x00], &[0x01, 0x90, 0x00]]);
        let mut card = EmvCard::new(transport);

        let command = ApduCommand::new(0x80, 0xA8, 0x00, 0x00).data(vec![0x83, 0x00]);
        let response = card.exchange(Phase::ProcessingOptions, &command).unwrap();
        assert!(response.is_success());

        let transport = card.into_transport();
        assert_eq!(transport.sent.len(), 2);
        assert_eq!(transport.sent[1], vec![0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00, 0x00]);
    }

    #[test]
    fn test_wrong_length_with_le_is_not_retried() {
        let transport = ScriptedTransport::new(vec![&[0x67, 0x00], &[0x90, 0x00]]);
        let mut card = EmvCard::new(transport);

        let response = card
            .exchange(Phase::ProcessingOptions, &commands::get_processing_options(&[]))
            .unwrap();
        assert_eq!(response.status_word(), sw::WRONG_LENGTH);
        assert_eq!(card.last_status_word(), Some(0x6700));
        assert_eq!(card.take_log().len(), 1);
        assert_eq!(card.into_transport().sent.len(), 1);
    }

    #[test]
    fn test_second_length_complaint_is_final() {
        let transport =
            ScriptedTransport::new(vec![&[0x67, 0x00], &[0x67, 0x00], &[0x90, 0x00]]);
        let mut card = EmvCard::new(transport);

        let response = card
            .exchange(Phase::Verify, &commands::verify(&[0x24; 8]))
            .unwrap();
        assert_eq!(response.status_word(), 0x6700);
        assert_eq!(card.into_transport().sent.len(), 2);
    }

    #[test]
    fn test_wrong_le_uses_card_length() {
        let transport = ScriptedTransport::new(vec![&[0x6C, 0x04], &[1, 2, 3, 4, 0x90, 0x00]]);
        let mut card = EmvCard::new(transport);

        let response = card.exchange(Phase::GetChallenge, &commands::get_challenge()).unwrap();
        assert_eq!(response.data, vec![1, 2, 3, 4]);
        assert_eq!(
            card.into_transport().sent[1],
            vec![0x00, 0x84, 0x00, 0x00, 0x04]
        );
    }

    #[test]
    fn test_get_response_chaining() {
        let transport = ScriptedTransport::new(vec![
            &[0xAA, 0x61, 0x02],
            &[0xBB, 0xCC, 0x61, 0x01],
            &[0xDD, 0x90, 0x00],
        ]);
        let mut card = EmvCard::new(transport);

        let response = card
            .exchange(Phase::RecordRead, &commands::read_record(1, 1))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.data, vec![0xAA, 0xBB, 0xCC, 0xDD]);

        let log = card.take_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].command, vec![0x00, 0xC0, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_transport_failure_is_logged() {
        let mut card = EmvCard::new(ScriptedTransport::new(vec![]));
        let err = card
            .exchange(Phase::DirectorySelect, &commands::select(commands::PPSE))
            .unwrap_err();
        assert_eq!(err, EmvError::Transport(TransportError::Timeout));

        let log = card.take_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status_word, None);
        assert!(log[0].response.is_empty());
    }

    #[test]
    fn test_short_response_is_transport_error() {
        let mut card = EmvCard::new(ScriptedTransport::new(vec![&[0x90]]));
        let err = card.get_challenge().unwrap_err();
        assert_eq!(err, EmvError::Transport(TransportError::ShortResponse(1)));
    }

    #[test]
    fn test_generate_ac_format_1() {
        let mut raw = hex::decode("8012800012A1B2C3D4E5F6A7B806010A03A00000").unwrap();
        raw.extend_from_slice(&[0x90, 0x00]);
        let mut card = EmvCard::new(ScriptedTransport::new(vec![&raw]));

        let response = card
            .generate_ac(&GenerateAcRequest {
                cryptogram_type: CryptogramType::Arqc,
                cdol_data: vec![0x00; 4],
                request_cda: false,
            })
            .unwrap();
        assert_eq!(response.cryptogram_type(), Some(CryptogramType::Arqc));
        assert_eq!(response.atc, Some(0x0012));
        assert_eq!(
            response.cryptogram,
            Some(hex::decode("A1B2C3D4E5F6A7B8").unwrap())
        );
        assert_eq!(response.iad, Some(hex::decode("06010A03A00000").unwrap()));
    }

    #[test]
    fn test_generate_ac_format_2() {
        let data = hex::decode(concat!(
            "7725",
            "9F2701 40",
            "9F3602 0007",
            "9F2608 1122334455667788",
            "9F1007 06011203A00000",
            "9F4B04 CAFEBABE"
        )
        .replace(' ', ""))
        .unwrap();

        let response = GenerateAcResponse::parse(&data).unwrap();
        assert_eq!(response.cryptogram_type(), Some(CryptogramType::Tc));
        assert_eq!(response.atc, Some(7));
        assert_eq!(response.sdad, Some(vec![0xCA, 0xFE, 0xBA, 0xBE]));
    }

    #[test]
    fn test_verify_pin_outcomes() {
        let mut card = EmvCard::new(ScriptedTransport::new(vec![
            &[0x90, 0x00],
            &[0x63, 0xC2],
            &[0x69, 0x83],
        ]));
        assert_eq!(card.verify_pin("1234"), Ok(PinVerification::Verified));
        assert_eq!(
            card.verify_pin("1234"),
            Ok(PinVerification::Rejected { tries_remaining: 2 })
        );
        assert_eq!(card.verify_pin("1234"), Ok(PinVerification::Blocked));
        assert_eq!(card.verify_pin("12a4"), Err(EmvError::InvalidPin));
    }

    #[test]
    fn test_plaintext_pin_block() {
        assert_eq!(
            plaintext_pin_block("1234"),
            Some([0x24, 0x12, 0x34, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
        );
        assert_eq!(plaintext_pin_block("123"), None);
    }

    #[test]
    fn test_get_data() {
        let mut card = EmvCard::new(ScriptedTransport::new(vec![
            &[0x9F, 0x36, 0x02, 0x00, 0x2A, 0x90, 0x00],
            &[0x6A, 0x88],
        ]));
        assert_eq!(
            card.get_data(tags::APPLICATION_TRANSACTION_COUNTER),
            Ok(Some(vec![0x00, 0x2A]))
        );
        assert_eq!(card.get_data(tags::PIN_TRY_COUNTER), Ok(None));
    }
}
