//! Transaction workflow engine
//!
//! Drives one card through directory selection, application selection,
//! GET PROCESSING OPTIONS, record reading and classification. Each phase is
//! a method that consumes the [`WorkflowContext`] and names the next phase;
//! [`TransactionEngine::run`] loops until `Complete` or the first error.

use std::fmt;

use chrono::Utc;
use emv_common::{decode, find_tag, tags, Tag, TagId};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::apdu::{commands, sw, CryptogramType, StatusClass};
use crate::classify::classify;
use crate::config::EngineConfig;
use crate::error::EmvError;
use crate::protocol::{
    DynamicAuthResponse, EmvCard, GenerateAcRequest, GenerateAcResponse, PinVerification,
};
use crate::record::{
    collect_candidates, order_by_priority, AflEntry, AidCandidate, RecordIssue, TransactionRecord,
};
use crate::sink::{flatten_tags, PersistenceSink, SessionMetadata, SessionOutcome};
use crate::transport::Transport;

/// DDOL used when the card does not supply one: the unpredictable number
const DEFAULT_DDOL: &[u8] = &[0x9F, 0x37, 0x04];

/// Workflow states plus the card operations available afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    DirectorySelect,
    DirectoryRead,
    DirectAidFallback,
    AidSelect,
    ProcessingOptions,
    RecordRead,
    Classify,
    Complete,
    Failed,
    GenerateAc,
    InternalAuthenticate,
    GetChallenge,
    Verify,
    GetData,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::DirectorySelect => "DirectorySelect",
            Phase::DirectoryRead => "DirectoryRead",
            Phase::DirectAidFallback => "DirectAidFallback",
            Phase::AidSelect => "AidSelect",
            Phase::ProcessingOptions => "ProcessingOptions",
            Phase::RecordRead => "RecordRead",
            Phase::Classify => "Classify",
            Phase::Complete => "Complete",
            Phase::Failed => "Failed",
            Phase::GenerateAc => "GenerateAc",
            Phase::InternalAuthenticate => "InternalAuthenticate",
            Phase::GetChallenge => "GetChallenge",
            Phase::Verify => "Verify",
            Phase::GetData => "GetData",
        })
    }
}

/// A transaction that ended in `Failed`, with whatever was collected
#[derive(Debug, Error)]
#[error("transaction failed during {phase}")]
pub struct TransactionFailure {
    /// Phase that was running when the error occurred
    pub phase: Phase,
    /// Last status word received from the card
    pub status_word: Option<u16>,
    #[source]
    pub error: EmvError,
    pub record: Box<TransactionRecord>,
}

/// State carried from one phase to the next
#[derive(Debug)]
pub struct WorkflowContext {
    pub phase: Phase,
    /// SFI of the directory elementary file, from tag 88
    pub directory_sfi: Option<u8>,
    /// Decoded FCI of the selected application
    pub application_fci: Vec<Tag>,
    pub record: TransactionRecord,
}

impl WorkflowContext {
    pub fn new(record: TransactionRecord) -> Self {
        Self {
            phase: Phase::DirectorySelect,
            directory_sfi: None,
            application_fci: Vec::new(),
            record,
        }
    }

    fn add_candidates(&mut self, found: Vec<AidCandidate>) {
        for candidate in found {
            if !self.record.candidates.iter().any(|c| c.aid == candidate.aid) {
                self.record.candidates.push(candidate);
            }
        }
    }
}

/// Runs transactions against one card and hands results to a sink
pub struct TransactionEngine<T, S> {
    card: EmvCard<T>,
    sink: S,
    config: EngineConfig,
    state: Phase,
    session_id: u64,
    next_session_id: u64,
}

impl<T: Transport, S: PersistenceSink> TransactionEngine<T, S> {
    pub fn new(transport: T, sink: S, config: EngineConfig) -> Self {
        Self {
            card: EmvCard::new(transport),
            sink,
            config,
            state: Phase::DirectorySelect,
            session_id: 0,
            next_session_id: 1,
        }
    }

    /// Number the next transaction `id`; later ones count up from it
    pub fn with_session_id(mut self, id: u64) -> Self {
        self.next_session_id = id;
        self
    }

    /// Current state of the most recent transaction
    pub fn state(&self) -> Phase {
        self.state
    }

    /// Session id of the most recent transaction
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (T, S) {
        (self.card.into_transport(), self.sink)
    }

    /// Run one transaction from directory selection to classification
    ///
    /// The sink receives the command log after every phase and the session
    /// summary plus flattened tags once the transaction ends, also when it
    /// fails.
    pub fn run(&mut self) -> Result<TransactionRecord, TransactionFailure> {
        self.session_id = self.next_session_id;
        self.next_session_id += 1;

        let record = TransactionRecord::new(self.session_id, self.config.interface);
        let mut ctx = WorkflowContext::new(record);
        self.state = ctx.phase;
        info!(
            session = self.session_id,
            interface = %self.config.interface,
            "Starting transaction"
        );

        while !ctx.phase.is_terminal() {
            let phase = ctx.phase;
            let result = self.step(&mut ctx);
            self.flush_log(self.session_id);

            match result {
                Ok(next) => {
                    info!(session = self.session_id, from = %phase, to = %next, "Phase complete");
                    ctx.phase = next;
                    self.state = next;
                }
                Err(error) => {
                    let status_word = error.status_word().or(self.card.last_status_word());
                    warn!(
                        session = self.session_id,
                        %phase,
                        sw = ?status_word,
                        error = %error,
                        "Transaction failed"
                    );
                    self.state = Phase::Failed;
                    let outcome = SessionOutcome::Failed {
                        phase,
                        status_word,
                        reason: error.to_string(),
                    };
                    let record = self.finish(ctx.record, outcome);
                    return Err(TransactionFailure {
                        phase,
                        status_word,
                        error,
                        record: Box::new(record),
                    });
                }
            }
        }

        Ok(self.finish(ctx.record, SessionOutcome::Complete))
    }

    /// Execute a single phase and return the phase that follows it
    pub fn step(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        match ctx.phase {
            Phase::DirectorySelect => self.select_directory(ctx),
            Phase::DirectoryRead => self.read_directory(ctx),
            Phase::DirectAidFallback => self.select_fallback(ctx),
            Phase::AidSelect => self.select_candidate(ctx),
            Phase::ProcessingOptions => self.get_processing_options(ctx),
            Phase::RecordRead => self.read_records(ctx),
            Phase::Classify => self.classify(ctx),
            phase => Ok(phase),
        }
    }

    fn select_directory(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let phase = Phase::DirectorySelect;
        let name = self.config.interface.directory_name();
        let response = self.card.exchange(phase, &commands::select(name))?;

        match response.status() {
            StatusClass::Success => {}
            StatusClass::NotFound => {
                info!(directory = %String::from_utf8_lossy(name), "Directory not present");
                return Ok(Phase::DirectAidFallback);
            }
            _ => {
                return Err(EmvError::Protocol {
                    phase,
                    sw: response.status_word(),
                })
            }
        }

        // A damaged directory FCI is not fatal; use what decoded
        let decoded = decode(&response.data);
        if let Some(error) = &decoded.error {
            warn!(%phase, %error, "Directory FCI is malformed");
        }
        ctx.directory_sfi = find_tag(&decoded.tags, tags::SHORT_FILE_IDENTIFIER)
            .and_then(Tag::bytes)
            .and_then(|b| b.first().copied())
            .map(|sfi| sfi & 0x1F);
        ctx.add_candidates(collect_candidates(&decoded.tags));
        ctx.record.tags.extend(decoded.tags);

        Ok(Phase::DirectoryRead)
    }

    fn read_directory(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let phase = Phase::DirectoryRead;

        if let Some(sfi) = ctx.directory_sfi {
            for number in 1..=self.config.max_directory_records {
                let response = self.card.exchange(phase, &commands::read_record(number, sfi))?;
                match response.status() {
                    StatusClass::Success => {}
                    StatusClass::NotFound => break,
                    _ => {
                        return Err(EmvError::Protocol {
                            phase,
                            sw: response.status_word(),
                        })
                    }
                }

                let decoded = decode(&response.data);
                if let Some(error) = &decoded.error {
                    warn!(%phase, sfi, record = number, %error, "Directory record is malformed");
                }
                ctx.add_candidates(collect_candidates(&decoded.tags));
                ctx.record.tags.extend(decoded.tags);
                ctx.record.directory_records.push(response.data);
            }
        }

        if ctx.record.candidates.is_empty() {
            warn!("Directory lists no applications");
            Ok(Phase::DirectAidFallback)
        } else {
            debug!(count = ctx.record.candidates.len(), "Applications found");
            Ok(Phase::AidSelect)
        }
    }

    fn select_fallback(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let known: Vec<(String, Vec<u8>)> = self
            .config
            .fallback_aids
            .iter()
            .map(|k| (k.name.clone(), k.aid.clone()))
            .collect();

        for (name, aid) in known {
            debug!(brand = %name, "Trying known AID");
            if self.select_application(ctx, Phase::DirectAidFallback, &aid)? {
                info!(brand = %name, aid = %hex::encode_upper(&aid), "Selected application");
                return Ok(Phase::ProcessingOptions);
            }
        }
        Err(EmvError::ExhaustedCandidates)
    }

    fn select_candidate(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let ordered: Vec<Vec<u8>> = order_by_priority(&ctx.record.candidates)
            .into_iter()
            .map(|c| c.aid.clone())
            .collect();

        for aid in ordered {
            if self.select_application(ctx, Phase::AidSelect, &aid)? {
                info!(aid = %hex::encode_upper(&aid), "Selected application");
                return Ok(Phase::ProcessingOptions);
            }
        }
        Err(EmvError::ExhaustedCandidates)
    }

    /// SELECT an application; `false` if the card refused it
    fn select_application(
        &mut self,
        ctx: &mut WorkflowContext,
        phase: Phase,
        aid: &[u8],
    ) -> Result<bool, EmvError> {
        let response = self.card.exchange(phase, &commands::select(aid))?;
        if !response.is_success() {
            debug!(
                aid = %hex::encode_upper(aid),
                sw = %response.status_string(),
                "Application not selected"
            );
            return Ok(false);
        }

        let fci = decode(&response.data)
            .into_result()
            .map_err(|source| EmvError::Decode { phase, source })?;
        ctx.application_fci = fci.clone();
        ctx.record.tags.extend(fci);
        ctx.record.selected_aid = Some(aid.to_vec());
        ctx.record.select_response = Some(response.data);
        Ok(true)
    }

    fn get_processing_options(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let phase = Phase::ProcessingOptions;
        let pdol_data = match find_tag(&ctx.application_fci, tags::PDOL).and_then(Tag::bytes) {
            Some(pdol) => self
                .config
                .terminal
                .build(pdol)
                .map_err(|source| EmvError::Decode { phase, source })?,
            None => Vec::new(),
        };

        let response = self
            .card
            .exchange(phase, &commands::get_processing_options(&pdol_data))?;
        if !response.is_success() {
            return Err(EmvError::Protocol {
                phase,
                sw: response.status_word(),
            });
        }

        let gpo = ProcessingOptions::parse(&response.data)?;
        debug!(
            aip = %hex::encode_upper(gpo.aip),
            afl_entries = gpo.afl.len(),
            "Processing options"
        );
        ctx.record.aip = Some(gpo.aip);
        ctx.record.afl = gpo.afl;
        ctx.record.tags.extend(gpo.tags);
        ctx.record.gpo_response = Some(response.data);

        Ok(Phase::RecordRead)
    }

    fn read_records(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let phase = Phase::RecordRead;
        let afl = ctx.record.afl.clone();

        'entries: for entry in afl {
            for number in entry.records() {
                let response = self
                    .card
                    .exchange(phase, &commands::read_record(number, entry.sfi))?;

                match response.status_word() {
                    sw::SUCCESS => {}
                    sw::RECORD_NOT_FOUND => {
                        debug!(
                            sfi = entry.sfi,
                            record = number,
                            "Record not found, next AFL entry"
                        );
                        continue 'entries;
                    }
                    sw::FILE_NOT_FOUND => {
                        warn!(
                            sfi = entry.sfi,
                            record = number,
                            "File not found, stopping record read"
                        );
                        ctx.record.record_issues.push(RecordIssue::FileNotFound {
                            sfi: entry.sfi,
                            record: number,
                        });
                        break 'entries;
                    }
                    status => return Err(EmvError::Protocol { phase, sw: status }),
                }

                match decode(&response.data).into_result() {
                    Ok(decoded) => ctx.record.tags.extend(decoded),
                    Err(error) => {
                        warn!(
                            sfi = entry.sfi,
                            record = number,
                            %error,
                            "Skipping malformed record"
                        );
                        ctx.record.record_issues.push(RecordIssue::Malformed {
                            sfi: entry.sfi,
                            record: number,
                            error,
                        });
                    }
                }
                ctx.record.records.insert((entry.sfi, number), response.data);
            }
        }

        Ok(Phase::Classify)
    }

    fn classify(&mut self, ctx: &mut WorkflowContext) -> Result<Phase, EmvError> {
        let phase = Phase::Classify;
        let aid = ctx
            .record
            .selected_aid
            .as_deref()
            .ok_or(EmvError::MissingData {
                phase,
                what: "selected AID",
            })?;
        let aip = ctx.record.aip.ok_or(EmvError::MissingData {
            phase,
            what: "application interchange profile",
        })?;

        let classification = classify(aid, aip, ctx.record.interface);
        info!(
            brand = %classification.brand,
            mode = %classification.mode,
            offline_auth = ?classification.offline_auth,
            "Card classified"
        );
        ctx.record.classification = Some(classification);
        Ok(Phase::Complete)
    }

    /// Request an application cryptogram using the record's CDOL1
    pub fn generate_ac(
        &mut self,
        record: &TransactionRecord,
        cryptogram_type: CryptogramType,
        request_cda: bool,
    ) -> Result<GenerateAcResponse, EmvError> {
        let phase = Phase::GenerateAc;
        let cdol = record.value(tags::CDOL1).ok_or(EmvError::MissingData {
            phase,
            what: "CDOL1",
        })?;
        let cdol_data = self
            .config
            .terminal
            .build(cdol)
            .map_err(|source| EmvError::Decode { phase, source })?;

        let result = self.card.generate_ac(&GenerateAcRequest {
            cryptogram_type,
            cdol_data,
            request_cda,
        });
        self.flush_log(record.session_id);
        result
    }

    /// INTERNAL AUTHENTICATE with the record's DDOL, or `9F37 04` if absent
    ///
    /// `challenge` replaces the terminal unpredictable number.
    pub fn internal_authenticate(
        &mut self,
        record: &TransactionRecord,
        challenge: Option<Vec<u8>>,
    ) -> Result<DynamicAuthResponse, EmvError> {
        let ddol = record.value(tags::DDOL).unwrap_or(DEFAULT_DDOL);
        let terminal = match challenge {
            Some(number) => self.config.terminal.clone().set_unpredictable_number(number),
            None => self.config.terminal.clone(),
        };
        let ddol_data = terminal.build(ddol).map_err(|source| EmvError::Decode {
            phase: Phase::InternalAuthenticate,
            source,
        })?;

        let result = self.card.internal_authenticate(&ddol_data);
        self.flush_log(record.session_id);
        result
    }

    pub fn get_challenge(&mut self) -> Result<Vec<u8>, EmvError> {
        let result = self.card.get_challenge();
        self.flush_log(self.session_id);
        result
    }

    pub fn verify_pin(&mut self, pin: &str) -> Result<PinVerification, EmvError> {
        let result = self.card.verify_pin(pin);
        self.flush_log(self.session_id);
        result
    }

    pub fn get_data(&mut self, tag: TagId) -> Result<Option<Vec<u8>>, EmvError> {
        let result = self.card.get_data(tag);
        self.flush_log(self.session_id);
        result
    }

    fn flush_log(&mut self, session_id: u64) {
        for entry in self.card.take_log() {
            self.sink.record_command_log(session_id, &entry);
        }
    }

    fn finish(
        &mut self,
        mut record: TransactionRecord,
        outcome: SessionOutcome,
    ) -> TransactionRecord {
        let finished_at = Utc::now();
        record.finished_at = Some(finished_at);

        let metadata = SessionMetadata {
            session_id: record.session_id,
            interface: record.interface,
            started_at: record.started_at,
            finished_at,
            aid: record.selected_aid.clone(),
            classification: record.classification,
            records_read: record.records.len(),
            outcome,
        };
        self.sink.record_session(&metadata);
        self.sink.record_tags(&flatten_tags(&record));
        record
    }
}

/// AIP and AFL extracted from a GET PROCESSING OPTIONS response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub aip: [u8; 2],
    pub afl: Vec<AflEntry>,
    pub tags: Vec<Tag>,
}

impl ProcessingOptions {
    /// Parse format 1 (tag 80: AIP then AFL) or format 2 (tag 77 with 82/94)
    pub fn parse(data: &[u8]) -> Result<Self, EmvError> {
        let phase = Phase::ProcessingOptions;
        let decoded = decode(data)
            .into_result()
            .map_err(|source| EmvError::Decode { phase, source })?;

        let missing_aip = EmvError::MissingData {
            phase,
            what: "application interchange profile",
        };
        let (aip, afl) = match find_tag(&decoded, tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1)
            .and_then(Tag::bytes)
        {
            Some(format1) => {
                if format1.len() < 2 {
                    return Err(missing_aip);
                }
                ([format1[0], format1[1]], &format1[2..])
            }
            None => {
                let aip = find_tag(&decoded, tags::AIP)
                    .and_then(Tag::bytes)
                    .and_then(|b| <[u8; 2]>::try_from(b).ok())
                    .ok_or(missing_aip)?;
                let afl = find_tag(&decoded, tags::AFL)
                    .and_then(Tag::bytes)
                    .unwrap_or_default();
                (aip, afl)
            }
        };

        Ok(Self {
            aip,
            afl: AflEntry::parse_list(afl),
            tags: decoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Interface;

    #[test]
    fn test_processing_options_format_1() {
        let gpo = ProcessingOptions::parse(&[
            0x80, 0x0A, 0x19, 0x80, 0x08, 0x01, 0x01, 0x00, 0x10, 0x01, 0x02, 0x00,
        ])
        .unwrap();
        assert_eq!(gpo.aip, [0x19, 0x80]);
        assert_eq!(gpo.afl.len(), 2);
        assert_eq!(gpo.afl[1].sfi, 2);
    }

    #[test]
    fn test_processing_options_format_2() {
        let gpo = ProcessingOptions::parse(&[
            0x77, 0x0A, 0x82, 0x02, 0x20, 0x00, 0x94, 0x04, 0x18, 0x01, 0x01, 0x00,
        ])
        .unwrap();
        assert_eq!(gpo.aip, [0x20, 0x00]);
        assert_eq!(gpo.afl[0].sfi, 3);
    }

    #[test]
    fn test_processing_options_without_aip() {
        let err = ProcessingOptions::parse(&[0x77, 0x06, 0x94, 0x04, 0x08, 0x01, 0x01, 0x00])
            .unwrap_err();
        assert!(matches!(err, EmvError::MissingData { phase: Phase::ProcessingOptions, .. }));
    }

    #[test]
    fn test_processing_options_malformed() {
        let err = ProcessingOptions::parse(&[0x77, 0x10, 0x82]).unwrap_err();
        assert!(matches!(err, EmvError::Decode { phase: Phase::ProcessingOptions, .. }));
    }

    #[test]
    fn test_context_deduplicates_candidates() {
        let candidate = |aid: u8| AidCandidate {
            aid: vec![0xA0, aid],
            priority: None,
            label: None,
            preferred_name: None,
        };
        let mut ctx = WorkflowContext::new(TransactionRecord::new(1, Interface::Contact));
        ctx.add_candidates(vec![candidate(1), candidate(2)]);
        ctx.add_candidates(vec![candidate(2), candidate(3)]);
        assert_eq!(ctx.record.candidates.len(), 3);
        assert_eq!(ctx.phase, Phase::DirectorySelect);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Complete.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Classify.is_terminal());
        assert_eq!(Phase::ProcessingOptions.to_string(), "ProcessingOptions");
    }
}
