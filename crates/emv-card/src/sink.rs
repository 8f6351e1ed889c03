//! Persistence capability consumed by the engine
//!
//! The engine hands finished data to a [`PersistenceSink`]: each command
//! round trip as its phase completes, then the session summary and every
//! decoded tag once the transaction reaches `Complete` or `Failed`. Sinks
//! own their storage errors; the engine does not wait on or inspect them.

use chrono::{DateTime, Utc};
use emv_common::{get_tag_name, TagId};
use serde::Serialize;

use crate::classify::Classification;
use crate::config::Interface;
use crate::record::TransactionRecord;
use crate::workflow::Phase;

/// One physical command/response round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLogEntry {
    pub phase: Phase,
    #[serde(with = "hex::serde")]
    pub command: Vec<u8>,
    /// Raw response including the status word; empty if the transport failed
    #[serde(with = "hex::serde")]
    pub response: Vec<u8>,
    pub status_word: Option<u16>,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Complete,
    Failed {
        phase: Phase,
        status_word: Option<u16>,
        reason: String,
    },
}

/// Summary of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    pub session_id: u64,
    pub interface: Interface,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "hex_option")]
    pub aid: Option<Vec<u8>>,
    pub classification: Option<Classification>,
    pub records_read: usize,
    pub outcome: SessionOutcome,
}

/// A decoded tag flattened out of its tree, tied to its session and AID
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatTag {
    pub session_id: u64,
    #[serde(with = "hex_option")]
    pub aid: Option<Vec<u8>>,
    pub tag: TagId,
    pub name: &'static str,
    /// Nesting depth, 0 for top-level tags
    pub depth: usize,
    pub constructed: bool,
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
}

/// Flatten every tag tree of a record in pre-order
pub fn flatten_tags(record: &TransactionRecord) -> Vec<FlatTag> {
    record
        .tags
        .iter()
        .flat_map(|tree| tree.flatten())
        .map(|(depth, tag)| FlatTag {
            session_id: record.session_id,
            aid: record.selected_aid.clone(),
            tag: tag.id(),
            name: get_tag_name(tag.id()),
            depth,
            constructed: tag.is_constructed(),
            value: tag.value_bytes(),
        })
        .collect()
}

/// Destination for transaction data
pub trait PersistenceSink {
    fn record_session(&mut self, metadata: &SessionMetadata);

    fn record_command_log(&mut self, session_id: u64, entry: &CommandLogEntry);

    fn record_tags(&mut self, tags: &[FlatTag]);
}

impl<S: PersistenceSink + ?Sized> PersistenceSink for &mut S {
    fn record_session(&mut self, metadata: &SessionMetadata) {
        (**self).record_session(metadata)
    }

    fn record_command_log(&mut self, session_id: u64, entry: &CommandLogEntry) {
        (**self).record_command_log(session_id, entry)
    }

    fn record_tags(&mut self, tags: &[FlatTag]) {
        (**self).record_tags(tags)
    }
}

/// Sink that keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub sessions: Vec<SessionMetadata>,
    pub command_log: Vec<(u64, CommandLogEntry)>,
    pub tags: Vec<FlatTag>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command log entries of one session, in transmission order
    pub fn commands_for(&self, session_id: u64) -> impl Iterator<Item = &CommandLogEntry> {
        self.command_log
            .iter()
            .filter(move |(id, _)| *id == session_id)
            .map(|(_, entry)| entry)
    }
}

impl PersistenceSink for MemorySink {
    fn record_session(&mut self, metadata: &SessionMetadata) {
        self.sessions.push(metadata.clone());
    }

    fn record_command_log(&mut self, session_id: u64, entry: &CommandLogEntry) {
        self.command_log.push((session_id, entry.clone()));
    }

    fn record_tags(&mut self, tags: &[FlatTag]) {
        self.tags.extend_from_slice(tags);
    }
}

mod hex_option {
    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use emv_common::decode;

    use super::*;

    #[test]
    fn test_flatten_tags() {
        let mut record = TransactionRecord::new(7, Interface::Contactless);
        record.selected_aid = Some(vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10]);
        record.tags = decode(&[0x70, 0x07, 0x5A, 0x05, 0x11, 0x22, 0x33, 0x44, 0x55])
            .into_result()
            .unwrap();

        let flat = flatten_tags(&record);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].tag, TagId::new(0x70));
        assert!(flat[0].constructed);
        assert_eq!(flat[0].value, vec![0x5A, 0x05, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(flat[1].name, "Application PAN");
        assert_eq!(flat[1].depth, 1);
        assert_eq!(flat[1].session_id, 7);
        assert_eq!(flat[1].aid, record.selected_aid);
    }

    #[test]
    fn test_memory_sink_filters_by_session() {
        let mut sink = MemorySink::new();
        let entry = CommandLogEntry {
            phase: Phase::DirectorySelect,
            command: vec![0x00, 0xA4],
            response: vec![0x90, 0x00],
            status_word: Some(0x9000),
        };
        sink.record_command_log(1, &entry);
        sink.record_command_log(2, &entry);
        sink.record_command_log(1, &entry);
        assert_eq!(sink.commands_for(1).count(), 2);
        assert_eq!(sink.commands_for(3).count(), 0);
    }
}
