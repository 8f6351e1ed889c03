//! Data accumulated over one transaction

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use emv_common::{find_tag, tags, DecodeError, Tag, TagId};
use serde::Serialize;
use tracing::warn;

use crate::classify::Classification;
use crate::config::Interface;

/// An application discovered through the PSE/PPSE directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AidCandidate {
    #[serde(with = "hex::serde")]
    pub aid: Vec<u8>,
    /// Raw Application Priority Indicator (tag 87)
    pub priority: Option<u8>,
    pub label: Option<String>,
    pub preferred_name: Option<String>,
}

impl AidCandidate {
    /// Sort key: priority 1 is highest, 15 lowest; "no priority" (0 or
    /// absent) sorts after every assigned priority
    pub fn rank(&self) -> u8 {
        match self.priority.map(|p| p & 0x0F) {
            Some(n) if n > 0 => n,
            _ => 0x10,
        }
    }

    /// Bit 8 of the priority indicator: cardholder confirmation required
    pub fn requires_confirmation(&self) -> bool {
        self.priority.is_some_and(|p| p & 0x80 != 0)
    }

    fn from_siblings(aid: &Tag, siblings: &[Tag]) -> Self {
        let text = |id: TagId| {
            siblings
                .iter()
                .find(|t| t.id() == id)
                .and_then(Tag::bytes)
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
        };
        Self {
            aid: aid.bytes().unwrap_or_default().to_vec(),
            priority: siblings
                .iter()
                .find(|t| t.id() == tags::APPLICATION_PRIORITY_INDICATOR)
                .and_then(Tag::bytes)
                .and_then(|b| b.first().copied()),
            label: text(tags::APPLICATION_LABEL),
            preferred_name: text(tags::APPLICATION_PREFERRED_NAME),
        }
    }
}

/// Collect every AID (tag 4F) in a set of tag trees, at any depth
///
/// Priority, label and preferred name come from the template holding the
/// AID. Candidates are returned in discovery order, duplicates dropped.
pub fn collect_candidates(tags: &[Tag]) -> Vec<AidCandidate> {
    let mut out = Vec::new();
    collect_level(tags, &mut out);
    out
}

fn collect_level(level: &[Tag], out: &mut Vec<AidCandidate>) {
    for tag in level {
        if tag.id() == tags::APPLICATION_IDENTIFIER && !tag.is_constructed() {
            let candidate = AidCandidate::from_siblings(tag, level);
            if !candidate.aid.is_empty() && !out.iter().any(|c| c.aid == candidate.aid) {
                out.push(candidate);
            }
        }
    }
    for tag in level {
        collect_level(tag.children(), out);
    }
}

/// Candidates ordered by priority, ties kept in discovery order
pub fn order_by_priority(candidates: &[AidCandidate]) -> Vec<&AidCandidate> {
    let mut ordered: Vec<&AidCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.rank());
    ordered
}

/// One 4-byte Application File Locator entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AflEntry {
    pub sfi: u8,
    pub first_record: u8,
    pub last_record: u8,
    /// Number of records involved in offline data authentication
    pub offline_auth_records: u8,
}

impl AflEntry {
    /// Parse an AFL into its entries
    ///
    /// Entries with an invalid SFI or record range and a trailing partial
    /// entry are dropped.
    pub fn parse_list(afl: &[u8]) -> Vec<AflEntry> {
        let chunks = afl.chunks_exact(4);
        if !chunks.remainder().is_empty() {
            warn!(len = afl.len(), "AFL length is not a multiple of 4");
        }

        chunks
            .filter_map(|chunk| {
                let entry = AflEntry {
                    sfi: chunk[0] >> 3,
                    first_record: chunk[1],
                    last_record: chunk[2],
                    offline_auth_records: chunk[3],
                };
                if entry.is_valid() {
                    Some(entry)
                } else {
                    warn!(entry = %hex::encode_upper(chunk), "Skipping invalid AFL entry");
                    None
                }
            })
            .collect()
    }

    pub fn records(&self) -> RangeInclusive<u8> {
        self.first_record..=self.last_record
    }

    fn is_valid(&self) -> bool {
        (1..=30).contains(&self.sfi)
            && self.first_record >= 1
            && self.last_record >= self.first_record
    }
}

/// The `(sfi, record)` read order described by an AFL
pub fn read_sequence(afl: &[AflEntry]) -> Vec<(u8, u8)> {
    afl.iter()
        .flat_map(|entry| entry.records().map(move |record| (entry.sfi, record)))
        .collect()
}

/// A record that could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIssue {
    /// Record read fine but its contents are not valid BER-TLV
    Malformed {
        sfi: u8,
        record: u8,
        error: DecodeError,
    },
    /// The card reported 6A82 and record reading stopped here
    FileNotFound { sfi: u8, record: u8 },
}

/// Everything learned about the card during one transaction
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub session_id: u64,
    pub interface: Interface,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Applications listed by the directory, in discovery order
    pub candidates: Vec<AidCandidate>,
    /// Raw directory records
    pub directory_records: Vec<Vec<u8>>,
    pub selected_aid: Option<Vec<u8>>,
    /// FCI returned when the application was selected
    pub select_response: Option<Vec<u8>>,
    pub gpo_response: Option<Vec<u8>>,
    pub aip: Option<[u8; 2]>,
    pub afl: Vec<AflEntry>,
    /// Raw application records keyed by `(sfi, record number)`
    pub records: BTreeMap<(u8, u8), Vec<u8>>,
    /// Every tag tree decoded from any response
    pub tags: Vec<Tag>,
    pub record_issues: Vec<RecordIssue>,
    pub classification: Option<Classification>,
}

impl TransactionRecord {
    pub fn new(session_id: u64, interface: Interface) -> Self {
        Self {
            session_id,
            interface,
            started_at: Utc::now(),
            finished_at: None,
            candidates: Vec::new(),
            directory_records: Vec::new(),
            selected_aid: None,
            select_response: None,
            gpo_response: None,
            aip: None,
            afl: Vec::new(),
            records: BTreeMap::new(),
            tags: Vec::new(),
            record_issues: Vec::new(),
            classification: None,
        }
    }

    /// First occurrence of a tag in any decoded response
    pub fn find(&self, id: TagId) -> Option<&Tag> {
        find_tag(&self.tags, id)
    }

    /// Value of the first primitive occurrence of a tag
    pub fn value(&self, id: TagId) -> Option<&[u8]> {
        self.find(id).and_then(Tag::bytes)
    }
}
