pub mod authenticate;
pub mod decode;
pub mod generate_ac;
pub mod get_challenge;
pub mod read;
pub mod verify_pin;

use emv_card::sink::CommandLogEntry;
use emv_card::{
    CardReader, DolBuilder, EngineConfig, Interface, MemorySink, PcscTransport,
    TransactionEngine, TransactionRecord,
};
use emv_common::{get_tag_name, Tag, TagValue};
use tracing::info;

use crate::formatters::{self, FormatMode};

pub(crate) type Engine = TransactionEngine<PcscTransport, MemorySink>;

/// Options shared by every card command
pub(crate) struct Options {
    pub format: FormatMode,
    pub reader: Option<String>,
    pub interface: Interface,
    pub max_records: u8,
    pub amount: u64,
    pub currency: u16,
    pub country: u16,
}

impl Options {
    pub fn engine_config(&self) -> EngineConfig {
        let terminal = DolBuilder::new()
            .with_defaults()
            .set_amount(self.amount)
            .set_currency(self.currency)
            .set_terminal_country(self.country);

        EngineConfig {
            max_directory_records: self.max_records,
            terminal,
            ..EngineConfig::new(self.interface)
        }
    }
}

/// Connect to the requested reader, or the first one found
pub(crate) fn connect(reader_name: Option<&str>) -> Option<PcscTransport> {
    let reader = match CardReader::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to connect to card reader: {}", e);
            return None;
        }
    };

    let connected = match reader_name {
        Some(name) => reader.connect(name).map(|card| (card, name.to_string())),
        None => reader.connect_first(),
    };

    match connected {
        Ok((card, name)) => {
            info!(reader = %name, "Card connected");
            eprintln!("Connected to reader: {}", name);
            Some(card)
        }
        Err(e) => {
            eprintln!("Failed to connect to card: {}", e);
            eprintln!("Please ensure a card is present on the reader");
            None
        }
    }
}

/// Connect and run the transaction workflow
///
/// Failures are reported here; the engine is returned only on success.
pub(crate) fn run_transaction(options: &Options) -> Option<(Engine, TransactionRecord)> {
    let card = connect(options.reader.as_deref())?;
    let mut engine = TransactionEngine::new(card, MemorySink::new(), options.engine_config());

    println!("\n=== Running {} Transaction ===\n", options.interface);
    match engine.run() {
        Ok(record) => {
            if let Some(aid) = &record.selected_aid {
                println!("Selected AID: {}", hex::encode_upper(aid));
            }
            if let Some(classification) = &record.classification {
                println!("Card: {} / {}", classification.brand, classification.mode);
            }
            Some((engine, record))
        }
        Err(failure) => {
            report_failure(&failure);
            None
        }
    }
}

pub(crate) fn report_failure(failure: &emv_card::TransactionFailure) {
    eprintln!("Transaction failed during {}: {}", failure.phase, failure.error);
    if let Some(sw) = failure.status_word {
        eprintln!(
            "Last status word: {:04X} ({})",
            sw,
            emv_card::apdu::describe_status(sw)
        );
    }
}

/// Print a tag tree, one line per tag, children indented
pub(crate) fn display_tags(tags: &[Tag], mode: FormatMode) {
    for tag in tags {
        display_tag(tag, 1, mode);
    }
}

fn display_tag(tag: &Tag, depth: usize, mode: FormatMode) {
    let indent = "  ".repeat(depth);
    match tag.value() {
        TagValue::Constructed(children) => {
            println!("{}[{}] {}", indent, tag.id(), get_tag_name(tag.id()));
            for child in children {
                display_tag(child, depth + 1, mode);
            }
        }
        TagValue::Primitive(value) => {
            println!(
                "{}[{}] {}: {}",
                indent,
                tag.id(),
                get_tag_name(tag.id()),
                formatters::format_value(tag.id(), value, mode)
            );
        }
    }
}

pub(crate) fn display_command_log(entries: &[&CommandLogEntry]) {
    for entry in entries {
        let status = entry
            .status_word
            .map_or_else(|| "----".to_string(), |sw| format!("{:04X}", sw));
        println!(
            "  {:<20} {} C: {}",
            entry.phase.to_string(),
            status,
            hex::encode_upper(&entry.command)
        );
        if !entry.response.is_empty() {
            println!("  {:<20}      R: {}", "", hex::encode_upper(&entry.response));
        }
    }
}
