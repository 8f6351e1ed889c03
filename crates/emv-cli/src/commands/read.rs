use std::process::ExitCode;

use emv_card::record::RecordIssue;
use emv_card::sink::CommandLogEntry;
use emv_card::{MemorySink, TransactionEngine, TransactionRecord};
use emv_common::{decode, tags};
use serde_json::json;

use super::{connect, display_command_log, display_tags, report_failure, Options};
use crate::formatters::{self, FormatMode};

pub fn cmd_read(options: &Options) -> ExitCode {
    let Some(card) = connect(options.reader.as_deref()) else {
        return ExitCode::FAILURE;
    };

    let mut engine = TransactionEngine::new(card, MemorySink::new(), options.engine_config());
    let result = engine.run();
    let (_, sink) = engine.into_parts();

    let record = match &result {
        Ok(record) => record,
        Err(failure) => &*failure.record,
    };

    match options.format {
        FormatMode::Json => print_json(record, &sink),
        mode => print_report(record, &sink, mode),
    }

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(failure) => {
            report_failure(&failure);
            ExitCode::FAILURE
        }
    }
}

fn print_json(record: &TransactionRecord, sink: &MemorySink) {
    let records: Vec<_> = record
        .records
        .iter()
        .map(|((sfi, number), data)| {
            json!({ "sfi": sfi, "record": number, "data": hex::encode_upper(data) })
        })
        .collect();
    let commands: Vec<&CommandLogEntry> = sink.commands_for(record.session_id).collect();

    let report = json!({
        "session": sink.sessions.last(),
        "candidates": record.candidates,
        "afl": record.afl,
        "records": records,
        "tags": sink.tags,
        "commands": commands,
    });

    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to serialize report: {}", e),
    }
}

fn print_report(record: &TransactionRecord, sink: &MemorySink, mode: FormatMode) {
    println!("\n=== Applications ===\n");
    if record.candidates.is_empty() {
        println!("No applications found via PSE/PPSE");
    }
    for (i, app) in record.candidates.iter().enumerate() {
        println!("Application {}:", i + 1);
        println!("  AID: {}", hex::encode_upper(&app.aid));
        if let Some(ref label) = app.label {
            println!("  Label: {}", label);
        }
        if let Some(ref pref_name) = app.preferred_name {
            println!("  Preferred Name: {}", pref_name);
        }
        if let Some(priority) = app.priority {
            println!("  Priority: {} (lower = higher priority)", priority & 0x0F);
        }
    }

    if let Some(ref select_response) = record.select_response {
        println!("\n=== SELECT Response ===\n");
        if mode == FormatMode::Raw {
            println!("Raw SELECT response ({} bytes):", select_response.len());
            println!("{}", hex::encode_upper(select_response));
        } else {
            display_tags(&decode(select_response).tags, mode);
        }
    }

    if let Some(aip) = record.aip {
        println!("\n=== GET PROCESSING OPTIONS Response ===\n");
        println!("  AIP: {}", formatters::format_value(tags::AIP, &aip, mode));
        for entry in &record.afl {
            println!(
                "  AFL: SFI {} records {}-{} ({} for offline authentication)",
                entry.sfi, entry.first_record, entry.last_record, entry.offline_auth_records
            );
        }
    }

    println!("\n=== Records ===\n");
    for ((sfi, number), data) in &record.records {
        println!("SFI {} Record {} ({} bytes):", sfi, number, data.len());
        if mode == FormatMode::Raw {
            println!("  {}", hex::encode_upper(data));
        } else {
            display_tags(&decode(data).tags, mode);
        }
    }
    for issue in &record.record_issues {
        match issue {
            RecordIssue::Malformed { sfi, record, error } => {
                println!("SFI {} Record {}: malformed ({})", sfi, record, error)
            }
            RecordIssue::FileNotFound { sfi, record } => {
                println!("SFI {} Record {}: file not found, reading stopped", sfi, record)
            }
        }
    }

    if let Some(classification) = record.classification {
        println!("\n=== Classification ===\n");
        println!("  Brand: {}", classification.brand);
        println!("  Mode: {}", classification.mode);
        println!("  Offline Authentication: {:?}", classification.offline_auth);
    }

    println!("\n=== Command Log ===\n");
    let entries: Vec<&CommandLogEntry> = sink.commands_for(record.session_id).collect();
    display_command_log(&entries);
}
