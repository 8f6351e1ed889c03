use std::process::ExitCode;

use emv_common::decode;
use serde_json::json;

use super::display_tags;
use crate::formatters::FormatMode;

/// Decode BER-TLV given on the command line, without a card
pub fn cmd_decode(input: &str, mode: FormatMode) -> ExitCode {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let data = match hex::decode(&cleaned) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Invalid hex input: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let decoded = decode(&data);

    if mode == FormatMode::Json {
        let flat: Vec<_> = decoded
            .tags
            .iter()
            .flat_map(|tree| tree.flatten())
            .map(|(depth, tag)| {
                json!({
                    "tag": tag.id(),
                    "name": emv_common::get_tag_name(tag.id()),
                    "depth": depth,
                    "constructed": tag.is_constructed(),
                    "value": hex::encode_upper(tag.value_bytes()),
                })
            })
            .collect();
        let report = json!({
            "tags": flat,
            "consumed": decoded.consumed,
            "error": decoded.error.as_ref().map(ToString::to_string),
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to serialize tags: {}", e),
        }
    } else {
        display_tags(&decoded.tags, mode);
    }

    match decoded.error {
        Some(error) => {
            eprintln!(
                "Decoding stopped after {} of {} bytes: {}",
                decoded.consumed,
                data.len(),
                error
            );
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}
