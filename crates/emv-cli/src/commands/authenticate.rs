use std::process::ExitCode;

use emv_card::{generate_random_bytes, OfflineAuth};
use emv_common::tags;

use super::{run_transaction, Options};

pub fn cmd_authenticate(options: &Options, challenge_hex: Option<String>) -> ExitCode {
    println!("EMV Dynamic Data Authentication (DDA)\n");

    let challenge = match challenge_hex {
        Some(hex_str) => match hex::decode(hex_str.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Invalid challenge hex: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => generate_random_bytes(4),
    };

    let Some((mut engine, record)) = run_transaction(options) else {
        return ExitCode::FAILURE;
    };

    let offline_auth = record.classification.map(|c| c.offline_auth);
    println!("Authentication Method: {:?}", offline_auth.unwrap_or(OfflineAuth::None));
    if !matches!(offline_auth, Some(OfflineAuth::Dda) | Some(OfflineAuth::Cda)) {
        println!("Card does not advertise DDA; INTERNAL AUTHENTICATE may be refused");
    }

    match record.value(tags::DDOL) {
        Some(ddol) => println!("DDOL: {}", hex::encode_upper(ddol)),
        None => println!("No DDOL on card, using default 9F3704"),
    }

    println!("\n=== Sending INTERNAL AUTHENTICATE ===\n");
    println!("Challenge: {}", hex::encode_upper(&challenge));

    match engine.internal_authenticate(&record, Some(challenge)) {
        Ok(response) => {
            match &response.signed_data {
                Some(sdad) => println!(
                    "Signed Dynamic Application Data ({} bytes): {}",
                    sdad.len(),
                    hex::encode_upper(sdad)
                ),
                None => println!("Response carries no signed data"),
            }
            println!(
                "\nRaw response ({} bytes): {}",
                response.raw_data.len(),
                hex::encode_upper(&response.raw_data)
            );
            println!("\nINTERNAL AUTHENTICATE completed (signature not verified)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("INTERNAL AUTHENTICATE failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
