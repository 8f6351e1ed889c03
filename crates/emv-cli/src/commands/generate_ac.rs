use std::io::BufRead;
use std::process::ExitCode;

use emv_card::CryptogramType;
use emv_common::tags;

use super::{run_transaction, Options};

pub fn cmd_generate_ac(
    options: &Options,
    cryptogram_type: CryptogramType,
    request_cda: bool,
    confirmed: bool,
) -> ExitCode {
    println!("EMV GENERATE AC - Application Cryptogram Generation\n");

    if !confirmed {
        println!("⚠️  WARNING ⚠️");
        println!("This command will INCREMENT the Application Transaction Counter (ATC) on your card!");
        println!("This is a permanent change that cannot be undone.");
        println!("Press Ctrl+C now to cancel, or press Enter to continue...\n");

        let mut input = String::new();
        if let Err(e) = std::io::stdin().lock().read_line(&mut input) {
            eprintln!("Failed to read confirmation: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let Some((mut engine, record)) = run_transaction(options) else {
        return ExitCode::FAILURE;
    };

    match record.value(tags::CDOL1) {
        Some(cdol) => println!("Found CDOL1 ({} bytes): {}", cdol.len(), hex::encode_upper(cdol)),
        None => {
            eprintln!("No CDOL1 found on card");
            eprintln!("Cannot proceed with GENERATE AC");
            return ExitCode::FAILURE;
        }
    }

    println!("\n=== Sending GENERATE AC ===\n");
    println!(
        "Cryptogram Type: {}{}",
        cryptogram_type,
        if request_cda { " with CDA signature" } else { "" }
    );

    let response = match engine.generate_ac(&record, cryptogram_type, request_cda) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("GENERATE AC error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("\n=== GENERATE AC Response ===\n");

    if let Some(cryptogram) = &response.cryptogram {
        println!("✓ Cryptogram (9F26): {}", hex::encode_upper(cryptogram));
    } else {
        println!("✗ Cryptogram: Not found");
    }

    if let Some(atc) = response.atc {
        println!("✓ Application Transaction Counter (9F36): {}", atc);
    } else {
        println!("✗ ATC: Not found");
    }

    if let Some(cid) = response.cid {
        println!("✓ Cryptogram Information Data (9F27): {:02X}", cid);
        match response.cryptogram_type() {
            Some(returned) => println!("  Cryptogram Type: {}", returned),
            None => println!("  Cryptogram Type: reserved"),
        }
    } else {
        println!("✗ CID: Not found");
    }

    if let Some(iad) = &response.iad {
        println!(
            "✓ Issuer Application Data (9F10): {} ({} bytes)",
            hex::encode_upper(iad),
            iad.len()
        );
    }

    if let Some(sdad) = &response.sdad {
        println!("✓ Signed Dynamic Application Data (9F4B): {} bytes", sdad.len());
    }

    println!(
        "\nRaw response ({} bytes): {}",
        response.raw_data.len(),
        hex::encode_upper(&response.raw_data)
    );

    println!("\n✓ GENERATE AC completed successfully!");
    ExitCode::SUCCESS
}
