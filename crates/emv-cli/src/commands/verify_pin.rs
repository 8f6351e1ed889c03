use std::process::ExitCode;

use emv_card::PinVerification;
use emv_common::tags;

use super::{run_transaction, Options};

pub fn cmd_verify_pin(options: &Options, pin: &str) -> ExitCode {
    println!("EMV VERIFY - Plaintext Offline PIN\n");

    let Some((mut engine, _record)) = run_transaction(options) else {
        return ExitCode::FAILURE;
    };

    match engine.get_data(tags::PIN_TRY_COUNTER) {
        Ok(Some(counter)) => println!("PIN Try Counter: {}", hex::encode_upper(counter)),
        Ok(None) => println!("PIN Try Counter not available"),
        Err(e) => println!("GET DATA failed: {}", e),
    }

    println!("\n=== Sending VERIFY ===\n");

    match engine.verify_pin(pin) {
        Ok(PinVerification::Verified) => {
            println!("✓ PIN verified");
            ExitCode::SUCCESS
        }
        Ok(PinVerification::Rejected { tries_remaining }) => {
            println!("✗ Wrong PIN, {} tries remaining", tries_remaining);
            ExitCode::FAILURE
        }
        Ok(PinVerification::Blocked) => {
            println!("✗ PIN is blocked");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("VERIFY failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
