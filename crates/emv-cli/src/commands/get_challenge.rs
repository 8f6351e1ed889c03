use std::process::ExitCode;

use super::{run_transaction, Options};

pub fn cmd_get_challenge(options: &Options) -> ExitCode {
    println!("EMV GET CHALLENGE - Request Random Number\n");

    let Some((mut engine, _record)) = run_transaction(options) else {
        return ExitCode::FAILURE;
    };

    println!("\n=== Sending GET CHALLENGE ===\n");

    match engine.get_challenge() {
        Ok(random_bytes) => {
            println!(
                "Random bytes ({} bytes): {}",
                random_bytes.len(),
                hex::encode_upper(&random_bytes)
            );
            println!("\nGET CHALLENGE completed successfully!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("GET CHALLENGE failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
