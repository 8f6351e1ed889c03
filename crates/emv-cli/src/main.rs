use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use emv_card::{CryptogramType, Interface};
use tracing_subscriber::EnvFilter;

mod commands;
mod formatters;

use commands::Options;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "emv")]
#[command(about = "EMV card reader - run a transaction and inspect card data")]
#[command(version)]
struct Args {
    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human, global = true)]
    format: FormatMode,

    /// Reader name (defaults to the first reader found)
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Read over the contact interface (PSE) instead of contactless (PPSE)
    #[arg(long, global = true)]
    contact: bool,

    /// Highest directory record number to read
    #[arg(long, default_value_t = 16, global = true)]
    max_records: u8,

    /// Transaction amount in minor currency units
    #[arg(long, default_value_t = 100, global = true)]
    amount: u64,

    /// Transaction currency, ISO 4217 numeric
    #[arg(long, default_value_t = 840, global = true)]
    currency: u16,

    /// Terminal country, ISO 3166-1 numeric
    #[arg(long, default_value_t = 840, global = true)]
    country: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a transaction and print everything read from the card
    Read,

    /// Decode BER-TLV hex data without a card
    Decode {
        /// TLV data in hex (spaces allowed)
        data: String,
    },

    /// Request an application cryptogram (increments the ATC)
    GenerateAc {
        /// Cryptogram type to request
        #[arg(long, value_enum, default_value_t = CryptogramArg::Arqc)]
        cryptogram: CryptogramArg,

        /// Ask for a CDA signature
        #[arg(long)]
        cda: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Request a random number from the card
    GetChallenge,

    /// Run INTERNAL AUTHENTICATE (DDA)
    Authenticate {
        /// Challenge in hex (random if omitted)
        challenge: Option<String>,
    },

    /// Verify a plaintext offline PIN
    VerifyPin {
        /// PIN code (4 to 12 digits)
        pin: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CryptogramArg {
    /// Application Authentication Cryptogram (decline)
    Aac,
    /// Transaction Certificate (approve offline)
    Tc,
    /// Authorisation Request Cryptogram (go online)
    Arqc,
}

impl From<CryptogramArg> for CryptogramType {
    fn from(arg: CryptogramArg) -> Self {
        match arg {
            CryptogramArg::Aac => CryptogramType::Aac,
            CryptogramArg::Tc => CryptogramType::Tc,
            CryptogramArg::Arqc => CryptogramType::Arqc,
        }
    }
}

fn main() -> ExitCode {
    // Set RUST_LOG=debug to see every command and response
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = Options {
        format: args.format,
        reader: args.reader,
        interface: if args.contact {
            Interface::Contact
        } else {
            Interface::Contactless
        },
        max_records: args.max_records,
        amount: args.amount,
        currency: args.currency,
        country: args.country,
    };

    if options.format != FormatMode::Json {
        println!("EMV Card Reader - {} Mode\n", options.format.description());
    }

    match args.command {
        Command::Read => commands::read::cmd_read(&options),
        Command::Decode { data } => commands::decode::cmd_decode(&data, options.format),
        Command::GenerateAc {
            cryptogram,
            cda,
            yes,
        } => commands::generate_ac::cmd_generate_ac(&options, cryptogram.into(), cda, yes),
        Command::GetChallenge => commands::get_challenge::cmd_get_challenge(&options),
        Command::Authenticate { challenge } => {
            commands::authenticate::cmd_authenticate(&options, challenge)
        }
        Command::VerifyPin { pin } => commands::verify_pin::cmd_verify_pin(&options, &pin),
    }
}
