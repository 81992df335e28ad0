//! `pcsc-reader`: list PC/SC readers, read ATRs, exchange APDUs and wait for card removal

use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use smartcard_pcsc_reader::{
    ChannelControl, DisconnectionMode, IsoProtocol, PcscPlugin, PcscReaderAdapter, PcscTerminal,
    ProtocolControl, ReaderConfig, RemovalOutcome, RemovalWaitControl, SharingMode,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Drive PC/SC readers through the reader adapter")]
struct Cli {
    /// Optional reader name to use (will auto-detect if not specified)
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Sharing mode used to open the physical channel (exclusive, shared)
    #[arg(long, global = true, default_value = "exclusive")]
    sharing: SharingMode,

    /// Disconnection mode used to close the physical channel (leave, reset, unpower, eject)
    #[arg(long, global = true, default_value = "leave")]
    disconnect: DisconnectionMode,

    /// Transmission protocol requested at connection (*, T0, T1, T=CL)
    #[arg(long, global = true, default_value = "*")]
    protocol: IsoProtocol,

    /// Debug level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available readers
    List,

    /// Open the physical channel and print the card ATR
    Atr,

    /// Send one APDU and print the response
    Transmit {
        /// Command APDU in hex
        apdu: String,
    },

    /// Show which logical protocols match the inserted card
    Protocols,

    /// Block until the card is removed
    WaitRemoval {
        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let plugin = PcscPlugin::new()?;

    if let Commands::List = cli.command {
        return list_readers(&plugin);
    }

    let reader_name = match &cli.reader {
        Some(name) => name.clone(),
        None => plugin.find_reader_with_card()?.name().to_string(),
    };
    info!("Using reader: {}", reader_name);

    let config = ReaderConfig::new()
        .with_sharing_mode(cli.sharing)
        .with_disconnection_mode(cli.disconnect)
        .with_iso_protocol(cli.protocol);
    let reader = plugin.open_reader_with_config(&reader_name, config)?;

    match cli.command {
        Commands::List => Ok(()),
        Commands::Atr => atr_command(&reader),
        Commands::Transmit { apdu } => transmit_command(&reader, &apdu),
        Commands::Protocols => protocols_command(&plugin, &reader),
        Commands::WaitRemoval { timeout_ms } => {
            wait_removal_command(&reader, timeout_ms.map(Duration::from_millis))
        }
    }
}

fn list_readers(plugin: &PcscPlugin) -> Result<(), Box<dyn std::error::Error>> {
    let readers = plugin.list_readers()?;

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let kind = match reader.is_contactless() {
            Some(true) => "contactless",
            Some(false) => "contact",
            None => "unknown type",
        };
        match reader.atr() {
            Some(atr) if reader.has_card() => println!(
                "{}. {} ({}, card present, ATR {})",
                i + 1,
                reader.name(),
                kind,
                hex::encode_upper(atr)
            ),
            _ if reader.has_card() => {
                println!("{}. {} ({}, card present)", i + 1, reader.name(), kind)
            }
            _ => println!("{}. {} ({}, no card)", i + 1, reader.name(), kind),
        }
    }

    Ok(())
}

fn atr_command(reader: &PcscReaderAdapter<PcscTerminal>) -> Result<(), Box<dyn std::error::Error>> {
    reader.open_physical_channel()?;
    let result = reader.power_on_data();
    reader.close_physical_channel()?;

    println!("{}", result?);
    Ok(())
}

fn transmit_command(
    reader: &PcscReaderAdapter<PcscTerminal>,
    apdu: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let command = hex::decode(apdu.trim().replace(' ', ""))?;

    reader.open_physical_channel()?;
    let result = reader.transmit_apdu(&command);
    reader.close_physical_channel()?;

    println!("{}", hex::encode_upper(result?));
    Ok(())
}

fn protocols_command(
    plugin: &PcscPlugin,
    reader: &PcscReaderAdapter<PcscTerminal>,
) -> Result<(), Box<dyn std::error::Error>> {
    let protocols: Vec<String> = plugin.config().protocols().map(str::to_string).collect();
    for protocol in protocols.iter().filter(|p| reader.is_protocol_supported(p)) {
        reader.activate_protocol(protocol)?;
    }

    reader.open_physical_channel()?;
    println!("ATR: {}", reader.power_on_data()?);
    for protocol in &protocols {
        let status = if !reader.is_protocol_supported(protocol) {
            "unsupported"
        } else if reader.is_current_protocol(protocol)? {
            "current"
        } else {
            "supported"
        };
        println!("{:<28} {}", protocol, status);
    }
    reader.close_physical_channel()?;

    Ok(())
}

fn wait_removal_command(
    reader: &PcscReaderAdapter<PcscTerminal>,
    timeout: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Waiting for the card to be removed from {}", reader.name());

    let outcome = thread::scope(|scope| {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        if let Some(timeout) = timeout {
            scope.spawn(move || {
                // A disconnected sender means the wait already ended
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    debug!("Removal wait timed out after {:?}", timeout);
                    reader.stop_wait_for_card_removal();
                }
            });
        }

        let outcome = reader.wait_for_card_removal();
        drop(done_tx);
        outcome
    })?;

    match outcome {
        RemovalOutcome::Removed => println!("Card removed"),
        RemovalOutcome::Cancelled => println!("Gave up waiting, card still present"),
    }
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    // RUST_LOG takes precedence over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();
}
