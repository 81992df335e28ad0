//! Example waiting for the card to be removed, with a timeout enforced from another thread

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smartcard_pcsc_reader::{PcscPlugin, RemovalOutcome, RemovalWaitControl};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plugin = PcscPlugin::new()?;

    let info = match plugin.find_reader_with_card() {
        Ok(info) => info,
        Err(_) => {
            println!("Insert a card first!");
            return Ok(());
        }
    };

    let reader = Arc::new(plugin.open_reader(info.name())?);
    reader.set_removal_latency(Duration::from_millis(100))?;

    let canceller = Arc::clone(&reader);
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(10));
        canceller.stop_wait_for_card_removal();
    });

    println!("Remove the card from {} within 10 seconds...", info.name());
    match reader.wait_for_card_removal()? {
        RemovalOutcome::Removed => println!("Card removed"),
        RemovalOutcome::Cancelled => println!("Gave up waiting"),
    }

    Ok(())
}
