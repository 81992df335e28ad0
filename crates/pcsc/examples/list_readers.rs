//! Example showing how to enumerate connected card readers

use smartcard_pcsc_reader::PcscPlugin;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plugin = PcscPlugin::new()?;

    let readers = plugin.list_readers()?;

    println!("{}: found {} readers:", plugin.name(), readers.len());

    for (i, reader) in readers.iter().enumerate() {
        let kind = match reader.is_contactless() {
            Some(true) => "contactless",
            Some(false) => "contact",
            None => "unknown type",
        };
        println!("{}. Reader: {} ({})", i + 1, reader.name(), kind);

        match (reader.has_card(), reader.atr()) {
            (true, Some(atr)) => println!("   Card present, ATR: {}", hex::encode_upper(atr)),
            (true, None) => println!("   Card present, ATR: Unknown"),
            (false, _) => println!("   No card present"),
        }
    }

    Ok(())
}
