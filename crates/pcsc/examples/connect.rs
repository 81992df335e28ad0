//! Example showing a channel opened on the first card found, with protocol detection

use smartcard_pcsc_reader::{
    ChannelControl, DisconnectionMode, PcscPlugin, ProtocolControl, SharingMode,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plugin = PcscPlugin::new()?;

    let info = match plugin.find_reader_with_card() {
        Ok(info) => info,
        Err(_) => {
            println!("No reader with a card inserted found!");
            return Ok(());
        }
    };
    println!("Using reader: {}", info.name());

    let reader = plugin.open_reader(info.name())?;
    reader
        .set_sharing_mode(SharingMode::Shared)
        .set_disconnection_mode(DisconnectionMode::Reset)?;

    let protocols: Vec<String> = plugin.config().protocols().map(str::to_string).collect();
    for protocol in &protocols {
        reader.activate_protocol(protocol)?;
    }

    reader.open_physical_channel()?;
    println!("Card ATR: {}", reader.power_on_data()?);

    for protocol in &protocols {
        if reader.is_current_protocol(protocol)? {
            println!("Matches protocol: {}", protocol);
        }
    }

    // SELECT PSE (Payment System Environment)
    let select = hex::decode("00A404000E315041592E5359532E4444463031")?;
    match reader.transmit_apdu(&select) {
        Ok(response) => println!("SELECT PSE: {}", hex::encode_upper(&response)),
        Err(e) => println!("Command failed: {}", e),
    }

    reader.close_physical_channel()?;
    println!("Channel closed, card reset");
    Ok(())
}
