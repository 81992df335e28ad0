//! PC/SC reader adapter
//!
//! This crate mediates between a smart card reader and the layer that
//! exchanges APDUs with cards. A [`PcscReaderAdapter`] owns one
//! [`CardTerminal`] and manages:
//!
//! - the physical channel (open/close under a sharing and a disconnection
//!   mode, APDU transmission, power-on data),
//! - the logical protocols recognized from the card ATR,
//! - a blocking card removal wait that another thread can cancel.
//!
//! [`PcscPlugin`] enumerates the PC/SC readers of the system and creates
//! adapters backed by [`PcscTerminal`].
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use smartcard_pcsc_reader::{ChannelControl, PcscPlugin, ProtocolControl, SharingMode};
//!
//! let plugin = PcscPlugin::new()?;
//! let info = plugin.find_reader_with_card()?;
//!
//! let reader = plugin.open_reader(info.name())?;
//! reader.set_sharing_mode(SharingMode::Shared);
//! reader.activate_protocol("ISO_14443_4")?;
//!
//! reader.open_physical_channel()?;
//! println!("ATR: {}", reader.power_on_data()?);
//!
//! // SELECT with an empty AID
//! let response = reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00, 0x00])?;
//! println!("Response: {}", hex::encode_upper(&response));
//!
//! reader.close_physical_channel()?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod adapter;
mod channel;
mod config;
mod error;
mod plugin;
mod presence;
mod protocol;
mod reader;
mod spi;
mod terminal;

pub use adapter::PcscReaderAdapter;
pub use channel::{ChannelState, PhysicalChannel};
pub use config::{
    DEFAULT_REMOVAL_LATENCY, DisconnectionMode, IsoProtocol, ReaderConfig, SharingMode,
};
pub use error::{ReaderError, Result, TerminalError};
pub use plugin::{
    DEFAULT_CONTACT_READER_FILTER, DEFAULT_CONTACTLESS_READER_FILTER, DEFAULT_PROTOCOL_RULES,
    PLUGIN_NAME, PcscPlugin, PluginConfig,
};
pub use presence::{CardPresenceMonitor, RemovalOutcome};
pub use protocol::ProtocolResolver;
pub use reader::ReaderInfo;
pub use spi::{ChannelControl, DetectionLifecycle, ProtocolControl, RemovalWaitControl};
pub use terminal::{CardTerminal, PcscTerminal};

// Re-export some pcsc types for convenience
pub use pcsc::{Context, Scope};
