//! Capability interfaces implemented by reader adapters
//!
//! Each trait covers one concern of a reader: the physical channel, the
//! logical protocols, the card removal wait and the detection lifecycle
//! driven by an external observation layer. Every method takes `&self` so
//! an adapter shared between threads can be cancelled while it waits.

use bytes::Bytes;

use crate::error::Result;
use crate::presence::RemovalOutcome;

/// Physical channel and APDU exchange
pub trait ChannelControl {
    /// Reader name, fixed for the adapter's lifetime
    fn name(&self) -> &str;

    /// Connect to the card using the configured sharing mode
    fn open_physical_channel(&self) -> Result<()>;

    /// Disconnect from the card using the configured disconnection mode
    ///
    /// The channel is closed afterwards even when an error is returned.
    fn close_physical_channel(&self) -> Result<()>;

    /// Whether the physical channel is open
    fn is_physical_channel_open(&self) -> bool;

    /// Whether a card is inserted, without touching the channel
    fn check_card_presence(&self) -> Result<bool>;

    /// ATR of the connected card as upper-case hex
    fn power_on_data(&self) -> Result<String>;

    /// Send a command APDU and return the raw response
    fn transmit_apdu(&self, command: &[u8]) -> Result<Bytes>;

    /// Whether the reader is contactless
    fn is_contactless(&self) -> bool;
}

/// Logical protocol activation and matching
pub trait ProtocolControl {
    /// Whether the reader class has a matching rule for `protocol`
    fn is_protocol_supported(&self, protocol: &str) -> bool;

    /// Start recognizing `protocol`
    fn activate_protocol(&self, protocol: &str) -> Result<()>;

    /// Stop recognizing `protocol`
    fn deactivate_protocol(&self, protocol: &str);

    /// Whether `protocol` is active and matches the connected card
    fn is_current_protocol(&self, protocol: &str) -> Result<bool>;
}

/// Blocking, cancellable wait for card removal
pub trait RemovalWaitControl {
    /// Block the calling thread until the card is removed or the wait is stopped
    fn wait_for_card_removal(&self) -> Result<RemovalOutcome>;

    /// Stop the running wait; safe to call from any thread
    fn stop_wait_for_card_removal(&self);
}

/// Hooks called by the layer observing the reader
pub trait DetectionLifecycle: RemovalWaitControl {
    /// Card detection started
    fn on_start_detection(&self);

    /// Card detection stopped; no removal wait may be left running
    fn on_stop_detection(&self);

    /// The reader is being unregistered; ends any wait and closes the channel
    fn on_unregister(&self);
}
