//! Reader adapter composing the channel, protocol and presence components

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::channel::PhysicalChannel;
use crate::config::{DisconnectionMode, IsoProtocol, ReaderConfig, SharingMode};
use crate::error::{ReaderError, Result};
use crate::plugin::PluginConfig;
use crate::presence::{CardPresenceMonitor, RemovalOutcome};
use crate::protocol::ProtocolResolver;
use crate::spi::{ChannelControl, DetectionLifecycle, ProtocolControl, RemovalWaitControl};
use crate::terminal::{CardTerminal, PcscTerminal};

/// State guarded by the adapter lock
#[derive(Debug)]
struct Inner<T> {
    channel: PhysicalChannel<T>,
    config: ReaderConfig,
    contactless: bool,
    protocols: ProtocolResolver,
}

/// Reader adapter over a card terminal
///
/// Configuration setters take effect on the next operation that reads
/// them: the sharing mode and ISO protocol when the channel is opened, the
/// disconnection mode when it is closed, the removal latency when a wait
/// starts.
///
/// Channel operations are serialized through an internal lock that the
/// removal wait only holds for the duration of each presence check, so
/// [`stop_wait_for_card_removal`](RemovalWaitControl::stop_wait_for_card_removal)
/// and [`on_unregister`](DetectionLifecycle::on_unregister) can be called
/// from another thread while a wait is blocked.
#[derive(Debug)]
pub struct PcscReaderAdapter<T = PcscTerminal> {
    /// Reader name, taken from the terminal at construction
    name: String,
    /// Reader-class settings of the parent plugin, used for lookups only
    plugin: Arc<PluginConfig>,
    inner: Mutex<Inner<T>>,
    monitor: CardPresenceMonitor,
    /// Removal wait polling interval in nanoseconds, readable without the lock
    removal_latency: AtomicU64,
    detecting: AtomicBool,
}

impl<T: CardTerminal> PcscReaderAdapter<T> {
    /// Create an adapter with the default configuration
    pub fn new(terminal: T, plugin: Arc<PluginConfig>) -> Result<Self> {
        Self::with_config(terminal, plugin, ReaderConfig::default())
    }

    /// Create an adapter with a custom configuration
    pub fn with_config(terminal: T, plugin: Arc<PluginConfig>, config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        if !terminal.supports_disconnection_mode(config.disconnection_mode) {
            return Err(unsupported_disconnection_mode(
                terminal.name(),
                config.disconnection_mode,
            ));
        }

        let name = terminal.name().to_string();
        let contactless = match config.contactless {
            Some(contactless) => contactless,
            None => plugin.is_contactless_reader(&name)?.unwrap_or_else(|| {
                debug!("Reader type of {} not identified, assuming contact", name);
                false
            }),
        };

        debug!("Reader adapter created for {} (contactless: {})", name, contactless);
        let removal_latency = AtomicU64::new(latency_nanos(config.removal_latency));
        Ok(Self {
            name,
            plugin,
            inner: Mutex::new(Inner {
                channel: PhysicalChannel::new(terminal),
                config,
                contactless,
                protocols: ProtocolResolver::new(),
            }),
            monitor: CardPresenceMonitor::new(),
            removal_latency,
            detecting: AtomicBool::new(false),
        })
    }

    /// Name of the parent plugin
    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Current configuration
    pub fn config(&self) -> ReaderConfig {
        self.inner.lock().config.clone()
    }

    /// Set the sharing mode used by the next channel opening
    pub fn set_sharing_mode(&self, mode: SharingMode) -> &Self {
        debug!("{}: sharing mode set to {}", self.name, mode);
        self.inner.lock().config.sharing_mode = mode;
        self
    }

    /// Force the reader type
    pub fn set_contactless(&self, contactless: bool) -> &Self {
        debug!("{}: contactless set to {}", self.name, contactless);
        let mut inner = self.inner.lock();
        inner.config.contactless = Some(contactless);
        inner.contactless = contactless;
        self
    }

    /// Set the ISO protocol requested by the next channel opening
    pub fn set_iso_protocol(&self, protocol: IsoProtocol) -> &Self {
        debug!("{}: ISO protocol set to {}", self.name, protocol);
        self.inner.lock().config.iso_protocol = protocol;
        self
    }

    /// Set the card disposition applied when the channel is closed
    ///
    /// Modes the reader cannot apply are rejected without changing the
    /// configuration.
    pub fn set_disconnection_mode(&self, mode: DisconnectionMode) -> Result<&Self> {
        let mut inner = self.inner.lock();
        if !inner.channel.terminal().supports_disconnection_mode(mode) {
            return Err(unsupported_disconnection_mode(&self.name, mode));
        }
        debug!("{}: disconnection mode set to {}", self.name, mode);
        inner.config.disconnection_mode = mode;
        Ok(self)
    }

    /// Set the polling interval of the next removal waits
    pub fn set_removal_latency(&self, latency: Duration) -> Result<&Self> {
        if latency.is_zero() {
            return Err(ReaderError::InvalidConfiguration(
                "removal latency must be greater than zero".to_string(),
            ));
        }
        self.removal_latency
            .store(latency_nanos(latency), Ordering::Release);
        self.inner.lock().config.removal_latency = latency;
        Ok(self)
    }

    /// Logical protocols currently active, in name order
    pub fn active_protocols(&self) -> Vec<String> {
        self.inner
            .lock()
            .protocols
            .active()
            .map(str::to_string)
            .collect()
    }

    /// Whether the observation layer has started card detection
    pub fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::Acquire)
    }

    /// Whether a removal wait is running
    pub fn is_waiting_for_card_removal(&self) -> bool {
        self.monitor.is_waiting()
    }
}

fn latency_nanos(latency: Duration) -> u64 {
    u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX)
}

fn unsupported_disconnection_mode(reader: &str, mode: DisconnectionMode) -> ReaderError {
    ReaderError::InvalidConfiguration(format!(
        "disconnection mode {mode} not supported by reader {reader}"
    ))
}

impl<T: CardTerminal> ChannelControl for PcscReaderAdapter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_physical_channel(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let (mode, protocol) = (inner.config.sharing_mode, inner.config.iso_protocol);
        inner.channel.open(mode, protocol)
    }

    fn close_physical_channel(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mode = inner.config.disconnection_mode;
        inner.channel.close(mode)
    }

    fn is_physical_channel_open(&self) -> bool {
        self.inner.lock().channel.is_open()
    }

    fn check_card_presence(&self) -> Result<bool> {
        self.inner
            .lock()
            .channel
            .terminal()
            .is_card_present()
            .map_err(|e| ReaderError::communication(&self.name, e))
    }

    fn power_on_data(&self) -> Result<String> {
        self.inner.lock().channel.power_on_data()
    }

    fn transmit_apdu(&self, command: &[u8]) -> Result<Bytes> {
        self.inner.lock().channel.transmit(command)
    }

    fn is_contactless(&self) -> bool {
        self.inner.lock().contactless
    }
}

impl<T: CardTerminal> ProtocolControl for PcscReaderAdapter<T> {
    fn is_protocol_supported(&self, protocol: &str) -> bool {
        ProtocolResolver::is_supported(&self.plugin, protocol)
    }

    fn activate_protocol(&self, protocol: &str) -> Result<()> {
        self.inner.lock().protocols.activate(&self.plugin, protocol)
    }

    fn deactivate_protocol(&self, protocol: &str) {
        self.inner.lock().protocols.deactivate(protocol);
    }

    fn is_current_protocol(&self, protocol: &str) -> Result<bool> {
        let inner = self.inner.lock();
        // Re-read on every call: the card may have changed since the last one
        let atr = inner.channel.current_atr()?;
        inner
            .protocols
            .is_current(&self.plugin, protocol, atr.as_deref())
    }
}

impl<T: CardTerminal> RemovalWaitControl for PcscReaderAdapter<T> {
    fn wait_for_card_removal(&self) -> Result<RemovalOutcome> {
        let latency = Duration::from_nanos(self.removal_latency.load(Ordering::Acquire));
        let outcome = self
            .monitor
            .wait_for_removal(latency, || {
                // Skip the poll while a device call elsewhere holds the lock
                match self.inner.try_lock_for(latency) {
                    Some(inner) => inner.channel.terminal().is_card_present(),
                    None => {
                        trace!("{}: reader busy, presence check skipped", self.name);
                        Ok(true)
                    }
                }
            })
            .map_err(|e| ReaderError::communication(&self.name, e))?;

        if outcome == RemovalOutcome::Removed {
            let mut inner = self.inner.lock();
            let mode = inner.config.disconnection_mode;
            if let Err(e) = inner.channel.close(mode) {
                warn!("{}: channel closed with error after card removal: {}", self.name, e);
            }
        }
        Ok(outcome)
    }

    fn stop_wait_for_card_removal(&self) {
        self.monitor.stop();
    }
}

impl<T: CardTerminal> DetectionLifecycle for PcscReaderAdapter<T> {
    fn on_start_detection(&self) {
        debug!("{}: card detection started", self.name);
        self.detecting.store(true, Ordering::Release);
    }

    fn on_stop_detection(&self) {
        debug!("{}: card detection stopped", self.name);
        self.detecting.store(false, Ordering::Release);
        self.stop_wait_for_card_removal();
    }

    fn on_unregister(&self) {
        debug!("{}: unregistering", self.name);
        self.detecting.store(false, Ordering::Release);
        self.stop_wait_for_card_removal();
        if let Err(e) = self.close_physical_channel() {
            warn!("{}: channel closed with error during unregistration: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::MockTerminal;

    const ULTRALIGHT_ATR: &str = "3B8F8001804F0CA0000003060300030000000068";

    fn adapter(terminal: &MockTerminal) -> PcscReaderAdapter<MockTerminal> {
        PcscReaderAdapter::new(terminal.clone(), Arc::new(PluginConfig::default())).unwrap()
    }

    fn ultralight() -> MockTerminal {
        MockTerminal::with_card(
            "ACS ACR1252 Dual Reader PICC 00 00",
            &hex::decode(ULTRALIGHT_ATR).unwrap(),
        )
    }

    #[test]
    fn test_name_comes_from_terminal() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        assert_eq!(reader.name(), "ACS ACR1252 Dual Reader PICC 00 00");
        assert_eq!(reader.plugin_name(), "PcscPlugin");
    }

    #[test]
    fn test_default_open_is_exclusive() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        reader.open_physical_channel().unwrap();
        assert_eq!(
            terminal.state().connects,
            [(SharingMode::Exclusive, IsoProtocol::Any)]
        );
    }

    #[test]
    fn test_setters_chain_and_apply_on_open() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        reader
            .set_sharing_mode(SharingMode::Shared)
            .set_iso_protocol(IsoProtocol::Tcl)
            .set_disconnection_mode(DisconnectionMode::Unpower)
            .unwrap();

        reader.open_physical_channel().unwrap();
        reader.close_physical_channel().unwrap();

        let state = terminal.state();
        assert_eq!(state.connects, [(SharingMode::Shared, IsoProtocol::Tcl)]);
        assert_eq!(state.disconnects, [DisconnectionMode::Unpower]);
    }

    #[test]
    fn test_sharing_mode_change_does_not_touch_open_channel() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        reader.open_physical_channel().unwrap();
        reader.set_sharing_mode(SharingMode::Shared);
        reader.open_physical_channel().unwrap();
        assert_eq!(terminal.state().connects.len(), 1);
        assert_eq!(reader.config().sharing_mode, SharingMode::Shared);
    }

    #[test]
    fn test_unsupported_disconnection_mode_is_rejected() {
        let terminal = ultralight();
        terminal.state().unsupported_modes = vec![DisconnectionMode::Eject];
        let reader = adapter(&terminal);

        assert!(matches!(
            reader.set_disconnection_mode(DisconnectionMode::Eject),
            Err(ReaderError::InvalidConfiguration(_))
        ));
        assert_eq!(reader.config().disconnection_mode, DisconnectionMode::Leave);
    }

    #[test]
    fn test_invalid_construction_config() {
        let terminal = ultralight();
        terminal.state().unsupported_modes = vec![DisconnectionMode::Eject];
        let plugin = Arc::new(PluginConfig::default());

        let config = ReaderConfig::new().with_disconnection_mode(DisconnectionMode::Eject);
        assert!(matches!(
            PcscReaderAdapter::with_config(terminal.clone(), Arc::clone(&plugin), config),
            Err(ReaderError::InvalidConfiguration(_))
        ));

        let config = ReaderConfig::new().with_removal_latency(Duration::ZERO);
        assert!(matches!(
            PcscReaderAdapter::with_config(terminal, plugin, config),
            Err(ReaderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_removal_latency_is_rejected() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        assert!(reader.set_removal_latency(Duration::ZERO).is_err());
        assert!(reader.set_removal_latency(Duration::from_millis(5)).is_ok());
        assert_eq!(reader.config().removal_latency, Duration::from_millis(5));
    }

    #[test]
    fn test_contactless_derived_then_overridden() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        assert!(reader.is_contactless());
        reader.set_contactless(false);
        assert!(!reader.is_contactless());

        let unknown = MockTerminal::new("Virtual Reader");
        assert!(!adapter(&unknown).is_contactless());

        let forced = PcscReaderAdapter::with_config(
            unknown,
            Arc::new(PluginConfig::default()),
            ReaderConfig::new().with_contactless(true),
        )
        .unwrap();
        assert!(forced.is_contactless());
    }

    #[test]
    fn test_current_protocol_follows_card() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        reader.activate_protocol("MIFARE_ULTRALIGHT").unwrap();

        // No channel, no card data
        assert!(!reader.is_current_protocol("MIFARE_ULTRALIGHT").unwrap());

        reader.open_physical_channel().unwrap();
        assert!(reader.is_current_protocol("MIFARE_ULTRALIGHT").unwrap());
        assert!(!reader.is_current_protocol("MIFARE_DESFIRE").unwrap());

        // Card swapped under an open channel
        terminal.state().atr = hex::decode("3B8180018080").unwrap();
        assert!(!reader.is_current_protocol("MIFARE_ULTRALIGHT").unwrap());

        // Card pulled with the channel still open
        terminal.state().present = false;
        assert!(!reader.is_current_protocol("MIFARE_ULTRALIGHT").unwrap());
    }

    #[test]
    fn test_protocol_support_ignores_activation() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        assert!(reader.is_protocol_supported("ISO_14443_4"));
        assert!(!reader.is_protocol_supported("FELICA"));
        assert!(matches!(
            reader.activate_protocol("FELICA"),
            Err(ReaderError::UnsupportedProtocol(_))
        ));
        assert!(reader.active_protocols().is_empty());
    }

    #[test]
    fn test_check_card_presence_leaves_channel_alone() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        assert!(reader.check_card_presence().unwrap());
        terminal.state().present = false;
        assert!(!reader.check_card_presence().unwrap());
        assert!(!reader.is_physical_channel_open());
        assert!(terminal.state().connects.is_empty());
    }

    #[test]
    fn test_wait_ends_on_presence_failure() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        reader.set_removal_latency(Duration::from_millis(1)).unwrap();
        terminal.state().fail_presence = true;
        assert!(matches!(
            reader.wait_for_card_removal(),
            Err(ReaderError::Communication { .. })
        ));
        assert!(!reader.is_waiting_for_card_removal());
    }

    #[test]
    fn test_unregister_closes_channel() {
        let terminal = ultralight();
        let reader = adapter(&terminal);
        reader.on_start_detection();
        assert!(reader.is_detecting());
        reader.open_physical_channel().unwrap();
        terminal.state().fail_disconnect = true;

        reader.on_unregister();
        assert!(!reader.is_physical_channel_open());
        assert!(!reader.is_detecting());
    }
}
