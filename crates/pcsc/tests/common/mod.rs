//! Scripted terminal shared by the integration tests

#![allow(dead_code, unreachable_pub)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use smartcard_pcsc_reader::{
    CardTerminal, DisconnectionMode, IsoProtocol, PcscReaderAdapter, PluginConfig, ReaderConfig,
    SharingMode, TerminalError,
};

/// Polling interval used by the removal wait tests
pub const LATENCY: Duration = Duration::from_millis(20);

/// Upper bound for a wait to notice a stop or a removal
pub const SLACK: Duration = Duration::from_millis(500);

/// Calls received by the test terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(SharingMode, IsoProtocol),
    Disconnect(DisconnectionMode),
    Transmit(Vec<u8>),
}

#[derive(Debug, Default)]
struct Device {
    atr: Option<Vec<u8>>,
    calls: Vec<Call>,
    fail_disconnect: bool,
    unplugged: bool,
    transmit_delay: Option<Duration>,
}

/// Test terminal whose card can be inserted and removed from the test thread
#[derive(Debug, Clone)]
pub struct TestTerminal {
    name: String,
    device: Arc<Mutex<Device>>,
}

impl TestTerminal {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            device: Arc::new(Mutex::new(Device::default())),
        }
    }

    pub fn with_card(name: &str, atr_hex: &str) -> Self {
        let terminal = Self::empty(name);
        terminal.insert(atr_hex);
        terminal
    }

    pub fn insert(&self, atr_hex: &str) {
        self.device.lock().atr = Some(hex::decode(atr_hex).expect("valid ATR hex"));
    }

    pub fn remove(&self) {
        self.device.lock().atr = None;
    }

    pub fn unplug(&self) {
        self.device.lock().unplugged = true;
    }

    pub fn fail_disconnect(&self) {
        self.device.lock().fail_disconnect = true;
    }

    /// Make every transmission block for `delay`, as a slow card would
    pub fn stall_transmit(&self, delay: Duration) {
        self.device.lock().transmit_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.device.lock().calls.clone()
    }
}

impl CardTerminal for TestTerminal {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, mode: SharingMode, protocol: IsoProtocol) -> Result<(), TerminalError> {
        let mut device = self.device.lock();
        device.calls.push(Call::Connect(mode, protocol));
        match device.atr {
            Some(_) => Ok(()),
            None => Err(TerminalError::NoCard(self.name.clone())),
        }
    }

    fn disconnect(&mut self, mode: DisconnectionMode) -> Result<(), TerminalError> {
        let mut device = self.device.lock();
        device.calls.push(Call::Disconnect(mode));
        if device.fail_disconnect {
            Err(TerminalError::Other("reader refused disconnection".to_string()))
        } else {
            Ok(())
        }
    }

    fn is_card_present(&self) -> Result<bool, TerminalError> {
        let device = self.device.lock();
        if device.unplugged {
            return Err(TerminalError::Other("reader unplugged".to_string()));
        }
        Ok(device.atr.is_some())
    }

    fn atr(&self) -> Result<Vec<u8>, TerminalError> {
        self.device
            .lock()
            .atr
            .clone()
            .ok_or_else(|| TerminalError::NoCard(self.name.clone()))
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes, TerminalError> {
        let delay = {
            let mut device = self.device.lock();
            device.calls.push(Call::Transmit(command.to_vec()));
            if device.atr.is_none() {
                return Err(TerminalError::NoCard(self.name.clone()));
            }
            device.transmit_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }
}

/// Adapter over `terminal` with the default plugin rules and a short latency
pub fn adapter(terminal: &TestTerminal) -> Arc<PcscReaderAdapter<TestTerminal>> {
    let config = ReaderConfig::new().with_removal_latency(LATENCY);
    let adapter =
        PcscReaderAdapter::with_config(terminal.clone(), Arc::new(PluginConfig::default()), config)
            .expect("valid adapter configuration");
    Arc::new(adapter)
}
