//! Physical channel state machine

use bytes::Bytes;
use derive_more::Display;
use tracing::{debug, warn};

use crate::config::{DisconnectionMode, IsoProtocol, SharingMode};
use crate::error::{ReaderError, Result, TerminalError};
use crate::terminal::CardTerminal;

/// State of the physical channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum ChannelState {
    /// No card connection (initial state)
    #[default]
    #[display("closed")]
    Closed,
    /// Card connected
    #[display("open")]
    Open,
}

/// Physical channel over a card terminal
///
/// Owns the terminal. Transmission and power-on data are only available
/// while the channel is [`ChannelState::Open`].
#[derive(Debug)]
pub struct PhysicalChannel<T> {
    terminal: T,
    state: ChannelState,
}

impl<T: CardTerminal> PhysicalChannel<T> {
    /// Wrap a terminal in a closed channel
    pub const fn new(terminal: T) -> Self {
        Self {
            terminal,
            state: ChannelState::Closed,
        }
    }

    /// The underlying terminal
    pub const fn terminal(&self) -> &T {
        &self.terminal
    }

    /// Current state
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether the channel is open
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Connect to the card with the given sharing mode
    ///
    /// The channel stays closed when the terminal fails to connect.
    pub fn open(&mut self, mode: SharingMode, protocol: IsoProtocol) -> Result<()> {
        if self.is_open() {
            debug!("Physical channel already open on {}", self.terminal.name());
            return Ok(());
        }

        self.terminal
            .connect(mode, protocol)
            .map_err(|e| ReaderError::communication(self.terminal.name(), e))?;
        self.state = ChannelState::Open;
        debug!("Physical channel opened on {} ({})", self.terminal.name(), mode);
        Ok(())
    }

    /// Disconnect from the card
    ///
    /// The channel always ends closed, even when the terminal reports a
    /// disconnection failure; that failure is still returned.
    pub fn close(&mut self, mode: DisconnectionMode) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }

        self.state = ChannelState::Closed;
        match self.terminal.disconnect(mode) {
            Ok(()) => {
                debug!("Physical channel closed on {} ({})", self.terminal.name(), mode);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to disconnect cleanly from {}: {}",
                    self.terminal.name(),
                    e
                );
                Err(ReaderError::communication(self.terminal.name(), e))
            }
        }
    }

    /// Transmit a command APDU through the open channel
    pub fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        self.ensure_open()?;
        if command.is_empty() {
            return Err(ReaderError::EmptyApdu);
        }

        self.terminal
            .transmit(command)
            .map_err(|e| ReaderError::communication(self.terminal.name(), e))
    }

    /// ATR of the connected card
    pub fn atr(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.terminal
            .atr()
            .map_err(|e| ReaderError::communication(self.terminal.name(), e))
    }

    /// ATR of the connected card as upper-case hex
    pub fn power_on_data(&self) -> Result<String> {
        self.atr().map(hex::encode_upper)
    }

    /// ATR of the connected card
    ///
    /// `None` when the channel is closed or the card has gone away.
    pub fn current_atr(&self) -> Result<Option<Vec<u8>>> {
        if !self.is_open() {
            return Ok(None);
        }
        match self.terminal.atr() {
            Ok(atr) => Ok(Some(atr)),
            Err(TerminalError::NoCard(_)) => Ok(None),
            Err(e) => Err(ReaderError::communication(self.terminal.name(), e)),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ReaderError::ChannelNotOpen(self.terminal.name().to_string()))
        }
    }
}
