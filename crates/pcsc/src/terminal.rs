//! Device binding for card terminals
//!
//! The [`CardTerminal`] trait is the whole surface the reader adapter needs
//! from a device: connect, disconnect, presence, ATR and transmit. Any
//! contact or contactless transport satisfying it can back an adapter;
//! [`PcscTerminal`] is the PC/SC implementation.

use std::ffi::CString;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use pcsc::{Attribute, Card, Context, MAX_BUFFER_SIZE_EXTENDED, ReaderState, State};
use tracing::{debug, trace};

use crate::config::{DisconnectionMode, IsoProtocol, SharingMode};
use crate::error::TerminalError;

/// Primitive operations of a card terminal
///
/// Implementations are owned by exactly one reader adapter, which
/// serializes every call.
pub trait CardTerminal: fmt::Debug + Send {
    /// Name of the reader this terminal is bound to
    fn name(&self) -> &str;

    /// Connect to the inserted card
    fn connect(&mut self, mode: SharingMode, protocol: IsoProtocol) -> Result<(), TerminalError>;

    /// Disconnect from the card, leaving it in the requested state
    fn disconnect(&mut self, mode: DisconnectionMode) -> Result<(), TerminalError>;

    /// Whether a card is currently inserted
    fn is_card_present(&self) -> Result<bool, TerminalError>;

    /// Answer To Reset of the inserted card
    fn atr(&self) -> Result<Vec<u8>, TerminalError>;

    /// Transmit a command APDU and return the raw response
    fn transmit(&mut self, command: &[u8]) -> Result<Bytes, TerminalError>;

    /// Whether the reader can apply the given disconnection mode
    fn supports_disconnection_mode(&self, _mode: DisconnectionMode) -> bool {
        true
    }
}

/// Card terminal backed by a PC/SC reader
pub struct PcscTerminal {
    /// PC/SC context
    context: Context,
    /// Reader name as passed to the PC/SC API
    reader: CString,
    /// Reader name
    name: String,
    /// Card connection, if established
    card: Option<Card>,
}

impl fmt::Debug for PcscTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTerminal")
            .field("name", &self.name)
            .field("connected", &self.card.is_some())
            .finish()
    }
}

impl PcscTerminal {
    /// Create a terminal for the named reader
    pub fn new(context: Context, name: &str) -> Result<Self, TerminalError> {
        let reader = CString::new(name)
            .map_err(|_| TerminalError::Other(format!("Invalid reader name: {name}")))?;

        Ok(Self {
            context,
            reader,
            name: name.to_string(),
            card: None,
        })
    }

    /// Check if the terminal holds a card connection
    pub const fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    /// Query the current reader state without blocking
    fn reader_state(&self) -> Result<ReaderState, TerminalError> {
        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];
        self.context
            .get_status_change(Some(Duration::ZERO), &mut states)?;
        let [state] = states;
        Ok(state)
    }
}

impl CardTerminal for PcscTerminal {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, mode: SharingMode, protocol: IsoProtocol) -> Result<(), TerminalError> {
        if self.card.is_some() {
            return Ok(());
        }

        debug!("Connecting to {} ({}, {})", self.name, mode, protocol);
        match self
            .context
            .connect(&self.reader, mode.into(), protocol.into())
        {
            Ok(card) => {
                self.card = Some(card);
                Ok(())
            }
            Err(pcsc::Error::NoSmartcard) => Err(TerminalError::NoCard(self.name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn disconnect(&mut self, mode: DisconnectionMode) -> Result<(), TerminalError> {
        let Some(card) = self.card.take() else {
            return Ok(());
        };

        debug!("Disconnecting from {} ({})", self.name, mode);
        // On failure the returned handle is dropped, which releases it with LeaveCard
        card.disconnect(mode.into()).map_err(|(_, e)| e.into())
    }

    fn is_card_present(&self) -> Result<bool, TerminalError> {
        card_presence(self.reader_state()?.event_state())
    }

    fn atr(&self) -> Result<Vec<u8>, TerminalError> {
        if let Some(card) = &self.card {
            return Ok(card.get_attribute_owned(Attribute::AtrString)?);
        }

        // Not connected: fall back on the ATR last reported by the reader
        let state = self.reader_state()?;
        if state.event_state().contains(State::PRESENT) {
            Ok(state.atr().to_vec())
        } else {
            Err(TerminalError::NoCard(self.name.clone()))
        }
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes, TerminalError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| TerminalError::NoCard(self.name.clone()))?;

        trace!("{} >> {}", self.name, hex::encode_upper(command));
        let mut response_buffer = vec![0u8; MAX_BUFFER_SIZE_EXTENDED];
        match card.transmit(command, &mut response_buffer) {
            Ok(response) => {
                trace!("{} << {}", self.name, hex::encode_upper(response));
                Ok(Bytes::copy_from_slice(response))
            }
            Err(e) => {
                // The handle is useless once the card went away
                if matches!(e, pcsc::Error::ResetCard | pcsc::Error::RemovedCard) {
                    self.card = None;
                }
                Err(e.into())
            }
        }
    }
}

/// Card presence from a reader event state
///
/// A reader that vanished is still reported by the status query, flagged
/// `UNKNOWN` or `IGNORE`; that is a device failure, not an empty slot.
fn card_presence(event_state: State) -> Result<bool, TerminalError> {
    if event_state.intersects(State::UNKNOWN | State::IGNORE) {
        return Err(TerminalError::Pcsc(pcsc::Error::UnknownReader));
    }
    Ok(event_state.contains(State::PRESENT) && !event_state.contains(State::EMPTY))
}

impl Drop for PcscTerminal {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(DisconnectionMode::Leave.into());
        }
    }
}

#[cfg(test)]
pub(crate) use mock::{MockState, MockTerminal};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_presence_from_state() {
        assert!(card_presence(State::PRESENT | State::CHANGED).unwrap());
        assert!(card_presence(State::PRESENT | State::INUSE | State::EXCLUSIVE).unwrap());
        assert!(!card_presence(State::EMPTY | State::CHANGED).unwrap());
        assert!(!card_presence(State::EMPTY).unwrap());
    }

    #[test]
    fn test_vanished_reader_is_an_error() {
        assert!(matches!(
            card_presence(State::UNKNOWN | State::CHANGED),
            Err(TerminalError::Pcsc(pcsc::Error::UnknownReader))
        ));
        assert!(matches!(
            card_presence(State::IGNORE),
            Err(TerminalError::Pcsc(pcsc::Error::UnknownReader))
        ));
    }
}
