//! Snapshot of a PC/SC reader as seen by the plugin

use pcsc::{ReaderState, State};

/// Representation of a PC/SC card reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderInfo {
    /// Name of the reader
    name: String,

    /// Whether a card is present
    has_card: bool,

    /// Answer To Reset of the card (if present)
    atr: Option<Vec<u8>>,

    /// Reader type derived from the plugin's reader name filters
    contactless: Option<bool>,
}

impl ReaderInfo {
    /// Create a new reader snapshot
    pub const fn new(
        name: String,
        has_card: bool,
        atr: Option<Vec<u8>>,
        contactless: Option<bool>,
    ) -> Self {
        Self {
            name,
            has_card,
            atr,
            contactless,
        }
    }

    /// Get the reader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a card is present in the reader
    pub const fn has_card(&self) -> bool {
        self.has_card
    }

    /// Get the ATR of the card if present
    pub fn atr(&self) -> Option<&[u8]> {
        self.atr.as_deref()
    }

    /// Whether the reader is contactless, when its name tells
    pub const fn is_contactless(&self) -> Option<bool> {
        self.contactless
    }

    /// Create a snapshot from a reader state
    pub(crate) fn from_reader_state(reader_state: &ReaderState, contactless: Option<bool>) -> Self {
        let has_card = reader_state.event_state().contains(State::PRESENT)
            && !reader_state.event_state().contains(State::EMPTY);

        let atr = has_card.then(|| reader_state.atr().to_vec());

        Self {
            name: reader_state.name().to_string_lossy().into_owned(),
            has_card,
            atr,
            contactless,
        }
    }
}
