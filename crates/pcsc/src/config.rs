//! Configuration options for PC/SC readers

use std::str::FromStr;
use std::time::Duration;

use derive_more::Display;
use pcsc::{Disposition, Protocols as PcscProtocols, ShareMode as PcscShareMode};

use crate::error::ReaderError;

/// Default polling interval of the card removal wait.
///
/// This bounds how long a cancellation request can take to be observed by
/// a thread blocked in a removal wait.
pub const DEFAULT_REMOVAL_LATENCY: Duration = Duration::from_millis(500);

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum SharingMode {
    /// Exclusive access to the card (default)
    #[default]
    #[display("EXCLUSIVE")]
    Exclusive,
    /// Shared access to the card
    #[display("SHARED")]
    Shared,
}

impl From<SharingMode> for PcscShareMode {
    fn from(mode: SharingMode) -> Self {
        match mode {
            SharingMode::Exclusive => Self::Exclusive,
            SharingMode::Shared => Self::Shared,
        }
    }
}

impl FromStr for SharingMode {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EXCLUSIVE" => Ok(Self::Exclusive),
            "SHARED" => Ok(Self::Shared),
            _ => Err(ReaderError::InvalidConfiguration(format!(
                "unknown sharing mode: {s}"
            ))),
        }
    }
}

/// State the card is left in when the physical channel is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum DisconnectionMode {
    /// Leave the card powered and untouched (default)
    #[default]
    #[display("LEAVE")]
    Leave,
    /// Warm reset the card
    #[display("RESET")]
    Reset,
    /// Power the card down
    #[display("UNPOWER")]
    Unpower,
    /// Eject the card, on readers with an eject mechanism
    #[display("EJECT")]
    Eject,
}

impl DisconnectionMode {
    /// All disconnection modes, in declaration order
    pub const ALL: [Self; 4] = [Self::Leave, Self::Reset, Self::Unpower, Self::Eject];
}

impl From<DisconnectionMode> for Disposition {
    fn from(mode: DisconnectionMode) -> Self {
        match mode {
            DisconnectionMode::Leave => Self::LeaveCard,
            DisconnectionMode::Reset => Self::ResetCard,
            DisconnectionMode::Unpower => Self::UnpowerCard,
            DisconnectionMode::Eject => Self::EjectCard,
        }
    }
}

impl FromStr for DisconnectionMode {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LEAVE" => Ok(Self::Leave),
            "RESET" => Ok(Self::Reset),
            "UNPOWER" => Ok(Self::Unpower),
            "EJECT" => Ok(Self::Eject),
            _ => Err(ReaderError::InvalidConfiguration(format!(
                "unknown disconnection mode: {s}"
            ))),
        }
    }
}

/// Transport protocol requested when the card is connected
///
/// Only used by readers that need a single upfront protocol choice; logical
/// protocols (card technologies) are matched separately against the ATR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum IsoProtocol {
    /// Let the reader negotiate (default)
    #[default]
    #[display("*")]
    Any,
    /// ISO 7816-3 T=0
    #[display("T=0")]
    T0,
    /// ISO 7816-3 T=1
    #[display("T=1")]
    T1,
    /// Contactless (ISO 14443-4)
    #[display("T=CL")]
    Tcl,
}

impl From<IsoProtocol> for PcscProtocols {
    fn from(protocol: IsoProtocol) -> Self {
        match protocol {
            IsoProtocol::Any => Self::ANY,
            IsoProtocol::T0 => Self::T0,
            // PC/SC exposes ISO 14443-4 cards as T=1
            IsoProtocol::T1 | IsoProtocol::Tcl => Self::T1,
        }
    }
}

impl FromStr for IsoProtocol {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "*" | "ANY" => Ok(Self::Any),
            "T=0" | "T0" => Ok(Self::T0),
            "T=1" | "T1" => Ok(Self::T1),
            "T=CL" | "TCL" => Ok(Self::Tcl),
            _ => Err(ReaderError::InvalidConfiguration(format!(
                "unknown ISO protocol: {s}"
            ))),
        }
    }
}

/// Configuration options for a PC/SC reader adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Sharing mode used when the physical channel is opened
    pub sharing_mode: SharingMode,

    /// Card disposition applied when the physical channel is closed
    pub disconnection_mode: DisconnectionMode,

    /// Transport protocol requested at connection time
    pub iso_protocol: IsoProtocol,

    /// Contactless override; `None` derives the value from the reader name
    pub contactless: Option<bool>,

    /// Polling interval of the card removal wait
    pub removal_latency: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sharing_mode: SharingMode::default(),
            disconnection_mode: DisconnectionMode::default(),
            iso_protocol: IsoProtocol::default(),
            contactless: None,
            removal_latency: DEFAULT_REMOVAL_LATENCY,
        }
    }
}

impl ReaderConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_sharing_mode(mut self, mode: SharingMode) -> Self {
        self.sharing_mode = mode;
        self
    }

    /// Set the disconnection mode
    pub const fn with_disconnection_mode(mut self, mode: DisconnectionMode) -> Self {
        self.disconnection_mode = mode;
        self
    }

    /// Set the ISO protocol
    pub const fn with_iso_protocol(mut self, protocol: IsoProtocol) -> Self {
        self.iso_protocol = protocol;
        self
    }

    /// Force the reader type instead of deriving it from the reader name
    pub const fn with_contactless(mut self, contactless: bool) -> Self {
        self.contactless = Some(contactless);
        self
    }

    /// Set the removal wait polling interval
    pub const fn with_removal_latency(mut self, latency: Duration) -> Self {
        self.removal_latency = latency;
        self
    }

    /// Check the values that cannot be ruled out by the type system
    pub(crate) fn validate(&self) -> Result<(), ReaderError> {
        if self.removal_latency.is_zero() {
            return Err(ReaderError::InvalidConfiguration(
                "removal latency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.sharing_mode, SharingMode::Exclusive);
        assert_eq!(config.disconnection_mode, DisconnectionMode::Leave);
        assert_eq!(config.iso_protocol, IsoProtocol::Any);
        assert_eq!(config.contactless, None);
        assert_eq!(config.removal_latency, DEFAULT_REMOVAL_LATENCY);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("shared".parse::<SharingMode>().unwrap(), SharingMode::Shared);
        assert_eq!(
            "Unpower".parse::<DisconnectionMode>().unwrap(),
            DisconnectionMode::Unpower
        );
        assert_eq!("T=CL".parse::<IsoProtocol>().unwrap(), IsoProtocol::Tcl);
        assert_eq!("*".parse::<IsoProtocol>().unwrap(), IsoProtocol::Any);
    }

    #[test]
    fn test_parse_rejects_unknown_values() {
        assert!(matches!(
            "promiscuous".parse::<SharingMode>(),
            Err(ReaderError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            "shred".parse::<DisconnectionMode>(),
            Err(ReaderError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            "T=2".parse::<IsoProtocol>(),
            Err(ReaderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for mode in DisconnectionMode::ALL {
            assert_eq!(mode.to_string().parse::<DisconnectionMode>().unwrap(), mode);
        }
        assert_eq!(IsoProtocol::T0.to_string(), "T=0");
    }

    #[test]
    fn test_zero_latency_is_rejected() {
        let config = ReaderConfig::new().with_removal_latency(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ReaderError::InvalidConfiguration(_))
        ));
        assert!(ReaderConfig::new().validate().is_ok());
    }

    #[test]
    fn test_pcsc_conversions() {
        assert_eq!(
            PcscShareMode::from(SharingMode::Exclusive),
            PcscShareMode::Exclusive
        );
        assert_eq!(
            Disposition::from(DisconnectionMode::Eject),
            Disposition::EjectCard
        );
        assert_eq!(PcscProtocols::from(IsoProtocol::Tcl), PcscProtocols::T1);
    }
}
