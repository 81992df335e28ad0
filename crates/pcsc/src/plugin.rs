//! PC/SC plugin: reader enumeration and adapter creation

use std::collections::BTreeMap;
use std::sync::Arc;

use pcsc::{Context, ReaderState, Scope, State};
use tracing::debug;

use crate::adapter::PcscReaderAdapter;
use crate::config::ReaderConfig;
use crate::error::{ReaderError, Result};
use crate::protocol::PatternRule;
use crate::reader::ReaderInfo;
use crate::terminal::PcscTerminal;

/// Default plugin name
pub const PLUGIN_NAME: &str = "PcscPlugin";

/// Standard ATR rules for the logical protocols PC/SC readers report
///
/// Contactless rules follow the ATR a PC/SC part 3 reader synthesizes for
/// each card technology; contact rules accept any ISO 7816-3 ATR.
pub const DEFAULT_PROTOCOL_RULES: [(&str, &str); 10] = [
    (
        "ISO_14443_4",
        "3B8880....................|3B8C800150.*|.*4F4D4141544C4153.*",
    ),
    ("INNOVATRON_B_PRIME_CARD", "3B8F8001805A0...................829000.."),
    ("MIFARE_ULTRALIGHT", "3B8F8001804F0CA0000003060300030000000068"),
    ("MIFARE_CLASSIC_1K", "3B8F8001804F0CA000000306030001000000006A"),
    ("MIFARE_CLASSIC_4K", "3B8F8001804F0CA0000003060300020000000069"),
    ("MIFARE_DESFIRE", "3B8180018080"),
    ("MEMORY_ST25", "3B8F8001804F0CA000000306070007D0020C00B6"),
    ("ISO_7816_3", "3.*"),
    ("ISO_7816_3_T0", "3.*"),
    ("ISO_7816_3_T1", "3.*"),
];

/// Default reader name filter identifying contactless readers
pub const DEFAULT_CONTACTLESS_READER_FILTER: &str = "(?i).*(contactless|picc|ask logo|00 01).*";

/// Default reader name filter identifying contact readers
pub const DEFAULT_CONTACT_READER_FILTER: &str = "(?i).*(contact|sam|iso7816|00 00).*";

/// Reader-class settings shared by every reader of a plugin
///
/// Readers hold it behind an [`Arc`] and only read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Plugin name
    name: String,
    /// Logical protocol name to ATR regular expression
    protocol_rules: BTreeMap<String, PatternRule>,
    /// Reader name filter for contactless readers
    contactless_filter: Option<PatternRule>,
    /// Reader name filter for contact readers
    contact_filter: Option<PatternRule>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: PLUGIN_NAME.to_string(),
            protocol_rules: DEFAULT_PROTOCOL_RULES
                .iter()
                .map(|(protocol, rule)| ((*protocol).to_string(), PatternRule::new(*rule)))
                .collect(),
            contactless_filter: Some(PatternRule::new(DEFAULT_CONTACTLESS_READER_FILTER)),
            contact_filter: Some(PatternRule::new(DEFAULT_CONTACT_READER_FILTER)),
        }
    }
}

impl PluginConfig {
    /// Create a configuration with the standard rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plugin name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add or replace the ATR rule of a logical protocol
    ///
    /// The rule is a regular expression matched in full against the
    /// upper-case hex ATR. Syntax is only checked when the rule is used.
    pub fn with_protocol_rule(mut self, protocol: impl Into<String>, rule: impl Into<String>) -> Self {
        self.protocol_rules
            .insert(protocol.into(), PatternRule::new(rule));
        self
    }

    /// Drop every protocol rule
    pub fn without_protocol_rules(mut self) -> Self {
        self.protocol_rules.clear();
        self
    }

    /// Set the reader name filter for contactless readers
    pub fn with_contactless_reader_filter(mut self, filter: impl Into<String>) -> Self {
        self.contactless_filter = Some(PatternRule::new(filter));
        self
    }

    /// Set the reader name filter for contact readers
    pub fn with_contact_reader_filter(mut self, filter: impl Into<String>) -> Self {
        self.contact_filter = Some(PatternRule::new(filter));
        self
    }

    /// Plugin name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// ATR rule of a logical protocol
    pub fn protocol_rule(&self, protocol: &str) -> Option<&str> {
        self.protocol_rules.get(protocol).map(PatternRule::pattern)
    }

    pub(crate) fn protocol_pattern(&self, protocol: &str) -> Option<&PatternRule> {
        self.protocol_rules.get(protocol)
    }

    /// Logical protocols with a rule, in name order
    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.protocol_rules.keys().map(String::as_str)
    }

    /// Reader type deduced from a reader name
    ///
    /// The contactless filter is tried first. `None` when neither filter
    /// matches.
    pub fn is_contactless_reader(&self, reader_name: &str) -> Result<Option<bool>> {
        if let Some(filter) = &self.contactless_filter {
            if filter.matches("contactless reader filter", reader_name)? {
                return Ok(Some(true));
            }
        }
        if let Some(filter) = &self.contact_filter {
            if filter.matches("contact reader filter", reader_name)? {
                return Ok(Some(false));
            }
        }
        Ok(None)
    }
}

/// Plugin owning a PC/SC context
#[allow(missing_debug_implementations)]
pub struct PcscPlugin {
    /// PC/SC context
    context: Context,
    /// Settings handed to every reader
    config: Arc<PluginConfig>,
}

impl PcscPlugin {
    /// Create a plugin with the standard configuration
    pub fn new() -> Result<Self> {
        Self::with_config(PluginConfig::default())
    }

    /// Create a plugin with a custom configuration
    pub fn with_config(config: PluginConfig) -> Result<Self> {
        let context = Context::establish(Scope::User)?;
        debug!("PC/SC context established for {}", config.name());
        Ok(Self {
            context,
            config: Arc::new(config),
        })
    }

    /// Plugin name
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Settings shared with the readers
    pub const fn config(&self) -> &Arc<PluginConfig> {
        &self.config
    }

    /// Names of the connected readers
    pub fn reader_names(&self) -> Result<Vec<String>> {
        let readers = match self.context.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Err(ReaderError::NoReadersAvailable),
            Err(e) => return Err(e.into()),
        };

        Ok(readers
            .iter()
            .map(|r| r.to_string_lossy().into_owned())
            .collect())
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<ReaderInfo>> {
        let readers = match self.context.list_readers_owned() {
            Ok(readers) if !readers.is_empty() => readers,
            Ok(_) | Err(pcsc::Error::NoReadersAvailable) => {
                return Err(ReaderError::NoReadersAvailable);
            }
            Err(e) => return Err(e.into()),
        };

        let mut result = Vec::with_capacity(readers.len());
        for reader_name in readers {
            let name = reader_name.to_string_lossy().into_owned();
            let contactless = self.config.is_contactless_reader(&name)?;

            let mut reader_states = [ReaderState::new(reader_name, State::UNAWARE)];
            match self.context.get_status_change(None, &mut reader_states) {
                Ok(()) => result.push(ReaderInfo::from_reader_state(&reader_states[0], contactless)),
                // If we can't get status, assume no card
                Err(_) => result.push(ReaderInfo::new(name, false, None, contactless)),
            }
        }

        Ok(result)
    }

    /// First reader holding a card
    pub fn find_reader_with_card(&self) -> Result<ReaderInfo> {
        self.list_readers()?
            .into_iter()
            .find(ReaderInfo::has_card)
            .ok_or_else(|| ReaderError::ReaderNotFound("no reader with a card".to_string()))
    }

    /// Create an adapter for the named reader
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscReaderAdapter<PcscTerminal>> {
        self.open_reader_with_config(reader_name, ReaderConfig::default())
    }

    /// Create an adapter for the named reader with a custom configuration
    pub fn open_reader_with_config(
        &self,
        reader_name: &str,
        config: ReaderConfig,
    ) -> Result<PcscReaderAdapter<PcscTerminal>> {
        if !self.reader_names()?.iter().any(|name| name == reader_name) {
            return Err(ReaderError::ReaderNotFound(reader_name.to_string()));
        }

        let terminal = PcscTerminal::new(self.context.clone(), reader_name)
            .map_err(|e| ReaderError::communication(reader_name, e))?;
        PcscReaderAdapter::with_config(terminal, Arc::clone(&self.config), config)
    }
}
