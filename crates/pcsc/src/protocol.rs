//! Logical protocol activation and ATR matching
//!
//! A logical protocol (a card technology such as `ISO_14443_4` or
//! `MIFARE_CLASSIC_1K`) is recognized by matching a regular expression
//! against the upper-case hex ATR of the inserted card. The rules belong to
//! the plugin; each reader only tracks which of them are active.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{ReaderError, Result};
use crate::plugin::PluginConfig;

/// Regular expression matched against a whole value
///
/// Compiled on first use and kept; a pattern that does not parse is
/// reported on every evaluation rather than treated as a non-match.
#[derive(Debug, Clone)]
pub(crate) struct PatternRule {
    pattern: String,
    compiled: OnceLock<std::result::Result<Regex, regex::Error>>,
}

impl PatternRule {
    pub(crate) fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            compiled: OnceLock::new(),
        }
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `value` matches in full; `rule` names the rule in errors
    pub(crate) fn matches(&self, rule: &str, value: &str) -> Result<bool> {
        let compiled = self
            .compiled
            .get_or_init(|| Regex::new(&format!("^(?:{})$", self.pattern)));
        match compiled {
            Ok(regex) => Ok(regex.is_match(value)),
            Err(source) => Err(ReaderError::PatternSyntax {
                rule: rule.to_string(),
                source: source.clone(),
            }),
        }
    }
}

impl PartialEq for PatternRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for PatternRule {}

/// Set of logical protocols activated on one reader
#[derive(Debug, Default, Clone)]
pub struct ProtocolResolver {
    active: BTreeSet<String>,
}

impl ProtocolResolver {
    /// Create a resolver with no active protocol
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the plugin holds a matching rule for `protocol`
    pub fn is_supported(plugin: &PluginConfig, protocol: &str) -> bool {
        plugin
            .protocol_rule(protocol)
            .is_some_and(|rule| !rule.is_empty())
    }

    /// Add `protocol` to the active set
    ///
    /// Fails without touching the active set when the protocol has no rule.
    pub fn activate(&mut self, plugin: &PluginConfig, protocol: &str) -> Result<()> {
        if !Self::is_supported(plugin, protocol) {
            return Err(ReaderError::UnsupportedProtocol(protocol.to_string()));
        }
        if self.active.insert(protocol.to_string()) {
            debug!("Protocol {} activated", protocol);
        }
        Ok(())
    }

    /// Remove `protocol` from the active set
    pub fn deactivate(&mut self, protocol: &str) {
        if self.active.remove(protocol) {
            debug!("Protocol {} deactivated", protocol);
        }
    }

    /// Whether `protocol` is in the active set
    pub fn is_active(&self, protocol: &str) -> bool {
        self.active.contains(protocol)
    }

    /// Active protocols, in name order
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    /// Whether `protocol` is active and its rule matches the given ATR
    ///
    /// `atr` is `None` when no card data is available, which never matches.
    pub fn is_current(
        &self,
        plugin: &PluginConfig,
        protocol: &str,
        atr: Option<&[u8]>,
    ) -> Result<bool> {
        let Some(atr) = atr else {
            return Ok(false);
        };
        if !self.is_active(protocol) {
            return Ok(false);
        }
        match plugin.protocol_pattern(protocol) {
            Some(rule) if !rule.pattern().is_empty() => {
                rule.matches(protocol, &hex::encode_upper(atr))
            }
            _ => Ok(false),
        }
    }
}
