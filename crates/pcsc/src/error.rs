//! Error types for PC/SC readers

use thiserror::Error;

/// Result type for reader operations
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Failures reported by the device binding
#[derive(Debug, Error)]
pub enum TerminalError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Other device failure
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the reader adapter
#[derive(Debug, Error)]
pub enum ReaderError {
    /// An operation needing an open physical channel was called while closed
    #[error("Physical channel is not open on reader: {0}")]
    ChannelNotOpen(String),

    /// The device reported a failure
    #[error("Communication failure with reader {reader}: {source}")]
    Communication {
        /// Reader name
        reader: String,
        /// Device failure
        #[source]
        source: TerminalError,
    },

    /// The logical protocol has no matching rule for this reader class
    #[error("Protocol not supported by reader: {0}")]
    UnsupportedProtocol(String),

    /// A stored protocol or reader filter rule is not a valid regular expression
    #[error("Invalid pattern for {rule}: {source}")]
    PatternSyntax {
        /// Name of the rule holding the pattern
        rule: String,
        /// Parser error
        #[source]
        source: regex::Error,
    },

    /// A configuration value is outside of its domain
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An empty command was given for transmission
    #[error("Empty APDU command")]
    EmptyApdu,

    /// PC/SC context error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),
}

impl ReaderError {
    /// Wrap a device failure for the given reader
    pub(crate) fn communication(reader: &str, source: TerminalError) -> Self {
        Self::Communication {
            reader: reader.to_string(),
            source,
        }
    }
}
