//! Output-parsing strategies for the success path.
//!
//! A session owns exactly one strategy, fixed at construction. The strategy
//! contributes the pipeline fragment that serializes `$result` inside the
//! framed script, and parses the captured text back into records.

pub mod text;
pub mod typed;

use psbridge_core::Record;

use crate::error::ParseError;

/// Parsed result of a successful command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// Ordered records parsed from a recognized layout. Empty output
    /// parses as zero records.
    Records(Vec<Record>),
    /// A single opaque line that is not a record layout, passed through
    /// verbatim.
    Text(String),
}

impl CommandOutput {
    pub fn records(&self) -> &[Record] {
        match self {
            CommandOutput::Records(records) => records,
            CommandOutput::Text(_) => &[],
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            CommandOutput::Records(records) => records,
            CommandOutput::Text(_) => Vec::new(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CommandOutput::Text(text) => Some(text),
            CommandOutput::Records(_) => None,
        }
    }
}

/// One of the shell's output layouts.
pub trait OutputStrategy: Send {
    /// Pipeline fragment spliced into the framed script to serialize
    /// `$result`.
    fn render_pipeline(&self) -> &'static str;

    /// Parse the captured success-path text.
    fn parse(&self, raw: &str) -> Result<CommandOutput, ParseError>;
}

/// Selects which [`OutputStrategy`] a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// Scraped console formatting, short and long form. The default.
    #[default]
    Text,
    /// Self-describing type-tagged XML serialization.
    Typed,
}

impl OutputLayout {
    pub fn strategy(self) -> Box<dyn OutputStrategy> {
        match self {
            OutputLayout::Text => Box::new(text::TextOutput),
            OutputLayout::Typed => Box::new(typed::TypedOutput),
        }
    }
}

impl std::str::FromStr for OutputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputLayout::Text),
            "typed" => Ok(OutputLayout::Typed),
            other => Err(format!("unknown output layout {other:?}, expected \"text\" or \"typed\"")),
        }
    }
}
