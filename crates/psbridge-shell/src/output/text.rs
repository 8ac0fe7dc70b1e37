//! Parser for the shell's scraped console layouts.
//!
//! The console renders results in one of two tabular layouts. Short form is
//! a header line, a dash-run separator, and one whitespace-separated value
//! row per record. Long form is `key : value` lines, one record per
//! blank-line-separated block, with nested objects announced by a
//! class-marker value and an indented sub-block. Everything scraped this way
//! is a string; the layout carries no type information.

use psbridge_core::{Record, Value};

use crate::error::ParseError;

use super::{CommandOutput, OutputStrategy};

pub struct TextOutput;

impl OutputStrategy for TextOutput {
    fn render_pipeline(&self) -> &'static str {
        "Out-Host -InputObject $result"
    }

    fn parse(&self, raw: &str) -> Result<CommandOutput, ParseError> {
        parse_text(raw)
    }
}

/// Classify the captured text and parse it with the matching grammar.
pub fn parse_text(raw: &str) -> Result<CommandOutput, ParseError> {
    // Keep original 1-based line numbers for error reporting.
    let lines: Vec<(usize, &str)> = raw
        .lines()
        .enumerate()
        .map(|(ix, line)| (ix + 1, line.trim_end()))
        .collect();
    let nonblank: Vec<(usize, &str)> = lines
        .iter()
        .copied()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    if nonblank.is_empty() {
        return Ok(CommandOutput::Records(Vec::new()));
    }
    if nonblank.len() == 1 && !has_separator(nonblank[0].1) {
        // A lone unstructured line is an opaque payload, not a layout.
        return Ok(CommandOutput::Text(nonblank[0].1.trim().to_owned()));
    }
    if nonblank.len() >= 2 {
        let header_fields = nonblank[0].1.split_whitespace().count();
        if is_dash_separator(nonblank[1].1, header_fields) {
            return parse_short_form(&nonblank).map(CommandOutput::Records);
        }
    }
    parse_long_form(&lines).map(CommandOutput::Records)
}

fn has_separator(line: &str) -> bool {
    line.contains(" : ") || line.trim_end().ends_with(" :")
}

/// A dash-run separator has one all-dash token per header field.
fn is_dash_separator(line: &str, field_count: usize) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    !tokens.is_empty()
        && tokens.len() == field_count
        && tokens
            .iter()
            .all(|token| token.chars().all(|c| c == '-'))
}

// ---------------------------------------------------------------------------
// Short form
// ---------------------------------------------------------------------------

fn parse_short_form(nonblank: &[(usize, &str)]) -> Result<Vec<Record>, ParseError> {
    let fields: Vec<&str> = nonblank[0].1.split_whitespace().collect();
    let mut records = Vec::new();
    for &(line_num, line) in &nonblank[2..] {
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() != fields.len() {
            return Err(ParseError::new(
                line_num,
                format!(
                    "short-form row has {} values for {} header fields",
                    values.len(),
                    fields.len()
                ),
            ));
        }
        let record = fields
            .iter()
            .zip(&values)
            .map(|(name, value)| ((*name).to_owned(), Value::from(*value)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Long form
// ---------------------------------------------------------------------------

/// One open nesting level. The root frame of each block has no opened key.
struct Frame {
    key_indent: usize,
    opened_key: Option<String>,
    record: Record,
    /// Column where the last scalar value started; continuation lines must
    /// land exactly there.
    last_value_col: Option<usize>,
}

impl Frame {
    fn open(key_indent: usize, opened_key: Option<String>) -> Self {
        Self {
            key_indent,
            opened_key,
            record: Record::new(),
            last_value_col: None,
        }
    }
}

/// A class-marker field waiting for its indented sub-block.
struct PendingNested {
    key: String,
    key_indent: usize,
    line_num: usize,
}

impl PendingNested {
    fn unterminated(self) -> ParseError {
        ParseError::new(
            self.line_num,
            format!("nested object '{}' has no fields", self.key),
        )
    }
}

fn parse_long_form(lines: &[(usize, &str)]) -> Result<Vec<Record>, ParseError> {
    let mut records = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();
    let mut pending: Option<PendingNested> = None;

    for &(line_num, line) in lines {
        if line.trim().is_empty() {
            if let Some(open) = pending.take() {
                return Err(open.unterminated());
            }
            flush(&mut frames, &mut records);
            continue;
        }
        let indent = line.len() - line.trim_start().len();

        if let Some(open) = pending.take() {
            // The first line after a class marker must open the sub-block.
            if indent <= open.key_indent {
                return Err(open.unterminated());
            }
            frames.push(Frame::open(indent, Some(open.key)));
        } else if frames.is_empty() {
            frames.push(Frame::open(indent, None));
        } else {
            let top_indent = frames.last().map(|f| f.key_indent).unwrap_or(0);
            if indent > top_indent {
                let at_value_col = frames
                    .last()
                    .is_some_and(|f| f.last_value_col == Some(indent));
                if at_value_col {
                    if let Some(top) = frames.last_mut() {
                        append_continuation(top, &line[indent..], line_num)?;
                    }
                    continue;
                }
                return Err(ParseError::new(
                    line_num,
                    format!("unexpected indentation at column {indent}"),
                ));
            }
            while frames.len() > 1
                && frames.last().is_some_and(|f| indent < f.key_indent)
            {
                pop_frame(&mut frames);
            }
            if !frames.last().is_some_and(|f| f.key_indent == indent) {
                return Err(ParseError::new(
                    line_num,
                    "indentation does not match any open record",
                ));
            }
        }

        if let Some(top) = frames.last_mut() {
            parse_field(top, line, indent, line_num, &mut pending)?;
        }
    }

    if let Some(open) = pending {
        return Err(open.unterminated());
    }
    flush(&mut frames, &mut records);
    Ok(records)
}

fn parse_field(
    frame: &mut Frame,
    line: &str,
    indent: usize,
    line_num: usize,
    pending: &mut Option<PendingNested>,
) -> Result<(), ParseError> {
    let body = &line[indent..];
    let Some(colon) = body.find(':') else {
        return Err(ParseError::new(line_num, "expected a 'key : value' line"));
    };
    let key = body[..colon].trim_end();
    if key.is_empty() {
        return Err(ParseError::new(line_num, "field line with empty key"));
    }
    let value = body[colon + 1..].trim();

    if is_class_marker(value) {
        *pending = Some(PendingNested {
            key: key.to_owned(),
            key_indent: indent,
            line_num,
        });
        frame.last_value_col = None;
        return Ok(());
    }

    frame.record.insert(key, value);
    // Continuations must land where the value text actually started, however
    // much padding the renderer put after the colon.
    frame.last_value_col = body[colon + 1..]
        .find(|c: char| !c.is_whitespace())
        .map(|offset| indent + colon + 1 + offset);
    Ok(())
}

/// A value that announces a nested object instead of carrying data:
/// dotted identifier segments, each starting with a letter, with at least
/// one uppercase letter overall. Dotted hostnames, IPs and version strings
/// all fail this test and stay plain strings.
fn is_class_marker(value: &str) -> bool {
    if !value.contains('.') || !value.chars().any(|c| c.is_ascii_uppercase()) {
        return false;
    }
    value.split('.').all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn append_continuation(
    frame: &mut Frame,
    text: &str,
    line_num: usize,
) -> Result<(), ParseError> {
    match frame.record.last_value_mut() {
        Some(Value::Str(existing)) => {
            existing.push_str(text);
            Ok(())
        }
        _ => Err(ParseError::new(
            line_num,
            "continuation line without a preceding value",
        )),
    }
}

/// Fold a finished frame's record into its parent as a nested value.
fn pop_frame(frames: &mut Vec<Frame>) {
    let Some(frame) = frames.pop() else { return };
    if let (Some(key), Some(parent)) = (frame.opened_key, frames.last_mut()) {
        parent.record.insert(key, Value::Record(frame.record));
        parent.last_value_col = None;
    }
}

/// Close all open frames and emit the completed record, if any.
fn flush(frames: &mut Vec<Frame>, records: &mut Vec<Record>) {
    while frames.len() > 1 {
        pop_frame(frames);
    }
    if let Some(root) = frames.pop() {
        if !root.record.is_empty() {
            records.push(root.record);
        }
    }
}
