//! Parser for the shell's unstructured failure text.
//!
//! A failed command prints a free-form message followed by a positional
//! marker line (`At line:1 char:...`) and a block of `+ Name : value`
//! properties. Two properties matter: the category and the fully-qualified
//! error id. Long property values wrap onto indented continuation lines.

use psbridge_core::ExecutionError;

use crate::error::ParseError;

/// Marker line ending the message region.
const MESSAGE_END_PREFIX: &str = "At line:";

const CATEGORY_PROPERTY: &str = "CategoryInfo";
const ID_PROPERTY: &str = "FullyQualifiedErrorId";

/// Which property the next continuation line extends.
enum Current {
    None,
    Category,
    Id,
    Skipped,
}

pub fn parse_error_text(raw: &str) -> Result<ExecutionError, ParseError> {
    let mut message_parts: Vec<&str> = Vec::new();
    let mut category = String::new();
    let mut id = String::new();
    let mut current = Current::None;
    let mut in_properties = false;

    for (ix, line) in raw.lines().enumerate() {
        let line_num = ix + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            // A blank line ends the property block; anything after it is
            // console noise.
            if in_properties {
                break;
            }
            continue;
        }

        if !in_properties {
            message_parts.push(trimmed);
            if trimmed.starts_with(MESSAGE_END_PREFIX) {
                in_properties = true;
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('+') {
            let rest = rest.trim_start();
            match rest.find(':') {
                Some(colon) => {
                    let name = rest[..colon].trim();
                    let value = rest[colon + 1..].trim().to_owned();
                    match name {
                        CATEGORY_PROPERTY => {
                            category = value;
                            current = Current::Category;
                        }
                        ID_PROPERTY => {
                            id = value;
                            current = Current::Id;
                        }
                        // The echoed command line and other properties.
                        _ => current = Current::Skipped,
                    }
                }
                None => current = Current::Skipped,
            }
            continue;
        }

        if line.starts_with([' ', '\t']) {
            // Wrapped property value; the console broke it, so the pieces
            // concatenate without a separator.
            match current {
                Current::Category => category.push_str(trimmed),
                Current::Id => id.push_str(trimmed),
                Current::Skipped => {}
                Current::None => {
                    return Err(ParseError::new(
                        line_num,
                        "property continuation before any property",
                    ));
                }
            }
            continue;
        }

        return Err(ParseError::new(
            line_num,
            format!("unrecognized line in error text: {trimmed:?}"),
        ));
    }

    if category.is_empty() && id.is_empty() {
        return Err(ParseError::new(
            raw.lines().count().max(1),
            "error text ended before any property was read",
        ));
    }

    Ok(ExecutionError {
        message: message_parts.join(" "),
        category,
        id,
    })
}
