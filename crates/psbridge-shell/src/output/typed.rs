//! Parser for the self-describing type-tagged XML layout.
//!
//! The shell serializes `$result` with `ConvertTo-Xml`, producing an
//! `<Objects>` document whose elements carry `Type` attributes. Tags drive
//! coercion into typed values, so this layout survives round trips the
//! scraped console layouts cannot.

use psbridge_core::{Record, Value};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ParseError;

use super::{CommandOutput, OutputStrategy};

pub struct TypedOutput;

impl OutputStrategy for TypedOutput {
    fn render_pipeline(&self) -> &'static str {
        "ConvertTo-Xml -InputObject $result -As String -Depth 5"
    }

    fn parse(&self, raw: &str) -> Result<CommandOutput, ParseError> {
        parse_typed(raw)
    }
}

/// Version components in field order.
const VERSION_FIELDS: [&str; 4] = ["Major", "Minor", "Build", "Revision"];

pub fn parse_typed(raw: &str) -> Result<CommandOutput, ParseError> {
    // Commands may print free text before the document starts.
    let Some(start) = raw.find("<?xml").or_else(|| raw.find("<Objects")) else {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(CommandOutput::Records(Vec::new()));
        }
        return Ok(CommandOutput::Text(trimmed.to_owned()));
    };

    // The console hard-wraps long lines; heal the document before parsing.
    let xml: String = raw[start..]
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();

    // The healed document is one logical line; report every fault at the
    // line where the document started in the raw capture.
    let doc_line = raw[..start].matches('\n').count() + 1;
    let at_doc = |err: ParseError| ParseError::new(doc_line, err.detail);

    let root = build_tree(&xml).map_err(at_doc)?;
    if root.tag != "Objects" {
        return Err(ParseError::new(
            doc_line,
            format!("expected <Objects> document root, found <{}>", root.tag),
        ));
    }

    // A collection result arrives wrapped in one array object; unwrap it so
    // callers always see a flat object list.
    let objects: &[Node] = match root.children.first() {
        Some(first)
            if root.children.len() == 1
                && (first.type_tag.is_empty() || first.type_tag == "System.Object[]")
                && !first.children.is_empty() =>
        {
            &first.children
        }
        _ => &root.children,
    };

    let mut records = Vec::new();
    for object in objects {
        match convert_node(object).map_err(at_doc)? {
            Value::Record(record) => records.push(record),
            other => {
                // Scalar results still come back as one record.
                let mut record = Record::new();
                record.insert("Value", other);
                records.push(record);
            }
        }
    }
    Ok(CommandOutput::Records(records))
}

// ---------------------------------------------------------------------------
// Document tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Node {
    tag: String,
    type_tag: String,
    name: Option<String>,
    text: String,
    children: Vec<Node>,
}

fn build_tree(xml: &str) -> Result<Node, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref element)) => {
                stack.push(node_from_element(element)?);
            }
            Ok(Event::Empty(ref element)) => {
                let node = node_from_element(element)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Ok(Event::Text(ref text)) => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| ParseError::new(1, format!("bad xml text: {e}")))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&unescaped);
                }
            }
            Ok(Event::End(_)) => {
                let Some(finished) = stack.pop() else {
                    return Err(ParseError::new(1, "unbalanced xml end tag"));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(finished),
                    None => return Ok(finished),
                }
            }
            Ok(Event::Eof) => {
                return Err(ParseError::new(1, "truncated xml document"));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(ParseError::new(
                    1,
                    format!("xml error at offset {}: {e}", reader.buffer_position()),
                ));
            }
        }
    }
}

fn node_from_element(
    element: &quick_xml::events::BytesStart<'_>,
) -> Result<Node, ParseError> {
    let mut node = Node {
        tag: String::from_utf8_lossy(element.name().as_ref()).into_owned(),
        ..Node::default()
    };
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ParseError::new(1, format!("bad xml attribute: {e}")))?;
        let value = attr
            .unescape_value()
            .map_err(|e| ParseError::new(1, format!("bad xml attribute value: {e}")))?
            .into_owned();
        match attr.key.as_ref() {
            b"Type" => node.type_tag = value,
            b"Name" => node.name = Some(value),
            _ => {}
        }
    }
    Ok(node)
}

// ---------------------------------------------------------------------------
// Tag-driven coercion
// ---------------------------------------------------------------------------

fn convert_node(node: &Node) -> Result<Value, ParseError> {
    let type_tag = node.type_tag.as_str();
    match type_tag {
        "System.Int32" | "System.Int64" => {
            node.text.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                ParseError::new(1, format!("invalid integer value {:?}", node.text))
            })
        }
        "System.Boolean" => Ok(Value::Bool(node.text.trim() == "True")),
        "System.String" => Ok(Value::Str(node.text.clone())),
        "System.Version" => convert_version(node.text.trim()),
        _ if type_tag.ends_with("[]") => {
            let items = node
                .children
                .iter()
                .map(convert_node)
                .collect::<Result<Vec<Value>, ParseError>>()?;
            Ok(Value::List(items))
        }
        // Other framework scalars pass through as strings.
        _ if type_tag.starts_with("System.") && node.children.is_empty() => {
            Ok(Value::Str(node.text.clone()))
        }
        // A product type: named properties become record fields.
        _ if !node.children.is_empty()
            && node.children.iter().all(|child| child.name.is_some()) =>
        {
            let mut record = Record::new();
            for child in &node.children {
                let name = child.name.clone().unwrap_or_default();
                record.insert(name, convert_node(child)?);
            }
            Ok(Value::Record(record))
        }
        // A wrapper with a single anonymous child carries no data of its own.
        _ if node.children.len() == 1 => convert_node(&node.children[0]),
        "" => Ok(Value::Str(node.text.clone())),
        _ => Err(ParseError::new(
            1,
            format!("unknown type tag {type_tag:?}"),
        )),
    }
}

/// `System.Version` renders as dotted components; expose them as a record
/// so callers can compare fields without re-parsing.
fn convert_version(text: &str) -> Result<Value, ParseError> {
    let mut record = Record::new();
    for (component, field) in text.split('.').zip(VERSION_FIELDS) {
        let number = component.parse::<i64>().map_err(|_| {
            ParseError::new(1, format!("invalid version string {text:?}"))
        })?;
        record.insert(field, number);
    }
    if record.is_empty() {
        return Err(ParseError::new(1, "empty version string"));
    }
    Ok(Value::Record(record))
}
