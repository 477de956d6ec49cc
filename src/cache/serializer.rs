//! Renders buffered triples into a single SPARQL update statement.
//!
//! Every flush produces exactly one `INSERT DATA` or `DELETE DATA` operation:
//! bare triples for the default-graph partition followed by one `GRAPH`
//! block per named context. Terms are validated here so that a malformed IRI
//! fails the flush before anything reaches the network.

use std::fmt::Write as _;

use oxigraph::model::{BlankNode, NamedNode};

use super::buffer::MutationBuffer;
use crate::core::{Literal, LiteralKind, Partition, Resource, Triple, Value, XSD_STRING};
use crate::error::CacheError;

/// SPARQL update form used for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateVerb {
    Insert,
    Delete,
}

impl UpdateVerb {
    pub fn keyword(&self) -> &'static str {
        match self {
            UpdateVerb::Insert => "INSERT DATA",
            UpdateVerb::Delete => "DELETE DATA",
        }
    }
}

/// Strategy that turns the buffer into one update statement.
///
/// The write and delete caches share all scheduling and flushing logic and
/// differ only in the renderer they are built with.
pub trait BatchRenderer: Send + Sync + 'static {
    fn verb(&self) -> UpdateVerb;

    fn render(&self, buffer: &MutationBuffer) -> Result<String, CacheError> {
        render_batch(self.verb(), buffer)
    }
}

/// Renders additions as `INSERT DATA`
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertData;

/// Renders removals as `DELETE DATA`
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteData;

impl BatchRenderer for InsertData {
    fn verb(&self) -> UpdateVerb {
        UpdateVerb::Insert
    }
}

impl BatchRenderer for DeleteData {
    fn verb(&self) -> UpdateVerb {
        UpdateVerb::Delete
    }
}

/// Renders the whole buffer as one update. The buffer must not be empty.
pub fn render_batch(verb: UpdateVerb, buffer: &MutationBuffer) -> Result<String, CacheError> {
    if buffer.is_empty() {
        return Err(CacheError::Serialization("cannot render an empty batch".to_string()));
    }

    let mut out = String::with_capacity(buffer.len() * 96);
    out.push_str(verb.keyword());
    out.push_str(" {\n");

    let mut partitions = buffer.contexts();
    // Default-graph triples first, named graphs keep first-seen order.
    partitions.sort_by_key(|partition| !matches!(partition, Partition::Default));

    for partition in &partitions {
        match partition {
            Partition::Default => {
                for triple in buffer.filter(partition) {
                    out.push_str("  ");
                    write_triple(&mut out, verb, triple)?;
                }
            }
            Partition::Named(context) => {
                let graph = render_context(context)?;
                let _ = writeln!(out, "  GRAPH {} {{", graph);
                for triple in buffer.filter(partition) {
                    out.push_str("    ");
                    write_triple(&mut out, verb, triple)?;
                }
                out.push_str("  }\n");
            }
        }
    }

    out.push('}');
    Ok(out)
}

/// Checks that `triple` can be rendered under `verb`, without building the text.
pub fn validate_triple(verb: UpdateVerb, triple: &Triple) -> Result<(), CacheError> {
    render_resource(&triple.subject, verb)?;
    render_iri(&triple.predicate)?;
    render_value(&triple.object, verb)?;
    if let Partition::Named(context) = triple.partition() {
        render_context(&context)?;
    }
    Ok(())
}

fn write_triple(out: &mut String, verb: UpdateVerb, triple: &Triple) -> Result<(), CacheError> {
    let subject = render_resource(&triple.subject, verb)?;
    let predicate = render_iri(&triple.predicate)?;
    let object = render_value(&triple.object, verb)?;
    let _ = writeln!(out, "{} {} {} .", subject, predicate, object);
    Ok(())
}

fn render_context(context: &Resource) -> Result<String, CacheError> {
    match context {
        Resource::Iri(iri) => render_iri(iri),
        Resource::Blank(label) => Err(CacheError::Serialization(format!(
            "blank node _:{} cannot name a graph in an update",
            label
        ))),
    }
}

fn render_resource(resource: &Resource, verb: UpdateVerb) -> Result<String, CacheError> {
    match resource {
        Resource::Iri(iri) => render_iri(iri),
        Resource::Blank(label) => render_blank(label, verb),
    }
}

/// Renders an object term.
pub fn render_value(value: &Value, verb: UpdateVerb) -> Result<String, CacheError> {
    match value {
        Value::Iri(iri) => render_iri(iri),
        Value::Blank(label) => render_blank(label, verb),
        Value::Literal(literal) => render_literal(literal),
    }
}

/// Renders an IRI as `<iri>` after validating it.
pub fn render_iri(iri: &str) -> Result<String, CacheError> {
    NamedNode::new(iri)
        .map(|node| format!("<{}>", node.as_str()))
        .map_err(|e| CacheError::Serialization(format!("invalid IRI <{}>: {}", iri, e)))
}

fn render_blank(label: &str, verb: UpdateVerb) -> Result<String, CacheError> {
    if verb == UpdateVerb::Delete {
        return Err(CacheError::Serialization(format!(
            "blank node _:{} is not allowed in DELETE DATA",
            label
        )));
    }
    BlankNode::new(label)
        .map(|node| format!("_:{}", node.as_str()))
        .map_err(|e| CacheError::Serialization(format!("invalid blank node _:{}: {}", label, e)))
}

/// Language tag wins over datatype; a plain literal gets `xsd:string`.
pub fn render_literal(literal: &Literal) -> Result<String, CacheError> {
    let value = escape_string(literal.value());
    match literal.kind() {
        LiteralKind::LanguageTagged(language) => {
            oxigraph::model::Literal::new_language_tagged_literal(literal.value(), language)
                .map_err(|e| {
                    CacheError::Serialization(format!("invalid language tag @{}: {}", language, e))
                })?;
            Ok(format!("\"{}\"@{}", value, language))
        }
        LiteralKind::Typed(datatype) => {
            let datatype = NamedNode::new(datatype.as_str()).map_err(|e| {
                CacheError::Serialization(format!("invalid datatype IRI <{}>: {}", datatype, e))
            })?;
            Ok(format!("\"{}\"^^<{}>", value, datatype.as_str()))
        }
        LiteralKind::Simple => Ok(format!("\"{}\"^^<{}>", value, XSD_STRING)),
    }
}

/// Escapes a lexical form for a double-quoted SPARQL string.
pub fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\u{08}' => escaped.push_str("\\b"),
            '\u{0C}' => escaped.push_str("\\f"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders one triple as an N-Quads line, used for exports.
pub fn render_nquad(triple: &Triple) -> Result<String, CacheError> {
    let subject = render_resource(&triple.subject, UpdateVerb::Insert)?;
    let predicate = render_iri(&triple.predicate)?;
    let object = match &triple.object {
        Value::Literal(literal) if literal.kind() == &LiteralKind::Simple => {
            format!("\"{}\"", escape_string(literal.value()))
        }
        other => render_value(other, UpdateVerb::Insert)?,
    };
    match triple.partition() {
        Partition::Default => Ok(format!("{} {} {} .", subject, predicate, object)),
        Partition::Named(context) => Ok(format!(
            "{} {} {} {} .",
            subject,
            predicate,
            object,
            render_resource(&context, UpdateVerb::Insert)?
        )),
    }
}
