//! Core RDF data structures used by the cache and the connection layer

use std::fmt;

/// Datatype applied to literals that carry neither a language tag nor a datatype.
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// Well-known identifier for the default graph.
///
/// A triple scoped to this context lands in the same partition as a triple
/// with no context at all.
pub const DEFAULT_GRAPH_IRI: &str = "http://rdf4j.org/schema/rdf4j#nil";

/// Subject or context of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Iri(String),
    Blank(String),
}

impl Resource {
    pub fn iri(iri: impl Into<String>) -> Self {
        Resource::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Resource::Blank(label.into())
    }
}

/// Literal value with at most one of a datatype or a language tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal {
    value: String,
    kind: LiteralKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    /// Plain string, rendered as `xsd:string`
    Simple,
    Typed(String),
    LanguageTagged(String),
}

impl Literal {
    pub fn simple(value: impl Into<String>) -> Self {
        Self { value: value.into(), kind: LiteralKind::Simple }
    }

    /// Typed literal. `xsd:string` collapses to a plain literal since RDF
    /// treats both as the same value.
    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        let datatype = datatype.into();
        let kind = if datatype == XSD_STRING {
            LiteralKind::Simple
        } else {
            LiteralKind::Typed(datatype)
        };
        Self { value: value.into(), kind }
    }

    pub fn language_tagged(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: LiteralKind::LanguageTagged(language.into()),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> &LiteralKind {
        &self.kind
    }

    pub fn datatype(&self) -> Option<&str> {
        match &self.kind {
            LiteralKind::Typed(datatype) => Some(datatype),
            _ => None,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match &self.kind {
            LiteralKind::LanguageTagged(language) => Some(language),
            _ => None,
        }
    }
}

/// Object position of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

impl Value {
    pub fn iri(iri: impl Into<String>) -> Self {
        Value::Iri(iri.into())
    }

    pub fn literal(literal: Literal) -> Self {
        Value::Literal(literal)
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        match resource {
            Resource::Iri(iri) => Value::Iri(iri),
            Resource::Blank(label) => Value::Blank(label),
        }
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        Value::Literal(literal)
    }
}

/// A statement, optionally scoped to a context (named graph)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: Resource,
    pub predicate: String,
    pub object: Value,
    pub context: Option<Resource>,
}

impl Triple {
    pub fn new(
        subject: Resource,
        predicate: impl Into<String>,
        object: impl Into<Value>,
        context: Option<Resource>,
    ) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object: object.into(),
            context,
        }
    }

    /// One triple per context, or a single unscoped triple when `contexts` is empty.
    pub fn expand(
        subject: &Resource,
        predicate: &str,
        object: &Value,
        contexts: &[Resource],
    ) -> Vec<Triple> {
        if contexts.is_empty() {
            return vec![Triple::new(subject.clone(), predicate, object.clone(), None)];
        }
        contexts
            .iter()
            .map(|context| {
                Triple::new(subject.clone(), predicate, object.clone(), Some(context.clone()))
            })
            .collect()
    }

    pub fn partition(&self) -> Partition {
        Partition::of(self.context.as_ref())
    }
}

/// Flush partition a triple belongs to.
///
/// "No context" and [`DEFAULT_GRAPH_IRI`] are the same partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Partition {
    Default,
    Named(Resource),
}

impl Partition {
    pub fn of(context: Option<&Resource>) -> Self {
        match context {
            None => Partition::Default,
            Some(Resource::Iri(iri)) if iri == DEFAULT_GRAPH_IRI => Partition::Default,
            Some(resource) => Partition::Named(resource.clone()),
        }
    }

    /// Partitions touched by an operation given its context list; an empty
    /// list means the default graph.
    pub fn all_of(contexts: &[Resource]) -> Vec<Partition> {
        if contexts.is_empty() {
            return vec![Partition::Default];
        }
        let mut partitions = Vec::with_capacity(contexts.len());
        for context in contexts {
            let partition = Partition::of(Some(context));
            if !partitions.contains(&partition) {
                partitions.push(partition);
            }
        }
        partitions
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Iri(iri) => write!(f, "<{}>", iri),
            Resource::Blank(label) => write!(f, "_:{}", label),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Default => write!(f, "default"),
            Partition::Named(resource) => write!(f, "{}", resource),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_graph_iri_shares_partition_with_no_context() {
        let explicit = Partition::of(Some(&Resource::iri(DEFAULT_GRAPH_IRI)));
        assert_eq!(explicit, Partition::Default);
        assert_eq!(Partition::of(None), Partition::Default);
        assert_eq!(
            Partition::of(Some(&Resource::iri("http://example.org/g"))),
            Partition::Named(Resource::iri("http://example.org/g"))
        );
    }

    #[test]
    fn test_xsd_string_collapses_to_simple() {
        assert_eq!(Literal::typed("a", XSD_STRING), Literal::simple("a"));
        assert_eq!(Literal::typed("a", XSD_STRING).datatype(), None);
    }

    #[test]
    fn test_language_and_datatype_are_exclusive() {
        let tagged = Literal::language_tagged("chat", "fr");
        assert_eq!(tagged.language(), Some("fr"));
        assert_eq!(tagged.datatype(), None);

        let typed = Literal::typed("1", "http://www.w3.org/2001/XMLSchema#integer");
        assert_eq!(typed.language(), None);
        assert!(typed.datatype().is_some());
    }

    #[test]
    fn test_all_of_dedupes_partitions() {
        let g = Resource::iri("http://example.org/g");
        let partitions =
            Partition::all_of(&[g.clone(), Resource::iri(DEFAULT_GRAPH_IRI), g.clone()]);
        assert_eq!(partitions, vec![Partition::Named(g), Partition::Default]);
        assert_eq!(Partition::all_of(&[]), vec![Partition::Default]);
    }
}
