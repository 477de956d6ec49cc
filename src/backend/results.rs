//! Decoding of `application/sparql-results+json` documents

use std::collections::HashMap;

use serde::Deserialize;

use super::Binding;
use crate::core::{Literal, Value};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct SparqlResponse {
    results: Option<SparqlResults>,
    boolean: Option<bool>,
}

#[derive(Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, JsonTerm>>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum JsonTerm {
    Uri {
        value: String,
    },
    Bnode {
        value: String,
    },
    Literal {
        value: String,
        #[serde(rename = "xml:lang")]
        language: Option<String>,
        datatype: Option<String>,
    },
    /// SPARQL 1.0 servers still emit this form
    TypedLiteral {
        value: String,
        datatype: String,
    },
}

impl From<JsonTerm> for Value {
    fn from(term: JsonTerm) -> Self {
        match term {
            JsonTerm::Uri { value } => Value::Iri(value),
            JsonTerm::Bnode { value } => Value::Blank(value),
            JsonTerm::Literal { value, language: Some(language), .. } => {
                Value::Literal(Literal::language_tagged(value, language))
            }
            JsonTerm::Literal { value, datatype: Some(datatype), .. }
            | JsonTerm::TypedLiteral { value, datatype } => {
                Value::Literal(Literal::typed(value, datatype))
            }
            JsonTerm::Literal { value, .. } => Value::Literal(Literal::simple(value)),
        }
    }
}

pub fn parse_select(json: &str) -> Result<Vec<Binding>> {
    let response: SparqlResponse = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("Failed to parse SELECT response: {e}")))?;
    let results = response
        .results
        .ok_or_else(|| Error::Query("response carries no result bindings".to_string()))?;

    Ok(results
        .bindings
        .into_iter()
        .map(|row| row.into_iter().map(|(var, term)| (var, term.into())).collect())
        .collect())
}

pub fn parse_ask(json: &str) -> Result<bool> {
    let response: SparqlResponse = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("Failed to parse ASK response: {e}")))?;
    response
        .boolean
        .ok_or_else(|| Error::Query("response carries no boolean".to_string()))
}

/// Reads an integer bound to `var` in the first solution, as produced by `COUNT`.
pub fn count_from(bindings: &[Binding], var: &str) -> Result<u64> {
    let Some(first) = bindings.first() else {
        return Ok(0);
    };
    match first.get(var) {
        Some(Value::Literal(literal)) => literal
            .value()
            .parse()
            .map_err(|e| Error::Query(format!("non-integer count {:?}: {}", literal.value(), e))),
        Some(other) => Err(Error::Query(format!("unexpected count term {:?}", other))),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_terms() {
        let json = r#"{
            "head": { "vars": ["s", "o", "l", "t"] },
            "results": { "bindings": [ {
                "s": { "type": "uri", "value": "http://example.org/s" },
                "o": { "type": "bnode", "value": "b1" },
                "l": { "type": "literal", "value": "chat", "xml:lang": "fr" },
                "t": { "type": "typed-literal", "value": "3",
                       "datatype": "http://www.w3.org/2001/XMLSchema#integer" }
            } ] }
        }"#;

        let bindings = parse_select(json).unwrap();
        assert_eq!(bindings.len(), 1);
        let row = &bindings[0];
        assert_eq!(row["s"], Value::iri("http://example.org/s"));
        assert_eq!(row["o"], Value::Blank("b1".to_string()));
        assert_eq!(row["l"], Value::Literal(Literal::language_tagged("chat", "fr")));
        assert_eq!(
            row["t"],
            Value::Literal(Literal::typed("3", "http://www.w3.org/2001/XMLSchema#integer"))
        );
    }

    #[test]
    fn test_xsd_string_literal_decodes_as_plain() {
        let json = r#"{ "head": {}, "results": { "bindings": [ {
            "v": { "type": "literal", "value": "x",
                   "datatype": "http://www.w3.org/2001/XMLSchema#string" }
        } ] } }"#;
        let bindings = parse_select(json).unwrap();
        assert_eq!(bindings[0]["v"], Value::Literal(Literal::simple("x")));
    }

    #[test]
    fn test_parse_ask() {
        assert!(parse_ask(r#"{ "head": {}, "boolean": true }"#).unwrap());
        assert!(parse_ask(r#"{ "head": {} }"#).is_err());
    }

    #[test]
    fn test_count_from() {
        let json = r#"{ "head": {}, "results": { "bindings": [ {
            "n": { "type": "literal", "value": "12",
                   "datatype": "http://www.w3.org/2001/XMLSchema#integer" }
        } ] } }"#;
        assert_eq!(count_from(&parse_select(json).unwrap(), "n").unwrap(), 12);
        assert_eq!(count_from(&[], "n").unwrap(), 0);
    }
}
