//! # Triple View
//!
//! The RDF-compatible face of the graph: subjects and predicates are IRIs
//! under the Weft vocabulary, objects are IRIs or (optionally typed)
//! literals. The store's `query` runs `(s, p, o)` patterns with wildcards
//! over this view, and export/import round-trips through sorted N-Triples
//! text so external graph tooling can consume the data.

use crate::types::WeftError;
use serde::{Deserialize, Serialize};

// =============================================================================
// VOCABULARY
// =============================================================================

/// Vocabulary namespace for predicates.
pub const NS_GRAPH: &str = "http://weft.dev/graph#";
/// Item subject namespace.
pub const NS_ITEM: &str = "http://weft.dev/item/";
/// Concept subject namespace.
pub const NS_CONCEPT: &str = "http://weft.dev/concept/";
/// Discusses-edge subject namespace (carries edge confidence).
pub const NS_EDGE: &str = "http://weft.dev/edge/";
/// Co-occurrence pair subject namespace (carries pair weight).
pub const NS_COOCCUR: &str = "http://weft.dev/cooccur/";
/// Attribution link subject namespace.
pub const NS_ATTRIBUTION: &str = "http://weft.dev/attribution/";

/// `rdf:type`.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
/// `rdfs:label`.
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
/// `xsd:integer`, the datatype of every numeric literal in the view.
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

// =============================================================================
// TERMS & TRIPLES
// =============================================================================

/// An RDF object term: an IRI or an optionally typed literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// IRI reference.
    Iri(String),
    /// Literal with optional datatype IRI.
    Literal {
        value: String,
        datatype: Option<String>,
    },
}

impl Term {
    /// Plain (untyped) string literal.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: None,
        }
    }

    /// Integer literal typed `xsd:integer`.
    #[must_use]
    pub fn integer(value: impl std::fmt::Display) -> Self {
        Self::Literal {
            value: value.to_string(),
            datatype: Some(XSD_INTEGER.to_string()),
        }
    }

    /// IRI term.
    #[must_use]
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }
}

/// A subject-predicate-object triple. Subjects and predicates in the Weft
/// view are always IRIs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    /// Construct a triple.
    #[must_use]
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

/// A `(subject, predicate, object)` pattern. `None` is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<Term>,
}

impl TriplePattern {
    /// Match-anything pattern.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Restrict the predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Restrict the object.
    #[must_use]
    pub fn with_object(mut self, object: Term) -> Self {
        self.object = Some(object);
        self
    }

    /// Test one triple against the pattern.
    #[must_use]
    pub fn matches(&self, triple: &Triple) -> bool {
        if self.subject.as_ref().is_some_and(|s| s != &triple.subject) {
            return false;
        }
        if self
            .predicate
            .as_ref()
            .is_some_and(|p| p != &triple.predicate)
        {
            return false;
        }
        if self.object.as_ref().is_some_and(|o| o != &triple.object) {
            return false;
        }
        true
    }
}

// =============================================================================
// N-TRIPLES SERIALIZATION
// =============================================================================

/// Escape a literal value per N-Triples rules.
fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Unescape a literal value per N-Triples rules.
fn unescape_literal(value: &str) -> Result<String, WeftError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            other => {
                return Err(WeftError::Deserialization(format!(
                    "invalid escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Render one triple as an N-Triples line (without trailing newline).
#[must_use]
pub fn to_ntriples_line(triple: &Triple) -> String {
    let object = match &triple.object {
        Term::Iri(iri) => format!("<{}>", iri),
        Term::Literal {
            value,
            datatype: None,
        } => format!("\"{}\"", escape_literal(value)),
        Term::Literal {
            value,
            datatype: Some(dt),
        } => format!("\"{}\"^^<{}>", escape_literal(value), dt),
    };
    format!(
        "<{}> <{}> {} .",
        triple.subject, triple.predicate, object
    )
}

/// Render a sorted triple set as an N-Triples document.
///
/// Sorting makes the document deterministic: same store state, same bytes.
#[must_use]
pub fn to_ntriples(triples: &[Triple]) -> String {
    let mut sorted: Vec<&Triple> = triples.iter().collect();
    sorted.sort();
    let mut out = String::new();
    for triple in sorted {
        out.push_str(&to_ntriples_line(triple));
        out.push('\n');
    }
    out
}

/// Parse one N-Triples line. Blank lines and `#` comments yield `None`.
pub fn parse_ntriples_line(line: &str) -> Result<Option<Triple>, WeftError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let bad = |msg: &str| WeftError::Deserialization(format!("{}: {}", msg, line));

    let rest = line
        .strip_suffix('.')
        .ok_or_else(|| bad("missing terminating dot"))?
        .trim_end();

    // Subject IRI
    let rest = rest.strip_prefix('<').ok_or_else(|| bad("expected subject IRI"))?;
    let (subject, rest) = rest
        .split_once('>')
        .ok_or_else(|| bad("unterminated subject IRI"))?;
    let rest = rest.trim_start();

    // Predicate IRI
    let rest = rest
        .strip_prefix('<')
        .ok_or_else(|| bad("expected predicate IRI"))?;
    let (predicate, rest) = rest
        .split_once('>')
        .ok_or_else(|| bad("unterminated predicate IRI"))?;
    let rest = rest.trim_start();

    // Object: IRI or literal
    let object = if let Some(obj) = rest.strip_prefix('<') {
        let (iri, tail) = obj
            .split_once('>')
            .ok_or_else(|| bad("unterminated object IRI"))?;
        if !tail.trim().is_empty() {
            return Err(bad("trailing garbage after object"));
        }
        Term::Iri(iri.to_string())
    } else if let Some(obj) = rest.strip_prefix('"') {
        // Find the closing quote, skipping escaped quotes.
        let mut end = None;
        let mut escaped = false;
        for (i, ch) in obj.char_indices() {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                end = Some(i);
                break;
            }
        }
        let end = end.ok_or_else(|| bad("unterminated literal"))?;
        let value = unescape_literal(&obj[..end])?;
        let tail = obj[end + 1..].trim();
        let datatype = if tail.is_empty() {
            None
        } else {
            let dt = tail
                .strip_prefix("^^<")
                .and_then(|t| t.strip_suffix('>'))
                .ok_or_else(|| bad("malformed datatype annotation"))?;
            Some(dt.to_string())
        };
        Term::Literal { value, datatype }
    } else {
        return Err(bad("expected object IRI or literal"));
    };

    Ok(Some(Triple::new(subject, predicate, object)))
}

/// Parse an N-Triples document into triples.
pub fn parse_ntriples(text: &str) -> Result<Vec<Triple>, WeftError> {
    let mut triples = Vec::new();
    for line in text.lines() {
        if let Some(triple) = parse_ntriples_line(line)? {
            triples.push(triple);
        }
    }
    Ok(triples)
}

// =============================================================================
// TESTS
// =============================================================================
