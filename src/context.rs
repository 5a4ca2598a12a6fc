use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use lazy_static::lazy_static;
use serde_json::{Map, Value};
use url::Url;

use crate::api::JsonLdOptions;

lazy_static! {
    pub(crate) static ref KEYWORDS: HashSet<&'static str> = vec![
        "@base",
        "@container",
        "@context",
        "@direction",
        "@graph",
        "@id",
        "@import",
        "@included",
        "@index",
        "@json",
        "@language",
        "@list",
        "@nest",
        "@none",
        "@prefix",
        "@propagate",
        "@protected",
        "@reverse",
        "@set",
        "@type",
        "@value",
        "@version",
        "@vocab",
        "@preserve",
        "@default",
        "@embed",
        "@explicit",
        "@null",
        "@omitDefault",
        "@requireAll",
        "@always",
        "@once",
        "@never",
        "@any",
    ]
    .into_iter()
    .collect();
}

pub(crate) fn is_keyword(value: &str) -> bool {
    KEYWORDS.contains(value)
}

/// `@` followed by one or more ASCII letters. Terms of this shape are
/// reserved for future keywords and expand to nothing.
pub(crate) fn is_keyword_form(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next() == Some('@') && {
        let rest = chars.as_str();
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic())
    }
}

/// Loose RFC 3986 check: a scheme component followed by a colon.
pub(crate) fn is_absolute_iri(value: &str) -> bool {
    match value.find(':') {
        Some(pos) if pos > 0 => {
            let scheme = &value[..pos];
            scheme.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !value.contains(' ')
        }
        _ => false,
    }
}

pub(crate) fn is_blank_node_name(value: &str) -> bool {
    value.starts_with("_:")
}

/// Byte position of the first colon after the first character, the split
/// point of a compact IRI.
pub(crate) fn compact_iri_colon(value: &str) -> Option<usize> {
    value.match_indices(':').map(|(i, _)| i).find(|&i| i > 0)
}

/// A well-formedness check for BCP 47 language tags, used only to drive
/// warnings.
pub(crate) fn is_well_formed_language_tag(value: &str) -> bool {
    !value.is_empty()
        && value.split('-').enumerate().all(|(i, part)| {
            !part.is_empty()
                && part.len() <= 8
                && part.chars().all(|c| c.is_ascii_alphanumeric())
                && (i != 0 || part.chars().all(|c| c.is_ascii_alphabetic()))
        })
}

/// Marker stored in language and direction mappings when a term sets the
/// mapping explicitly to null, suppressing the context-level default.
pub(crate) const NULL_MAPPING: &str = "@null";

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TermDefinition {
    /// The IRI or keyword this term expands to. `None` when the term is
    /// defined as null, which blocks vocabulary fallback entirely.
    pub iri_mapping: Option<String>,
    pub type_mapping: Option<String>,
    pub language_mapping: Option<String>,
    pub direction_mapping: Option<String>,
    pub container_mapping: Vec<String>,
    pub index_mapping: Option<String>,
    pub reverse: bool,
    pub protected: bool,
    pub prefix: bool,
    /// Term-scoped context, processed when the term is used as an active
    /// property or a type.
    pub local_context: Option<Value>,
    pub base_url: Option<Url>,
}

impl TermDefinition {
    pub fn new() -> TermDefinition {
        TermDefinition {
            iri_mapping: None,
            type_mapping: None,
            language_mapping: None,
            direction_mapping: None,
            container_mapping: Vec::new(),
            index_mapping: None,
            reverse: false,
            protected: false,
            prefix: false,
            local_context: None,
            base_url: None,
        }
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.container_mapping.iter().any(|c| c == container)
    }

    /// Equality modulo the protected flag, used when deciding whether a
    /// redefinition of a protected term is permitted.
    pub fn matches_except_protected(&self, other: &TermDefinition) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.protected = false;
        b.protected = false;
        a == b
    }
}

#[derive(Clone, Debug)]
pub struct Context {
    pub(crate) options: Rc<JsonLdOptions>,
    pub base_iri: Option<Url>,
    pub(crate) original_base_url: Option<Url>,
    pub(crate) vocabulary_mapping: Option<String>,
    pub(crate) default_language: Option<String>,
    pub(crate) default_base_direction: Option<String>,
    pub(crate) terms: BTreeMap<String, TermDefinition>,
    pub(crate) previous_context: Option<Rc<Context>>,
}

impl Context {
    pub fn new(options: Rc<JsonLdOptions>) -> Context {
        let base_iri = options.base.as_deref().and_then(|b| Url::parse(b).ok());
        Context {
            options,
            original_base_url: base_iri.clone(),
            base_iri,
            vocabulary_mapping: None,
            default_language: None,
            default_base_direction: None,
            terms: BTreeMap::new(),
            previous_context: None,
        }
    }

    pub(crate) fn term(&self, key: &str) -> Option<&TermDefinition> {
        self.terms.get(key)
    }

    pub(crate) fn has_protected_terms(&self) -> bool {
        self.terms.values().any(|t| t.protected)
    }

    pub(crate) fn is_reverse_property(&self, key: &str) -> bool {
        self.terms.get(key).map_or(false, |t| t.reverse)
    }

    /// IRI expansion. Returns `None` when the value expands to nothing: a
    /// term explicitly defined as null, or a string with the form of a
    /// keyword.
    pub(crate) fn expand_iri(
        &self,
        value: &str,
        document_relative: bool,
        vocab: bool,
    ) -> Option<String> {
        if is_keyword(value) {
            return Some(value.to_owned());
        }

        if is_keyword_form(value) {
            tracing::warn!(term = value, "ignoring value with the form of a keyword");
            return None;
        }

        if vocab {
            if let Some(term) = self.terms.get(value) {
                return term.iri_mapping.clone();
            }
        }

        // Split compact IRIs on the first colon after the first character.
        if let Some(loc) = compact_iri_colon(value) {
            let prefix = &value[..loc];
            let suffix = &value[loc + 1..];

            if prefix == "_" || suffix.starts_with("//") {
                return Some(value.to_owned());
            }

            if let Some(term) = self.terms.get(prefix) {
                if term.prefix {
                    if let Some(iri) = &term.iri_mapping {
                        return Some(iri.clone() + suffix);
                    }
                }
            }

            return Some(value.to_owned());
        }

        if vocab {
            if let Some(ref vocab_mapping) = self.vocabulary_mapping {
                return Some(vocab_mapping.clone() + value);
            }
        }

        if document_relative {
            if let Some(ref base_iri) = self.base_iri {
                if let Ok(joined) = base_iri.join(value) {
                    return Some(joined.to_string());
                }
            }
        }

        Some(value.to_owned())
    }

    /// Value expansion: wraps a scalar into its canonical value-object
    /// shape, honoring the active property's type, language, and
    /// direction mappings.
    pub(crate) fn expand_value(&self, active_property: &str, value: &Value) -> Value {
        let term = self.terms.get(active_property);

        if let Some(definition) = term {
            if let Some(ref type_mapping) = definition.type_mapping {
                if (type_mapping == "@id" || type_mapping == "@vocab") && value.is_string() {
                    let expanded =
                        self.expand_iri(value.as_str().unwrap(), true, type_mapping == "@vocab");
                    let mut result = Map::new();
                    result.insert(
                        "@id".to_owned(),
                        expanded.map(Value::String).unwrap_or(Value::Null),
                    );
                    return Value::Object(result);
                }
            }
        }

        let mut result = Map::new();
        result.insert("@value".to_owned(), value.clone());

        match term.and_then(|t| t.type_mapping.as_ref()) {
            Some(type_mapping)
                if type_mapping != "@id" && type_mapping != "@vocab" && type_mapping != "@none" =>
            {
                result.insert("@type".to_owned(), Value::String(type_mapping.clone()));
            }
            _ => {
                if value.is_string() {
                    let language = match term.and_then(|t| t.language_mapping.as_ref()) {
                        Some(mapping) if mapping == NULL_MAPPING => None,
                        Some(mapping) => Some(mapping.clone()),
                        None => self.default_language.clone(),
                    };
                    let direction = match term.and_then(|t| t.direction_mapping.as_ref()) {
                        Some(mapping) if mapping == NULL_MAPPING => None,
                        Some(mapping) => Some(mapping.clone()),
                        None => self.default_base_direction.clone(),
                    };

                    if let Some(language) = language {
                        result.insert("@language".to_owned(), Value::String(language));
                    }
                    if let Some(direction) = direction {
                        result.insert("@direction".to_owned(), Value::String(direction));
                    }
                }
            }
        }

        Value::Object(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with_base(base: &str) -> Context {
        let options = JsonLdOptions {
            base: Some(base.to_owned()),
            ..JsonLdOptions::default()
        };
        Context::new(Rc::new(options))
    }

    #[test]
    fn keyword_form_detection() {
        assert!(is_keyword_form("@foo"));
        assert!(is_keyword_form("@type"));
        assert!(!is_keyword_form("@"));
        assert!(!is_keyword_form("@foo.bar"));
        assert!(!is_keyword_form("foo"));
    }

    #[test]
    fn absolute_iri_detection() {
        assert!(is_absolute_iri("http://example.com/"));
        assert!(is_absolute_iri("urn:isbn:0451450523"));
        assert!(!is_absolute_iri("relative/path"));
        assert!(!is_absolute_iri(":no-scheme"));
        assert!(!is_absolute_iri("has space:x"));
    }

    #[test]
    fn language_tag_check() {
        assert!(is_well_formed_language_tag("en"));
        assert!(is_well_formed_language_tag("en-US"));
        assert!(is_well_formed_language_tag("zh-Hant-TW"));
        assert!(!is_well_formed_language_tag("en_US"));
        assert!(!is_well_formed_language_tag(""));
        assert!(!is_well_formed_language_tag("waytoolongsubtag"));
    }

    #[test]
    fn expand_iri_keywords_and_blanks() {
        let ctx = context_with_base("http://example.com/doc");
        assert_eq!(ctx.expand_iri("@type", false, true).unwrap(), "@type");
        assert_eq!(ctx.expand_iri("_:b0", false, true).unwrap(), "_:b0");
        assert_eq!(ctx.expand_iri("@customKeyword", false, true), None);
    }

    #[test]
    fn expand_iri_document_relative() {
        let ctx = context_with_base("http://example.com/dir/doc");
        assert_eq!(
            ctx.expand_iri("other", true, false).unwrap(),
            "http://example.com/dir/other"
        );
        assert_eq!(
            ctx.expand_iri("/rooted", true, false).unwrap(),
            "http://example.com/rooted"
        );
    }

    #[test]
    fn expand_iri_vocab_and_prefix() {
        let mut ctx = context_with_base("http://example.com/doc");
        ctx.vocabulary_mapping = Some("http://vocab.example/".to_owned());

        let mut prefix_term = TermDefinition::new();
        prefix_term.iri_mapping = Some("http://prefix.example/".to_owned());
        prefix_term.prefix = true;
        ctx.terms.insert("pre".to_owned(), prefix_term);

        let mut plain_term = TermDefinition::new();
        plain_term.iri_mapping = Some("http://plain.example/".to_owned());
        ctx.terms.insert("plain".to_owned(), plain_term);

        assert_eq!(
            ctx.expand_iri("name", false, true).unwrap(),
            "http://vocab.example/name"
        );
        assert_eq!(
            ctx.expand_iri("pre:suffix", false, true).unwrap(),
            "http://prefix.example/suffix"
        );
        // terms without the prefix flag do not participate in compact IRIs
        assert_eq!(
            ctx.expand_iri("plain:suffix", false, true).unwrap(),
            "plain:suffix"
        );
    }

    #[test]
    fn null_term_blocks_vocab_fallback() {
        let mut ctx = context_with_base("http://example.com/doc");
        ctx.vocabulary_mapping = Some("http://vocab.example/".to_owned());
        ctx.terms.insert("hidden".to_owned(), TermDefinition::new());

        assert_eq!(ctx.expand_iri("hidden", false, true), None);
    }

    #[test]
    fn expand_value_typed_and_tagged() {
        let mut ctx = context_with_base("http://example.com/doc");
        ctx.default_language = Some("en".to_owned());

        let mut id_term = TermDefinition::new();
        id_term.iri_mapping = Some("http://example.com/link".to_owned());
        id_term.type_mapping = Some("@id".to_owned());
        ctx.terms.insert("link".to_owned(), id_term);

        let mut dated = TermDefinition::new();
        dated.iri_mapping = Some("http://example.com/date".to_owned());
        dated.type_mapping = Some("http://www.w3.org/2001/XMLSchema#date".to_owned());
        ctx.terms.insert("date".to_owned(), dated);

        assert_eq!(
            ctx.expand_value("link", &json!("other")),
            json!({"@id": "http://example.com/other"})
        );
        assert_eq!(
            ctx.expand_value("date", &json!("2020-01-01")),
            json!({"@value": "2020-01-01", "@type": "http://www.w3.org/2001/XMLSchema#date"})
        );
        assert_eq!(
            ctx.expand_value("untyped", &json!("hello")),
            json!({"@value": "hello", "@language": "en"})
        );
        assert_eq!(ctx.expand_value("untyped", &json!(5)), json!({"@value": 5}));
    }

    #[test]
    fn expand_value_null_language_override() {
        let mut ctx = context_with_base("http://example.com/doc");
        ctx.default_language = Some("en".to_owned());

        let mut term = TermDefinition::new();
        term.iri_mapping = Some("http://example.com/label".to_owned());
        term.language_mapping = Some(NULL_MAPPING.to_owned());
        ctx.terms.insert("label".to_owned(), term);

        assert_eq!(
            ctx.expand_value("label", &json!("untagged")),
            json!({"@value": "untagged"})
        );
    }
}
