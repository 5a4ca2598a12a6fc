use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::canon::{self, CanonicalizationError};
use crate::context::Context;
use crate::creation::ContextCreationError;
use crate::expand::ExpansionError;
use crate::loader::{DocumentContent, DocumentLoader, LoaderError, NoopLoader};
use crate::nodemap::{generate_node_map, BlankNodeNames, NodeMapError};
use crate::nquads::{self, NQuadsParseError};
use crate::rdf::{dataset_from_node_map, dataset_to_jsonld, RdfDataset};

/// The JSON-LD processing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    JsonLd10,
    JsonLd11,
}

impl Default for ProcessingMode {
    fn default() -> ProcessingMode {
        ProcessingMode::JsonLd11
    }
}

/// How the base direction of language-tagged strings survives RDF
/// serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfDirection {
    /// Encode language and direction into a `https://www.w3.org/ns/i18n#`
    /// datatype.
    I18nDatatype,
    /// Reify the literal through a blank node with `rdf:value`,
    /// `rdf:language`, and `rdf:direction`.
    CompoundLiteral,
}

/// Digest used by dataset canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl Default for HashAlgorithm {
    fn default() -> HashAlgorithm {
        HashAlgorithm::Sha256
    }
}

/// Options that may be passed to `expand`, `to_rdf`, or `normalize`.
#[derive(Debug, Clone)]
pub struct JsonLdOptions {
    /// The base IRI of the document. Used to resolve relative references.
    pub base: Option<String>,

    /// Processing mode; `json-ld-1.1` unless stated otherwise.
    pub processing_mode: ProcessingMode,

    /// A context applied before the input's own contexts.
    pub expand_context: Option<Value>,

    /// Loader used for remote contexts and documents.
    pub document_loader: Rc<dyn DocumentLoader>,

    /// Keep triples whose predicate is a blank node.
    pub produce_generalized_rdf: bool,

    /// Base-direction handling during RDF serialization.
    pub rdf_direction: Option<RdfDirection>,

    /// When translating RDF back to JSON-LD, convert boolean and numeric
    /// literals to native JSON values.
    pub use_native_types: bool,

    /// When translating RDF back to JSON-LD, keep `rdf:type` as a plain
    /// predicate instead of `@type`.
    pub use_rdf_type: bool,

    /// Force deterministic (lexicographic) key iteration during
    /// expansion.
    pub ordered: bool,

    /// Digest used by canonicalization.
    pub hash_algorithm: HashAlgorithm,

    /// Cap on remote-context fetching recursion.
    pub max_remote_contexts: usize,

    /// Cap on the canonicalization n-degree search, counting invocations
    /// and permutations together.
    pub max_canon_calls: usize,
}

impl Default for JsonLdOptions {
    fn default() -> JsonLdOptions {
        JsonLdOptions {
            base: None,
            processing_mode: ProcessingMode::default(),
            expand_context: None,
            document_loader: Rc::new(NoopLoader),
            produce_generalized_rdf: false,
            rdf_direction: None,
            use_native_types: false,
            use_rdf_type: false,
            ordered: false,
            hash_algorithm: HashAlgorithm::default(),
            max_remote_contexts: 10,
            max_canon_calls: 10_000,
        }
    }
}

/// Top-level error, aggregating every subsystem. `code` yields the
/// spec-named error string for pattern matching.
#[derive(Debug, Error)]
pub enum JsonLdError {
    #[error("{0}")]
    Context(#[from] ContextCreationError),
    #[error("{0}")]
    Expansion(#[from] ExpansionError),
    #[error("{0}")]
    NodeMap(#[from] NodeMapError),
    #[error("{0}")]
    NQuads(#[from] NQuadsParseError),
    #[error("{0}")]
    Canonicalization(#[from] CanonicalizationError),
    #[error("{0}")]
    Loader(#[from] LoaderError),
}

fn loader_code(error: &LoaderError) -> String {
    match error {
        LoaderError::LoadingDocumentFailed(_) => "loading document failed".to_owned(),
        LoaderError::LoadingRemoteContextFailed(_) => "loading remote context failed".to_owned(),
    }
}

fn context_code(error: &ContextCreationError) -> String {
    match error {
        ContextCreationError::InvalidTerm(inner) => inner.to_string(),
        ContextCreationError::RemoteContext(inner) => loader_code(inner),
        other => other.to_string(),
    }
}

impl JsonLdError {
    /// The spec-named error code, stripped of detail.
    pub fn code(&self) -> String {
        match self {
            JsonLdError::Context(error) => context_code(error),
            JsonLdError::Expansion(ExpansionError::Context(error)) => context_code(error),
            JsonLdError::Expansion(error) => error.to_string(),
            JsonLdError::NodeMap(error) => error.to_string(),
            JsonLdError::NQuads(_) => "invalid N-Quads document".to_owned(),
            JsonLdError::Canonicalization(CanonicalizationError::MaxCallDepthExceeded) => {
                "maximum call depth exceeded".to_owned()
            }
            JsonLdError::Loader(error) => loader_code(error),
        }
    }
}

fn apply_expand_context(
    active: Context,
    expand_context: &Value,
) -> Result<Context, ContextCreationError> {
    // a supplied context object may carry its context under @context
    let context = match expand_context {
        Value::Object(map) if map.contains_key("@context") => {
            map.get("@context").unwrap().clone()
        }
        other => other.clone(),
    };
    let base = active.original_base_url.clone();
    active.process_context(&context, base.as_ref(), &mut Vec::new(), false, true)
}

fn expand_with(
    input: &Value,
    document_url: Option<&Url>,
    context_url: Option<&str>,
    options: Rc<JsonLdOptions>,
) -> Result<Value, JsonLdError> {
    let mut active = Context::new(options.clone());
    if active.base_iri.is_none() {
        if let Some(url) = document_url {
            active.base_iri = Some(url.clone());
            active.original_base_url = Some(url.clone());
        }
    }

    if let Some(expand_context) = &options.expand_context {
        active = apply_expand_context(active, expand_context)?;
    }

    // an out-of-band context attached to the retrieved document
    if let Some(context_url) = context_url {
        let base = active.original_base_url.clone();
        active = active.process_context(
            &Value::String(context_url.to_owned()),
            base.as_ref(),
            &mut Vec::new(),
            false,
            true,
        )?;
    }

    let base_url = active.original_base_url.clone();
    let expanded =
        active.expand_element(None, input, base_url.as_ref(), false, options.ordered, false)?;

    // a lone top-level @graph unwraps to its contents
    let expanded = match expanded {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("@graph") => {
            map.remove("@graph").unwrap()
        }
        other => other,
    };

    Ok(match expanded {
        Value::Null => Value::Array(Vec::new()),
        Value::Array(_) => expanded,
        other => Value::Array(vec![other]),
    })
}

/// Expands a JSON-LD structure according to the API specification.
pub fn expand(input: &Value, options: &JsonLdOptions) -> Result<Value, JsonLdError> {
    expand_with(input, None, None, Rc::new(options.clone()))
}

/// Expands the JSON-LD document behind `location`, loaded through the
/// configured document loader.
pub fn expand_document(location: &str, options: &JsonLdOptions) -> Result<Value, JsonLdError> {
    let options = Rc::new(options.clone());
    let document = options.document_loader.load(location)?;

    let input = match &document.content {
        DocumentContent::Json(value) => value.clone(),
        DocumentContent::NQuads(_) => {
            return Err(LoaderError::LoadingDocumentFailed(format!(
                "cannot expand an N-Quads document: {}",
                document.document_url
            ))
            .into())
        }
    };

    let document_url = Url::parse(&document.document_url).ok();
    expand_with(
        &input,
        document_url.as_ref(),
        document.context_url.as_deref(),
        options,
    )
}

fn expanded_to_rdf(expanded: &Value, options: &JsonLdOptions) -> Result<RdfDataset, JsonLdError> {
    let mut names = BlankNodeNames::new();
    let node_map = generate_node_map(expanded, &mut names)?;
    Ok(dataset_from_node_map(node_map, &mut names, options))
}

/// Deserializes JSON-LD to an RDF dataset.
pub fn to_rdf(input: &Value, options: &JsonLdOptions) -> Result<RdfDataset, JsonLdError> {
    let expanded = expand_with(input, None, None, Rc::new(options.clone()))?;
    expanded_to_rdf(&expanded, options)
}

/// Deserializes the document behind `location` to an RDF dataset.
/// N-Quads documents are parsed directly.
pub fn to_rdf_document(location: &str, options: &JsonLdOptions) -> Result<RdfDataset, JsonLdError> {
    let options_rc = Rc::new(options.clone());
    let document = options_rc.document_loader.load(location)?;

    match &document.content {
        DocumentContent::Json(value) => {
            let document_url = Url::parse(&document.document_url).ok();
            let expanded = expand_with(
                value,
                document_url.as_ref(),
                document.context_url.as_deref(),
                options_rc.clone(),
            )?;
            expanded_to_rdf(&expanded, options)
        }
        DocumentContent::NQuads(text) => Ok(nquads::parse(text)?),
    }
}

/// Translates an RDF dataset back into expanded JSON-LD.
pub fn from_rdf(dataset: &RdfDataset, options: &JsonLdOptions) -> Result<Value, JsonLdError> {
    Ok(dataset_to_jsonld(dataset, options))
}

/// Canonicalizes JSON-LD input into the canonical N-Quads document
/// (URDNA2015).
pub fn normalize(input: &Value, options: &JsonLdOptions) -> Result<String, JsonLdError> {
    let dataset = to_rdf(input, options)?;
    Ok(canon::canonicalize(&dataset, options)?)
}

/// Canonicalizes an already-built RDF dataset.
pub fn normalize_dataset(
    dataset: &RdfDataset,
    options: &JsonLdOptions,
) -> Result<String, JsonLdError> {
    Ok(canon::canonicalize(dataset, options)?)
}

/// Canonicalizes the document behind `location`; accepts both JSON-LD
/// and N-Quads content.
pub fn normalize_document(location: &str, options: &JsonLdOptions) -> Result<String, JsonLdError> {
    let dataset = to_rdf_document(location, options)?;
    Ok(canon::canonicalize(&dataset, options)?)
}
