use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Map as JsonMap;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::api::ProcessingMode;
use crate::context::{
    compact_iri_colon, is_absolute_iri, is_blank_node_name, is_keyword, is_keyword_form,
    is_well_formed_language_tag, Context, TermDefinition, NULL_MAPPING,
};
use crate::loader::{DocumentContent, LoaderError};

pub enum DefineStatus {
    Defining,
    Defined,
    Invalid,
}

#[derive(Debug, Error)]
pub enum TermCreationError {
    #[error("cyclic IRI mapping")]
    CyclicIriMapping,
    #[error("keyword redefinition")]
    KeywordRedefinition,
    #[error("invalid term definition")]
    InvalidTermDefinition,
    #[error("invalid IRI mapping")]
    InvalidIriMapping,
    #[error("invalid reverse property")]
    InvalidReverseProperty,
    #[error("invalid keyword alias")]
    InvalidKeywordAlias,
    #[error("invalid container mapping")]
    InvalidContainerMapping,
    #[error("invalid language mapping")]
    InvalidLanguageMapping,
    #[error("invalid type mapping")]
    InvalidTypeMapping,
    #[error("invalid base direction")]
    InvalidBaseDirection,
    #[error("invalid @nest value")]
    InvalidNestValue,
    #[error("invalid @prefix value")]
    InvalidPrefixValue,
    #[error("invalid @protected value")]
    InvalidProtectedValue,
    #[error("protected term redefinition")]
    ProtectedTermRedefinition,
}

#[derive(Debug, Error)]
pub enum ContextCreationError {
    #[error("invalid term: {0}")]
    InvalidTerm(#[from] TermCreationError),
    #[error("{0}")]
    RemoteContext(#[from] LoaderError),
    #[error("invalid remote context")]
    InvalidRemoteContext,
    #[error("recursive context inclusion")]
    RecursiveContextInclusion,
    #[error("context overflow")]
    ContextOverflow,
    #[error("invalid base IRI")]
    InvalidBaseIri,
    #[error("invalid vocab mapping")]
    InvalidVocabMapping,
    #[error("invalid default language")]
    InvalidDefaultLanguage,
    #[error("invalid base direction")]
    InvalidBaseDirection,
    #[error("invalid local context")]
    InvalidLocalContext,
    #[error("invalid @version value")]
    InvalidVersionValue,
    #[error("processing mode conflict")]
    ProcessingModeConflict,
    #[error("invalid context entry")]
    InvalidContextEntry,
    #[error("invalid @import value")]
    InvalidImportValue,
    #[error("invalid @propagate value")]
    InvalidPropagateValue,
    #[error("invalid @protected value")]
    InvalidProtectedValue,
    #[error("invalid context nullification")]
    InvalidContextNullification,
}

/// Everything a term definition needs from the context it is defined in.
pub(crate) struct TermScope<'a> {
    pub map: &'a JsonMap<String, Value>,
    pub base_url: Option<&'a Url>,
    pub protected: bool,
    pub override_protected: bool,
}

fn ends_with_gen_delim(iri: &str) -> bool {
    matches!(
        iri.chars().last(),
        Some(':') | Some('/') | Some('?') | Some('#') | Some('[') | Some(']') | Some('@')
    )
}

fn validate_container(value: &Value, mode_1_0: bool) -> Result<Vec<String>, TermCreationError> {
    const ALLOWED: [&str; 7] = [
        "@graph",
        "@id",
        "@index",
        "@language",
        "@list",
        "@set",
        "@type",
    ];

    let mut entries: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) if !mode_1_0 => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or(TermCreationError::InvalidContainerMapping)
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(TermCreationError::InvalidContainerMapping),
    };
    entries.sort();
    entries.dedup();

    if entries.is_empty() || !entries.iter().all(|e| ALLOWED.contains(&e.as_str())) {
        return Err(TermCreationError::InvalidContainerMapping);
    }
    if mode_1_0 && matches!(entries[0].as_str(), "@graph" | "@id" | "@type") {
        return Err(TermCreationError::InvalidContainerMapping);
    }
    if entries.len() == 1 {
        return Ok(entries);
    }

    // @set combines with anything except @list; @graph additionally pairs
    // with @id or @index.
    let without_set: Vec<&str> = entries
        .iter()
        .map(String::as_str)
        .filter(|e| *e != "@set")
        .collect();
    let valid = match without_set.len() {
        0 | 1 => without_set.first() != Some(&"@list"),
        2 => {
            without_set.contains(&"@graph")
                && (without_set.contains(&"@id") || without_set.contains(&"@index"))
        }
        _ => false,
    };
    if !valid {
        return Err(TermCreationError::InvalidContainerMapping);
    }
    Ok(entries)
}

impl Context {
    pub(crate) fn mode_1_0(&self) -> bool {
        self.options.processing_mode == ProcessingMode::JsonLd10
    }

    /// Merges a local context expression into this context, producing a
    /// new active context.
    pub(crate) fn process_context(
        &self,
        local_context: &Value,
        base_url: Option<&Url>,
        remote_contexts: &mut Vec<String>,
        override_protected: bool,
        propagate: bool,
    ) -> Result<Context, ContextCreationError> {
        let mut result = self.clone();

        if !propagate && result.previous_context.is_none() {
            result.previous_context = Some(Rc::new(self.clone()));
        }

        let contexts: Vec<&Value> = match local_context {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for context in contexts {
            match context {
                Value::Null => {
                    if !override_protected && result.has_protected_terms() {
                        return Err(ContextCreationError::InvalidContextNullification);
                    }
                    let previous = if !propagate {
                        Some(Rc::new(result.clone()))
                    } else {
                        None
                    };
                    let mut fresh = Context::new(self.options.clone());
                    fresh.base_iri = self.original_base_url.clone();
                    fresh.original_base_url = self.original_base_url.clone();
                    fresh.previous_context = previous;
                    result = fresh;
                }

                Value::String(iri) => {
                    if remote_contexts.len() >= result.options.max_remote_contexts {
                        return Err(ContextCreationError::ContextOverflow);
                    }

                    let resolved = match base_url {
                        Some(base) => base.join(iri),
                        None => Url::parse(iri),
                    }
                    .map_err(|_| ContextCreationError::InvalidRemoteContext)?;
                    let resolved_str = resolved.to_string();

                    if remote_contexts.iter().any(|seen| seen == &resolved_str) {
                        return Err(ContextCreationError::RecursiveContextInclusion);
                    }
                    remote_contexts.push(resolved_str.clone());

                    let document = result.options.document_loader.load(&resolved_str)?;
                    let context_value = match document.content {
                        DocumentContent::Json(Value::Object(mut obj)) => obj
                            .remove("@context")
                            .ok_or(ContextCreationError::InvalidRemoteContext)?,
                        _ => return Err(ContextCreationError::InvalidRemoteContext),
                    };

                    result = result.process_context(
                        &context_value,
                        Some(&resolved),
                        remote_contexts,
                        override_protected,
                        true,
                    )?;
                }

                Value::Object(map) => {
                    result = result.process_context_map(
                        map,
                        base_url,
                        remote_contexts,
                        override_protected,
                        propagate,
                        self,
                    )?;
                }

                _ => return Err(ContextCreationError::InvalidLocalContext),
            }
        }

        Ok(result)
    }

    fn process_context_map(
        &self,
        map: &JsonMap<String, Value>,
        base_url: Option<&Url>,
        remote_contexts: &mut Vec<String>,
        override_protected: bool,
        propagate: bool,
        original: &Context,
    ) -> Result<Context, ContextCreationError> {
        let mut result = self.clone();
        let mode_1_0 = self.mode_1_0();

        // @propagate applies to the context object carrying it
        let propagate_here = match map.get("@propagate") {
            None => propagate,
            Some(Value::Bool(value)) => {
                if mode_1_0 {
                    return Err(ContextCreationError::InvalidContextEntry);
                }
                *value
            }
            Some(_) => return Err(ContextCreationError::InvalidPropagateValue),
        };
        if !propagate_here && result.previous_context.is_none() {
            result.previous_context = Some(Rc::new(original.clone()));
        }

        if let Some(version) = map.get("@version") {
            if version.as_f64() != Some(1.1) {
                return Err(ContextCreationError::InvalidVersionValue);
            }
            if mode_1_0 {
                return Err(ContextCreationError::ProcessingModeConflict);
            }
        }

        // @import underlays a remote context definition beneath this one
        let merged;
        let map: &JsonMap<String, Value> = match map.get("@import") {
            None => map,
            Some(Value::String(import)) => {
                if mode_1_0 {
                    return Err(ContextCreationError::InvalidContextEntry);
                }
                let resolved = match base_url {
                    Some(base) => base.join(import),
                    None => Url::parse(import),
                }
                .map_err(|_| ContextCreationError::InvalidRemoteContext)?;

                let document = result.options.document_loader.load(resolved.as_str())?;
                let imported = match document.content {
                    DocumentContent::Json(Value::Object(mut obj)) => {
                        match obj.remove("@context") {
                            Some(Value::Object(ctx)) => ctx,
                            _ => return Err(ContextCreationError::InvalidRemoteContext),
                        }
                    }
                    _ => return Err(ContextCreationError::InvalidRemoteContext),
                };
                if imported.contains_key("@import") {
                    return Err(ContextCreationError::InvalidContextEntry);
                }

                let mut combined = imported;
                for (key, value) in map {
                    if key != "@import" {
                        combined.insert(key.clone(), value.clone());
                    }
                }
                merged = combined;
                &merged
            }
            Some(_) => return Err(ContextCreationError::InvalidImportValue),
        };

        // @base is only honored in the outermost (non-remote) context
        if remote_contexts.is_empty() {
            if let Some(base) = map.get("@base") {
                match base {
                    Value::Null => result.base_iri = None,
                    Value::String(value) => {
                        if let Some(current) = &result.base_iri {
                            result.base_iri = Some(
                                current
                                    .join(value)
                                    .map_err(|_| ContextCreationError::InvalidBaseIri)?,
                            );
                        } else {
                            result.base_iri = Some(
                                Url::parse(value)
                                    .map_err(|_| ContextCreationError::InvalidBaseIri)?,
                            );
                        }
                    }
                    _ => return Err(ContextCreationError::InvalidBaseIri),
                }
            }
        }

        if let Some(vocab) = map.get("@vocab") {
            match vocab {
                Value::Null => result.vocabulary_mapping = None,
                Value::String(value) => {
                    if value.is_empty() {
                        result.vocabulary_mapping =
                            result.base_iri.as_ref().map(|b| b.to_string());
                    } else if is_absolute_iri(value) || is_blank_node_name(value) {
                        result.vocabulary_mapping =
                            result.expand_iri(value, true, true);
                    } else if let Some(expanded) = result.expand_iri(value, true, true) {
                        if !is_absolute_iri(&expanded) && !is_blank_node_name(&expanded) {
                            return Err(ContextCreationError::InvalidVocabMapping);
                        }
                        result.vocabulary_mapping = Some(expanded);
                    } else {
                        return Err(ContextCreationError::InvalidVocabMapping);
                    }
                }
                _ => return Err(ContextCreationError::InvalidVocabMapping),
            }
        }

        if let Some(language) = map.get("@language") {
            match language {
                Value::Null => result.default_language = None,
                Value::String(value) => {
                    if !is_well_formed_language_tag(value) {
                        tracing::warn!(language = %value, "default language tag is not well-formed");
                    }
                    result.default_language = Some(value.to_lowercase());
                }
                _ => return Err(ContextCreationError::InvalidDefaultLanguage),
            }
        }

        if let Some(direction) = map.get("@direction") {
            if mode_1_0 {
                return Err(ContextCreationError::InvalidContextEntry);
            }
            match direction {
                Value::Null => result.default_base_direction = None,
                Value::String(value) if value == "ltr" || value == "rtl" => {
                    result.default_base_direction = Some(value.clone());
                }
                _ => return Err(ContextCreationError::InvalidBaseDirection),
            }
        }

        let protected_default = match map.get("@protected") {
            None => false,
            Some(Value::Bool(value)) => {
                if mode_1_0 {
                    return Err(ContextCreationError::InvalidContextEntry);
                }
                *value
            }
            Some(_) => return Err(ContextCreationError::InvalidProtectedValue),
        };

        let mut defined: HashMap<String, DefineStatus> = HashMap::new();
        for control in [
            "@base",
            "@direction",
            "@import",
            "@language",
            "@propagate",
            "@protected",
            "@version",
            "@vocab",
        ] {
            if map.contains_key(control) {
                defined.insert(control.to_owned(), DefineStatus::Invalid);
            }
        }

        let scope = TermScope {
            map,
            base_url,
            protected: protected_default,
            override_protected,
        };

        while let Some((key, value)) = map.iter().find(|(k, _)| !defined.contains_key(k.as_str()))
        {
            result.create_term(&scope, key, value, &mut defined)?;
        }

        Ok(result)
    }

    /// Applies a term's scoped context, if any, returning the context to
    /// use in its place.
    pub(crate) fn apply_scoped_context(
        &self,
        definition: &TermDefinition,
        override_protected: bool,
        propagate: bool,
    ) -> Result<Context, ContextCreationError> {
        match &definition.local_context {
            Some(local) => self.process_context(
                local,
                definition.base_url.as_ref(),
                &mut Vec::new(),
                override_protected,
                propagate,
            ),
            None => Ok(self.clone()),
        }
    }

    fn create_term(
        &mut self,
        scope: &TermScope,
        term: &str,
        value: &Value,
        defined: &mut HashMap<String, DefineStatus>,
    ) -> Result<(), TermCreationError> {
        match defined.get(term) {
            Some(DefineStatus::Defining) => return Err(TermCreationError::CyclicIriMapping),
            Some(DefineStatus::Defined) | Some(DefineStatus::Invalid) => return Ok(()),
            None => (),
        }

        if term.is_empty() {
            return Err(TermCreationError::InvalidTermDefinition);
        }
        defined.insert(term.to_owned(), DefineStatus::Defining);

        let mode_1_0 = self.mode_1_0();

        if is_keyword(term) {
            // @type alone may be redefined, and only to add @container: @set
            // or protection
            let retype = !mode_1_0
                && term == "@type"
                && matches!(value, Value::Object(m) if !m.is_empty()
                    && m.iter().all(|(k, v)| match k.as_str() {
                        "@container" => v == "@set",
                        "@protected" => v.is_boolean(),
                        _ => false,
                    }));
            if !retype {
                return Err(TermCreationError::KeywordRedefinition);
            }
        } else if is_keyword_form(term) {
            tracing::warn!(term, "ignoring term definition with the form of a keyword");
            defined.insert(term.to_owned(), DefineStatus::Invalid);
            return Ok(());
        }

        let previous_definition = self.terms.remove(term);

        let mut simple_term = false;
        let value_map: JsonMap<String, Value> = match value {
            Value::String(id) => {
                simple_term = true;
                let mut map = JsonMap::new();
                map.insert("@id".to_owned(), Value::String(id.clone()));
                map
            }
            Value::Null => {
                let mut map = JsonMap::new();
                map.insert("@id".to_owned(), Value::Null);
                map
            }
            Value::Object(map) => map.clone(),
            _ => return Err(TermCreationError::InvalidTermDefinition),
        };

        for key in value_map.keys() {
            match key.as_str() {
                "@id" | "@reverse" | "@type" | "@container" | "@language" => {}
                "@context" | "@direction" | "@index" | "@nest" | "@prefix" | "@protected" => {
                    if mode_1_0 {
                        return Err(TermCreationError::InvalidTermDefinition);
                    }
                }
                _ => return Err(TermCreationError::InvalidTermDefinition),
            }
        }

        let mut definition = TermDefinition::new();
        definition.protected = match value_map.get("@protected") {
            None => scope.protected,
            Some(Value::Bool(value)) => *value,
            Some(_) => return Err(TermCreationError::InvalidProtectedValue),
        };

        if let Some(type_value) = value_map.get("@type") {
            let type_str = type_value
                .as_str()
                .ok_or(TermCreationError::InvalidTypeMapping)?;
            let expanded = self
                .expand_iri_mut(type_str, false, true, scope, defined)?
                .ok_or(TermCreationError::InvalidTypeMapping)?;
            if (expanded == "@json" || expanded == "@none") && mode_1_0 {
                return Err(TermCreationError::InvalidTypeMapping);
            }
            if expanded != "@id"
                && expanded != "@vocab"
                && expanded != "@json"
                && expanded != "@none"
                && !is_absolute_iri(&expanded)
            {
                return Err(TermCreationError::InvalidTypeMapping);
            }
            definition.type_mapping = Some(expanded);
        }

        if let Some(reverse_value) = value_map.get("@reverse") {
            if value_map.contains_key("@id") || value_map.contains_key("@nest") {
                return Err(TermCreationError::InvalidReverseProperty);
            }
            let reverse_str = reverse_value
                .as_str()
                .ok_or(TermCreationError::InvalidIriMapping)?;
            if is_keyword_form(reverse_str) {
                tracing::warn!(
                    term,
                    reverse = reverse_str,
                    "ignoring @reverse value with the form of a keyword"
                );
                defined.insert(term.to_owned(), DefineStatus::Invalid);
                return Ok(());
            }
            let expanded = self
                .expand_iri_mut(reverse_str, false, true, scope, defined)?
                .ok_or(TermCreationError::InvalidIriMapping)?;
            if !is_absolute_iri(&expanded) && !is_blank_node_name(&expanded) {
                return Err(TermCreationError::InvalidIriMapping);
            }
            definition.iri_mapping = Some(expanded);

            if let Some(container) = value_map.get("@container") {
                match container {
                    Value::String(c) if c == "@set" || c == "@index" => {
                        definition.container_mapping.push(c.clone());
                    }
                    Value::Null => {}
                    _ => return Err(TermCreationError::InvalidReverseProperty),
                }
            }
            definition.reverse = true;

            self.terms.insert(term.to_owned(), definition);
            defined.insert(term.to_owned(), DefineStatus::Defined);
            return Ok(());
        }

        let mut positional = true;
        if let Some(id_value) = value_map.get("@id") {
            match id_value {
                // a null @id decouples the term from vocabulary fallback
                Value::Null => positional = false,
                Value::String(id) if id != term => {
                    positional = false;
                    if !is_keyword(id) && is_keyword_form(id) {
                        tracing::warn!(
                            term,
                            id = %id,
                            "ignoring term whose @id has the form of a keyword"
                        );
                        defined.insert(term.to_owned(), DefineStatus::Invalid);
                        return Ok(());
                    }
                    let expanded = self
                        .expand_iri_mut(id, false, true, scope, defined)?
                        .ok_or(TermCreationError::InvalidIriMapping)?;
                    if expanded == "@context" {
                        return Err(TermCreationError::InvalidKeywordAlias);
                    }
                    if !is_keyword(&expanded)
                        && !is_absolute_iri(&expanded)
                        && !is_blank_node_name(&expanded)
                    {
                        return Err(TermCreationError::InvalidIriMapping);
                    }
                    definition.iri_mapping = Some(expanded);

                    // terms with inner colons or slashes must round-trip to
                    // the IRI they claim
                    let inner_colon = term
                        .match_indices(':')
                        .any(|(i, _)| i > 0 && i < term.len() - 1);
                    if inner_colon || term.contains('/') {
                        defined.insert(term.to_owned(), DefineStatus::Defined);
                        let check = self.expand_iri_mut(term, false, true, scope, defined)?;
                        if check.as_deref() != definition.iri_mapping.as_deref() {
                            return Err(TermCreationError::InvalidIriMapping);
                        }
                    }

                    if !term.contains(':') && !term.contains('/') && simple_term {
                        if let Some(iri) = &definition.iri_mapping {
                            if ends_with_gen_delim(iri) || is_blank_node_name(iri) {
                                definition.prefix = true;
                            }
                        }
                    }
                }
                Value::String(_) => {} // @id equal to the term itself
                _ => return Err(TermCreationError::InvalidIriMapping),
            }
        }

        if positional {
            if let Some(loc) = compact_iri_colon(term) {
                let prefix = &term[..loc];
                let suffix = &term[loc + 1..];

                if scope.map.contains_key(prefix)
                    && !matches!(defined.get(prefix), Some(DefineStatus::Defined))
                {
                    let prefix_value = scope.map.get(prefix).unwrap().clone();
                    self.create_term(scope, prefix, &prefix_value, defined)?;
                }

                if let Some(prefix_iri) =
                    self.terms.get(prefix).and_then(|t| t.iri_mapping.clone())
                {
                    definition.iri_mapping = Some(prefix_iri + suffix);
                } else {
                    // already an absolute IRI or a blank node identifier
                    definition.iri_mapping = Some(term.to_owned());
                }
            } else if term.contains('/') {
                let expanded = self
                    .expand_iri_mut(term, false, true, scope, defined)?
                    .ok_or(TermCreationError::InvalidIriMapping)?;
                if !is_absolute_iri(&expanded) {
                    return Err(TermCreationError::InvalidIriMapping);
                }
                definition.iri_mapping = Some(expanded);
            } else if term == "@type" {
                definition.iri_mapping = Some("@type".to_owned());
            } else if let Some(vocab) = &self.vocabulary_mapping {
                definition.iri_mapping = Some(vocab.clone() + term);
            } else {
                return Err(TermCreationError::InvalidIriMapping);
            }
        }

        if let Some(container_value) = value_map.get("@container") {
            let container = validate_container(container_value, mode_1_0)?;
            if container.iter().any(|c| c == "@type") {
                match definition.type_mapping.as_deref() {
                    None => definition.type_mapping = Some("@id".to_owned()),
                    Some("@id") | Some("@vocab") => {}
                    Some(_) => return Err(TermCreationError::InvalidTypeMapping),
                }
            }
            definition.container_mapping = container;
        }

        if let Some(index_value) = value_map.get("@index") {
            if !definition.has_container("@index") {
                return Err(TermCreationError::InvalidTermDefinition);
            }
            let index = index_value
                .as_str()
                .ok_or(TermCreationError::InvalidTermDefinition)?;
            definition.index_mapping = Some(index.to_owned());
        }

        if let Some(context_value) = value_map.get("@context") {
            definition.local_context = Some(context_value.clone());
            definition.base_url = scope.base_url.cloned();
        }

        if !value_map.contains_key("@type") {
            if let Some(language) = value_map.get("@language") {
                match language {
                    Value::Null => definition.language_mapping = Some(NULL_MAPPING.to_owned()),
                    Value::String(tag) => {
                        if !is_well_formed_language_tag(tag) {
                            tracing::warn!(term, language = %tag, "language tag is not well-formed");
                        }
                        definition.language_mapping = Some(tag.to_lowercase());
                    }
                    _ => return Err(TermCreationError::InvalidLanguageMapping),
                }
            }

            if let Some(direction) = value_map.get("@direction") {
                match direction {
                    Value::Null => definition.direction_mapping = Some(NULL_MAPPING.to_owned()),
                    Value::String(dir) if dir == "ltr" || dir == "rtl" => {
                        definition.direction_mapping = Some(dir.clone());
                    }
                    _ => return Err(TermCreationError::InvalidBaseDirection),
                }
            }
        }

        if let Some(nest_value) = value_map.get("@nest") {
            match nest_value.as_str() {
                Some(nest) if nest == "@nest" || !is_keyword(nest) => {}
                _ => return Err(TermCreationError::InvalidNestValue),
            }
        }

        if let Some(prefix_value) = value_map.get("@prefix") {
            if term.contains(':') || term.contains('/') {
                return Err(TermCreationError::InvalidTermDefinition);
            }
            definition.prefix = prefix_value
                .as_bool()
                .ok_or(TermCreationError::InvalidPrefixValue)?;
            if definition.prefix
                && definition
                    .iri_mapping
                    .as_deref()
                    .map_or(false, is_keyword)
            {
                return Err(TermCreationError::InvalidTermDefinition);
            }
        }

        if let Some(previous) = previous_definition {
            if previous.protected && !scope.override_protected {
                if !definition.matches_except_protected(&previous) {
                    return Err(TermCreationError::ProtectedTermRedefinition);
                }
                definition = previous;
            }
        }

        self.terms.insert(term.to_owned(), definition);
        defined.insert(term.to_owned(), DefineStatus::Defined);
        Ok(())
    }

    // Close to expand_iri, but able to define terms on demand from the
    // local context being processed. Only used during context processing.
    pub(crate) fn expand_iri_mut(
        &mut self,
        value: &str,
        document_relative: bool,
        vocab: bool,
        scope: &TermScope,
        defined: &mut HashMap<String, DefineStatus>,
    ) -> Result<Option<String>, TermCreationError> {
        if is_keyword(value) {
            return Ok(Some(value.to_owned()));
        }
        if is_keyword_form(value) {
            tracing::warn!(value, "ignoring value with the form of a keyword");
            return Ok(None);
        }

        if scope.map.contains_key(value)
            && !matches!(defined.get(value), Some(DefineStatus::Defined))
        {
            let term_value = scope.map.get(value).unwrap().clone();
            self.create_term(scope, value, &term_value, defined)?;
        }

        if vocab {
            if let Some(term) = self.terms.get(value) {
                return Ok(term.iri_mapping.clone());
            }
        }

        if let Some(loc) = compact_iri_colon(value) {
            let prefix = &value[..loc];
            let suffix = &value[loc + 1..];

            if prefix == "_" || suffix.starts_with("//") {
                return Ok(Some(value.to_owned()));
            }

            if scope.map.contains_key(prefix)
                && !matches!(defined.get(prefix), Some(DefineStatus::Defined))
            {
                let prefix_value = scope.map.get(prefix).unwrap().clone();
                self.create_term(scope, prefix, &prefix_value, defined)?;
            }

            if let Some(term) = self.terms.get(prefix) {
                if term.prefix {
                    if let Some(iri) = &term.iri_mapping {
                        return Ok(Some(iri.clone() + suffix));
                    }
                }
            }

            return Ok(Some(value.to_owned()));
        }

        if vocab {
            if let Some(vocab_mapping) = &self.vocabulary_mapping {
                return Ok(Some(vocab_mapping.clone() + value));
            }
        }

        if document_relative {
            if let Some(base_iri) = &self.base_iri {
                if let Ok(joined) = base_iri.join(value) {
                    return Ok(Some(joined.to_string()));
                }
            }
        }

        Ok(Some(value.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::JsonLdOptions;
    use serde_json::json;

    fn fresh_context() -> Context {
        Context::new(Rc::new(JsonLdOptions::default()))
    }

    fn process(ctx: &Context, local: Value) -> Result<Context, ContextCreationError> {
        ctx.process_context(&local, None, &mut Vec::new(), false, true)
    }

    #[test]
    fn simple_term_definitions() {
        let ctx = process(
            &fresh_context(),
            json!({
                "name": "http://schema.org/name",
                "schema": "http://schema.org/",
                "img": {"@id": "schema:image", "@type": "@id"}
            }),
        )
        .unwrap();

        assert_eq!(
            ctx.term("name").unwrap().iri_mapping.as_deref(),
            Some("http://schema.org/name")
        );
        // string-form terms ending in a gen-delim act as prefixes
        assert!(ctx.term("schema").unwrap().prefix);
        assert_eq!(
            ctx.term("img").unwrap().iri_mapping.as_deref(),
            Some("http://schema.org/image")
        );
        assert_eq!(ctx.term("img").unwrap().type_mapping.as_deref(), Some("@id"));
    }

    #[test]
    fn vocab_and_language() {
        let ctx = process(
            &fresh_context(),
            json!({"@vocab": "http://example.com/vocab/", "@language": "EN-us"}),
        )
        .unwrap();

        assert_eq!(
            ctx.vocabulary_mapping.as_deref(),
            Some("http://example.com/vocab/")
        );
        assert_eq!(ctx.default_language.as_deref(), Some("en-us"));
        assert_eq!(
            ctx.expand_iri("term", false, true).unwrap(),
            "http://example.com/vocab/term"
        );
    }

    #[test]
    fn keyword_alias() {
        let ctx = process(&fresh_context(), json!({"id": "@id", "type": "@type"})).unwrap();
        assert_eq!(ctx.term("id").unwrap().iri_mapping.as_deref(), Some("@id"));
        assert_eq!(
            ctx.expand_iri("type", false, true).unwrap(),
            "@type"
        );
    }

    #[test]
    fn keyword_redefinition_fails() {
        let err = process(&fresh_context(), json!({"@id": "http://example.com/id"}));
        assert!(matches!(
            err,
            Err(ContextCreationError::InvalidTerm(
                TermCreationError::KeywordRedefinition
            ))
        ));
    }

    #[test]
    fn cyclic_iri_mapping_fails() {
        let err = process(&fresh_context(), json!({"a": "b:x", "b": "a:y"}));
        assert!(matches!(
            err,
            Err(ContextCreationError::InvalidTerm(
                TermCreationError::CyclicIriMapping
            ))
        ));
    }

    #[test]
    fn invalid_version() {
        let err = process(&fresh_context(), json!({"@version": 1.0}));
        assert!(matches!(
            err,
            Err(ContextCreationError::InvalidVersionValue)
        ));
    }

    #[test]
    fn protected_term_redefinition_fails() {
        let ctx = process(
            &fresh_context(),
            json!({"@protected": true, "name": "http://schema.org/name"}),
        )
        .unwrap();
        assert!(ctx.term("name").unwrap().protected);

        let err = process(&ctx, json!({"name": "http://example.com/other"}));
        assert!(matches!(
            err,
            Err(ContextCreationError::InvalidTerm(
                TermCreationError::ProtectedTermRedefinition
            ))
        ));

        // identical redefinition is permitted
        assert!(process(&ctx, json!({"name": "http://schema.org/name"})).is_ok());
    }

    #[test]
    fn protected_context_nullification_fails() {
        let ctx = process(
            &fresh_context(),
            json!({"@protected": true, "name": "http://schema.org/name"}),
        )
        .unwrap();
        let err = process(&ctx, Value::Null);
        assert!(matches!(
            err,
            Err(ContextCreationError::InvalidContextNullification)
        ));
    }

    #[test]
    fn null_context_resets_terms() {
        let ctx = process(&fresh_context(), json!({"name": "http://schema.org/name"})).unwrap();
        let reset = process(&ctx, Value::Null).unwrap();
        assert!(reset.term("name").is_none());
    }

    #[test]
    fn propagate_false_records_previous_context() {
        let ctx = process(&fresh_context(), json!({"name": "http://schema.org/name"})).unwrap();
        let scoped = ctx
            .process_context(
                &json!({"other": "http://example.com/other"}),
                None,
                &mut Vec::new(),
                false,
                false,
            )
            .unwrap();
        assert!(scoped.previous_context.is_some());
        assert!(scoped
            .previous_context
            .as_ref()
            .unwrap()
            .term("other")
            .is_none());
    }

    #[test]
    fn container_validation() {
        assert!(process(&fresh_context(), json!({"t": {"@id": "http://e/t", "@container": "@list"}})).is_ok());
        assert!(process(
            &fresh_context(),
            json!({"t": {"@id": "http://e/t", "@container": ["@graph", "@id", "@set"]}})
        )
        .is_ok());
        assert!(matches!(
            process(
                &fresh_context(),
                json!({"t": {"@id": "http://e/t", "@container": ["@list", "@set"]}})
            ),
            Err(ContextCreationError::InvalidTerm(
                TermCreationError::InvalidContainerMapping
            ))
        ));
        assert!(matches!(
            process(
                &fresh_context(),
                json!({"t": {"@id": "http://e/t", "@container": "@bogus"}})
            ),
            Err(ContextCreationError::InvalidTerm(
                TermCreationError::InvalidContainerMapping
            ))
        ));
    }

    #[test]
    fn type_container_defaults_type_mapping() {
        let ctx = process(
            &fresh_context(),
            json!({"t": {"@id": "http://e/t", "@container": "@type"}}),
        )
        .unwrap();
        assert_eq!(ctx.term("t").unwrap().type_mapping.as_deref(), Some("@id"));
    }

    #[test]
    fn reverse_term() {
        let ctx = process(
            &fresh_context(),
            json!({"children": {"@reverse": "http://example.com/parent"}}),
        )
        .unwrap();
        let term = ctx.term("children").unwrap();
        assert!(term.reverse);
        assert_eq!(
            term.iri_mapping.as_deref(),
            Some("http://example.com/parent")
        );

        let err = process(
            &fresh_context(),
            json!({"bad": {"@reverse": "http://example.com/p", "@container": "@list"}}),
        );
        assert!(matches!(
            err,
            Err(ContextCreationError::InvalidTerm(
                TermCreationError::InvalidReverseProperty
            ))
        ));
    }

    #[test]
    fn scoped_context_is_stored() {
        let ctx = process(
            &fresh_context(),
            json!({"Person": {
                "@id": "http://example.com/Person",
                "@context": {"name": "http://schema.org/name"}
            }}),
        )
        .unwrap();
        assert!(ctx.term("Person").unwrap().local_context.is_some());
    }

    #[test]
    fn too_many_remote_contexts() {
        let ctx = fresh_context();
        let mut remote = (0..ctx.options.max_remote_contexts)
            .map(|i| format!("http://example.com/ctx{}", i))
            .collect::<Vec<_>>();
        let err = ctx.process_context(
            &json!("http://example.com/one-more"),
            None,
            &mut remote,
            false,
            true,
        );
        assert!(matches!(err, Err(ContextCreationError::ContextOverflow)));
    }
}
