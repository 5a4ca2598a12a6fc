use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::context::{
    is_absolute_iri, is_keyword, is_well_formed_language_tag, Context, NULL_MAPPING,
};
use crate::creation::ContextCreationError;

#[derive(Debug, Error)]
/// Errors that may occur when expanding a JSON-LD structure.
pub enum ExpansionError {
    /// A keyword was used as the key of a reverse map.
    #[error("invalid reverse property map")]
    InvalidReversePropertyMap,

    /// The same keyword appeared twice in one node object.
    #[error("colliding keywords")]
    CollidingKeywords,

    /// `@id` value is not a string.
    #[error("invalid @id value")]
    InvalidIdValue,

    /// `@type` value is neither a string nor an array of strings.
    #[error("invalid type value")]
    InvalidTypeValue,

    /// An element of `@included` is not a node object.
    #[error("invalid @included value")]
    InvalidIncludedValue,

    /// `@value` holds a map or an array.
    #[error("invalid value object value")]
    InvalidValueObjectValue,

    /// `@language` inside a value object is not a string.
    #[error("invalid language-tagged string")]
    InvalidLanguageTaggedString,

    /// `@direction` is neither "ltr" nor "rtl".
    #[error("invalid base direction")]
    InvalidBaseDirection,

    /// `@index` value is not a string.
    #[error("invalid @index value")]
    InvalidIndexValue,

    /// `@reverse` value is not a map.
    #[error("invalid @reverse value")]
    InvalidReverseValue,

    /// A value or list object appeared under a reverse property.
    #[error("invalid reverse property value")]
    InvalidReversePropertyValue,

    /// A nested value is not a map, or contains an entry expanding to
    /// `@value`.
    #[error("invalid @nest value")]
    InvalidNestValue,

    /// A value inside a language map is not a string.
    #[error("invalid language map value")]
    InvalidLanguageMapValue,

    /// A value object carries keys it must not carry.
    #[error("invalid value object")]
    InvalidValueObject,

    /// A non-string `@value` carries an `@language` tag.
    #[error("invalid language-tagged value")]
    InvalidLanguageTaggedValue,

    /// A value object's `@type` is not an IRI.
    #[error("invalid typed value")]
    InvalidTypedValue,

    /// A set or list object carries keys other than `@index`.
    #[error("invalid set or list object")]
    InvalidSetOrListObject,

    /// An error while processing an embedded or scoped context.
    #[error("context expansion error: {0}")]
    Context(#[from] ContextCreationError),
}

pub(crate) fn is_scalar(value: &Value) -> bool {
    !value.is_null() && !value.is_array() && !value.is_object()
}

pub(crate) fn is_value_object(value: &Value) -> bool {
    value.as_object().map_or(false, |m| m.contains_key("@value"))
}

pub(crate) fn is_list_object(value: &Value) -> bool {
    value.as_object().map_or(false, |m| {
        m.contains_key("@list") && (m.len() == 1 || (m.len() == 2 && m.contains_key("@index")))
    })
}

pub(crate) fn is_graph_object(value: &Value) -> bool {
    value.as_object().map_or(false, |m| {
        m.contains_key("@graph")
            && m.keys()
                .all(|k| matches!(k.as_str(), "@graph" | "@id" | "@index"))
    })
}

pub(crate) fn is_node_object(value: &Value) -> bool {
    value.as_object().map_or(false, |m| {
        !m.contains_key("@value") && !m.contains_key("@list") && !m.contains_key("@set")
    })
}

fn is_default_object(value: &Value) -> bool {
    value.as_object().map_or(false, |m| m.contains_key("@default"))
}

fn is_array_of_strings(value: &Value) -> bool {
    value
        .as_array()
        .map_or(false, |items| items.iter().all(Value::is_string))
}

fn is_array_of_scalars(value: &Value) -> bool {
    value
        .as_array()
        .map_or(false, |items| items.iter().all(is_scalar))
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map_or(false, |m| m.is_empty())
}

fn is_empty_array(value: &Value) -> bool {
    value.as_array().map_or(false, |a| a.is_empty())
}

fn ensure_array(value: Value) -> Value {
    match value {
        Value::Array(_) => value,
        other => Value::Array(vec![other]),
    }
}

fn item_has_key(value: &Value, key: &str) -> bool {
    value.as_object().map_or(false, |m| m.contains_key(key))
}

/// Adds `value` to the `key` entry of `object`, always representing the
/// entry as an array and flattening array values element-wise.
pub(crate) fn add_value(object: &mut Map<String, Value>, key: &str, value: Value, as_array: bool) {
    if as_array {
        match object.get(key) {
            None => {
                object.insert(key.to_owned(), Value::Array(Vec::new()));
            }
            Some(existing) if !existing.is_array() => {
                let original = object.remove(key).unwrap();
                object.insert(key.to_owned(), Value::Array(vec![original]));
            }
            _ => {}
        }
    }

    if let Value::Array(values) = value {
        for v in values {
            add_value(object, key, v, as_array);
        }
        return;
    }

    match object.get_mut(key) {
        None => {
            object.insert(key.to_owned(), value);
        }
        Some(Value::Array(existing)) => existing.push(value),
        Some(_) => {
            let original = object.remove(key).unwrap();
            object.insert(key.to_owned(), Value::Array(vec![original, value]));
        }
    }
}

impl Context {
    /// The Expansion algorithm. Dispatches on the element kind and
    /// returns the fully expanded value, `Value::Null` meaning the
    /// element was dropped.
    pub(crate) fn expand_element(
        &self,
        active_property: Option<&str>,
        element: &Value,
        base_url: Option<&Url>,
        frame_expansion: bool,
        ordered: bool,
        from_map: bool,
    ) -> Result<Value, ExpansionError> {
        if element.is_null() {
            return Ok(Value::Null);
        }

        let frame_expansion = frame_expansion && active_property != Some("@default");

        // property-scoped context from the active property's definition,
        // captured before any previous-context restoration below
        let property_scoped = active_property
            .and_then(|p| self.term(p))
            .and_then(|t| t.local_context.clone().map(|lc| (lc, t.base_url.clone())));

        match element {
            Value::Array(items) => self.expand_array(
                active_property,
                items,
                base_url,
                frame_expansion,
                ordered,
                from_map,
            ),
            Value::Object(map) => self.expand_object(
                active_property,
                map,
                base_url,
                property_scoped,
                frame_expansion,
                ordered,
                from_map,
            ),
            scalar => {
                // free-floating scalars are dropped
                if active_property.is_none() || active_property == Some("@graph") {
                    return Ok(Value::Null);
                }
                match &property_scoped {
                    Some((local, term_base)) => {
                        let active = self.process_context(
                            local,
                            term_base.as_ref(),
                            &mut Vec::new(),
                            true,
                            true,
                        )?;
                        Ok(active.expand_value(active_property.unwrap(), scalar))
                    }
                    None => Ok(self.expand_value(active_property.unwrap(), scalar)),
                }
            }
        }
    }

    fn expand_array(
        &self,
        active_property: Option<&str>,
        items: &[Value],
        base_url: Option<&Url>,
        frame_expansion: bool,
        ordered: bool,
        from_map: bool,
    ) -> Result<Value, ExpansionError> {
        let mut result = Vec::new();
        let container_has_list = active_property
            .and_then(|p| self.term(p))
            .map_or(false, |t| t.has_container("@list"));

        for item in items {
            let mut expanded_item = self.expand_element(
                active_property,
                item,
                base_url,
                frame_expansion,
                ordered,
                from_map,
            )?;

            // nested arrays under a list container become nested lists
            if container_has_list && expanded_item.is_array() {
                let mut map = Map::new();
                map.insert("@list".to_owned(), expanded_item);
                expanded_item = Value::Object(map);
            }

            match expanded_item {
                Value::Null => {}
                Value::Array(inner) => result.extend(inner),
                other => result.push(other),
            }
        }

        Ok(Value::Array(result))
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_object(
        &self,
        active_property: Option<&str>,
        element: &Map<String, Value>,
        base_url: Option<&Url>,
        property_scoped: Option<(Value, Option<Url>)>,
        frame_expansion: bool,
        ordered: bool,
        from_map: bool,
    ) -> Result<Value, ExpansionError> {
        let mut active = self.clone();

        // The scope of a type-scoped context does not apply to new node
        // objects: revert unless this element is a value object or a lone
        // @id reference arriving from a container map.
        if active.previous_context.is_some() && !from_map {
            let mut use_previous = true;
            for key in element.keys() {
                match active.expand_iri(key, false, true).as_deref() {
                    Some("@value") => {
                        use_previous = false;
                        break;
                    }
                    Some("@id") if element.len() == 1 => {
                        use_previous = false;
                        break;
                    }
                    _ => {}
                }
            }
            if use_previous {
                let previous = active.previous_context.clone().unwrap();
                active = (*previous).clone();
            }
        }

        if let Some((local, term_base)) = &property_scoped {
            active = active.process_context(local, term_base.as_ref(), &mut Vec::new(), true, true)?;
        }

        if let Some(local_context) = element.get("@context") {
            active = active.process_context(local_context, base_url, &mut Vec::new(), false, true)?;
        }

        let type_scoped_context = active.clone();

        let (new_active, input_type) = find_input_type(active, &type_scoped_context, element)?;
        let active = new_active;

        let mut result = Map::new();
        expand_entries(
            &active,
            &type_scoped_context,
            input_type.as_deref(),
            active_property,
            element,
            base_url,
            &mut result,
            frame_expansion,
            ordered,
        )?;

        // value object validation
        if result.contains_key("@value") {
            for key in result.keys() {
                if !matches!(
                    key.as_str(),
                    "@direction" | "@index" | "@language" | "@type" | "@value"
                ) {
                    return Err(ExpansionError::InvalidValueObject);
                }
            }
            if result.contains_key("@type")
                && (result.contains_key("@language") || result.contains_key("@direction"))
            {
                return Err(ExpansionError::InvalidValueObject);
            }

            let type_is_json = match result.get("@type") {
                Some(Value::String(s)) => s == "@json",
                Some(Value::Array(items)) => items.iter().any(|v| v == "@json"),
                _ => false,
            };

            if !type_is_json {
                let value = result.get("@value").unwrap();
                if value.is_null() || is_empty_array(value) {
                    return Ok(Value::Null);
                }
                if !value.is_string() && result.contains_key("@language") {
                    return Err(ExpansionError::InvalidLanguageTaggedValue);
                }
                if let Some(type_value) = result.get("@type") {
                    if !type_value.as_str().map_or(false, is_absolute_iri) {
                        return Err(ExpansionError::InvalidTypedValue);
                    }
                }
            }
        } else if let Some(type_value) = result.get("@type") {
            if !type_value.is_array() {
                let t = result.remove("@type").unwrap();
                result.insert("@type".to_owned(), Value::Array(vec![t]));
            }
        } else if result.contains_key("@set") || result.contains_key("@list") {
            let allowed = if result.contains_key("@index") { 2 } else { 1 };
            if result.len() > allowed {
                return Err(ExpansionError::InvalidSetOrListObject);
            }
            if result.contains_key("@set") {
                return Ok(result.remove("@set").unwrap());
            }
        }

        if result.len() == 1 && result.contains_key("@language") {
            return Ok(Value::Null);
        }

        // drop free-floating values
        if active_property.is_none() || active_property == Some("@graph") {
            if result.is_empty()
                || result.contains_key("@value")
                || result.contains_key("@list")
            {
                return Ok(Value::Null);
            }
            if result.len() == 1 && result.contains_key("@id") && !frame_expansion {
                return Ok(Value::Null);
            }
        }

        Ok(Value::Object(result))
    }
}

/// Folds type-scoped contexts into the active context and resolves the
/// input type: the expansion of the last (lexicographically) value of the
/// first entry expanding to `@type`.
fn find_input_type(
    mut active: Context,
    type_scoped: &Context,
    element: &Map<String, Value>,
) -> Result<(Context, Option<String>), ExpansionError> {
    let mut type_key: Option<&String> = None;

    let mut keys: Vec<&String> = element.keys().collect();
    keys.sort();

    for key in keys {
        if active.expand_iri(key, false, true).as_deref() != Some("@type") {
            continue;
        }
        if type_key.is_none() {
            type_key = Some(key);
        }

        let mut terms: Vec<&str> = match element.get(key).unwrap() {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        terms.sort_unstable();

        for term in terms {
            if let Some(definition) = type_scoped.term(term) {
                if let Some(local) = definition.local_context.clone() {
                    let term_base = definition.base_url.clone();
                    active = active.process_context(
                        &local,
                        term_base.as_ref(),
                        &mut Vec::new(),
                        false,
                        false,
                    )?;
                }
            }
        }
    }

    let input_type = match type_key {
        None => None,
        Some(key) => {
            let last = match element.get(key).unwrap() {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => {
                    let mut values: Vec<&str> =
                        items.iter().filter_map(Value::as_str).collect();
                    values.sort_unstable();
                    values.last().map(|s| (*s).to_owned())
                }
                _ => None,
            };
            last.and_then(|v| active.expand_iri(&v, false, true))
        }
    };

    Ok((active, input_type))
}

/// The per-entry pass of the expansion algorithm, factored out so nested
/// (`@nest`) maps can re-enter it against the same result map.
#[allow(clippy::too_many_arguments)]
fn expand_entries(
    active: &Context,
    type_scoped: &Context,
    input_type: Option<&str>,
    active_property: Option<&str>,
    element: &Map<String, Value>,
    base_url: Option<&Url>,
    result: &mut Map<String, Value>,
    frame_expansion: bool,
    ordered: bool,
) -> Result<(), ExpansionError> {
    let mut nests: Vec<String> = Vec::new();

    let mut keys: Vec<&String> = element.keys().collect();
    if ordered {
        keys.sort();
    }

    for key in keys {
        if key == "@context" {
            continue;
        }
        let element_value = element.get(key).unwrap();

        let expanded_property = match active.expand_iri(key, false, true) {
            Some(p) => p,
            None => continue,
        };
        if !expanded_property.contains(':') && !is_keyword(&expanded_property) {
            continue;
        }

        if is_keyword(&expanded_property) {
            if active_property == Some("@reverse") {
                return Err(ExpansionError::InvalidReversePropertyMap);
            }
            if result.contains_key(&expanded_property)
                && (active.mode_1_0()
                    || (expanded_property != "@included" && expanded_property != "@type"))
            {
                return Err(ExpansionError::CollidingKeywords);
            }

            let expanded_value: Value = match expanded_property.as_str() {
                "@id" => {
                    if let Some(id) = element_value.as_str() {
                        active
                            .expand_iri(id, true, false)
                            .map(Value::String)
                            .unwrap_or(Value::Null)
                    } else if frame_expansion {
                        match element_value {
                            Value::Object(m) if m.is_empty() => element_value.clone(),
                            Value::Array(items) => {
                                let mut out = Vec::new();
                                for item in items {
                                    let s = item
                                        .as_str()
                                        .ok_or(ExpansionError::InvalidIdValue)?;
                                    out.push(
                                        active
                                            .expand_iri(s, true, false)
                                            .map(Value::String)
                                            .unwrap_or(Value::Null),
                                    );
                                }
                                Value::Array(out)
                            }
                            _ => return Err(ExpansionError::InvalidIdValue),
                        }
                    } else {
                        return Err(ExpansionError::InvalidIdValue);
                    }
                }

                "@type" => {
                    let valid = element_value.is_string()
                        || is_array_of_strings(element_value)
                        || (frame_expansion
                            && (is_empty_object(element_value)
                                || (is_default_object(element_value)
                                    && element_value["@default"].is_string())));
                    if !valid {
                        return Err(ExpansionError::InvalidTypeValue);
                    }

                    let mut expanded_value = match element_value {
                        Value::Object(m) if m.is_empty() => element_value.clone(),
                        Value::Object(m) => {
                            let default = m.get("@default").and_then(Value::as_str).unwrap();
                            let mut out = Map::new();
                            out.insert(
                                "@default".to_owned(),
                                type_scoped
                                    .expand_iri(default, true, true)
                                    .map(Value::String)
                                    .unwrap_or(Value::Null),
                            );
                            Value::Object(out)
                        }
                        Value::String(s) => type_scoped
                            .expand_iri(s, true, true)
                            .map(Value::String)
                            .unwrap_or(Value::Null),
                        Value::Array(items) => Value::Array(
                            items
                                .iter()
                                .map(|item| {
                                    type_scoped
                                        .expand_iri(item.as_str().unwrap(), true, true)
                                        .map(Value::String)
                                        .unwrap_or(Value::Null)
                                })
                                .collect(),
                        ),
                        _ => unreachable!(),
                    };

                    if let Some(existing) = result.remove("@type") {
                        let mut merged = match existing {
                            Value::Array(items) => items,
                            other => vec![other],
                        };
                        match expanded_value {
                            Value::Array(items) => merged.extend(items),
                            other => merged.push(other),
                        }
                        expanded_value = Value::Array(merged);
                    }
                    expanded_value
                }

                "@graph" => ensure_array(active.expand_element(
                    Some("@graph"),
                    element_value,
                    base_url,
                    frame_expansion,
                    ordered,
                    false,
                )?),

                "@included" => {
                    if active.mode_1_0() {
                        continue;
                    }
                    let mut expanded_value = ensure_array(active.expand_element(
                        None,
                        element_value,
                        base_url,
                        frame_expansion,
                        ordered,
                        false,
                    )?);
                    for item in expanded_value.as_array().unwrap() {
                        if !is_node_object(item) {
                            return Err(ExpansionError::InvalidIncludedValue);
                        }
                    }
                    if let Some(existing) = result.remove("@included") {
                        let mut merged = match existing {
                            Value::Array(items) => items,
                            other => vec![other],
                        };
                        merged.extend(expanded_value.as_array().unwrap().iter().cloned());
                        expanded_value = Value::Array(merged);
                    }
                    expanded_value
                }

                "@value" => {
                    if input_type == Some("@json") {
                        if active.mode_1_0() {
                            return Err(ExpansionError::InvalidValueObjectValue);
                        }
                        element_value.clone()
                    } else if element_value.is_null()
                        || is_scalar(element_value)
                        || (frame_expansion
                            && (is_empty_object(element_value)
                                || is_array_of_scalars(element_value)))
                    {
                        let mut value = element_value.clone();
                        if frame_expansion && !value.is_array() {
                            value = Value::Array(vec![value]);
                        }
                        // a null @value must be preserved, the meaning of
                        // @type depends on its presence
                        if value.is_null() {
                            result.insert("@value".to_owned(), Value::Null);
                            continue;
                        }
                        value
                    } else {
                        return Err(ExpansionError::InvalidValueObjectValue);
                    }
                }

                "@language" => {
                    if let Some(tag) = element_value.as_str() {
                        if !is_well_formed_language_tag(tag) {
                            tracing::warn!(language = tag, "language tag is not well-formed");
                        }
                        Value::String(tag.to_lowercase())
                    } else if frame_expansion
                        && (is_empty_object(element_value)
                            || is_empty_array(element_value)
                            || is_array_of_strings(element_value))
                    {
                        element_value.clone()
                    } else {
                        return Err(ExpansionError::InvalidLanguageTaggedString);
                    }
                }

                "@direction" => {
                    if active.mode_1_0() {
                        continue;
                    }
                    let valid = matches!(element_value.as_str(), Some("ltr") | Some("rtl"))
                        || (frame_expansion
                            && (is_empty_object(element_value)
                                || is_empty_array(element_value)
                                || is_array_of_strings(element_value)));
                    if !valid {
                        return Err(ExpansionError::InvalidBaseDirection);
                    }
                    let mut value = element_value.clone();
                    if frame_expansion && !value.is_array() {
                        value = Value::Array(vec![value]);
                    }
                    value
                }

                "@index" => {
                    if !element_value.is_string() {
                        return Err(ExpansionError::InvalidIndexValue);
                    }
                    element_value.clone()
                }

                "@list" => {
                    // free-floating lists are removed
                    if active_property.is_none() || active_property == Some("@graph") {
                        continue;
                    }
                    ensure_array(active.expand_element(
                        active_property,
                        element_value,
                        base_url,
                        frame_expansion,
                        ordered,
                        false,
                    )?)
                }

                "@set" => active.expand_element(
                    active_property,
                    element_value,
                    base_url,
                    frame_expansion,
                    ordered,
                    false,
                )?,

                "@reverse" => {
                    if !element_value.is_object() {
                        return Err(ExpansionError::InvalidReverseValue);
                    }
                    let expanded = active.expand_element(
                        Some("@reverse"),
                        element_value,
                        base_url,
                        frame_expansion,
                        ordered,
                        false,
                    )?;

                    if let Value::Object(mut expanded) = expanded {
                        // doubly-reversed entries merge back into result
                        if let Some(Value::Object(reverse)) = expanded.remove("@reverse") {
                            for (property, item) in reverse {
                                add_value(result, &property, item, true);
                            }
                        }

                        if !expanded.is_empty() {
                            if !result.contains_key("@reverse") {
                                result.insert("@reverse".to_owned(), Value::Object(Map::new()));
                            }
                            let reverse_map =
                                result.get_mut("@reverse").unwrap().as_object_mut().unwrap();

                            for (property, items) in expanded {
                                let items = match items {
                                    Value::Array(items) => items,
                                    other => vec![other],
                                };
                                for item in items {
                                    if is_value_object(&item) || is_list_object(&item) {
                                        return Err(
                                            ExpansionError::InvalidReversePropertyValue,
                                        );
                                    }
                                    add_value(reverse_map, &property, item, true);
                                }
                            }
                        }
                    }
                    continue;
                }

                "@nest" => {
                    nests.push(key.clone());
                    continue;
                }

                "@default" | "@embed" | "@explicit" | "@omitDefault" | "@requireAll"
                    if frame_expansion =>
                {
                    active.expand_element(
                        active_property,
                        element_value,
                        base_url,
                        frame_expansion,
                        ordered,
                        false,
                    )?
                }

                _ => continue,
            };

            if !expanded_value.is_null()
                || (expanded_property == "@value" && input_type == Some("@json"))
            {
                result.insert(expanded_property, expanded_value);
            }
            continue;
        }

        // non-keyword entries
        let key_definition = active.term(key).cloned();
        let container = key_definition
            .as_ref()
            .map(|d| d.container_mapping.clone())
            .unwrap_or_default();
        let has_container = |c: &str| container.iter().any(|x| x == c);

        let mut expanded_value: Value;

        if key_definition
            .as_ref()
            .and_then(|d| d.type_mapping.as_deref())
            == Some("@json")
        {
            let mut map = Map::new();
            map.insert("@value".to_owned(), element_value.clone());
            map.insert("@type".to_owned(), Value::String("@json".to_owned()));
            expanded_value = Value::Object(map);
        } else if has_container("@language") && element_value.is_object() {
            let language_map = element_value.as_object().unwrap();
            let mut items = Vec::new();

            let direction = match key_definition
                .as_ref()
                .and_then(|d| d.direction_mapping.as_deref())
            {
                Some(mapping) if mapping == NULL_MAPPING => None,
                Some(mapping) => Some(mapping.to_owned()),
                None => active.default_base_direction.clone(),
            };

            let mut languages: Vec<&String> = language_map.keys().collect();
            if ordered {
                languages.sort();
            }

            for language in languages {
                let language_value = language_map.get(language).unwrap();
                let language_values: Vec<&Value> = match language_value {
                    Value::Array(values) => values.iter().collect(),
                    Value::Null => continue,
                    other => vec![other],
                };

                for item in language_values {
                    if item.is_null() {
                        continue;
                    }
                    let text = item
                        .as_str()
                        .ok_or(ExpansionError::InvalidLanguageMapValue)?;

                    let mut v = Map::new();
                    v.insert("@value".to_owned(), Value::String(text.to_owned()));

                    let lowered = language.to_lowercase();
                    if language != "@none" && !is_well_formed_language_tag(&lowered) {
                        tracing::warn!(language = %language, "language tag is not well-formed");
                    }
                    if language != "@none"
                        && active.expand_iri(language, false, true).as_deref() != Some("@none")
                    {
                        v.insert("@language".to_owned(), Value::String(lowered));
                    }
                    if let Some(dir) = &direction {
                        v.insert("@direction".to_owned(), Value::String(dir.clone()));
                    }
                    items.push(Value::Object(v));
                }
            }
            expanded_value = Value::Array(items);
        } else if element_value.is_object()
            && (has_container("@index") || has_container("@type") || has_container("@id"))
        {
            let entry_map = element_value.as_object().unwrap();
            let mut items = Vec::new();
            let index_key = key_definition
                .as_ref()
                .and_then(|d| d.index_mapping.clone())
                .unwrap_or_else(|| "@index".to_owned());

            let mut index_keys: Vec<&String> = entry_map.keys().collect();
            if ordered {
                index_keys.sort();
            }

            for index in index_keys {
                let index_value = entry_map.get(index).unwrap();

                // id and type containers step out of any type-scoped context
                let mut map_context = if has_container("@id") || has_container("@type") {
                    match &active.previous_context {
                        Some(previous) => (**previous).clone(),
                        None => active.clone(),
                    }
                } else {
                    active.clone()
                };

                if has_container("@type") {
                    if let Some(definition) = map_context.term(index).cloned() {
                        if let Some(local) = definition.local_context {
                            map_context = map_context.process_context(
                                &local,
                                definition.base_url.as_ref(),
                                &mut Vec::new(),
                                false,
                                true,
                            )?;
                        }
                    }
                }

                let expanded_index = active.expand_iri(index, false, true);
                let is_none_index = expanded_index.as_deref() == Some("@none");

                let index_array = ensure_array(index_value.clone());
                let expanded_items = map_context.expand_element(
                    Some(key.as_str()),
                    &index_array,
                    base_url,
                    frame_expansion,
                    ordered,
                    true,
                )?;
                let expanded_items = match expanded_items {
                    Value::Array(items) => items,
                    other => vec![other],
                };

                for mut item in expanded_items {
                    if has_container("@graph") && !is_graph_object(&item) {
                        let wrapped = ensure_array(item);
                        let mut map = Map::new();
                        map.insert("@graph".to_owned(), wrapped);
                        item = Value::Object(map);
                    }

                    if has_container("@index") && index_key != "@index" && !is_none_index {
                        let re_expanded =
                            active.expand_value(&index_key, &Value::String(index.clone()));
                        if let Some(expanded_index_key) =
                            active.expand_iri(&index_key, false, true)
                        {
                            let object = item.as_object_mut().unwrap();
                            let mut values = vec![re_expanded];
                            if let Some(existing) = object.remove(&expanded_index_key) {
                                match existing {
                                    Value::Array(existing) => values.extend(existing),
                                    other => values.push(other),
                                }
                            }
                            object.insert(expanded_index_key, Value::Array(values));
                            if object.contains_key("@value") && object.len() > 1 {
                                return Err(ExpansionError::InvalidValueObject);
                            }
                        }
                    } else if has_container("@index")
                        && !item_has_key(&item, "@index")
                        && !is_none_index
                    {
                        item.as_object_mut()
                            .unwrap()
                            .insert("@index".to_owned(), Value::String(index.clone()));
                    } else if has_container("@id")
                        && !item_has_key(&item, "@id")
                        && !is_none_index
                    {
                        let expanded_id = active.expand_iri(index, true, false);
                        item.as_object_mut().unwrap().insert(
                            "@id".to_owned(),
                            expanded_id.map(Value::String).unwrap_or(Value::Null),
                        );
                    } else if has_container("@type") && !is_none_index {
                        let object = item.as_object_mut().unwrap();
                        let mut types = vec![expanded_index
                            .clone()
                            .map(Value::String)
                            .unwrap_or(Value::Null)];
                        if let Some(existing) = object.remove("@type") {
                            match existing {
                                Value::Array(existing) => types.extend(existing),
                                other => types.push(other),
                            }
                        }
                        object.insert("@type".to_owned(), Value::Array(types));
                    }

                    items.push(item);
                }
            }
            expanded_value = Value::Array(items);
        } else {
            expanded_value = active.expand_element(
                Some(key.as_str()),
                element_value,
                base_url,
                frame_expansion,
                ordered,
                false,
            )?;
        }

        if expanded_value.is_null() {
            continue;
        }

        if has_container("@list") && !is_list_object(&expanded_value) {
            let wrapped = ensure_array(expanded_value);
            let mut map = Map::new();
            map.insert("@list".to_owned(), wrapped);
            expanded_value = Value::Object(map);
        }

        if has_container("@graph") && !has_container("@id") && !has_container("@index") {
            let items = match expanded_value {
                Value::Array(items) => items,
                other => vec![other],
            };
            expanded_value = Value::Array(
                items
                    .into_iter()
                    .map(|ev| {
                        let wrapped = ensure_array(ev);
                        let mut map = Map::new();
                        map.insert("@graph".to_owned(), wrapped);
                        Value::Object(map)
                    })
                    .collect(),
            );
        }

        if active.is_reverse_property(key) {
            if !result.contains_key("@reverse") {
                result.insert("@reverse".to_owned(), Value::Object(Map::new()));
            }
            let reverse_map = result.get_mut("@reverse").unwrap().as_object_mut().unwrap();

            let items = match expanded_value {
                Value::Array(items) => items,
                other => vec![other],
            };
            for item in items {
                if is_value_object(&item) || is_list_object(&item) {
                    return Err(ExpansionError::InvalidReversePropertyValue);
                }
                add_value(reverse_map, &expanded_property, item, true);
            }
        } else {
            add_value(result, &expanded_property, expanded_value, true);
        }
    }

    // nested maps re-enter the entry pass under their nesting key
    if ordered {
        nests.sort();
    }
    for nesting_key in nests {
        let nested_values = element.get(&nesting_key).unwrap();
        let nested_values: Vec<&Value> = match nested_values {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for nested_value in nested_values {
            let nested_map = match nested_value {
                Value::Object(map) => map,
                _ => return Err(ExpansionError::InvalidNestValue),
            };
            for nested_key in nested_map.keys() {
                if active.expand_iri(nested_key, false, true).as_deref() == Some("@value") {
                    return Err(ExpansionError::InvalidNestValue);
                }
            }

            let nest_active = match active
                .term(&nesting_key)
                .and_then(|t| t.local_context.clone().map(|lc| (lc, t.base_url.clone())))
            {
                Some((local, term_base)) => active.process_context(
                    &local,
                    term_base.as_ref(),
                    &mut Vec::new(),
                    true,
                    true,
                )?,
                None => active.clone(),
            };

            expand_entries(
                &nest_active,
                type_scoped,
                input_type,
                Some(nesting_key.as_str()),
                nested_map,
                base_url,
                result,
                frame_expansion,
                ordered,
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{expand, JsonLdOptions};
    use serde_json::json;

    fn expand_default(input: Value) -> Result<Value, crate::api::JsonLdError> {
        expand(&input, &JsonLdOptions::default())
    }

    #[test]
    fn compact_property_expansion() {
        let input = json!({
            "@context": {"name": "http://schema.org/name"},
            "name": "Alice"
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{"http://schema.org/name": [{"@value": "Alice"}]}])
        );
    }

    #[test]
    fn free_floating_scalars_dropped() {
        assert_eq!(expand_default(json!(["loose"])).unwrap(), json!([]));
        assert_eq!(
            expand_default(json!({"@value": "loose"})).unwrap(),
            json!([])
        );
    }

    #[test]
    fn list_container() {
        let input = json!({
            "@context": {"tags": {"@id": "http://example.com/tags", "@container": "@list"}},
            "tags": ["a", "b"]
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{"http://example.com/tags": [{"@list": [{"@value": "a"}, {"@value": "b"}]}]}])
        );
    }

    #[test]
    fn type_scoped_context() {
        let input = json!({
            "@context": {
                "@vocab": "http://ex/",
                "Person": {"@id": "Person", "@context": {"name": "http://schema.org/name"}}
            },
            "@type": "Person",
            "name": "Bob"
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{
                "@type": ["http://ex/Person"],
                "http://schema.org/name": [{"@value": "Bob"}]
            }])
        );
    }

    #[test]
    fn property_scoped_context() {
        let input = json!({
            "@context": {
                "@vocab": "http://ex/",
                "detail": {"@id": "detail", "@context": {"code": "http://ex/status-code"}}
            },
            "detail": {"code": "broken"}
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{
                "http://ex/detail": [{"http://ex/status-code": [{"@value": "broken"}]}]
            }])
        );
    }

    #[test]
    fn json_literal() {
        let input = json!({
            "@context": {"v": {"@id": "http://ex/v", "@type": "@json"}},
            "v": {"x": 1}
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{"http://ex/v": [{"@value": {"x": 1}, "@type": "@json"}]}])
        );
    }

    #[test]
    fn language_map() {
        let input = json!({
            "@context": {
                "label": {"@id": "http://ex/label", "@container": "@language"}
            },
            "label": {"EN": "hello", "de": ["hallo", "guten tag"], "@none": "plain"}
        });
        let expanded = expand_default(input).unwrap();
        let values = expanded[0]["http://ex/label"].as_array().unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.contains(&json!({"@value": "hello", "@language": "en"})));
        assert!(values.contains(&json!({"@value": "hallo", "@language": "de"})));
        assert!(values.contains(&json!({"@value": "plain"})));
    }

    #[test]
    fn index_map() {
        let input = json!({
            "@context": {
                "post": {"@id": "http://ex/post", "@container": "@index"}
            },
            "post": {"v1": {"@id": "http://ex/posts/1"}, "v2": {"@id": "http://ex/posts/2"}}
        });
        let expanded = expand_default(input).unwrap();
        let posts = expanded[0]["http://ex/post"].as_array().unwrap();
        assert!(posts.contains(&json!({"@id": "http://ex/posts/1", "@index": "v1"})));
        assert!(posts.contains(&json!({"@id": "http://ex/posts/2", "@index": "v2"})));
    }

    #[test]
    fn id_map() {
        let input = json!({
            "@context": {
                "@vocab": "http://ex/",
                "post": {"@id": "http://ex/post", "@container": "@id"}
            },
            "post": {
                "http://ex/posts/1": {"title": "one"},
                "http://ex/posts/2": {"title": "two"}
            }
        });
        let expanded = expand_default(input).unwrap();
        let posts = expanded[0]["http://ex/post"].as_array().unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts
            .iter()
            .any(|p| p["@id"] == json!("http://ex/posts/1")
                && p["http://ex/title"] == json!([{"@value": "one"}])));
    }

    #[test]
    fn graph_container() {
        let input = json!({
            "@context": {
                "input": {"@id": "http://ex/input", "@container": "@graph"}
            },
            "input": {"http://ex/value": "x"}
        });
        let expanded = expand_default(input).unwrap();
        assert_eq!(
            expanded,
            json!([{
                "http://ex/input": [{"@graph": [{"http://ex/value": [{"@value": "x"}]}]}]
            }])
        );
    }

    #[test]
    fn reverse_property() {
        let input = json!({
            "@context": {
                "children": {"@reverse": "http://ex/parent"}
            },
            "@id": "http://ex/root",
            "children": [{"@id": "http://ex/a"}, {"@id": "http://ex/b"}]
        });
        let expanded = expand_default(input).unwrap();
        assert_eq!(
            expanded,
            json!([{
                "@id": "http://ex/root",
                "@reverse": {"http://ex/parent": [
                    {"@id": "http://ex/a"}, {"@id": "http://ex/b"}
                ]}
            }])
        );
    }

    #[test]
    fn reverse_value_object_rejected() {
        let input = json!({
            "@context": {"children": {"@reverse": "http://ex/parent"}},
            "children": "just a string"
        });
        let err = expand_default(input).unwrap_err();
        assert_eq!(err.code(), "invalid reverse property value");
    }

    #[test]
    fn nest_entries_are_expanded() {
        let input = json!({
            "@context": {
                "@vocab": "http://ex/",
                "meta": "@nest"
            },
            "@id": "http://ex/thing",
            "meta": {"label": "inner", "@type": "Thing"}
        });
        let expanded = expand_default(input).unwrap();
        assert_eq!(
            expanded,
            json!([{
                "@id": "http://ex/thing",
                "@type": ["http://ex/Thing"],
                "http://ex/label": [{"@value": "inner"}]
            }])
        );
    }

    #[test]
    fn nest_with_value_rejected() {
        let input = json!({
            "@context": {"@vocab": "http://ex/", "meta": "@nest"},
            "meta": {"@value": "oops"}
        });
        let err = expand_default(input).unwrap_err();
        assert_eq!(err.code(), "invalid @nest value");
    }

    #[test]
    fn colliding_keywords() {
        let input = json!({
            "@context": {"id": "@id"},
            "id": "http://ex/a",
            "@id": "http://ex/b"
        });
        let err = expand_default(input).unwrap_err();
        assert_eq!(err.code(), "colliding keywords");
    }

    #[test]
    fn value_object_validation() {
        let err = expand_default(json!({
            "http://ex/p": {"@value": "x", "@id": "http://ex/y"}
        }))
        .unwrap_err();
        assert_eq!(err.code(), "invalid value object");

        let err = expand_default(json!({
            "http://ex/p": {"@value": 5, "@language": "en"}
        }))
        .unwrap_err();
        assert_eq!(err.code(), "invalid language-tagged value");

        // a null @value drops the whole object
        assert_eq!(
            expand_default(json!({"http://ex/p": {"@value": null}})).unwrap(),
            json!([])
        );
    }

    #[test]
    fn direction_expansion() {
        let input = json!({
            "@context": {"@direction": "rtl", "title": "http://ex/title"},
            "title": "مرحبا"
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{"http://ex/title": [{"@value": "مرحبا", "@direction": "rtl"}]}])
        );
    }

    #[test]
    fn previous_context_restored_for_nested_nodes() {
        // the type-scoped vocabulary must not leak into nested node objects
        let input = json!({
            "@context": {
                "@vocab": "http://outer/",
                "Inner": {
                    "@id": "http://outer/Inner",
                    "@context": {"@vocab": "http://inner/"}
                },
                "link": {"@id": "http://outer/link"}
            },
            "@type": "Inner",
            "a": "in scope",
            "link": {"a": "back out of scope"}
        });
        let expanded = expand_default(input).unwrap();
        let node = &expanded[0];
        assert!(node["http://inner/a"].is_array());
        let nested = &node["http://outer/link"][0];
        assert!(nested["http://inner/a"].is_null());
        assert!(nested["http://outer/a"].is_array());
    }

    #[test]
    fn set_is_unwrapped() {
        let input = json!({
            "http://ex/p": {"@set": ["a", "b"]}
        });
        assert_eq!(
            expand_default(input).unwrap(),
            json!([{"http://ex/p": [{"@value": "a"}, {"@value": "b"}]}])
        );
    }

    #[test]
    fn included_nodes() {
        let input = json!({
            "@context": {"@vocab": "http://ex/"},
            "@id": "http://ex/outer",
            "@included": [{"@id": "http://ex/inner", "label": "x"}]
        });
        let expanded = expand_default(input).unwrap();
        assert_eq!(
            expanded[0]["@included"],
            json!([{"@id": "http://ex/inner", "http://ex/label": [{"@value": "x"}]}])
        );

        let err = expand_default(json!({
            "@id": "http://ex/outer",
            "http://ex/p": "keep",
            "@included": {"@value": "not a node"}
        }))
        .unwrap_err();
        assert_eq!(err.code(), "invalid @included value");
    }
}
