//! Node-map generation: flattens expanded JSON-LD into statically-typed
//! nodes keyed by graph and subject.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Map;
use serde_json::Value as JValue;
use thiserror::Error;

#[derive(Debug, Error)]
/// An error that occurs when generating node maps.
pub enum NodeMapError {
    /// Value that should have been a string is not a string.
    #[error("expected string")]
    ExpectedString,

    /// `@type` value is not a string or array of strings.
    #[error("invalid type value")]
    InvalidTypeValue,

    /// `@index` value is not a string.
    #[error("invalid @index value")]
    InvalidIndexValue,

    /// `@reverse` value is not an object.
    #[error("invalid @reverse value")]
    InvalidReverseValue,

    /// Two objects with the same ID have different `@index` values.
    #[error("conflicting indexes")]
    ConflictingIndexes,

    /// `@id` value is not a string.
    #[error("invalid @id value")]
    InvalidIdValue,

    /// Value passed into node map generation was neither an array nor an
    /// object.
    #[error("invalid object passed to node map generation")]
    InvalidObject,
}

#[derive(PartialEq, Debug, Clone)]
/// The equivalent to a JSON-LD `@value` object.
pub struct Value {
    /// The value contained within this JSON-LD value object. If `type_id`
    /// is `None`, the interpretations are trivial; with `type_id` set the
    /// contents are interpreted through that datatype.
    pub value: JValue,

    /// The (optional) type of this value object. `type_id` and `language`
    /// cannot be `Some` at the same time.
    pub type_id: Option<String>,

    /// The (optional) language of the value object. If `Some`, the value
    /// is always a language string.
    pub language: Option<String>,

    /// The (optional) base direction of a language-tagged string.
    pub direction: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// A reference contained in the node map.
pub enum Pointer {
    /// A reference to an ID.
    Id(String),

    /// A type/language/value reference.
    Value(Value),

    /// A list of references.
    List(Vec<Pointer>),
}

impl Pointer {
    /// Translates this `Pointer` back to the JSON-LD it was generated
    /// from.
    pub fn into_json(self) -> JValue {
        let mut map = Map::new();
        match self {
            Pointer::Id(id) => {
                map.insert("@id".to_owned(), JValue::String(id));
            }

            Pointer::Value(val) => {
                map.insert("@value".to_owned(), val.value);
                if let Some(type_id) = val.type_id {
                    map.insert("@type".to_owned(), JValue::String(type_id));
                }
                if let Some(language) = val.language {
                    map.insert("@language".to_owned(), JValue::String(language));
                }
                if let Some(direction) = val.direction {
                    map.insert("@direction".to_owned(), JValue::String(direction));
                }
            }

            Pointer::List(list) => {
                map.insert(
                    "@list".to_owned(),
                    JValue::Array(list.into_iter().map(Pointer::into_json).collect()),
                );
            }
        };

        JValue::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A node map node.
pub struct Entity {
    pub id: String,
    pub index: Option<String>,
    pub types: Vec<String>,

    pub data: IndexMap<String, Vec<Pointer>>,
}

impl Entity {
    pub fn new(id: String) -> Entity {
        Entity {
            id,
            index: None,
            types: Vec::new(),
            data: IndexMap::new(),
        }
    }

    /// Gets the list of values recorded for a predicate. Unknown
    /// predicates yield an empty slice.
    pub fn get(&self, predicate: &str) -> &[Pointer] {
        self.data.get(predicate).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_mut(&mut self, predicate: &str) -> &mut Vec<Pointer> {
        self.data.entry(predicate.to_owned()).or_default()
    }

    /// Translates this `Entity` back to expanded JSON-LD.
    pub fn into_json(self) -> JValue {
        let mut map = Map::new();

        map.insert("@id".to_owned(), JValue::String(self.id));
        if let Some(index) = self.index {
            map.insert("@index".to_owned(), JValue::String(index));
        }
        if !self.types.is_empty() {
            map.insert(
                "@type".to_owned(),
                JValue::Array(self.types.into_iter().map(JValue::String).collect()),
            );
        }

        for (key, values) in self.data {
            map.insert(
                key,
                JValue::Array(values.into_iter().map(Pointer::into_json).collect()),
            );
        }

        JValue::Object(map)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Pointer>)> {
        self.data.iter()
    }
}

/// Alias to the structure that the node map generation produces: graph
/// name, then subject, in insertion order.
pub type NodeMap = IndexMap<String, IndexMap<String, Entity>>;

/// Trait used to generate blank nodes during node map generation and RDF
/// serialization.
pub trait BlankNodeGenerator {
    /// Generate a new blank node. If `id` is `Some`, this method returns
    /// the same value every time the same `id` is passed.
    fn generate_blank_node(&mut self, id: Option<&str>) -> String;
}

/// The input-side generator, issuing node IDs of form `_:bN` where N is
/// assigned sequentially.
#[derive(Default)]
pub struct BlankNodeNames {
    i: u32,
    data: HashMap<String, String>,
}

impl BlankNodeNames {
    pub fn new() -> BlankNodeNames {
        BlankNodeNames {
            i: 0,
            data: HashMap::new(),
        }
    }
}

impl BlankNodeGenerator for BlankNodeNames {
    fn generate_blank_node(&mut self, id: Option<&str>) -> String {
        if let Some(id) = id {
            if !self.data.contains_key(id) {
                let new_id = format!("_:b{}", self.i);
                self.i += 1;
                self.data.insert(id.to_owned(), new_id);
            }
            self.data[id].clone()
        } else {
            self.i += 1;
            format!("_:b{}", self.i - 1)
        }
    }
}

#[derive(Debug)]
/// Parameter passed into the node map generation.
enum SubjectType<'a> {
    None,
    Normal(&'a str, &'a str),
    Reverse(&'a str, &'a str),
}

/// "Consumes" a JSON-LD value, assumes that it's a String, and returns an
/// error if this is not true.
fn expect_string(val: &JValue) -> Result<String, NodeMapError> {
    match val {
        JValue::String(strval) => Ok(strval.clone()),
        _ => Err(NodeMapError::ExpectedString),
    }
}

fn relabel_blank<T: BlankNodeGenerator>(value: &str, generator: &mut T) -> String {
    if value.starts_with("_:") {
        generator.generate_blank_node(Some(value))
    } else {
        value.to_owned()
    }
}

/// Makes a value reference out of an expanded value object.
fn make_reference<T: BlankNodeGenerator>(
    element: &Map<String, JValue>,
    generator: &mut T,
) -> Result<Pointer, NodeMapError> {
    let value = element.get("@value").unwrap().clone();
    let type_id = element
        .get("@type")
        .map(|t| expect_string(t).map(|t| relabel_blank(&t, generator)))
        .transpose()?;
    let language = element.get("@language").map(expect_string).transpose()?;
    let direction = element.get("@direction").map(expect_string).transpose()?;

    Ok(Pointer::Value(Value {
        value,
        type_id,
        language,
        direction,
    }))
}

/// Generates a node map from a fully expanded JSON-LD value and a blank
/// node generator.
///
/// As opposed to the JSON-LD API, this does not return a specially-formed
/// JSON object, but an equivalent set of statically-typed structs. The
/// node map can be transformed back into the expected JSON losslessly.
pub fn generate_node_map<T: BlankNodeGenerator>(
    element: &JValue,
    generator: &mut T,
) -> Result<NodeMap, NodeMapError> {
    let mut node_map = NodeMap::new();
    node_map.insert("@default".to_owned(), IndexMap::new());

    generate_into(
        element,
        &mut node_map,
        "@default",
        &SubjectType::None,
        &mut None,
        generator,
    )?;

    Ok(node_map)
}

fn generate_into<T>(
    element: &JValue,
    node_map: &mut NodeMap,
    active_graph: &str,
    active_subject: &SubjectType,
    list: &mut Option<&mut Vec<Pointer>>,
    generator: &mut T,
) -> Result<(), NodeMapError>
where
    T: BlankNodeGenerator,
{
    match element {
        JValue::Array(items) => {
            for item in items {
                generate_into(item, node_map, active_graph, active_subject, list, generator)?;
            }
        }

        JValue::Object(element) => {
            node_map.entry(active_graph.to_owned()).or_default();

            if element.contains_key("@value") {
                let reference = make_reference(element, generator)?;

                if let Some(list) = list.as_mut() {
                    list.push(reference);
                } else {
                    match *active_subject {
                        SubjectType::Normal(subject, property)
                        | SubjectType::Reverse(subject, property) => {
                            let node = node_map
                                .get_mut(active_graph)
                                .unwrap()
                                .get_mut(subject)
                                .unwrap();
                            let entry = node.data.entry(property.to_owned()).or_default();
                            if !entry.contains(&reference) {
                                entry.push(reference);
                            }
                        }

                        // a value object cannot sit at the root of
                        // expanded output
                        SubjectType::None => unreachable!(),
                    }
                }
            } else if let Some(list_value) = element.get("@list") {
                let mut result = Vec::new();

                generate_into(
                    list_value,
                    node_map,
                    active_graph,
                    active_subject,
                    &mut Some(&mut result),
                    generator,
                )?;

                let reference = Pointer::List(result);
                if let Some(list) = list.as_mut() {
                    list.push(reference);
                } else {
                    match *active_subject {
                        SubjectType::Normal(subject, property)
                        | SubjectType::Reverse(subject, property) => {
                            let node = node_map
                                .get_mut(active_graph)
                                .unwrap()
                                .get_mut(subject)
                                .unwrap();
                            node.data.entry(property.to_owned()).or_default().push(reference);
                        }

                        SubjectType::None => unreachable!(),
                    }
                }
            } else {
                // a node object
                let id = match element.get("@id") {
                    Some(JValue::String(id)) => relabel_blank(id, generator),
                    Some(JValue::Null) | None => generator.generate_blank_node(None),
                    Some(_) => return Err(NodeMapError::InvalidIdValue),
                };

                if let SubjectType::Normal(subject, property) = *active_subject {
                    let reference = Pointer::Id(id.clone());

                    if let Some(list) = list.as_mut() {
                        list.push(reference);
                    } else {
                        let node = node_map
                            .get_mut(active_graph)
                            .unwrap()
                            .get_mut(subject)
                            .unwrap();
                        let entry = node.data.entry(property.to_owned()).or_default();
                        if !entry.contains(&reference) {
                            entry.push(reference);
                        }
                    }
                }

                node_map
                    .get_mut(active_graph)
                    .unwrap()
                    .entry(id.clone())
                    .or_insert_with(|| Entity::new(id.clone()));

                if let SubjectType::Reverse(referencing, property) = *active_subject {
                    let reference = Pointer::Id(referencing.to_owned());
                    let node = node_map
                        .get_mut(active_graph)
                        .unwrap()
                        .get_mut(&id)
                        .unwrap();
                    let entry = node.data.entry(property.to_owned()).or_default();
                    if !entry.contains(&reference) {
                        entry.push(reference);
                    }
                }

                if let Some(types) = element.get("@type") {
                    let types: Vec<String> = match types {
                        JValue::Array(items) => items
                            .iter()
                            .map(|item| expect_string(item).map_err(|_| NodeMapError::InvalidTypeValue))
                            .collect::<Result<_, _>>()?,
                        JValue::String(single) => vec![single.clone()],
                        _ => return Err(NodeMapError::InvalidTypeValue),
                    };

                    let node = node_map
                        .get_mut(active_graph)
                        .unwrap()
                        .get_mut(&id)
                        .unwrap();
                    for item in types {
                        let item = relabel_blank(&item, generator);
                        if !node.types.contains(&item) {
                            node.types.push(item);
                        }
                    }
                }

                if let Some(index) = element.get("@index") {
                    let index = match index {
                        JValue::String(index) => index.clone(),
                        _ => return Err(NodeMapError::InvalidIndexValue),
                    };
                    let node = node_map
                        .get_mut(active_graph)
                        .unwrap()
                        .get_mut(&id)
                        .unwrap();
                    if node.index.as_ref().map_or(false, |existing| *existing != index) {
                        return Err(NodeMapError::ConflictingIndexes);
                    }
                    node.index = Some(index);
                }

                if let Some(reverse) = element.get("@reverse") {
                    let reverse = match reverse {
                        JValue::Object(reverse) => reverse,
                        _ => return Err(NodeMapError::InvalidReverseValue),
                    };
                    for (property, values) in reverse {
                        let subject = SubjectType::Reverse(&id, property);
                        let values: Vec<&JValue> = match values {
                            JValue::Array(values) => values.iter().collect(),
                            other => vec![other],
                        };
                        for value in values {
                            generate_into(
                                value,
                                node_map,
                                active_graph,
                                &subject,
                                &mut None,
                                generator,
                            )?;
                        }
                    }
                }

                if let Some(graph) = element.get("@graph") {
                    generate_into(graph, node_map, &id, &SubjectType::None, &mut None, generator)?;
                }

                if let Some(included) = element.get("@included") {
                    generate_into(
                        included,
                        node_map,
                        active_graph,
                        &SubjectType::None,
                        &mut None,
                        generator,
                    )?;
                }

                let mut keys: Vec<&String> =
                    element.keys().filter(|k| !k.starts_with('@')).collect();
                keys.sort();

                for property in keys {
                    let value = element.get(property).unwrap();
                    let property = if property.starts_with("_:") {
                        generator.generate_blank_node(Some(property))
                    } else {
                        (*property).clone()
                    };

                    node_map
                        .get_mut(active_graph)
                        .unwrap()
                        .get_mut(&id)
                        .unwrap()
                        .data
                        .entry(property.clone())
                        .or_default();

                    let subject = SubjectType::Normal(&id, &property);
                    generate_into(value, node_map, active_graph, &subject, &mut None, generator)?;
                }
            }
        }

        _ => return Err(NodeMapError::InvalidObject),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(expanded: JValue) -> NodeMap {
        let mut generator = BlankNodeNames::new();
        generate_node_map(&expanded, &mut generator).unwrap()
    }

    #[test]
    fn blank_node_names_are_stable() {
        let mut names = BlankNodeNames::new();
        assert_eq!(names.generate_blank_node(Some("_:x")), "_:b0");
        assert_eq!(names.generate_blank_node(Some("_:x")), "_:b0");
        assert_eq!(names.generate_blank_node(None), "_:b1");
        assert_eq!(names.generate_blank_node(Some("_:y")), "_:b2");
    }

    #[test]
    fn simple_node() {
        let node_map = build(json!([{
            "@id": "http://ex/a",
            "http://ex/p": [{"@value": "x"}]
        }]));

        let node = &node_map["@default"]["http://ex/a"];
        assert_eq!(
            node.get("http://ex/p"),
            &[Pointer::Value(Value {
                value: json!("x"),
                type_id: None,
                language: None,
                direction: None
            })]
        );
    }

    #[test]
    fn nested_nodes_get_references() {
        let node_map = build(json!([{
            "@id": "http://ex/a",
            "http://ex/knows": [{"@id": "http://ex/b", "http://ex/name": [{"@value": "B"}]}]
        }]));

        let graph = &node_map["@default"];
        assert_eq!(
            graph["http://ex/a"].get("http://ex/knows"),
            &[Pointer::Id("http://ex/b".to_owned())]
        );
        assert!(graph.contains_key("http://ex/b"));
    }

    #[test]
    fn blank_nodes_relabelled() {
        let node_map = build(json!([{
            "@id": "_:input",
            "@type": ["_:Type"],
            "http://ex/p": [{"@id": "_:input"}]
        }]));

        let graph = &node_map["@default"];
        let node = &graph["_:b0"];
        assert_eq!(node.types, vec!["_:b1".to_owned()]);
        assert_eq!(node.get("http://ex/p"), &[Pointer::Id("_:b0".to_owned())]);
    }

    #[test]
    fn value_deduplication() {
        let node_map = build(json!([
            {"@id": "http://ex/a", "http://ex/p": [{"@value": "x"}, {"@value": "x"}]}
        ]));
        assert_eq!(node_map["@default"]["http://ex/a"].get("http://ex/p").len(), 1);
    }

    #[test]
    fn list_accumulation() {
        let node_map = build(json!([{
            "@id": "http://ex/a",
            "http://ex/p": [{"@list": [{"@value": "x"}, {"@id": "http://ex/b"}]}]
        }]));

        match &node_map["@default"]["http://ex/a"].get("http://ex/p")[0] {
            Pointer::List(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1], Pointer::Id("http://ex/b".to_owned()));
            }
            other => panic!("expected a list, got {:?}", other),
        }
    }

    #[test]
    fn reverse_edges() {
        let node_map = build(json!([{
            "@id": "http://ex/root",
            "@reverse": {"http://ex/parent": [{"@id": "http://ex/child"}]}
        }]));

        let graph = &node_map["@default"];
        assert_eq!(
            graph["http://ex/child"].get("http://ex/parent"),
            &[Pointer::Id("http://ex/root".to_owned())]
        );
    }

    #[test]
    fn named_graphs() {
        let node_map = build(json!([{
            "@id": "http://ex/g",
            "@graph": [{"@id": "http://ex/a", "http://ex/p": [{"@value": 1}]}]
        }]));

        assert!(node_map["@default"].contains_key("http://ex/g"));
        assert!(node_map["http://ex/g"].contains_key("http://ex/a"));
    }

    #[test]
    fn included_nodes_share_graph() {
        let node_map = build(json!([{
            "@id": "http://ex/a",
            "@included": [{"@id": "http://ex/b", "http://ex/p": [{"@value": 1}]}]
        }]));

        let graph = &node_map["@default"];
        assert!(graph.contains_key("http://ex/a"));
        assert!(graph.contains_key("http://ex/b"));
    }

    #[test]
    fn conflicting_indexes_rejected() {
        let mut generator = BlankNodeNames::new();
        let err = generate_node_map(
            &json!([
                {"@id": "http://ex/a", "@index": "one"},
                {"@id": "http://ex/a", "@index": "two"}
            ]),
            &mut generator,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "conflicting indexes");
    }

    #[test]
    fn entity_round_trips_to_json() {
        let node_map = build(json!([{
            "@id": "http://ex/a",
            "@type": ["http://ex/T"],
            "http://ex/p": [{"@value": "x", "@language": "en"}]
        }]));

        let json = node_map["@default"]["http://ex/a"].clone().into_json();
        assert_eq!(json["@id"], json!("http://ex/a"));
        assert_eq!(json["@type"], json!(["http://ex/T"]));
        assert_eq!(
            json["http://ex/p"],
            json!([{"@value": "x", "@language": "en"}])
        );
    }
}
