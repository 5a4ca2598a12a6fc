//! JSON-LD to RDF handling.
//!
//! Defines the quad model the rest of the crate serializes into, the
//! node-map-to-dataset conversion, and the reverse translation from RDF
//! back to expanded JSON-LD.

use indexmap::IndexMap;
use serde_json::Map;
use serde_json::Value as JValue;

use crate::api::{JsonLdOptions, RdfDirection};
use crate::context::{is_absolute_iri, is_blank_node_name};
use crate::nodemap::{BlankNodeGenerator, NodeMap, Pointer, Value};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
/// Predicate for the first item in a list.
pub const RDF_FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";
/// Predicate for the rest of the items in a list.
pub const RDF_REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";
/// Object for the end of a list.
pub const RDF_NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
pub const RDF_JSON: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#JSON";
pub const RDF_VALUE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#value";
pub const RDF_LANGUAGE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#language";
pub const RDF_DIRECTION: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#direction";
pub const RDF_LIST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#List";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";

pub const I18N_NS: &str = "https://www.w3.org/ns/i18n#";

/// The subject of a quad. Blank node labels keep their `_:` prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    Iri(String),
    Blank(String),
}

impl Subject {
    pub fn from_id(id: &str) -> Subject {
        if is_blank_node_name(id) {
            Subject::Blank(id.to_owned())
        } else {
            Subject::Iri(id.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Subject::Iri(iri) => iri,
            Subject::Blank(label) => label,
        }
    }
}

/// An RDF literal with datatype and optional language tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Literal {
    pub value: String,
    pub datatype: String,
    pub language: Option<String>,
}

impl Literal {
    /// A plain string literal (xsd:string).
    pub fn string(value: impl Into<String>) -> Literal {
        Literal {
            value: value.into(),
            datatype: XSD_STRING.to_owned(),
            language: None,
        }
    }

    /// A typed literal.
    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Literal {
        Literal {
            value: value.into(),
            datatype: datatype.into(),
            language: None,
        }
    }

    /// A language-tagged literal (rdf:langString).
    pub fn lang(value: impl Into<String>, language: impl Into<String>) -> Literal {
        Literal {
            value: value.into(),
            datatype: RDF_LANG_STRING.to_owned(),
            language: Some(language.into()),
        }
    }
}

/// The object of a quad.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Object {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

impl Object {
    pub fn from_id(id: &str) -> Object {
        if is_blank_node_name(id) {
            Object::Blank(id.to_owned())
        } else {
            Object::Iri(id.to_owned())
        }
    }
}

/// The graph component of a quad.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphLabel {
    Default,
    Iri(String),
    Blank(String),
}

/// A triple within one graph of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: Subject,
    /// Predicate IRI; `_:`-prefixed only under generalized RDF.
    pub predicate: String,
    pub object: Object,
}

/// A graph-qualified triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Quad {
    pub subject: Subject,
    pub predicate: String,
    pub object: Object,
    pub graph: GraphLabel,
}

/// An RDF dataset: graph name to ordered triples, insertion order
/// preserved for stable round-tripping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RdfDataset {
    graphs: IndexMap<String, Vec<Triple>>,
}

impl RdfDataset {
    pub fn new() -> RdfDataset {
        let mut graphs = IndexMap::new();
        graphs.insert("@default".to_owned(), Vec::new());
        RdfDataset { graphs }
    }

    /// Adds a triple to the named graph, suppressing exact duplicates.
    pub fn add_triple(&mut self, graph_name: &str, triple: Triple) {
        let graph = self.graphs.entry(graph_name.to_owned()).or_default();
        if !graph.contains(&triple) {
            graph.push(triple);
        }
    }

    pub fn add_quad(&mut self, quad: Quad) {
        let graph_name = match &quad.graph {
            GraphLabel::Default => "@default".to_owned(),
            GraphLabel::Iri(iri) => iri.clone(),
            GraphLabel::Blank(label) => label.clone(),
        };
        self.add_triple(
            &graph_name,
            Triple {
                subject: quad.subject,
                predicate: quad.predicate,
                object: quad.object,
            },
        );
    }

    pub fn graph_names(&self) -> impl Iterator<Item = &String> {
        self.graphs.keys()
    }

    pub fn triples(&self, graph_name: &str) -> &[Triple] {
        self.graphs
            .get(graph_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn graphs(&self) -> impl Iterator<Item = (&String, &Vec<Triple>)> {
        self.graphs.iter()
    }

    /// Flattens the dataset into graph-labelled quads, in insertion
    /// order.
    pub fn quads(&self) -> Vec<Quad> {
        let mut quads = Vec::new();
        for (name, triples) in &self.graphs {
            let label = if name == "@default" {
                GraphLabel::Default
            } else if is_blank_node_name(name) {
                GraphLabel::Blank(name.clone())
            } else {
                GraphLabel::Iri(name.clone())
            };
            for triple in triples {
                quads.push(Quad {
                    subject: triple.subject.clone(),
                    predicate: triple.predicate.clone(),
                    object: triple.object.clone(),
                    graph: label.clone(),
                });
            }
        }
        quads
    }

    pub fn len(&self) -> usize {
        self.graphs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical `xsd:double` lexical form: shortest mantissa with at least
/// one fractional digit and a normalized exponent, e.g. `1.5E0`.
pub(crate) fn canonical_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_owned();
    }
    let mut formatted = format!("{:E}", value);
    if let Some(exponent_pos) = formatted.find('E') {
        if !formatted[..exponent_pos].contains('.') {
            formatted.insert_str(exponent_pos, ".0");
        }
    }
    formatted
}

/// Canonical JSON serialization for `rdf:JSON` literals: recursively
/// key-sorted (by UTF-16 code units), minimal separators.
pub(crate) fn canonical_json(value: &JValue) -> String {
    match value {
        JValue::Null => "null".to_owned(),
        JValue::Bool(b) => b.to_string(),
        JValue::Number(n) => {
            if n.is_f64() {
                let f = n.as_f64().unwrap();
                if f == f.trunc() && f.abs() < 1e21 {
                    format!("{}", f as i64)
                } else {
                    n.to_string()
                }
            } else {
                n.to_string()
            }
        }
        JValue::String(s) => serde_json::to_string(s).unwrap(),
        JValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        JValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            let parts: Vec<String> = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(*k).unwrap(),
                        canonical_json(map.get(*k).unwrap())
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

fn value_to_object<T: BlankNodeGenerator>(
    value: &Value,
    triples: &mut Vec<Triple>,
    generator: &mut T,
    options: &JsonLdOptions,
) -> Object {
    if value.type_id.as_deref() == Some("@json") {
        return Object::Literal(Literal::typed(canonical_json(&value.value), RDF_JSON));
    }

    match &value.value {
        JValue::Bool(b) => Object::Literal(Literal::typed(
            b.to_string(),
            value.type_id.clone().unwrap_or_else(|| XSD_BOOLEAN.to_owned()),
        )),

        JValue::Number(number) => {
            let as_double = value.type_id.as_deref() == Some(XSD_DOUBLE)
                || number.as_f64().map_or(false, |f| {
                    number.is_f64() && (f.fract() != 0.0 || f.abs() >= 1e21)
                });
            if as_double {
                Object::Literal(Literal::typed(
                    canonical_double(number.as_f64().unwrap_or(0.0)),
                    value.type_id.clone().unwrap_or_else(|| XSD_DOUBLE.to_owned()),
                ))
            } else {
                let lexical = number
                    .as_i64()
                    .map(|i| i.to_string())
                    .or_else(|| number.as_u64().map(|u| u.to_string()))
                    .unwrap_or_else(|| format!("{}", number.as_f64().unwrap() as i64));
                Object::Literal(Literal::typed(
                    lexical,
                    value.type_id.clone().unwrap_or_else(|| XSD_INTEGER.to_owned()),
                ))
            }
        }

        JValue::String(s) => {
            if let Some(direction) = &value.direction {
                match options.rdf_direction {
                    Some(RdfDirection::I18nDatatype) => {
                        let language = value
                            .language
                            .as_deref()
                            .map(str::to_lowercase)
                            .unwrap_or_default();
                        return Object::Literal(Literal::typed(
                            s.clone(),
                            format!("{}{}_{}", I18N_NS, language, direction),
                        ));
                    }
                    Some(RdfDirection::CompoundLiteral) => {
                        let node = generator.generate_blank_node(None);
                        let subject = Subject::Blank(node.clone());
                        triples.push(Triple {
                            subject: subject.clone(),
                            predicate: RDF_VALUE.to_owned(),
                            object: Object::Literal(Literal::string(s.clone())),
                        });
                        if let Some(language) = &value.language {
                            triples.push(Triple {
                                subject: subject.clone(),
                                predicate: RDF_LANGUAGE.to_owned(),
                                object: Object::Literal(Literal::string(
                                    language.to_lowercase(),
                                )),
                            });
                        }
                        triples.push(Triple {
                            subject,
                            predicate: RDF_DIRECTION.to_owned(),
                            object: Object::Literal(Literal::string(direction.clone())),
                        });
                        return Object::Blank(node);
                    }
                    None => {}
                }
            }

            if let Some(language) = &value.language {
                Object::Literal(Literal::lang(s.clone(), language.clone()))
            } else {
                Object::Literal(Literal {
                    value: s.clone(),
                    datatype: value.type_id.clone().unwrap_or_else(|| XSD_STRING.to_owned()),
                    language: None,
                })
            }
        }

        // arrays and maps only occur under @json, handled above
        _ => unreachable!(),
    }
}

fn list_to_object<T: BlankNodeGenerator>(
    items: &[Pointer],
    triples: &mut Vec<Triple>,
    generator: &mut T,
    options: &JsonLdOptions,
) -> Object {
    if items.is_empty() {
        return Object::Iri(RDF_NIL.to_owned());
    }

    let bnodes: Vec<String> = items
        .iter()
        .map(|_| generator.generate_blank_node(None))
        .collect();

    for (i, (bnode, item)) in bnodes.iter().zip(items.iter()).enumerate() {
        let subject = Subject::Blank(bnode.clone());

        if let Some(object) = pointer_to_object(item, triples, generator, options) {
            triples.push(Triple {
                subject: subject.clone(),
                predicate: RDF_FIRST.to_owned(),
                object,
            });
        }

        let rest = bnodes
            .get(i + 1)
            .map(|next| Object::Blank(next.clone()))
            .unwrap_or_else(|| Object::Iri(RDF_NIL.to_owned()));
        triples.push(Triple {
            subject,
            predicate: RDF_REST.to_owned(),
            object: rest,
        });
    }

    Object::Blank(bnodes[0].clone())
}

fn pointer_to_object<T: BlankNodeGenerator>(
    pointer: &Pointer,
    triples: &mut Vec<Triple>,
    generator: &mut T,
    options: &JsonLdOptions,
) -> Option<Object> {
    match pointer {
        Pointer::Id(id) if is_blank_node_name(id) => Some(Object::Blank(id.clone())),
        Pointer::Id(id) if is_absolute_iri(id) => Some(Object::Iri(id.clone())),
        Pointer::Id(id) => {
            tracing::warn!(iri = %id, "dropping reference with relative IRI");
            None
        }
        Pointer::Value(value) => Some(value_to_object(value, triples, generator, options)),
        Pointer::List(items) => Some(list_to_object(items, triples, generator, options)),
    }
}

/// Serializes a node map into an RDF dataset, minting list and compound
/// literal nodes from the same generator used to build the node map.
pub(crate) fn dataset_from_node_map<T: BlankNodeGenerator>(
    node_map: NodeMap,
    generator: &mut T,
    options: &JsonLdOptions,
) -> RdfDataset {
    let mut dataset = RdfDataset::new();

    for (graph_name, graph) in node_map {
        if graph_name != "@default"
            && !is_blank_node_name(&graph_name)
            && !is_absolute_iri(&graph_name)
        {
            tracing::warn!(graph = %graph_name, "dropping graph with relative graph name");
            continue;
        }

        let mut triples: Vec<Triple> = Vec::new();

        for (id, node) in graph {
            if !is_blank_node_name(&id) && !is_absolute_iri(&id) {
                tracing::warn!(subject = %id, "dropping subject with relative IRI");
                continue;
            }
            let subject = Subject::from_id(&id);

            for type_iri in &node.types {
                if is_blank_node_name(type_iri) || is_absolute_iri(type_iri) {
                    triples.push(Triple {
                        subject: subject.clone(),
                        predicate: RDF_TYPE.to_owned(),
                        object: Object::from_id(type_iri),
                    });
                } else {
                    tracing::warn!(ty = %type_iri, "dropping type with relative IRI");
                }
            }

            for (property, values) in &node.data {
                if is_blank_node_name(property) && !options.produce_generalized_rdf {
                    tracing::warn!(predicate = %property, "dropping blank node predicate");
                    continue;
                }
                if !is_blank_node_name(property) && !is_absolute_iri(property) {
                    tracing::warn!(predicate = %property, "dropping predicate with relative IRI");
                    continue;
                }

                for pointer in values {
                    if let Some(object) =
                        pointer_to_object(pointer, &mut triples, generator, options)
                    {
                        triples.push(Triple {
                            subject: subject.clone(),
                            predicate: property.clone(),
                            object,
                        });
                    }
                }
            }
        }

        for triple in triples {
            dataset.add_triple(&graph_name, triple);
        }
    }

    dataset
}

fn literal_to_json(literal: &Literal, options: &JsonLdOptions) -> JValue {
    let mut object = Map::new();

    if options.rdf_direction == Some(RdfDirection::I18nDatatype)
        && literal.datatype.starts_with(I18N_NS)
    {
        let tag = &literal.datatype[I18N_NS.len()..];
        let (language, direction) = tag.split_once('_').unwrap_or(("", tag));
        object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
        if !language.is_empty() {
            object.insert("@language".to_owned(), JValue::String(language.to_owned()));
        }
        if !direction.is_empty() {
            object.insert("@direction".to_owned(), JValue::String(direction.to_owned()));
        }
        return JValue::Object(object);
    }

    if let Some(language) = &literal.language {
        object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
        object.insert("@language".to_owned(), JValue::String(language.clone()));
        return JValue::Object(object);
    }

    match literal.datatype.as_str() {
        XSD_STRING => {
            object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
        }
        XSD_BOOLEAN if options.use_native_types && (literal.value == "true" || literal.value == "false") => {
            object.insert("@value".to_owned(), JValue::Bool(literal.value == "true"));
        }
        XSD_INTEGER if options.use_native_types => match literal.value.parse::<i64>() {
            Ok(i) => {
                object.insert("@value".to_owned(), JValue::from(i));
            }
            Err(_) => {
                object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
                object.insert("@type".to_owned(), JValue::String(XSD_INTEGER.to_owned()));
            }
        },
        XSD_DOUBLE if options.use_native_types => match literal.value.parse::<f64>() {
            Ok(f) => {
                object.insert("@value".to_owned(), JValue::from(f));
            }
            Err(_) => {
                object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
                object.insert("@type".to_owned(), JValue::String(XSD_DOUBLE.to_owned()));
            }
        },
        RDF_JSON => match serde_json::from_str::<JValue>(&literal.value) {
            Ok(parsed) => {
                object.insert("@value".to_owned(), parsed);
                object.insert("@type".to_owned(), JValue::String("@json".to_owned()));
            }
            Err(_) => {
                object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
                object.insert("@type".to_owned(), JValue::String(RDF_JSON.to_owned()));
            }
        },
        datatype => {
            object.insert("@value".to_owned(), JValue::String(literal.value.clone()));
            object.insert("@type".to_owned(), JValue::String(datatype.to_owned()));
        }
    }

    JValue::Object(object)
}

fn push_unique(node: &mut Map<String, JValue>, key: &str, value: JValue) {
    let entry = node
        .entry(key.to_owned())
        .or_insert_with(|| JValue::Array(Vec::new()));
    let items = entry.as_array_mut().unwrap();
    if !items.contains(&value) {
        items.push(value);
    }
}

fn is_well_formed_list_node(node: &Map<String, JValue>) -> bool {
    if !node
        .get("@id")
        .and_then(JValue::as_str)
        .map_or(false, is_blank_node_name)
    {
        return false;
    }
    let first_ok = node
        .get(RDF_FIRST)
        .and_then(JValue::as_array)
        .map_or(false, |a| a.len() == 1);
    let rest_ok = node
        .get(RDF_REST)
        .and_then(JValue::as_array)
        .map_or(false, |a| a.len() == 1);
    let keys_ok = node.keys().all(|k| {
        k == "@id"
            || k == RDF_FIRST
            || k == RDF_REST
            || (k == "@type"
                && node.get("@type") == Some(&JValue::Array(vec![JValue::String(RDF_LIST.to_owned())])))
    });
    first_ok && rest_ok && keys_ok
}

/// Translates an RDF dataset into expanded JSON-LD.
///
/// `rdf:first`/`rdf:rest` chains that are well-formed lists collapse back
/// into `@list` arrays; named graphs nest under `@graph` entries of the
/// node carrying the graph name.
pub(crate) fn dataset_to_jsonld(dataset: &RdfDataset, options: &JsonLdOptions) -> JValue {
    let mut graph_map: IndexMap<String, IndexMap<String, Map<String, JValue>>> = IndexMap::new();
    let mut usages: IndexMap<String, IndexMap<String, Vec<(String, String)>>> = IndexMap::new();
    graph_map.insert("@default".to_owned(), IndexMap::new());

    for (graph_name, triples) in dataset.graphs() {
        graph_map.entry(graph_name.clone()).or_default();

        if graph_name != "@default" {
            let default_graph = graph_map.get_mut("@default").unwrap();
            default_graph.entry(graph_name.clone()).or_insert_with(|| {
                let mut node = Map::new();
                node.insert("@id".to_owned(), JValue::String(graph_name.clone()));
                node
            });
        }

        for triple in triples {
            let node_map = graph_map.get_mut(graph_name).unwrap();

            let subject_id = triple.subject.as_str().to_owned();
            node_map.entry(subject_id.clone()).or_insert_with(|| {
                let mut node = Map::new();
                node.insert("@id".to_owned(), JValue::String(subject_id.clone()));
                node
            });

            let object_id = match &triple.object {
                Object::Iri(iri) => Some(iri.clone()),
                Object::Blank(label) => Some(label.clone()),
                Object::Literal(_) => None,
            };
            if let Some(object_id) = &object_id {
                node_map.entry(object_id.clone()).or_insert_with(|| {
                    let mut node = Map::new();
                    node.insert("@id".to_owned(), JValue::String(object_id.clone()));
                    node
                });
            }

            if triple.predicate == RDF_TYPE && !options.use_rdf_type {
                if let Some(object_id) = &object_id {
                    let node = node_map.get_mut(&subject_id).unwrap();
                    push_unique(node, "@type", JValue::String(object_id.clone()));
                    continue;
                }
            }

            let value = match &triple.object {
                Object::Literal(literal) => literal_to_json(literal, options),
                Object::Iri(iri) => {
                    let mut reference = Map::new();
                    reference.insert("@id".to_owned(), JValue::String(iri.clone()));
                    JValue::Object(reference)
                }
                Object::Blank(label) => {
                    let mut reference = Map::new();
                    reference.insert("@id".to_owned(), JValue::String(label.clone()));
                    JValue::Object(reference)
                }
            };

            let node = node_map.get_mut(&subject_id).unwrap();
            push_unique(node, &triple.predicate, value);

            if let Some(object_id) = object_id {
                usages
                    .entry(graph_name.clone())
                    .or_default()
                    .entry(object_id)
                    .or_default()
                    .push((subject_id.clone(), triple.predicate.clone()));
            }
        }
    }

    // collapse well-formed rdf:first/rdf:rest chains into @list arrays
    for (graph_name, graph_usages) in &usages {
        let nil_usages = match graph_usages.get(RDF_NIL) {
            Some(found) => found.clone(),
            None => continue,
        };

        for (mut node_id, mut property) in nil_usages {
            let mut list: Vec<JValue> = Vec::new();
            let mut list_nodes: Vec<String> = Vec::new();

            loop {
                if property != RDF_REST {
                    break;
                }
                let single_usage =
                    graph_usages.get(&node_id).map_or(false, |u| u.len() == 1);
                if !single_usage {
                    break;
                }
                let node = match graph_map.get(graph_name).and_then(|g| g.get(&node_id)) {
                    Some(node) if is_well_formed_list_node(node) => node,
                    _ => break,
                };

                list.push(node.get(RDF_FIRST).unwrap().as_array().unwrap()[0].clone());
                list_nodes.push(node_id.clone());

                let (next_id, next_property) = graph_usages.get(&node_id).unwrap()[0].clone();
                node_id = next_id;
                property = next_property;
            }

            let head_id = list_nodes
                .last()
                .cloned()
                .unwrap_or_else(|| RDF_NIL.to_owned());
            list.reverse();

            if let Some(node) = graph_map.get_mut(graph_name).and_then(|g| g.get_mut(&node_id)) {
                if let Some(values) = node.get_mut(&property).and_then(JValue::as_array_mut) {
                    for value in values.iter_mut() {
                        if value.get("@id").and_then(JValue::as_str) == Some(head_id.as_str()) {
                            let mut list_object = Map::new();
                            list_object
                                .insert("@list".to_owned(), JValue::Array(std::mem::take(&mut list)));
                            *value = JValue::Object(list_object);
                            break;
                        }
                    }
                }
            }

            if let Some(graph) = graph_map.get_mut(graph_name) {
                for list_node in &list_nodes {
                    graph.shift_remove(list_node);
                }
            }
        }
    }

    let mut result = Vec::new();
    let default_graph = graph_map.shift_remove("@default").unwrap_or_default();
    for (subject, mut node) in default_graph {
        if let Some(graph) = graph_map.shift_remove(&subject) {
            let mut graph_nodes = Vec::new();
            for (_, graph_node) in graph {
                if !(graph_node.len() == 1 && graph_node.contains_key("@id")) {
                    graph_nodes.push(JValue::Object(graph_node));
                }
            }
            node.insert("@graph".to_owned(), JValue::Array(graph_nodes));
        }

        if !(node.len() == 1 && node.contains_key("@id")) {
            result.push(JValue::Object(node));
        }
    }

    JValue::Array(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodemap::{generate_node_map, BlankNodeNames};
    use serde_json::json;

    fn to_dataset(expanded: JValue, options: &JsonLdOptions) -> RdfDataset {
        let mut generator = BlankNodeNames::new();
        let node_map = generate_node_map(&expanded, &mut generator).unwrap();
        dataset_from_node_map(node_map, &mut generator, options)
    }

    #[test]
    fn canonical_double_formatting() {
        assert_eq!(canonical_double(1.5), "1.5E0");
        assert_eq!(canonical_double(1.0), "1.0E0");
        assert_eq!(canonical_double(100.0), "1.0E2");
        assert_eq!(canonical_double(0.0055), "5.5E-3");
        assert_eq!(canonical_double(-2.0), "-2.0E0");
        assert_eq!(canonical_double(f64::INFINITY), "INF");
        assert_eq!(canonical_double(f64::NEG_INFINITY), "-INF");
        assert_eq!(canonical_double(f64::NAN), "NaN");
    }

    #[test]
    fn canonical_json_sorting_and_numbers() {
        assert_eq!(
            canonical_json(&json!({"b": 1, "a": [true, null, "x"]})),
            r#"{"a":[true,null,"x"],"b":1}"#
        );
        assert_eq!(canonical_json(&json!(1.0)), "1");
        assert_eq!(canonical_json(&json!({"nested": {"z": 1, "y": 2}})), r#"{"nested":{"y":2,"z":1}}"#);
    }

    #[test]
    fn typed_and_native_literals() {
        let options = JsonLdOptions::default();
        let dataset = to_dataset(
            json!([{
                "@id": "http://ex/s",
                "http://ex/int": [{"@value": 5}],
                "http://ex/dbl": [{"@value": 2.5}],
                "http://ex/bool": [{"@value": true}],
                "http://ex/str": [{"@value": "txt"}]
            }]),
            &options,
        );

        let triples = dataset.triples("@default");
        let literal_for = |predicate: &str| {
            triples
                .iter()
                .find(|t| t.predicate == predicate)
                .map(|t| match &t.object {
                    Object::Literal(l) => l.clone(),
                    other => panic!("expected literal, got {:?}", other),
                })
                .unwrap()
        };

        assert_eq!(literal_for("http://ex/int"), Literal::typed("5", XSD_INTEGER));
        assert_eq!(
            literal_for("http://ex/dbl"),
            Literal::typed("2.5E0", XSD_DOUBLE)
        );
        assert_eq!(
            literal_for("http://ex/bool"),
            Literal::typed("true", XSD_BOOLEAN)
        );
        assert_eq!(literal_for("http://ex/str"), Literal::string("txt"));
    }

    #[test]
    fn json_literal_serialization() {
        let options = JsonLdOptions::default();
        let dataset = to_dataset(
            json!([{
                "@id": "http://ex/s",
                "http://ex/v": [{"@value": {"b": 2, "a": 1}, "@type": "@json"}]
            }]),
            &options,
        );
        match &dataset.triples("@default")[0].object {
            Object::Literal(literal) => {
                assert_eq!(literal.value, r#"{"a":1,"b":2}"#);
                assert_eq!(literal.datatype, RDF_JSON);
            }
            other => panic!("expected literal, got {:?}", other),
        }
    }

    #[test]
    fn list_chain() {
        let options = JsonLdOptions::default();
        let dataset = to_dataset(
            json!([{
                "@id": "http://ex/s",
                "http://ex/p": [{"@list": [{"@value": "a"}, {"@value": "b"}]}]
            }]),
            &options,
        );

        let triples = dataset.triples("@default");
        // two cells, each with first and rest, plus the property triple
        assert_eq!(triples.len(), 5);
        let firsts = triples.iter().filter(|t| t.predicate == RDF_FIRST).count();
        let rests = triples.iter().filter(|t| t.predicate == RDF_REST).count();
        assert_eq!(firsts, 2);
        assert_eq!(rests, 2);
        assert!(triples
            .iter()
            .any(|t| t.predicate == RDF_REST && t.object == Object::Iri(RDF_NIL.to_owned())));
    }

    #[test]
    fn empty_list_is_nil() {
        let options = JsonLdOptions::default();
        let dataset = to_dataset(
            json!([{"@id": "http://ex/s", "http://ex/p": [{"@list": []}]}]),
            &options,
        );
        assert_eq!(
            dataset.triples("@default")[0].object,
            Object::Iri(RDF_NIL.to_owned())
        );
    }

    #[test]
    fn blank_predicates_dropped_unless_generalized() {
        let expanded = json!([{
            "@id": "http://ex/s",
            "_:p": [{"@value": "x"}]
        }]);

        let strict = to_dataset(expanded.clone(), &JsonLdOptions::default());
        assert!(strict.is_empty());

        let options = JsonLdOptions {
            produce_generalized_rdf: true,
            ..JsonLdOptions::default()
        };
        let generalized = to_dataset(expanded, &options);
        assert_eq!(generalized.len(), 1);
        assert!(generalized.triples("@default")[0].predicate.starts_with("_:"));
    }

    #[test]
    fn i18n_direction_datatype() {
        let options = JsonLdOptions {
            rdf_direction: Some(RdfDirection::I18nDatatype),
            ..JsonLdOptions::default()
        };
        let dataset = to_dataset(
            json!([{
                "@id": "http://ex/s",
                "http://ex/p": [{"@value": "text", "@language": "AR", "@direction": "rtl"}]
            }]),
            &options,
        );
        match &dataset.triples("@default")[0].object {
            Object::Literal(literal) => {
                assert_eq!(literal.datatype, "https://www.w3.org/ns/i18n#ar_rtl");
                assert_eq!(literal.language, None);
            }
            other => panic!("expected literal, got {:?}", other),
        }
    }

    #[test]
    fn compound_literal_direction() {
        let options = JsonLdOptions {
            rdf_direction: Some(RdfDirection::CompoundLiteral),
            ..JsonLdOptions::default()
        };
        let dataset = to_dataset(
            json!([{
                "@id": "http://ex/s",
                "http://ex/p": [{"@value": "text", "@language": "ar", "@direction": "rtl"}]
            }]),
            &options,
        );
        let triples = dataset.triples("@default");
        assert_eq!(triples.len(), 4);
        assert!(triples.iter().any(|t| t.predicate == RDF_VALUE));
        assert!(triples.iter().any(|t| t.predicate == RDF_LANGUAGE));
        assert!(triples.iter().any(|t| t.predicate == RDF_DIRECTION));
    }

    #[test]
    fn named_graph_quads() {
        let options = JsonLdOptions::default();
        let dataset = to_dataset(
            json!([{
                "@id": "http://ex/g",
                "@graph": [{"@id": "http://ex/a", "http://ex/p": [{"@value": 1}]}]
            }]),
            &options,
        );

        let quads = dataset.quads();
        assert!(quads
            .iter()
            .any(|q| q.graph == GraphLabel::Iri("http://ex/g".to_owned())));
    }

    #[test]
    fn from_rdf_round_trip() {
        let options = JsonLdOptions::default();
        let mut dataset = RdfDataset::new();
        dataset.add_triple(
            "@default",
            Triple {
                subject: Subject::Iri("http://ex/s".to_owned()),
                predicate: RDF_TYPE.to_owned(),
                object: Object::Iri("http://ex/T".to_owned()),
            },
        );
        dataset.add_triple(
            "@default",
            Triple {
                subject: Subject::Iri("http://ex/s".to_owned()),
                predicate: "http://ex/name".to_owned(),
                object: Object::Literal(Literal::lang("hi", "en")),
            },
        );

        let jsonld = dataset_to_jsonld(&dataset, &options);
        assert_eq!(
            jsonld,
            json!([{
                "@id": "http://ex/s",
                "@type": ["http://ex/T"],
                "http://ex/name": [{"@value": "hi", "@language": "en"}]
            }])
        );
    }

    #[test]
    fn from_rdf_native_types() {
        let options = JsonLdOptions {
            use_native_types: true,
            ..JsonLdOptions::default()
        };
        let mut dataset = RdfDataset::new();
        dataset.add_triple(
            "@default",
            Triple {
                subject: Subject::Iri("http://ex/s".to_owned()),
                predicate: "http://ex/n".to_owned(),
                object: Object::Literal(Literal::typed("42", XSD_INTEGER)),
            },
        );

        let jsonld = dataset_to_jsonld(&dataset, &options);
        assert_eq!(jsonld[0]["http://ex/n"], json!([{"@value": 42}]));
    }

    #[test]
    fn from_rdf_collapses_lists() {
        let options = JsonLdOptions::default();
        let expanded = json!([{
            "@id": "http://ex/s",
            "http://ex/p": [{"@list": [{"@value": "a"}, {"@value": "b"}]}]
        }]);
        let dataset = to_dataset(expanded, &options);

        let jsonld = dataset_to_jsonld(&dataset, &options);
        assert_eq!(
            jsonld[0]["http://ex/p"],
            json!([{"@list": [{"@value": "a"}, {"@value": "b"}]}])
        );
    }

    #[test]
    fn from_rdf_named_graphs() {
        let options = JsonLdOptions::default();
        let mut dataset = RdfDataset::new();
        dataset.add_triple(
            "http://ex/g",
            Triple {
                subject: Subject::Iri("http://ex/a".to_owned()),
                predicate: "http://ex/p".to_owned(),
                object: Object::Literal(Literal::string("x")),
            },
        );

        let jsonld = dataset_to_jsonld(&dataset, &options);
        assert_eq!(jsonld[0]["@id"], json!("http://ex/g"));
        assert_eq!(
            jsonld[0]["@graph"],
            json!([{"@id": "http://ex/a", "http://ex/p": [{"@value": "x"}]}])
        );
    }
}
