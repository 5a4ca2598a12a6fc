//! RDF dataset canonicalization (URDNA2015): deterministic blank node
//! labelling via first-degree and n-degree hashing.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256, Sha384};
use thiserror::Error;

use crate::api::{HashAlgorithm, JsonLdOptions};
use crate::nquads;
use crate::rdf::{GraphLabel, Object, Quad, RdfDataset, Subject};

#[derive(Debug, Error)]
pub enum CanonicalizationError {
    /// The n-degree permutation search exceeded the configured bound.
    #[error("maximum call depth exceeded during canonicalization")]
    MaxCallDepthExceeded,
}

/// Issues sequential canonical blank node identifiers, `_:c14n0`,
/// `_:c14n1`, and so on.
#[derive(Clone, Debug)]
pub struct IdentifierIssuer {
    prefix: String,
    counter: u64,
    issued: HashMap<String, String>,
    order: Vec<String>,
}

impl IdentifierIssuer {
    pub fn new(prefix: &str) -> IdentifierIssuer {
        IdentifierIssuer {
            prefix: prefix.to_owned(),
            counter: 0,
            issued: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Issue an identifier for the given existing blank node label,
    /// returning the previously issued one on repeat calls.
    pub fn issue(&mut self, existing: &str) -> String {
        if let Some(canonical) = self.issued.get(existing) {
            return canonical.clone();
        }
        let canonical = format!("{}{}", self.prefix, self.counter);
        self.counter += 1;
        self.issued.insert(existing.to_owned(), canonical.clone());
        self.order.push(existing.to_owned());
        canonical
    }

    pub fn is_issued(&self, existing: &str) -> bool {
        self.issued.contains_key(existing)
    }

    pub fn get(&self, existing: &str) -> Option<&str> {
        self.issued.get(existing).map(String::as_str)
    }

    /// Issued labels in order of issuance.
    pub fn issued_order(&self) -> &[String] {
        &self.order
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    Subject,
    Object,
    Graph,
}

impl Position {
    fn as_str(&self) -> &'static str {
        match self {
            Position::Subject => "s",
            Position::Object => "o",
            Position::Graph => "g",
        }
    }
}

fn hex_digest(algorithm: HashAlgorithm, data: &str) -> String {
    let bytes: Vec<u8> = match algorithm {
        HashAlgorithm::Sha256 => Sha256::digest(data.as_bytes()).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data.as_bytes()).to_vec(),
    };
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn quad_blank_nodes(quad: &Quad) -> Vec<&str> {
    let mut labels = Vec::new();
    if let Subject::Blank(label) = &quad.subject {
        labels.push(label.as_str());
    }
    if let Object::Blank(label) = &quad.object {
        labels.push(label.as_str());
    }
    if let GraphLabel::Blank(label) = &quad.graph {
        labels.push(label.as_str());
    }
    labels
}

/// Substitute blank nodes in a quad: the target becomes `_:a`, every
/// other blank node `_:z`.
fn substitute_blank_nodes(quad: &Quad, target: &str) -> Quad {
    let rename = |label: &str| {
        if label == target {
            "_:a".to_owned()
        } else {
            "_:z".to_owned()
        }
    };

    let subject = match &quad.subject {
        Subject::Blank(label) => Subject::Blank(rename(label)),
        other => other.clone(),
    };
    let object = match &quad.object {
        Object::Blank(label) => Object::Blank(rename(label)),
        other => other.clone(),
    };
    let graph = match &quad.graph {
        GraphLabel::Blank(label) => GraphLabel::Blank(rename(label)),
        other => other.clone(),
    };

    Quad {
        subject,
        predicate: quad.predicate.clone(),
        object,
        graph,
    }
}

fn relabel_quad(quad: &Quad, issuer: &IdentifierIssuer) -> Quad {
    let rename = |label: &str| issuer.get(label).unwrap_or(label).to_owned();

    let subject = match &quad.subject {
        Subject::Blank(label) => Subject::Blank(rename(label)),
        other => other.clone(),
    };
    let object = match &quad.object {
        Object::Blank(label) => Object::Blank(rename(label)),
        other => other.clone(),
    };
    let graph = match &quad.graph {
        GraphLabel::Blank(label) => GraphLabel::Blank(rename(label)),
        other => other.clone(),
    };

    Quad {
        subject,
        predicate: quad.predicate.clone(),
        object,
        graph,
    }
}

fn serialize_sorted(quads: &[Quad]) -> String {
    let mut lines: Vec<String> = quads
        .iter()
        .map(|quad| {
            let mut line = nquads::serialize_quad(quad);
            line.push('\n');
            line
        })
        .collect();
    lines.sort();
    lines.dedup();
    lines.join("")
}

/// First-degree hash of one blank node: its quads with `_:a`/`_:z`
/// substitution, serialized, sorted, and digested.
fn hash_first_degree(label: &str, quads: &[Quad], algorithm: HashAlgorithm) -> String {
    let mut lines: Vec<String> = quads
        .iter()
        .map(|quad| {
            let mut line = nquads::serialize_quad(&substitute_blank_nodes(quad, label));
            line.push('\n');
            line
        })
        .collect();
    lines.sort();
    hex_digest(algorithm, &lines.join(""))
}

/// Hash of a blank node related to the one being n-degree hashed:
/// position tag, predicate (except in graph position), and the related
/// node's identifier or first-degree hash.
fn hash_related(
    related: &str,
    position: Position,
    predicate: &str,
    canonical_issuer: &IdentifierIssuer,
    temp_issuer: &IdentifierIssuer,
    bnode_to_hash: &HashMap<String, String>,
    algorithm: HashAlgorithm,
) -> String {
    let identifier = canonical_issuer
        .get(related)
        .or_else(|| temp_issuer.get(related))
        .map(str::to_owned)
        .unwrap_or_else(|| bnode_to_hash.get(related).cloned().unwrap_or_default());

    let mut input = String::new();
    input.push_str(position.as_str());
    if position != Position::Graph {
        input.push('<');
        input.push_str(predicate);
        input.push('>');
    }
    input.push_str(&identifier);

    hex_digest(algorithm, &input)
}

fn related_blank_nodes<'a>(quad: &'a Quad, target: &str) -> Vec<(String, Position, &'a str)> {
    let mut related = Vec::new();
    if let Subject::Blank(label) = &quad.subject {
        if label != target {
            related.push((label.clone(), Position::Subject, quad.predicate.as_str()));
        }
    }
    if let Object::Blank(label) = &quad.object {
        if label != target {
            related.push((label.clone(), Position::Object, quad.predicate.as_str()));
        }
    }
    if let GraphLabel::Blank(label) = &quad.graph {
        if label != target {
            related.push((label.clone(), Position::Graph, ""));
        }
    }
    related
}

/// Generate the next lexicographic permutation in place; false when
/// exhausted.
fn next_permutation(arr: &mut [usize]) -> bool {
    let n = arr.len();
    if n <= 1 {
        return false;
    }

    let mut i = n - 1;
    while i > 0 && arr[i - 1] >= arr[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let i = i - 1;

    let mut j = n - 1;
    while arr[j] <= arr[i] {
        j -= 1;
    }

    arr.swap(i, j);
    arr[i + 1..].reverse();
    true
}

#[allow(clippy::too_many_arguments)]
fn hash_ndegree(
    label: &str,
    bnode_to_quads: &HashMap<String, Vec<Quad>>,
    canonical_issuer: &IdentifierIssuer,
    issuer: IdentifierIssuer,
    bnode_to_hash: &HashMap<String, String>,
    algorithm: HashAlgorithm,
    max_calls: usize,
    calls: &mut usize,
) -> Result<(String, IdentifierIssuer), CanonicalizationError> {
    *calls += 1;
    if *calls > max_calls {
        return Err(CanonicalizationError::MaxCallDepthExceeded);
    }

    let mut hash_to_related: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let quads = bnode_to_quads
        .get(label)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for quad in quads {
        for (related, position, predicate) in related_blank_nodes(quad, label) {
            let hash = hash_related(
                &related,
                position,
                predicate,
                canonical_issuer,
                &issuer,
                bnode_to_hash,
                algorithm,
            );
            hash_to_related.entry(hash).or_default().push(related);
        }
    }

    let mut data_to_hash = String::new();
    let mut chosen_issuer = issuer;

    for (related_hash, bnode_list) in &hash_to_related {
        data_to_hash.push_str(related_hash);

        let mut chosen_path = String::new();
        let mut chosen_path_issuer: Option<IdentifierIssuer> = None;

        let mut permutation: Vec<usize> = (0..bnode_list.len()).collect();
        loop {
            *calls += 1;
            if *calls > max_calls {
                return Err(CanonicalizationError::MaxCallDepthExceeded);
            }

            let mut path = String::new();
            let mut path_issuer = chosen_issuer.clone();
            let mut recursion_list: Vec<String> = Vec::new();
            let mut skip = false;

            for &index in &permutation {
                let related = &bnode_list[index];

                if let Some(canonical) = canonical_issuer.get(related) {
                    path.push_str(canonical);
                } else {
                    if !path_issuer.is_issued(related) {
                        recursion_list.push(related.clone());
                    }
                    let issued = path_issuer.issue(related);
                    path.push_str(&issued);
                }

                // prune permutations that can no longer win
                if !chosen_path.is_empty()
                    && path.len() >= chosen_path.len()
                    && path > chosen_path
                {
                    skip = true;
                    break;
                }
            }

            if !skip {
                for related in &recursion_list {
                    let (result_hash, result_issuer) = hash_ndegree(
                        related,
                        bnode_to_quads,
                        canonical_issuer,
                        path_issuer.clone(),
                        bnode_to_hash,
                        algorithm,
                        max_calls,
                        calls,
                    )?;
                    let issued = path_issuer.issue(related);
                    path.push_str(&issued);
                    path.push('<');
                    path.push_str(&result_hash);
                    path.push('>');
                    path_issuer = result_issuer;

                    if !chosen_path.is_empty()
                        && path.len() >= chosen_path.len()
                        && path > chosen_path
                    {
                        skip = true;
                        break;
                    }
                }
            }

            if !skip && (chosen_path.is_empty() || path < chosen_path) {
                chosen_path = path;
                chosen_path_issuer = Some(path_issuer);
            }

            if !next_permutation(&mut permutation) {
                break;
            }
        }

        data_to_hash.push_str(&chosen_path);
        if let Some(issuer) = chosen_path_issuer {
            chosen_issuer = issuer;
        }
    }

    Ok((hex_digest(algorithm, &data_to_hash), chosen_issuer))
}

/// Canonicalize a dataset: relabel every blank node deterministically and
/// return the sorted, newline-terminated canonical N-Quads document.
pub fn canonicalize(
    dataset: &RdfDataset,
    options: &JsonLdOptions,
) -> Result<String, CanonicalizationError> {
    let quads = dataset.quads();
    let algorithm = options.hash_algorithm;

    let mut bnode_to_quads: HashMap<String, Vec<Quad>> = HashMap::new();
    for quad in &quads {
        for label in quad_blank_nodes(quad) {
            bnode_to_quads
                .entry(label.to_owned())
                .or_default()
                .push(quad.clone());
        }
    }

    if bnode_to_quads.is_empty() {
        return Ok(serialize_sorted(&quads));
    }

    let mut bnode_to_hash: HashMap<String, String> = HashMap::new();
    let mut hash_to_bnodes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (label, mentions) in &bnode_to_quads {
        let hash = hash_first_degree(label, mentions, algorithm);
        bnode_to_hash.insert(label.clone(), hash.clone());
        hash_to_bnodes.entry(hash).or_default().push(label.clone());
    }
    for labels in hash_to_bnodes.values_mut() {
        labels.sort();
    }

    let mut canonical_issuer = IdentifierIssuer::new("_:c14n");
    for (hash, labels) in &hash_to_bnodes {
        if labels.len() == 1 {
            tracing::debug!(hash = %hash, blank_node = %labels[0], "unique first-degree hash");
            canonical_issuer.issue(&labels[0]);
        }
    }

    let mut calls = 0usize;
    for labels in hash_to_bnodes.values() {
        if labels.len() <= 1 {
            continue;
        }

        let mut hash_path_list: Vec<(String, IdentifierIssuer)> = Vec::new();
        for label in labels {
            if canonical_issuer.is_issued(label) {
                continue;
            }
            let mut temp_issuer = IdentifierIssuer::new("_:b");
            temp_issuer.issue(label);
            let (hash, result_issuer) = hash_ndegree(
                label,
                &bnode_to_quads,
                &canonical_issuer,
                temp_issuer,
                &bnode_to_hash,
                algorithm,
                options.max_canon_calls,
                &mut calls,
            )?;
            hash_path_list.push((hash, result_issuer));
        }

        hash_path_list.sort_by(|a, b| a.0.cmp(&b.0));
        for (_hash, result_issuer) in hash_path_list {
            for existing in result_issuer.issued_order() {
                canonical_issuer.issue(existing);
            }
        }
    }

    let relabeled: Vec<Quad> = quads
        .iter()
        .map(|quad| relabel_quad(quad, &canonical_issuer))
        .collect();
    Ok(serialize_sorted(&relabeled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::{Literal, Triple};

    fn options() -> JsonLdOptions {
        JsonLdOptions::default()
    }

    fn triple(subject: &str, predicate: &str, object: &str) -> Triple {
        let object = if object.starts_with("_:") {
            Object::Blank(object.to_owned())
        } else if object.starts_with("http") {
            Object::Iri(object.to_owned())
        } else {
            Object::Literal(Literal::string(object))
        };
        Triple {
            subject: Subject::from_id(subject),
            predicate: predicate.to_owned(),
            object,
        }
    }

    #[test]
    fn issuer_is_sequential_and_idempotent() {
        let mut issuer = IdentifierIssuer::new("_:c14n");
        assert_eq!(issuer.issue("_:x"), "_:c14n0");
        assert_eq!(issuer.issue("_:y"), "_:c14n1");
        assert_eq!(issuer.issue("_:x"), "_:c14n0");
        assert_eq!(issuer.issued_order(), &["_:x".to_owned(), "_:y".to_owned()]);
    }

    #[test]
    fn no_blank_nodes_just_sorts() {
        let mut dataset = RdfDataset::new();
        dataset.add_triple("@default", triple("http://ex/s2", "http://ex/p", "http://ex/o"));
        dataset.add_triple("@default", triple("http://ex/s1", "http://ex/p", "http://ex/o"));

        let result = canonicalize(&dataset, &options()).unwrap();
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0] < lines[1]);
        assert!(result.ends_with('\n'));
    }

    #[test]
    fn single_blank_node() {
        let mut dataset = RdfDataset::new();
        dataset.add_triple("@default", triple("_:b0", "http://ex/p", "value"));

        let result = canonicalize(&dataset, &options()).unwrap();
        assert!(result.contains("_:c14n0"));
        assert!(!result.contains("_:b0"));
    }

    #[test]
    fn label_invariance() {
        let mut first = RdfDataset::new();
        first.add_triple("@default", triple("_:x", "http://ex/name", "Alice"));
        first.add_triple("@default", triple("_:y", "http://ex/name", "Bob"));
        first.add_triple("@default", triple("_:x", "http://ex/knows", "_:y"));

        let mut second = RdfDataset::new();
        second.add_triple("@default", triple("_:other", "http://ex/knows", "_:one"));
        second.add_triple("@default", triple("_:one", "http://ex/name", "Alice"));
        second.add_triple("@default", triple("_:other", "http://ex/name", "Bob"));

        assert_eq!(
            canonicalize(&first, &options()).unwrap(),
            canonicalize(&second, &options()).unwrap()
        );
    }

    #[test]
    fn two_cycle_is_deterministic() {
        let mut forward = RdfDataset::new();
        forward.add_triple("@default", triple("_:x", "http://ex/p", "_:y"));
        forward.add_triple("@default", triple("_:y", "http://ex/p", "_:x"));

        let mut backward = RdfDataset::new();
        backward.add_triple("@default", triple("_:b", "http://ex/p", "_:a"));
        backward.add_triple("@default", triple("_:a", "http://ex/p", "_:b"));

        let result = canonicalize(&forward, &options()).unwrap();
        assert_eq!(result, canonicalize(&backward, &options()).unwrap());
        assert!(result.contains("_:c14n0"));
        assert!(result.contains("_:c14n1"));
        assert_eq!(
            result,
            "_:c14n0 <http://ex/p> _:c14n1 .\n_:c14n1 <http://ex/p> _:c14n0 .\n"
        );
    }

    #[test]
    fn blank_graph_labels_participate() {
        let mut dataset = RdfDataset::new();
        dataset.add_triple("_:g", triple("http://ex/s", "http://ex/p", "x"));

        let result = canonicalize(&dataset, &options()).unwrap();
        assert_eq!(result, "<http://ex/s> <http://ex/p> \"x\" _:c14n0 .\n");
    }

    #[test]
    fn sha384_changes_nothing_but_group_order() {
        let mut dataset = RdfDataset::new();
        dataset.add_triple("@default", triple("_:x", "http://ex/p", "_:y"));
        dataset.add_triple("@default", triple("_:y", "http://ex/p", "_:x"));

        let sha384 = JsonLdOptions {
            hash_algorithm: HashAlgorithm::Sha384,
            ..JsonLdOptions::default()
        };
        // both runs are internally deterministic
        assert_eq!(
            canonicalize(&dataset, &sha384).unwrap(),
            canonicalize(&dataset, &sha384).unwrap()
        );
    }

    #[test]
    fn call_depth_is_bounded() {
        let mut dataset = RdfDataset::new();
        dataset.add_triple("@default", triple("_:a", "http://ex/p", "_:b"));
        dataset.add_triple("@default", triple("_:b", "http://ex/p", "_:a"));

        let bounded = JsonLdOptions {
            max_canon_calls: 1,
            ..JsonLdOptions::default()
        };
        assert!(matches!(
            canonicalize(&dataset, &bounded),
            Err(CanonicalizationError::MaxCallDepthExceeded)
        ));
    }

    #[test]
    fn permutations_enumerate_in_order() {
        let mut arr = vec![0, 1, 2];
        let mut permutations = vec![arr.clone()];
        while next_permutation(&mut arr) {
            permutations.push(arr.clone());
        }
        assert_eq!(permutations.len(), 6);
        assert_eq!(permutations[1], vec![0, 2, 1]);
        assert_eq!(permutations[5], vec![2, 1, 0]);
    }
}
