//! A JSON-LD 1.1 processor: expansion, serialization to RDF, and
//! URDNA2015 dataset canonicalization.

mod api;
mod context;
mod creation;
mod expand;

pub mod canon;
pub mod loader;
pub mod nodemap;
pub mod nquads;
pub mod rdf;

pub use api::*;
pub use context::Context;
pub use loader::{
    DocumentContent, DocumentLoader, FileLoader, LoaderError, MediaType, NoopLoader,
    RemoteDocument,
};
pub use nodemap::{generate_node_map, BlankNodeGenerator, BlankNodeNames, Entity, NodeMap, Pointer};
pub use rdf::{GraphLabel, Literal, Object, Quad, RdfDataset, Subject, Triple};

pub mod error {
    pub use crate::api::JsonLdError;
    pub use crate::canon::CanonicalizationError;
    pub use crate::creation::{ContextCreationError, TermCreationError};
    pub use crate::expand::ExpansionError;
    pub use crate::loader::LoaderError;
    pub use crate::nodemap::NodeMapError;
    pub use crate::nquads::NQuadsParseError;
}
