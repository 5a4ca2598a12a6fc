//! Document loading: media-type dispatch and the `file://` loader.

use std::fmt::Debug;
use std::fs;

use serde_json::Value;
use thiserror::Error;

/// Errors raised while loading documents or remote contexts.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("loading document failed: {0}")]
    LoadingDocumentFailed(String),

    #[error("loading remote context failed: {0}")]
    LoadingRemoteContextFailed(String),
}

/// Media types the processor knows how to dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    JsonLd,
    Json,
    NQuads,
    Html,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::JsonLd => "application/ld+json",
            MediaType::Json => "application/json",
            MediaType::NQuads => "application/n-quads",
            MediaType::Html => "text/html",
        }
    }

    /// Detects a media type from a file name, by extension.
    pub fn from_path(path: &str) -> Result<MediaType, LoaderError> {
        if path.is_empty() {
            return Err(LoaderError::LoadingDocumentFailed(
                "filename is empty".to_owned(),
            ));
        }

        if path.ends_with(".jsonld") {
            Ok(MediaType::JsonLd)
        } else if path.ends_with(".json") {
            Ok(MediaType::Json)
        } else if path.ends_with(".nq") {
            Ok(MediaType::NQuads)
        } else if path.ends_with(".html") {
            Ok(MediaType::Html)
        } else {
            Err(LoaderError::LoadingDocumentFailed(format!(
                "unknown media type for file: {}",
                path
            )))
        }
    }
}

/// Parsed payload of a loaded document.
#[derive(Debug, Clone)]
pub enum DocumentContent {
    Json(Value),
    NQuads(String),
}

impl DocumentContent {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            DocumentContent::Json(value) => Some(value),
            DocumentContent::NQuads(_) => None,
        }
    }
}

/// A document returned by a `DocumentLoader`.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub content_type: MediaType,
    pub document_url: String,
    pub context_url: Option<String>,
    pub content: DocumentContent,
}

/// This trait is implemented by consumers of the API, to provide remote
/// documents and contexts.
pub trait DocumentLoader: Debug {
    /// Loads the document behind `url`.
    fn load(&self, url: &str) -> Result<RemoteDocument, LoaderError>;
}

/// The default loader. Refuses every URL, so processing stays fully local
/// unless the caller opts into a real loader.
#[derive(Debug, Default)]
pub struct NoopLoader;

impl DocumentLoader for NoopLoader {
    fn load(&self, url: &str) -> Result<RemoteDocument, LoaderError> {
        Err(LoaderError::LoadingDocumentFailed(format!(
            "remote document loading is not configured (requested {})",
            url
        )))
    }
}

/// Loads `file://` URLs (and bare absolute paths) from the local
/// filesystem, synchronously.
#[derive(Debug, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> FileLoader {
        FileLoader
    }
}

impl DocumentLoader for FileLoader {
    fn load(&self, url: &str) -> Result<RemoteDocument, LoaderError> {
        if !url.starts_with("file://") && !url.starts_with('/') {
            return Err(LoaderError::LoadingDocumentFailed(format!(
                "unsupported URL scheme, FileLoader only loads files: {}",
                url
            )));
        }

        let local_path = url.strip_prefix("file://").unwrap_or(url);
        let content_type = MediaType::from_path(local_path)?;

        let raw = fs::read_to_string(local_path).map_err(|e| {
            LoaderError::LoadingDocumentFailed(format!("failed to open file {}: {}", local_path, e))
        })?;

        let content = match content_type {
            MediaType::JsonLd | MediaType::Json => {
                let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
                    LoaderError::LoadingDocumentFailed(format!(
                        "failed to parse JSON in {}: {}",
                        local_path, e
                    ))
                })?;
                DocumentContent::Json(parsed)
            }
            MediaType::NQuads => DocumentContent::NQuads(raw),
            MediaType::Html => {
                return Err(LoaderError::LoadingDocumentFailed(format!(
                    "unsupported content type '{}', supported content types are: [{}, {} and {}]",
                    MediaType::Html.as_str(),
                    MediaType::JsonLd.as_str(),
                    MediaType::Json.as_str(),
                    MediaType::NQuads.as_str()
                )));
            }
        };

        let document_url = if url.starts_with("file://") {
            url.to_owned()
        } else {
            format!("file://{}", url)
        };

        Ok(RemoteDocument {
            content_type,
            document_url,
            context_url: None,
            content,
        })
    }
}
