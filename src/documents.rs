//! Document retrieval: resolve the viewer indirection down to the PDF, keep
//! the binary on disk, extract and normalize its text, persist one row per
//! (process, document).

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{log_failure, Store, Upsert};
use crate::error::DocumentError;
use crate::fetch::{Fetcher, Request, Response};
use crate::parser::extract::{Record, RecordKind};
use crate::parser::text::normalize;
use crate::session::CookieJar;
use crate::site::Site;

static PARAMETROS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""parametros"\s*:\s*"([^"]*)""#).unwrap());

/// How a document reference reaches the viewer page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indirection {
    /// URL of a page carrying the inline `"parametros"` blob (possibly after redirects).
    Viewer(String),
    /// URL whose response body is itself the viewer URL.
    BodyRedirect(String),
}

/// A document discovered on a listing row or case page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub kind: RecordKind,
    pub process_key: String,
    pub document_key: String,
    pub process_code: String,
    pub title: String,
    pub description: String,
    pub indirection: Indirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    ReferenceFound,
    /// Stored text already present; nothing was requested.
    Skipped,
    Resolving,
    Fetching,
    Extracting,
    Normalizing,
    Persisted,
}

/// Turns a fetched binary into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, DocumentError>;
}

pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, DocumentError> {
        // pdf-extract panics on some malformed inputs.
        std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| DocumentError::Extraction("pdf parser panicked".to_string()))?
            .map_err(|e| DocumentError::Extraction(e.to_string()))
    }
}

/// The `"parametros":"..."` value from the viewer page's inline script.
pub fn viewer_parameters(body: &str) -> Option<String> {
    PARAMETROS
        .captures(body)
        .map(|c| c[1].trim().to_string())
        .filter(|p| !p.is_empty())
}

pub struct DocumentPipeline<'a> {
    fetcher: &'a dyn Fetcher,
    store: &'a Store,
    site: &'a Site,
    extractor: &'a dyn TextExtractor,
    pdf_root: PathBuf,
}

impl<'a> DocumentPipeline<'a> {
    /// Artifacts land in `<pdf_root>/<family>/<uuid>.pdf`.
    pub fn new(
        fetcher: &'a dyn Fetcher,
        store: &'a Store,
        site: &'a Site,
        extractor: &'a dyn TextExtractor,
        pdf_root: impl Into<PathBuf>,
    ) -> Self {
        DocumentPipeline {
            fetcher,
            store,
            site,
            extractor,
            pdf_root: pdf_root.into(),
        }
    }

    /// Run every reference, logging failures; returns how many were persisted.
    pub async fn process_all(&self, docs: &[DocumentRef], cookies: &CookieJar) -> usize {
        let mut persisted = 0;
        for doc in docs {
            if self.process(doc, cookies).await == Some(DocumentState::Persisted) {
                persisted += 1;
            }
        }
        persisted
    }

    /// Terminal state for one reference, or `None` when it failed (already logged).
    pub async fn process(&self, doc: &DocumentRef, cookies: &CookieJar) -> Option<DocumentState> {
        match self.try_process(doc, cookies).await {
            Ok(state) => Some(state),
            // Logged at error level where the store call failed.
            Err(DocumentError::Store(_)) => None,
            Err(e) => {
                warn!(
                    table = doc.kind.table(),
                    process = %doc.process_key,
                    document = %doc.document_key,
                    "document skipped: {}",
                    e
                );
                None
            }
        }
    }

    pub async fn try_process(
        &self,
        doc: &DocumentRef,
        cookies: &CookieJar,
    ) -> Result<DocumentState, DocumentError> {
        let key = [doc.process_key.as_str(), doc.document_key.as_str()];
        step(doc, DocumentState::ReferenceFound);

        let existing = self.store.get(doc.kind, &key).inspect_err(|e| {
            error!(
                table = doc.kind.table(),
                key = %key.join("/"),
                "lookup failed: {}",
                e
            )
        })?;
        if let Some(row) = &existing {
            if !row.get("conteudo").is_empty() {
                step(doc, DocumentState::Skipped);
                return Ok(DocumentState::Skipped);
            }
        }

        step(doc, DocumentState::Resolving);
        let pdf_url = self.resolve(doc, cookies).await?;

        step(doc, DocumentState::Fetching);
        let pdf = self.get(&pdf_url, cookies).await?;
        let file_name = existing
            .as_ref()
            .map(|r| r.get("arquivo").to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| format!("{}.pdf", Uuid::new_v4()));
        let path = self.write_artifact(doc.kind.family(), &file_name, &pdf.body)?;
        debug!(path = %path.display(), bytes = pdf.body.len(), "artifact written");

        step(doc, DocumentState::Extracting);
        let raw = match self.extractor.extract(&pdf.body) {
            Ok(text) => text,
            Err(e) => {
                warn!(process = %doc.process_key, document = %doc.document_key, "{}", e);
                String::new()
            }
        };

        step(doc, DocumentState::Normalizing);
        let text = normalize(&raw);

        let record = Record::new(doc.kind)
            .with("numero_processo", doc.process_key.as_str())
            .with("cd_documento", doc.document_key.as_str())
            .with("cd_processo", doc.process_code.as_str())
            .with("arquivo", file_name)
            .with("titulo", doc.title.as_str())
            .with("descricao", doc.description.as_str())
            .with("conteudo", text);
        let outcome = self
            .store
            .upsert(&record)
            .inspect_err(|e| log_failure(&record, e))?;
        if outcome != Upsert::Unchanged {
            info!(table = doc.kind.table(), key = %record.key_label(), ?outcome, "document stored");
        }

        step(doc, DocumentState::Persisted);
        Ok(DocumentState::Persisted)
    }

    /// Follow the indirection chain to the `getPDF.do` URL.
    async fn resolve(&self, doc: &DocumentRef, cookies: &CookieJar) -> Result<String, DocumentError> {
        let viewer_url = match &doc.indirection {
            Indirection::Viewer(url) => url.clone(),
            Indirection::BodyRedirect(url) => {
                let body = self.get(url, cookies).await?.text();
                let target = body.trim();
                if target.is_empty() || target.contains(char::is_whitespace) {
                    return Err(DocumentError::MalformedIndirection(format!(
                        "no viewer URL in response from {}",
                        url
                    )));
                }
                self.site.absolute(doc.kind.family(), target)
            }
        };

        let viewer = self.get(&viewer_url, cookies).await?.text();
        let params = viewer_parameters(&viewer).ok_or_else(|| {
            DocumentError::MalformedIndirection(format!("no parametros blob at {}", viewer_url))
        })?;
        Ok(self.site.pdf(&params))
    }

    async fn get(&self, url: &str, cookies: &CookieJar) -> Result<Response, DocumentError> {
        Ok(self
            .fetcher
            .fetch(Request::get(url).with_cookies(cookies))
            .await?)
    }

    fn write_artifact(
        &self,
        family: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, DocumentError> {
        let dir = self.pdf_root.join(family);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

fn step(doc: &DocumentRef, state: DocumentState) {
    debug!(process = %doc.process_key, document = %doc.document_key, ?state);
}
