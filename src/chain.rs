//! Listing keys feed case-detail lookups: cjpg -> cpopg, cjsg -> cposg.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::db::{Cursor, Store, Upsert};
use crate::documents::DocumentPipeline;
use crate::error::FetchError;
use crate::fetch::{Fetcher, Request, Response};
use crate::parser::extract::detail::{selected_case_code, FirstInstanceCase, SecondInstanceCase};
use crate::parser::extract::{Mapped, RecordKind, RecordMapper};
use crate::session::{cookies_from_headers, CookieJar};
use crate::site::Site;

/// A chained detail pipeline and the listing it reads keys from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePipeline {
    FirstInstance,
    SecondInstance,
}

impl CasePipeline {
    /// Cursor name and site family.
    pub fn name(self) -> &'static str {
        self.kind().family()
    }

    pub fn kind(self) -> RecordKind {
        match self {
            CasePipeline::FirstInstance => RecordKind::FirstInstanceCase,
            CasePipeline::SecondInstance => RecordKind::SecondInstanceCase,
        }
    }

    pub fn upstream(self) -> RecordKind {
        match self {
            CasePipeline::FirstInstance => RecordKind::FirstInstanceListing,
            CasePipeline::SecondInstance => RecordKind::SecondInstanceListing,
        }
    }

    fn mapper(self) -> &'static dyn RecordMapper {
        match self {
            CasePipeline::FirstInstance => &FirstInstanceCase,
            CasePipeline::SecondInstance => &SecondInstanceCase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOutcome {
    Stored(Upsert),
    Replaced,
    /// Page fetched but no record could be built from it.
    Unmapped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub documents: usize,
}

enum Landing {
    /// Selection modal; carries the first case's internal code.
    Modal(String),
    Case(Option<Mapped>),
}

pub struct CaseRunner<'a> {
    fetcher: &'a dyn Fetcher,
    store: &'a Store,
    site: &'a Site,
    documents: Option<&'a DocumentPipeline<'a>>,
    overwrite: bool,
}

impl<'a> CaseRunner<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, store: &'a Store, site: &'a Site) -> Self {
        CaseRunner {
            fetcher,
            store,
            site,
            documents: None,
            overwrite: false,
        }
    }

    pub fn with_documents(mut self, pipeline: &'a DocumentPipeline<'a>) -> Self {
        self.documents = Some(pipeline);
        self
    }

    /// Replace stored case rows instead of filling their empty fields.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Walk the upstream listing from the resume point, one case per key,
    /// moving the cursor after each.
    pub async fn run_chain(&self, pipeline: CasePipeline) -> Result<ChainStats> {
        let mut stats = ChainStats::default();
        let upstream = self.store.keys(pipeline.upstream())?;
        if upstream.is_empty() {
            warn!(
                upstream = pipeline.upstream().table(),
                "no upstream records, run the listing first"
            );
            return Ok(stats);
        }

        let start = self.resume_offset(pipeline, &upstream)?;
        if start >= upstream.len() {
            info!(pipeline = pipeline.name(), "nothing left to process");
            return Ok(stats);
        }
        info!(
            pipeline = pipeline.name(),
            total = upstream.len(),
            start,
            "resuming chained run"
        );

        let pb = ProgressBar::new((upstream.len() - start) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        for (offset, key) in upstream.iter().enumerate().skip(start) {
            if self.is_done(pipeline, key)? {
                stats.skipped += 1;
            } else {
                match self.run_case(pipeline, key).await {
                    Ok((CaseOutcome::Unmapped, _)) => stats.failed += 1,
                    Ok((_, documents)) => {
                        stats.processed += 1;
                        stats.documents += documents;
                    }
                    Err(e) => {
                        stats.failed += 1;
                        warn!(pipeline = pipeline.name(), key = %key, "case failed: {}", e);
                    }
                }
            }

            let cursor = Cursor {
                last_key: key.clone(),
                offset,
            };
            if let Err(e) = self.store.set_cursor(pipeline.name(), &cursor) {
                error!(pipeline = pipeline.name(), key = %key, "cursor not saved: {}", e);
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!(
            pipeline = pipeline.name(),
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            documents = stats.documents,
            "chained run done"
        );
        Ok(stats)
    }

    /// Index of the first upstream key still to process. The saved cursor
    /// wins; without one, resume after the last key written downstream.
    pub fn resume_offset(&self, pipeline: CasePipeline, upstream: &[String]) -> Result<usize> {
        if let Some(cursor) = self.store.cursor(pipeline.name())? {
            let offset = upstream
                .iter()
                .position(|k| *k == cursor.last_key)
                .unwrap_or(cursor.offset);
            return Ok(offset + 1);
        }

        Ok(self
            .store
            .last_key(pipeline.kind())?
            .and_then(|last| upstream.iter().position(|k| *k == last))
            .map_or(0, |i| i + 1))
    }

    /// A stored case is done once its required field is filled; a second
    /// instance case also once any of its documents are stored.
    fn is_done(&self, pipeline: CasePipeline, key: &str) -> Result<bool> {
        let kind = pipeline.kind();
        if self.store.is_complete(kind, &[key], kind.required_field())? {
            return Ok(true);
        }
        Ok(pipeline == CasePipeline::SecondInstance
            && self
                .store
                .has_rows_for(RecordKind::SecondInstanceDocument, key)?)
    }

    /// Look up one case, store it with its dependent rows and documents.
    /// Returns the case outcome and how many documents were persisted.
    pub async fn run_case(
        &self,
        pipeline: CasePipeline,
        key: &str,
    ) -> Result<(CaseOutcome, usize), FetchError> {
        let family = pipeline.name();
        let mut cookies = CookieJar::new();

        let response = self
            .fetch(Request::get(self.site.case_search(family, key)), &mut cookies)
            .await?;
        let mut landing = self.land(pipeline, &response, key);

        if let Landing::Modal(code) = &landing {
            info!(key, code = %code, "several cases matched, taking the first");
            let request = Request::get(self.site.case_show(family, code)).with_cookies(&cookies);
            let response = self.fetch(request, &mut cookies).await?;
            landing = self.land(pipeline, &response, key);
        }

        let mapped = match landing {
            Landing::Case(Some(mapped)) => mapped,
            Landing::Case(None) => return Ok((CaseOutcome::Unmapped, 0)),
            Landing::Modal(_) => {
                warn!(key, "selection modal returned twice");
                return Ok((CaseOutcome::Unmapped, 0));
            }
        };

        let outcome = self.persist(&mapped);
        let documents = match self.documents {
            Some(docs) => docs.process_all(&mapped.documents, &cookies).await,
            None => 0,
        };
        Ok((outcome, documents))
    }

    async fn fetch(&self, request: Request, cookies: &mut CookieJar) -> Result<Response, FetchError> {
        let response = self.fetcher.fetch(request).await?;
        cookies.extend(cookies_from_headers(&response.set_cookies));
        Ok(response)
    }

    fn land(&self, pipeline: CasePipeline, response: &Response, key: &str) -> Landing {
        let html = response.html();
        if let Some(code) = selected_case_code(&html) {
            return Landing::Modal(code);
        }
        match pipeline.mapper().map(self.site, html.root_element(), Some(key)) {
            Ok(mapped) => Landing::Case(Some(mapped)),
            Err(e) => {
                warn!(key, "case page not mapped: {}", e);
                Landing::Case(None)
            }
        }
    }

    fn persist(&self, mapped: &Mapped) -> CaseOutcome {
        let outcome = if self.overwrite {
            self.store.replace_logged(&mapped.record);
            CaseOutcome::Replaced
        } else {
            match self.store.upsert_logged(&mapped.record) {
                Some(upsert) => CaseOutcome::Stored(upsert),
                None => CaseOutcome::Unmapped,
            }
        };

        let (movements, others): (Vec<_>, Vec<_>) = mapped
            .children
            .iter()
            .cloned()
            .partition(|c| c.kind == RecordKind::Movement);
        if !movements.is_empty() {
            self.store.insert_missing_logged(&movements);
        }
        for child in &others {
            if self.overwrite {
                self.store.replace_logged(child);
            } else {
                self.store.upsert_logged(child);
            }
        }

        info!(
            table = mapped.record.kind.table(),
            key = %mapped.record.key_label(),
            ?outcome,
            movements = movements.len(),
            "case stored"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::TextExtractor;
    use crate::error::DocumentError;
    use crate::fetch::testing::{page, ScriptedFetcher};
    use crate::parser::extract::Record;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn site() -> Site {
        Site::new("https://esaj.tjsp.jus.br")
    }

    fn case_page(classe: &str) -> String {
        format!(
            r#"<html><body><span id="classeProcesso">{}</span></body></html>"#,
            classe
        )
    }

    fn listing(store: &Store, kind: RecordKind, keys: &[&str]) {
        for key in keys {
            store
                .upsert(&Record::new(kind).with("numero_processo", *key))
                .unwrap();
        }
    }

    fn searched(fetcher: &ScriptedFetcher) -> Vec<String> {
        fetcher
            .requests()
            .into_iter()
            .filter(|r| r.url.contains("search.do"))
            .map(|r| r.url)
            .collect()
    }

    #[tokio::test]
    async fn resumes_after_last_downstream_key() {
        let store = Store::open_in_memory().unwrap();
        listing(&store, RecordKind::FirstInstanceListing, &["P-A", "P-B", "P-C"]);
        store
            .upsert(
                &Record::new(RecordKind::FirstInstanceCase)
                    .with("numero_processo", "P-A")
                    .with("classe", "Monitória"),
            )
            .unwrap();
        let fetcher = ScriptedFetcher::new()
            .html("dePesquisa=P-B&", &case_page("Usucapião"))
            .html("dePesquisa=P-C&", &case_page("Inventário"));
        let site = site();
        let runner = CaseRunner::new(&fetcher, &store, &site);

        let stats = runner.run_chain(CasePipeline::FirstInstance).await.unwrap();

        let urls = searched(&fetcher);
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("dePesquisa=P-B&"));
        assert_eq!(stats.processed, 2);
        assert_eq!(
            store.cursor("cpopg").unwrap(),
            Some(Cursor {
                last_key: "P-C".into(),
                offset: 2
            })
        );
        let b = store.get(RecordKind::FirstInstanceCase, &["P-B"]).unwrap().unwrap();
        assert_eq!(b.get("classe"), "Usucapião");
    }

    #[tokio::test]
    async fn cursor_wins_and_complete_cases_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        listing(&store, RecordKind::FirstInstanceListing, &["P-A", "P-B", "P-C"]);
        store
            .set_cursor(
                "cpopg",
                &Cursor {
                    last_key: "P-A".into(),
                    offset: 0,
                },
            )
            .unwrap();
        store
            .upsert(
                &Record::new(RecordKind::FirstInstanceCase)
                    .with("numero_processo", "P-B")
                    .with("classe", "Monitória"),
            )
            .unwrap();
        let fetcher = ScriptedFetcher::new().html("dePesquisa=P-C&", &case_page("Inventário"));
        let site = site();
        let runner = CaseRunner::new(&fetcher, &store, &site);

        let stats = runner.run_chain(CasePipeline::FirstInstance).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(searched(&fetcher).len(), 1);
        assert_eq!(store.cursor("cpopg").unwrap().unwrap().last_key, "P-C");

        // Everything handled: a second run makes no requests.
        runner.run_chain(CasePipeline::FirstInstance).await.unwrap();
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_upstream_makes_no_requests() {
        let store = Store::open_in_memory().unwrap();
        let fetcher = ScriptedFetcher::new();
        let site = site();
        let stats = CaseRunner::new(&fetcher, &store, &site)
            .run_chain(CasePipeline::SecondInstance)
            .await
            .unwrap();
        assert_eq!(stats, ChainStats::default());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_case_does_not_stop_the_chain() {
        let store = Store::open_in_memory().unwrap();
        listing(&store, RecordKind::FirstInstanceListing, &["P-A", "P-B"]);
        let fetcher = ScriptedFetcher::new().html("dePesquisa=P-B&", &case_page("Usucapião"));
        let site = site();

        let stats = CaseRunner::new(&fetcher, &store, &site)
            .run_chain(CasePipeline::FirstInstance)
            .await
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 1);
        assert!(store.exists(RecordKind::FirstInstanceCase, &["P-B"]).unwrap());
    }

    #[tokio::test]
    async fn modal_is_followed_with_session() {
        let store = Store::open_in_memory().unwrap();
        let fetcher = ScriptedFetcher::new()
            .route(
                "search.do",
                page("search.do", &fixture("cpopg_modal"), &["JSESSIONID=s1; Path=/cpopg"]),
            )
            .html("show.do?processo.codigo=2S0001XYZ0000", &fixture("cpopg_show"));
        let site = site();
        let runner = CaseRunner::new(&fetcher, &store, &site);

        let (outcome, _) = runner
            .run_case(CasePipeline::FirstInstance, "1000123-45.2023.8.26.0100")
            .await
            .unwrap();
        assert_eq!(outcome, CaseOutcome::Stored(Upsert::Inserted));

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].cookies.get("JSESSIONID").map(String::as_str), Some("s1"));

        let row = store
            .get(RecordKind::FirstInstanceCase, &["1000123-45.2023.8.26.0100"])
            .unwrap()
            .unwrap();
        assert_eq!(row.get("classe"), "Procedimento Comum Cível");
        assert_eq!(store.keys(RecordKind::Movement).unwrap().len(), 1);
        assert_eq!(store.stats().unwrap()[4], (RecordKind::Movement, 2));
        assert_eq!(store.cursor("cpopg").unwrap(), None);

        // Re-running the same case keeps one row and one set of movements.
        runner
            .run_case(CasePipeline::FirstInstance, "1000123-45.2023.8.26.0100")
            .await
            .unwrap();
        assert_eq!(store.stats().unwrap()[2], (RecordKind::FirstInstanceCase, 1));
        assert_eq!(store.stats().unwrap()[4], (RecordKind::Movement, 2));
    }

    #[tokio::test]
    async fn overwrite_replaces_stored_case() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert(
                &Record::new(RecordKind::FirstInstanceCase)
                    .with("numero_processo", "P-A")
                    .with("classe", "Velha")
                    .with("juiz", "Antigo"),
            )
            .unwrap();
        let fetcher = ScriptedFetcher::new().html("dePesquisa=P-A&", &case_page("Nova"));
        let site = site();

        CaseRunner::new(&fetcher, &store, &site)
            .run_case(CasePipeline::FirstInstance, "P-A")
            .await
            .unwrap();
        let kept = store.get(RecordKind::FirstInstanceCase, &["P-A"]).unwrap().unwrap();
        assert_eq!(kept.get("classe"), "Velha");

        let (outcome, _) = CaseRunner::new(&fetcher, &store, &site)
            .overwrite(true)
            .run_case(CasePipeline::FirstInstance, "P-A")
            .await
            .unwrap();
        assert_eq!(outcome, CaseOutcome::Replaced);
        let replaced = store.get(RecordKind::FirstInstanceCase, &["P-A"]).unwrap().unwrap();
        assert_eq!(replaced.get("classe"), "Nova");
        assert_eq!(replaced.get("juiz"), "");
    }

    struct Fixed;

    impl TextExtractor for Fixed {
        fn extract(&self, _bytes: &[u8]) -> Result<String, DocumentError> {
            Ok("Acórdão na íntegra".to_string())
        }
    }

    #[tokio::test]
    async fn second_instance_case_with_origin_and_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        listing(&store, RecordKind::SecondInstanceListing, &["2317756-12.2023.8.26.0000"]);
        let fetcher = ScriptedFetcher::new()
            .html("cposg/search.do", &fixture("cposg_show"))
            .html(
                "verificarAcessoMovimentacao.do",
                "https://esaj.tjsp.jus.br/pastadigital/abrirPastaProcessoDigital.do?instancia=2",
            )
            .html("abrirPastaProcessoDigital.do", &fixture("viewer"))
            .route("getPDF.do", page("getPDF.do", "%PDF", &[]));
        let site = site();
        let pipeline = DocumentPipeline::new(&fetcher, &store, &site, &Fixed, dir.path());
        let runner = CaseRunner::new(&fetcher, &store, &site).with_documents(&pipeline);

        let stats = runner.run_chain(CasePipeline::SecondInstance).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.documents, 1);

        let origin = store
            .get(RecordKind::OriginCase, &["2317756-12.2023.8.26.0000"])
            .unwrap()
            .unwrap();
        assert_eq!(origin.get("numero_origem"), "1000123-45.2023.8.26.0100");
        let doc = store
            .get(
                RecordKind::SecondInstanceDocument,
                &["2317756-12.2023.8.26.0000", "991"],
            )
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("conteudo"), "Acórdão na íntegra");
        assert_eq!(doc.get("cd_processo"), "RI0001ABC0000");
    }
}
