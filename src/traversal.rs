//! Paginated listing traversal:
//! `Start -> PageLoaded -> (NextPageRequested -> PageLoaded)* -> Done`.

use std::sync::LazyLock;

use scraper::Selector;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::documents::{DocumentPipeline, DocumentRef};
use crate::error::FetchError;
use crate::fetch::{Fetcher, Request, Response};
use crate::parser::extract::listing::ListingMapper;
use crate::parser::extract::Mapped;
use crate::parser::fields::has;
use crate::session::TraversalContext;
use crate::site::Site;

static NEXT_PAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[title="Próxima página"]"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    Start,
    PageLoaded,
    NextPageRequested,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub pages: u32,
    pub records: usize,
    pub inserted: usize,
    pub existing: usize,
    pub skipped: usize,
    pub documents: usize,
}

/// What one loaded page handed back once its records were stored.
struct PageOutcome {
    current: u32,
    has_next: bool,
    documents: Vec<DocumentRef>,
}

pub struct Traversal<'a, M: ListingMapper> {
    fetcher: &'a dyn Fetcher,
    store: &'a Store,
    site: &'a Site,
    mapper: &'a M,
    documents: Option<&'a DocumentPipeline<'a>>,
    max_pages: Option<u32>,
}

impl<'a, M: ListingMapper> Traversal<'a, M> {
    pub fn new(fetcher: &'a dyn Fetcher, store: &'a Store, site: &'a Site, mapper: &'a M) -> Self {
        Traversal {
            fetcher,
            store,
            site,
            mapper,
            documents: None,
            max_pages: None,
        }
    }

    /// Hand each page's document references to `pipeline` before moving on.
    pub fn with_documents(mut self, pipeline: &'a DocumentPipeline<'a>) -> Self {
        self.documents = Some(pipeline);
        self
    }

    pub fn max_pages(mut self, limit: Option<u32>) -> Self {
        self.max_pages = limit;
        self
    }

    pub async fn run(&self, ctx: &mut TraversalContext) -> Result<TraversalStats, FetchError> {
        let mut stats = TraversalStats::default();
        let table = self.mapper.kind().table();
        if ctx.query.trim().is_empty() {
            warn!(table, "no search query given, nothing to do");
            return Ok(stats);
        }

        let mut state = TraversalState::Start;
        let mut loaded: Option<Response> = None;
        loop {
            debug!(table, ?state, page = ctx.page);
            state = match state {
                TraversalState::Start => {
                    let request = Request::get(self.mapper.search_url(self.site, &ctx.query));
                    let first = self.fetch(ctx, request).await?;
                    match ctx.start_page.filter(|&p| p > 1) {
                        Some(start) => {
                            info!(table, start, "jumping to start page");
                            ctx.page = start;
                            TraversalState::NextPageRequested
                        }
                        None => {
                            loaded = Some(first);
                            TraversalState::PageLoaded
                        }
                    }
                }
                TraversalState::NextPageRequested => {
                    let request = Request::get(self.mapper.page_url(self.site, ctx.page))
                        .latin1()
                        .with_cookies(&ctx.cookies);
                    loaded = Some(self.fetch(ctx, request).await?);
                    TraversalState::PageLoaded
                }
                TraversalState::PageLoaded => match loaded.take() {
                    Some(response) => {
                        let outcome = self.load_page(&response, ctx.page, &mut stats);
                        ctx.page = outcome.current;
                        if let Some(pipeline) = self.documents {
                            stats.documents +=
                                pipeline.process_all(&outcome.documents, &ctx.cookies).await;
                        }
                        info!(
                            table,
                            page = outcome.current,
                            records = stats.records,
                            "page done"
                        );

                        let limit_hit = self.max_pages.is_some_and(|max| stats.pages >= max);
                        if outcome.has_next && !limit_hit {
                            ctx.page = outcome.current + 1;
                            TraversalState::NextPageRequested
                        } else {
                            TraversalState::Done
                        }
                    }
                    None => TraversalState::Done,
                },
                TraversalState::Done => break,
            };
        }

        info!(
            table,
            pages = stats.pages,
            records = stats.records,
            inserted = stats.inserted,
            existing = stats.existing,
            documents = stats.documents,
            "traversal done"
        );
        Ok(stats)
    }

    async fn fetch(
        &self,
        ctx: &mut TraversalContext,
        request: Request,
    ) -> Result<Response, FetchError> {
        let response = self.fetcher.fetch(request).await?;
        debug!(url = %response.url, status = response.status, "page fetched");
        ctx.absorb_cookies(&response.set_cookies);
        ctx.pages_fetched += 1;
        Ok(response)
    }

    /// Map and store every record on the page. Kept synchronous so parsed
    /// markup never lives across an await.
    ///
    /// The page indicator wins unless it is missing or points behind the page
    /// that was asked for; then `requested` stands, so the next page number
    /// always moves forward.
    fn load_page(
        &self,
        response: &Response,
        requested: u32,
        stats: &mut TraversalStats,
    ) -> PageOutcome {
        let html = response.html();
        let current = self
            .mapper
            .current_page(&html)
            .filter(|&p| p >= requested)
            .unwrap_or(requested);
        let rows = self.mapper.rows(&html);
        if rows.is_empty() {
            warn!(table = self.mapper.kind().table(), page = current, "no records on page");
        }

        let mut documents = Vec::new();
        for row in rows {
            match self.mapper.map(self.site, row, None) {
                Ok(mapped) => {
                    documents.extend(self.persist(mapped, stats));
                }
                Err(e) => {
                    stats.skipped += 1;
                    warn!(table = self.mapper.kind().table(), page = current, "record skipped: {}", e);
                }
            }
        }
        stats.pages += 1;

        PageOutcome {
            current,
            has_next: has(html.root_element(), &NEXT_PAGE),
            documents,
        }
    }

    /// Listing rows are append-only: a row already stored is left as it was.
    fn persist(&self, mapped: Mapped, stats: &mut TraversalStats) -> Vec<DocumentRef> {
        stats.records += 1;
        match self
            .store
            .insert_missing_logged(std::slice::from_ref(&mapped.record))
        {
            0 => stats.existing += 1,
            n => stats.inserted += n,
        }
        for child in &mapped.children {
            self.store.upsert_logged(child);
        }
        mapped.documents
    }
}
