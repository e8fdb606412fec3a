//! Search-result listings: first-instance (cjpg) and second-instance (cjsg)
//! judgments. One record per result table; cjpg rows also reference the
//! judgment document.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{Mapped, Record, RecordKind, RecordMapper};
use crate::documents::{DocumentRef, Indirection};
use crate::error::{DocumentError, MapError};
use crate::parser::fields::{attr_of, extract, text_of};
use crate::site::Site;

static RESULTS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#tdResultados").unwrap());
static RESULT_ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#tdResultados table table").unwrap());
// Page-change responses come back without the #tdResultados wrapper.
static FRAGMENT_ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table:first-of-type table").unwrap());
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static FULL_TEXT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[title="Visualizar Inteiro Teor"]"#).unwrap());
static SUMMARY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr:last-child div:last-child").unwrap());
static CJPG_CURRENT_PAGE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#".trocaDePagina [style="font-weight:bold;"]"#).unwrap()
});
static CJSG_CURRENT_PAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".paginaAtual").unwrap());

/// A paginated search family.
pub trait ListingMapper: RecordMapper {
    fn search_url(&self, site: &Site, query: &str) -> String;

    fn page_url(&self, site: &Site, page: u32) -> String;

    /// Result fragments on a loaded page, one per record.
    fn rows<'a>(&self, page: &'a Html) -> Vec<ElementRef<'a>> {
        let selector: &Selector = if page.select(&RESULTS).next().is_some() {
            &RESULT_ROWS
        } else {
            &FRAGMENT_ROWS
        };
        page.select(selector).collect()
    }

    /// Page number shown by the page indicator, if readable.
    fn current_page(&self, page: &Html) -> Option<u32>;
}

fn parse_page_number(page: &Html, selector: &Selector) -> Option<u32> {
    page.select(selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .and_then(|t| t.trim().parse().ok())
}

fn case_number(row: ElementRef<'_>) -> Result<String, MapError> {
    let number = text_of(row, &FULL_TEXT_LINK);
    if number.is_empty() {
        Err(MapError::MissingKey("Visualizar Inteiro Teor"))
    } else {
        Ok(number)
    }
}

/// `name="<cdProcesso>-<cdForo>-<nmAlias>-<cdDocumento>"` on the full-text link.
pub fn judgment_document(
    site: &Site,
    process_key: &str,
    name: &str,
) -> Result<DocumentRef, DocumentError> {
    let parts: Vec<&str> = name.split('-').map(str::trim).collect();
    let [cd_processo, cd_foro, nm_alias, cd_documento] = parts.as_slice() else {
        return Err(DocumentError::MalformedIndirection(format!(
            "expected 4 parts in {:?}",
            name
        )));
    };
    if parts.iter().any(|p| p.is_empty()) {
        return Err(DocumentError::MalformedIndirection(format!(
            "empty part in {:?}",
            name
        )));
    }

    Ok(DocumentRef {
        kind: RecordKind::FirstInstanceDocument,
        process_key: process_key.to_string(),
        document_key: cd_documento.to_string(),
        process_code: cd_processo.to_string(),
        title: String::new(),
        description: String::new(),
        indirection: Indirection::Viewer(site.cjpg_document(
            cd_processo,
            cd_foro,
            nm_alias,
            cd_documento,
        )),
    })
}

pub struct FirstInstanceListing;

impl RecordMapper for FirstInstanceListing {
    fn kind(&self) -> RecordKind {
        RecordKind::FirstInstanceListing
    }

    fn map(
        &self,
        site: &Site,
        row: ElementRef<'_>,
        _key_hint: Option<&str>,
    ) -> Result<Mapped, MapError> {
        let numero = case_number(row)?;
        let record = Record::new(self.kind())
            .with("numero_processo", numero.as_str())
            .with("classe", extract(row, &ROW, "Classe:"))
            .with("assunto", extract(row, &ROW, "Assunto:"))
            .with("magistrado", extract(row, &ROW, "Magistrado:"))
            .with("foro", extract(row, &ROW, "Foro:"))
            .with("vara", extract(row, &ROW, "Vara:"))
            .with(
                "data_disponibilizacao",
                extract(row, &ROW, "Data de Disponibilização:"),
            )
            .with("ementa", text_of(row, &SUMMARY));

        let mut mapped = Mapped::record(record);
        match attr_of(row, &FULL_TEXT_LINK, "name") {
            Some(name) => match judgment_document(site, &numero, &name) {
                Ok(doc) => mapped.documents.push(doc),
                Err(e) => warn!(process = %numero, "{}", e),
            },
            None => warn!(process = %numero, "full-text link has no document name"),
        }
        Ok(mapped)
    }
}

impl ListingMapper for FirstInstanceListing {
    fn search_url(&self, site: &Site, query: &str) -> String {
        site.cjpg_search(query)
    }

    fn page_url(&self, site: &Site, page: u32) -> String {
        site.cjpg_page(page)
    }

    fn current_page(&self, page: &Html) -> Option<u32> {
        parse_page_number(page, &CJPG_CURRENT_PAGE)
    }
}

pub struct SecondInstanceListing;

impl RecordMapper for SecondInstanceListing {
    fn kind(&self) -> RecordKind {
        RecordKind::SecondInstanceListing
    }

    fn map(
        &self,
        _site: &Site,
        row: ElementRef<'_>,
        _key_hint: Option<&str>,
    ) -> Result<Mapped, MapError> {
        let numero = case_number(row)?;
        let class_subject = extract(row, &ROW, "Classe/Assunto:");
        let (classe, assunto) = match class_subject.split_once('/') {
            Some((c, a)) => (c.trim(), a.trim()),
            None => (class_subject.trim(), ""),
        };

        let record = Record::new(self.kind())
            .with("numero_processo", numero)
            .with("classe", classe)
            .with("assunto", assunto)
            .with("relator", extract(row, &ROW, "Relator(a):"))
            .with("orgao_julgador", extract(row, &ROW, "Órgão julgador:"))
            .with("comarca", extract(row, &ROW, "Comarca:"))
            .with("data_julgamento", extract(row, &ROW, "Data do julgamento:"))
            .with("data_publicacao", extract(row, &ROW, "Data de publicação:"))
            .with("ementa", text_of(row, &SUMMARY));
        Ok(Mapped::record(record))
    }
}

impl ListingMapper for SecondInstanceListing {
    fn search_url(&self, site: &Site, query: &str) -> String {
        site.cjsg_search(query)
    }

    fn page_url(&self, site: &Site, page: u32) -> String {
        site.cjsg_page(page)
    }

    fn current_page(&self, page: &Html) -> Option<u32> {
        parse_page_number(page, &CJSG_CURRENT_PAGE)
    }
}
