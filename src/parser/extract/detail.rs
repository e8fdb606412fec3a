//! Case detail pages: first instance (cpopg) and second instance (cposg).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::warn;

use super::movements::movements;
use super::{Mapped, Record, RecordKind, RecordMapper};
use crate::documents::{DocumentRef, Indirection};
use crate::error::MapError;
use crate::parser::fields::{attr_of, extract, inner_text, labeled, text_of};
use crate::parser::text::normalize;
use crate::site::Site;

static NUMERO: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#numeroProcesso").unwrap());
static TAGS: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".unj-tag").unwrap());
static SITUACAO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#situacaoProcesso").unwrap());
static CLASSE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#classeProcesso").unwrap());
static ASSUNTO: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#assuntoProcesso").unwrap());
static AREA: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#areaProcesso").unwrap());
static JUIZ: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#juizProcesso").unwrap());
static VALOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#valorAcaoProcesso").unwrap());
static FORO: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#foroProcesso").unwrap());
static VARA: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#varaProcesso").unwrap());
static DISTRIBUICAO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#dataHoraDistribuicaoProcesso").unwrap());
static CONTROLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#numeroControleProcesso").unwrap());
static SECAO: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#secaoProcesso").unwrap());
static ORGAO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#orgaoJulgadorProcesso").unwrap());
static RELATOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#relatorProcesso").unwrap());
static PARTY_TYPE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".tipoDeParticipacao").unwrap());
static PARTY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".nomeParteEAdvogado").unwrap());
static LABELED_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[class*="mb-2"]"#).unwrap());
static EXECUTION_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[class*="col-xl-13"]"#).unwrap());
static MORE_DETAILS_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"#maisDetalhes div[class*="mb-2"]"#).unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static SG_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".linkConsultaSG").unwrap());
static MODAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".modal__lista-processos").unwrap());
static MODAL_CODE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".modal__lista-processos__item__header #processoSelecionado").unwrap()
});
static ORIGIN_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/cpopg/show.do?"]"#).unwrap());
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static MOVEMENT_DOCUMENT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".descricaoMovimentacaoProcesso a.linkMovVincProc").unwrap()
});
static DETAIL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static CD_PROCESSO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="cdProcesso"]"#).unwrap());

static ATTORNEY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Advogad[oa]:\s*").unwrap());
static PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(.*?\)\s*").unwrap());

/// When a lookup matched several cases the site answers with a selection
/// modal; the first entry's internal code leads to its `show.do` page.
pub fn selected_case_code(page: &Html) -> Option<String> {
    let root = page.root_element();
    if root.select(&MODAL).next().is_none() {
        return None;
    }
    attr_of(root, &MODAL_CODE, "value")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    pub participacao: String,
    pub nomes: Vec<String>,
    pub advogados: Vec<String>,
}

/// Party blocks: first `<br>`-separated line is the party, the rest its
/// attorneys.
pub fn parties(page: ElementRef<'_>) -> Vec<Party> {
    let roles: Vec<String> = page
        .select(&PARTY_TYPE)
        .map(|el| normalize(&inner_text(el)))
        .collect();

    page.select(&PARTY)
        .enumerate()
        .map(|(i, block)| {
            let mut lines = br_lines(block).into_iter();
            let nomes = lines.next().into_iter().collect();
            let advogados = lines
                .map(|line| ATTORNEY_PREFIX.replace(&line, "").trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            Party {
                participacao: roles.get(i).cloned().unwrap_or_default(),
                nomes,
                advogados,
            }
        })
        .collect()
}

fn br_lines(block: ElementRef<'_>) -> Vec<String> {
    let mut lines = vec![String::new()];
    for child in block.children() {
        match child.value() {
            Node::Element(e) if e.name() == "br" => lines.push(String::new()),
            Node::Text(t) => {
                if let Some(line) = lines.last_mut() {
                    line.push_str(t);
                }
            }
            Node::Element(_) => {
                if let (Some(line), Some(el)) = (lines.last_mut(), ElementRef::wrap(child)) {
                    line.push(' ');
                    line.push_str(&inner_text(el));
                    line.push(' ');
                }
            }
            _ => {}
        }
    }
    lines
        .iter()
        .map(|l| normalize(l))
        .filter(|l| !l.is_empty())
        .collect()
}

/// Text and absolute href of the link inside a labeled block.
fn linked_case(site: &Site, page: ElementRef<'_>, label: &str) -> (String, String) {
    let Some(link) = labeled(page, &LABELED_BLOCK, label).and_then(|b| b.select(&LINK).next())
    else {
        return (String::new(), String::new());
    };
    let href = link
        .value()
        .attr("href")
        .map(|h| site.absolute("cpopg", h.trim()))
        .unwrap_or_default();
    (normalize(&inner_text(link)), href)
}

/// Second-instance lookup URL rebuilt from the `.linkConsultaSG` parameters;
/// empty unless all four are present.
fn consulta_sg(site: &Site, page: ElementRef<'_>) -> String {
    let Some(href) = attr_of(page, &SG_LINK, "href") else {
        return String::new();
    };
    let Ok(url) = Url::parse(&site.absolute("cpopg", &href)) else {
        warn!(%href, "unparseable second-instance link");
        return String::new();
    };
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let get = |name: &str| params.get(name).map(|v| v.trim()).unwrap_or("");

    let (nu, cd, foro, origem) = (
        get("nuProcesso"),
        get("cdProcessoSg"),
        get("cdForoSg"),
        get("isProcessoOrigemCr"),
    );
    if [nu, cd, foro, origem].iter().any(|v| v.is_empty()) {
        return String::new();
    }
    site.cpopg_consulta_sg(nu, cd, foro, origem)
}

fn case_key(page: ElementRef<'_>, key_hint: Option<&str>) -> Result<String, MapError> {
    key_hint
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .or_else(|| Some(text_of(page, &NUMERO)).filter(|n| !n.is_empty()))
        .ok_or(MapError::MissingKey("#numeroProcesso"))
}

pub struct FirstInstanceCase;

impl RecordMapper for FirstInstanceCase {
    fn kind(&self) -> RecordKind {
        RecordKind::FirstInstanceCase
    }

    fn map(
        &self,
        site: &Site,
        page: ElementRef<'_>,
        key_hint: Option<&str>,
    ) -> Result<Mapped, MapError> {
        let numero = case_key(page, key_hint)?;

        let situacao = page
            .select(&TAGS)
            .map(|el| normalize(&inner_text(el)))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("|");
        let partes = serde_json::to_string(&parties(page)).unwrap_or_default();
        let execucao = PARENTHETICAL
            .replace_all(&extract(page, &EXECUTION_BLOCK, "Execução de Sentença"), "")
            .trim()
            .to_string();
        let (principal, principal_link) = linked_case(site, page, "Processo principal");
        let (apensado, apensado_link) = linked_case(site, page, "Apensado ao");

        let record = Record::new(self.kind())
            .with("numero_processo", numero.as_str())
            .with("situacao", situacao)
            .with("classe", text_of(page, &CLASSE))
            .with("assunto", text_of(page, &ASSUNTO))
            .with("area", text_of(page, &AREA))
            .with("juiz", text_of(page, &JUIZ))
            .with("valor_acao", text_of(page, &VALOR))
            .with("foro", text_of(page, &FORO))
            .with("vara", text_of(page, &VARA))
            .with("distribuicao", text_of(page, &DISTRIBUICAO))
            .with("controle", text_of(page, &CONTROLE))
            .with("partes", partes)
            .with("outros_assuntos", extract(page, &LABELED_BLOCK, "Outros assuntos"))
            .with("execucao_sentenca", execucao)
            .with("processo_principal", principal)
            .with("link_processo_principal", principal_link)
            .with("processo_apensado", apensado)
            .with("link_processo_apensado", apensado_link)
            .with("link_consulta_sg", consulta_sg(site, page));

        let mut mapped = Mapped::record(record);
        mapped.children = movements(page, &numero);
        Ok(mapped)
    }
}

pub struct SecondInstanceCase;

impl SecondInstanceCase {
    /// Row of the first-instance table the appeal came from.
    fn origin(&self, page: ElementRef<'_>, numero: &str) -> Option<Record> {
        let link = page.select(&ORIGIN_LINK).next()?;
        let row = link
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "tr")?;
        let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
        let cell = |i: usize| {
            cells
                .get(i)
                .map(|c| normalize(&inner_text(*c)))
                .unwrap_or_default()
        };

        static KIND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((.*?)\)").unwrap());
        let first = cells.first().map(|c| inner_text(*c)).unwrap_or_default();
        let tipo = KIND
            .captures(&first)
            .map(|c| normalize(&c[1]))
            .unwrap_or_default();

        Some(
            Record::new(RecordKind::OriginCase)
                .with("numero_processo", numero)
                .with("numero_origem", normalize(&inner_text(link)))
                .with("tipo", tipo)
                .with("foro", cell(1))
                .with("vara", cell(2))
                .with("juiz", cell(3))
                .with("obs", cell(4)),
        )
    }

    /// Documents linked from the movement list, reached through
    /// `verificarAcessoMovimentacao.do`.
    fn documents(&self, site: &Site, page: ElementRef<'_>, numero: &str) -> Vec<DocumentRef> {
        let cd_processo = attr_of(page, &CD_PROCESSO, "value").unwrap_or_default();
        page.select(&MOVEMENT_DOCUMENT)
            .filter_map(|link| {
                let attrs = link.value();
                let (Some(cd_documento), Some(origem)) = (
                    attrs.attr("cddocumento").map(str::trim).filter(|v| !v.is_empty()),
                    attrs.attr("name").map(str::trim).filter(|v| !v.is_empty()),
                ) else {
                    warn!(process = %numero, "movement document link without cdDocumento/name");
                    return None;
                };
                let description = link
                    .parent()
                    .and_then(ElementRef::wrap)
                    .map(|cell| text_of(cell, &DETAIL))
                    .unwrap_or_default();
                Some(DocumentRef {
                    kind: RecordKind::SecondInstanceDocument,
                    process_key: numero.to_string(),
                    document_key: cd_documento.to_string(),
                    process_code: cd_processo.clone(),
                    title: normalize(&inner_text(link)),
                    description,
                    indirection: Indirection::BodyRedirect(site.cposg_movement_access(
                        cd_documento,
                        origem,
                        &cd_processo,
                    )),
                })
            })
            .collect()
    }
}

impl RecordMapper for SecondInstanceCase {
    fn kind(&self) -> RecordKind {
        RecordKind::SecondInstanceCase
    }

    fn map(
        &self,
        site: &Site,
        page: ElementRef<'_>,
        key_hint: Option<&str>,
    ) -> Result<Mapped, MapError> {
        let numero = case_key(page, key_hint)?;
        let record = Record::new(self.kind())
            .with("numero_processo", numero.as_str())
            .with("situacao", text_of(page, &SITUACAO))
            .with("classe", text_of(page, &CLASSE))
            .with("assunto", text_of(page, &ASSUNTO))
            .with("secao", text_of(page, &SECAO))
            .with("orgao_julgador", text_of(page, &ORGAO))
            .with("area", text_of(page, &AREA))
            .with("relator", text_of(page, &RELATOR))
            .with("valor_acao", text_of(page, &VALOR))
            .with("comarca", extract(page, &MORE_DETAILS_BLOCK, "Origem"));

        let mut mapped = Mapped::record(record);
        mapped.children.extend(self.origin(page, &numero));
        mapped.documents = self.documents(site, page, &numero);
        Ok(mapped)
    }
}
