pub mod detail;
pub mod listing;
pub mod movements;

use scraper::ElementRef;

use crate::documents::DocumentRef;
use crate::error::MapError;
use crate::site::Site;

/// Every table the pipeline writes. Each kind carries its columns, the
/// leading columns that form its merge key, and the field that marks a row
/// as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    FirstInstanceListing,
    SecondInstanceListing,
    FirstInstanceCase,
    SecondInstanceCase,
    Movement,
    OriginCase,
    FirstInstanceDocument,
    SecondInstanceDocument,
}

const DOCUMENT_COLUMNS: &[&str] = &[
    "numero_processo",
    "cd_documento",
    "cd_processo",
    "arquivo",
    "titulo",
    "descricao",
    "conteudo",
];

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        RecordKind::FirstInstanceListing,
        RecordKind::SecondInstanceListing,
        RecordKind::FirstInstanceCase,
        RecordKind::SecondInstanceCase,
        RecordKind::Movement,
        RecordKind::OriginCase,
        RecordKind::FirstInstanceDocument,
        RecordKind::SecondInstanceDocument,
    ];

    pub fn table(self) -> &'static str {
        match self {
            RecordKind::FirstInstanceListing => "cjpg",
            RecordKind::SecondInstanceListing => "cjsg",
            RecordKind::FirstInstanceCase => "cpopg",
            RecordKind::SecondInstanceCase => "cposg",
            RecordKind::Movement => "cpopg_movimentacoes",
            RecordKind::OriginCase => "cposg_origem",
            RecordKind::FirstInstanceDocument => "cjpg_documentos",
            RecordKind::SecondInstanceDocument => "cposg_documentos",
        }
    }

    pub fn from_table(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.table() == name)
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            RecordKind::FirstInstanceListing => &[
                "numero_processo",
                "classe",
                "assunto",
                "magistrado",
                "foro",
                "vara",
                "data_disponibilizacao",
                "ementa",
            ],
            RecordKind::SecondInstanceListing => &[
                "numero_processo",
                "classe",
                "assunto",
                "relator",
                "orgao_julgador",
                "comarca",
                "data_julgamento",
                "data_publicacao",
                "ementa",
            ],
            RecordKind::FirstInstanceCase => &[
                "numero_processo",
                "situacao",
                "classe",
                "assunto",
                "area",
                "juiz",
                "valor_acao",
                "foro",
                "vara",
                "distribuicao",
                "controle",
                "partes",
                "outros_assuntos",
                "execucao_sentenca",
                "processo_principal",
                "link_processo_principal",
                "processo_apensado",
                "link_processo_apensado",
                "link_consulta_sg",
            ],
            RecordKind::SecondInstanceCase => &[
                "numero_processo",
                "situacao",
                "classe",
                "assunto",
                "secao",
                "orgao_julgador",
                "area",
                "relator",
                "valor_acao",
                "comarca",
            ],
            RecordKind::Movement => &["numero_processo", "seq", "data", "titulo", "descricao"],
            RecordKind::OriginCase => &[
                "numero_processo",
                "numero_origem",
                "tipo",
                "foro",
                "vara",
                "juiz",
                "obs",
            ],
            RecordKind::FirstInstanceDocument | RecordKind::SecondInstanceDocument => {
                DOCUMENT_COLUMNS
            }
        }
    }

    /// Number of leading columns forming the merge key.
    pub fn key_len(self) -> usize {
        match self {
            RecordKind::Movement
            | RecordKind::FirstInstanceDocument
            | RecordKind::SecondInstanceDocument => 2,
            _ => 1,
        }
    }

    pub fn key_columns(self) -> &'static [&'static str] {
        &self.columns()[..self.key_len()]
    }

    /// Field whose presence means the row needs no further work.
    pub fn required_field(self) -> &'static str {
        match self {
            RecordKind::FirstInstanceListing | RecordKind::SecondInstanceListing => "ementa",
            RecordKind::FirstInstanceCase | RecordKind::SecondInstanceCase => "classe",
            RecordKind::Movement => "titulo",
            RecordKind::OriginCase => "numero_origem",
            RecordKind::FirstInstanceDocument | RecordKind::SecondInstanceDocument => "conteudo",
        }
    }

    /// Site family segment ("cjpg", "cpopg", ...) for the page-level kinds.
    pub fn family(self) -> &'static str {
        match self {
            RecordKind::FirstInstanceListing | RecordKind::FirstInstanceDocument => "cjpg",
            RecordKind::SecondInstanceListing => "cjsg",
            RecordKind::FirstInstanceCase | RecordKind::Movement => "cpopg",
            RecordKind::SecondInstanceCase
            | RecordKind::OriginCase
            | RecordKind::SecondInstanceDocument => "cposg",
        }
    }
}

/// One row for one table, values aligned with `kind.columns()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    values: Vec<String>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Record {
            kind,
            values: vec![String::new(); kind.columns().len()],
        }
    }

    /// Build from stored values; `None` when the arity does not match the kind.
    pub fn from_values(kind: RecordKind, values: Vec<String>) -> Option<Self> {
        (values.len() == kind.columns().len()).then_some(Record { kind, values })
    }

    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        match self.index(column) {
            Some(i) => self.values[i] = value.into(),
            None => debug_assert!(false, "{} has no column {}", self.kind.table(), column),
        }
    }

    pub fn get(&self, column: &str) -> &str {
        self.index(column)
            .map(|i| self.values[i].as_str())
            .unwrap_or("")
    }

    pub fn key(&self) -> &[String] {
        &self.values[..self.kind.key_len()]
    }

    /// Key rendered for logs.
    pub fn key_label(&self) -> String {
        self.key().join("/")
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    fn index(&self, column: &str) -> Option<usize> {
        self.kind.columns().iter().position(|c| *c == column)
    }
}

/// What one mapped unit (a listing row or a case page) produced.
#[derive(Debug, Clone)]
pub struct Mapped {
    pub record: Record,
    /// Dependent rows: movements, origin case.
    pub children: Vec<Record>,
    pub documents: Vec<DocumentRef>,
}

impl Mapped {
    pub fn record(record: Record) -> Self {
        Mapped {
            record,
            children: Vec::new(),
            documents: Vec::new(),
        }
    }
}

/// Turns one markup fragment into records for one kind.
pub trait RecordMapper: Send + Sync {
    fn kind(&self) -> RecordKind;

    /// `key_hint` is the key the fragment was requested for, when known.
    fn map(
        &self,
        site: &Site,
        fragment: ElementRef<'_>,
        key_hint: Option<&str>,
    ) -> Result<Mapped, MapError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_table_names() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_table(kind.table()), Some(kind));
            assert!(kind.columns().contains(&kind.required_field()));
            assert_eq!(kind.key_columns()[0], "numero_processo");
        }
        assert_eq!(RecordKind::from_table("nope"), None);
    }

    #[test]
    fn record_accessors() {
        let r = Record::new(RecordKind::FirstInstanceDocument)
            .with("numero_processo", "P1")
            .with("cd_documento", "D1")
            .with("conteudo", "texto");
        assert_eq!(r.key(), &["P1".to_string(), "D1".to_string()][..]);
        assert_eq!(r.key_label(), "P1/D1");
        assert_eq!(r.get("conteudo"), "texto");
        assert_eq!(r.get("arquivo"), "");
        assert_eq!(r.get("missing"), "");
    }

    #[test]
    fn from_values_checks_arity() {
        assert!(Record::from_values(RecordKind::Movement, vec!["a".into(); 5]).is_some());
        assert!(Record::from_values(RecordKind::Movement, vec!["a".into(); 4]).is_none());
    }
}
