use thiserror::Error;

/// Failure of the fetch engine after its own retries are exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("no scripted response for {0}")]
    Unscripted(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("table {table} has no column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("record for {table} has {got} values, expected {expected}")]
    Arity {
        table: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("csv export: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed document indirection: {0}")]
    MalformedIndirection(String),
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error("writing artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A record could not be built because its key is missing from the markup.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("record key not found ({0})")]
    MissingKey(&'static str),
}
