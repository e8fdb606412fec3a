mod chain;
mod config;
mod db;
mod documents;
mod error;
mod fetch;
mod parser;
mod session;
mod site;
mod traversal;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::chain::{CasePipeline, CaseRunner};
use crate::config::Settings;
use crate::db::Store;
use crate::documents::{DocumentPipeline, PdfTextExtractor};
use crate::fetch::HttpFetcher;
use crate::parser::extract::listing::{FirstInstanceListing, ListingMapper, SecondInstanceListing};
use crate::parser::extract::RecordKind;
use crate::session::TraversalContext;
use crate::site::Site;
use crate::traversal::{Traversal, TraversalStats};

#[derive(Parser)]
#[command(name = "esaj_scraper", about = "Resumable e-SAJ (TJSP) judicial records scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First-instance judgment search, every result page
    Cjpg {
        /// Free-text query
        #[arg(short, long)]
        search: Option<String>,
        /// Jump straight to this result page
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Second-instance judgment search, every result page
    Cjsg {
        #[arg(short, long)]
        search: Option<String>,
    },
    /// First-instance case details for every cjpg key (or one case)
    Cpopg {
        /// Look up a single case number; the resume cursor is left alone
        #[arg(short, long)]
        process: Option<String>,
        /// Replace stored rows instead of filling empty fields
        #[arg(long)]
        overwrite: bool,
    },
    /// Second-instance case details for every cjsg key (or one case)
    Cposg {
        #[arg(short, long)]
        process: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Row counts per table
    Stats,
    /// Write one table as CSV
    Export {
        /// Table name (cjpg, cjsg, cpopg, cposg, cpopg_movimentacoes, ...)
        #[arg(short, long)]
        table: String,
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = Settings::load()?;
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("Failed to create {}", settings.data_dir.display()))?;
    let store = Store::open(&settings.db_path())
        .with_context(|| format!("Failed to open {}", settings.db_path().display()))?;
    let site = Site::new(&settings.base_url);

    let result = match cli.command {
        Commands::Cjpg { search, page } => {
            let fetcher = HttpFetcher::new(&settings)?;
            let extractor = PdfTextExtractor;
            let documents =
                DocumentPipeline::new(&fetcher, &store, &site, &extractor, settings.pdf_root());
            let traversal = Traversal::new(&fetcher, &store, &site, &FirstInstanceListing)
                .with_documents(&documents)
                .max_pages(settings.max_pages());
            let mut ctx = TraversalContext::new(search.unwrap_or_default(), page);
            run_listing(&traversal, &mut ctx).await
        }
        Commands::Cjsg { search } => {
            let fetcher = HttpFetcher::new(&settings)?;
            let traversal = Traversal::new(&fetcher, &store, &site, &SecondInstanceListing)
                .max_pages(settings.max_pages());
            let mut ctx = TraversalContext::new(search.unwrap_or_default(), None);
            run_listing(&traversal, &mut ctx).await
        }
        Commands::Cpopg { process, overwrite } => {
            let fetcher = HttpFetcher::new(&settings)?;
            let runner = CaseRunner::new(&fetcher, &store, &site).overwrite(overwrite);
            run_cases(&runner, CasePipeline::FirstInstance, process).await
        }
        Commands::Cposg { process, overwrite } => {
            let fetcher = HttpFetcher::new(&settings)?;
            let extractor = PdfTextExtractor;
            let documents =
                DocumentPipeline::new(&fetcher, &store, &site, &extractor, settings.pdf_root());
            let runner = CaseRunner::new(&fetcher, &store, &site)
                .with_documents(&documents)
                .overwrite(overwrite);
            run_cases(&runner, CasePipeline::SecondInstance, process).await
        }
        Commands::Stats => {
            for (kind, count) in store.stats()? {
                println!("{:<22} {}", kind.table(), count);
            }
            Ok(())
        }
        Commands::Export { table, out } => {
            let Some(kind) = RecordKind::from_table(&table) else {
                let known: Vec<_> = RecordKind::ALL.iter().map(|k| k.table()).collect();
                bail!("Unknown table '{}' (expected one of: {})", table, known.join(", "));
            };
            let rows = store
                .export_csv(kind, &out)
                .with_context(|| format!("Failed to export {} to {}", table, out.display()))?;
            println!("Exported {} rows from {} to {}", rows, table, out.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_listing<M: ListingMapper>(
    traversal: &Traversal<'_, M>,
    ctx: &mut TraversalContext,
) -> anyhow::Result<()> {
    let stats: TraversalStats = traversal
        .run(ctx)
        .await
        .context("Listing traversal aborted")?;
    println!(
        "Done: {} pages, {} records ({} new, {} already stored, {} skipped), {} documents.",
        stats.pages, stats.records, stats.inserted, stats.existing, stats.skipped, stats.documents
    );
    Ok(())
}

async fn run_cases(
    runner: &CaseRunner<'_>,
    pipeline: CasePipeline,
    process: Option<String>,
) -> anyhow::Result<()> {
    if let Some(key) = process {
        let (outcome, documents) = runner
            .run_case(pipeline, key.trim())
            .await
            .with_context(|| format!("Failed to fetch case {}", key))?;
        println!("{}: {:?}, {} documents.", key, outcome, documents);
        return Ok(());
    }

    let stats = runner.run_chain(pipeline).await?;
    println!(
        "Done: {} processed, {} skipped, {} failed, {} documents.",
        stats.processed, stats.skipped, stats.failed, stats.documents
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
