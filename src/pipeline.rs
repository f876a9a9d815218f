use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::classifier::{ClassificationResult, PageClassifier};
use crate::db::{self, PendingPage, StoredPage};
use crate::extract::{extract_product, ProductRecord};
use crate::fetcher::{FetchOutcome, Fetcher};

const CHUNK_SIZE: usize = 500;

/// Scrape stats returned after completion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Fetch pages concurrently, saving each outcome to DB as it arrives.
///
/// At most `concurrency` fetches are in flight. Failed fetches are stored
/// too, so every page in `pages` ends up visited.
pub async fn scrape_pages_streaming(
    conn: &Connection,
    fetcher: Arc<dyn Fetcher>,
    pages: Vec<PendingPage>,
    concurrency: usize,
) -> Result<ScrapeStats> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = pages.len();
    let backend = fetcher.name();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Workers send outcomes, this loop owns the connection.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(i64, FetchOutcome)>(concurrency * 2);

    for page in pages {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let outcome = fetcher.fetch(&page.url).await;
            if let Some(err) = &outcome.error {
                warn!("Fetch failed for {}: {}", page.url, err);
            }
            let _ = tx.send((page.id, outcome)).await;
        });
    }

    // rx closes once every spawned task has dropped its sender
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;

    let mut insert_stmt = conn.prepare(
        "INSERT OR REPLACE INTO page_data
         (page_id, url, html, status, http_status, error, latency_ms, last_modified, backend)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut update_stmt = conn.prepare(
        "UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1",
    )?;

    while let Some((page_id, outcome)) = rx.recv().await {
        if outcome.is_ok() {
            ok += 1;
        } else {
            errors += 1;
        }

        save_one(&mut insert_stmt, &mut update_stmt, page_id, &outcome, backend)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors) via {}", total, ok, errors, backend);

    Ok(ScrapeStats { total, ok, errors })
}

fn save_one(
    insert: &mut rusqlite::Statement,
    update: &mut rusqlite::Statement,
    page_id: i64,
    outcome: &FetchOutcome,
    backend: &str,
) -> Result<()> {
    insert.execute(rusqlite::params![
        page_id,
        outcome.url,
        outcome.html,
        outcome.status.as_str(),
        outcome.http_status,
        outcome.error,
        outcome.latency_ms as i64,
        outcome.last_modified,
        backend,
    ])?;
    update.execute(rusqlite::params![page_id])?;
    Ok(())
}

/// Classification plus, for accepted pages, the extracted product.
pub struct PageAnalysis {
    pub classification: ClassificationResult,
    pub product: Option<ProductRecord>,
}

/// Classify one page and extract fields if it is a product.
pub fn analyze_page(
    classifier: &PageClassifier,
    url: &str,
    html: &str,
    last_modified: Option<&str>,
) -> PageAnalysis {
    let classification = classifier.classify(url, html);
    if classification.is_product && classification.has_reason("penalize_service") {
        debug!(url, "accepted despite service penalty");
    }
    let product = classification
        .is_product
        .then(|| extract_product(url, html, last_modified));
    PageAnalysis {
        classification,
        product,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessCounts {
    pub pages: usize,
    pub products: usize,
    pub valid: usize,
    pub rejected: usize,
}

impl ProcessCounts {
    pub fn print(&self) {
        println!(
            "Classified {} pages: {} products ({} valid), {} rejected.",
            self.pages, self.products, self.valid, self.rejected,
        );
    }
}

/// Classify stored pages in parallel chunks and persist the results by URL.
pub fn process_pages(
    conn: &Connection,
    classifier: &PageClassifier,
    pages: &[StoredPage],
) -> Result<ProcessCounts> {
    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts::default();

    for chunk in pages.chunks(CHUNK_SIZE) {
        let results: Vec<PageAnalysis> = chunk
            .par_iter()
            .map(|p| analyze_page(classifier, &p.url, &p.html, p.last_modified.as_deref()))
            .collect();

        let backends: HashMap<String, String> = chunk
            .iter()
            .map(|p| (p.url.clone(), p.backend.clone()))
            .collect();

        let mut classifications = Vec::with_capacity(results.len());
        let mut products = Vec::new();
        for analysis in results {
            classifications.push(analysis.classification);
            if let Some(product) = analysis.product {
                products.push(product);
            }
        }

        counts.pages += classifications.len();
        counts.products += products.len();
        counts.valid += products.iter().filter(|p| p.is_valid).count();
        counts.rejected += classifications.iter().filter(|c| !c.is_product).count();

        db::save_classifications(conn, &classifications)?;
        db::save_products(conn, &products, &backends)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    info!(
        "Processed {} pages: {} products, {} rejected",
        counts.pages, counts.products, counts.rejected
    );
    Ok(counts)
}

// ── Tests ──
