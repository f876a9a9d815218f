mod classifier;
mod db;
mod extract;
mod fetcher;
mod pipeline;
mod settings;
mod sitemap;
mod url_filter;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rusqlite::Connection;

use classifier::{PageClassifier, RuleCatalog};
use extract::price::clean_price;
use settings::Settings;

#[derive(Parser)]
#[command(name = "darwin_scraper", about = "darwin.md product page scraper and classifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the sitemap and populate the URL queue
    Init {
        /// Local urlset or newline-separated URL list instead of the remote sitemap
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Fetch unvisited pages with the configured backend
    Scrape {
        /// Max pages to fetch (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Classify fetched pages and extract product fields
    Process {
        /// Max pages to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape + process in one go
    Run {
        /// Max pages to scrape+process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Classify a single URL and print the result as JSON
    Classify {
        url: String,
        /// Read HTML from this file instead of fetching the URL
        #[arg(long, conflicts_with = "stored")]
        html: Option<PathBuf>,
        /// Print the classification saved by 'process' instead of re-running it
        #[arg(long)]
        stored: bool,
    },
    /// Show scraping statistics
    Stats,
    /// Extracted products table
    Products {
        /// Filter by category (e.g. "Smartphone-uri")
        #[arg(short, long)]
        category: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Include products that failed validation
        #[arg(long)]
        all: bool,
    },
    /// Product counts and MDL price ranges per category
    Categories,
    /// How often each classification reason fired
    Reasons,
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

    let result = match cli.command {
        Commands::Init { file } => {
            let conn = open_db(&settings)?;
            let urls = match file {
                Some(path) => sitemap::read_product_urls(&path, &settings.site_prefix)?,
                None => {
                    let client = reqwest::Client::builder()
                        .user_agent(settings.user_agent.clone())
                        .build()?;
                    sitemap::fetch_product_urls(&client, &settings.sitemap_url, &settings.site_prefix)
                        .await?
                }
            };
            let inserted = db::insert_pages(&conn, &urls)?;
            println!("Inserted {} new product URLs ({} total found)", inserted, urls.len());
            Ok(())
        }
        Commands::Scrape { limit } => {
            let conn = open_db(&settings)?;
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first or all pages are scraped.");
                return Ok(());
            }
            let fetcher = fetcher::build_fetcher(&settings)?;
            println!("Scraping {} pages via {} (streaming to DB)...", pages.len(), fetcher.name());
            let stats =
                pipeline::scrape_pages_streaming(&conn, fetcher, pages, settings.concurrency).await?;
            println!(
                "Done: {} scraped ({} ok, {} errors).",
                stats.total, stats.ok, stats.errors
            );
            Ok(())
        }
        Commands::Process { limit } => {
            let conn = open_db(&settings)?;
            let pages = db::fetch_unprocessed(&conn, limit)?;
            if pages.is_empty() {
                println!("No unprocessed pages. Run 'scrape' first.");
                return Ok(());
            }
            let classifier = build_classifier()?;
            println!("Processing {} pages...", pages.len());
            let counts = pipeline::process_pages(&conn, &classifier, &pages)?;
            counts.print();
            Ok(())
        }
        Commands::Run { limit } => {
            let conn = open_db(&settings)?;
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first.");
                return Ok(());
            }
            let classifier = build_classifier()?;
            let fetcher = fetcher::build_fetcher(&settings)?;

            let t_scrape = Instant::now();
            println!("Pipeline: scraping {} pages via {}...", pages.len(), fetcher.name());
            let stats =
                pipeline::scrape_pages_streaming(&conn, fetcher, pages, settings.concurrency).await?;
            println!(
                "Scraped {} pages ({} ok, {} errors) in {:.1}s",
                stats.total, stats.ok, stats.errors, t_scrape.elapsed().as_secs_f64()
            );

            let t_process = Instant::now();
            let unprocessed = db::fetch_unprocessed(&conn, None)?;
            if unprocessed.is_empty() {
                println!("Nothing to process (all fetched pages had errors).");
                return Ok(());
            }
            println!("Processing {} pages...", unprocessed.len());
            let counts = pipeline::process_pages(&conn, &classifier, &unprocessed)?;
            println!("Processed in {:.1}s", t_process.elapsed().as_secs_f64());
            counts.print();
            Ok(())
        }
        Commands::Classify { url, stored: true, .. } => {
            let conn = open_db(&settings)?;
            match db::fetch_classification(&conn, &url)? {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => println!("No stored classification for {}", url),
            }
            Ok(())
        }
        Commands::Classify { url, html, .. } => {
            let classifier = build_classifier()?;
            let result = match html {
                Some(path) => {
                    let body = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    classifier.classify(&url, &body)
                }
                None => {
                    let fetcher = fetcher::build_fetcher(&settings)?;
                    let outcome = fetcher.fetch(&url).await;
                    if let Some(err) = &outcome.error {
                        eprintln!("Fetch {}: {}", outcome.status.as_str(), err);
                    }
                    classifier.classify_document(&url, outcome.html.as_deref())
                }
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Products { category, limit, all } => {
            let conn = open_db(&settings)?;
            let rows = db::fetch_products(&conn, category.as_deref(), all, Some(limit))?;
            if rows.is_empty() {
                println!("No products found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<40} | {:>12} | {:<20} | {:<12} | {:<5} | {}",
                "#", "Product", "Price", "Category", "Stock", "Valid", "URL"
            );
            println!("{}", "-".repeat(120));

            for (i, r) in rows.iter().enumerate() {
                let name = truncate(r.name.as_deref().unwrap_or("-"), 40);
                let stock = if r.in_stock { "în stoc".to_string() } else { truncate(&r.availability, 12) };
                println!(
                    "{:>3} | {:<40} | {:>12} | {:<20} | {:<12} | {:<5} | {}",
                    i + 1,
                    name,
                    price_label(r.price, r.currency.as_deref()),
                    truncate(&r.category, 20),
                    stock,
                    if r.is_valid { "yes" } else { "no" },
                    r.url
                );
            }

            println!("\n{} products", rows.len());
            Ok(())
        }
        Commands::Categories => {
            let conn = open_db(&settings)?;
            let report = db::category_stats(&conn)?;
            if report.total == 0 {
                println!("No products yet. Run 'process' first.");
                return Ok(());
            }
            println!(
                "{:<24} | {:>6} | {:>10} | {:>10} | {:>10}",
                "Category", "Count", "Avg MDL", "Min MDL", "Max MDL"
            );
            println!("{}", "-".repeat(70));
            for c in &report.categories {
                println!(
                    "{:<24} | {:>6} | {:>10.0} | {:>10.0} | {:>10.0}",
                    truncate(&c.category, 24),
                    c.count,
                    c.avg_price,
                    c.min_price,
                    c.max_price
                );
            }
            println!();
            println!("Products:     {} ({} valid, {} invalid)", report.total, report.valid, report.invalid());
            println!("Categories:   {}", report.categories.len());
            println!("Quality:      {:.1}%", report.quality_score());
            println!("Most popular: {}", report.most_popular().unwrap_or("N/A"));
            Ok(())
        }
        Commands::Reasons => {
            let conn = open_db(&settings)?;
            let histogram = db::reason_histogram(&conn)?;
            if histogram.is_empty() {
                println!("No classifications yet. Run 'process' first.");
                return Ok(());
            }
            println!("{:<24} | {:>8} | {:>8}", "Reason", "Pages", "Accepted");
            println!("{}", "-".repeat(46));
            for (reason, total, accepted) in &histogram {
                println!("{:<24} | {:>8} | {:>8}", truncate(reason, 24), total, accepted);
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = open_db(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Pages:      {}", s.pages);
            println!("Visited:    {}", s.visited);
            println!("Unvisited:  {}", s.pages - s.visited);
            println!("Fetched:    {}", s.fetched_ok);
            println!("Errors:     {}", s.fetch_errors);
            println!("Classified: {}", s.classified);
            println!("Products:   {}", s.products);
            println!("Valid:      {}", s.valid_products);

            let statuses = db::fetch_status_counts(&conn)?;
            if !statuses.is_empty() {
                println!("\n--- Fetch status ---");
                for (status, n) in &statuses {
                    println!("  {:<14} {}", status, n);
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_db(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn build_classifier() -> anyhow::Result<PageClassifier> {
    let catalog = RuleCatalog::new().context("Failed to compile classifier rules")?;
    Ok(PageClassifier::new(catalog))
}

fn price_label(amount: Option<f64>, currency: Option<&str>) -> String {
    let raw = match (amount, currency) {
        (Some(a), Some(c)) => format!("{:.2} {}", a, c),
        _ => String::new(),
    };
    clean_price(&raw)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
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

// ── Tests ──
