use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::classifier::ClassificationResult;
use crate::extract::ProductRecord;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id         INTEGER PRIMARY KEY,
            url        TEXT UNIQUE NOT NULL,
            visited    BOOLEAN NOT NULL DEFAULT 0,
            visited_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

        CREATE TABLE IF NOT EXISTS page_data (
            id            INTEGER PRIMARY KEY,
            page_id       INTEGER NOT NULL REFERENCES pages(id),
            url           TEXT UNIQUE NOT NULL,
            html          TEXT,
            status        TEXT NOT NULL CHECK(status IN ('ok','http_error','network_error','timeout')),
            http_status   INTEGER,
            error         TEXT,
            latency_ms    INTEGER,
            last_modified TEXT,
            backend       TEXT NOT NULL,
            scraped_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_page_data_status ON page_data(status);

        CREATE TABLE IF NOT EXISTS classifications (
            url           TEXT PRIMARY KEY,
            is_product    BOOLEAN NOT NULL,
            score         REAL NOT NULL,
            reasons       TEXT NOT NULL,
            specs         TEXT NOT NULL,
            spec_count    INTEGER NOT NULL,
            classified_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_class_product ON classifications(is_product);

        CREATE TABLE IF NOT EXISTS products (
            url           TEXT PRIMARY KEY,
            name          TEXT,
            description   TEXT,
            price         REAL,
            currency      TEXT,
            category      TEXT NOT NULL,
            image_url     TEXT,
            availability  TEXT NOT NULL,
            in_stock      BOOLEAN NOT NULL,
            last_updated  TEXT,
            is_valid      BOOLEAN NOT NULL,
            backend       TEXT,
            extracted_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
        ",
    )?;
    Ok(())
}

// ── Queue ──

pub fn insert_pages(conn: &Connection, urls: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO pages (url) VALUES (?1)")?;
        for url in urls {
            count += stmt.execute([url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub struct PendingPage {
    pub id: i64,
    pub url: String,
}

pub fn fetch_unvisited(conn: &Connection, limit: Option<usize>) -> Result<Vec<PendingPage>> {
    let sql = format!(
        "SELECT id, url FROM pages WHERE visited = 0 ORDER BY id{}",
        limit_clause(limit)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PendingPage {
                id: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Processing ──

/// A fetched page waiting for classification.
pub struct StoredPage {
    pub url: String,
    pub html: String,
    pub last_modified: Option<String>,
    pub backend: String,
}

pub fn fetch_unprocessed(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredPage>> {
    let sql = format!(
        "SELECT pd.url, pd.html, pd.last_modified, pd.backend
         FROM page_data pd
         LEFT JOIN classifications c ON c.url = pd.url
         WHERE pd.status = 'ok' AND pd.html IS NOT NULL AND c.url IS NULL
         ORDER BY pd.id{}",
        limit_clause(limit)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredPage {
                url: row.get(0)?,
                html: row.get(1)?,
                last_modified: row.get(2)?,
                backend: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_classifications(conn: &Connection, results: &[ClassificationResult]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO classifications
             (url, is_product, score, reasons, specs, spec_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for r in results {
            stmt.execute(rusqlite::params![
                r.url,
                r.is_product,
                r.score,
                serde_json::to_string(&r.reasons)?,
                serde_json::to_string(&r.spec_features_found)?,
                r.spec_count as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// `backends` maps product URL to the fetcher that produced its HTML.
pub fn save_products(
    conn: &Connection,
    products: &[ProductRecord],
    backends: &HashMap<String, String>,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO products
             (url, name, description, price, currency, category, image_url,
              availability, in_stock, last_updated, is_valid, backend)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for p in products {
            stmt.execute(rusqlite::params![
                p.url,
                p.name,
                p.description,
                p.price.map(|x| x.amount),
                p.price.map(|x| x.currency.code()),
                p.category,
                p.image_url,
                p.availability.label(),
                p.in_stock,
                p.last_updated,
                p.is_valid,
                backends.get(&p.url),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn fetch_classification(conn: &Connection, url: &str) -> Result<Option<ClassificationResult>> {
    let row = conn
        .query_row(
            "SELECT url, is_product, score, reasons, specs, spec_count
             FROM classifications WHERE url = ?1",
            [url],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((url, is_product, score, reasons, specs, spec_count)) = row else {
        return Ok(None);
    };
    Ok(Some(ClassificationResult {
        url,
        is_product,
        score,
        reasons: serde_json::from_str(&reasons).context("Corrupt reasons column")?,
        spec_features_found: serde_json::from_str(&specs).context("Corrupt specs column")?,
        spec_count: spec_count as usize,
    }))
}

// ── Reporting ──

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub pages: i64,
    pub visited: i64,
    pub fetched_ok: i64,
    pub fetch_errors: i64,
    pub classified: i64,
    pub products: i64,
    pub valid_products: i64,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        pages: count("SELECT COUNT(*) FROM pages")?,
        visited: count("SELECT COUNT(*) FROM pages WHERE visited = 1")?,
        fetched_ok: count("SELECT COUNT(*) FROM page_data WHERE status = 'ok'")?,
        fetch_errors: count("SELECT COUNT(*) FROM page_data WHERE status != 'ok'")?,
        classified: count("SELECT COUNT(*) FROM classifications")?,
        products: count("SELECT COUNT(*) FROM classifications WHERE is_product = 1")?,
        valid_products: count("SELECT COUNT(*) FROM products WHERE is_valid = 1")?,
    })
}

/// Fetch outcomes grouped by status, most frequent first.
pub fn fetch_status_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) AS n FROM page_data GROUP BY status ORDER BY n DESC, status",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct ProductRow {
    pub url: String,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub category: String,
    pub availability: String,
    pub in_stock: bool,
    pub is_valid: bool,
}

pub fn fetch_products(
    conn: &Connection,
    category: Option<&str>,
    include_invalid: bool,
    limit: Option<usize>,
) -> Result<Vec<ProductRow>> {
    let sql = format!(
        "SELECT url, name, price, currency, category, availability, in_stock, is_valid
         FROM products
         WHERE (?1 IS NULL OR category = ?1) AND (?2 OR is_valid = 1)
         ORDER BY category, name{}",
        limit_clause(limit)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![category, include_invalid], |row| {
            Ok(ProductRow {
                url: row.get(0)?,
                name: row.get(1)?,
                price: row.get(2)?,
                currency: row.get(3)?,
                category: row.get(4)?,
                availability: row.get(5)?,
                in_stock: row.get(6)?,
                is_valid: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Valid products in one category. Price aggregates cover MDL prices only.
#[derive(Debug, PartialEq)]
pub struct CategoryStats {
    pub category: String,
    pub count: i64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, Default, PartialEq)]
pub struct CategoryReport {
    pub total: i64,
    pub valid: i64,
    /// Largest category first.
    pub categories: Vec<CategoryStats>,
}

impl CategoryReport {
    pub fn invalid(&self) -> i64 {
        self.total - self.valid
    }

    /// Share of extracted products that passed validation, in percent.
    pub fn quality_score(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64 * 100.0
        }
    }

    pub fn most_popular(&self) -> Option<&str> {
        self.categories.first().map(|c| c.category.as_str())
    }
}

pub fn category_stats(conn: &Connection) -> Result<CategoryReport> {
    let (total, valid): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_valid), 0) FROM products",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) AS n,
                COALESCE(AVG(CASE WHEN currency = 'MDL' THEN price END), 0),
                COALESCE(MIN(CASE WHEN currency = 'MDL' THEN price END), 0),
                COALESCE(MAX(CASE WHEN currency = 'MDL' THEN price END), 0)
         FROM products
         WHERE is_valid = 1
         GROUP BY category
         ORDER BY n DESC, category",
    )?;
    let categories = stmt
        .query_map([], |row| {
            Ok(CategoryStats {
                category: row.get(0)?,
                count: row.get(1)?,
                avg_price: row.get(2)?,
                min_price: row.get(3)?,
                max_price: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CategoryReport {
        total,
        valid,
        categories,
    })
}

/// How many stored pages each reason fired on, and how many of those pages
/// were accepted. A reason repeated within one page counts once. Most
/// frequent first.
pub fn reason_histogram(conn: &Connection) -> Result<Vec<(String, usize, usize)>> {
    let mut stmt = conn.prepare("SELECT reasons, is_product FROM classifications")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (json, is_product) in rows {
        let reasons: BTreeSet<String> =
            serde_json::from_str(&json).context("Corrupt reasons column")?;
        for reason in reasons {
            let entry = counts.entry(reason).or_default();
            entry.0 += 1;
            if is_product {
                entry.1 += 1;
            }
        }
    }

    let mut histogram: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(reason, (total, accepted))| (reason, total, accepted))
        .collect();
    histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(histogram)
}

fn limit_clause(limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::normalize::Availability;
    use crate::extract::price::{Currency, Price};

    fn open() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("nested/test.sqlite")).unwrap();
        init_schema(&conn).unwrap();
        (dir, conn)
    }

    fn classification(url: &str, is_product: bool, reasons: &[&str]) -> ClassificationResult {
        ClassificationResult {
            url: url.to_string(),
            is_product,
            score: if is_product { 1.0 } else { 0.2 },
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
            spec_features_found: BTreeSet::from(["brand".to_string(), "price".to_string()]),
            spec_count: 2,
        }
    }

    fn store_page(conn: &Connection, url: &str, status: &str, html: Option<&str>) {
        insert_pages(conn, &[url.to_string()]).unwrap();
        conn.execute(
            "INSERT INTO page_data (page_id, url, html, status, backend)
             SELECT id, url, ?2, ?3, 'file' FROM pages WHERE url = ?1",
            rusqlite::params![url, html, status],
        )
        .unwrap();
        conn.execute("UPDATE pages SET visited = 1 WHERE url = ?1", [url])
            .unwrap();
    }

    #[test]
    fn queue_ignores_duplicates() {
        let (_dir, conn) = open();
        let urls = vec!["https://darwin.md/p/1".to_string(), "https://darwin.md/p/2".to_string()];
        assert_eq!(insert_pages(&conn, &urls).unwrap(), 2);
        assert_eq!(insert_pages(&conn, &urls).unwrap(), 0);
        assert_eq!(fetch_unvisited(&conn, None).unwrap().len(), 2);
        assert_eq!(fetch_unvisited(&conn, Some(1)).unwrap()[0].url, "https://darwin.md/p/1");
    }

    #[test]
    fn unprocessed_pages_exclude_failures_and_classified() {
        let (_dir, conn) = open();
        store_page(&conn, "https://darwin.md/p/1", "ok", Some("<h1>A</h1>"));
        store_page(&conn, "https://darwin.md/p/2", "http_error", None);
        store_page(&conn, "https://darwin.md/p/3", "ok", Some("<h1>C</h1>"));
        save_classifications(&conn, &[classification("https://darwin.md/p/3", false, &[])]).unwrap();

        let pending = fetch_unprocessed(&conn, None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "https://darwin.md/p/1");
        assert_eq!(pending[0].backend, "file");
        assert!(fetch_unvisited(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn classification_round_trips_by_url() {
        let (_dir, conn) = open();
        let r = classification("https://darwin.md/p/9", true, &["jsonld_product", "rule_jsonld"]);
        save_classifications(&conn, &[r.clone()]).unwrap();
        save_classifications(&conn, &[r.clone()]).unwrap();
        assert_eq!(fetch_classification(&conn, &r.url).unwrap(), Some(r));
        assert_eq!(fetch_classification(&conn, "https://darwin.md/none").unwrap(), None);
    }

    #[test]
    fn products_filter_by_category_and_validity() {
        let (_dir, conn) = open();
        let product = |url: &str, category: &str, valid: bool| ProductRecord {
            url: url.to_string(),
            name: Some(format!("Produs {}", url.len())),
            description: None,
            price: valid.then(|| Price::new(999.0, Currency::Mdl)),
            category: category.to_string(),
            image_url: None,
            availability: Availability::InStock,
            in_stock: true,
            last_updated: None,
            is_valid: valid,
        };
        let items = vec![
            product("https://darwin.md/p/1", "Telefoane", true),
            product("https://darwin.md/p/2", "Telefoane", false),
            product("https://darwin.md/p/3", "Laptopuri", true),
        ];
        let backends = HashMap::from([("https://darwin.md/p/1".to_string(), "http".to_string())]);
        save_products(&conn, &items, &backends).unwrap();

        assert_eq!(fetch_products(&conn, None, false, None).unwrap().len(), 2);
        assert_eq!(fetch_products(&conn, None, true, None).unwrap().len(), 3);
        let phones = fetch_products(&conn, Some("Telefoane"), false, None).unwrap();
        assert_eq!(phones.len(), 1);
        assert_eq!(phones[0].price, Some(999.0));
        assert_eq!(phones[0].currency.as_deref(), Some("MDL"));
        assert_eq!(phones[0].availability, "În stoc");
        assert_eq!(fetch_products(&conn, None, true, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn category_report_aggregates_valid_products() {
        let (_dir, conn) = open();
        assert_eq!(category_stats(&conn).unwrap(), CategoryReport::default());

        let product = |url: &str, category: &str, price: Option<Price>, valid: bool| ProductRecord {
            url: url.to_string(),
            name: Some("Samsung Galaxy A55".to_string()),
            description: None,
            price,
            category: category.to_string(),
            image_url: None,
            availability: Availability::Unknown,
            in_stock: false,
            last_updated: None,
            is_valid: valid,
        };
        let mdl = |amount| Some(Price::new(amount, Currency::Mdl));
        let items = vec![
            product("https://darwin.md/p/1", "Telefoane", mdl(1000.0), true),
            product("https://darwin.md/p/2", "Telefoane", mdl(3000.0), true),
            product("https://darwin.md/p/3", "Telefoane", Some(Price::new(99.0, Currency::Eur)), true),
            product("https://darwin.md/p/4", "Laptopuri", mdl(15000.0), true),
            product("https://darwin.md/p/5", "Laptopuri", None, false),
        ];
        save_products(&conn, &items, &HashMap::new()).unwrap();

        let report = category_stats(&conn).unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(report.valid, 4);
        assert_eq!(report.invalid(), 1);
        assert_eq!(report.quality_score(), 80.0);
        assert_eq!(report.most_popular(), Some("Telefoane"));
        assert_eq!(
            report.categories[0],
            CategoryStats {
                category: "Telefoane".to_string(),
                count: 3,
                avg_price: 2000.0,
                min_price: 1000.0,
                max_price: 3000.0,
            }
        );
        assert_eq!(report.categories[1].count, 1);
        assert_eq!(report.categories[1].max_price, 15000.0);
    }

    #[test]
    fn stats_and_histogram() {
        let (_dir, conn) = open();
        store_page(&conn, "https://darwin.md/p/1", "ok", Some("x"));
        store_page(&conn, "https://darwin.md/p/2", "timeout", None);
        save_classifications(
            &conn,
            &[
                classification("https://darwin.md/p/1", true, &["price_pattern", "rule_price_plus_spec"]),
                classification("https://darwin.md/p/2", false, &["price_pattern"]),
            ],
        )
        .unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.visited, 2);
        assert_eq!(stats.fetched_ok, 1);
        assert_eq!(stats.fetch_errors, 1);
        assert_eq!(stats.classified, 2);
        assert_eq!(stats.products, 1);
        assert_eq!(stats.valid_products, 0);

        let histogram = reason_histogram(&conn).unwrap();
        assert_eq!(histogram[0], ("price_pattern".to_string(), 2, 1));
        assert_eq!(histogram[1], ("rule_price_plus_spec".to_string(), 1, 1));

        let statuses = fetch_status_counts(&conn).unwrap();
        assert_eq!(statuses.len(), 2);
    }

    #[test]
    fn histogram_counts_pages_not_occurrences() {
        let (_dir, conn) = open();
        save_classifications(
            &conn,
            &[
                classification(
                    "https://darwin.md/p/1",
                    true,
                    &["jsonld_product", "jsonld_product", "jsonld_product", "rule_jsonld"],
                ),
                classification("https://darwin.md/p/2", false, &["jsonld_product"]),
            ],
        )
        .unwrap();

        let histogram = reason_histogram(&conn).unwrap();
        assert_eq!(histogram[0], ("jsonld_product".to_string(), 2, 1));
        assert_eq!(histogram[1], ("rule_jsonld".to_string(), 1, 1));
    }
}
