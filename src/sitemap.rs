use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use tracing::info;

use crate::url_filter::is_product_url;

/// Fetch the site's `<urlset>` and return the product URLs it lists.
pub async fn fetch_product_urls(
    client: &reqwest::Client,
    sitemap_url: &str,
    site_prefix: &str,
) -> Result<Vec<String>> {
    info!("Fetching sitemap: {}", sitemap_url);
    let xml = client
        .get(sitemap_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to fetch sitemap")?;

    let all_urls = parse_urlset(&xml)?;
    info!("Total URLs in sitemap: {}", all_urls.len());
    Ok(filter_product_urls(all_urls, site_prefix))
}

/// Read URLs from a local sitemap file or a plain list with one URL per line.
pub fn read_product_urls(path: &Path, site_prefix: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let all_urls = if content.trim_start().starts_with('<') {
        parse_urlset(&content)?
    } else {
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    };
    info!("Total URLs in {}: {}", path.display(), all_urls.len());
    Ok(filter_product_urls(all_urls, site_prefix))
}

/// Keep product URLs, first occurrence wins.
pub fn filter_product_urls(urls: Vec<String>, site_prefix: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let filtered: Vec<String> = urls
        .into_iter()
        .filter(|url| is_product_url(url, site_prefix))
        .filter(|url| seen.insert(url.clone()))
        .collect();
    info!("Product pages after filtering: {}", filtered.len());
    filtered
}

/// Parse a urlset XML and return all <loc> URLs.
fn parse_urlset(xml: &str) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut in_url = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" => bail!("Sitemap index files are not supported; pass a urlset"),
                b"url" => in_url = true,
                b"loc" if in_url => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => {
                let loc = e.unescape()?.trim().to_string();
                if !loc.is_empty() {
                    urls.push(loc);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" => in_url = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(urls)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SITE: &str = "https://darwin.md";

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url><loc>https://darwin.md/telefoane/iphone-13</loc></url>
            <url><loc>https://darwin.md/telefoane/samsung-123</loc><lastmod>2024-05-01</lastmod></url>
            <url><loc>https://darwin.md/contact</loc></url>
            <url><loc>https://darwin.md/produs/casti?x=1&amp;id=5</loc></url>
            <url><loc>https://darwin.md/telefoane/samsung-123</loc></url>
        </urlset>"#;

    #[test]
    fn parses_every_loc() {
        let urls = parse_urlset(URLSET).unwrap();
        assert_eq!(urls.len(), 5);
        assert_eq!(urls[3], "https://darwin.md/produs/casti?x=1&id=5");
    }

    #[test]
    fn filters_and_dedupes() {
        let urls = filter_product_urls(parse_urlset(URLSET).unwrap(), SITE);
        assert_eq!(
            urls,
            vec![
                "https://darwin.md/telefoane/iphone-13".to_string(),
                "https://darwin.md/telefoane/samsung-123".to_string(),
                "https://darwin.md/produs/casti?x=1&id=5".to_string(),
            ]
        );
    }

    #[test]
    fn sitemap_index_is_rejected() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sitemap><loc>https://darwin.md/sitemap-1.xml</loc></sitemap></sitemapindex>"#;
        assert!(parse_urlset(xml).is_err());
    }

    #[test]
    fn reads_plain_url_lists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("urls.txt");
        std::fs::write(
            &file,
            "# exported\nhttps://darwin.md/p/tv-55\n\nhttps://darwin.md/despre\nhttps://darwin.md/catalog/77\n",
        )
        .unwrap();
        let urls = read_product_urls(&file, SITE).unwrap();
        assert_eq!(urls, vec!["https://darwin.md/p/tv-55", "https://darwin.md/catalog/77"]);
    }

    #[tokio::test]
    async fn fetches_remote_urlset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(URLSET))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let urls = fetch_product_urls(&client, &format!("{}/sitemap.xml", server.uri()), SITE)
            .await
            .unwrap();
        assert_eq!(urls.len(), 3);
    }
}
