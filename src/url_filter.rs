use std::sync::LazyLock;

use regex::Regex;
use url::Url;

const PRODUCT_SEGMENTS: &[&str] = &["/product/", "/produs/", "/p/", "/item/", "/products/"];

static EXCLUDED_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/(contact|about|despre|search|cautare|cart|cos|checkout|login|register|blog|news|noutati|help|ajutor|terms|termeni|privacy|sitemap|rss)(/|\.|$)",
    )
    .unwrap()
});
static STATIC_ASSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(xml|pdf|jpe?g|png|gif|webp|svg|css|js|txt)$").unwrap()
});
static TRAILING_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/\d+/?$").unwrap());
static ID_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|&)id=\d+(&|$)").unwrap());
static SLUG_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-\d+/?$").unwrap());

/// Cheap URL-only guess at whether `url` is a product detail page on the site.
///
/// Used to seed the crawl queue; the page classifier makes the real call.
pub fn is_product_url(url: &str, site_prefix: &str) -> bool {
    if !url.starts_with(site_prefix) {
        return false;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    let path = parsed.path().to_lowercase();
    if EXCLUDED_PATH_RE.is_match(&path) || STATIC_ASSET_RE.is_match(&path) {
        return false;
    }

    PRODUCT_SEGMENTS.iter().any(|seg| path.contains(seg))
        || TRAILING_ID_RE.is_match(&path)
        || parsed.query().is_some_and(|q| ID_PARAM_RE.is_match(q))
        || SLUG_ID_RE.is_match(&path)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://darwin.md";

    #[test]
    fn product_urls() {
        for url in [
            "https://darwin.md/telefoane/samsung-123",
            "https://darwin.md/laptopuri/lenovo-thinkpad-456",
            "https://darwin.md/accesorii/husa-789/",
            "https://darwin.md/produs/casti-sony",
            "https://darwin.md/p/iphone-15",
            "https://darwin.md/catalog/12345",
            "https://darwin.md/index.php?route=product&id=42",
        ] {
            assert!(is_product_url(url, SITE), "{url}");
        }
    }

    #[test]
    fn non_product_urls() {
        for url in [
            "https://darwin.md/contact",
            "https://darwin.md/despre",
            "https://darwin.md/blog/top-10-telefoane-2024",
            "https://darwin.md/test.xml",
            "https://darwin.md/images/banner-2024.jpg",
            "https://darwin.md/telefoane",
            "https://darwin.md/cos",
            "https://altsite.com/produs-123",
            "https://darwin.md/search?q=iphone&id=abc",
        ] {
            assert!(!is_product_url(url, SITE), "{url}");
        }
    }

    #[test]
    fn excluded_words_match_whole_segments() {
        assert!(is_product_url("https://darwin.md/cosmetice/parfum-12", SITE));
        assert!(is_product_url("https://darwin.md/helpers/stand-laptop-88", SITE));
    }
}
