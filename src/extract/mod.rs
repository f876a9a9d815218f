pub mod normalize;
pub mod price;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::classifier::jsonld;
use normalize::{clean_category, is_valid_product, normalize_timestamp, Availability};
use price::{parse_price_or_number, parse_price_text, Currency, Price};

const DESCRIPTION_LIMIT: usize = 500;
const SHORT_PRICE_TEXT: usize = 20;
const SKIPPED_CRUMBS: &[&str] = &["home", "acasa", "acasă", "darwin", "index"];
const TIMESTAMP_KEYS: &[&str] = &["dateModified", "datePublished", "lastReviewed"];

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().map(|s| Selector::parse(s).unwrap()).collect()
}

static NAME_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "h1.product-title",
        r#"h1[data-testid="product-title"]"#,
        "h1",
        ".product-name h1",
        ".product-head h1",
    ])
});
static DESCRIPTION_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".product-description",
        ".description",
        ".product-details",
        ".product-info",
        ".specifications",
    ])
});
static PRICE_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[".price-current", ".price", ".product-price", ".sale-price", ".final-price"])
});
static BREADCRUMB_SEL: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[".breadcrumb a, .breadcrumbs a"]));
static IMAGE_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[".product-image img", ".main-image img", ".product-photo img"])
});
static AVAILABILITY_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[".availability", ".stock-status", ".in-stock", ".out-of-stock"])
});
static MODIFIED_META_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"meta[property="article:modified_time"]"#,
        r#"meta[name="last-modified"]"#,
        r#"meta[property="og:updated_time"]"#,
        r#"meta[name="updated"]"#,
    ])
});
static TIME_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&["time[datetime]"]));
static TITLE_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&["title"]));
static BODY_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&["body"]));
static META_DESCRIPTION_SEL: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[r#"meta[name="description"]"#]));
static OG_TITLE_SEL: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[r#"meta[property="og:title"]"#]));
static OG_IMAGE_SEL: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[r#"meta[property="og:image"]"#]));

/// Product fields pulled from an accepted page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub url: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub category: String,
    pub image_url: Option<String>,
    pub availability: Availability,
    pub in_stock: bool,
    pub last_updated: Option<String>,
    pub is_valid: bool,
}

/// Extract product fields from `html`.
///
/// Visible markup is preferred; JSON-LD and `<meta>` tags fill whatever the
/// page template leaves out. `last_modified` is the HTTP header value, used
/// only when the document carries no timestamp of its own.
pub fn extract_product(url: &str, html: &str, last_modified: Option<&str>) -> ProductRecord {
    let doc = Html::parse_document(html);
    let entries = jsonld::entries(html);
    let product = entries
        .iter()
        .find(|e| e.is_object() && jsonld::is_product_entry(e));
    let offer = product.and_then(first_offer);

    let name = extract_name(&doc, product);
    let price = extract_price(&doc, offer);
    let availability = extract_availability(&doc, offer);
    let in_stock = availability.in_stock();
    let is_valid = is_valid_product(name.as_deref(), price.as_ref());

    ProductRecord {
        url: url.to_string(),
        description: extract_description(&doc, product),
        category: extract_category(&doc),
        image_url: extract_image(&doc, url, product),
        last_updated: extract_last_updated(&doc, &entries, last_modified),
        name,
        price,
        availability,
        in_stock,
        is_valid,
    }
}

fn extract_name(doc: &Html, product: Option<&Value>) -> Option<String> {
    if let Some(name) = first_text(doc, &NAME_SEL) {
        return Some(name);
    }

    // "<name> | Darwin" or "<name> - Darwin"
    let from_title = first_text(doc, &TITLE_SEL).and_then(|title| {
        let head = title.split('|').next().unwrap_or_default();
        let head = head.split(" - ").next().unwrap_or_default().trim();
        (!head.is_empty() && !head.eq_ignore_ascii_case("darwin")).then(|| head.to_string())
    });

    from_title
        .or_else(|| product.and_then(|p| jsonld::text_field(p, "name")))
        .or_else(|| first_attr(doc, &OG_TITLE_SEL, "content"))
}

fn extract_description(doc: &Html, product: Option<&Value>) -> Option<String> {
    first_text(doc, &DESCRIPTION_SEL)
        .or_else(|| product.and_then(|p| jsonld::text_field(p, "description")))
        .or_else(|| first_attr(doc, &META_DESCRIPTION_SEL, "content"))
        .map(|d| truncate_description(&d))
}

fn extract_price(doc: &Html, offer: Option<&Value>) -> Option<Price> {
    let from_markup = PRICE_SEL.iter().find_map(|sel| {
        doc.select(sel).find_map(|el| {
            let text = element_text(el);
            parse_price_text(&text).or_else(|| {
                (text.chars().count() < SHORT_PRICE_TEXT)
                    .then(|| parse_price_or_number(&text))
                    .flatten()
            })
        })
    });
    if from_markup.is_some() {
        return from_markup;
    }

    let from_offer = offer.and_then(|o| {
        let amount = jsonld::text_field(o, "price").and_then(|p| price::parse_amount(&p))?;
        let currency = jsonld::text_field(o, "priceCurrency")
            .and_then(|c| Currency::from_token(&c))
            .unwrap_or(Currency::Mdl);
        Some(Price::new(amount, currency))
    });
    if from_offer.is_some() {
        return from_offer;
    }

    first_text(doc, &BODY_SEL).and_then(|body| parse_price_text(&body))
}

fn extract_category(doc: &Html) -> String {
    let crumbs: Vec<String> = BREADCRUMB_SEL
        .iter()
        .flat_map(|sel| doc.select(sel))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();

    if crumbs.len() <= 1 {
        return clean_category("");
    }
    let last = crumbs
        .iter()
        .rev()
        .find(|c| !SKIPPED_CRUMBS.contains(&c.to_lowercase().as_str()));
    clean_category(last.map(String::as_str).unwrap_or_default())
}

fn extract_image(doc: &Html, page_url: &str, product: Option<&Value>) -> Option<String> {
    let src = IMAGE_SEL.iter().find_map(|sel| {
        doc.select(sel)
            .filter_map(|el| el.value().attr("src"))
            .map(str::trim)
            .find(|src| !src.is_empty() && !src.to_lowercase().ends_with(".svg"))
            .map(str::to_string)
    });

    src.or_else(|| product.and_then(|p| jsonld::text_field(p, "image")))
        .or_else(|| first_attr(doc, &OG_IMAGE_SEL, "content"))
        .map(|src| absolutize(page_url, &src))
}

fn extract_availability(doc: &Html, offer: Option<&Value>) -> Availability {
    if let Some(text) = first_text(doc, &AVAILABILITY_SEL) {
        return Availability::from_text(&text);
    }
    offer
        .and_then(|o| jsonld::text_field(o, "availability"))
        .map(|a| Availability::from_schema(&a))
        .unwrap_or_default()
}

fn extract_last_updated(doc: &Html, entries: &[Value], header: Option<&str>) -> Option<String> {
    first_attr(doc, &MODIFIED_META_SEL, "content")
        .or_else(|| first_attr(doc, &TIME_SEL, "datetime"))
        .or_else(|| {
            entries.iter().find_map(|e| {
                TIMESTAMP_KEYS
                    .iter()
                    .find_map(|key| jsonld::text_field(e, key))
            })
        })
        .or_else(|| header.map(str::to_string))
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| normalize_timestamp(&raw))
}

fn first_offer(product: &Value) -> Option<&Value> {
    match product.get("offers")? {
        Value::Array(items) => items.iter().find(|o| o.is_object()),
        obj @ Value::Object(_) => Some(obj),
        _ => None,
    }
}

/// Whitespace-collapsed text of the first non-empty match.
fn first_text(doc: &Html, sels: &[Selector]) -> Option<String> {
    sels.iter().find_map(|sel| {
        doc.select(sel)
            .map(element_text)
            .find(|t| !t.is_empty())
    })
}

fn first_attr(doc: &Html, sels: &[Selector], attr: &str) -> Option<String> {
    sels.iter().find_map(|sel| {
        doc.select(sel)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn element_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_description(text: &str) -> String {
    if text.chars().count() <= DESCRIPTION_LIMIT {
        return text.to_string();
    }
    let cut: String = text.chars().take(DESCRIPTION_LIMIT).collect();
    format!("{}...", cut.trim_end())
}

fn absolutize(page_url: &str, src: &str) -> String {
    Url::parse(page_url)
        .and_then(|base| base.join(src))
        .map(String::from)
        .unwrap_or_else(|_| src.to_string())
}

// ── Tests ──
