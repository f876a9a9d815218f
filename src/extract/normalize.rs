use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use super::price::Price;

/// Substring → display name. First hit wins, so narrower keys come first.
const CATEGORY_NAMES: &[(&str, &str)] = &[
    ("telefoane mobile cu buton", "Telefoane cu Buton"),
    ("telefoane dect", "Telefoane DECT"),
    ("smartphone", "Smartphone-uri"),
    ("telefoane", "Telefoane"),
    ("laptopuri", "Laptopuri"),
    ("tablete", "Tablete"),
    ("accesorii", "Accesorii"),
    ("audio", "Audio"),
    ("casti", "Căști"),
    ("boxe", "Boxe"),
    ("gaming", "Gaming"),
    ("smart home", "Smart Home"),
    ("monitoare", "Monitoare"),
    ("sisteme pc", "Sisteme PC"),
    ("componente pc", "Componente PC"),
    ("periferice pc", "Periferice PC"),
    ("imprimante", "Imprimante"),
    ("camere foto", "Camere Foto"),
    ("camere action", "Camere Action"),
    ("camere supraveghere", "Camere Supraveghere"),
    ("tehnica bucatarie", "Electronice Bucătărie"),
    ("aspiratoare", "Aspiratoare"),
    ("aparate fitness", "Aparate Fitness"),
    ("transport personal", "Transport Personal"),
    ("drone", "Drone"),
    ("ochelari vr", "Ochelari VR"),
    ("ceasuri inteligente", "Ceasuri Inteligente"),
    ("bratari inteligente", "Brățări Inteligente"),
];

const IN_STOCK: &[&str] = &["in stoc", "în stoc", "pe stoc", "disponibil", "available", "in stock"];
const OUT_OF_STOCK: &[&str] = &[
    "indisponibil",
    "lipsa",
    "lipsă",
    "epuizat",
    "out of stock",
    "unavailable",
];
const GENERIC_NAMES: &[&str] = &["produs", "item", "article", "product"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Availability {
    InStock,
    OutOfStock,
    Other(String),
    #[default]
    Unknown,
}

impl Availability {
    pub fn from_text(text: &str) -> Self {
        let t = text.trim();
        if t.is_empty() {
            return Availability::Unknown;
        }
        let lower = t.to_lowercase();
        // "indisponibil" contains "disponibil": negatives are checked first.
        if OUT_OF_STOCK.iter().any(|n| lower.contains(n)) {
            Availability::OutOfStock
        } else if IN_STOCK.iter().any(|p| lower.contains(p)) {
            Availability::InStock
        } else {
            Availability::Other(t.to_string())
        }
    }

    /// Map a schema.org availability URL (`https://schema.org/InStock`).
    pub fn from_schema(value: &str) -> Self {
        if value.contains("OutOfStock") || value.contains("SoldOut") || value.contains("Discontinued") {
            Availability::OutOfStock
        } else if value.contains("InStock") || value.contains("LimitedAvailability") {
            Availability::InStock
        } else {
            Availability::Unknown
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Availability::InStock => "În stoc",
            Availability::OutOfStock => "Indisponibil",
            Availability::Other(s) => s,
            Availability::Unknown => "Necunoscut",
        }
    }

    pub fn in_stock(&self) -> bool {
        match self {
            Availability::InStock => true,
            Availability::Other(s) => normalize_in_stock(s),
            _ => false,
        }
    }
}

/// True when the text announces stock and does not also deny it.
pub fn normalize_in_stock(text: &str) -> bool {
    let t = text.to_lowercase();
    let positive = IN_STOCK.iter().chain(["availability"].iter()).any(|p| t.contains(p));
    positive && !OUT_OF_STOCK.iter().any(|n| t.contains(n))
}

/// Canonical display name for a breadcrumb or URL category.
pub fn clean_category(category: &str) -> String {
    let trimmed = category.trim();
    if trimmed.is_empty() || trimmed == "Electronice" {
        return "General".to_string();
    }
    let lower = trimmed.to_lowercase().replace('-', " ");
    CATEGORY_NAMES
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| title_case(trimmed))
}

/// Whether a record is complete enough to keep.
pub fn is_valid_product(name: Option<&str>, price: Option<&Price>) -> bool {
    let Some(name) = name.map(str::trim) else {
        return false;
    };
    if name.chars().count() < 3 {
        return false;
    }
    if !price.is_some_and(Price::is_positive) {
        return false;
    }
    let lower = name.to_lowercase();
    if GENERIC_NAMES.iter().any(|g| lower.contains(g)) {
        return name.chars().count() > 15;
    }
    true
}

/// RFC 3339 when the input is RFC 3339, RFC 2822 (HTTP `Last-Modified`) or a
/// bare `YYYY-MM-DD` date; the trimmed input otherwise.
pub fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.to_rfc3339();
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.to_rfc3339();
    }
    if let Some(dt) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return dt.and_utc().to_rfc3339();
    }
    raw.to_string()
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

// ── Tests ──
