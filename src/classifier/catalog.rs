use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};

/// Spec-label categories and the label/value patterns that reveal them.
/// Labels are Romanian with English fallbacks, matched case-insensitively.
const SPEC_FEATURES: &[(&str, &str)] = &[
    ("brand", r"\b(Brand|Producator|Producător)\b"),
    ("model", r"\b(Model|Modelul)\b"),
    ("product_id", r"\b(ID produs|ID:|SKU:|Produs ID)\b"),
    ("dimensions", r"\b(Dimensiuni|mm|cm|x\s*mm|x\s*cm)\b"),
    ("weight", r"\b(Greutate)\b"),
    (
        "resolution",
        r"\b(Full\s*HD|1920\s*x\s*1080|4K|3840\s*x\s*2160|Rezoluție|Rezolutie)\b",
    ),
    ("refresh", r"\b(Hz|Refresh rate|Reîmprospătare|60 Hz|144 Hz)\b"),
    ("connectivity", r"\b(HDMI|DVI|VGA|DisplayPort|USB-C|USB)\b"),
    ("response_time", r"\b(Timpul de răspuns|ms)\b"),
    ("colors", r"\b(16\.7 Million|numărul de culori|culori)\b"),
];

/// Letters followed by at least two digits, e.g. `PHL273V7` or `WH-1000XM5`.
/// Deliberately case-sensitive as written.
const MODEL_NUMBER: &str = r"\b[A-Za-z]+[-_]?[0-9]{2,}[A-Za-z0-9-]*\b";

/// A number (optionally thousands-grouped) immediately followed by a currency token.
pub const CURRENCY_AMOUNT: &str = r"\d{1,3}(?:[.,]\d{3})*(?:[.,]\d+)?\s*(lei|mdl|ron|€|eur|usd|\$)";

const CALL_TO_ACTION: &[&str] = &[
    "adauga in cos",
    "adaugă în coș",
    "cumpără",
    "buy now",
    "add to cart",
    "add-to-cart",
    "cart",
];

const SERVICE_KEYWORDS: &[&str] = &[
    r"\basigurare\b",
    r"\bpoli[țt]a\b",
    r"\basigurari\b",
    r"\bpolita\b",
    r"\basigurator",
    r"\bservicii\b",
    r"\babonament\b",
    r"\bcalatorie",
    r"\bvacan",
    r"\bconsultant",
    r"\bFAQ\b",
    r"\bîntrebari frecvente\b",
];

const CARD_CLASSES: &[&str] = &["product-card", "product-item", "product-listing", "product__card"];

const OG_PRODUCT: &str = r#"<meta[^>]+property=["']og:type["'][^>]*content=["']product["']"#;
const HEADING_ONE: &str = r"(?s)<h1[^>]*>(.*?)</h1>";

/// Spec features detected in a block of page text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecFeatures {
    pub found: BTreeSet<String>,
    pub count: usize,
}

impl SpecFeatures {
    pub fn has(&self, name: &str) -> bool {
        self.found.contains(name)
    }
}

/// Every pattern the classifier consults, compiled once at start-up.
///
/// The catalog is plain immutable data: build it with [`RuleCatalog::new`],
/// hand it to a classifier, and share it across threads freely.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    spec_features: Vec<(&'static str, Regex)>,
    model_number: Regex,
    currency_amount: Regex,
    call_to_action: Regex,
    service_keywords: Vec<Regex>,
    card_classes: Regex,
    og_product: Regex,
    heading_one: Regex,
}

impl RuleCatalog {
    pub fn new() -> Result<Self, regex::Error> {
        let spec_features = SPEC_FEATURES
            .iter()
            .map(|(name, pattern)| Ok((*name, insensitive(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let service_keywords = SERVICE_KEYWORDS
            .iter()
            .map(|pattern| insensitive(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RuleCatalog {
            spec_features,
            model_number: Regex::new(MODEL_NUMBER)?,
            currency_amount: insensitive(CURRENCY_AMOUNT)?,
            call_to_action: insensitive(&alternation(CALL_TO_ACTION))?,
            service_keywords,
            card_classes: insensitive(&alternation(CARD_CLASSES))?,
            og_product: insensitive(OG_PRODUCT)?,
            heading_one: insensitive(HEADING_ONE)?,
        })
    }

    /// Union of every feature pattern that matches anywhere in `text`.
    pub fn extract_spec_features(&self, text: &str) -> SpecFeatures {
        let mut found: BTreeSet<String> = self
            .spec_features
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.to_string())
            .collect();

        if self.model_number.is_match(text) {
            found.insert("model_number".to_string());
        }
        if self.has_price(text) {
            found.insert("price".to_string());
        }

        let count = found.len();
        SpecFeatures { found, count }
    }

    pub fn has_price(&self, text: &str) -> bool {
        self.currency_amount.is_match(text)
    }

    pub fn has_call_to_action(&self, text: &str) -> bool {
        self.call_to_action.is_match(text)
    }

    pub fn has_service_keyword(&self, text: &str) -> bool {
        self.service_keywords.iter().any(|re| re.is_match(text))
    }

    pub fn has_og_product(&self, text: &str) -> bool {
        self.og_product.is_match(text)
    }

    pub fn count_headings(&self, text: &str) -> usize {
        self.heading_one.find_iter(text).count()
    }

    pub fn count_cards(&self, text: &str) -> usize {
        self.card_classes.find_iter(text).count()
    }

    /// Names of all label-based features, in declaration order.
    #[cfg(test)]
    pub fn feature_names(&self) -> Vec<&'static str> {
        self.spec_features.iter().map(|(name, _)| *name).collect()
    }
}

fn insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn alternation(literals: &[&str]) -> String {
    let escaped: Vec<String> = literals.iter().map(|l| regex::escape(l)).collect();
    format!("({})", escaped.join("|"))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RuleCatalog {
        RuleCatalog::new().unwrap()
    }

    #[test]
    fn all_tables_compile() {
        let c = catalog();
        assert_eq!(c.feature_names().len(), SPEC_FEATURES.len());
        assert_eq!(c.service_keywords.len(), SERVICE_KEYWORDS.len());
    }

    #[test]
    fn empty_text_has_no_features() {
        let f = catalog().extract_spec_features("");
        assert_eq!(f.count, 0);
        assert!(f.found.is_empty());
    }

    #[test]
    fn monitor_spec_table() {
        let text = "Producător: Philips\nModel: 273V7QDSB (PHL273V7)\nRezoluție: 1920 x 1080\n\
                    Reîmprospătare: 75 Hz\nConectivitate: HDMI, VGA\nGreutate: 3.2 kg";
        let f = catalog().extract_spec_features(text);
        for name in ["brand", "model", "resolution", "refresh", "connectivity", "weight", "model_number"] {
            assert!(f.has(name), "missing {name}");
        }
        assert!(!f.has("price"));
        assert_eq!(f.count, f.found.len());
    }

    #[test]
    fn price_counts_as_feature() {
        let f = catalog().extract_spec_features("Preț: 1299 lei");
        assert!(f.has("price"));
        assert_eq!(f.count, 1);
    }

    #[test]
    fn model_number_needs_two_digits() {
        let c = catalog();
        assert!(!c.extract_spec_features("h1 title").has("model_number"));
        assert!(c.extract_spec_features("Galaxy A55 nou").has("model_number"));
        assert!(c.extract_spec_features("WH-1000XM5").has("model_number"));
    }

    #[test]
    fn currency_tokens() {
        let c = catalog();
        assert!(c.has_price("499 MDL"));
        assert!(c.has_price("1.299,99 lei"));
        assert!(c.has_price("19.99 €"));
        assert!(c.has_price("$ is not enough but 25$ is"));
        assert!(c.has_price("10 EUR"));
        assert!(!c.has_price("lei 499"));
        assert!(!c.has_price("no numbers here"));
    }

    #[test]
    fn call_to_action_phrases() {
        let c = catalog();
        assert!(c.has_call_to_action("<button>Adaugă în coș</button>"));
        assert!(c.has_call_to_action("BUY NOW"));
        assert!(c.has_call_to_action(r#"<a class="add-to-cart">"#));
        assert!(!c.has_call_to_action("product-card"));
    }

    #[test]
    fn service_keywords_are_word_bounded() {
        let c = catalog();
        assert!(c.has_service_keyword("Asigurare de călătorie"));
        assert!(c.has_service_keyword("Întrebări? Vezi FAQ"));
        assert!(c.has_service_keyword("Polița RCA"));
        assert!(!c.has_service_keyword("reasigurare"));
        assert!(!c.has_service_keyword("faqs"));
    }

    #[test]
    fn og_product_meta() {
        let c = catalog();
        assert!(c.has_og_product(r#"<meta property="og:type" content="product">"#));
        assert!(c.has_og_product(r#"<META property='og:type' data-x="1" content='Product' />"#));
        assert!(!c.has_og_product(r#"<meta property="og:type" content="website">"#));
    }

    #[test]
    fn counts_headings_and_cards() {
        let c = catalog();
        let html = r#"<h1 class="t">One</h1><H1>Two
        lines</H1><div class="product-card"></div><div class="Product-Item"></div>"#;
        assert_eq!(c.count_headings(html), 2);
        assert_eq!(c.count_cards(html), 2);
    }
}
