pub mod catalog;
pub mod jsonld;

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use catalog::RuleCatalog;

const JSONLD_PRODUCT: f64 = 0.6;
const JSONLD_OFFERS: f64 = 0.4;
const OG_PRODUCT: f64 = 0.3;
const PRICE_PATTERN: f64 = 0.6;
const BUY_BUTTON: f64 = 0.4;
const SINGLE_H1: f64 = 0.2;
const MANY_CARDS: f64 = -0.6;
const PRODUCT_SPECS: f64 = 0.6;
const PARTIAL_SPECS: f64 = 0.2;
const SERVICE_PENALTY: f64 = -0.9;

const MIN_CARDS: usize = 3;
const SPEC_COUNT_RULE: usize = 3;
const SERVICE_SPEC_EXEMPTION: usize = 4;
const FALLBACK_THRESHOLD: f64 = 0.7;

/// Outcome of classifying one page. Built fresh per call and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub url: String,
    pub is_product: bool,
    /// Clamped to `[0.0, 1.0]`.
    pub score: f64,
    /// Every rule that fired, in evaluation order.
    pub reasons: Vec<String>,
    pub spec_features_found: BTreeSet<String>,
    pub spec_count: usize,
}

impl ClassificationResult {
    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }

    fn failed(url: &str, message: &str) -> Self {
        ClassificationResult {
            url: url.to_string(),
            is_product: false,
            score: 0.0,
            reasons: vec![format!("error:{}", message)],
            spec_features_found: BTreeSet::new(),
            spec_count: 0,
        }
    }
}

/// Decides from raw HTML whether a page shows exactly one product.
///
/// Pure and synchronous: no I/O, no interior state beyond the immutable
/// [`RuleCatalog`], so one instance can be shared across any number of
/// threads.
#[derive(Debug, Clone)]
pub struct PageClassifier {
    catalog: RuleCatalog,
}

impl PageClassifier {
    pub fn new(catalog: RuleCatalog) -> Self {
        PageClassifier { catalog }
    }

    /// Classify `html`. Never panics and never fails: malformed markup simply
    /// yields no evidence.
    pub fn classify(&self, url: &str, html: &str) -> ClassificationResult {
        let result = guarded(url, || self.evaluate(url, html));

        debug!(
            url,
            score = result.score,
            spec_count = result.spec_count,
            is_product = result.is_product,
            "classified page"
        );
        result
    }

    /// Same as [`classify`](Self::classify) for a fetcher that may have produced no body.
    pub fn classify_document(&self, url: &str, html: Option<&str>) -> ClassificationResult {
        self.classify(url, html.unwrap_or(""))
    }

    fn evaluate(&self, url: &str, html: &str) -> ClassificationResult {
        let catalog = &self.catalog;
        let mut card = Scorecard::default();

        for entry in jsonld::entries(html).iter().filter(|e| e.is_object()) {
            // Additive across blocks: three Product blocks score three times.
            if jsonld::is_product_entry(entry) {
                card.add("jsonld_product", JSONLD_PRODUCT);
            }
            if jsonld::has_offers(entry) {
                card.add("jsonld_offers", JSONLD_OFFERS);
            }
        }

        if catalog.has_og_product(html) {
            card.add("og:type=product", OG_PRODUCT);
        }

        if catalog.has_price(html) {
            card.add("price_pattern", PRICE_PATTERN);
        }

        if catalog.has_call_to_action(html) {
            card.add("buy_button", BUY_BUTTON);
        }

        match catalog.count_headings(html) {
            0 => {}
            1 => card.add("single_h1", SINGLE_H1),
            _ => card.note("multiple_h1"),
        }

        if catalog.count_cards(html) >= MIN_CARDS {
            card.add("many_cards", MANY_CARDS);
        }

        let specs = catalog.extract_spec_features(html);
        if specs.count >= SPEC_COUNT_RULE {
            card.add("product_specs", PRODUCT_SPECS);
        } else if specs.count >= 1 {
            card.add("partial_specs", PARTIAL_SPECS);
        }

        let mut service_penalized = false;
        if catalog.has_service_keyword(html) {
            card.note("service_keyword");
            if specs.count < SERVICE_SPEC_EXEMPTION {
                card.add("penalize_service", SERVICE_PENALTY);
                service_penalized = true;
            }
        }

        let score = card.score.clamp(0.0, 1.0);

        // The structured-data and spec-count paths ignore the service
        // penalty; only the score fallback is suppressed by it. An insurance
        // page with genuine Product markup is still accepted.
        let has_price = card.fired("price_pattern") || specs.has("price");
        let has_identity =
            specs.has("brand") || specs.has("model") || specs.has("model_number") || specs.has("product_id");

        let rule = if card.fired("jsonld_product") || card.fired("jsonld_offers") {
            Some("rule_jsonld")
        } else if specs.count >= SPEC_COUNT_RULE {
            Some("rule_spec_count")
        } else if has_price && has_identity {
            Some("rule_price_plus_spec")
        } else {
            None
        };
        if let Some(rule) = rule {
            card.note(rule);
        }

        let fallback = score >= FALLBACK_THRESHOLD && !service_penalized;

        ClassificationResult {
            url: url.to_string(),
            is_product: rule.is_some() || fallback,
            score,
            reasons: card.reasons,
            spec_count: specs.count,
            spec_features_found: specs.found,
        }
    }
}

#[derive(Default)]
struct Scorecard {
    score: f64,
    reasons: Vec<String>,
}

impl Scorecard {
    fn add(&mut self, reason: &str, delta: f64) {
        self.score += delta;
        self.note(reason);
    }

    fn note(&mut self, reason: &str) {
        self.reasons.push(reason.to_string());
    }

    fn fired(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }
}

/// Run one evaluation, turning a panic into an `error:<msg>` result.
fn guarded<F>(url: &str, evaluate: F) -> ClassificationResult
where
    F: FnOnce() -> ClassificationResult,
{
    panic::catch_unwind(AssertUnwindSafe(evaluate))
        .unwrap_or_else(|payload| ClassificationResult::failed(url, &panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected classifier failure".to_string()
    }
}

// ── Tests ──
