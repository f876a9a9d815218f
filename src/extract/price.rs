use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// Thousands may be grouped with dots, commas or (non-breaking) spaces: "7 499 lei".
// The amount must not start mid-number, or "1299.99" would yield "99".
static GROUPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.,])(\d{1,3}(?:[.,\u{a0} ]\d{3})*(?:[.,]\d{1,2})?)\s*(lei|mdl|ron|euro|eur|€|usd|dollar|\$)")
        .unwrap()
});
static SIMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+(?:[.,]\d+)?)\s*(lei|mdl|ron|euro|eur|€|usd|dollar|\$)").unwrap()
});
static BARE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,\u{a0} ]\d+)*").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Mdl,
    Eur,
    Usd,
}

impl Currency {
    /// Map a currency token or ISO code (`lei`, `RON`, `€`, `usd`...) to a currency.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "lei" | "mdl" | "ron" => Some(Currency::Mdl),
            "eur" | "euro" | "€" => Some(Currency::Eur),
            "usd" | "dollar" | "$" => Some(Currency::Usd),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Mdl => "MDL",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: Currency,
}

impl Price {
    pub fn new(amount: f64, currency: Currency) -> Self {
        Price { amount, currency }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amount.fract() == 0.0 {
            write!(f, "{:.0} {}", self.amount, self.currency.code())
        } else {
            write!(f, "{:.2} {}", self.amount, self.currency.code())
        }
    }
}

/// Find the first currency amount in free text ("Preț: 1.299,99 lei").
pub fn parse_price_text(text: &str) -> Option<Price> {
    let lower = text.to_lowercase().replace('\u{a0}', " ");
    [&*GROUPED_RE, &*SIMPLE_RE].iter().find_map(|re| {
        let caps = re.captures(&lower)?;
        let amount = parse_amount(&caps[1])?;
        let currency = Currency::from_token(&caps[2])?;
        Some(Price::new(amount, currency))
    })
}

/// Like [`parse_price_text`], but accepts a bare number as MDL.
pub fn parse_price_or_number(text: &str) -> Option<Price> {
    parse_price_text(text).or_else(|| {
        let m = BARE_NUMBER_RE.find(text)?;
        parse_amount(m.as_str()).map(|amount| Price::new(amount, Currency::Mdl))
    })
}

/// Normalise a scraped price label to `"<amount> <CODE>"`; unknown or
/// unavailable prices become `"0 MDL"`.
pub fn clean_price(text: &str) -> String {
    if text.trim().is_empty() || text.to_lowercase().contains("indisponibil") {
        return "0 MDL".to_string();
    }
    parse_price_or_number(text)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "0 MDL".to_string())
}

/// Parse `1.299,99`, `1,299.99`, `7 499`, `19.99` or `1.299` into a number.
///
/// With both separators present the later one is the decimal mark. A lone
/// separator followed by exactly three digits is a thousands separator.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let last_dot = compact.rfind('.');
    let last_comma = compact.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            let (decimal, thousands) = if d > c { ('.', ',') } else { (',', '.') };
            compact.replace(thousands, "").replace(decimal, ".")
        }
        (Some(i), None) | (None, Some(i)) => {
            let sep = if last_dot.is_some() { '.' } else { ',' };
            let occurrences = compact.matches(sep).count();
            let tail = compact.len() - i - 1;
            if occurrences == 1 && tail != 3 {
                compact.replace(sep, ".")
            } else {
                compact.replace(sep, "")
            }
        }
        (None, None) => compact,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts() {
        assert_eq!(parse_amount("1299"), Some(1299.0));
        assert_eq!(parse_amount("1.299"), Some(1299.0));
        assert_eq!(parse_amount("1.299,99"), Some(1299.99));
        assert_eq!(parse_amount("1,299.99"), Some(1299.99));
        assert_eq!(parse_amount("19.99"), Some(19.99));
        assert_eq!(parse_amount("1,5"), Some(1.5));
        assert_eq!(parse_amount("7 499"), Some(7499.0));
        assert_eq!(parse_amount("1.234.567"), Some(1234567.0));
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn currency_tokens() {
        assert_eq!(Currency::from_token("LEI"), Some(Currency::Mdl));
        assert_eq!(Currency::from_token("ron"), Some(Currency::Mdl));
        assert_eq!(Currency::from_token("€"), Some(Currency::Eur));
        assert_eq!(Currency::from_token("Euro"), Some(Currency::Eur));
        assert_eq!(Currency::from_token("$"), Some(Currency::Usd));
        assert_eq!(Currency::from_token("gbp"), None);
    }

    #[test]
    fn prices_in_text() {
        assert_eq!(parse_price_text("Preț: 1299 lei"), Some(Price::new(1299.0, Currency::Mdl)));
        assert_eq!(parse_price_text("7 499 lei"), Some(Price::new(7499.0, Currency::Mdl)));
        assert_eq!(parse_price_text("7\u{a0}499\u{a0}MDL"), Some(Price::new(7499.0, Currency::Mdl)));
        assert_eq!(parse_price_text("doar 19.99 EUR"), Some(Price::new(19.99, Currency::Eur)));
        assert_eq!(parse_price_text("12999 lei"), Some(Price::new(12999.0, Currency::Mdl)));
        assert_eq!(parse_price_text("1299.99 USD"), Some(Price::new(1299.99, Currency::Usd)));
        assert_eq!(parse_price_text("12999,90 lei"), Some(Price::new(12999.9, Currency::Mdl)));
        assert_eq!(parse_price_text("Preț: 1.299,99 lei"), Some(Price::new(1299.99, Currency::Mdl)));
        assert_eq!(parse_price_text("Model 2024 299 lei"), Some(Price::new(299.0, Currency::Mdl)));
        assert_eq!(parse_price_text("fără preț"), None);
    }

    #[test]
    fn bare_numbers_default_to_mdl() {
        assert_eq!(parse_price_or_number("4 599"), Some(Price::new(4599.0, Currency::Mdl)));
        assert_eq!(parse_price_or_number("n/a"), None);
    }

    #[test]
    fn display_and_cleaning() {
        assert_eq!(Price::new(1299.0, Currency::Mdl).to_string(), "1299 MDL");
        assert_eq!(Price::new(19.9, Currency::Eur).to_string(), "19.90 EUR");
        assert_eq!(clean_price("1.299,50 lei"), "1299.50 MDL");
        assert_eq!(clean_price("Preț indisponibil"), "0 MDL");
        assert_eq!(clean_price(""), "0 MDL");
        assert_eq!(clean_price("250"), "250 MDL");
        assert_eq!(clean_price("—"), "0 MDL");
    }
}
