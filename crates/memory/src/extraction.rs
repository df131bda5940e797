//! Regex-based preference extraction used by the preference worker (C7).
//! Runs unconditionally; when an LLM extractor is also enabled its result is
//! merged on top so LLM fields win on key collision.

use std::sync::OnceLock;

use regex::Regex;

fn budget_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:budget|under|around)\s*\$?\s*([0-9]{2,6})\b").unwrap())
}

fn departure_city_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bfrom\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)\b").unwrap())
}

fn avoid_crowds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:crowd|crowded|busy areas)\b").unwrap())
}

const LIKES_KEYWORDS: &[(&[&str], &str)] = &[
    (&["beach", "island", "coast"], "beach"),
    (&["mountain", "hiking", "trail"], "mountain"),
    (&["museum", "art", "history"], "culture"),
];

/// Extracts a flat preference map from free text. Never errors; fields with
/// no match are simply absent from the result.
pub fn extract(text: &str) -> serde_json::Value {
    let mut out = serde_json::Map::new();

    if let Some(caps) = budget_re().captures(text) {
        if let Some(amount) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) {
            out.insert("budget".to_string(), serde_json::json!(amount));
        }
    }

    if let Some(caps) = departure_city_re().captures(text) {
        if let Some(city) = caps.get(1) {
            out.insert(
                "departure_city".to_string(),
                serde_json::json!(city.as_str()),
            );
        }
    }

    let lowered = text.to_lowercase();
    let mut likes: Vec<&'static str> = Vec::new();
    for (keywords, tag) in LIKES_KEYWORDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) && !likes.contains(tag) {
            likes.push(tag);
        }
    }
    if !likes.is_empty() {
        likes.sort();
        out.insert("likes".to_string(), serde_json::json!(likes));
    }

    if avoid_crowds_re().is_match(text) {
        out.insert("avoid_crowds".to_string(), serde_json::json!(true));
    }

    serde_json::Value::Object(out)
}
