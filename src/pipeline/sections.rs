// src/pipeline/sections.rs
//! Parser for the sectional completion format and the primary-domain
//! allow-list used by the editorial gate.
//!
//! Completions carry five delimited sections in order: `==HEADLINE==`,
//! `==BRIEF==`, `==CONTEXT==`, `==SOURCES==`, `==SIDE-CAR==`. The parser
//! is tolerant: a missing side-car defaults to `{}`, a `None` context maps
//! to null, and source URLs get trailing punctuation stripped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::RewriteError;

pub const SECTION_HEADLINE: &str = "==HEADLINE==";
pub const SECTION_BRIEF: &str = "==BRIEF==";
pub const SECTION_CONTEXT: &str = "==CONTEXT==";
pub const SECTION_SOURCES: &str = "==SOURCES==";
pub const SECTION_SIDECAR: &str = "==SIDE-CAR==";

const ALL_SECTIONS: [&str; 5] = [
    SECTION_HEADLINE,
    SECTION_BRIEF,
    SECTION_CONTEXT,
    SECTION_SOURCES,
    SECTION_SIDECAR,
];

#[derive(Debug, Clone)]
pub struct BriefSections {
    pub headline: String,
    pub body: String,
    pub context: Option<String>,
    pub sources: Vec<String>,
    pub side_car: Value,
}

/// Split a completion into its sections. Headline and body are required;
/// everything else degrades gracefully.
pub fn parse_sections(raw: &str) -> Result<BriefSections, RewriteError> {
    let mut marks: Vec<(usize, &str)> = ALL_SECTIONS
        .iter()
        .filter_map(|d| raw.find(d).map(|pos| (pos, *d)))
        .collect();
    marks.sort_by_key(|(pos, _)| *pos);

    let section = |name: &str| -> Option<String> {
        let idx = marks.iter().position(|(_, d)| *d == name)?;
        let (pos, delim) = marks[idx];
        let start = pos + delim.len();
        let end = marks.get(idx + 1).map(|(p, _)| *p).unwrap_or(raw.len());
        Some(raw[start..end].trim().to_string())
    };

    let headline = section(SECTION_HEADLINE)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RewriteError::Parse("missing ==HEADLINE== section".into()))?;
    let body = section(SECTION_BRIEF)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RewriteError::Parse("missing ==BRIEF== section".into()))?;

    let context = section(SECTION_CONTEXT)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"));

    let sources = section(SECTION_SOURCES)
        .map(|s| extract_urls(&s))
        .unwrap_or_default();

    let side_car = section(SECTION_SIDECAR)
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));

    Ok(BriefSections {
        headline,
        body,
        context,
        sources,
        side_car,
    })
}

/// Pull URLs out of free-form source listings, stripping the trailing
/// punctuation models like to attach.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for token in text.split_whitespace() {
        let start = match token.find("http://").or_else(|| token.find("https://")) {
            Some(i) => i,
            None => continue,
        };
        let mut url = &token[start..];
        while let Some(last) = url.chars().last() {
            if matches!(last, ')' | ',' | '.' | ';' | ':' | '"' | '\'') {
                url = &url[..url.len() - last.len_utf8()];
            } else {
                break;
            }
        }
        if !url.is_empty() && !out.iter().any(|u| u == url) {
            out.push(url.to_string());
        }
    }
    out
}

// ---- Primary-domain allow-list ----

static PRIMARY_DOMAINS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Government and academic TLDs
        r"\.gov(\.|$)",
        r"\.gob(\.|$)",
        r"\.go\.[a-z]{2}$",
        r"\.edu",
        // International organisations
        r"(^|\.)un\.org$",
        r"(^|\.)icj-cij\.org$",
        r"(^|\.)icc-cpi\.int$",
        r"(^|\.)who\.int$",
        r"(^|\.)worldbank\.org$",
        r"(^|\.)imf\.org$",
        r"(^|\.)europa\.eu$",
        // Government data and legal bodies
        r"(^|\.)data\.gov$",
        r"(^|\.)congress\.gov$",
        r"(^|\.)legislation\.gov\.uk$",
        r"(^|\.)justice\.gc\.ca$",
        r"parliament\.",
        r"court",
        // Reputable outlets
        r"reuters",
        r"(^|\.)ap\.org$",
        r"(^|\.)bbc\.(com|co\.uk)$",
        r"(^|\.)npr\.org$",
        r"(^|\.)pbs\.org$",
        r"(^|\.)aljazeera\.com$",
        r"(^|\.)dw\.com$",
        r"(^|\.)france24\.com$",
        r"(^|\.)cnn\.com$",
        r"(^|\.)nytimes\.com$",
        r"(^|\.)washingtonpost\.com$",
        r"(^|\.)wsj\.com$",
        r"(^|\.)bloomberg\.com$",
        r"(^|\.)ft\.com$",
        r"(^|\.)economist\.com$",
        // Research
        r"(^|\.)arxiv\.org$",
        r"(^|\.)researchgate\.net$",
        r"(^|\.)scholar\.google\.com$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid primary-domain pattern"))
    .collect()
});

/// Whether a URL's host matches the primary-domain allow-list.
pub fn is_primary_source(url: &str) -> bool {
    let host = match reqwest::Url::parse(url) {
        Ok(u) => match u.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        },
        Err(_) => return false,
    };
    PRIMARY_DOMAINS.iter().any(|re| re.is_match(&host))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETION: &str = r#"==HEADLINE==
Central bank holds benchmark rate
==BRIEF==
The committee voted to keep the target range unchanged, citing cooling inflation.
==CONTEXT==
The decision follows three consecutive holds.
==SOURCES==
- https://www.federalreserve.gov/newsevents/pressreleases/monetary20260614a.htm.
- (https://www.reuters.com/markets/fed-holds),
==SIDE-CAR==
{"claims_checked": 4}"#;

    #[test]
    fn parses_all_five_sections() {
        let s = parse_sections(COMPLETION).unwrap();
        assert_eq!(s.headline, "Central bank holds benchmark rate");
        assert!(s.body.starts_with("The committee voted"));
        assert!(s.context.unwrap().contains("three consecutive holds"));
        assert_eq!(s.sources.len(), 2);
        assert_eq!(
            s.sources[0],
            "https://www.federalreserve.gov/newsevents/pressreleases/monetary20260614a.htm"
        );
        assert_eq!(s.sources[1], "https://www.reuters.com/markets/fed-holds");
        assert_eq!(s.side_car["claims_checked"], 4);
    }

    #[test]
    fn context_none_maps_to_null() {
        let raw = "==HEADLINE==\nH\n==BRIEF==\nB\n==CONTEXT==\nNone\n==SOURCES==\nhttps://a.gov/x";
        let s = parse_sections(raw).unwrap();
        assert!(s.context.is_none());
    }

    #[test]
    fn malformed_side_car_defaults_to_empty_object() {
        let raw = "==HEADLINE==\nH\n==BRIEF==\nB\n==SIDE-CAR==\nnot json {";
        let s = parse_sections(raw).unwrap();
        assert_eq!(s.side_car, serde_json::json!({}));
    }

    #[test]
    fn missing_body_is_a_parse_error() {
        let raw = "==HEADLINE==\nH\n==CONTEXT==\nNone";
        assert!(matches!(
            parse_sections(raw),
            Err(RewriteError::Parse(_))
        ));
    }

    #[test]
    fn url_extraction_strips_trailing_punctuation() {
        let urls = extract_urls("see https://example.gov/doc); and 'https://a.org/b.'");
        assert_eq!(
            urls,
            vec!["https://example.gov/doc", "https://a.org/b"]
        );
    }

    #[test]
    fn primary_domains_match_expected_hosts() {
        assert!(is_primary_source("https://www.federalreserve.gov/press"));
        assert!(is_primary_source("https://www.state.gov/briefing"));
        assert!(is_primary_source("https://news.un.org/en/story"));
        assert!(is_primary_source("https://www.reuters.com/world"));
        assert!(is_primary_source("https://www.bbc.co.uk/news"));
        assert!(is_primary_source("https://www.supremecourt.uk/cases"));
        assert!(is_primary_source("https://arxiv.org/abs/2401.1"));
        assert!(is_primary_source("https://www.parliament.uk/business"));
        assert!(!is_primary_source("https://randomblog.example.com/post"));
        assert!(!is_primary_source("not a url"));
    }
}
