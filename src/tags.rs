//! Fixed tag dictionary. Articles get tags by case-insensitive keyword
//! match over title + description; briefs later take the top five tags by
//! frequency across their contributing articles.

/// Tag → trigger keywords. Order is the tie-break order for briefs.
pub const TAG_DICTIONARY: &[(&str, &[&str])] = &[
    ("economy", &["economy", "gdp", "recession", "growth", "jobs report", "unemployment"]),
    ("markets", &["stocks", "bonds", "wall street", "s&p", "nasdaq", "dow", "market"]),
    ("monetary-policy", &["federal reserve", "fed", "interest rate", "rate cut", "rate hike", "inflation"]),
    ("elections", &["election", "ballot", "campaign", "primary", "voters", "poll"]),
    ("congress", &["congress", "senate", "house of representatives", "legislation", "bill"]),
    ("white-house", &["white house", "president", "executive order", "administration"]),
    ("courts", &["court", "lawsuit", "ruling", "judge", "supreme court", "indictment"]),
    ("conflict", &["war", "military", "strike", "ceasefire", "troops", "missile"]),
    ("diplomacy", &["diplomacy", "summit", "treaty", "sanctions", "ambassador", "united nations"]),
    ("energy", &["oil", "gas", "opec", "energy", "pipeline", "renewable"]),
    ("technology", &["technology", "ai", "artificial intelligence", "chip", "semiconductor", "cyber"]),
    ("health", &["health", "outbreak", "vaccine", "hospital", "fda", "pandemic"]),
    ("climate", &["climate", "emissions", "wildfire", "hurricane", "flood", "drought"]),
    ("trade", &["tariff", "trade", "exports", "imports", "supply chain"]),
];

/// Match title + description against the dictionary. Each tag appears at
/// most once, in dictionary order.
pub fn extract(title: &str, description: &str) -> Vec<String> {
    let haystack = format!("{} {}", title, description).to_lowercase();
    TAG_DICTIONARY
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

/// Intersection-frequency tags for a brief: count tag occurrences across
/// the contributing articles and keep the five most frequent.
pub fn top_tags<'a, I>(article_tags: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Vec<String>>,
{
    use std::collections::HashMap;
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for tags in article_tags {
        for t in tags {
            *freq.entry(t.as_str()).or_default() += 1;
        }
    }
    // Stable order: frequency desc, then dictionary order.
    let mut ranked: Vec<(&str, usize)> = freq.into_iter().collect();
    ranked.sort_by_key(|(tag, count)| {
        let dict_pos = TAG_DICTIONARY
            .iter()
            .position(|(t, _)| t == tag)
            .unwrap_or(usize::MAX);
        (std::cmp::Reverse(*count), dict_pos)
    });
    ranked
        .into_iter()
        .take(5)
        .map(|(t, _)| t.to_string())
        .collect()
}
