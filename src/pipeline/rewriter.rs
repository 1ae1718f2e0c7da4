// src/pipeline/rewriter.rs
//! Iterative rewrite-and-gate loop: draft, neutralize loaded language,
//! expand short bodies, then run the editorial gate. LLM failures never
//! abort the batch; they degrade to a deterministic fallback brief.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{PipelineConfig, WordBand};
use crate::domain::{brief_id, Article, Brief, BriefStatus, LlmMetadata};
use crate::error::RewriteError;
use crate::pipeline::llm::ChatProvider;
use crate::pipeline::sections::{self, parse_sections, BriefSections};
use crate::tags;

/// Loaded terms that trigger a neutral-rewrite revision.
pub const BIAS_LEXICON: &[&str] = &[
    "brutal",
    "shocking",
    "stunning",
    "devastating",
    "savage",
    "terrorist",
    "regime",
    "strongman",
    "dictator",
    "rogue",
    "aggressive",
    "unprovoked",
    "innocent",
    "victims",
    "heroes",
    "extremist",
    "radical",
    "militant",
    "thugs",
    "cronies",
];

pub const MIN_SOURCES: usize = 1;

/// How many expansion calls a short body gets before the filler applies.
const MAX_EXPANSION_ATTEMPTS: u32 = 3;

/// Deterministic filler appended when the model cannot reach the lower
/// word bound. Repeated whole until the count clears the bound.
const FILLER: &str = "Officials have not announced further details at this time. Additional \
background, reaction from the affected parties, and any regulatory or legislative response \
will be reported as they are confirmed. Readers can consult the cited primary sources for \
the full text of the underlying documents and statements referenced in this brief.";

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

static BIAS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    BIAS_LEXICON
        .iter()
        .map(|term| {
            (
                *term,
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).unwrap(),
            )
        })
        .collect()
});

pub fn word_count(text: &str) -> usize {
    RE_WORD.find_iter(text).count()
}

/// Count occurrences of lexicon terms in a body.
pub fn bias_hits(text: &str) -> usize {
    BIAS_PATTERNS
        .iter()
        .map(|(_, re)| re.find_iter(text).count())
        .sum()
}

fn biased_terms(text: &str) -> Vec<&'static str> {
    BIAS_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(term, _)| *term)
        .collect()
}

/// `|biased terms| / |body words|`, clipped to 1.
pub fn subjectivity_score(body: &str) -> f64 {
    let words = word_count(body);
    if words == 0 {
        return 0.0;
    }
    (bias_hits(body) as f64 / words as f64).min(1.0)
}

fn system_prompt(band: WordBand) -> String {
    format!(
        "You are a fact-checking journalist writing neutral news briefs. For the story \
provided: restate only the claims you can verify from the material; cite any law or statute \
together with its year; place the story on a five-to-ten-year timeline of related events; \
cite at least one source and prefer a primary document; note material economic interests of \
the parties involved; avoid loaded labels unless they are legally designated terms. Write a \
neutral body of {min} to {max} words. Respond with exactly these sections in this order:\n\
{h}\n<headline>\n{b}\n<body>\n{c}\n<one-paragraph background, or None>\n{s}\n<one URL per \
line>\n{j}\n<JSON object with your claim-check notes>",
        min = band.min_words,
        max = band.max_words,
        h = sections::SECTION_HEADLINE,
        b = sections::SECTION_BRIEF,
        c = sections::SECTION_CONTEXT,
        s = sections::SECTION_SOURCES,
        j = sections::SECTION_SIDECAR,
    )
}

fn user_payload(article: &Article) -> String {
    format!(
        "TITLE: {}\nCONTENT: {}\nSOURCE: {}\nURL: {}",
        article.title, article.content, article.source_id, article.url
    )
}

#[derive(Debug, Clone)]
pub struct BriefPolicy {
    pub band: WordBand,
    pub initial_status: BriefStatus,
    pub prompt_version: String,
    /// USD per million tokens, input / output.
    pub input_rate: f64,
    pub output_rate: f64,
}

impl BriefPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        BriefPolicy {
            band: cfg.brief.word_band(),
            initial_status: cfg.brief.initial_status,
            prompt_version: cfg.llm.prompt_version.clone(),
            input_rate: cfg.llm.input_rate_per_mtok,
            output_rate: cfg.llm.output_rate_per_mtok,
        }
    }
}

#[derive(Default)]
struct Accounting {
    tokens: u64,
    cost: f64,
    revisions: u32,
}

pub struct Rewriter {
    provider: Arc<dyn ChatProvider>,
    policy: BriefPolicy,
}

impl Rewriter {
    pub fn new(provider: Arc<dyn ChatProvider>, policy: BriefPolicy) -> Self {
        Self { provider, policy }
    }

    /// Rewrite one article into a brief. LLM trouble degrades to the
    /// deterministic fallback; only an unrepairable gate failure surfaces
    /// as an error. Warnings (soft gate findings, fallback reasons) come
    /// back alongside the brief.
    pub async fn rewrite(
        &self,
        article: &Article,
        cancel: &CancellationToken,
    ) -> Result<(Brief, Vec<String>), RewriteError> {
        let t0 = std::time::Instant::now();
        let mut acct = Accounting::default();
        let mut warnings = Vec::new();

        let drafted = self.draft_and_polish(article, cancel, &mut acct).await;
        let (sections, subjectivity, fallback) = match drafted {
            Ok((s, subj)) => (s, subj, false),
            Err(e @ (RewriteError::LlmUnavailable(_) | RewriteError::Parse(_))) => {
                counter!("briefs_fallback_total").increment(1);
                warn!(article = %article.id, error = %e, "falling back to deterministic brief");
                warnings.push(format!("article {}: {e}", article.id));
                let s = self.fallback_sections(article);
                let subj = subjectivity_score(&s.body);
                (s, subj, true)
            }
            Err(e) => return Err(e),
        };

        let gated = self.gate(article, sections, &mut warnings)?;
        let processing_ms = t0.elapsed().as_millis() as u64;
        let now = Utc::now();

        let brief = Brief {
            id: brief_id(article.category, &gated.headline, now.timestamp_millis()),
            headline: gated.headline,
            sources: gated.sources,
            category: article.category,
            published_at: now,
            tags: tags::top_tags([&article.tags]),
            status: self.policy.initial_status,
            llm: LlmMetadata {
                model: if fallback {
                    "fallback".to_string()
                } else {
                    self.provider.model_id().to_string()
                },
                prompt_version: self.policy.prompt_version.clone(),
                tokens: acct.tokens,
                cost: acct.cost,
                processing_ms,
                subjectivity,
                revisions: acct.revisions,
            },
            body: gated.body,
        };
        Ok((brief, warnings))
    }

    /// Draft, neutralize, expand. Returns the parsed sections and the
    /// subjectivity score, which never rises across revisions.
    async fn draft_and_polish(
        &self,
        article: &Article,
        cancel: &CancellationToken,
        acct: &mut Accounting,
    ) -> Result<(BriefSections, f64), RewriteError> {
        let system = system_prompt(self.policy.band);
        let raw = self
            .chat(&system, &user_payload(article), cancel, acct)
            .await?;
        let mut parsed = parse_sections(&raw)?;
        let mut subjectivity = subjectivity_score(&parsed.body);

        // One neutral-rewrite revision when the draft trips the lexicon.
        let loaded = biased_terms(&parsed.body);
        if !loaded.is_empty() {
            debug!(article = %article.id, ?loaded, "bias scan hit, revising");
            let instruction = format!(
                "Your draft below uses loaded language ({}). Rewrite it in a neutral tone, \
preserving every citation and the section markup exactly.\n\n{raw}",
                loaded.join(", ")
            );
            acct.revisions += 1;
            if let Ok(revised_raw) = self.chat(&system, &instruction, cancel, acct).await {
                if let Ok(revised) = parse_sections(&revised_raw) {
                    subjectivity = subjectivity.min(subjectivity_score(&revised.body));
                    parsed = revised;
                }
            }
        }

        // Length loop: expansions target the lower bound explicitly.
        let min = self.policy.band.min_words;
        let mut attempts = 0;
        while word_count(&parsed.body) < min && attempts < MAX_EXPANSION_ATTEMPTS {
            attempts += 1;
            acct.revisions += 1;
            let instruction = format!(
                "The brief body below is {} words; expand it to at least {min} words while \
keeping every fact and citation, and keep the section markup exactly.\n\n{}",
                word_count(&parsed.body),
                render_sections(&parsed)
            );
            match self.chat(&system, &instruction, cancel, acct).await {
                Ok(raw) => {
                    if let Ok(expanded) = parse_sections(&raw) {
                        subjectivity = subjectivity.min(subjectivity_score(&expanded.body));
                        parsed = expanded;
                    }
                }
                Err(e) => {
                    debug!(article = %article.id, attempt = attempts, error = %e, "expansion failed");
                    break;
                }
            }
        }
        if word_count(&parsed.body) < min {
            pad_with_filler(&mut parsed.body, min);
            subjectivity = subjectivity.min(subjectivity_score(&parsed.body));
        }

        Ok((parsed, subjectivity))
    }

    /// Editorial gate. Repairs what it can (originating URL, length
    /// truncation) and only rejects a brief with no sources at all.
    fn gate(
        &self,
        article: &Article,
        mut s: BriefSections,
        warnings: &mut Vec<String>,
    ) -> Result<BriefSections, RewriteError> {
        if !article.url.is_empty() && !s.sources.iter().any(|u| u == &article.url) {
            s.sources.push(article.url.clone());
        }
        if s.sources.len() < MIN_SOURCES {
            return Err(RewriteError::InsufficientSources);
        }
        if !s.sources.iter().any(|u| sections::is_primary_source(u)) {
            // Soft gate: note it, keep the brief.
            warnings.push(format!(
                "article {}: {}",
                article.id,
                RewriteError::MissingPrimarySource
            ));
        }
        let max = self.policy.band.max_words;
        if word_count(&s.body) > max {
            s.body = truncate_words(&s.body, max);
        }
        Ok(s)
    }

    fn fallback_sections(&self, article: &Article) -> BriefSections {
        let headline = if article.title.trim().is_empty() {
            "News Update".to_string()
        } else {
            article.title.clone()
        };
        let mut body = if !article.description.trim().is_empty() {
            article.description.clone()
        } else {
            article.content.chars().take(600).collect()
        };
        pad_with_filler(&mut body, self.policy.band.min_words);
        BriefSections {
            headline,
            body,
            context: None,
            sources: vec![article.url.clone()],
            side_car: serde_json::Value::Object(Default::default()),
        }
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
        acct: &mut Accounting,
    ) -> Result<String, RewriteError> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RewriteError::LlmUnavailable("batch cancelled".into()));
            }
            r = self.provider.complete(system, user, self.policy.band.max_tokens) => r?,
        };
        acct.tokens += outcome.input_tokens + outcome.output_tokens;
        acct.cost += outcome.input_tokens as f64 * self.policy.input_rate / 1_000_000.0
            + outcome.output_tokens as f64 * self.policy.output_rate / 1_000_000.0;
        Ok(outcome.content)
    }
}

/// Re-render sections for a follow-up prompt.
fn render_sections(s: &BriefSections) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        sections::SECTION_HEADLINE,
        s.headline,
        sections::SECTION_BRIEF,
        s.body,
        sections::SECTION_CONTEXT,
        s.context.as_deref().unwrap_or("None"),
        sections::SECTION_SOURCES,
        s.sources.join("\n"),
        sections::SECTION_SIDECAR,
        s.side_car,
    )
}

/// Append whole filler paragraphs until the body clears `min` words.
fn pad_with_filler(body: &mut String, min: usize) {
    while word_count(body) < min {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(FILLER);
    }
}

/// Keep the first `max` words and mark the cut.
fn truncate_words(body: &str, max: usize) -> String {
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.len() <= max {
        return body.to_string();
    }
    let mut out = words[..max].join(" ");
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use crate::pipeline::llm::MockChatProvider;

    fn policy() -> BriefPolicy {
        BriefPolicy {
            band: WordBand {
                min_words: 20,
                max_words: 60,
                max_tokens: 900,
            },
            initial_status: BriefStatus::Pending,
            prompt_version: "v3".to_string(),
            input_rate: 0.15,
            output_rate: 0.60,
        }
    }

    fn article() -> Article {
        let now = Utc::now();
        Article {
            id: "art-1".to_string(),
            title: "Fed holds rates steady".to_string(),
            description: "The central bank left its target range unchanged.".to_string(),
            content: "The Federal Open Market Committee left rates unchanged on Wednesday."
                .to_string(),
            url: "https://www.federalreserve.gov/newsevents/pressreleases/a.htm".to_string(),
            source_id: "federal-reserve".to_string(),
            category: Category::FinanceMacro,
            published_at: now,
            captured_at: now,
            tags: vec!["monetary-policy".to_string()],
            brief_generated: false,
        }
    }

    fn completion(body: &str) -> String {
        format!(
            "==HEADLINE==\nRates held steady\n==BRIEF==\n{body}\n==CONTEXT==\nNone\n\
==SOURCES==\nhttps://www.federalreserve.gov/newsevents/pressreleases/a.htm\n==SIDE-CAR==\n{{}}"
        )
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn word_count_uses_word_boundaries() {
        assert_eq!(word_count("one two-three four."), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn subjectivity_counts_lexicon_hits() {
        let body = "A shocking and brutal development, local officials said.";
        // 2 hits over 8 words.
        assert!((subjectivity_score(body) - 0.25).abs() < 1e-9);
        assert_eq!(subjectivity_score("calm neutral text"), 0.0);
    }

    #[tokio::test]
    async fn clean_draft_passes_straight_through() {
        let provider = Arc::new(MockChatProvider::scripted(vec![completion(&words(30))]));
        let rw = Rewriter::new(provider, policy());
        let (brief, warnings) = rw
            .rewrite(&article(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(brief.headline, "Rates held steady");
        assert_eq!(brief.llm.revisions, 0);
        assert_eq!(brief.llm.model, "mock");
        assert!(brief.sources.contains(&article().url));
        assert!(warnings.is_empty());
        assert!(brief.llm.tokens > 0);
        assert!(brief.llm.cost > 0.0);
    }

    #[tokio::test]
    async fn biased_draft_gets_one_revision() {
        let biased = completion(&format!("A brutal crackdown. {}", words(25)));
        let neutral = completion(&format!("A forceful crackdown. {}", words(25)));
        let provider = Arc::new(MockChatProvider::scripted(vec![biased, neutral]));
        let rw = Rewriter::new(provider, policy());
        let (brief, _) = rw
            .rewrite(&article(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(brief.llm.revisions, 1);
        assert!(!brief.body.contains("brutal"));
        assert_eq!(brief.llm.subjectivity, 0.0);
    }

    #[tokio::test]
    async fn short_body_expands_then_pads_with_filler() {
        // Three expansion attempts all come back short; filler closes the gap.
        let short = completion(&words(5));
        let provider = Arc::new(MockChatProvider::scripted(vec![
            short.clone(),
            short.clone(),
            short.clone(),
            short.clone(),
        ]));
        let rw = Rewriter::new(provider, policy());
        let (brief, _) = rw
            .rewrite(&article(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(word_count(&brief.body) >= 20);
        assert!(brief.body.contains("Officials have not announced"));
        assert_eq!(brief.llm.revisions, 3);
    }

    #[tokio::test]
    async fn long_body_is_truncated_with_ellipsis() {
        let provider = Arc::new(MockChatProvider::scripted(vec![completion(&words(120))]));
        let rw = Rewriter::new(provider, policy());
        let (brief, _) = rw
            .rewrite(&article(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(word_count(&brief.body), 60);
        assert!(brief.body.ends_with("..."));
    }

    #[tokio::test]
    async fn unavailable_provider_yields_fallback_brief() {
        let provider = Arc::new(MockChatProvider::unavailable());
        let rw = Rewriter::new(provider, policy());
        let (brief, warnings) = rw
            .rewrite(&article(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(brief.llm.model, "fallback");
        assert_eq!(brief.headline, "Fed holds rates steady");
        assert!(word_count(&brief.body) >= 20);
        assert_eq!(brief.sources, vec![article().url]);
        assert!(warnings.iter().any(|w| w.contains("llm_unavailable")));
    }

    #[tokio::test]
    async fn missing_primary_source_is_a_soft_warning() {
        let raw = format!(
            "==HEADLINE==\nH\n==BRIEF==\n{}\n==SOURCES==\nhttps://someblog.example.com/post",
            words(30)
        );
        let provider = Arc::new(MockChatProvider::scripted(vec![raw]));
        let rw = Rewriter::new(provider, policy());
        let mut art = article();
        art.url = "https://someblog.example.com/original".to_string();
        let (brief, warnings) = rw
            .rewrite(&art, &CancellationToken::new())
            .await
            .unwrap();
        assert!(warnings.iter().any(|w| w.contains("missing_primary_source")));
        // Originating URL appended by the gate.
        assert!(brief.sources.contains(&art.url));
    }

    #[tokio::test]
    async fn cancelled_token_reports_llm_unavailable_fallback() {
        let provider = Arc::new(MockChatProvider::fixed(&completion(&words(30))));
        let rw = Rewriter::new(provider, policy());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (brief, _) = rw.rewrite(&article(), &cancel).await.unwrap();
        // In-flight work is abandoned; the caller discards this brief.
        assert_eq!(brief.llm.model, "fallback");
    }
}
