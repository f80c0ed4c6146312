//! Deterministic in-process providers.
//!
//! Used by the CLI demo mode and by integration tests that need a full
//! pipeline without network access. Outputs are pure functions of their
//! inputs so repeated runs produce identical audit trails.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Analysis, ChecklistType, ComplianceItem, ItemStatus, Reference, Section};
use crate::providers::{
    ChecklistEvaluator, Generation, LiteratureSearch, ProviderError, StatsEngine, TextGenerator,
    TokenStream,
};

fn seed(s: &str) -> u64 {
    // FNV-1a, stable across runs.
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// ─── Literature ───────────────────────────────────────────────────────────

pub struct DemoLiterature;

#[async_trait]
impl LiteratureSearch for DemoLiterature {
    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<Reference>, ProviderError> {
        if query.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty query".to_string()));
        }
        let base = seed(query);
        let refs = (0..max_results)
            .map(|i| {
                let h = base.wrapping_add(i as u64);
                Reference {
                    id: format!("pmid-{}", 10_000_000 + (h % 9_000_000)),
                    title: format!("Study {} on {}", i + 1, query),
                    authors: vec![
                        format!("Author {}", ((h % 26) as u8 + b'A') as char),
                        "et al.".to_string(),
                    ],
                    year: 2015 + (h % 10) as i32,
                    abstract_text: format!(
                        "A cohort investigation of {} with {} participants.",
                        query,
                        200 + (h % 1800)
                    ),
                    relevance: 1.0 - (i as f64 * 0.05),
                }
            })
            .collect();
        Ok(refs)
    }
}

// ─── Statistics ───────────────────────────────────────────────────────────

pub struct DemoStats;

#[async_trait]
impl StatsEngine for DemoStats {
    async fn analyze(&self, test_name: &str, data: &Value) -> Result<Analysis, ProviderError> {
        if test_name.is_empty() {
            return Err(ProviderError::InvalidInput("empty test name".to_string()));
        }
        let h = seed(&format!("{}:{}", test_name, data));
        let statistic = 1.5 + (h % 200) as f64 / 100.0;
        let p_value = 0.001 + (h % 90) as f64 / 1000.0;
        let effect = 0.2 + (h % 60) as f64 / 100.0;
        Ok(Analysis {
            test_name: test_name.to_string(),
            statistic,
            p_value,
            confidence_interval: (effect - 0.15, effect + 0.15),
            effect_size: effect,
        })
    }
}

// ─── Text generation ──────────────────────────────────────────────────────

pub struct DemoGenerator;

impl DemoGenerator {
    fn compose(prompt: &str, context: &str) -> String {
        let topic = context.lines().next().unwrap_or("the study").trim();
        format!(
            "{} This paragraph addresses the request: {}. \
             Findings are reported with exact statistics (p = 0.03) and \
             placed in the context of the cited literature.",
            topic,
            prompt.lines().next().unwrap_or("").trim()
        )
    }
}

#[async_trait]
impl TextGenerator for DemoGenerator {
    async fn generate(&self, prompt: &str, context: &str) -> Result<Generation, ProviderError> {
        let text = Self::compose(prompt, context);
        Ok(Generation {
            input_tokens: Some((prompt.split_whitespace().count() + context.split_whitespace().count()) as u64),
            output_tokens: Some(text.split_whitespace().count() as u64),
            text,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<TokenStream, ProviderError> {
        let text = Self::compose(prompt, context);
        let words: Vec<String> = text
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();
        let stream = async_stream::stream! {
            for word in words {
                yield Ok(word);
            }
        };
        Ok(Box::pin(stream))
    }
}

// ─── Compliance ───────────────────────────────────────────────────────────

pub struct DemoEvaluator;

/// (item id, description, section checked, keyword the manuscript must contain)
fn checklist_items(
    checklist: ChecklistType,
) -> Vec<(&'static str, &'static str, Option<Section>, &'static str)> {
    match checklist {
        ChecklistType::Consort => vec![
            ("1a", "Identification as a randomised trial", Some(Section::Introduction), "## Introduction"),
            ("2a", "Scientific background and rationale", Some(Section::Introduction), "## Introduction"),
            ("3a", "Description of trial design", Some(Section::Methods), "## Methods"),
            ("7a", "Sample size determination", Some(Section::Methods), "## Methods"),
            ("13a", "Participant flow and numbers analysed", Some(Section::Results), "## Results"),
            ("17a", "Effect size and precision reported", Some(Section::Results), "p ="),
            ("20", "Limitations and sources of bias", Some(Section::Discussion), "## Discussion"),
            ("22", "Interpretation consistent with results", Some(Section::Discussion), "## Discussion"),
        ],
        ChecklistType::Prisma => vec![
            ("3", "Rationale for the review", Some(Section::Introduction), "## Introduction"),
            ("6", "Eligibility criteria specified", Some(Section::Methods), "## Methods"),
            ("13", "Synthesis methods described", Some(Section::Methods), "## Methods"),
            ("16a", "Study selection results", Some(Section::Results), "## Results"),
            ("20b", "Statistical synthesis results", Some(Section::Results), "p ="),
            ("23a", "General interpretation of results", Some(Section::Discussion), "## Discussion"),
        ],
        ChecklistType::Strobe => vec![
            ("2", "Background and rationale", Some(Section::Introduction), "## Introduction"),
            ("4", "Study design presented early", Some(Section::Methods), "## Methods"),
            ("12a", "Statistical methods described", Some(Section::Methods), "## Methods"),
            ("15", "Outcome data reported", Some(Section::Results), "## Results"),
            ("16a", "Unadjusted and adjusted estimates", Some(Section::Results), "p ="),
            ("19", "Limitations discussed", Some(Section::Discussion), "## Discussion"),
        ],
    }
}

#[async_trait]
impl ChecklistEvaluator for DemoEvaluator {
    async fn evaluate(
        &self,
        manuscript: &str,
        checklist_type: ChecklistType,
    ) -> Result<Vec<ComplianceItem>, ProviderError> {
        if manuscript.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty manuscript".to_string()));
        }
        let items = checklist_items(checklist_type)
            .into_iter()
            .map(|(id, description, section, needle)| {
                let present = manuscript.contains(needle);
                ComplianceItem {
                    item_id: id.to_string(),
                    description: description.to_string(),
                    status: if present {
                        ItemStatus::Pass
                    } else {
                        ItemStatus::Fail
                    },
                    finding: if present {
                        None
                    } else {
                        Some(format!("expected content matching \"{}\"", needle))
                    },
                    suggestion: if present {
                        None
                    } else {
                        Some(format!("address checklist item {}", id))
                    },
                    section,
                }
            })
            .collect();
        Ok(items)
    }
}
