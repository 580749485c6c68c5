use std::collections::HashSet;

use crate::config::RerankerConfig;
use crate::llm::refine::UNKNOWN_INTENT;
use crate::models::{RankedDocument, RetrievedDocument};
use crate::search::keyword_score::KeywordScorer;

/// Coarse query intent used to filter reranked documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Price,
    Billing,
    Gaming,
    Speed,
    Procedure,
}

impl Intent {
    /// Map a free-form intent label to an intent. Unknown labels map to None.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        if label.is_empty() || label == UNKNOWN_INTENT {
            return None;
        }

        let has = |needles: &[&str]| needles.iter().any(|n| label.contains(n));
        if has(&["price", "pricing", "prix", "tarif", "cost"]) {
            Some(Intent::Price)
        } else if has(&["bill", "factur", "payment", "paiement"]) {
            Some(Intent::Billing)
        } else if has(&["gam", "jeu"]) {
            Some(Intent::Gaming)
        } else if has(&["speed", "débit", "debit", "vitesse", "bandwidth"]) {
            Some(Intent::Speed)
        } else if has(&["procedure", "procédure", "how_to", "inscription", "subscription"]) {
            Some(Intent::Procedure)
        } else {
            None
        }
    }

    /// Document must contain one of these (case-insensitive substring).
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Intent::Price => &["prix", "tarif", "dinar", "price", "cost", "coût"],
            Intent::Billing => &["facture", "paiement", "payment", "bill", "invoice", "recharge"],
            Intent::Gaming => &["gaming", "gamer", "jeu", "ping", "latence", "latency"],
            Intent::Speed => &["débit", "vitesse", "mbps", "gbps", "speed", "fibre", "fiber"],
            Intent::Procedure => &[
                "procédure",
                "procedure",
                "étape",
                "step",
                "dossier",
                "document",
                "inscription",
                "demande",
            ],
        }
    }

    fn matches(self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords().iter().any(|k| lower.contains(k))
    }
}

/// Hybrid semantic + keyword reranker.
///
/// Pipeline:
/// 1. `hybrid = semantic * semantic_weight + keyword * keyword_weight`
/// 2. Stable sort by final score, descending
/// 3. Keep the best chunk per file
/// 4. Dynamic threshold: 90% of the top score, or a fixed floor when the top is weak
/// 5. Intent filter, skipped if it would remove everything
/// 6. Restore the top `min_results` if filtering left fewer
/// 7. Cap at `max_results`
#[derive(Clone, Default)]
pub struct HybridReranker {
    scorer: KeywordScorer,
    config: RerankerConfig,
}

impl HybridReranker {
    pub fn new(scorer: KeywordScorer, config: RerankerConfig) -> Self {
        Self { scorer, config }
    }

    pub fn config(&self) -> &RerankerConfig {
        &self.config
    }

    pub fn rerank(
        &self,
        query: &str,
        documents: &[RetrievedDocument],
        intent: Option<&str>,
    ) -> Vec<RankedDocument> {
        if documents.is_empty() {
            return Vec::new();
        }

        // ── Score ────────────────────────────────────────
        let mut ranked: Vec<RankedDocument> = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let semantic_score = doc.score;
                let keyword_score = self.scorer.score(query, &doc.metadata.text).score;
                let hybrid_score = semantic_score * self.config.semantic_weight
                    + keyword_score * self.config.keyword_weight;
                RankedDocument {
                    document: doc.clone(),
                    original_rank: i + 1,
                    semantic_score,
                    keyword_score,
                    hybrid_score,
                    final_score: hybrid_score,
                }
            })
            .collect();

        // ── Sort (stable) and keep one chunk per file ────
        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen_files = HashSet::new();
        ranked.retain(|d| seen_files.insert(d.file_name().to_string()));
        let candidates = ranked;

        // ── Dynamic threshold ────────────────────────────
        let top_score = candidates.first().map(|d| d.final_score).unwrap_or(0.0);
        let threshold = self.dynamic_threshold(top_score);
        let mut results: Vec<RankedDocument> = candidates
            .iter()
            .filter(|d| d.final_score >= threshold)
            .cloned()
            .collect();

        // ── Intent filter (advisory) ─────────────────────
        if let Some(intent) = intent.and_then(Intent::from_label) {
            let filtered: Vec<RankedDocument> = results
                .iter()
                .filter(|d| intent.matches(d.text()))
                .cloned()
                .collect();
            if filtered.is_empty() {
                tracing::debug!("Intent filter {intent:?} matched nothing, skipped");
            } else {
                results = filtered;
            }
        }

        // ── Minimum results ──────────────────────────────
        let min_results = self.config.min_results;
        if results.len() < min_results && candidates.len() >= min_results {
            results = candidates[..min_results].to_vec();
        }

        results.truncate(self.config.max_results);

        tracing::debug!(
            "Reranked {} candidates -> {} results (top {:.3}, threshold {:.3})",
            documents.len(),
            results.len(),
            top_score,
            threshold
        );

        results
    }

    fn dynamic_threshold(&self, top_score: f32) -> f32 {
        if top_score > self.config.threshold_floor {
            top_score * self.config.threshold_ratio
        } else {
            self.config.threshold_floor
        }
    }
}
