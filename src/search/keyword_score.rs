use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::search::keywords::{KeywordTable, DEFAULT_WEIGHT};

/// Weight assigned to query words absent from the keyword table.
const PLAIN_WORD_MAX: f32 = 1.0;
/// Contribution of a plain query word present in the document.
const PLAIN_WORD_HIT: f32 = 0.5;
/// Cap of the repetition multiplier `1 + log10(count)`.
const MAX_REPETITION_BOOST: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordMatch {
    pub keyword: String,
    pub weight: f32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordScore {
    /// Normalized to 0..1
    pub score: f32,
    pub matches: Vec<KeywordMatch>,
}

/// Weighted keyword relevance between a query and a document.
///
/// Priority keywords (weight > 1) contribute `weight * min(1 + log10(count), 2)`
/// when present, so repeating a keyword has diminishing returns. Other query
/// words of 3+ characters contribute a flat 0.5. The total is normalized by
/// the best achievable total for this query.
#[derive(Clone)]
pub struct KeywordScorer {
    table: Arc<KeywordTable>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new(KeywordTable::shared())
    }
}

impl KeywordScorer {
    pub fn new(table: Arc<KeywordTable>) -> Self {
        Self { table }
    }

    pub fn score(&self, query: &str, document: &str) -> KeywordScore {
        let query_lower = query.to_lowercase();

        let mut seen = HashSet::new();
        let mut priority: Vec<(String, f32)> = Vec::new();
        let mut plain: Vec<String> = Vec::new();

        for token in tokenize(&query_lower) {
            if !seen.insert(token.clone()) {
                continue;
            }
            let weight = self.table.weight(&token);
            if weight > DEFAULT_WEIGHT {
                priority.push((token, weight));
            } else if token.chars().count() >= 3 {
                plain.push(token);
            }
        }

        for phrase in self.table.phrases() {
            if query_lower.contains(phrase.as_str()) && seen.insert(phrase.clone()) {
                priority.push((phrase.clone(), self.table.weight(phrase)));
            }
        }

        let mut total = 0.0f32;
        let mut max_possible = 0.0f32;
        let mut matches = Vec::new();

        for (keyword, weight) in priority {
            max_possible += weight;
            let count = self.table.count_occurrences(&keyword, document);
            if count > 0 {
                let repetition = (1.0 + (count as f32).log10()).min(MAX_REPETITION_BOOST);
                total += weight * repetition;
                matches.push(KeywordMatch {
                    keyword,
                    weight,
                    count,
                });
            }
        }

        if !plain.is_empty() {
            let document_lower = document.to_lowercase();
            for word in &plain {
                max_possible += PLAIN_WORD_MAX;
                if document_lower.contains(word.as_str()) {
                    total += PLAIN_WORD_HIT;
                }
            }
        }

        let score = if max_possible == 0.0 {
            0.0
        } else {
            (total / max_possible).min(1.0)
        };

        KeywordScore { score, matches }
    }
}

/// Lowercased query words stripped of punctuation, at least 2 characters.
/// Hyphens separate words.
fn tokenize(query_lower: &str) -> Vec<String> {
    query_lower
        .split(|c: char| c.is_whitespace() || c == '-')
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|w| w.chars().count() >= 2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> KeywordScorer {
        KeywordScorer::default()
    }

    #[test]
    fn test_tokenize_strips_punctuation_and_short_tokens() {
        assert_eq!(
            tokenize("what's the débit? a 4g!"),
            vec!["whats", "the", "débit", "4g"]
        );
    }

    #[test]
    fn test_gaming_pack_price_prefers_matching_document() {
        let s = scorer();
        let query = "gaming pack price";
        let relevant = s.score(query, "Le pack gamer est disponible. Consultez le tarif en agence.");
        let unrelated = s.score(query, "Horaires d'ouverture des agences commerciales.");
        assert!(relevant.score > unrelated.score);
        assert_eq!(unrelated.score, 0.0);
    }

    #[test]
    fn test_score_is_bounded() {
        let s = scorer();
        let doc = "prix prix prix prix prix prix prix prix prix prix prix prix";
        let r = s.score("prix", doc);
        assert!(r.score <= 1.0);
        assert!(r.score > 0.0);
    }

    #[test]
    fn test_repetition_has_diminishing_returns() {
        let s = scorer();
        let once = s.score("prix fibre", "prix");
        let ten = s.score("prix fibre", &"prix ".repeat(10));
        let hundred = s.score("prix fibre", &"prix ".repeat(100));
        assert!(ten.score > once.score);
        // 1 + log10(10) already reaches the cap of 2
        assert!((hundred.score - ten.score).abs() < 1e-6);
    }

    #[test]
    fn test_matches_report_counts() {
        let s = scorer();
        let r = s.score("promotion fibre", "Promotion fibre: la promotion continue");
        let promo = r.matches.iter().find(|m| m.keyword == "promotion").unwrap();
        assert_eq!(promo.count, 2);
        assert_eq!(promo.weight, 1.8);
        assert!(r.matches.iter().any(|m| m.keyword == "fibre"));
    }

    #[test]
    fn test_multi_word_phrase_detected() {
        let s = scorer();
        let r = s.score("tarif du pack gamer", "Le pack gamer coûte 2500 DA");
        assert!(r.matches.iter().any(|m| m.keyword == "pack gamer"));
    }

    #[test]
    fn test_tokenize_splits_hyphens() {
        assert_eq!(tokenize("e-paiement  dis-moi"), vec!["paiement", "dis", "moi"]);
    }

    #[test]
    fn test_hyphenated_keyword_scores() {
        let s = scorer();
        let doc = "Le service e-paiement permet de régler votre facture en ligne.";
        let r = s.score("e-paiement facture", doc);
        let epay = r.matches.iter().find(|m| m.keyword == "e-paiement").unwrap();
        assert_eq!(epay.weight, 1.8);
        assert_eq!(epay.count, 1);
        // Every priority keyword is present, so the score is full
        assert!((r.score - 1.0).abs() < 1e-6);

        let unrelated = s.score("e-paiement", "Horaires des agences");
        assert_eq!(unrelated.score, 0.0);
    }

    #[test]
    fn test_plain_words_contribute_half() {
        let s = scorer();
        // "horaires" is not a keyword: max 1.0, hit 0.5
        let r = s.score("horaires", "Horaires des agences");
        assert!((r.score - 0.5).abs() < 1e-6);
        assert!(r.matches.is_empty());
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let s = scorer();
        assert_eq!(s.score("", "anything").score, 0.0);
        assert_eq!(s.score("a ?", "anything").score, 0.0);
    }

    #[test]
    fn test_duplicate_query_words_counted_once() {
        let s = scorer();
        let single = s.score("prix", "prix");
        let repeated = s.score("prix prix prix", "prix");
        assert_eq!(single.score, repeated.score);
    }
}
