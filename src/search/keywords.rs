//! Domain keyword weights.
//!
//! Categories are flattened once into a `keyword -> weight` table. A keyword
//! listed in several categories keeps the highest weight.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Weight of any word not in the table.
pub const DEFAULT_WEIGHT: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct KeywordCategory {
    pub name: &'static str,
    /// Importance multiplier, always above 1.0
    pub weight: f32,
    pub keywords: &'static [&'static str],
}

pub const CATEGORIES: &[KeywordCategory] = &[
    KeywordCategory {
        name: "pricing",
        weight: 2.0,
        keywords: &[
            "prix", "tarif", "tarifs", "price", "prices", "pricing", "cost", "coût", "cout",
            "dinar", "dinars", "combien", "how much",
        ],
    },
    KeywordCategory {
        name: "billing",
        weight: 1.8,
        keywords: &[
            "facture", "factures", "facturation", "bill", "billing", "invoice", "paiement",
            "payment", "payer", "recharge", "solde", "e-paiement",
        ],
    },
    KeywordCategory {
        name: "offers",
        weight: 1.8,
        keywords: &[
            "promotion", "promotions", "promo", "offre", "offres", "offer", "offers", "deal",
            "deals", "réduction", "discount", "pack", "forfait", "bonus",
        ],
    },
    KeywordCategory {
        name: "gaming",
        weight: 1.7,
        keywords: &[
            "gaming", "gamer", "gamers", "jeu", "jeux", "ping", "latence", "latency",
            "pack gamer",
        ],
    },
    KeywordCategory {
        name: "connectivity",
        weight: 1.6,
        keywords: &[
            "débit", "debit", "vitesse", "speed", "mbps", "gbps", "fibre", "fiber", "ftth",
            "adsl", "vdsl", "4g", "lte", "idoom", "wifi", "modem", "routeur", "router",
            "fibre optique",
        ],
    },
    KeywordCategory {
        name: "procedure",
        weight: 1.5,
        keywords: &[
            "procédure", "procedure", "inscription", "abonnement", "subscription",
            "installation", "dossier", "documents", "résiliation", "cancellation", "contrat",
            "contract", "agence",
        ],
    },
    KeywordCategory {
        name: "support",
        weight: 1.4,
        keywords: &[
            "panne", "outage", "dérangement", "réclamation", "complaint", "assistance",
            "support",
        ],
    },
];

#[derive(Debug)]
struct KeywordEntry {
    weight: f32,
    /// Whole-word, case-insensitive literal match
    pattern: Regex,
}

#[derive(Debug)]
pub struct KeywordTable {
    entries: HashMap<String, KeywordEntry>,
    /// Multi-word and hyphenated keywords, matched as substrings of the query
    phrases: Vec<String>,
}

static DEFAULT_TABLE: LazyLock<Arc<KeywordTable>> =
    LazyLock::new(|| Arc::new(KeywordTable::from_categories(CATEGORIES)));

impl KeywordTable {
    /// The table built from [`CATEGORIES`], shared process-wide.
    pub fn shared() -> Arc<KeywordTable> {
        Arc::clone(&DEFAULT_TABLE)
    }

    pub fn from_categories(categories: &[KeywordCategory]) -> Self {
        let mut weights: HashMap<String, f32> = HashMap::new();
        for category in categories {
            for keyword in category.keywords {
                let keyword = keyword.to_lowercase();
                let weight = weights.entry(keyword).or_insert(category.weight);
                *weight = weight.max(category.weight);
            }
        }

        let mut phrases: Vec<String> = weights
            .keys()
            .filter(|k| k.contains([' ', '-']))
            .cloned()
            .collect();
        phrases.sort();

        let entries = weights
            .into_iter()
            .filter_map(|(keyword, weight)| {
                let pattern = word_pattern(&keyword)?;
                Some((keyword, KeywordEntry { weight, pattern }))
            })
            .collect();

        Self { entries, phrases }
    }

    /// Weight of a lowercased token, [`DEFAULT_WEIGHT`] when unknown.
    pub fn weight(&self, keyword: &str) -> f32 {
        self.entries
            .get(keyword)
            .map(|e| e.weight)
            .unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whole-word, case-insensitive occurrences of `keyword` in `text`.
    pub fn count_occurrences(&self, keyword: &str, text: &str) -> usize {
        match self.entries.get(keyword) {
            Some(entry) => entry.pattern.find_iter(text).count(),
            None => word_pattern(keyword)
                .map(|p| p.find_iter(text).count())
                .unwrap_or(0),
        }
    }
}

/// Keywords are escaped so they only ever match literally.
fn word_pattern(keyword: &str) -> Option<Regex> {
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword))) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Skipping keyword {keyword:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_category_weights_above_one() {
        assert!(CATEGORIES.iter().all(|c| c.weight > 1.0));
    }

    #[test]
    fn test_hyphenated_keywords_are_phrases() {
        let table = KeywordTable::shared();
        assert!(table.phrases().iter().any(|p| p == "e-paiement"));
        assert!(table.phrases().iter().any(|p| p == "how much"));
        assert!(!table.phrases().iter().any(|p| p == "paiement"));
    }

    #[test]
    fn test_known_and_unknown_weights() {
        let table = KeywordTable::shared();
        assert_eq!(table.weight("prix"), 2.0);
        assert_eq!(table.weight("gaming"), 1.7);
        assert_eq!(table.weight("bonjour"), DEFAULT_WEIGHT);
    }

    #[test]
    fn test_max_weight_wins_on_collision() {
        let categories = [
            KeywordCategory {
                name: "low",
                weight: 1.2,
                keywords: &["fibre", "modem"],
            },
            KeywordCategory {
                name: "high",
                weight: 1.9,
                keywords: &["Fibre"],
            },
        ];
        let table = KeywordTable::from_categories(&categories);
        assert_eq!(table.weight("fibre"), 1.9);
        assert_eq!(table.weight("modem"), 1.2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_phrases_collected() {
        let table = KeywordTable::shared();
        assert!(table.phrases().iter().any(|p| p == "pack gamer"));
        assert!(table.phrases().iter().all(|p| p.contains(' ')));
    }

    #[test]
    fn test_count_whole_words_case_insensitive() {
        let table = KeywordTable::shared();
        let text = "Promotion! PROMOTION du mois, promotions et promotionnel.";
        // "promotions" and "promotionnel" are different words
        assert_eq!(table.count_occurrences("promotion", text), 2);
    }

    #[test]
    fn test_count_accented_keyword() {
        let table = KeywordTable::shared();
        assert_eq!(table.count_occurrences("débit", "Le débit monte à 100 Mbps"), 1);
    }

    #[test]
    fn test_count_unknown_keyword_is_literal() {
        let table = KeywordTable::shared();
        // '.' must not act as a wildcard
        assert_eq!(table.count_occurrences("a.b", "axb a.b"), 1);
    }
}
