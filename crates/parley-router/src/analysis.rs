// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heuristic message analysis.
//!
//! Sentiment and human-request detection from keyword lists. No model call,
//! no network, and the same text always yields the same analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals extracted from one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub sentiment: Sentiment,
    /// The customer explicitly asked for a person.
    pub human_request: bool,
    /// Intent supplied by an upstream classifier, lowercased.
    pub intent: Option<String>,
}

/// Metadata key carrying an upstream-detected intent.
pub const INTENT_METADATA_KEY: &str = "intent";

const NEGATIVE_WORDS: &[&str] = &[
    "angry", "annoyed", "awful", "bad", "broken", "complaint", "disappointed", "frustrated",
    "furious", "hate", "horrible", "never again", "refund", "ridiculous", "scam", "terrible",
    "unacceptable", "upset", "useless", "worst", "absurdo", "horrível", "péssimo", "pessimo",
    "raiva", "reclamação", "reclamacao", "ruim", "cancelar",
];

const POSITIVE_WORDS: &[&str] = &[
    "amazing", "awesome", "excellent", "glad", "great", "happy", "love", "perfect", "thank",
    "thanks", "wonderful", "adorei", "excelente", "obrigado", "obrigada", "ótimo", "otimo",
    "perfeito",
];

const HUMAN_REQUEST_PHRASES: &[&str] = &[
    "human", "agent", "real person", "representative", "operator", "speak to someone",
    "talk to someone", "atendente", "humano", "pessoa real", "falar com alguém",
    "falar com alguem",
];

#[derive(Debug, Clone, Default)]
pub struct MessageAnalyzer;

impl MessageAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, text: &str, metadata: &BTreeMap<String, String>) -> Analysis {
        let lower = text.to_lowercase();

        let negative = count_hits(&lower, NEGATIVE_WORDS);
        let positive = count_hits(&lower, POSITIVE_WORDS);
        let sentiment = if negative > positive {
            Sentiment::Negative
        } else if positive > negative {
            Sentiment::Positive
        } else {
            Sentiment::Neutral
        };

        Analysis {
            sentiment,
            human_request: contains_any(&lower, HUMAN_REQUEST_PHRASES),
            intent: metadata
                .get(INTENT_METADATA_KEY)
                .map(|i| i.trim().to_lowercase())
                .filter(|i| !i.is_empty()),
        }
    }
}

fn count_hits(lower: &str, words: &[&str]) -> usize {
    words.iter().filter(|w| lower.contains(*w)).count()
}

/// Word-boundary aware for single words so "agent" does not match "agenda".
pub(crate) fn contains_any(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| contains_phrase(lower, phrase))
}

pub(crate) fn contains_phrase(lower: &str, phrase: &str) -> bool {
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return false;
    }
    lower.match_indices(&phrase).any(|(start, _)| {
        let before = lower[..start].chars().next_back();
        let after = lower[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> Analysis {
        MessageAnalyzer::new().analyze(text, &BTreeMap::new())
    }

    #[test]
    fn detects_negative_sentiment() {
        assert_eq!(analyze("This is the WORST service, I'm furious").sentiment, Sentiment::Negative);
        assert_eq!(analyze("atendimento péssimo").sentiment, Sentiment::Negative);
    }

    #[test]
    fn detects_positive_and_neutral() {
        assert_eq!(analyze("thanks, that was great").sentiment, Sentiment::Positive);
        assert_eq!(analyze("what are your opening hours?").sentiment, Sentiment::Neutral);
    }

    #[test]
    fn detects_human_request_on_word_boundaries() {
        assert!(analyze("can I talk to a human please").human_request);
        assert!(analyze("quero falar com um atendente").human_request);
        assert!(!analyze("check my agenda").human_request);
    }

    #[test]
    fn intent_comes_from_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert(INTENT_METADATA_KEY.to_string(), " Billing ".to_string());
        let analysis = MessageAnalyzer::new().analyze("hi", &metadata);
        assert_eq!(analysis.intent.as_deref(), Some("billing"));
        assert!(analyze("hi").intent.is_none());
    }

    #[test]
    fn analysis_is_deterministic() {
        let text = "I hate waiting, get me an agent";
        assert_eq!(analyze(text), analyze(text));
    }
}
