// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dot-separated subjects with NATS-style wildcards.
//!
//! `*` matches exactly one token. `>` matches one or more trailing tokens and
//! may only appear last.

use parley_core::ParleyError;

/// Checks a concrete subject used for publishing.
pub fn validate_subject(subject: &str) -> Result<(), ParleyError> {
    if subject.is_empty() {
        return Err(ParleyError::bus("empty subject"));
    }
    for token in subject.split('.') {
        if token.is_empty() {
            return Err(ParleyError::bus(format!("empty token in subject `{subject}`")));
        }
        if token.contains(['*', '>']) || token.contains(char::is_whitespace) {
            return Err(ParleyError::bus(format!(
                "invalid token `{token}` in subject `{subject}`"
            )));
        }
    }
    Ok(())
}

/// Checks a filter or stream subject that may carry wildcards.
pub fn validate_pattern(pattern: &str) -> Result<(), ParleyError> {
    if pattern.is_empty() {
        return Err(ParleyError::bus("empty subject pattern"));
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        let ok = match *token {
            "" => false,
            "*" => true,
            ">" => i == last,
            t => !t.contains(['*', '>']) && !t.contains(char::is_whitespace),
        };
        if !ok {
            return Err(ParleyError::bus(format!(
                "invalid token `{token}` in subject pattern `{pattern}`"
            )));
        }
    }
    Ok(())
}

/// Returns true if the concrete `subject` matches `pattern`.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for p in pattern.split('.') {
        match p {
            ">" => return subject_tokens.next().is_some(),
            "*" => {
                if subject_tokens.next().is_none() {
                    return false;
                }
            }
            literal => {
                if subject_tokens.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    subject_tokens.next().is_none()
}

/// Returns true if every subject matched by `filter` is also matched by `pattern`.
pub fn covers(pattern: &str, filter: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    for p in pattern.split('.') {
        let Some(f) = filter_tokens.next() else {
            return false;
        };
        match p {
            ">" => return true,
            "*" => {
                if f == ">" {
                    return false;
                }
            }
            literal => {
                if f != literal {
                    return false;
                }
            }
        }
    }
    filter_tokens.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn literal_match() {
        assert!(matches("parley.events.flow", "parley.events.flow"));
        assert!(!matches("parley.events.flow", "parley.events.flows"));
        assert!(!matches("parley.events", "parley.events.flow"));
    }

    #[test]
    fn star_matches_one_token() {
        assert!(matches("parley.messages.*.sms", "parley.messages.inbound.sms"));
        assert!(!matches("parley.messages.*", "parley.messages.inbound.sms"));
        assert!(!matches("parley.*", "parley"));
    }

    #[test]
    fn tail_matches_one_or_more() {
        assert!(matches("parley.messages.>", "parley.messages.inbound.whatsapp"));
        assert!(matches("parley.events.>", "parley.events.conversation.escalated"));
        assert!(!matches("parley.messages.>", "parley.messages"));
    }

    #[test]
    fn pattern_validation() {
        assert!(validate_pattern("parley.messages.>").is_ok());
        assert!(validate_pattern("parley.*.inbound").is_ok());
        assert!(validate_pattern("parley.>.inbound").is_err());
        assert!(validate_pattern("parley..inbound").is_err());
        assert!(validate_pattern("parley.in*").is_err());
        assert!(validate_pattern("").is_err());
    }

    #[test]
    fn subject_validation_rejects_wildcards() {
        assert!(validate_subject("parley.messages.inbound.sms").is_ok());
        assert!(validate_subject("parley.messages.*").is_err());
        assert!(validate_subject("parley.messages.").is_err());
        assert!(validate_subject("parley.has space").is_err());
    }

    #[test]
    fn stream_covers_consumer_filters() {
        assert!(covers("parley.messages.>", "parley.messages.inbound.>"));
        assert!(covers("parley.messages.>", "parley.messages.outbound.sms"));
        assert!(covers("parley.*.x", "parley.*.x"));
        assert!(!covers("parley.messages.*", "parley.messages.>"));
        assert!(!covers("parley.events.>", "parley.messages.inbound.>"));
        assert!(!covers("parley.messages.>", "parley.messages"));
    }

    fn token() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    proptest! {
        #[test]
        fn prefix_tail_matches_every_extension(
            prefix in prop::collection::vec(token(), 1..4),
            rest in prop::collection::vec(token(), 1..4),
        ) {
            let pattern = format!("{}.>", prefix.join("."));
            let subject = format!("{}.{}", prefix.join("."), rest.join("."));
            prop_assert!(matches(&pattern, &subject));
            prop_assert!(!matches(&pattern, &prefix.join(".")));
        }

        #[test]
        fn star_replaces_any_single_token(
            tokens in prop::collection::vec(token(), 1..6),
            idx in 0usize..6,
        ) {
            let idx = idx % tokens.len();
            let subject = tokens.join(".");
            let mut pattern_tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
            pattern_tokens[idx] = "*";
            let pattern = pattern_tokens.join(".");
            prop_assert!(matches(&pattern, &subject));
            prop_assert!(matches(&subject, &subject));
        }

        #[test]
        fn covered_filters_only_match_covered_subjects(
            tokens in prop::collection::vec(token(), 2..5),
        ) {
            let subject = tokens.join(".");
            let stream = format!("{}.>", tokens[0]);
            if matches(&subject, &subject) && covers(&stream, &subject) {
                prop_assert!(matches(&stream, &subject));
            }
        }
    }
}
