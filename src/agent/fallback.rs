// src/agent/fallback.rs
// Web-fallback heuristic: detect replies where the model refused because it
// believes it has no browsing capability, so the loop can inject a
// web_fetch on the user's apparent query instead. Databricks only - the
// Azure path never uses this.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde_json::Value;

/// Phrasings of a "no browsing capability" refusal.
static REFUSAL_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)i (do|don't|cannot) have (browser|browsing|internet) (capability|access)",
        r"(?i)cannot look up information",
        r"(?i)no web browsing capability",
        r"(?i)can'?t (access|reach) the internet",
        r"(?i)(do not|don't) have access to .*web (?:browsing|browser|internet)",
        r"(?i)(do not|don't) have .*browser",
        r"(?i)web(fetch|_fetch| search).*(not available|disabled|unavailable)",
        r"(?i)tool.*(not available|disabled|unavailable)",
        r"(?i)don't have access to real-time",
    ])
    .unwrap_or_else(|e| panic!("invalid refusal pattern: {e}"))
});

/// Concrete financial phrasings that mean the model DID answer; a refusal
/// pattern co-occurring with these is a false positive.
static FINANCIAL_PHRASES: &[&str] = &[
    "closed at $",
    "previous close",
    "day's range",
    "trading volume",
];

/// Whether the assistant text looks like a browsing-capability refusal.
pub fn should_trigger_web_fallback(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if !REFUSAL_PATTERNS.is_match(text) {
        return false;
    }
    let lowered = text.to_lowercase();
    !FINANCIAL_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// The user's apparent query: the text of the last user message.
pub fn extract_user_query(messages: &Value) -> Option<String> {
    let messages = messages.as_array()?;
    for message in messages.iter().rev() {
        if message.get("role").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let content = message.get("content")?;
        if let Some(text) = content.as_str() {
            if !text.trim().is_empty() {
                return Some(text.trim().to_string());
            }
            continue;
        }
        if let Some(blocks) = content.as_array() {
            let text: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            let joined = text.join("\n");
            if !joined.trim().is_empty() {
                return Some(joined.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refusal_phrases_trigger() {
        let cases = [
            "I don't have browser access to check that.",
            "Unfortunately I cannot look up information in real time.",
            "I have no web browsing capability.",
            "I can't access the internet from here.",
            "I do not have access to the web browsing tools.",
            "Sorry, I don't have a browser.",
            "web_fetch is currently unavailable",
            "That tool is disabled in this environment.",
            "I don't have access to real-time data.",
        ];
        for text in cases {
            assert!(should_trigger_web_fallback(text), "should trigger: {text}");
        }
    }

    #[test]
    fn test_normal_answers_do_not_trigger() {
        let cases = [
            "The function reads the file and returns its contents.",
            "Here is the diff you asked for.",
            "",
        ];
        for text in cases {
            assert!(!should_trigger_web_fallback(text), "should not trigger: {text}");
        }
    }

    #[test]
    fn test_financial_phrases_suppress_trigger() {
        let text = "I don't have browser access, but the stock closed at $12.50 \
                    with the previous close at $12.10.";
        assert!(!should_trigger_web_fallback(text));
    }

    #[test]
    fn test_extract_query_from_string_content() {
        let messages = json!([
            {"role": "system", "content": "be helpful"},
            {"role": "user", "content": "first question"},
            {"role": "assistant", "content": "an answer"},
            {"role": "user", "content": "latest price of gold?"}
        ]);
        assert_eq!(
            extract_user_query(&messages).as_deref(),
            Some("latest price of gold?")
        );
    }

    #[test]
    fn test_extract_query_from_blocks() {
        let messages = json!([
            {"role": "user", "content": [
                {"type": "text", "text": "what is"},
                {"type": "text", "text": "the weather"}
            ]}
        ]);
        assert_eq!(
            extract_user_query(&messages).as_deref(),
            Some("what is\nthe weather")
        );
    }

    #[test]
    fn test_extract_query_none_for_empty() {
        assert!(extract_user_query(&json!([])).is_none());
        assert!(extract_user_query(&json!([{"role": "assistant", "content": "x"}])).is_none());
    }
}
