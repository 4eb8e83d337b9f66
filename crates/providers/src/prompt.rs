//! Prompt construction and collaborator message parsing.

use std::time::Duration;

use itemflow_core::EnrichmentParams;

use crate::capability::SourceContent;

/// Characters of the source description included in a prompt.
const SOURCE_EXCERPT_CHARS: usize = 400;

/// Build the enrichment prompt for one item.
pub fn build_prompt(content: &SourceContent, params: &EnrichmentParams) -> String {
    let specs: Vec<String> = [
        ("brand", content.attribute(&["BRAND"])),
        ("model", content.attribute(&["MODEL"])),
        ("color", content.attribute(&["COLOR", "MAIN_COLOR"])),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|v| format!("{label}: {v}")))
    .collect();

    let excerpt: String = content.text.chars().take(SOURCE_EXCERPT_CHARS).collect();

    format!(
        "Generate a concise, factual product description for an e-commerce listing. \
         Tone: {tone}. Limit to {max_words} words. Avoid exaggeration. \
         Respond strictly in Spanish. \
         Specs: {specs}. \
         Source description (trimmed): {excerpt}",
        tone = params.tone,
        max_words = params.max_words,
        specs = specs.join(", "),
    )
}

/// True when a collaborator error message signals throttling / exhausted quota.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    message.contains("RESOURCE_EXHAUSTED")
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
}

/// Extract a "retry in N s" hint from a collaborator error message.
///
/// Looks for the first token shaped like `12s`, `12.5s` or `12.5s.`.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    message.split_whitespace().find_map(|token| {
        let token = token.trim_end_matches(['.', ',', ';', ')']);
        let number = token.strip_suffix('s')?;
        let secs: f64 = number.parse().ok()?;
        (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
    })
}
