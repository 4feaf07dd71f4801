//! Model identifier normalization.
//!
//! Raw identifiers arrive in many shapes (`anthropic/claude-sonnet-4-5-20250929`,
//! `gpt-4o-2024-08-06`, `ollama/qwen2.5-coder:7b-q4_k_m`). Lookups happen
//! against a canonical key with the provider prefix, date snapshot, release
//! qualifiers and quantization tags removed.

use std::sync::OnceLock;

use regex::Regex;

/// Separators tried, from the right, when falling back to shorter keys.
const FALLBACK_SEPARATORS: &[char] = &['-', ':'];

fn date_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-_@.](?:\d{8}|\d{4}-\d{2}-\d{2})$").expect("valid date suffix regex")
    })
}

fn qualifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-_.:](?:preview|beta|latest)$").expect("valid qualifier regex")
    })
}

fn quantization_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-_.:](?:q\d+(?:_[a-z0-9]+)*|int\d+|fp\d+|bf16|\d+bit|awq|gptq|gguf)$")
            .expect("valid quantization regex")
    })
}

fn strip_suffix(key: &str, re: &Regex) -> Option<usize> {
    re.find(key).map(|m| m.start())
}

/// Normalize a raw model identifier into its lookup key.
///
/// Lower-cases, drops everything up to the last `/`, then strips date,
/// qualifier and quantization suffixes. The suffix passes repeat until
/// nothing changes, so the result is a fixpoint:
/// `normalize_model_name(&normalize_model_name(x)) == normalize_model_name(x)`.
pub fn normalize_model_name(model: &str) -> String {
    let lowered = model.trim().to_lowercase();
    let mut key = match lowered.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => lowered,
    };

    loop {
        let before = key.len();
        for re in [date_suffix_regex(), qualifier_regex(), quantization_regex()] {
            if let Some(end) = strip_suffix(&key, re) {
                key.truncate(end);
            }
        }
        if key.len() == before {
            return key;
        }
    }
}

/// Progressively shorter prefixes of an already-normalized key, longest first,
/// excluding the key itself.
pub fn fallback_keys(key: &str) -> impl Iterator<Item = &str> {
    let mut current = key;
    std::iter::from_fn(move || {
        let cut = current.rfind(FALLBACK_SEPARATORS)?;
        current = &current[..cut];
        (!current.is_empty()).then_some(current)
    })
}
