//! Response-language handling.
//!
//! Every prompt sent to the model (summary request, live system instruction)
//! ends in a directive naming the language the answer must be written or
//! spoken in.

/// Language used when a tag is empty or unknown.
pub const DEFAULT_LANGUAGE: &str = "en";

const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("de", "German"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("hi", "Hindi"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("nl", "Dutch"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("vi", "Vietnamese"),
    ("zh", "Chinese"),
];

/// Reduce a BCP-47-ish tag (`"pt_BR"`, `"EN-us"`, `" fr "`) to its lowercase
/// primary subtag, falling back to [`DEFAULT_LANGUAGE`] when unrecognised.
pub fn normalize_language_tag(raw: &str) -> String {
    let primary = raw
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if language_name(&primary).is_some() {
        primary
    } else {
        DEFAULT_LANGUAGE.to_string()
    }
}

/// English display name for a normalised tag.
pub fn language_name(tag: &str) -> Option<&'static str> {
    KNOWN_LANGUAGES
        .iter()
        .find(|(code, _)| *code == tag)
        .map(|(_, name)| *name)
}

/// Sentence appended to prompts to pin the response language.
pub fn language_directive(tag: &str) -> String {
    let normalized = normalize_language_tag(tag);
    let name = language_name(&normalized).unwrap_or("English");
    format!("Respond only in {name}.")
}
