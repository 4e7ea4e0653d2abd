//! Naming rules for blobs written by the service.

/// Prefix under which generated images are stored.
pub const GENERATED_IMAGES_PREFIX: &str = "generated_images";

/// Prefix under which model directories are stored.
pub const MODELS_PREFIX: &str = "models";

const MAX_PROMPT_CHARS: usize = 100;
const EMPTY_PROMPT_STEM: &str = "image";

/// Turns a prompt into a key-safe file stem.
///
/// Spaces become underscores, ASCII letters, digits, `-` and `_` are kept,
/// and everything else is dropped, so the result never contains a path
/// separator or a character that needs escaping in a URL.
pub fn sanitize_prompt(prompt: &str) -> String {
    let stem: String = prompt
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .take(MAX_PROMPT_CHARS)
        .collect();
    if stem.is_empty() {
        EMPTY_PROMPT_STEM.to_string()
    } else {
        stem
    }
}

/// `<sanitized prompt>_<unix seconds>`, without extension.
pub fn image_key_stem(prompt: &str, timestamp: i64) -> String {
    format!("{}_{}", sanitize_prompt(prompt), timestamp)
}

/// Remote prefix holding the files of `model_name`.
pub fn model_prefix(model_name: &str) -> String {
    format!("{MODELS_PREFIX}/{}", model_name.trim_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_become_underscores() {
        assert_eq!(sanitize_prompt("a red fox"), "a_red_fox");
    }

    #[test]
    fn separators_and_punctuation_are_dropped() {
        assert_eq!(sanitize_prompt("../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_prompt("cat?dog#1 & more"), "catdog1__more");
        assert_eq!(sanitize_prompt("café-au-lait"), "caf-au-lait");
    }

    #[test]
    fn empty_result_falls_back() {
        assert_eq!(sanitize_prompt(""), "image");
        assert_eq!(sanitize_prompt("!!!"), "image");
    }

    #[test]
    fn long_prompts_are_truncated() {
        let prompt = "x".repeat(500);
        assert_eq!(sanitize_prompt(&prompt).len(), 100);
    }

    #[test]
    fn stem_embeds_timestamp() {
        assert_eq!(image_key_stem("a red fox", 1700000000), "a_red_fox_1700000000");
    }

    #[test]
    fn model_prefix_nests_under_models() {
        assert_eq!(
            model_prefix("stable-diffusion-small"),
            "models/stable-diffusion-small"
        );
        assert_eq!(model_prefix("/sd/"), "models/sd");
    }
}
