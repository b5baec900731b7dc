//! Prompts understood by DeepSeek-OCR.
//!
//! The model is steered by short task phrases rather than long instructions.
//! The `<|grounding|>` prefix asks it to emit `<|ref|>`/`<|det|>` reference
//! regions alongside the text, which is what lets figures be cropped back out
//! of the page (see [`crate::pipeline::postprocess::embed_images`]).

/// Default prompt: structured Markdown with grounding regions.
pub const DEFAULT_PROMPT: &str = "<|grounding|>Convert the document to markdown.";

/// Plain transcription without layout markup.
pub const FREE_OCR_PROMPT: &str = "Free OCR.";

/// Describe a chart or figure instead of transcribing text.
pub const FIGURE_PROMPT: &str = "Parse the figure.";

/// Named presets accepted wherever a prompt is configured.
pub const PRESETS: &[(&str, &str)] = &[
    ("markdown", DEFAULT_PROMPT),
    ("free", FREE_OCR_PROMPT),
    ("figure", FIGURE_PROMPT),
];

/// Expand a preset name into its prompt; anything else is used verbatim.
pub fn resolve(prompt_or_preset: &str) -> String {
    PRESETS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(prompt_or_preset.trim()))
        .map(|(_, prompt)| prompt.to_string())
        .unwrap_or_else(|| prompt_or_preset.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_expand() {
        assert_eq!(resolve("markdown"), DEFAULT_PROMPT);
        assert_eq!(resolve(" Free "), FREE_OCR_PROMPT);
    }

    #[test]
    fn custom_prompt_passes_through() {
        assert_eq!(resolve("Transcribe the table."), "Transcribe the table.");
    }

    #[test]
    fn default_prompt_requests_grounding() {
        assert!(DEFAULT_PROMPT.starts_with("<|grounding|>"));
    }
}
