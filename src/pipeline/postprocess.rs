//! Post-processing: turn raw DeepSeek-OCR output into clean Markdown.
//!
//! With a `<|grounding|>` prompt the model interleaves its Markdown with
//! reference regions:
//!
//! ```text
//! <|ref|>title<|/ref|><|det|>[[80, 40, 920, 90]]<|/det|>
//! # Quarterly Report
//! <|ref|>image<|/ref|><|det|>[[100, 200, 600, 500]]<|/det|>
//! ```
//!
//! Coordinates are normalised to a 0–1000 grid over the page image. Two passes
//! run, always in this order:
//!
//! 1. [`embed_images`] crops every `image` region out of the page and inlines
//!    it as a `data:` URI, so figures survive the conversion.
//! 2. [`clean_text`] drops the remaining markup, rewrites LaTeX delimiters
//!    to dollar form and tidies whitespace.

use crate::pipeline::encode;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;
use tracing::{debug, warn};

/// Coordinate grid the model reports boxes on.
const GRID: f64 = 1000.0;

static RE_REF_DET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<\|ref\|>(.*?)<\|/ref\|>\s*<\|det\|>\s*\[\[(.*?)\]\]\s*<\|/det\|>").unwrap()
});

/// Replace `image` reference regions with cropped, base64-inlined PNGs.
///
/// Regions of any other kind, and regions whose box cannot be used
/// (unparsable, not exactly four numbers, empty after scaling), are left
/// exactly as they were.
pub fn embed_images(text: &str, page: &DynamicImage) -> String {
    RE_REF_DET
        .replace_all(text, |caps: &Captures| {
            let whole = caps[0].to_string();
            if caps[1].trim() != "image" {
                return whole;
            }
            match crop_region(page, &caps[2]) {
                Ok(uri) => format!("![image]({uri})"),
                Err(reason) => {
                    warn!("Failed to extract image region [[{}]]: {}", &caps[2], reason);
                    whole
                }
            }
        })
        .into_owned()
}

/// [`embed_images`] against an image on disk, decoded only when the text
/// actually references an `image` region.
pub fn embed_images_from_file(text: &str, page_path: &Path) -> String {
    let wanted = RE_REF_DET
        .captures_iter(text)
        .any(|c| c[1].trim() == "image");
    if !wanted {
        return text.to_string();
    }
    match image::open(page_path) {
        Ok(page) => embed_images(text, &page),
        Err(e) => {
            warn!("Cannot open {} for figure crops: {}", page_path.display(), e);
            text.to_string()
        }
    }
}

fn crop_region(page: &DynamicImage, coords: &str) -> Result<String, String> {
    let values = coords
        .split(',')
        .map(|c| c.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("bad coordinate: {e}"))?;
    let [x1, y1, x2, y2] = values[..] else {
        return Err(format!("expected 4 coordinates, got {}", values.len()));
    };

    let (w, h) = (page.width() as f64, page.height() as f64);
    let scale = |v: f64, extent: f64| (v / GRID * extent).clamp(0.0, extent) as u32;
    let (left, top) = (scale(x1, w), scale(y1, h));
    let (right, bottom) = (scale(x2, w), scale(y2, h));
    if right <= left || bottom <= top {
        return Err(format!("empty region {left},{top} → {right},{bottom}"));
    }

    debug!("Cropping figure {}x{} at ({}, {})", right - left, bottom - top, left, top);
    let cropped = page.crop_imm(left, top, right - left, bottom - top);
    encode::png_data_uri(&cropped).map_err(|e| e.to_string())
}

/// Remove model markup and normalise the text.
///
/// Rules (applied in order):
/// 1. Normalise line endings and strip invisible Unicode
/// 2. Strip an outer ```` ```markdown ```` / ```` ```md ```` fence around the
///    whole output (untagged or other-language fences stay)
/// 3. Remove `<|ref|>…<|/ref|>` blocks
/// 4. Remove `<|det|>[[…]]<|/det|>` coordinate blocks
/// 5. Remove any remaining `<|tag|>` / `<|/tag|>` tokens
/// 6. `\(…\)` → `$…$` and `\[…\]` → `$$…$$`
/// 7. Trim trailing whitespace outside math and collapse runs of blank lines
///    to one
///
/// The rules are re-applied until the text stops changing, so removing one
/// token can never expose another that survives, and
/// `clean_text(clean_text(s)) == clean_text(s)`.
pub fn clean_text(input: &str) -> String {
    let mut current = clean_once(input);
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_once(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_markdown_fences(&s);
    let s = remove_ref_blocks(&s);
    let s = remove_det_blocks(&s);
    let s = remove_stray_tags(&s);
    let s = rewrite_latex(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

// ── Rule 1: Line endings and invisible characters ────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' // zero-width space
                | '\u{200C}' // zero-width non-joiner
                | '\u{200D}' // zero-width joiner
                | '\u{2060}' // word joiner
                | '\u{FEFF}' // BOM
                | '\u{00AD}' // soft hyphen
            )
        })
        .collect()
}

// ── Rule 2: Outer fence ──────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)\n(.*)\n```$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rules 3–5: Model markup ──────────────────────────────────────────────────

static RE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<\|ref\|>.*?<\|/ref\|>").unwrap());

static RE_DET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<\|det\|>\s*\[\[.*?\]\]\s*<\|/det\|>").unwrap());

static RE_STRAY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|/?[A-Za-z0-9_+-]+\|>").unwrap());

fn remove_ref_blocks(input: &str) -> String {
    RE_REF.replace_all(input, "").into_owned()
}

fn remove_det_blocks(input: &str) -> String {
    RE_DET.replace_all(input, "").into_owned()
}

fn remove_stray_tags(input: &str) -> String {
    RE_STRAY_TAG.replace_all(input, "").into_owned()
}

// ── Rule 6: LaTeX delimiters ─────────────────────────────────────────────────

static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\((.*?)\\\)").unwrap());

static RE_DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]").unwrap());

fn rewrite_latex(input: &str) -> String {
    let s = RE_INLINE_MATH.replace_all(input, |c: &Captures| format!("${}$", &c[1]));
    RE_DISPLAY_MATH
        .replace_all(&s, |c: &Captures| format!("$${}$$", &c[1]))
        .into_owned()
}

// ── Rule 7: Whitespace ───────────────────────────────────────────────────────

static RE_MATH_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$.*?\$\$|\$[^$]*?\$").unwrap());

/// Trims line ends outside `$…$` / `$$…$$`; math bodies are kept verbatim.
fn trim_trailing_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for m in RE_MATH_SPAN.find_iter(input) {
        push_trimmed(&mut out, &input[last..m.start()], false);
        out.push_str(m.as_str());
        last = m.end();
    }
    push_trimmed(&mut out, &input[last..], true);
    out
}

fn push_trimmed(out: &mut String, text: &str, at_end: bool) {
    let mut pieces = text.split('\n').peekable();
    while let Some(piece) = pieces.next() {
        if pieces.peek().is_some() {
            out.push_str(piece.trim_end());
            out.push('\n');
        } else if at_end {
            out.push_str(piece.trim_end());
        } else {
            out.push_str(piece);
        }
    }
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn test_remove_ref_and_det() {
        let raw = "<|ref|>title<|/ref|><|det|>[[80, 40, 920, 90]]<|/det|>\n# Report";
        assert_eq!(clean_text(raw), "# Report");
    }

    #[test]
    fn test_det_spanning_lines() {
        let raw = "a <|det|>\n[[1, 2, 3, 4],\n[5, 6, 7, 8]]\n<|/det|> b";
        assert_eq!(clean_text(raw), "a  b");
    }

    #[test]
    fn test_remove_stray_tags() {
        let raw = "<|grounding|>Hello <|/ref|>world<|end_of_sentence|>";
        assert_eq!(clean_text(raw), "Hello world");
    }

    #[test]
    fn test_inline_math() {
        assert_eq!(clean_text(r"Energy \(E = mc^2\) holds."), "Energy $E = mc^2$ holds.");
    }

    #[test]
    fn test_display_math_multiline() {
        let raw = "Sum:\n\\[\n\\sum_{i=1}^{n} i\n\\]\nEnd";
        assert_eq!(clean_text(raw), "Sum:\n$$\n\\sum_{i=1}^{n} i\n$$\nEnd");
    }

    #[test]
    fn test_math_content_preserved() {
        let raw = r"\(\frac{a}{b} \cdot \alpha_{1}\)";
        assert_eq!(clean_text(raw), r"$\frac{a}{b} \cdot \alpha_{1}$");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\n  \n\t\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(clean_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(clean_text("hel\u{200B}lo\u{FEFF}"), "hello");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(clean_text("```markdown\n# Title\n\nBody\n```"), "# Title\n\nBody");
    }

    #[test]
    fn test_inner_fence_untouched() {
        let md = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(clean_text(md), md);
    }

    #[test]
    fn test_no_markers_left() {
        let raw = "<|ref|>text<|/ref|><|det|>[[1,2,3,4]]<|/det|>\nBody <|ref|>x<|/ref|> end\n<|det|>[[9,9,9,9]]<|/det|>";
        let out = clean_text(raw);
        assert!(!out.contains("<|"), "markers left in: {out}");
        assert!(!out.contains("[["), "coordinates left in: {out}");
    }

    #[test]
    fn test_nested_token_exposed_by_removal() {
        // Removing the inner token forms a new `<|ref|>` tag that must also go.
        let raw = "<|<|x|>ref|>keep";
        assert_eq!(clean_text(raw), "keep");
    }

    #[test]
    fn test_markdown_fence_unwrapped() {
        assert_eq!(clean_text("```markdown\n# T\n```"), "# T");
        assert_eq!(clean_text("```md\n# T\n```"), "# T");
    }

    #[test]
    fn test_bare_code_block_survives() {
        let code = "```\nfn main() {}\n```";
        assert_eq!(clean_text(code), code);
        let tagged = "```rust\nlet x = 1;\n```";
        assert_eq!(clean_text(tagged), tagged);
    }

    #[test]
    fn test_math_body_keeps_trailing_spaces() {
        assert_eq!(clean_text("\\[\n  x = 1   \n\\]"), "$$\n  x = 1   \n$$");
        assert_eq!(clean_text("a  \n$$\ny  \n$$  \nb  "), "a\n$$\ny  \n$$\nb");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "<|ref|>title<|/ref|><|det|>[[1,2,3,4]]<|/det|>\n# T\n\n\n\\(x\\) and \\[y\\]\n",
            "```markdown\nplain\n```",
            "\\[\n  x = 1   \n\\]\ncost  \n",
            r"\( a \( b \) c \)",
            "<|<|x|>ref|>k<|/<|y|>ref|>tail",
            "  lead\n\n\n\ntrail   \n",
            "",
        ];
        for s in samples {
            let once = clean_text(s);
            assert_eq!(clean_text(&once), once, "not idempotent for {s:?}");
        }
    }

    fn quadrant_page() -> DynamicImage {
        // 200x100: left half red, right half blue.
        let mut img = RgbaImage::new(200, 100);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = if x < 100 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            };
        }
        DynamicImage::ImageRgba8(img)
    }

    fn decode_embedded(md: &str) -> DynamicImage {
        let b64 = md
            .strip_prefix("![image](data:image/png;base64,")
            .and_then(|s| s.strip_suffix(')'))
            .expect("embedded image link");
        image::load_from_memory(&STANDARD.decode(b64).unwrap()).unwrap()
    }

    #[test]
    fn test_embed_image_crops_region() {
        let text = "<|ref|>image<|/ref|><|det|>[[500, 0, 1000, 500]]<|/det|>";
        let out = embed_images(text, &quadrant_page());
        let crop = decode_embedded(&out);
        assert_eq!(crop.dimensions(), (100, 50));
        assert_eq!(crop.get_pixel(10, 10), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_embed_keeps_other_kinds() {
        let text = "<|ref|>table<|/ref|><|det|>[[0, 0, 500, 500]]<|/det|>";
        assert_eq!(embed_images(text, &quadrant_page()), text);
    }

    #[test]
    fn test_embed_keeps_malformed_boxes() {
        let page = quadrant_page();
        for text in [
            "<|ref|>image<|/ref|><|det|>[[a, 0, 10, 10]]<|/det|>",
            "<|ref|>image<|/ref|><|det|>[[0, 0, 10]]<|/det|>",
            "<|ref|>image<|/ref|><|det|>[[0, 0, 10, 10], [20, 20, 30, 30]]<|/det|>",
            "<|ref|>image<|/ref|><|det|>[[500, 500, 500, 900]]<|/det|>",
        ] {
            assert_eq!(embed_images(text, &page), text);
        }
    }

    #[test]
    fn test_embed_then_clean_keeps_figure() {
        let text = "Intro\n<|ref|>image<|/ref|><|det|>[[0, 0, 500, 1000]]<|/det|>\nOutro";
        let out = clean_text(&embed_images(text, &quadrant_page()));
        assert!(out.starts_with("Intro\n![image](data:image/png;base64,"));
        assert!(out.ends_with(")\nOutro"));
    }

    #[test]
    fn test_embed_from_file_skips_decode_without_figures() {
        let text = "<|ref|>text<|/ref|><|det|>[[0,0,1,1]]<|/det|>";
        let missing = Path::new("/nonexistent/page_1.png");
        assert_eq!(embed_images_from_file(text, missing), text);
    }
}
