//! HTML pages for the browser front end.

use crate::config::{ConversionConfig, MAX_DPI, MIN_DPI};
use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use html_escape::{encode_double_quoted_attribute, encode_text};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use std::path::Path;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 72rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
h1 { font-size: 1.5rem; }
form label { display: block; margin: .75rem 0 .25rem; font-weight: 600; }
input[type=text] { width: 100%; }
.panes { display: grid; grid-template-columns: 1fr 1fr; gap: 1rem; }
pre.source { white-space: pre-wrap; word-break: break-word; background: #f6f8fa; padding: 1rem; max-height: 70vh; overflow: auto; }
.preview { border: 1px solid #ddd; padding: 1rem; max-height: 70vh; overflow: auto; }
.preview img { max-width: 100%; }
.error { color: #a40000; background: #fff0f0; padding: 1rem; border: 1px solid #e0b4b4; }
"#;

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        encode_text(title)
    )
}

/// Upload form pre-filled from the server's defaults.
pub fn index_page(config: &ConversionConfig) -> String {
    let checked = if config.clean { " checked" } else { "" };
    let body = format!(
        r#"<h1>Document to Markdown</h1>
<p>Upload a PDF or an image (PNG, JPEG). Each page is read by the OCR model and returned as Markdown.</p>
<form method="post" action="/ui/convert" enctype="multipart/form-data">
  <label for="file">File</label>
  <input id="file" type="file" name="file" accept=".pdf,.png,.jpg,.jpeg" required>
  <label for="dpi">DPI (PDF rendering)</label>
  <input id="dpi" type="number" name="dpi" min="{MIN_DPI}" max="{MAX_DPI}" value="{dpi}">
  <label for="prompt">Prompt</label>
  <input id="prompt" type="text" name="prompt" value="{prompt}">
  <label><input type="hidden" name="clean" value="false"><input type="checkbox" name="clean" value="true"{checked}> Clean output (strip model markup, fix LaTeX)</label>
  <p><button type="submit">Convert</button></p>
</form>"#,
        dpi = config.dpi,
        prompt = encode_double_quoted_attribute(&config.prompt),
    );
    page("ocr2md", &body)
}

/// Result page: raw source, rendered preview and a download link.
pub fn result_page(source_name: &str, markdown: &str) -> String {
    let download_name = download_name(source_name);
    let href = format!(
        "data:text/markdown;charset=utf-8;base64,{}",
        STANDARD.encode(markdown.as_bytes())
    );
    let body = format!(
        r#"<h1>{title}</h1>
<p><a href="{href}" download="{download}">Download {download_text}</a> · <a href="/">Convert another file</a></p>
<div class="panes">
<section><h2>Markdown</h2><pre class="source">{source}</pre></section>
<section><h2>Preview</h2><div class="preview">{preview}</div></section>
</div>"#,
        title = encode_text(source_name),
        href = href,
        download = encode_double_quoted_attribute(&download_name),
        download_text = encode_text(&download_name),
        source = encode_text(markdown),
        preview = render_preview(markdown),
    );
    page(&format!("{source_name} · ocr2md"), &body)
}

pub fn error_page(status: StatusCode, detail: &str) -> String {
    let body = format!(
        r#"<h1>Conversion failed</h1>
<p class="error"><strong>{status}</strong><br>{detail}</p>
<p><a href="/">Back</a></p>"#,
        status = encode_text(&status.to_string()),
        detail = encode_text(detail),
    );
    page("Conversion failed · ocr2md", &body)
}

/// `{stem}.md` for an uploaded file name.
pub fn download_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}.md")
}

/// Render Markdown to HTML. Raw HTML in the model output is shown as text,
/// comments are dropped and link targets with unsafe schemes become `#`.
pub fn render_preview(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let events = Parser::new_ext(markdown, options).filter_map(|event| match event {
        Event::Html(raw) => {
            if raw.trim_start().starts_with("<!--") {
                None
            } else {
                Some(Event::Text(raw))
            }
        }
        Event::Start(tag) => Some(Event::Start(neutralise_destination(tag))),
        Event::End(tag) => Some(Event::End(neutralise_destination(tag))),
        other => Some(other),
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn neutralise_destination(tag: Tag<'_>) -> Tag<'_> {
    match tag {
        Tag::Link(kind, dest, title) if !is_safe_destination(&dest, false) => {
            Tag::Link(kind, CowStr::Borrowed("#"), title)
        }
        Tag::Image(kind, dest, title) if !is_safe_destination(&dest, true) => {
            Tag::Image(kind, CowStr::Borrowed("#"), title)
        }
        other => other,
    }
}

/// Relative targets and http(s)/mailto are allowed; images may also be
/// inline `data:image/` URIs (embedded figures).
fn is_safe_destination(dest: &str, image: bool) -> bool {
    // Browsers ignore whitespace and control characters inside a scheme.
    let compact: String = dest
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    match compact.split_once(':') {
        Some((scheme, _)) if !scheme.contains(['/', '?', '#']) => {
            matches!(scheme, "http" | "https" | "mailto")
                || (image && compact.starts_with("data:image/"))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_names() {
        assert_eq!(download_name("report.pdf"), "report.md");
        assert_eq!(download_name("scan.final.PNG"), "scan.final.md");
        assert_eq!(download_name(""), "document.md");
    }

    #[test]
    fn preview_escapes_raw_html_and_drops_comments() {
        let html = render_preview("<!-- Page 1 -->\n\n# Title\n\n<script>alert(1)</script>\n");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(!html.contains("<script>"));
        assert!(!html.contains("Page 1"));
    }

    #[test]
    fn preview_neutralises_script_links() {
        let html = render_preview(
            "[click](javascript:alert(1)) ![x](JaVaScRiPt:alert(2)) [ok](https://example.com/a)\n",
        );
        assert!(!html.to_ascii_lowercase().contains("javascript"), "{html}");
        assert!(html.contains("href=\"#\""));
        assert!(html.contains("href=\"https://example.com/a\""));
    }

    #[test]
    fn preview_keeps_embedded_figures() {
        let html = render_preview("![image](data:image/png;base64,iVBORw0KGgo=)\n");
        assert!(html.contains("src=\"data:image/png;base64,iVBORw0KGgo=\""), "{html}");
        let html = render_preview("[doc](data:text/html;base64,PHNjcmlwdD4=)\n");
        assert!(!html.contains("data:text/html"), "{html}");
    }

    #[test]
    fn destination_schemes() {
        assert!(is_safe_destination("page2.md#top", false));
        assert!(is_safe_destination("mailto:a@b.c", false));
        assert!(!is_safe_destination("java\tscript:alert(1)", false));
        assert!(!is_safe_destination("vbscript:x", true));
        assert!(!is_safe_destination("data:image/png;base64,AA", false));
    }

    #[test]
    fn preview_renders_tables() {
        let html = render_preview("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn result_page_escapes_source() {
        let page = result_page("a<b>.pdf", "x < y & z");
        assert!(page.contains("x &lt; y &amp; z"));
        assert!(page.contains("download=\"a&lt;b&gt;.md\""));
        assert!(!page.contains("<b>"));
    }

    #[test]
    fn index_defaults() {
        let page = index_page(&ConversionConfig::default());
        assert!(page.contains("value=\"200\""));
        assert!(page.contains("&lt;|grounding|&gt;"));
        assert!(page.contains(" checked>"));
    }
}
