//! Readable title/text extraction from raw HTML.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Containers tried in order when looking for the main content.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "div.content",
    "div.main",
    "div.article",
    "body",
];

/// Elements whose text never counts as page content.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "noscript", "template", "svg",
];

static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static TITLE: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("title").ok());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Extract `(title, text)` from an HTML document.
///
/// Title comes from `<title>` (falling back to `"Untitled"`); text is the
/// whitespace-collapsed content of the first matching content container
/// with chrome (nav, header, footer, scripts) removed.
pub(crate) fn extract_page(html: &str) -> (String, String) {
    let doc = Html::parse_document(html);

    let title = TITLE
        .as_ref()
        .and_then(|sel| doc.select(sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let text = CONTENT
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(readable_text)
        .unwrap_or_default();

    (title, text)
}

/// Collect the text under `root`, skipping chrome elements.
fn readable_text(root: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let in_chrome = node
            .ancestors()
            .take_while(|a| a.id() != root.id())
            .filter_map(|a| a.value().as_element())
            .any(|el| SKIPPED_TAGS.contains(&el.name()));

        if !in_chrome {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
    }

    collapse_whitespace(&parts.join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_main_and_strips_chrome() {
        let html = r#"<html><head><title> Tokio   Guide </title></head><body>
            <header>Site header</header>
            <nav>Home | Docs</nav>
            <main>
                <h1>Spawning</h1>
                <p>Use   <code>tokio::spawn</code>
                   to run tasks.</p>
                <script>var tracking = 1;</script>
                <aside>Related links</aside>
            </main>
            <footer>Copyright</footer>
        </body></html>"#;

        let (title, text) = extract_page(html);
        assert_eq!(title, "Tokio Guide");
        assert_eq!(text, "Spawning Use tokio::spawn to run tasks.");
    }

    #[test]
    fn falls_back_to_article_then_body() {
        let html = "<html><body><div>outside</div><article><p>Inside article</p></article></body></html>";
        let (_, text) = extract_page(html);
        assert_eq!(text, "Inside article");

        let html = "<html><body><nav>menu</nav><p>Just a body</p></body></html>";
        let (title, text) = extract_page(html);
        assert_eq!(title, "Untitled");
        assert_eq!(text, "Just a body");
    }

    #[test]
    fn content_div_is_recognized() {
        let html = r#"<html><body><div class="sidebar">side</div><div class="content">Real text</div></body></html>"#;
        let (_, text) = extract_page(html);
        assert_eq!(text, "Real text");
    }

    #[test]
    fn empty_document_has_no_text() {
        let (title, text) = extract_page("");
        assert_eq!(title, "Untitled");
        assert!(text.is_empty());
    }
}
