/// Metadata pulled out of an HTML response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
}

/// Seam for a real extractor to be swapped in without touching the fetch
/// path. `extract` is deliberately a pure function of `(body, url)` — no
/// network or filesystem access.
pub trait Extractor: Send + Sync {
    fn extract(&self, body: &[u8], url: &str) -> ExtractedMetadata;
}

/// Minimal reference implementation: first `<title>`, first
/// `<meta name="description">`, and `<html lang="...">`. Not a general HTML
/// parser — good enough to exercise the fetch path and its tests, not a
/// substitute for a real metadata extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl Extractor for DefaultExtractor {
    fn extract(&self, body: &[u8], _url: &str) -> ExtractedMetadata {
        let text = String::from_utf8_lossy(body);
        ExtractedMetadata {
            title: extract_title(&text),
            description: extract_meta_description(&text),
            language: extract_html_lang(&text),
        }
    }
}

fn extract_title(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let raw = text[open_end..close].trim();
    if raw.is_empty() {
        None
    } else {
        Some(html_unescape(raw))
    }
}

fn extract_meta_description(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(rel_start) = lower[search_from..].find("<meta") {
        let start = search_from + rel_start;
        let tag_end = lower[start..].find('>').map(|i| start + i)?;
        let tag = &text[start..tag_end];
        let tag_lower = &lower[start..tag_end];
        if tag_lower.contains("name=\"description\"") || tag_lower.contains("name='description'") {
            return extract_attr(tag, "content").map(|s| html_unescape(&s));
        }
        search_from = tag_end + 1;
    }
    None
}

fn extract_html_lang(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("<html")?;
    let tag_end = lower[start..].find('>').map(|i| start + i)?;
    let tag = &text[start..tag_end];
    extract_attr(tag, "lang")
}

/// Pull `name="value"` (or single-quoted) out of a raw tag slice.
fn extract_attr(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let needle = format!("{name}=");
    let attr_start = lower.find(&needle)? + needle.len();
    let rest = &tag[attr_start..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value_start = 1;
    let value_end = rest[value_start..].find(quote)? + value_start;
    let value = rest[value_start..value_end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn html_unescape(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_description_and_lang() {
        let html = r#"<html lang="en"><head>
            <title>Example Domain</title>
            <meta name="description" content="An example page">
            </head><body></body></html>"#;
        let meta = DefaultExtractor.extract(html.as_bytes(), "https://example.com");
        assert_eq!(meta.title.as_deref(), Some("Example Domain"));
        assert_eq!(meta.description.as_deref(), Some("An example page"));
        assert_eq!(meta.language.as_deref(), Some("en"));
    }

    #[test]
    fn missing_fields_are_none() {
        let html = "<html><body>no metadata here</body></html>";
        let meta = DefaultExtractor.extract(html.as_bytes(), "https://example.com");
        assert_eq!(meta, ExtractedMetadata::default());
    }

    #[test]
    fn unescapes_entities_in_title() {
        let html = "<html><head><title>Fish &amp; Chips</title></head></html>";
        let meta = DefaultExtractor.extract(html.as_bytes(), "https://example.com");
        assert_eq!(meta.title.as_deref(), Some("Fish & Chips"));
    }
}
