use reqwest::Url;
use std::fs;

/// Wrap `text` in an OSC8 terminal hyperlink to `url`
pub fn osc8_link(url: &str, text: &str) -> String {
    format!("\x1b]8;;{}\x1b\\{}\x1b]8;;\x1b\\", url, text)
}

/// OSC8 file:// hyperlink, using the absolute path when it can be resolved
pub fn osc8_file_link(path: &str, text: &str) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());
    osc8_link(&format!("file://{}", abs_path), text)
}

/// Last non-empty path segment of a results-page URL ("porsche" for
/// `https://bringatrailer.com/porsche/`), used to name the output file.
pub fn category_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
}
