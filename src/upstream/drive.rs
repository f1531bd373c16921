//! Google Drive share links
//!
//! Detects Drive file-sharing URLs and scrapes the "can't scan for viruses"
//! interstitial that Drive serves instead of large files.

use std::sync::LazyLock;

use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::HeaderMap;
use regex::Regex;
use url::Url;

static SHARE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://drive\.google\.com/(?:file/d/|open\?id=)([A-Za-z0-9_-]+)").unwrap()
});
static DOWNLOAD_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<form\b([^>]*\bid="download-form"[^>]*)>(.*?)</form>"#).unwrap()
});
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b([a-z-]+)="([^"]*)""#).unwrap());
static INPUT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<input\b([^>]*)>").unwrap());

/// Extract the file id from a `.../file/d/{id}` or `.../open?id={id}` share URL
pub fn extract_file_id(raw_url: &str) -> Option<&str> {
    SHARE_LINK
        .captures(raw_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// The direct-download endpoint for a file id
pub fn export_url(base: &Url, file_id: &str) -> Result<Url, url::ParseError> {
    let mut url = base.join("/uc")?;
    url.query_pairs_mut()
        .append_pair("export", "download")
        .append_pair("id", file_id);
    Ok(url)
}

/// Whether a response is an HTML page rather than the file itself
pub fn is_interstitial(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}

/// Session cookies issued with the interstitial, as a `Cookie` header value
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Absolute confirmation URL from the interstitial's download form
///
/// Relative actions resolve against `base`. Hidden inputs inside the form are
/// appended to the query, which is how the form would submit itself.
pub fn confirmation_url(html: &str, base: &Url) -> Option<Url> {
    let form = DOWNLOAD_FORM.captures(html)?;
    let action = attribute(&form[1], "action")?;
    if action.is_empty() {
        return None;
    }
    let mut url = base.join(&action).ok()?;

    let hidden: Vec<(String, String)> = INPUT
        .captures_iter(&form[2])
        .filter_map(|input| {
            let attrs = &input[1];
            let kind = attribute(attrs, "type")?;
            if !kind.eq_ignore_ascii_case("hidden") {
                return None;
            }
            Some((attribute(attrs, "name")?, attribute(attrs, "value").unwrap_or_default()))
        })
        .collect();

    if !hidden.is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in &hidden {
            query.append_pair(name, value);
        }
    }

    Some(url)
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    ATTRIBUTE
        .captures_iter(attrs)
        .find(|caps| caps[1].eq_ignore_ascii_case(name))
        .map(|caps| decode_entities(&caps[2]))
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
