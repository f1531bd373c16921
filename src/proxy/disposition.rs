//! Filename and Content-Type derivation
//!
//! Picks the download name for a relayed file and builds the dual-form
//! `Content-Disposition` header sent to the client and stored in the cache.

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderMap;
use url::Url;

use crate::cache::EntryMeta;

/// Name used when nothing better is available
pub const FALLBACK_FILENAME: &str = "downloaded-file";

/// Content type used when the upstream sends none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extensions for common types, checked before the full MIME table
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("application/octet-stream", "bin"),
    ("application/pdf", "pdf"),
    ("application/json", "json"),
    ("application/zip", "zip"),
    ("application/xml", "xml"),
    ("application/javascript", "js"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/css", "css"),
    ("text/csv", "csv"),
    ("text/javascript", "js"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("audio/mpeg", "mp3"),
    ("video/mp4", "mp4"),
];

/// Headers derived once per cache miss
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub content_type: String,
    pub filename: String,
    /// Full `Content-Disposition` header value
    pub content_disposition: String,
}

impl ResponseDescriptor {
    /// The record persisted next to the cached body
    pub fn to_meta(&self) -> EntryMeta {
        EntryMeta {
            content_type: self.content_type.clone(),
            content_disposition: self.content_disposition.clone(),
        }
    }
}

/// Derive the response headers for a relayed file
///
/// Filename precedence: the caller's explicit name, then the upstream
/// `Content-Disposition`, then the last URL path segment, then
/// [`FALLBACK_FILENAME`]. Names without an extension get one from the
/// content type when a mapping exists.
pub fn derive(explicit: Option<&str>, headers: &HeaderMap, source_url: &str) -> ResponseDescriptor {
    let content_type = header_str(headers, CONTENT_TYPE.as_str())
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let name = explicit
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| {
            header_str(headers, CONTENT_DISPOSITION.as_str()).and_then(filename_from_disposition)
        })
        .or_else(|| filename_from_url(source_url))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

    let filename = with_extension(name, &content_type);
    let content_disposition = content_disposition(&filename);

    ResponseDescriptor {
        content_type,
        filename,
        content_disposition,
    }
}

/// Build `attachment; filename="..."; filename*=UTF-8''...`
///
/// The quoted form is restricted to printable ASCII with `"` and `\` escaped;
/// the extended form carries the exact name percent-encoded.
pub fn content_disposition(filename: &str) -> String {
    let mut simple = String::with_capacity(filename.len());
    for c in filename.chars() {
        match c {
            '"' => simple.push_str("\\\""),
            '\\' => simple.push_str("\\\\"),
            c if c.is_ascii() && !c.is_ascii_control() => simple.push(c),
            _ => simple.push('_'),
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        simple,
        urlencoding::encode(filename)
    )
}

/// Header value as text; raw UTF-8 is accepted since servers do send it
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
}

/// A filename found in a `Content-Disposition` header, by the form it was written in
#[derive(Debug, Clone, PartialEq, Eq)]
enum DispositionName {
    /// `filename*=UTF-8''percent%20encoded`
    Extended(String),
    /// `filename="quoted"`
    Quoted(String),
    /// `filename=bare-token`
    Token(String),
}

impl DispositionName {
    fn into_inner(self) -> String {
        match self {
            DispositionName::Extended(name)
            | DispositionName::Quoted(name)
            | DispositionName::Token(name) => name,
        }
    }
}

/// One `name=value` parameter of a header value
#[derive(Debug, Clone, PartialEq, Eq)]
struct Param {
    name: String,
    value: String,
    quoted: bool,
}

type DispositionParser = fn(&[Param]) -> Option<DispositionName>;

/// Tried in order; the first match wins
const DISPOSITION_PARSERS: [DispositionParser; 3] = [parse_extended, parse_quoted, parse_token];

fn filename_from_disposition(header: &str) -> Option<String> {
    let params = split_params(header);
    DISPOSITION_PARSERS
        .iter()
        .find_map(|parse| parse(&params))
        .map(DispositionName::into_inner)
        .map(|name| last_path_component(&name).to_string())
        .filter(|name| !name.is_empty())
}

fn parse_extended(params: &[Param]) -> Option<DispositionName> {
    let param = params.iter().find(|p| p.name == "filename*")?;
    let mut parts = param.value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;

    let name = if charset.eq_ignore_ascii_case("utf-8") {
        urlencoding::decode(encoded).ok()?.into_owned()
    } else if charset.eq_ignore_ascii_case("iso-8859-1") {
        urlencoding::decode_binary(encoded.as_bytes())
            .iter()
            .map(|&b| char::from(b))
            .collect()
    } else {
        return None;
    };
    Some(DispositionName::Extended(name))
}

fn parse_quoted(params: &[Param]) -> Option<DispositionName> {
    params
        .iter()
        .find(|p| p.name == "filename" && p.quoted)
        .map(|p| DispositionName::Quoted(p.value.clone()))
}

fn parse_token(params: &[Param]) -> Option<DispositionName> {
    let param = params.iter().find(|p| p.name == "filename" && !p.quoted)?;
    let name = urlencoding::decode(&param.value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| param.value.clone());
    Some(DispositionName::Token(name))
}

/// Split a header value into its `;`-separated parameters
///
/// Parameters that cannot be parsed (no `=`, unterminated quotes) are dropped.
fn split_params(header: &str) -> Vec<Param> {
    let mut params = Vec::new();
    let mut rest = header;

    while !rest.is_empty() {
        let (segment, tail) = next_segment(rest);
        rest = tail;

        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        let param = if let Some(inner) = value.strip_prefix('"') {
            match unquote(inner) {
                Some(value) => Param {
                    name,
                    value,
                    quoted: true,
                },
                None => continue,
            }
        } else {
            Param {
                name,
                value: value.to_string(),
                quoted: false,
            }
        };
        params.push(param);
    }

    params
}

/// Take text up to the next `;` that is not inside quotes
fn next_segment(input: &str) -> (&str, &str) {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => return (&input[..i], &input[i + 1..]),
            _ => {}
        }
    }
    (input, "")
}

/// Read a quoted-string body (after the opening quote), undoing backslash escapes
fn unquote(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return Some(out),
            c => out.push(c),
        }
    }
    None
}

fn filename_from_url(source_url: &str) -> Option<String> {
    let url = Url::parse(source_url).ok()?;
    let segment = url.path_segments()?.last()?;
    if segment.is_empty() {
        return None;
    }
    let name = urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(name).filter(|name| !name.is_empty() && name != "/")
}

fn last_path_component(name: &str) -> &str {
    name.rsplit(&['/', '\\'][..]).next().unwrap_or(name).trim()
}

fn has_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

fn with_extension(name: String, content_type: &str) -> String {
    if has_extension(&name) {
        return name;
    }
    match extension_for(content_type) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    }
}

/// File extension for a content type, ignoring parameters such as charset
fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    PREFERRED_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&essence).and_then(|exts| exts.first().copied())
        })
}
