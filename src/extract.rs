//! Text extraction from raw file content.
//!
//! Extraction is dispatched through an [`ExtractorRegistry`] keyed by
//! [`TypeHint`]. The built-in registry handles plain text, JSON, HTML and
//! XML. PDF and Word documents have no built-in extractor; hosts that need
//! them register their own [`ContentExtractor`].

use std::{collections::HashMap, fmt, path::Path, sync::Arc};

use crate::error::{Error, Result};

/// Coarse content type derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeHint {
    PlainText,
    Html,
    Xml,
    Pdf,
    WordDoc,
    StructuredData,
}

impl TypeHint {
    /// Map a file extension (without the dot, any case) to a type hint.
    /// Unknown extensions read as plain text.
    ///
    /// # Examples
    ///
    /// ```
    /// use kbase::extract::TypeHint;
    ///
    /// assert_eq!(TypeHint::from_extension("HTM"), TypeHint::Html);
    /// assert_eq!(TypeHint::from_extension("rs"), TypeHint::PlainText);
    /// ```
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::WordDoc,
            "html" | "htm" => Self::Html,
            "xml" => Self::Xml,
            "json" => Self::StructuredData,
            _ => Self::PlainText,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::PlainText)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Html => "html",
            Self::Xml => "xml",
            Self::Pdf => "pdf",
            Self::WordDoc => "docx",
            Self::StructuredData => "json",
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Turns raw file bytes into plain text.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], hint: TypeHint) -> Result<String>;
}

/// Dispatches extraction to the extractor registered for a type hint.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<TypeHint, Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    /// A registry with no extractors at all.
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Plain text, JSON, HTML and XML extractors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(TypeHint::PlainText, Arc::new(PlainTextExtractor));
        registry.register(TypeHint::StructuredData, Arc::new(JsonExtractor));
        registry.register(TypeHint::Html, Arc::new(HtmlExtractor));
        registry.register(TypeHint::Xml, Arc::new(XmlExtractor));
        registry
    }

    /// Register (or replace) the extractor for `hint`.
    pub fn register(
        &mut self,
        hint: TypeHint,
        extractor: Arc<dyn ContentExtractor>,
    ) {
        self.extractors.insert(hint, extractor);
    }

    pub fn supports(&self, hint: TypeHint) -> bool {
        self.extractors.contains_key(&hint)
    }

    pub fn extract(&self, bytes: &[u8], hint: TypeHint) -> Result<String> {
        let extractor = self
            .extractors
            .get(&hint)
            .ok_or_else(|| Error::UnsupportedType(hint.name().to_string()))?;
        extractor.extract(bytes, hint)
    }

    /// Read `path` and extract it according to its extension.
    pub fn extract_file(&self, path: &Path) -> Result<String> {
        let hint = TypeHint::from_path(path);
        if !self.supports(hint) {
            return Err(Error::UnsupportedType(hint.name().to_string()));
        }
        let bytes = std::fs::read(path)?;
        self.extract(&bytes, hint)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hints: Vec<_> = self.extractors.keys().map(|h| h.name()).collect();
        hints.sort_unstable();
        f.debug_struct("ExtractorRegistry")
            .field("hints", &hints)
            .finish()
    }
}

/// UTF-8 text, returned as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], _hint: TypeHint) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Extraction {
            kind: "text",
            message: e.to_string(),
        })
    }
}

/// JSON documents, re-serialized with indentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl ContentExtractor for JsonExtractor {
    fn extract(&self, bytes: &[u8], _hint: TypeHint) -> Result<String> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| Error::Extraction {
                kind: "json",
                message: e.to_string(),
            })?;
        serde_json::to_string_pretty(&value).map_err(|e| Error::Extraction {
            kind: "json",
            message: e.to_string(),
        })
    }
}

/// HTML body text with scripts, styles and the document head removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

const HTML_SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template"];

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, bytes: &[u8], _hint: TypeHint) -> Result<String> {
        let source = decode_markup(bytes, "html")?;
        Ok(strip_markup(&source, HTML_SKIPPED))
    }
}

/// Text content of an XML document.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlExtractor;

impl ContentExtractor for XmlExtractor {
    fn extract(&self, bytes: &[u8], _hint: TypeHint) -> Result<String> {
        let source = decode_markup(bytes, "xml")?;
        Ok(strip_markup(&source, &[]))
    }
}

fn decode_markup(bytes: &[u8], kind: &'static str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Extraction {
        kind,
        message: e.to_string(),
    })
}

/// Remove tags, comments and the full content of `skipped` elements, decode
/// entities and collapse whitespace. CDATA sections are kept verbatim.
fn strip_markup(source: &str, skipped: &[&str]) -> String {
    // ASCII lowercasing keeps byte offsets identical to `source`
    let lower = source.to_ascii_lowercase();
    let mut text = String::with_capacity(source.len() / 2);
    let mut pos = 0;

    while let Some(rel) = source[pos..].find('<') {
        let open = pos + rel;
        text.push_str(&decode_entities(&source[pos..open]));
        let rest = &source[open..];

        if rest.starts_with("<!--") {
            pos = match source[open + 4..].find("-->") {
                Some(end) => open + 4 + end + 3,
                None => source.len(),
            };
            continue;
        }

        if rest.starts_with("<![CDATA[") {
            let start = open + 9;
            let end = source[start..].find("]]>").map(|e| start + e);
            let end = end.unwrap_or(source.len());
            text.push_str(&source[start..end]);
            pos = (end + 3).min(source.len());
            continue;
        }

        let Some(close_rel) = rest.find('>') else {
            // unterminated tag: drop the remainder
            pos = source.len();
            break;
        };
        let tag_end = open + close_rel + 1;
        let name = tag_name(&lower[open + 1..tag_end - 1]);

        pos = tag_end;
        text.push(' ');

        let self_closing = source[..tag_end].ends_with("/>");
        if !self_closing && skipped.contains(&name) {
            let closing = format!("</{name}");
            pos = match lower[tag_end..].find(&closing) {
                Some(c) => {
                    let after = tag_end + c;
                    lower[after..]
                        .find('>')
                        .map(|g| after + g + 1)
                        .unwrap_or(source.len())
                }
                None => source.len(),
            };
        }
    }
    if pos < source.len() {
        text.push_str(&decode_entities(&source[pos..]));
    }

    collapse_whitespace(&text)
}

fn tag_name(inner: &str) -> &str {
    let inner = inner.trim_start();
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    // closing tags report an empty name so they never open a skipped region
    if inner.starts_with('/') { "" } else { &inner[..end] }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out
}

/// Decode named and numeric character references. Unknown references are
/// left untouched.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let decoded = candidate
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&candidate[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "hellip" => '\u{2026}',
        "copy" => '\u{a9}',
        _ => return None,
    })
}
