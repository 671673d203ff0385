//! Edge Assets
//!
//! Assets served through the edge, the optimizations applied to them and the
//! default text optimizer.

use crate::cache::compression::{Compressor, ZstdCompressor};
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response header naming the content encoding
pub const CONTENT_ENCODING: &str = "Content-Encoding";

// =============================================================================
// Asset Types
// =============================================================================

/// Asset class, derived from the path extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Js,
    Css,
    Html,
    Json,
    Image,
    Font,
    Other,
}

impl AssetType {
    /// Classify a request path; query strings and fragments are ignored
    pub fn from_path(path: &str) -> Self {
        let file = route(path).rsplit('/').next().unwrap_or_default();
        let Some((_, ext)) = file.rsplit_once('.') else {
            return AssetType::Other;
        };

        match ext.to_ascii_lowercase().as_str() {
            "js" => AssetType::Js,
            "css" => AssetType::Css,
            "html" | "htm" => AssetType::Html,
            "json" => AssetType::Json,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" => AssetType::Image,
            "woff" | "woff2" | "ttf" | "eot" => AssetType::Font,
            _ => AssetType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Js => "js",
            AssetType::Css => "css",
            AssetType::Html => "html",
            AssetType::Json => "json",
            AssetType::Image => "image",
            AssetType::Font => "font",
            AssetType::Other => "other",
        }
    }

    /// Text formats the default optimizer can minify
    pub fn is_minifiable(&self) -> bool {
        matches!(
            self,
            AssetType::Js | AssetType::Css | AssetType::Html | AssetType::Json
        )
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path without its query string or fragment
pub(crate) fn route(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

// =============================================================================
// Asset
// =============================================================================

/// Content addressed by a request path
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub path: String,
    pub asset_type: AssetType,
    pub content: Bytes,
    pub headers: IndexMap<String, String>,
}

impl Asset {
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let path = path.into();
        Self {
            asset_type: AssetType::from_path(&path),
            path,
            content: content.into(),
            headers: IndexMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Content length in bytes
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Quoted hex ETag of the content
    pub fn etag(&self) -> String {
        let hash = self.content.iter().fold(0i32, |hash, &b| {
            hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(b))
        });
        format!("\"{:x}\"", hash.unsigned_abs())
    }

    /// Tags derived from the asset type and well-known path segments
    pub fn default_tags(&self) -> Vec<String> {
        let mut tags = vec![self.asset_type.as_str().to_string()];
        if self.path.contains("/api/") {
            tags.push("api".to_string());
        }
        if self.path.contains("/static/") {
            tags.push("static".to_string());
        }
        tags
    }
}

// =============================================================================
// Optimization
// =============================================================================

/// Transformation an optimization rule asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Minification,
    Compression,
    FormatOptimization,
    QualityOptimization,
    MetadataRemoval,
    FormatConversion,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Minification => "minification",
            Technique::Compression => "compression",
            Technique::FormatOptimization => "format_optimization",
            Technique::QualityOptimization => "quality_optimization",
            Technique::MetadataRemoval => "metadata_removal",
            Technique::FormatConversion => "format_conversion",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of optimizing one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub original_size: usize,
    pub optimized_size: usize,
    /// Size reduction as a percentage of the original
    pub savings: f64,
    pub compression_ratio: f64,
    pub processing_ms: f64,
    /// Techniques actually applied
    pub techniques: Vec<Technique>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OptimizationReport {
    pub fn new(original_size: usize, optimized_size: usize, processing_ms: f64) -> Self {
        let savings = if original_size == 0 {
            0.0
        } else {
            (original_size as f64 - optimized_size as f64) / original_size as f64 * 100.0
        };
        let compression_ratio = if optimized_size == 0 {
            1.0
        } else {
            original_size as f64 / optimized_size as f64
        };

        Self {
            original_size,
            optimized_size,
            savings,
            compression_ratio,
            processing_ms,
            techniques: Vec::new(),
            error: None,
        }
    }
}

/// An asset ready for the edge, with headers and its optimization report
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedAsset {
    pub asset: Asset,
    pub optimization: OptimizationReport,
}

/// Transforms asset content
#[async_trait]
pub trait AssetOptimizer: Send + Sync {
    /// Apply the requested techniques it supports
    ///
    /// Returns the transformed asset and the techniques that were applied.
    async fn optimize(
        &self,
        asset: &Asset,
        techniques: &[Technique],
    ) -> anyhow::Result<(Asset, Vec<Technique>)>;
}

/// Minifies text assets and compresses them with zstd
///
/// Image techniques are left to a dedicated optimizer.
#[derive(Default)]
pub struct DefaultOptimizer {
    zstd: ZstdCompressor,
}

#[async_trait]
impl AssetOptimizer for DefaultOptimizer {
    async fn optimize(
        &self,
        asset: &Asset,
        techniques: &[Technique],
    ) -> anyhow::Result<(Asset, Vec<Technique>)> {
        let mut optimized = asset.clone();
        let mut applied = Vec::new();

        if techniques.contains(&Technique::Minification) && asset.asset_type.is_minifiable() {
            let text = std::str::from_utf8(&asset.content)?;
            let minified = match asset.asset_type {
                AssetType::Css => minify_css(text),
                AssetType::Js => minify_js(text),
                AssetType::Html => minify_html(text),
                _ => minify_json(text),
            };
            optimized.content = Bytes::from(minified);
            applied.push(Technique::Minification);
        }

        if techniques.contains(&Technique::Compression)
            && !optimized.headers.contains_key(CONTENT_ENCODING)
        {
            let compressed = self.zstd.compress(&optimized.content)?;
            if compressed.len() < optimized.content.len() {
                optimized.content = Bytes::from(compressed);
                optimized
                    .headers
                    .insert(CONTENT_ENCODING.to_string(), "zstd".to_string());
                applied.push(Technique::Compression);
            }
        }

        Ok((optimized, applied))
    }
}

// =============================================================================
// Minifiers
// =============================================================================

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn minify_css(text: &str) -> String {
    const TIGHT: [char; 4] = ['{', '}', ';', ','];

    let collapsed: Vec<char> = collapse_whitespace(text).chars().collect();
    let mut out = String::with_capacity(collapsed.len());

    for (i, &c) in collapsed.iter().enumerate() {
        if c == ' ' {
            let prev = out.chars().last();
            let next = collapsed.get(i + 1).copied();
            if prev.is_some_and(|p| TIGHT.contains(&p)) || next.is_some_and(|n| TIGHT.contains(&n)) {
                continue;
            }
        }
        if c == '}' && out.ends_with(';') {
            out.pop();
        }
        out.push(c);
    }
    out
}

/// Drops comments and blank lines; line breaks stay for automatic semicolons
fn minify_js(text: &str) -> String {
    strip_js_comments(text)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_js_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match (c, chars.peek().copied()) {
            ('"' | '\'' | '`', _) => {
                quote = Some(c);
                out.push(c);
            }
            ('/', Some('/')) => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn minify_html(text: &str) -> String {
    collapse_whitespace(text).replace("> <", "><")
}

/// Invalid JSON is served unchanged
fn minify_json(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .and_then(|value| serde_json::to_string(&value))
        .unwrap_or_else(|_| text.to_string())
}
