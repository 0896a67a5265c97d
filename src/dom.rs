use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::{AgentError, Result};
use crate::hands::BrowserDriver;
use crate::types::DOM_SNAPSHOT_MAX_CHARS;

/// JavaScript injected into the page to capture the visible body as JSON.
/// Read-only: it walks the DOM without touching styles or layout.
///
/// The script:
///   1. Skips script, style, noscript, link, meta and template subtrees.
///   2. Records, per element, every attribute, the computed visibility and
///      the bounding rectangle in viewport coordinates.
///   3. Does not descend into hidden elements or past depth 40.
///   4. Returns `{viewport, root}` as a JSON string.
///
/// Filtering happens on the Rust side in [`DomSnapshotter::render`].
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','LINK','META','TEMPLATE']);
  const MAX_DEPTH = 40;

  function walk(el, depth) {
    const style = getComputedStyle(el);
    const hidden = style.display === 'none'
      || style.visibility === 'hidden'
      || style.opacity === '0';
    const r = el.getBoundingClientRect();
    const attrs = {};
    for (const a of el.attributes) attrs[a.name] = a.value;
    const node = {
      tag: el.tagName.toLowerCase(),
      attrs,
      hidden,
      rect: { x: r.x, y: r.y, width: r.width, height: r.height },
      children: [],
    };
    if (hidden || depth >= MAX_DEPTH) return node;
    for (const child of el.childNodes) {
      if (child.nodeType === Node.TEXT_NODE) {
        const t = child.textContent.trim();
        if (t) node.children.push({ text: t });
      } else if (child.nodeType === Node.ELEMENT_NODE && !SKIP.has(child.tagName)) {
        node.children.push(walk(child, depth + 1));
      }
    }
    return node;
  }

  return JSON.stringify({
    viewport: { width: window.innerWidth, height: window.innerHeight },
    root: document.body ? walk(document.body, 0) : null,
  });
})()
"#;

/// Tags that never carry content the model can act on.
const STRIPPED_TAGS: &[&str] = &["script", "style", "noscript", "link", "meta", "template"];

/// Attributes kept in the snapshot; everything else is dropped.
const ALLOWED_ATTRS: &[&str] = &[
    "id",
    "class",
    "name",
    "type",
    "role",
    "aria-label",
    "placeholder",
    "title",
    "alt",
];

const VOID_TAGS: &[&str] = &["area", "br", "col", "embed", "hr", "img", "input", "source", "wbr"];

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when no part of the rectangle overlaps the viewport.
    fn outside(&self, viewport: &Viewport) -> bool {
        self.x + self.width <= 0.0
            || self.y + self.height <= 0.0
            || self.x >= viewport.width
            || self.y >= viewport.height
    }
}

/// One node of the raw capture produced by [`SNAPSHOT_JS`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawNode {
    Text { text: String },
    Element(RawElement),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawElement {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<RawNode>,
}

impl RawElement {
    /// Hidden by computed style, or by an inline style the capture missed.
    fn is_hidden(&self) -> bool {
        self.hidden || self.attrs.get("style").is_some_and(|s| inline_style_hides(s))
    }
}

fn inline_style_hides(style: &str) -> bool {
    style.split(';').any(|decl| {
        let Some((prop, value)) = decl.split_once(':') else {
            return false;
        };
        let value = value.trim().trim_end_matches("!important").trim().to_ascii_lowercase();
        match prop.trim().to_ascii_lowercase().as_str() {
            "display" => value == "none",
            "visibility" => value == "hidden",
            "opacity" => value.parse::<f64>().is_ok_and(|v| v == 0.0),
            _ => false,
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageCapture {
    pub viewport: Viewport,
    pub root: Option<RawNode>,
}

/// Filtered, bounded text view of the visible page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomSnapshot(String);

impl DomSnapshot {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DomSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct DomSnapshotter {
    max_chars: usize,
}

impl Default for DomSnapshotter {
    fn default() -> Self {
        Self::new(DOM_SNAPSHOT_MAX_CHARS)
    }
}

impl DomSnapshotter {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Capture the current page and render it.
    pub async fn snapshot(&self, driver: &dyn BrowserDriver) -> Result<DomSnapshot> {
        let raw = driver.evaluate(SNAPSHOT_JS).await?;
        let capture: PageCapture = match raw {
            serde_json::Value::String(json) => serde_json::from_str(&json),
            other => serde_json::from_value(other),
        }
        .map_err(|e| AgentError::Driver(format!("unreadable page capture: {e}")))?;
        Ok(self.render(&capture))
    }

    pub fn render(&self, capture: &PageCapture) -> DomSnapshot {
        let mut out = String::new();
        if let Some(RawNode::Element(root)) = &capture.root {
            // The body itself is never culled, only its descendants.
            if !root.is_hidden() {
                for child in &root.children {
                    write_node(child, &capture.viewport, &mut out);
                }
            }
        }
        DomSnapshot(bound(out, self.max_chars))
    }
}

fn write_node(node: &RawNode, viewport: &Viewport, out: &mut String) {
    match node {
        RawNode::Text { text } => {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                escape_into(&collapsed, false, out);
            }
        }
        RawNode::Element(el) => {
            let tag = el.tag.to_ascii_lowercase();
            if STRIPPED_TAGS.contains(&tag.as_str()) || el.is_hidden() {
                return;
            }
            if let Some(rect) = &el.rect {
                if rect.is_empty() || rect.outside(viewport) {
                    return;
                }
            }

            out.push('<');
            out.push_str(&tag);
            for (name, value) in &el.attrs {
                if ALLOWED_ATTRS.contains(&name.as_str()) {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
            }
            if VOID_TAGS.contains(&tag.as_str()) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_node(child, viewport, out);
            }
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn bound(raw: String, max_chars: usize) -> String {
    let total = raw.chars().count();
    if total <= max_chars {
        return raw;
    }
    let cut = raw
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(raw.len());
    format!("{}\n... [truncated, {} total chars]", &raw[..cut], total)
}
