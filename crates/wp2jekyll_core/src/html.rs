//! Element-level HTML rewriting.
//!
//! A fragment is parsed with `scraper`, every element is offered to a visitor
//! in document order, and the tree is serialized back out with the visitor's
//! decisions applied. Replaced elements are not descended into.

use anyhow::Result;
use scraper::{ElementRef, Html, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    Keep,
    /// Keep the element but override (or add) these attributes.
    Attributes(Vec<(String, String)>),
    /// Emit this raw HTML instead of the element and its subtree.
    Replace(String),
    /// Drop the element's own tags but keep (and keep visiting) its children.
    Unwrap,
}

/// Parse `html` as a body fragment and serialize it back, letting `visit`
/// decide what happens to each element.
pub fn rewrite_elements<F>(html: &str, mut visit: F) -> Result<String>
where
    F: FnMut(ElementRef<'_>) -> Result<Rewrite>,
{
    let fragment = Html::parse_fragment(html);
    let mut output = String::with_capacity(html.len());
    write_children(fragment.root_element(), &mut output, &mut visit)?;
    Ok(output)
}

/// Serialize an element and its subtree unchanged.
pub fn outer_html(element: ElementRef<'_>) -> String {
    let mut output = String::new();
    let mut keep = |_: ElementRef<'_>| Ok(Rewrite::Keep);
    // The keep-everything visitor cannot fail.
    let _ = write_element(element, Rewrite::Keep, &mut output, &mut keep);
    output
}

/// Concatenated text content of an element.
pub fn inner_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

/// Decode named and numeric character references in a text run.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let fragment = Html::parse_fragment(text);
    fragment.root_element().text().collect::<String>()
}

pub fn escape_text(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            _ => output.push(ch),
        }
    }
    output
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn write_children<F>(parent: ElementRef<'_>, output: &mut String, visit: &mut F) -> Result<()>
where
    F: FnMut(ElementRef<'_>) -> Result<Rewrite>,
{
    let raw_text = RAW_TEXT_ELEMENTS.contains(&parent.value().name());
    for child in parent.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    let decision = visit(element)?;
                    write_element(element, decision, output, visit)?;
                }
            }
            Node::Text(text) if raw_text => output.push_str(text),
            Node::Text(text) => output.push_str(&escape_text(text)),
            Node::Comment(comment) => {
                output.push_str("<!--");
                output.push_str(comment);
                output.push_str("-->");
            }
            _ => {}
        }
    }
    Ok(())
}

fn write_element<F>(
    element: ElementRef<'_>,
    decision: Rewrite,
    output: &mut String,
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(ElementRef<'_>) -> Result<Rewrite>,
{
    let overrides = match decision {
        Rewrite::Replace(replacement) => {
            output.push_str(&replacement);
            return Ok(());
        }
        Rewrite::Unwrap => return write_children(element, output, visit),
        Rewrite::Keep => Vec::new(),
        Rewrite::Attributes(overrides) => overrides,
    };

    let name = element.value().name();
    output.push('<');
    output.push_str(name);
    for (key, value) in element.value().attrs() {
        let value = overrides
            .iter()
            .find(|(override_key, _)| override_key == key)
            .map(|(_, override_value)| override_value.as_str())
            .unwrap_or(value);
        output.push_str(&format!(" {key}=\"{}\"", escape_attribute(value)));
    }
    for (key, value) in &overrides {
        if element.value().attr(key).is_none() {
            output.push_str(&format!(" {key}=\"{}\"", escape_attribute(value)));
        }
    }
    output.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return Ok(());
    }
    write_children(element, output, visit)?;
    output.push_str("</");
    output.push_str(name);
    output.push('>');
    Ok(())
}
