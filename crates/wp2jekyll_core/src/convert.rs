use anyhow::{Result, anyhow};
use htmd::options::{BulletListMarker, CodeBlockStyle, Options};
use htmd::{Element, HtmlToMarkdown};

/// Class attribute values the blog used for "note" boxes. The converter keeps
/// these containers as raw HTML so the block-quote promotion stage can find
/// them again in the Markdown output.
pub const NOTE_CONTAINER_CLASSES: &[&str] = &[
    "is-layout-flow wp-block-group",
    "is-layout-flow wp-block-group ",
];

/// An opaque HTML to Markdown transform.
pub trait MarkdownConverter {
    fn convert(&self, html: &str) -> Result<String>;
}

pub struct HtmdConverter {
    inner: HtmlToMarkdown,
}

impl HtmdConverter {
    pub fn new() -> Self {
        let inner = HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style"])
            .options(Options {
                code_block_style: CodeBlockStyle::Fenced,
                bullet_list_marker: BulletListMarker::Asterisk,
                ..Default::default()
            })
            .add_handler(vec!["div"], |element: Element| {
                let class = element
                    .attrs
                    .iter()
                    .find(|attr| &*attr.name.local == "class")
                    .map(|attr| attr.value.to_string());
                match class {
                    Some(class) if NOTE_CONTAINER_CLASSES.contains(&class.as_str()) => Some(
                        format!("\n\n<div class=\"{class}\">{}</div>\n\n", element.content),
                    ),
                    _ => Some(format!("\n\n{}\n\n", element.content)),
                }
            })
            .build();
        Self { inner }
    }
}

impl Default for HtmdConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownConverter for HtmdConverter {
    fn convert(&self, html: &str) -> Result<String> {
        self.inner
            .convert(html)
            .map_err(|error| anyhow!("HTML to Markdown conversion failed: {error}"))
    }
}
