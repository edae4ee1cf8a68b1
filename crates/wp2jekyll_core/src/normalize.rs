use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};
use scraper::{ElementRef, Selector};
use tracing::{debug, info};

use crate::convert::{MarkdownConverter, NOTE_CONTAINER_CLASSES};
use crate::exceptions::{ExceptionRule, ExceptionTable};
use crate::html::{Rewrite, decode_entities, escape_text, inner_text, outer_html, rewrite_elements};

/// Code languages the blog ever used. Anything else is a configuration error.
pub const KNOWN_LANGUAGES: &[&str] = &["csharp", "xml", "json", "powershell", "plain"];
pub const DEFAULT_LANGUAGE: &str = "csharp";

/// Inline style Windows Live Writer put on every pasted code snippet.
pub const LEGACY_CODE_STYLE: &str = "border-right: #cccccc 1pt solid;padding-right: 1pt;border-top: #cccccc 1pt solid;padding-left: 1pt;font-size: 10pt;background: #f5f5f5;padding-bottom: 1pt;overflow: auto;border-left: #cccccc 1pt solid;width: 100%;color: black;padding-top: 1pt;border-bottom: #cccccc 1pt solid;font-family: lucida console";

const TECHNORATI_MARKER: &str = "technorati tags";

static BRUSH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"brush:\s*([^;"]+)"#).expect("valid brush regex"));
static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<.*?>").expect("valid tag regex"));
static NOTE_CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    let classes = NOTE_CONTAINER_CLASSES
        .iter()
        .map(|class| regex::escape(class))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r#"(?s)<div class="(?:{classes})">(.*?)</div>"#))
        .expect("valid note container regex")
});
static FENCE_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^```[ \t]*\n({})[ \t]*$",
        KNOWN_LANGUAGES.join("|")
    ))
    .expect("valid fence regex")
});
static BULLET_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)\*[ \t]+").expect("valid bullet regex"));
static NUMBER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)(\d+)\.[ \t]+").expect("valid number regex"));
static TECHNORATI_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)technorati tags:(.*)").expect("valid technorati regex"));
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]").expect("valid bracket regex"));
static IMG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid img selector"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPost {
    pub markdown: String,
    pub extracted_tags: Vec<String>,
}

pub struct Normalizer<'a, C: MarkdownConverter> {
    converter: &'a C,
    exceptions: &'a ExceptionTable,
    links: LegacyLinkRewriter,
}

impl<'a, C: MarkdownConverter> Normalizer<'a, C> {
    pub fn new(
        converter: &'a C,
        exceptions: &'a ExceptionTable,
        legacy_link_prefix: &str,
        site_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            converter,
            exceptions,
            links: LegacyLinkRewriter::new(legacy_link_prefix, site_url)?,
        })
    }

    /// Turn a post's rendered HTML into Markdown, collecting legacy tags on the way.
    pub fn normalize(&self, html: &str, post_id: u64) -> Result<NormalizedPost> {
        let html = html.replace("\r\n", "\n");
        let html = unwrap_code_blocks(&html)
            .with_context(|| format!("post {post_id}: failed to unwrap code blocks"))?;
        let html = unwrap_image_wrappers(&html)?;
        let html = resolve_responsive_sources(&html)?;
        let html = self.links.rewrite_document(&html)?;
        let html = strip_legacy_code_blocks(&html)?;
        let html = if self
            .exceptions
            .applies(post_id, ExceptionRule::StripOrderedLists)
        {
            info!(
                post_id,
                rule = ExceptionRule::StripOrderedLists.as_str(),
                reason = self
                    .exceptions
                    .reason(post_id, ExceptionRule::StripOrderedLists),
                "stripping ordered lists"
            );
            strip_ordered_lists(&html)?
        } else {
            html
        };

        let markdown = self
            .converter
            .convert(&html)
            .with_context(|| format!("post {post_id}: Markdown conversion failed"))?;

        let markdown = promote_notes(&markdown);
        let markdown = reposition_fences(&markdown);
        let markdown = cleanup_list_spacing(&markdown);
        let (markdown, extracted_tags) = extract_technorati_tags(&markdown);

        Ok(NormalizedPost {
            markdown: markdown.trim().to_string(),
            extracted_tags,
        })
    }
}

/// Rewrites `<legacy prefix>YYYY/MM/DD/slug.aspx` links to `<site>YYYY/MM/DD/slug`,
/// keeping any `#fragment` or `?query` after `.aspx`.
#[derive(Debug, Clone)]
pub struct LegacyLinkRewriter {
    pattern: Regex,
    replacement: String,
}

impl LegacyLinkRewriter {
    pub fn new(legacy_prefix: &str, site_url: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}(?P<path>\d{{4}}/\d{{2}}/\d{{2}}/[^/?#]+)\.aspx(?P<rest>[?#].*)?$",
            regex::escape(legacy_prefix)
        ))
        .with_context(|| format!("invalid legacy link prefix: {legacy_prefix}"))?;
        let site = if site_url.ends_with('/') {
            site_url.to_string()
        } else {
            format!("{site_url}/")
        };
        Ok(Self {
            pattern,
            replacement: format!("{site}${{path}}${{rest}}"),
        })
    }

    pub fn rewrite(&self, href: &str) -> Option<String> {
        if !self.pattern.is_match(href) {
            return None;
        }
        Some(
            self.pattern
                .replace(href, self.replacement.as_str())
                .into_owned(),
        )
    }

    fn rewrite_document(&self, html: &str) -> Result<String> {
        rewrite_elements(html, |element| {
            if element.value().name() != "a" {
                return Ok(Rewrite::Keep);
            }
            let Some(href) = element.value().attr("href") else {
                return Ok(Rewrite::Keep);
            };
            match self.rewrite(href) {
                Some(rewritten) => {
                    debug!(from = href, to = %rewritten, "rewrote legacy link");
                    Ok(Rewrite::Attributes(vec![("href".to_string(), rewritten)]))
                }
                None => {
                    debug!(href, "link");
                    Ok(Rewrite::Keep)
                }
            }
        })
    }
}

fn has_class_containing(element: ElementRef<'_>, needle: &str) -> bool {
    element
        .value()
        .attr("class")
        .is_some_and(|class| class.contains(needle))
}

fn fenced_code_html(language: &str, code: &str) -> String {
    format!("<pre><code>{language}\n{}</code></pre>", escape_text(code))
}

/// Replace syntax-highlighter containers with a plain `<pre><code>` whose first
/// line names the language.
pub fn unwrap_code_blocks(html: &str) -> Result<String> {
    rewrite_elements(html, |element| {
        let name = element.value().name();
        let is_container = (name == "div"
            && has_class_containing(element, "wp-block-syntaxhighlighter-code"))
            || (name == "pre" && has_class_containing(element, "brush"));
        if !is_container {
            return Ok(Rewrite::Keep);
        }
        let language = code_language(&outer_html(element))?;
        let code = inner_text(element);
        Ok(Rewrite::Replace(fenced_code_html(language, code.trim())))
    })
}

fn code_language(markup: &str) -> Result<&'static str> {
    let Some(captures) = BRUSH.captures(markup) else {
        return Ok(DEFAULT_LANGUAGE);
    };
    let hint = captures[1].trim();
    match KNOWN_LANGUAGES.iter().find(|known| **known == hint) {
        Some(language) => Ok(*language),
        None => bail!(
            "unfamiliar code language `{hint}` (known: {})",
            KNOWN_LANGUAGES.join(", ")
        ),
    }
}

/// Replace `wp-block-image` wrappers with the image they contain.
pub fn unwrap_image_wrappers(html: &str) -> Result<String> {
    rewrite_elements(html, |element| {
        let name = element.value().name();
        if !matches!(name, "div" | "figure") || !has_class_containing(element, "wp-block-image") {
            return Ok(Rewrite::Keep);
        }
        Ok(match element.select(&IMG).next() {
            Some(image) => Rewrite::Replace(outer_html(image)),
            None => Rewrite::Keep,
        })
    })
}

/// Point every `<img srcset>` at its widest candidate.
pub fn resolve_responsive_sources(html: &str) -> Result<String> {
    rewrite_elements(html, |element| {
        if element.value().name() != "img" {
            return Ok(Rewrite::Keep);
        }
        let Some(srcset) = element.value().attr("srcset") else {
            return Ok(Rewrite::Keep);
        };
        Ok(match widest_candidate(srcset) {
            Some(url) => Rewrite::Attributes(vec![("src".to_string(), url.to_string())]),
            None => Rewrite::Keep,
        })
    })
}

/// The URL with the largest `w` descriptor; the first one wins a tie.
pub fn widest_candidate(srcset: &str) -> Option<&str> {
    let mut best: Option<(&str, u64)> = None;
    for candidate in srcset.split(',') {
        let parts = candidate.split_whitespace().collect::<Vec<_>>();
        let [url, descriptor] = parts.as_slice() else {
            continue;
        };
        let Some(width) = descriptor
            .strip_suffix('w')
            .and_then(|value| value.parse::<u64>().ok())
        else {
            continue;
        };
        if best.is_none_or(|(_, best_width)| width > best_width) {
            best = Some((*url, width));
        }
    }
    best.map(|(url, _)| url)
}

/// Turn Live Writer's styled code snippets into plain `csharp` code blocks.
pub fn strip_legacy_code_blocks(html: &str) -> Result<String> {
    rewrite_elements(html, |element| {
        let is_legacy = element.value().name() == "div"
            && element
                .value()
                .attr("style")
                .is_some_and(|style| style.contains(LEGACY_CODE_STYLE));
        if !is_legacy {
            return Ok(Rewrite::Keep);
        }
        let raw = outer_html(element)
            .replace(['\u{201C}', '\u{201D}'], "\"")
            .replace(['\u{2018}', '\u{2019}'], "'");
        let raw = MARKUP_TAG.replace_all(&raw, "");
        let raw = decode_entities(&raw).replace('\u{a0}', " ");
        Ok(Rewrite::Replace(fenced_code_html(
            DEFAULT_LANGUAGE,
            raw.trim(),
        )))
    })
}

/// Drop `<ol>`/`<li>` tags, keeping their content.
pub fn strip_ordered_lists(html: &str) -> Result<String> {
    rewrite_elements(html, |element| {
        Ok(match element.value().name() {
            "ol" | "li" => Rewrite::Unwrap,
            _ => Rewrite::Keep,
        })
    })
}

/// Replace legacy note containers left in the Markdown by block quotes.
pub fn promote_notes(markdown: &str) -> String {
    NOTE_CONTAINER
        .replace_all(markdown, |captures: &Captures<'_>| {
            let text = decode_entities(&MARKUP_TAG.replace_all(&captures[1], ""));
            block_quote(text.trim())
        })
        .into_owned()
}

fn block_quote(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Move a language name the converter left on its own line up onto the fence.
pub fn reposition_fences(markdown: &str) -> String {
    FENCE_LANGUAGE.replace_all(markdown, "```$1").into_owned()
}

/// Tighten list spacing outside fenced code.
///
/// Blank lines before `*` and `N.` items are dropped and marker whitespace is
/// collapsed to one space. Ordinal markers keep their period (`1.  x` becomes
/// `1. x`), since a bare `1 x` would no longer be a list item.
pub fn cleanup_list_spacing(markdown: &str) -> String {
    let markdown = remove_blank_lines_before(markdown, |line| BULLET_MARKER.is_match(line));
    let markdown = remove_blank_lines_before(&markdown, |line| NUMBER_MARKER.is_match(line));

    let lines = markdown.split('\n').collect::<Vec<_>>();
    let fenced = fence_mask(&lines);
    lines
        .iter()
        .zip(fenced)
        .map(|(line, in_fence)| {
            if in_fence {
                return (*line).to_string();
            }
            let line = BULLET_MARKER.replace(line, "${1}* ");
            NUMBER_MARKER.replace(&line, "${1}${2}. ").into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn remove_blank_lines_before<F>(markdown: &str, is_item: F) -> String
where
    F: Fn(&str) -> bool,
{
    let lines = markdown.split('\n').collect::<Vec<_>>();
    let fenced = fence_mask(&lines);
    let mut output = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if !fenced[index] && line.trim().is_empty() {
            let next = lines[index + 1..]
                .iter()
                .zip(&fenced[index + 1..])
                .find(|(candidate, _)| !candidate.trim().is_empty());
            if let Some((next, false)) = next
                && is_item(*next)
            {
                continue;
            }
        }
        output.push(*line);
    }
    output.join("\n")
}

/// `true` for fence lines and everything between them.
fn fence_mask(lines: &[&str]) -> Vec<bool> {
    let mut inside = false;
    lines
        .iter()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                inside = !inside;
                return true;
            }
            inside
        })
        .collect()
}

/// Collect `Technorati tags: [a] [b]` entries and delete every line mentioning them.
pub fn extract_technorati_tags(markdown: &str) -> (String, Vec<String>) {
    let mut tags = Vec::new();
    let mut kept = Vec::new();
    for line in markdown.split('\n') {
        if !line.to_lowercase().contains(TECHNORATI_MARKER) {
            kept.push(line);
            continue;
        }
        if let Some(captures) = TECHNORATI_TAGS.captures(line) {
            for tag in BRACKETED.captures_iter(&captures[1]) {
                let tag = tag[1].trim();
                if !tag.is_empty() {
                    tags.push(tag.to_string());
                }
            }
        }
    }
    (kept.join("\n"), tags)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use reqwest::Url;

    use super::*;
    use crate::convert::HtmdConverter;
    use crate::media::resolve_images;

    const PREFIX: &str = "https://bloggingabout-linux.azurewebsites.net/blogs/dennis/archive/";
    const SITE: &str = "https://bloggingabout.net/";

    struct StubConverter {
        output: Option<String>,
        seen: RefCell<Vec<String>>,
    }

    impl StubConverter {
        fn identity() -> Self {
            Self {
                output: None,
                seen: RefCell::new(Vec::new()),
            }
        }

        fn returning(markdown: &str) -> Self {
            Self {
                output: Some(markdown.to_string()),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl MarkdownConverter for StubConverter {
        fn convert(&self, html: &str) -> Result<String> {
            self.seen.borrow_mut().push(html.to_string());
            Ok(self.output.clone().unwrap_or_else(|| html.to_string()))
        }
    }

    #[test]
    fn code_blocks_default_to_csharp() {
        let html = "<div class=\"wp-block-syntaxhighlighter-code\"><pre>  var x = 1;\n</pre></div>";
        let output = unwrap_code_blocks(html).expect("unwrap");
        assert_eq!(output, "<pre><code>csharp\nvar x = 1;</code></pre>");
    }

    #[test]
    fn code_blocks_use_recognized_brush() {
        let html = "<p>Before</p><pre class=\"brush: xml; title: ; notranslate\">&lt;a&gt;b&lt;/a&gt;</pre><p>After</p>";
        let output = unwrap_code_blocks(html).expect("unwrap");
        assert_eq!(
            output,
            "<p>Before</p><pre><code>xml\n&lt;a&gt;b&lt;/a&gt;</code></pre><p>After</p>"
        );
    }

    #[test]
    fn code_blocks_reject_unknown_brush() {
        let html = "<pre class=\"brush: ruby;\">puts 1</pre>";
        let error = unwrap_code_blocks(html).expect_err("must fail");
        assert!(error.to_string().contains("ruby"));
    }

    #[test]
    fn untouched_pre_blocks_stay_as_is() {
        let html = "<pre>plain text</pre>";
        assert_eq!(unwrap_code_blocks(html).expect("unwrap"), html);
    }

    #[test]
    fn image_wrappers_are_replaced_by_their_image() {
        let html = "<figure class=\"wp-block-image size-large\"><a href=\"big.png\"><img src=\"a.png\"></a><figcaption>cap</figcaption></figure><p>x</p>";
        let output = unwrap_image_wrappers(html).expect("unwrap");
        assert_eq!(output, "<img src=\"a.png\"><p>x</p>");
    }

    #[test]
    fn image_wrapper_without_image_is_kept() {
        let html = "<div class=\"wp-block-image\"><p>empty</p></div>";
        assert_eq!(unwrap_image_wrappers(html).expect("unwrap"), html);
    }

    #[test]
    fn widest_candidate_picks_largest_width() {
        assert_eq!(
            widest_candidate("a.png 300w, b.png 1024w, c.png 768w"),
            Some("b.png")
        );
        assert_eq!(widest_candidate("a.png 800w, b.png 800w"), Some("a.png"));
        assert_eq!(widest_candidate("a.png 2x, b.png"), None);
        assert_eq!(widest_candidate(""), None);
    }

    #[test]
    fn responsive_sources_rewrite_src_only_with_srcset() {
        let html = "<img src=\"s.png\" srcset=\"a.png 300w, b.png 1024w\"><img src=\"plain.png\">";
        let output = resolve_responsive_sources(html).expect("resolve");
        assert!(output.contains("src=\"b.png\""));
        assert!(!output.contains("src=\"s.png\""));
        assert!(output.contains("<img src=\"plain.png\">"));
    }

    #[test]
    fn legacy_links_are_rewritten() {
        let rewriter = LegacyLinkRewriter::new(PREFIX, SITE).expect("rewriter");
        assert_eq!(
            rewriter.rewrite(&format!("{PREFIX}2004/01/01/my-post.aspx")),
            Some("https://bloggingabout.net/2004/01/01/my-post".to_string())
        );
        assert_eq!(rewriter.rewrite("https://example.org/2004/01/01/x.aspx"), None);
        assert_eq!(rewriter.rewrite(&format!("{PREFIX}2004/01/01.aspx")), None);
        assert_eq!(
            rewriter.rewrite(&format!("{PREFIX}2004/01/01/my-post.aspx#comments")),
            Some("https://bloggingabout.net/2004/01/01/my-post#comments".to_string())
        );
        assert_eq!(
            rewriter.rewrite(&format!("{PREFIX}2004/01/01/my-post.aspx?page=2")),
            Some("https://bloggingabout.net/2004/01/01/my-post?page=2".to_string())
        );
        assert_eq!(
            rewriter.rewrite(&format!("{PREFIX}2004/01/01/my-post.aspxtra")),
            None
        );

        let html = format!("<a href=\"{PREFIX}2010/05/06/hello.aspx\">old</a><a href=\"/other\">o</a>");
        let output = rewriter.rewrite_document(&html).expect("rewrite");
        assert_eq!(
            output,
            "<a href=\"https://bloggingabout.net/2010/05/06/hello\">old</a><a href=\"/other\">o</a>"
        );
    }

    #[test]
    fn legacy_code_blocks_become_plain_csharp() {
        let html = format!(
            "<p>x</p><div style=\"{LEGACY_CODE_STYLE}\"><pre><span style=\"color: blue\">var</span> s = &#8220;hi&#8221;;&nbsp;&lt;T&gt; it&#8217;s</pre></div>"
        );
        let output = strip_legacy_code_blocks(&html).expect("strip");
        assert_eq!(
            output,
            "<p>x</p><pre><code>csharp\nvar s = \"hi\"; &lt;T&gt; it's</code></pre>"
        );
    }

    #[test]
    fn ordered_lists_are_flattened() {
        let output = strip_ordered_lists("<ol><li>a</li><li>b</li></ol><ul><li>c</li></ul>")
            .expect("strip");
        assert_eq!(output, "ab<ul>c</ul>");
    }

    #[test]
    fn notes_become_block_quotes() {
        let markdown = "Intro\n\n<div class=\"is-layout-flow wp-block-group\">\n\n**Note:** keep &amp; this\n\n</div>\n\nAfter";
        assert_eq!(
            promote_notes(markdown),
            "Intro\n\n> **Note:** keep & this\n\nAfter"
        );
        let trailing_space = "<div class=\"is-layout-flow wp-block-group \">a\n\nb</div>";
        assert_eq!(promote_notes(trailing_space), "> a\n>\n> b");
        let other = "<div class=\"wp-block-group\">x</div>";
        assert_eq!(promote_notes(other), other);
    }

    #[test]
    fn fences_take_the_language_line() {
        assert_eq!(
            reposition_fences("```\nxml\n<a/>\n```"),
            "```xml\n<a/>\n```"
        );
        assert_eq!(reposition_fences("```\nruby\nx\n```"), "```\nruby\nx\n```");
    }

    #[test]
    fn blank_line_between_bullets_is_removed() {
        assert_eq!(cleanup_list_spacing("* item1\n\n* item2"), "* item1\n* item2");
    }

    #[test]
    fn numbered_lists_are_tightened() {
        assert_eq!(
            cleanup_list_spacing("Steps:\n\n1.  one\n\n\n2.\ttwo"),
            "Steps:\n1. one\n2. two"
        );
    }

    #[test]
    fn list_cleanup_leaves_code_and_bold_alone() {
        let markdown = "```csharp\n/*\n\n *   doc\n */\n```\n\n**Bold** paragraph";
        assert_eq!(cleanup_list_spacing(markdown), markdown);
    }

    #[test]
    fn technorati_tags_are_extracted_and_lines_removed() {
        let markdown = "Body\n\nTechnorati tags: [WCF](http://t/wcf), [SOA](http://t/soa)\n<div>TECHNORATI TAGS</div>\nEnd";
        let (output, tags) = extract_technorati_tags(markdown);
        assert_eq!(output, "Body\n\nEnd");
        assert_eq!(tags, vec!["WCF".to_string(), "SOA".to_string()]);
    }

    #[test]
    fn normalize_runs_post_conversion_stages_in_order() {
        let converter = StubConverter::returning(
            "```\ncsharp\nvar x;\n```\n\n* a\n\n*   b\n\n1.  one\n\n2.  two\n\nTechnorati tags: [x](http://t/x), [y](http://t/y)\n",
        );
        let exceptions = ExceptionTable::built_in();
        let normalizer = Normalizer::new(&converter, &exceptions, PREFIX, SITE).expect("normalizer");
        let normalized = normalizer.normalize("<p>ignored</p>", 1).expect("normalize");
        assert_eq!(
            normalized.markdown,
            "```csharp\nvar x;\n```\n* a\n* b\n1. one\n2. two"
        );
        assert_eq!(normalized.extracted_tags, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn normalize_feeds_rewritten_html_to_the_converter() {
        let converter = StubConverter::identity();
        let exceptions = ExceptionTable::built_in();
        let normalizer = Normalizer::new(&converter, &exceptions, PREFIX, SITE).expect("normalizer");
        let html = "<figure class=\"wp-block-image\"><img src=\"a.png\" srcset=\"a.png 10w, big.png 90w\"></figure>\r\n<pre class=\"brush: json;\">{}</pre>";
        normalizer.normalize(html, 1).expect("normalize");
        let seen = converter.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("src=\"big.png\""));
        assert!(seen[0].contains("<pre><code>json\n{}</code></pre>"));
        assert!(!seen[0].contains("figure"));
        assert!(!seen[0].contains('\r'));
    }

    #[test]
    fn normalize_strips_ordered_lists_only_for_the_listed_post() {
        let converter = StubConverter::identity();
        let exceptions = ExceptionTable::built_in();
        let normalizer = Normalizer::new(&converter, &exceptions, PREFIX, SITE).expect("normalizer");
        let html = "<ol><li>a</li></ol>";
        let regular = normalizer.normalize(html, 1).expect("normalize");
        assert_eq!(regular.markdown, "<ol><li>a</li></ol>");
        let special = normalizer.normalize(html, 477173).expect("normalize");
        assert_eq!(special.markdown, "a");
    }

    #[test]
    fn normalize_reports_unknown_language_with_post_id() {
        let converter = StubConverter::identity();
        let exceptions = ExceptionTable::built_in();
        let normalizer = Normalizer::new(&converter, &exceptions, PREFIX, SITE).expect("normalizer");
        let error = normalizer
            .normalize("<pre class=\"brush: vb;\">Dim x</pre>", 99)
            .expect_err("must fail");
        let message = format!("{error:#}");
        assert!(message.contains("post 99"));
        assert!(message.contains("`vb`"));
    }

    #[test]
    fn normalize_with_htmd_feeds_every_markdown_stage() {
        let converter = HtmdConverter::new();
        let exceptions = ExceptionTable::built_in();
        let normalizer = Normalizer::new(&converter, &exceptions, PREFIX, SITE).expect("normalizer");
        let html = format!(
            "<p>Intro with <a href=\"{PREFIX}2004/01/01/my-post.aspx#comments\">comments</a></p>\n\
             <pre class=\"brush: xml; gutter: false\">&lt;config /&gt;</pre>\n\
             <div class=\"is-layout-flow wp-block-group\"><p><strong>Note:</strong> keep this</p></div>\n\
             <ul><li>alpha</li><li>beta</li></ul>\n\
             <ol><li>one</li><li>two</li></ol>\n\
             <p><img src=\"http://host/shot.png\" alt=\"shot\" title=\"Screen\"></p>\n\
             <div class=\"tags\">Technorati tags: <a href=\"http://t/wcf\" rel=\"tag\">WCF</a>, \
             <a href=\"http://t/soa\" rel=\"tag\">SOA</a></div>"
        );

        let normalized = normalizer.normalize(&html, 1).expect("normalize");
        let markdown = &normalized.markdown;
        assert!(markdown.contains("(https://bloggingabout.net/2004/01/01/my-post#comments)"));
        assert!(markdown.contains("```xml\n<config />\n```"));
        assert!(markdown.contains("> **Note:** keep this"));
        assert!(!markdown.contains("wp-block-group"));
        assert!(markdown.contains("* alpha\n* beta"));
        assert!(markdown.contains("1. one\n2. two"));
        assert!(!markdown.to_lowercase().contains("technorati"));
        assert_eq!(normalized.extracted_tags, vec!["WCF".to_string(), "SOA".to_string()]);

        let site = Url::parse(SITE).expect("site url");
        let resolved = resolve_images(markdown, "my-post", &site);
        assert!(resolved.markdown.contains("![shot](/images/my-post/shot.png)"));
        assert_eq!(
            resolved.plan.get("http://host/shot.png").expect("planned").file_name,
            "shot.png"
        );
    }
}
