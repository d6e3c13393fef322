//! Minimal HTML extraction for registry result pages.
//!
//! Registry pages are small and flat; locating elements by tag name and
//! class attribute is all the adapters need.

use regex::Regex;
use std::sync::OnceLock;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").expect("valid tag regex"))
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("valid attribute regex")
    })
}

fn markup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid markup regex"))
}

/// An opening tag located in a document.
#[derive(Debug, Clone, Copy)]
pub struct Tag<'a> {
    pub name: &'a str,
    attrs: &'a str,
    /// Byte offset of `<`.
    pub start: usize,
    /// Byte offset just past `>`.
    pub end: usize,
}

impl<'a> Tag<'a> {
    pub fn attr(&self, name: &str) -> Option<String> {
        attr_regex().captures_iter(self.attrs).find_map(|cap| {
            let key = cap.get(1)?.as_str();
            if !key.eq_ignore_ascii_case(name) {
                return None;
            }
            cap.get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|v| decode_entities(v.as_str()))
        })
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

pub fn tags(html: &str) -> impl Iterator<Item = Tag<'_>> {
    tag_regex().captures_iter(html).filter_map(|cap| {
        let whole = cap.get(0)?;
        Some(Tag {
            name: cap.get(1)?.as_str(),
            attrs: cap.get(2).map(|m| m.as_str()).unwrap_or(""),
            start: whole.start(),
            end: whole.end(),
        })
    })
}

/// First `<name>` tag satisfying `pred`.
pub fn find_tag<'a>(html: &'a str, name: &str, pred: impl Fn(&Tag<'a>) -> bool) -> Option<Tag<'a>> {
    tags(html).find(|tag| tag.name.eq_ignore_ascii_case(name) && pred(tag))
}

/// Splits a document into one slice per element carrying `class`. Each slice
/// runs from the element's opening tag to the next such element (or the end).
pub fn blocks_with_class<'a>(html: &'a str, class: &str) -> Vec<&'a str> {
    let starts: Vec<usize> = tags(html)
        .filter(|tag| tag.has_class(class))
        .map(|tag| tag.start)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let end = starts.get(i + 1).copied().unwrap_or(html.len());
            &html[*start..end]
        })
        .collect()
}

/// Text content of the first element with `class` inside `fragment`.
pub fn text_of_class(fragment: &str, class: &str) -> Option<String> {
    let tag = tags(fragment).find(|tag| tag.has_class(class))?;
    let rest = &fragment[tag.end..];
    let inner = match rest.find("</") {
        Some(close) => &rest[..close],
        None => rest,
    };
    let text = decode_entities(&markup_regex().replace_all(inner, " "));
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

pub fn decode_entities(raw: &str) -> String {
    raw.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
