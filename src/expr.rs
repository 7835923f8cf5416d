//! Embedded `${{ … }}` expressions inside string scalars.
use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

pub const OPEN: &str = "${{";
pub const CLOSE: &str = "}}";

static EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\$\{\{(.*?)\}\}").unwrap());

/// A piece of a string scalar: literal text or the body of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// body with the surrounding padding trimmed
    Expression(&'a str),
}

pub fn contains_expression(s: &str) -> bool {
    EXPRESSION.is_match(s)
}

/// Split a string into text and expression segments, in order. Empty text
/// between adjacent expressions is not reported.
pub fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in EXPRESSION.captures_iter(s) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else { continue };
        if whole.start() > last {
            out.push(Segment::Text(&s[last..whole.start()]));
        }
        out.push(Segment::Expression(body.as_str().trim()));
        last = whole.end();
    }
    if last < s.len() {
        out.push(Segment::Text(&s[last..]));
    }
    out
}

/// The expression body when the whole string is exactly one expression.
pub fn whole_expression(s: &str) -> Option<&str> {
    match segments(s).as_slice() {
        [Segment::Expression(body)] => Some(*body),
        _ => None,
    }
}

/// Collapse whitespace runs inside every expression to one space and pad the
/// body with exactly one space on each side. Text outside expressions is
/// untouched.
pub fn normalize_whitespace(s: &str) -> Cow<'_, str> {
    EXPRESSION.replace_all(s, |caps: &regex::Captures<'_>| {
        let body = caps.get(1).map_or("", |m| m.as_str());
        let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            format!("{OPEN} {CLOSE}")
        } else {
            format!("{OPEN} {collapsed} {CLOSE}")
        }
    })
}
