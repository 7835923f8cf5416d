//! Property-name translation between document keys and DSL method names.
//!
//! Documents use hyphenated keys (`runs-on`, `timeout-minutes`); the DSL
//! uses camel case (`runsOn`, `timeoutMinutes`). Only keys that survive the
//! round trip unchanged get a method of their own; everything else goes
//! through the generic `set("key", …)` call.
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// Builder methods (and inherited object members) a property must not shadow.
const RESERVED: &[&str] = &["build", "set", "constructor", "toString", "valueOf", "hasOwnProperty"];

/// `runs-on` → `runsOn`: hyphen segments joined, each capitalized except the first.
pub fn to_method_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, segment) in key.split('-').enumerate() {
        if i == 0 {
            out.push_str(segment);
            continue;
        }
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// `runsOn` → `runs-on`; the inverse of [`to_method_name`] on its image.
pub fn to_document_key(method: &str) -> String {
    let mut out = String::with_capacity(method.len() + 4);
    for c in method.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// The dedicated method name for `key`, when one exists.
pub fn method_for(key: &str) -> Option<String> {
    let method = to_method_name(key);
    let usable = IDENTIFIER.is_match(&method)
        && !RESERVED.contains(&method.as_str())
        && to_document_key(&method) == key;
    usable.then_some(method)
}
