//! Text-level patching of entitlement plists.
//!
//! Entitlements pulled out of a signed binary are edited as text rather than
//! round-tripped through a plist serializer, so everything except the touched
//! key stays byte-identical to what `codesign` printed.

use crate::error::{RepackError, Result};
use plist::Value;
use regex::Regex;
use std::fmt;
use std::io::Cursor;
use std::sync::LazyLock;

/// Keys that must be true for a binary to be debuggable, in the order they are applied.
pub const DEBUGGABLE_KEYS: [&str; 3] = ["get-task-allow", "task_for_pid-allow", "run-unsigned-code"];

static PLIST_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</dict>\s*</plist>").expect("static regex is valid"));

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex is valid"));

/// What happened to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPatch {
    AlreadyTrue,
    Flipped,
    Inserted,
    /// The key is declared but its value is not `<true/>` or `<false/>`.
    NotBoolean,
}

impl KeyPatch {
    pub fn changed(self) -> bool {
        matches!(self, KeyPatch::Flipped | KeyPatch::Inserted)
    }
}

impl fmt::Display for KeyPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyPatch::AlreadyTrue => "already true",
            KeyPatch::Flipped => "false -> true",
            KeyPatch::Inserted => "inserted",
            KeyPatch::NotBoolean => "has a non-boolean value, left untouched",
        };
        f.write_str(s)
    }
}

fn key_decl(key: &str) -> String {
    format!(r"<key>\s*{}\s*</key>", regex::escape(key))
}

/// Byte ranges of the XML comments in `xml`.
fn comment_spans(xml: &str) -> Vec<(usize, usize)> {
    COMMENT.find_iter(xml).map(|m| (m.start(), m.end())).collect()
}

fn in_comment(spans: &[(usize, usize)], pos: usize) -> bool {
    spans.iter().any(|&(start, end)| start <= pos && pos < end)
}

fn canonical_pair(key: &str) -> String {
    format!("<key>{}</key>\n\t<true/>", key)
}

/// Make sure `key` exists in `xml` and is set to `<true/>`.
///
/// Text and comments may sit between the key and its boolean marker. Keys that
/// only appear inside a comment are not declarations. A key declared with
/// some other value type is reported as [`KeyPatch::NotBoolean`]
/// and the document is returned unchanged.
pub fn ensure_key_true(xml: &str, key: &str) -> Result<(String, KeyPatch)> {
    let boolean = Regex::new(&format!(
        r"(?s){}(?:[^<]|<!--.*?-->)*?<(?i:(true|false))\s*/>",
        key_decl(key)
    ))?;
    let comments = comment_spans(xml);

    let found = boolean
        .captures_iter(xml)
        .find(|caps| caps.get(0).is_some_and(|m| !in_comment(&comments, m.start())));
    if let Some(caps) = found {
        let span = caps.get(0).expect("group 0 always participates");
        let marker = &caps[1];
        if marker.eq_ignore_ascii_case("true") {
            return Ok((xml.to_string(), KeyPatch::AlreadyTrue));
        }

        let mut out = String::with_capacity(xml.len() + 8);
        out.push_str(&xml[..span.start()]);
        out.push_str(&canonical_pair(key));
        out.push_str(&xml[span.end()..]);
        return Ok((out, KeyPatch::Flipped));
    }

    let declared = Regex::new(&key_decl(key))?
        .find_iter(xml)
        .any(|m| !in_comment(&comments, m.start()));
    if declared {
        return Ok((xml.to_string(), KeyPatch::NotBoolean));
    }

    let close = PLIST_CLOSE
        .find_iter(xml)
        .filter(|m| !in_comment(&comments, m.start()))
        .last()
        .ok_or_else(|| {
            RepackError::Format(format!(
                "no closing </dict></plist> to insert `{}` before",
                key
            ))
        })?;

    let mut out = String::with_capacity(xml.len() + 48);
    out.push_str(&xml[..close.start()]);
    out.push('\t');
    out.push_str(&canonical_pair(key));
    out.push('\n');
    out.push_str(&xml[close.start()..]);
    Ok((out, KeyPatch::Inserted))
}

/// Apply [`ensure_key_true`] for every key in [`DEBUGGABLE_KEYS`], feeding each
/// result into the next.
pub fn make_debuggable(xml: &str) -> Result<(String, Vec<(&'static str, KeyPatch)>)> {
    let mut doc = xml.to_string();
    let mut report = Vec::with_capacity(DEBUGGABLE_KEYS.len());

    for key in DEBUGGABLE_KEYS {
        let (patched, outcome) = ensure_key_true(&doc, key)?;
        doc = patched;
        report.push((key, outcome));
    }

    Ok((doc, report))
}

/// Parse `xml` as a plist and list the debuggable keys that are not boolean true.
pub fn missing_debuggable_keys(xml: &str) -> Result<Vec<&'static str>> {
    let value = Value::from_reader_xml(Cursor::new(xml.as_bytes()))?;
    let dict = value
        .as_dictionary()
        .ok_or_else(|| RepackError::Format("top-level plist value is not a dict".to_string()))?;

    Ok(DEBUGGABLE_KEYS
        .into_iter()
        .filter(|key| dict.get(*key).and_then(Value::as_boolean) != Some(true))
        .collect())
}
