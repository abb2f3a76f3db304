//! In-place version pinning.
//!
//! Only the bytes of each pinned version value change; comments, ordering
//! and formatting elsewhere in the file are preserved.

use std::path::Path;

use protopin_core::fsutil::atomic_write;
use protopin_core::ToolKind;

use crate::error::{ConfigError, Result};
use crate::loader::parse_config;

/// A resolved version to write for one declared tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub kind: ToolKind,
    pub name: String,
    /// The floating specifier the version was resolved from.
    pub from: String,
    pub version: String,
}

/// Apply `pins` to config `text` read from `path`.
///
/// A pin applies only while the item still carries the specifier it was
/// resolved from, so a concurrent tidy that already pinned the item (or a
/// user who edited it) is never overwritten.
pub fn render_pins(path: &Path, text: &str, pins: &[Pin]) -> Result<String> {
    let config = parse_config(path, text)?;

    let mut edits = Vec::new();
    for pin in pins {
        let item = config.item(pin.kind, &pin.name).ok_or_else(|| {
            ConfigError::schema(
                path,
                format!("{} '{}' is no longer declared", pin.kind, pin.name),
            )
        })?;
        if item.specifier != pin.from || item.specifier == pin.version {
            continue;
        }
        let Some(span) = item.span.clone() else {
            continue;
        };
        edits.push((span, quote(&pin.version)));
    }

    edits.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
    let mut out = text.to_string();
    for (span, replacement) in edits {
        out.replace_range(span, &replacement);
    }
    Ok(out)
}

/// Pin versions in the file at `path`. Returns whether the file changed.
///
/// The file is re-read here so pins land on its current content; an
/// unchanged result is never written.
pub fn rewrite_versions(path: &Path, pins: &[Pin]) -> Result<bool> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let updated = render_pins(path, &text, pins)?;
    if updated == text {
        return Ok(false);
    }
    atomic_write(path, updated.as_bytes())?;
    Ok(true)
}

fn quote(version: &str) -> String {
    let mut out = String::with_capacity(version.len() + 2);
    out.push('"');
    for c in version.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
