//! Version specifiers: exact pins versus floating requirements.
//!
//! Wraps the `semver` crate with the lenient parsing toolchain versions need.
//! protoc publishes two-component versions (`21.12`), Go modules carry a `v`
//! prefix (`v1.28.1`), and repositories are pinned by commit hash.

use std::cmp::Ordering;

use crate::error::{CoreError, Result};
use crate::kind::ToolKind;

/// A parsed semantic version.
pub type Version = semver::Version;

/// A version requirement (range expression).
pub type VersionReq = semver::VersionReq;

/// How a declared version should be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// `latest` or `*`: newest stable release, or the default branch head.
    Latest,
    /// Already pinned; used verbatim.
    Exact(String),
    /// A semver range resolved to the highest match.
    Requirement(VersionReq),
    /// A git branch or tag, resolved to a commit.
    Reference(String),
}

impl VersionSpec {
    /// Classify a raw specifier for a tool of the given kind.
    pub fn parse(kind: ToolKind, raw: &str) -> Result<Self> {
        let spec = raw.trim();
        let invalid = |reason: &str| CoreError::InvalidVersion {
            kind,
            spec: raw.to_string(),
            reason: reason.to_string(),
        };

        if spec.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if spec == "latest" || spec == "*" {
            return Ok(VersionSpec::Latest);
        }

        match kind {
            ToolKind::Repository => {
                if is_commit_hash(spec) {
                    Ok(VersionSpec::Exact(spec.to_string()))
                } else if spec.chars().any(char::is_whitespace) {
                    Err(invalid("git references cannot contain whitespace"))
                } else {
                    Ok(VersionSpec::Reference(spec.to_string()))
                }
            }
            ToolKind::Protoc | ToolKind::Plugin => {
                if is_exact_version(spec) {
                    return Ok(VersionSpec::Exact(spec.to_string()));
                }
                VersionReq::parse(spec.trim_start_matches('v'))
                    .map(VersionSpec::Requirement)
                    .map_err(|e| invalid(&e.to_string()))
            }
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, VersionSpec::Exact(_))
    }

    /// The pinned version, if this specifier is already exact.
    pub fn pinned(&self) -> Option<&str> {
        match self {
            VersionSpec::Exact(v) => Some(v),
            _ => None,
        }
    }
}

/// A 40-character hexadecimal git object id.
pub fn is_commit_hash(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether `s` names one release: 2 or 3 numeric components, an optional `v`
/// prefix and pre-release/build suffix, and no range operator.
pub fn is_exact_version(s: &str) -> bool {
    let core = split_suffix(s.strip_prefix('v').unwrap_or(s)).0;
    let parts: Vec<&str> = core.split('.').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Parse toolchain version strings, padding missing components with zero.
///
/// `v1.28.1` → `1.28.1`, `21.12` → `21.12.0`, `21.0-rc1` → `21.0.0-rc1`.
pub fn parse_lenient(raw: &str) -> Option<Version> {
    let s = raw.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    let (core, suffix) = split_suffix(s);
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&format!("{}{suffix}", parts.join("."))).ok()
}

fn split_suffix(s: &str) -> (&str, &str) {
    match s.find(['-', '+']) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    }
}

/// Compare two version strings leniently; unparseable strings sort first.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Pick the best available version for a specifier.
///
/// Returns the original string (prefix and all) of the highest version that
/// satisfies the specifier. `Latest` ignores pre-releases. `Reference` never
/// matches a version list; repositories resolve references through git.
pub fn resolve_best(available: &[String], spec: &VersionSpec) -> Option<String> {
    let candidates = available
        .iter()
        .filter_map(|raw| parse_lenient(raw).map(|v| (v, raw)));

    let best = match spec {
        VersionSpec::Latest => candidates
            .filter(|(v, _)| v.pre.is_empty())
            .max_by(|a, b| a.0.cmp(&b.0)),
        VersionSpec::Requirement(req) => candidates
            .filter(|(v, _)| req.matches(v))
            .max_by(|a, b| a.0.cmp(&b.0)),
        VersionSpec::Exact(pin) => return available.iter().find(|v| *v == pin).cloned(),
        VersionSpec::Reference(_) => None,
    };
    best.map(|(_, raw)| raw.clone())
}
