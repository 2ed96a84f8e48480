//! Lexical jail containment.
//!
//! A jail is an absolute root directory that every virtualised path must stay
//! within. The functions here never touch the filesystem: `..` segments are
//! resolved textually and comparisons happen on whole path segments, so a
//! sibling such as `/jailbreak` is never mistaken for part of `/jail`.
//!
//! An empty jail disables containment and every function passes its input
//! through unchanged.

use std::path::MAIN_SEPARATOR_STR;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Lexically normalises `path`.
///
/// Repeated separators and `.` segments are removed and `..` segments consume
/// the preceding normal segment. A `..` directly beneath a root is dropped,
/// while leading `..` segments of a relative path are preserved. An empty
/// input cleans to `.`.
#[must_use]
pub fn clean(path: &Utf8Path) -> Utf8PathBuf {
    let mut anchor = Utf8PathBuf::new();
    let mut rooted = false;
    let mut parts: Vec<&str> = Vec::new();

    for component in path.components() {
        match component {
            Utf8Component::Prefix(prefix) => anchor.push(prefix.as_str()),
            Utf8Component::RootDir => {
                anchor.push(component.as_str());
                rooted = true;
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            Utf8Component::Normal(name) => parts.push(name),
        }
    }

    if anchor.as_str().is_empty() && parts.is_empty() {
        return Utf8PathBuf::from(".");
    }
    for part in parts {
        anchor.push(part);
    }
    anchor
}

/// Computes the lexical path leading from `base` to `target`.
///
/// Returns `None` when no such path exists: one side is absolute and the
/// other relative, the two live on different prefixes (drives), or `base`
/// climbs above its starting point with `..` segments that cannot be undone.
#[must_use]
pub fn relative(base: &Utf8Path, target: &Utf8Path) -> Option<Utf8PathBuf> {
    let from = clean(base);
    let to = clean(target);
    if from.has_root() != to.has_root() {
        return None;
    }

    let base_parts = significant_components(&from);
    let target_parts = significant_components(&to);
    let anchors = |parts: &[Utf8Component<'_>]| {
        parts
            .iter()
            .take_while(|part| matches!(part, Utf8Component::Prefix(_) | Utf8Component::RootDir))
            .count()
    };

    let shared = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(left, right)| left == right)
        .count();
    if shared < anchors(&base_parts) || shared < anchors(&target_parts) {
        return None;
    }

    let base_rest = base_parts.get(shared..).unwrap_or_default();
    if base_rest.contains(&Utf8Component::ParentDir) {
        return None;
    }

    let mut path = Utf8PathBuf::new();
    for _ in base_rest {
        path.push("..");
    }
    for part in target_parts.get(shared..).unwrap_or_default() {
        path.push(part.as_str());
    }
    if path.as_str().is_empty() {
        path.push(".");
    }
    Some(path)
}

/// Reports whether `path` lies at or beneath `jail`.
///
/// An empty jail contains everything and relative paths are always
/// considered contained: they are anchored later against a working directory
/// that is itself confined.
#[must_use]
pub fn is_contained(jail: &Utf8Path, path: &Utf8Path) -> bool {
    if jail.as_str().is_empty() || !path.is_absolute() {
        return true;
    }
    relative(jail, path).is_some_and(|rel| !climbs(&rel))
}

/// Forces `path` inside `jail`.
///
/// Relative paths are joined onto the jail. Absolute paths that already lie
/// inside are returned cleaned. Absolute paths outside the jail are re-rooted
/// beneath it rather than rejected; callers that must refuse such paths
/// check [`is_contained`] first.
#[must_use]
pub fn ensure_contained(jail: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if jail.as_str().is_empty() {
        return path.to_owned();
    }
    if path.as_str().is_empty() {
        return clean(jail);
    }
    if path.is_absolute() && is_contained(jail, path) {
        return clean(path);
    }

    let mut rerooted = clean(jail);
    for component in clean(path).components() {
        if let Utf8Component::Normal(name) = component {
            rerooted.push(name);
        }
    }
    rerooted
}

/// Removes the jail prefix from `path`, returning it as seen from inside the
/// jail (rooted at the platform separator).
///
/// Paths outside the jail are returned cleaned but otherwise untouched.
#[must_use]
pub fn strip_prefix(jail: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if jail.as_str().is_empty() {
        return path.to_owned();
    }
    match relative(jail, path) {
        Some(rel) if !climbs(&rel) => clean(&Utf8Path::new(MAIN_SEPARATOR_STR).join(rel)),
        _ => clean(path),
    }
}

fn climbs(rel: &Utf8Path) -> bool {
    matches!(rel.components().next(), Some(Utf8Component::ParentDir))
}

fn significant_components(path: &Utf8Path) -> Vec<Utf8Component<'_>> {
    path.components()
        .filter(|component| *component != Utf8Component::CurDir)
        .collect()
}
