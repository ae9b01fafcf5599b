/*
 * folder.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Fermoposta, a secure mail server.
 *
 * Fermoposta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Fermoposta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Fermoposta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Folder tree: validation, quote escaping, path resolution, ordering,
//! LIST-style pattern matching, and the create/rename walks. A folder row
//! stores one escaped path segment; full paths are dot-joined walks to the
//! root. The top-level Inbox is reserved: it cannot be created, renamed,
//! or removed, and it compares case-insensitively.

use std::collections::BTreeMap;

use crate::storage::{FolderContext, Transaction};

use super::MailboxError;

/// Escaped form of an embedded quote (modified UTF-7, as stored).
const QUOTE_ESCAPE: &str = "&ACI-";

/// Limits applied to folder names, from [`crate::CoreConfig`].
#[derive(Debug, Clone, Copy)]
pub struct FolderLimits {
    /// Maximum bytes per path segment after unescaping.
    pub segment_bytes: usize,
    /// Maximum node depth of a path.
    pub recursion: usize,
}

impl Default for FolderLimits {
    fn default() -> Self {
        Self { segment_bytes: 16, recursion: 10 }
    }
}

/// One folder row: a single escaped segment plus tree position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub folder_id: u64,
    /// 0 marks a root-level folder.
    pub parent_id: u64,
    pub order: u32,
    pub name: String,
}

/// Counts gathered by a folder status scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStatus {
    pub folder_id: u64,
    pub messages: u64,
    pub recent: u64,
    pub unseen: u64,
    /// Ordinal of the first unseen message, 0 when none.
    pub first: u64,
    pub uidnext: u64,
}

// ============================================================
// Names
// ============================================================

/// Validate a folder path. Names cannot be empty, start with a period,
/// contain bytes outside 0x20..=0x7E, or contain consecutive periods. A
/// single trailing period is silently trimmed. Returns the trimmed path.
pub fn validate_name(name: &str) -> Result<String, MailboxError> {
    if name.is_empty() {
        return Err(MailboxError::InvalidName(String::from("empty name")));
    }
    let bytes = name.as_bytes();
    if bytes[0] == b'.' {
        return Err(MailboxError::InvalidName(String::from("leading period")));
    }
    let mut prev_dot = false;
    for &b in bytes {
        if !(0x20..=0x7e).contains(&b) {
            return Err(MailboxError::InvalidName(String::from(
                "non-printable character",
            )));
        }
        if b == b'.' {
            if prev_dot {
                return Err(MailboxError::InvalidName(String::from(
                    "consecutive periods",
                )));
            }
            prev_dot = true;
        } else {
            prev_dot = false;
        }
    }
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    Ok(trimmed.to_string())
}

/// Node depth of a validated path.
pub fn count_levels(name: &str) -> usize {
    name.bytes().filter(|b| *b == b'.').count() + 1
}

/// Escape embedded quotes for storage.
pub fn escape_quotes(name: &str) -> String {
    name.replace('"', QUOTE_ESCAPE)
}

/// Undo [`escape_quotes`] for display and length accounting.
pub fn unescape_quotes(name: &str) -> String {
    name.replace(QUOTE_ESCAPE, "\"")
}

/// Quoted display form with embedded quotes backslash-escaped.
pub fn escaped_display(name: &str) -> String {
    format!("\"{}\"", unescape_quotes(name).replace('"', "\\\""))
}

fn check_segments(name: &str, limits: &FolderLimits) -> Result<(), MailboxError> {
    for segment in unescape_quotes(name).split('.') {
        if segment.len() > limits.segment_bytes {
            return Err(MailboxError::SegmentTooLong);
        }
    }
    Ok(())
}

fn is_inbox_path(name: &str) -> bool {
    name.split('.')
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case("Inbox"))
}

// ============================================================
// Tree walks
// ============================================================

/// Full dot-joined path of a folder.
pub fn full_name(folders: &BTreeMap<u64, Folder>, folder: &Folder) -> String {
    let mut segments = vec![folder.name.clone()];
    let mut parent = folder.parent_id;
    // Bounded walk; a corrupt tree must not spin.
    let mut hops = 0;
    while parent != 0 && hops < 64 {
        match folders.get(&parent) {
            Some(p) => {
                segments.push(p.name.clone());
                parent = p.parent_id;
            }
            None => break,
        }
        hops += 1;
    }
    segments.reverse();
    segments.join(".")
}

/// Find a folder by full path. "Inbox" alone resolves case-insensitively.
pub fn by_name<'a>(folders: &'a BTreeMap<u64, Folder>, path: &str) -> Option<&'a Folder> {
    folders.values().find(|f| {
        if path.eq_ignore_ascii_case("Inbox") {
            f.parent_id == 0 && f.name.eq_ignore_ascii_case("Inbox")
        } else {
            full_name(folders, f) == path
        }
    })
}

/// True when the folder has at least one child folder.
pub fn has_children(folders: &BTreeMap<u64, Folder>, folder_id: u64) -> bool {
    folders.values().any(|f| f.parent_id == folder_id)
}

/// Next order value under a parent: highest child order plus one, or zero.
pub fn next_order(folders: &BTreeMap<u64, Folder>, parent_id: u64) -> u32 {
    let mut order = 0;
    for f in folders.values() {
        if f.parent_id == parent_id && f.order >= order {
            order = f.order + 1;
        }
    }
    order
}

/// True when `candidate` is `folder_id` itself or one of its descendants.
fn is_self_or_descendant(
    folders: &BTreeMap<u64, Folder>,
    folder_id: u64,
    candidate: u64,
) -> bool {
    let mut current = candidate;
    let mut hops = 0;
    while current != 0 && hops < 64 {
        if current == folder_id {
            return true;
        }
        current = folders.get(&current).map_or(0, |f| f.parent_id);
        hops += 1;
    }
    false
}

// ============================================================
// Pattern matching
// ============================================================

/// LIST-style wildcard compare: `*` matches any run including the
/// hierarchy delimiter, `%` any run without it. The bare name "Inbox"
/// compares case-insensitively.
pub fn matches(name: &str, pattern: &str) -> bool {
    if name.eq_ignore_ascii_case("Inbox") && pattern.eq_ignore_ascii_case("Inbox") {
        return true;
    }

    let left = name.as_bytes();
    let right = pattern.as_bytes();
    let mut li = 0;
    let mut ri = 0;

    while ri < right.len() {
        let seek = right[ri];
        ri += 1;

        if seek == b'*' {
            return true;
        } else if seek == b'%' {
            while li < left.len() && left[li] != b'.' {
                li += 1;
            }
            if li >= left.len() && ri >= right.len() {
                return true;
            } else if li >= left.len() || ri >= right.len() {
                return false;
            } else if left[li] == b'.' && right[ri] == b'.' {
                ri += 1;
            }
        } else if li >= left.len() || seek != left[li] {
            return false;
        }

        li += 1;
    }

    true
}

// ============================================================
// Create / rename
// ============================================================

/// Create a folder at `path`, creating any missing parents. Each new
/// segment is inserted in the database first, then the index. Returns the
/// id of the final segment.
pub fn create(
    tx: &mut dyn Transaction,
    folders: &mut BTreeMap<u64, Folder>,
    user_id: u64,
    context: FolderContext,
    path: &str,
    limits: &FolderLimits,
) -> Result<u64, MailboxError> {
    let path = validate_name(path)?;
    if count_levels(&path) > limits.recursion {
        return Err(MailboxError::DepthExceeded);
    }
    if is_inbox_path(&path) {
        return Err(MailboxError::Reserved);
    }
    check_segments(&path, limits)?;

    let stored = escape_quotes(&unescape_quotes(&path));
    if by_name(folders, &stored).is_some() {
        return Err(MailboxError::Exists);
    }

    let mut parent = 0u64;
    let mut working = String::new();
    let mut last = 0u64;
    for segment in stored.split('.') {
        if working.is_empty() {
            working.push_str(segment);
        } else {
            working.push('.');
            working.push_str(segment);
        }
        match by_name(folders, &working) {
            Some(existing) => {
                parent = existing.folder_id;
                last = existing.folder_id;
            }
            None => {
                let order = next_order(folders, parent);
                let id = tx.insert_folder(user_id, context, segment, parent, order)?;
                folders.insert(
                    id,
                    Folder {
                        folder_id: id,
                        parent_id: parent,
                        order,
                        name: segment.to_string(),
                    },
                );
                parent = id;
                last = id;
            }
        }
    }

    Ok(last)
}

/// Rename (and possibly re-parent) a folder to the full path `rename_to`,
/// creating any missing destination parents.
pub fn rename(
    tx: &mut dyn Transaction,
    folders: &mut BTreeMap<u64, Folder>,
    user_id: u64,
    context: FolderContext,
    folder_id: u64,
    rename_to: &str,
    limits: &FolderLimits,
) -> Result<(), MailboxError> {
    let original = folders
        .get(&folder_id)
        .ok_or_else(|| MailboxError::NotFound(String::from("folder")))?
        .clone();
    let original_path = full_name(folders, &original);

    let rename_to = validate_name(rename_to)?;
    if is_inbox_path(&original_path) || is_inbox_path(&rename_to) {
        return Err(MailboxError::Reserved);
    }
    if count_levels(&rename_to) > limits.recursion
        || count_levels(&original_path) > limits.recursion
    {
        return Err(MailboxError::DepthExceeded);
    }
    check_segments(&rename_to, limits)?;

    let stored = escape_quotes(&unescape_quotes(&rename_to));
    if by_name(folders, &stored).is_some() {
        return Err(MailboxError::Exists);
    }

    // Create all but the last destination segment.
    let segments: Vec<&str> = stored.split('.').collect();
    let mut parent = 0u64;
    let mut working = String::new();
    for segment in &segments[..segments.len() - 1] {
        if working.is_empty() {
            working.push_str(segment);
        } else {
            working.push('.');
            working.push_str(segment);
        }
        match by_name(folders, &working) {
            Some(existing) => parent = existing.folder_id,
            None => {
                let order = next_order(folders, parent);
                let id = tx.insert_folder(user_id, context, segment, parent, order)?;
                folders.insert(
                    id,
                    Folder {
                        folder_id: id,
                        parent_id: parent,
                        order,
                        name: segment.to_string(),
                    },
                );
                parent = id;
            }
        }
    }

    if is_self_or_descendant(folders, folder_id, parent) {
        return Err(MailboxError::SelfAncestor);
    }

    let order = if original.parent_id != parent {
        next_order(folders, parent)
    } else {
        original.order
    };
    let new_name = segments[segments.len() - 1];

    tx.update_folder(user_id, folder_id, new_name, parent, order)?;
    if let Some(entry) = folders.get_mut(&folder_id) {
        entry.name = new_name.to_string();
        entry.parent_id = parent;
        entry.order = order;
    }

    Ok(())
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: u64, parent: u64, order: u32, name: &str) -> Folder {
        Folder { folder_id: id, parent_id: parent, order, name: name.to_string() }
    }

    fn tree() -> BTreeMap<u64, Folder> {
        let mut map = BTreeMap::new();
        map.insert(1, folder(1, 0, 0, "Inbox"));
        map.insert(2, folder(2, 0, 1, "Projects"));
        map.insert(3, folder(3, 2, 0, "alpha"));
        map.insert(4, folder(4, 2, 1, "beta"));
        map
    }

    #[test]
    fn validate_rules() {
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a..b").is_err());
        assert!(validate_name("tab\there").is_err());
        assert!(validate_name("caf\u{e9}").is_err());
        assert_eq!(validate_name("work.").unwrap(), "work");
        assert_eq!(validate_name("a.b.c").unwrap(), "a.b.c");
    }

    #[test]
    fn level_counting() {
        assert_eq!(count_levels("a"), 1);
        assert_eq!(count_levels("a.b.c"), 3);
    }

    #[test]
    fn quote_escaping() {
        assert_eq!(escape_quotes("say \"hi\""), "say &ACI-hi&ACI-");
        assert_eq!(unescape_quotes("say &ACI-hi&ACI-"), "say \"hi\"");
        assert_eq!(escaped_display("say &ACI-hi&ACI-"), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn full_name_walks_to_root() {
        let map = tree();
        assert_eq!(full_name(&map, &map[&3]), "Projects.alpha");
        assert_eq!(full_name(&map, &map[&2]), "Projects");
    }

    #[test]
    fn by_name_and_inbox_case() {
        let map = tree();
        assert_eq!(by_name(&map, "Projects.beta").unwrap().folder_id, 4);
        assert_eq!(by_name(&map, "INBOX").unwrap().folder_id, 1);
        assert_eq!(by_name(&map, "inbox").unwrap().folder_id, 1);
        assert!(by_name(&map, "projects").is_none());
    }

    #[test]
    fn order_assignment() {
        let map = tree();
        assert_eq!(next_order(&map, 0), 2);
        assert_eq!(next_order(&map, 2), 2);
        assert_eq!(next_order(&map, 4), 0);
    }

    #[test]
    fn pattern_semantics() {
        for name in ["Inbox", "Projects", "Projects.alpha"] {
            assert!(matches(name, "*"));
        }
        assert!(matches("Projects", "%"));
        assert!(!matches("Projects.alpha", "%"));
        assert!(matches("Projects.alpha", "%.%"));
        assert!(matches("Projects.alpha", "Projects.*"));
        assert!(matches("inbox", "INBOX"));
        assert!(!matches("Projects", "Tasks"));
    }
}
