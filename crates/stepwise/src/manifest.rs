//! Merge rules for the one tracked metadata file (a JSON package manifest
//! with dependency sections).

use crate::error::{Result, StepError};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::collections::BTreeMap;

/// Dependency sections merged by default.
pub const DEFAULT_SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "peerDependencies"];

/// Package name → desired version.
pub type Overrides = BTreeMap<String, String>;

/// The two sides of a conflicted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSides {
    /// Already-applied side (`<<<<<<<` … `=======`).
    pub head: String,
    /// Side being replayed (`=======` … `>>>>>>>`).
    pub current: String,
}

impl ConflictSides {
    pub fn is_conflicted(&self) -> bool {
        self.head != self.current
    }
}

/// Split conflict markers into both versions of the file.
///
/// Text outside the markers belongs to both sides; a diff3 base section is
/// dropped. Content without markers yields two identical sides.
pub fn split_conflict(content: &str) -> ConflictSides {
    #[derive(PartialEq)]
    enum Side {
        Both,
        Head,
        Base,
        Current,
    }

    let mut head = String::with_capacity(content.len());
    let mut current = String::with_capacity(content.len());
    let mut side = Side::Both;

    for line in content.split_inclusive('\n') {
        if line.starts_with("<<<<<<<") && side == Side::Both {
            side = Side::Head;
            continue;
        }
        if line.starts_with("|||||||") && side == Side::Head {
            side = Side::Base;
            continue;
        }
        if line.starts_with("=======") && (side == Side::Head || side == Side::Base) {
            side = Side::Current;
            continue;
        }
        if line.starts_with(">>>>>>>") && side == Side::Current {
            side = Side::Both;
            continue;
        }

        match side {
            Side::Both => {
                head.push_str(line);
                current.push_str(line);
            }
            Side::Head => head.push_str(line),
            Side::Current => current.push_str(line),
            Side::Base => {}
        }
    }

    ConflictSides { head, current }
}

/// Indentation used by a pretty-printed JSON document: whatever whitespace
/// follows the opening brace's newline. Two spaces when nothing can be sniffed.
pub fn sniff_indent(content: &str) -> String {
    let indent: String = content
        .split_once("{\n")
        .map(|(_, rest)| {
            rest.chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect()
        })
        .unwrap_or_default();

    if indent.is_empty() {
        "  ".to_string()
    } else {
        indent
    }
}

/// Merge the head version into the current one.
///
/// 1. Entries of each head section overwrite the same entries in the current
///    section, when both sides have that section and the entry exists in the
///    current one.
/// 2. Each override replaces the entry in every current section containing it.
pub fn merge_manifest(
    head: &Value,
    current: &mut Value,
    sections: &[String],
    overrides: &Overrides,
) -> Result<()> {
    let current = current.as_object_mut().ok_or(StepError::ManifestNotObject)?;
    let head = head.as_object().ok_or(StepError::ManifestNotObject)?;

    for section in sections {
        let Some(current_deps) = current.get_mut(section).and_then(Value::as_object_mut) else {
            continue;
        };

        if let Some(head_deps) = head.get(section).and_then(Value::as_object) {
            for (name, version) in head_deps {
                if let Some(slot) = current_deps.get_mut(name) {
                    *slot = version.clone();
                }
            }
        }

        for (name, version) in overrides {
            if let Some(slot) = current_deps.get_mut(name) {
                *slot = Value::String(version.clone());
            }
        }
    }

    Ok(())
}

/// Render a manifest with the given indentation.
pub fn render_manifest(value: &Value, indent: &str) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Resolve a (possibly conflicted) manifest into its merged content.
///
/// # Examples
///
/// ```
/// use stepwise::v1::manifest::{resolve_manifest, Overrides, DEFAULT_SECTIONS};
///
/// let conflicted = r#"{
///   "dependencies": {
/// <<<<<<< HEAD
///     "a": "1.0"
/// =======
///     "a": "0.9",
///     "b": "2.0"
/// >>>>>>> 1234567 (Step 1.2: bump)
///   }
/// }
/// "#;
/// let sections: Vec<String> = DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect();
/// let overrides = Overrides::from([("b".to_string(), "3.0".to_string())]);
///
/// let merged = resolve_manifest(conflicted, &sections, &overrides).unwrap();
/// let value: serde_json::Value = serde_json::from_str(&merged).unwrap();
/// assert_eq!(value["dependencies"]["a"], "1.0");
/// assert_eq!(value["dependencies"]["b"], "3.0");
/// ```
pub fn resolve_manifest(content: &str, sections: &[String], overrides: &Overrides) -> Result<String> {
    let indent = sniff_indent(content);
    let sides = split_conflict(content);

    let head: Value = serde_json::from_str(&sides.head)?;
    let mut current: Value = if sides.is_conflicted() {
        serde_json::from_str(&sides.current)?
    } else {
        head.clone()
    };

    merge_manifest(&head, &mut current, sections, overrides)?;

    let mut out = render_manifest(&current, &indent)?;
    if content.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sections() -> Vec<String> {
        DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect()
    }

    // ── split_conflict ─────────────────────────────────────────────────

    #[test]
    fn test_split_without_markers() {
        let sides = split_conflict("{\n  \"a\": 1\n}\n");
        assert_eq!(sides.head, sides.current);
        assert!(!sides.is_conflicted());
    }

    #[test]
    fn test_split_with_markers() {
        let content = "start\n<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> abc\nend\n";
        let sides = split_conflict(content);
        assert_eq!(sides.head, "start\nours\nend\n");
        assert_eq!(sides.current, "start\ntheirs\nend\n");
        assert!(sides.is_conflicted());
    }

    #[test]
    fn test_split_diff3_drops_base() {
        let content = "<<<<<<< HEAD\nours\n||||||| base\nold\n=======\ntheirs\n>>>>>>> abc\n";
        let sides = split_conflict(content);
        assert_eq!(sides.head, "ours\n");
        assert_eq!(sides.current, "theirs\n");
    }

    #[test]
    fn test_split_multiple_hunks() {
        let content = "<<<<<<< a\n1\n=======\n2\n>>>>>>> b\nmid\n<<<<<<< a\n3\n=======\n4\n>>>>>>> b\n";
        let sides = split_conflict(content);
        assert_eq!(sides.head, "1\nmid\n3\n");
        assert_eq!(sides.current, "2\nmid\n4\n");
    }

    // ── sniff_indent ───────────────────────────────────────────────────

    #[test]
    fn test_sniff_indent() {
        assert_eq!(sniff_indent("{\n    \"a\": 1\n}"), "    ");
        assert_eq!(sniff_indent("{\n\t\"a\": 1\n}"), "\t");
        assert_eq!(sniff_indent("{\"a\": 1}"), "  ");
    }

    // ── merge_manifest ─────────────────────────────────────────────────

    #[test]
    fn test_merge_head_wins_and_override_applies() {
        let head = json!({"dependencies": {"A": "1.0"}});
        let mut current = json!({"dependencies": {"A": "0.9", "B": "2.0"}});
        let overrides = Overrides::from([("B".to_string(), "3.0".to_string())]);

        merge_manifest(&head, &mut current, &sections(), &overrides).unwrap();
        assert_eq!(current, json!({"dependencies": {"A": "1.0", "B": "3.0"}}));
    }

    #[test]
    fn test_merge_does_not_add_entries() {
        let head = json!({"dependencies": {"A": "1.0", "C": "5.0"}});
        let mut current = json!({"dependencies": {"A": "0.9"}});
        let overrides = Overrides::from([("D".to_string(), "1.0".to_string())]);

        merge_manifest(&head, &mut current, &sections(), &overrides).unwrap();
        assert_eq!(current, json!({"dependencies": {"A": "1.0"}}));
    }

    #[test]
    fn test_merge_overrides_every_section() {
        let head = json!({});
        let mut current = json!({
            "dependencies": {"x": "1"},
            "devDependencies": {"x": "1", "y": "1"}
        });
        let overrides = Overrides::from([("x".to_string(), "2".to_string())]);

        merge_manifest(&head, &mut current, &sections(), &overrides).unwrap();
        assert_eq!(current["dependencies"]["x"], "2");
        assert_eq!(current["devDependencies"]["x"], "2");
        assert_eq!(current["devDependencies"]["y"], "1");
    }

    #[test]
    fn test_merge_ignores_unlisted_sections() {
        let head = json!({"scripts": {"x": "new"}});
        let mut current = json!({"scripts": {"x": "old"}});
        merge_manifest(&head, &mut current, &sections(), &Overrides::new()).unwrap();
        assert_eq!(current["scripts"]["x"], "old");
    }

    #[test]
    fn test_merge_rejects_non_objects() {
        let mut current = json!([1, 2]);
        assert!(merge_manifest(&json!({}), &mut current, &sections(), &Overrides::new()).is_err());
    }

    // ── resolve_manifest ───────────────────────────────────────────────

    #[test]
    fn test_resolve_preserves_indent_and_order() {
        let content = "{\n    \"name\": \"demo\",\n    \"dependencies\": {\n        \"zeta\": \"1.0\",\n        \"alpha\": \"1.0\"\n    }\n}\n";
        let overrides = Overrides::from([("alpha".to_string(), "2.0".to_string())]);
        let out = resolve_manifest(content, &sections(), &overrides).unwrap();
        assert_eq!(
            out,
            "{\n    \"name\": \"demo\",\n    \"dependencies\": {\n        \"zeta\": \"1.0\",\n        \"alpha\": \"2.0\"\n    }\n}\n"
        );
    }

    #[test]
    fn test_resolve_invalid_json() {
        assert!(resolve_manifest("{ nope", &sections(), &Overrides::new()).is_err());
    }
}
