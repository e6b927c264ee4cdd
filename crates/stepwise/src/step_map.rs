use crate::step::StepNumber;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Lifecycle of a step map.
///
/// A map is `Pending` while the rewrite that builds it is still running and
/// becomes `Committed` once that rewrite completes. Consumers in other
/// processes should only read committed maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepMapState {
    Absent,
    Pending,
    Committed,
}

/// An incremental change recorded while a rewrite proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepMapUpdate {
    /// The step was deleted.
    Remove { step: StepNumber },
    /// The step was renumbered.
    Reset { old: StepNumber, new: StepNumber },
}

/// Old step number → new step number, serialized as a flat JSON object.
///
/// # Examples
///
/// ```
/// use stepwise::v1::{StepMap, StepMapUpdate, StepNumber};
///
/// let n = |s: &str| s.parse::<StepNumber>().unwrap();
/// let mut map = StepMap::identity([n("1.1"), n("1.2"), n("1")]);
/// map.apply(&StepMapUpdate::Remove { step: n("1.1") });
/// map.apply(&StepMapUpdate::Reset { old: n("1.2"), new: n("1.1") });
///
/// assert_eq!(map.get("1.2"), Some("1.1"));
/// assert_eq!(map.get("1.1"), None);
/// assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"1":"1","1.2":"1.1"}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepMap {
    entries: BTreeMap<String, String>,
}

impl StepMap {
    /// Every existing step mapped to itself.
    pub fn identity<I: IntoIterator<Item = StepNumber>>(steps: I) -> Self {
        StepMap {
            entries: steps
                .into_iter()
                .map(|n| (n.to_string(), n.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.entries.get(old).map(String::as_str)
    }

    pub fn apply(&mut self, update: &StepMapUpdate) {
        match update {
            StepMapUpdate::Remove { step } => {
                self.entries.remove(&step.to_string());
            }
            StepMapUpdate::Reset { old, new } => {
                self.entries.insert(old.to_string(), new.to_string());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Placeholder for references to steps that no longer exist.
pub const REMOVED_STEP: &str = "XX.XX";

static DIFF_STEP_HELPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{\s*diffStep\s+"?(\d+\.\d+)"?.*\}\}"#).expect("valid diffStep pattern")
});
static HELPER_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"module\s?=\s?"?([^\s"]+)"?"#).expect("valid module pattern"));
static HELPER_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(diffStep\s+"?)\d+\.\d+"#).expect("valid step pattern"));
static MANUAL_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"step(\d+)\.(md|tmpl)").expect("valid manual file pattern"));

/// Shift every `step<N>.md` / `step<N>.tmpl` name in a patch by `delta`.
///
/// Names that would drop below step 1 are left alone.
///
/// ```
/// use stepwise::v1::shift_manual_files;
///
/// let patch = "+++ b/manuals/templates/step3.tmpl\n+++ b/manuals/views/step3.md\n";
/// assert_eq!(
///     shift_manual_files(patch, -1),
///     "+++ b/manuals/templates/step2.tmpl\n+++ b/manuals/views/step2.md\n"
/// );
/// ```
pub fn shift_manual_files(patch: &str, delta: i64) -> String {
    if delta == 0 {
        return patch.to_string();
    }
    MANUAL_FILE
        .replace_all(patch, |caps: &Captures| {
            match caps[1].parse::<i64>().ok().and_then(|n| n.checked_add(delta)) {
                Some(n) if n >= 1 => format!("step{}.{}", n, &caps[2]),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rewrite `{{diffStep "N.M" ...}}` template references in a patch.
///
/// Only helpers whose `module=` matches `submodule` are touched (an absent
/// module matches the empty name). Steps missing from the map become
/// [`REMOVED_STEP`].
pub fn remap_diff_step_references(patch: &str, map: &StepMap, submodule: &str) -> String {
    DIFF_STEP_HELPER
        .replace_all(patch, |caps: &Captures| {
            let helper = &caps[0];
            let helper_module = HELPER_MODULE
                .captures(helper)
                .map(|m| m[1].to_string())
                .unwrap_or_default();

            if helper_module != submodule {
                return helper.to_string();
            }

            let new_step = map.get(&caps[1]).unwrap_or(REMOVED_STEP);
            HELPER_STEP
                .replace(helper, |c: &Captures| format!("{}{}", &c[1], new_step))
                .into_owned()
        })
        .into_owned()
}
