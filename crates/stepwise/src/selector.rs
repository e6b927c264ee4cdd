use crate::error::{Result, StepError};
use crate::step::{StepId, StepNumber};

/// One argument to `edit`: what the user typed, before it is resolved against history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSelector {
    Root,
    Step(StepNumber),
    /// `A..B` or `A...B`; open ends mean "from root" and "to the most recent step".
    Range {
        start: Option<StepId>,
        end: Option<StepId>,
    },
    /// Anything else is handed to the repository as a revision (hash, branch, `HEAD~2`).
    Revision(String),
}

impl StepSelector {
    /// # Examples
    ///
    /// ```
    /// use stepwise::v1::{StepSelector, StepId};
    ///
    /// assert_eq!(StepSelector::parse("root").unwrap(), StepSelector::Root);
    /// assert!(matches!(StepSelector::parse("1.2").unwrap(), StepSelector::Step(_)));
    /// assert!(matches!(
    ///     StepSelector::parse("2...3").unwrap(),
    ///     StepSelector::Range { start: Some(StepId::Step(_)), end: Some(StepId::Step(_)) }
    /// ));
    /// assert!(matches!(StepSelector::parse("HEAD~2").unwrap(), StepSelector::Revision(_)));
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s == "root" {
            return Ok(StepSelector::Root);
        }

        if let Some((start, end)) = s.split_once("..") {
            let end = end.trim_start_matches('.');
            return Ok(StepSelector::Range {
                start: parse_endpoint(s, start)?,
                end: parse_endpoint(s, end)?,
            });
        }

        if looks_like_step_number(s) {
            return Ok(StepSelector::Step(s.parse()?));
        }

        if s.is_empty() {
            return Err(StepError::MalformedSelector(s.to_string()));
        }

        Ok(StepSelector::Revision(s.to_string()))
    }
}

fn parse_endpoint(selector: &str, endpoint: &str) -> Result<Option<StepId>> {
    if endpoint.is_empty() {
        return Ok(None);
    }
    endpoint
        .parse::<StepId>()
        .map(Some)
        .map_err(|_| StepError::MalformedSelector(selector.to_string()))
}

/// `^\d{1,5}(\.\d+)?$`; longer digit runs are left to revision lookup.
fn looks_like_step_number(s: &str) -> bool {
    let (sup, sub) = match s.split_once('.') {
        Some((sup, sub)) => (sup, Some(sub)),
        None => (s, None),
    };
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());

    digits(sup) && sup.len() <= 5 && sub.is_none_or(digits)
}

/// Position of a step in a well-formed history: a super-step commit closes
/// its unit, so it comes after its own sub-steps.
pub fn history_key(id: &StepId) -> (u32, u32) {
    match id {
        StepId::Root => (0, 0),
        StepId::Step(n) => (n.super_number, n.sub_number.unwrap_or(u32::MAX)),
    }
}

/// Expand a range over the steps that exist in history.
///
/// Every step lying between the two endpoints in history order is included,
/// endpoints too. Returns `None` when an explicitly named endpoint is not one
/// of `all_steps`.
///
/// # Examples
///
/// ```
/// use stepwise::v1::{expand_range, StepId};
///
/// let all: Vec<StepId> = ["root", "1.1", "1", "2", "3.1", "3"]
///     .iter()
///     .map(|s| s.parse().unwrap())
///     .collect();
/// let two: StepId = "2".parse().unwrap();
/// let three: StepId = "3".parse().unwrap();
///
/// let expanded = expand_range(&all, Some(two), Some(three)).unwrap();
/// let rendered: Vec<String> = expanded.iter().map(|s| s.to_string()).collect();
/// assert_eq!(rendered, ["2", "3", "3.1"]);
/// ```
pub fn expand_range(
    all_steps: &[StepId],
    start: Option<StepId>,
    end: Option<StepId>,
) -> Option<Vec<StepId>> {
    let start = match start {
        Some(id) if !all_steps.contains(&id) => return None,
        Some(id) => id,
        None => StepId::Root,
    };
    let end = match end {
        Some(id) if !all_steps.contains(&id) => return None,
        Some(id) => id,
        None => match all_steps.iter().max_by_key(|id| history_key(id)) {
            Some(last) => *last,
            None => return Some(Vec::new()),
        },
    };

    let (low, high) = (history_key(&start), history_key(&end));
    let selected = all_steps
        .iter()
        .filter(|id| {
            let key = history_key(id);
            key >= low && key <= high
        })
        .copied()
        .collect();

    Some(sort_selection(selected))
}

/// Sort by the step total order (root first) and drop duplicates.
pub fn sort_selection(mut steps: Vec<StepId>) -> Vec<StepId> {
    steps.sort();
    steps.dedup();
    steps
}

/// The selected step that comes first in history; the rewrite starts at its parent.
pub fn earliest_in_history(steps: &[StepId]) -> Option<StepId> {
    steps.iter().min_by_key(|id| history_key(id)).copied()
}
