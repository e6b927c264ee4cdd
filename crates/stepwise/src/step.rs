use crate::error::{Result, StepError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix every step commit subject starts with.
pub const STEP_PREFIX: &str = "Step ";

/// Whether a step closes a logical unit (`N`) or is an increment inside one (`N.M`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    Super,
    Sub,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Super => write!(f, "super"),
            StepKind::Sub => write!(f, "sub"),
        }
    }
}

/// A step number, `N` or `N.M`, both components positive.
///
/// The derived ordering compares the super number first and then the sub
/// number, with an absent sub number sorting before any present one.
///
/// # Examples
///
/// ```
/// use stepwise::v1::StepNumber;
///
/// let sub: StepNumber = "2.1".parse().unwrap();
/// let sup: StepNumber = "2".parse().unwrap();
/// assert!(sup < sub);
/// assert_eq!(sub.to_string(), "2.1");
/// assert!("2.0".parse::<StepNumber>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepNumber {
    pub super_number: u32,
    pub sub_number: Option<u32>,
}

impl StepNumber {
    pub fn super_step(super_number: u32) -> Self {
        StepNumber {
            super_number,
            sub_number: None,
        }
    }

    pub fn sub_step(super_number: u32, sub_number: u32) -> Self {
        StepNumber {
            super_number,
            sub_number: Some(sub_number),
        }
    }

    pub fn kind(&self) -> StepKind {
        if self.sub_number.is_some() {
            StepKind::Sub
        } else {
            StepKind::Super
        }
    }

    pub fn is_super(&self) -> bool {
        self.kind() == StepKind::Super
    }

    /// The super-step this number belongs to (itself for a super-step).
    pub fn super_part(&self) -> StepNumber {
        StepNumber::super_step(self.super_number)
    }
}

impl fmt::Display for StepNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_number {
            Some(sub) => write!(f, "{}.{}", self.super_number, sub),
            None => write!(f, "{}", self.super_number),
        }
    }
}

impl FromStr for StepNumber {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self> {
        let (super_part, sub_part) = match s.split_once('.') {
            Some((sup, sub)) => (sup, Some(sub)),
            None => (s, None),
        };

        let super_number = parse_component(super_part).ok_or_else(|| malformed(s))?;
        let sub_number = match sub_part {
            Some(sub) => Some(parse_component(sub).ok_or_else(|| malformed(s))?),
            None => None,
        };

        Ok(StepNumber {
            super_number,
            sub_number,
        })
    }
}

impl TryFrom<String> for StepNumber {
    type Error = StepError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<StepNumber> for String {
    fn from(value: StepNumber) -> Self {
        value.to_string()
    }
}

fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().filter(|n| *n > 0)
}

fn malformed(s: &str) -> StepError {
    StepError::MalformedStep(s.to_string())
}

/// A position in the tutorial: the root commit or a numbered step.
///
/// `Root` orders before every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepId {
    Root,
    Step(StepNumber),
}

impl StepId {
    pub fn number(&self) -> Option<&StepNumber> {
        match self {
            StepId::Root => None,
            StepId::Step(n) => Some(n),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, StepId::Root)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepId::Root => write!(f, "root"),
            StepId::Step(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for StepId {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "root" {
            Ok(StepId::Root)
        } else {
            Ok(StepId::Step(s.parse()?))
        }
    }
}

impl From<StepNumber> for StepId {
    fn from(value: StepNumber) -> Self {
        StepId::Step(value)
    }
}

/// A view of a step commit derived from its message.
///
/// Commits are the source of truth; a descriptor is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub number: StepNumber,
    pub message: String,
}

impl StepDescriptor {
    pub fn new(number: StepNumber, message: impl Into<String>) -> Self {
        StepDescriptor {
            number,
            message: message.into(),
        }
    }

    /// Parse `"Step <number>: <message>"`.
    ///
    /// Returns `None` for anything that is not a step message; the message may
    /// span several lines, everything after the number is kept.
    ///
    /// # Examples
    ///
    /// ```
    /// use stepwise::v1::{StepDescriptor, StepKind};
    ///
    /// let d = StepDescriptor::parse("Step 1.2: Add a router").unwrap();
    /// assert_eq!(d.number.to_string(), "1.2");
    /// assert_eq!(d.message, "Add a router");
    /// assert_eq!(d.kind(), StepKind::Sub);
    ///
    /// assert!(StepDescriptor::parse("Initial commit").is_none());
    /// ```
    pub fn parse(message: &str) -> Option<Self> {
        let rest = message.strip_prefix(STEP_PREFIX)?;
        let (number, text) = rest.split_once(": ")?;
        let number: StepNumber = number.parse().ok()?;
        Some(StepDescriptor::new(number, text))
    }

    pub fn format(&self) -> String {
        format!("{}{}: {}", STEP_PREFIX, self.number, self.message)
    }

    pub fn kind(&self) -> StepKind {
        self.number.kind()
    }
}

/// Compute the step that follows `current`.
///
/// `current` is the most recent step found some offset back in history and
/// `lookahead` the step one commit closer to HEAD (only supplied when the
/// offset is non-zero). Without a previous step the answer is always `1.1`.
///
/// | current | lookahead      | result        |
/// |---------|----------------|---------------|
/// | `N`     | none or `X.Y`  | `N+1.1`       |
/// | `N.M`   | none or `X.Y`  | `N.M+1`       |
/// | `N`     | super `X`      | `N+1`         |
/// | `N.M`   | super `X`      | `N`           |
///
/// # Examples
///
/// ```
/// use stepwise::v1::{next_step, StepNumber};
///
/// let n = |s: &str| s.parse::<StepNumber>().unwrap();
/// assert_eq!(next_step(Some(&n("2.1")), None).unwrap(), n("2.2"));
/// assert_eq!(next_step(Some(&n("2")), None).unwrap(), n("3.1"));
/// assert_eq!(next_step(None, None).unwrap(), n("1.1"));
/// assert!(next_step(Some(&n("4294967295")), None).is_err());
/// ```
pub fn next_step(current: Option<&StepNumber>, lookahead: Option<&StepNumber>) -> Result<StepNumber> {
    let Some(current) = current else {
        return Ok(StepNumber::sub_step(1, 1));
    };

    let lookahead_is_super = lookahead.is_some_and(|n| n.is_super());
    let overflow = || StepError::MalformedStep(format!("no step follows {}", current));

    Ok(match (current.sub_number, lookahead_is_super) {
        (None, true) => {
            StepNumber::super_step(current.super_number.checked_add(1).ok_or_else(overflow)?)
        }
        (Some(_), true) => StepNumber::super_step(current.super_number),
        (None, false) => {
            StepNumber::sub_step(current.super_number.checked_add(1).ok_or_else(overflow)?, 1)
        }
        (Some(sub), false) => {
            StepNumber::sub_step(current.super_number, sub.checked_add(1).ok_or_else(overflow)?)
        }
    })
}

/// The super-step number [`next_step`] would land in.
pub fn next_super_step(
    current: Option<&StepNumber>,
    lookahead: Option<&StepNumber>,
) -> Result<StepNumber> {
    Ok(next_step(current, lookahead)?.super_part())
}
