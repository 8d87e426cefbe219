//! 0install version comparison.
//!
//! A version is a dot-separated list of numeric components, optionally
//! followed by one or more `-modifier[.digits...]` suffixes. Modifiers
//! order `pre < "" (no modifier, release) < rc < post`, matching the
//! upstream 0install version grammar (distinct from Homebrew's
//! `_rebuild`/`-prerelease` scheme the teacher's `zb_core::version`
//! implements, but following the same split-into-components-then-compare
//! structure).

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DottedList(Vec<u64>);

impl DottedList {
    fn parse(s: &str) -> Option<DottedList> {
        if s.is_empty() {
            return Some(DottedList(Vec::new()));
        }
        let mut out = Vec::new();
        for part in s.split('.') {
            out.push(part.parse::<u64>().ok()?);
        }
        Some(DottedList(out))
    }
}

impl Ord for DottedList {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for DottedList {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ModifierKind {
    Pre,
    Release,
    Rc,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    modifier: ModifierKind,
    dotted: DottedList,
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.modifier
            .cmp(&other.modifier)
            .then_with(|| self.dotted.cmp(&other.dotted))
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed 0install version for comparison and ordering.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    segments: Vec<Segment>,
    original: String,
}

impl Version {
    pub fn parse(s: &str) -> Option<Version> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        let mut segments = Vec::new();
        let mut iter = s.split('-');

        let first = iter.next()?;
        segments.push(Segment {
            modifier: ModifierKind::Release,
            dotted: DottedList::parse(first)?,
        });

        for part in iter {
            let (modifier, rest) = if let Some(rest) = part.strip_prefix("pre") {
                (ModifierKind::Pre, rest)
            } else if let Some(rest) = part.strip_prefix("rc") {
                (ModifierKind::Rc, rest)
            } else if let Some(rest) = part.strip_prefix("post") {
                (ModifierKind::Post, rest)
            } else {
                (ModifierKind::Release, part)
            };
            segments.push(Segment {
                modifier,
                dotted: DottedList::parse(rest)?,
            });
        }

        Some(Version {
            segments,
            original: s.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// A restriction on acceptable versions, as used in `extra_restrictions` and
/// `<implementation version="...">` bounds. Supports the two forms §8's
/// scenario 6 exercises: `..!X` ("before X, exclusive") and a bare `X..Y`
/// range; either bound may be omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub not_before: Option<Version>,
    pub before_exclusive: Option<Version>,
}

impl VersionRange {
    pub fn any() -> Self {
        VersionRange {
            not_before: None,
            before_exclusive: None,
        }
    }

    pub fn contains(&self, version: &Version) -> bool {
        if let Some(lower) = &self.not_before {
            if version < lower {
                return false;
            }
        }
        if let Some(upper) = &self.before_exclusive {
            if version >= upper {
                return false;
            }
        }
        true
    }

    /// Parse range syntax `START..END` where either side may be empty, and
    /// `..!END` as shorthand for `..END`.
    pub fn parse(s: &str) -> Option<VersionRange> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("..!") {
            let upper = Version::parse(rest)?;
            return Some(VersionRange {
                not_before: None,
                before_exclusive: Some(upper),
            });
        }
        if let Some(idx) = s.find("..") {
            let (lower_str, upper_str) = (&s[..idx], &s[idx + 2..]);
            let not_before = if lower_str.is_empty() {
                None
            } else {
                Some(Version::parse(lower_str)?)
            };
            let before_exclusive = if upper_str.is_empty() {
                None
            } else {
                Some(Version::parse(upper_str)?)
            };
            return Some(VersionRange {
                not_before,
                before_exclusive,
            });
        }
        // A bare version means "exactly this version".
        let exact = Version::parse(s)?;
        Some(VersionRange {
            not_before: Some(exact.clone()),
            before_exclusive: Some(bump_for_exact_upper(&exact)),
        })
    }
}

/// Smallest version strictly greater than `v`, used to turn an exact-version
/// restriction into an exclusive upper bound.
fn bump_for_exact_upper(v: &Version) -> Version {
    let mut segments = v.segments.clone();
    if let Some(last) = segments.last_mut() {
        let mut dotted = last.dotted.0.clone();
        if dotted.is_empty() {
            dotted.push(1);
        } else {
            *dotted.last_mut().unwrap() += 1;
        }
        last.dotted = DottedList(dotted);
    }
    Version {
        segments,
        original: format!("{}-after", v.original),
    }
}
