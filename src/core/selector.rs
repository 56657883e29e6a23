//! Interpreter version selectors in conda match-spec syntax.
//!
//! Accepted forms: `3`, `3.9`, `3.9.7`, `3.9.*`, `=3.9`, `==3.10`,
//! `>=3.8`, `>=3.8,<3.11`, and `|`-separated alternatives of those.
//! A bare version is a prefix match: `3.9` accepts `3.9.18`.

use crate::error::{ProvisionError, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)*(\.\*)?$").expect("static regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Prefix,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Constraint {
    op: Op,
    version: Vec<u64>,
}

impl Constraint {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        let (op, rest) = [
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("==", Op::Eq),
            ("!=", Op::Ne),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Prefix),
        ]
        .iter()
        .find_map(|(tok, op)| text.strip_prefix(tok).map(|r| (*op, r.trim())))
        .unwrap_or((Op::Prefix, text));

        if !version_re().is_match(rest) {
            return Err(format!("'{}' is not a version", rest));
        }

        let wildcard = rest.ends_with(".*");
        let digits = rest.trim_end_matches(".*");
        let op = match (op, wildcard) {
            (Op::Eq, true) | (Op::Prefix, _) => Op::Prefix,
            (_, true) => return Err(format!("wildcard not allowed with comparison in '{}'", text)),
            (op, false) => op,
        };

        let version = digits
            .split('.')
            .map(|c| c.parse::<u64>().map_err(|e| format!("'{}': {}", c, e)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { op, version })
    }

    fn matches(&self, candidate: &[u64]) -> bool {
        match self.op {
            Op::Prefix => candidate.starts_with(&self.version),
            Op::Eq => cmp_padded(candidate, &self.version) == Ordering::Equal,
            Op::Ne => cmp_padded(candidate, &self.version) != Ordering::Equal,
            Op::Ge => cmp_padded(candidate, &self.version) != Ordering::Less,
            Op::Gt => cmp_padded(candidate, &self.version) == Ordering::Greater,
            Op::Le => cmp_padded(candidate, &self.version) != Ordering::Greater,
            Op::Lt => cmp_padded(candidate, &self.version) == Ordering::Less,
        }
    }
}

fn cmp_padded(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Numeric components of a concrete version such as `3.12.0rc1`.
/// Non-numeric suffixes are dropped per component.
fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map_while(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        })
        .collect()
}

/// A parsed interpreter version selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonSelector {
    raw: String,
    alternatives: Vec<Vec<Constraint>>,
}

impl PythonSelector {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ProvisionError::Config(
                "python version selector is empty".to_string(),
            ));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ProvisionError::Config(format!(
                "python version selector '{}' contains whitespace",
                raw
            )));
        }

        let alternatives = raw
            .split('|')
            .map(|alt| alt.split(',').map(Constraint::parse).collect())
            .collect::<std::result::Result<Vec<Vec<_>>, _>>()
            .map_err(|e| {
                ProvisionError::Config(format!("invalid python selector '{}': {}", raw, e))
            })?;

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Does a concrete interpreter version satisfy this selector?
    pub fn matches(&self, version: &str) -> bool {
        let candidate = components(version);
        if candidate.is_empty() {
            return false;
        }
        self.alternatives
            .iter()
            .any(|alt| alt.iter().all(|c| c.matches(&candidate)))
    }

    /// Match-spec argument handed to `conda install`.
    pub fn match_spec(&self) -> String {
        format!("python={}", self.raw)
    }
}

impl fmt::Display for PythonSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for PythonSelector {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sel(s: &str) -> PythonSelector {
        PythonSelector::parse(s).unwrap()
    }

    #[test]
    fn test_bare_version_is_prefix_match() {
        let s = sel("3.9");
        assert!(s.matches("3.9.18"));
        assert!(s.matches("3.9"));
        assert!(!s.matches("3.10.1"));
        assert!(!s.matches("3.1"));
    }

    #[test]
    fn test_wildcard_and_single_equals() {
        assert!(sel("3.9.*").matches("3.9.0"));
        assert!(sel("=3.9").matches("3.9.2"));
        assert!(sel("==3.9.*").matches("3.9.2"));
        assert!(!sel("3.9.*").matches("3.8.9"));
    }

    #[test]
    fn test_exact_equality_pads_zeros() {
        assert!(sel("==3.10").matches("3.10.0"));
        assert!(!sel("==3.10").matches("3.10.1"));
    }

    #[test]
    fn test_range() {
        let s = sel(">=3.8,<3.11");
        assert!(s.matches("3.8.0"));
        assert!(s.matches("3.10.14"));
        assert!(!s.matches("3.11.0"));
        assert!(!s.matches("3.7.17"));
    }

    #[test]
    fn test_alternatives() {
        let s = sel("3.8|3.10");
        assert!(s.matches("3.8.1"));
        assert!(s.matches("3.10.2"));
        assert!(!s.matches("3.9.1"));
    }

    #[test]
    fn test_prerelease_suffix_is_dropped() {
        assert!(sel("3.12").matches("3.12.0rc1"));
    }

    #[test]
    fn test_not_equal() {
        let s = sel(">=3.8,!=3.9.0");
        assert!(!s.matches("3.9.0"));
        assert!(s.matches("3.9.1"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(PythonSelector::parse("").is_err());
        assert!(PythonSelector::parse("latest").is_err());
        assert!(PythonSelector::parse("3.9; rm -rf /").is_err());
        assert!(PythonSelector::parse(">=3.*").is_err());
        assert!(PythonSelector::parse("3 .9").is_err());
    }

    #[test]
    fn test_match_spec() {
        assert_eq!(sel("3.9").match_spec(), "python=3.9");
        assert_eq!(sel(">=3.8,<3.11").match_spec(), "python=>=3.8,<3.11");
    }

    #[test]
    fn test_non_numeric_candidate_never_matches() {
        assert!(!sel(">=3").matches("unknown"));
    }

    proptest! {
        #[test]
        fn prop_major_minor_matches_any_patch(major in 0u64..10, minor in 0u64..30, patch in 0u64..50) {
            let s = sel(&format!("{major}.{minor}"));
            let concrete = format!("{major}.{minor}.{patch}");
            prop_assert!(s.matches(&concrete));
        }

        #[test]
        fn prop_ge_and_lt_partition(a in 0u64..20, b in 0u64..20) {
            let v = format!("3.{b}");
            let ge = sel(&format!(">=3.{a}")).matches(&v);
            let lt = sel(&format!("<3.{a}")).matches(&v);
            prop_assert!(ge != lt);
            prop_assert_eq!(ge, b >= a);
        }
    }
}
