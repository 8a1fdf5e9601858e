//! Boolean predicates over tag sets
//!
//! Predicates are built once (by the parser or programmatically) and applied
//! many times. Construction is where validation happens: a regex that does
//! not compile is rejected by [`Predicate::regex`], so [`Predicate::apply`]
//! is total.

use crate::api::TagSet;
use crate::error::{QueryError, QueryResult};
use regex::Regex;
use std::collections::BTreeSet;

/// Compiled regex that remembers its source for equality and rendering
#[derive(Debug, Clone)]
pub struct TagPattern {
    source: String,
    regex: Regex,
}

impl TagPattern {
    pub fn new(source: &str) -> QueryResult<Self> {
        let regex = Regex::new(source).map_err(|e| {
            QueryError::Validation(format!("invalid regex '{}': {}", source, e))
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for TagPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Filter over tag sets
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every tag set
    All,
    /// Tag `key` present with exactly `value`
    Equal { key: String, value: String },
    /// Tag `key` present and its value matches `pattern` (unanchored)
    Regex { key: String, pattern: TagPattern },
    /// Tag `key` present with one of `values`
    ListMatch { key: String, values: BTreeSet<String> },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equal {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Regex predicate; fails if `pattern` does not compile
    pub fn regex(key: impl Into<String>, pattern: &str) -> QueryResult<Self> {
        Ok(Self::Regex {
            key: key.into(),
            pattern: TagPattern::new(pattern)?,
        })
    }

    pub fn list_match<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ListMatch {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Conjunction of `self` and `other`, skipping `All` operands
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::All, p) | (p, Self::All) => p,
            (a, b) => Self::And(vec![a, b]),
        }
    }

    /// Evaluate against a tag set
    ///
    /// A missing tag key never matches a leaf. `And`/`Or` stop at the first
    /// operand that decides the result.
    pub fn apply(&self, tags: &TagSet) -> bool {
        match self {
            Self::All => true,
            Self::Equal { key, value } => tags.get(key) == Some(value.as_str()),
            Self::Regex { key, pattern } => tags.get(key).is_some_and(|v| pattern.is_match(v)),
            Self::ListMatch { key, values } => tags.get(key).is_some_and(|v| values.contains(v)),
            Self::Not(inner) => !inner.apply(tags),
            Self::And(operands) => operands.iter().all(|p| p.apply(tags)),
            Self::Or(operands) => operands.iter().any(|p| p.apply(tags)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web1() -> TagSet {
        TagSet::new().tag("host", "web1").tag("dc", "us")
    }

    fn web2() -> TagSet {
        TagSet::new().tag("host", "web2").tag("dc", "eu")
    }

    #[test]
    fn test_equal() {
        let p = Predicate::equal("host", "web1");
        assert!(p.apply(&web1()));
        assert!(!p.apply(&web2()));
        // Case-sensitive
        assert!(!Predicate::equal("host", "WEB1").apply(&web1()));
        // Missing key is a non-match
        assert!(!Predicate::equal("rack", "r1").apply(&web1()));
    }

    #[test]
    fn test_regex() {
        let p = Predicate::regex("host", "^web[0-9]$").unwrap();
        assert!(p.apply(&web1()));
        assert!(p.apply(&web2()));
        assert!(!p.apply(&TagSet::new().tag("host", "db1")));

        let unanchored = Predicate::regex("host", "eb").unwrap();
        assert!(unanchored.apply(&web1()));
    }

    #[test]
    fn test_invalid_regex_rejected_at_construction() {
        let result = Predicate::regex("host", "web[");
        assert!(matches!(result, Err(QueryError::Validation(_))));
    }

    #[test]
    fn test_list_match() {
        let p = Predicate::list_match("dc", ["us", "ap"]);
        assert!(p.apply(&web1()));
        assert!(!p.apply(&web2()));
        assert!(!p.apply(&TagSet::new()));
    }

    #[test]
    fn test_combinators() {
        let us = Predicate::equal("dc", "us");
        let web2_host = Predicate::equal("host", "web2");

        let either = Predicate::Or(vec![us.clone(), web2_host.clone()]);
        assert!(either.apply(&web1()));
        assert!(either.apply(&web2()));

        let both = Predicate::And(vec![us.clone(), web2_host]);
        assert!(!both.apply(&web1()));
        assert!(!both.apply(&web2()));

        assert!(!Predicate::not(us.clone()).apply(&web1()));
        assert!(Predicate::And(vec![]).apply(&web1()));
        assert!(!Predicate::Or(vec![]).apply(&web1()));
    }

    #[test]
    fn test_and_skips_all() {
        let p = Predicate::equal("dc", "us");
        assert_eq!(Predicate::All.and(p.clone()), p);
        assert_eq!(p.clone().and(Predicate::All), p);
        assert_eq!(Predicate::All.and(Predicate::All), Predicate::All);
    }

    #[test]
    fn test_boolean_algebra_laws() {
        let leaves = vec![
            Predicate::All,
            Predicate::equal("host", "web1"),
            Predicate::equal("dc", "eu"),
            Predicate::regex("host", "2$").unwrap(),
            Predicate::list_match("dc", ["us"]),
            Predicate::not(Predicate::equal("rack", "r1")),
        ];
        let tagsets = vec![
            web1(),
            web2(),
            TagSet::new(),
            TagSet::new().tag("rack", "r1").tag("host", "web1"),
        ];

        for a in &leaves {
            for b in &leaves {
                let and_ab = Predicate::And(vec![a.clone(), b.clone()]);
                let and_ba = Predicate::And(vec![b.clone(), a.clone()]);
                let or_ab = Predicate::Or(vec![a.clone(), b.clone()]);
                let or_ba = Predicate::Or(vec![b.clone(), a.clone()]);
                let not_and = Predicate::not(and_ab.clone());
                let de_morgan_and = Predicate::Or(vec![
                    Predicate::not(a.clone()),
                    Predicate::not(b.clone()),
                ]);
                let not_or = Predicate::not(or_ab.clone());
                let de_morgan_or = Predicate::And(vec![
                    Predicate::not(a.clone()),
                    Predicate::not(b.clone()),
                ]);

                for tags in &tagsets {
                    assert_eq!(and_ab.apply(tags), and_ba.apply(tags));
                    assert_eq!(or_ab.apply(tags), or_ba.apply(tags));
                    assert_eq!(not_and.apply(tags), de_morgan_and.apply(tags));
                    assert_eq!(not_or.apply(tags), de_morgan_or.apply(tags));
                    assert_eq!(
                        Predicate::not(Predicate::not(a.clone())).apply(tags),
                        a.apply(tags)
                    );

                    for c in &leaves {
                        let left = Predicate::And(vec![and_ab.clone(), c.clone()]);
                        let right = Predicate::And(vec![
                            a.clone(),
                            Predicate::And(vec![b.clone(), c.clone()]),
                        ]);
                        assert_eq!(left.apply(tags), right.apply(tags));

                        let left = Predicate::Or(vec![or_ab.clone(), c.clone()]);
                        let right = Predicate::Or(vec![
                            a.clone(),
                            Predicate::Or(vec![b.clone(), c.clone()]),
                        ]);
                        assert_eq!(left.apply(tags), right.apply(tags));
                    }
                }
            }
        }
    }
}
