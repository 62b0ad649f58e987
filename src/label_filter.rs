use std::{collections::BTreeMap, str::FromStr};

use crate::error::FilterError;

#[derive(Debug, Clone)]
enum Rule {
    Equal(String, String),
    NotEqual(String, String),
    Exists(String),
    DoesNotExist(String),
}

#[derive(Debug, Clone, Default)]
pub struct LabelFilter {
    rules: Vec<Rule>,
}

impl LabelFilter {
    #[must_use] pub fn check(&self, labels: &BTreeMap<String, String>) -> bool {
        for rule in &self.rules {
            match rule {
                Rule::Equal(key, value) => {
                    if labels.get(key) != Some(value) {
                        return false;
                    }
                }
                Rule::NotEqual(key, value) => {
                    if labels.get(key) == Some(value) {
                        return false;
                    }
                }
                Rule::Exists(key) => {
                    if labels.get(key).is_none() {
                        return false;
                    }
                }
                Rule::DoesNotExist(key) => {
                    if labels.get(key).is_some() {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl FromStr for LabelFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rules = Vec::new();
        for rule in s.split(',') {
            let parts = rule.split('=').collect::<Vec<_>>();
            match *parts.as_slice() {
                [key] => {
                    if key.starts_with('!') {
                        rules.push(Rule::DoesNotExist(
                            key.strip_prefix('!').unwrap().to_string(),
                        ));
                        continue;
                    }
                    rules.push(Rule::Exists(key.to_string()));
                }
                [key, value] => {
                    if key.ends_with('!') {
                        rules.push(Rule::NotEqual(
                            key.strip_suffix('!').unwrap().to_string(),
                            value.to_string(),
                        ));
                        continue;
                    }
                    rules.push(Rule::Equal(key.to_string(), value.to_string()));
                }
                _ => return Err(FilterError::InvalidNodeFilter(rule.to_string())),
            }
        }
        Ok(Self { rules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn equal_rule_matches() {
        let f = LabelFilter::from_str("zone=us-east-1").unwrap();
        assert!(f.check(&labels(&[("zone", "us-east-1")])));
        assert!(!f.check(&labels(&[("zone", "us-west-1")])));
    }

    #[test]
    fn not_equal_rule() {
        let f = LabelFilter::from_str("zone!=us-east-1").unwrap();
        assert!(f.check(&labels(&[("zone", "us-west-1")])));
        assert!(!f.check(&labels(&[("zone", "us-east-1")])));
    }

    #[test]
    fn exists_and_does_not_exist() {
        let exists = LabelFilter::from_str("dedicated").unwrap();
        assert!(exists.check(&labels(&[("dedicated", "edge")])));
        assert!(!exists.check(&labels(&[])));

        let absent = LabelFilter::from_str("!dedicated").unwrap();
        assert!(absent.check(&labels(&[])));
        assert!(!absent.check(&labels(&[("dedicated", "edge")])));
    }

    #[test]
    fn multiple_rules_are_conjunctive() {
        let f = LabelFilter::from_str("zone=us-east-1,dedicated=edge").unwrap();
        assert!(f.check(&labels(&[("zone", "us-east-1"), ("dedicated", "edge")])));
        assert!(!f.check(&labels(&[("zone", "us-east-1")])));
    }

    #[test]
    fn malformed_rule_is_an_error() {
        assert!(LabelFilter::from_str("a=b=c").is_err());
    }
}
