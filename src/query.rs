//! Gmail search-query construction from filter rules and target senders
//!
//! Pure translation, no network or state. Identical inputs always produce a
//! byte-identical query string; the UI's query-preview feature relies on it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single filter condition inside a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "value", rename_all = "kebab-case")]
pub enum FilterCondition {
    /// Message text contains the phrase
    Contains(String),
    /// Message text does not contain the phrase
    NotContains(String),
    SentBefore(NaiveDate),
    SentAfter(NaiveDate),
    /// true = read, false = unread
    Read(bool),
    /// true = has attachment, false = no attachment
    HasAttachment(bool),
}

impl FilterCondition {
    fn to_clause(&self) -> String {
        match self {
            FilterCondition::Contains(text) => format!("\"{}\"", text),
            FilterCondition::NotContains(text) => format!("-\"{}\"", text),
            FilterCondition::SentBefore(date) => {
                format!("before:{}", date.format("%Y/%m/%d"))
            }
            FilterCondition::SentAfter(date) => {
                format!("after:{}", date.format("%Y/%m/%d"))
            }
            FilterCondition::Read(true) => "is:read".to_string(),
            FilterCondition::Read(false) => "is:unread".to_string(),
            FilterCondition::HasAttachment(true) => "has:attachment".to_string(),
            FilterCondition::HasAttachment(false) => "-has:attachment".to_string(),
        }
    }
}

/// Conditions ANDed together (Gmail's implicit space conjunction)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterGroup {
    pub conditions: Vec<FilterCondition>,
}

impl FilterGroup {
    fn to_clause(&self) -> String {
        self.conditions
            .iter()
            .map(|c| c.to_clause())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Groups ORed together; AND within each group
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterRules {
    pub groups: Vec<FilterGroup>,
}

impl FilterRules {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.conditions.is_empty())
    }

    fn to_clause(&self) -> String {
        let parts: Vec<String> = self
            .groups
            .iter()
            .filter(|g| !g.conditions.is_empty())
            .map(|g| format!("({})", g.to_clause()))
            .collect();
        match parts.len() {
            0 => String::new(),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => format!("({})", parts.join(" OR ")),
        }
    }

    /// Negate the whole rule tree; used by delete-with-exceptions, where
    /// messages matching the rules are the ones kept
    pub fn negated(&self) -> String {
        let clause = self.to_clause();
        if clause.is_empty() {
            String::new()
        } else {
            format!("-{}", clause)
        }
    }
}

/// Build the sender-disjunction clause: `from:(a@x.com OR b@x.com)`
pub fn sender_clause(senders: &[String]) -> String {
    if senders.is_empty() {
        return String::new();
    }
    format!("from:({})", senders.join(" OR "))
}

/// Combine a sender list with a filter-rule tree into one provider query
/// (implicit AND between the two clauses)
pub fn build_query(senders: &[String], rules: &FilterRules) -> String {
    let mut parts = Vec::new();
    let from = sender_clause(senders);
    if !from.is_empty() {
        parts.push(from);
    }
    let filters = rules.to_clause();
    if !filters.is_empty() {
        parts.push(filters);
    }
    parts.join(" ")
}

/// Query for everything from the senders except messages matching the rules
pub fn build_exception_query(senders: &[String], exceptions: &FilterRules) -> String {
    let mut parts = Vec::new();
    let from = sender_clause(senders);
    if !from.is_empty() {
        parts.push(from);
    }
    let negated = exceptions.negated();
    if !negated.is_empty() {
        parts.push(negated);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_rules() -> FilterRules {
        FilterRules {
            groups: vec![
                FilterGroup {
                    conditions: vec![
                        FilterCondition::Contains("invoice".to_string()),
                        FilterCondition::Read(false),
                    ],
                },
                FilterGroup {
                    conditions: vec![FilterCondition::HasAttachment(true)],
                },
            ],
        }
    }

    #[test]
    fn test_sender_clause() {
        let senders = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        assert_eq!(sender_clause(&senders), "from:(a@x.com OR b@x.com)");
        assert_eq!(sender_clause(&[]), "");
    }

    #[test]
    fn test_build_query_combines_senders_and_rules() {
        let senders = vec!["a@x.com".to_string()];
        let query = build_query(&senders, &sample_rules());
        assert_eq!(
            query,
            "from:(a@x.com) ((\"invoice\" is:unread) OR (has:attachment))"
        );
    }

    #[test]
    fn test_build_query_senders_only() {
        let senders = vec!["a@x.com".to_string()];
        assert_eq!(
            build_query(&senders, &FilterRules::default()),
            "from:(a@x.com)"
        );
    }

    #[test]
    fn test_single_group_has_no_outer_parens() {
        let rules = FilterRules {
            groups: vec![FilterGroup {
                conditions: vec![FilterCondition::Contains("receipt".to_string())],
            }],
        };
        assert_eq!(build_query(&[], &rules), "(\"receipt\")");
    }

    #[test]
    fn test_date_conditions_use_gmail_format() {
        let rules = FilterRules {
            groups: vec![FilterGroup {
                conditions: vec![
                    FilterCondition::SentAfter(NaiveDate::from_ymd_opt(2023, 1, 15).unwrap()),
                    FilterCondition::SentBefore(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
                ],
            }],
        };
        assert_eq!(
            build_query(&[], &rules),
            "(after:2023/01/15 before:2024/06/01)"
        );
    }

    #[test]
    fn test_not_contains_and_no_attachment_negate() {
        let rules = FilterRules {
            groups: vec![FilterGroup {
                conditions: vec![
                    FilterCondition::NotContains("unsubscribe".to_string()),
                    FilterCondition::HasAttachment(false),
                ],
            }],
        };
        assert_eq!(
            build_query(&[], &rules),
            "(-\"unsubscribe\" -has:attachment)"
        );
    }

    #[test]
    fn test_exception_query_negates_rules() {
        let senders = vec!["a@x.com".to_string()];
        let rules = FilterRules {
            groups: vec![FilterGroup {
                conditions: vec![FilterCondition::Contains("keep me".to_string())],
            }],
        };
        assert_eq!(
            build_exception_query(&senders, &rules),
            "from:(a@x.com) -(\"keep me\")"
        );
    }

    #[test]
    fn test_empty_groups_are_skipped() {
        let rules = FilterRules {
            groups: vec![
                FilterGroup { conditions: vec![] },
                FilterGroup {
                    conditions: vec![FilterCondition::Read(true)],
                },
            ],
        };
        assert_eq!(build_query(&[], &rules), "(is:read)");
    }

    #[test]
    fn test_determinism_repeated_calls() {
        let senders = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        let rules = sample_rules();
        let first = build_query(&senders, &rules);
        for _ in 0..50 {
            assert_eq!(build_query(&senders, &rules), first);
        }
    }

    proptest! {
        #[test]
        fn prop_determinism(
            senders in proptest::collection::vec("[a-z]{1,8}@[a-z]{1,8}\\.com", 0..5),
            texts in proptest::collection::vec("[a-z ]{1,12}", 0..4),
        ) {
            let rules = FilterRules {
                groups: vec![FilterGroup {
                    conditions: texts
                        .iter()
                        .map(|t| FilterCondition::Contains(t.clone()))
                        .collect(),
                }],
            };
            prop_assert_eq!(
                build_query(&senders, &rules),
                build_query(&senders, &rules)
            );
        }
    }
}
