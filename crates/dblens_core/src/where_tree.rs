use crate::DbError;
use serde::{Deserialize, Serialize};

/// Structured filter expression consumed by `Connection::rows`.
///
/// The tree is mutually recursive with its compound children; each plugin
/// translates it with a structural fold into its native form (SQL fragment,
/// Elastic query DSL, Mongo filter document). Compound nodes with zero
/// children are illegal everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhereCondition {
    Atomic {
        key: String,
        operator: String,
        value: String,
        /// Backend-native type of the column, used for parameter binding.
        #[serde(default)]
        column_type: String,
    },
    And(Vec<WhereCondition>),
    Or(Vec<WhereCondition>),
}

impl WhereCondition {
    pub fn atomic(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        WhereCondition::Atomic {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
            column_type: String::new(),
        }
    }

    pub fn atomic_typed(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        WhereCondition::Atomic {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
            column_type: column_type.into(),
        }
    }

    pub fn and(children: Vec<WhereCondition>) -> Self {
        WhereCondition::And(children)
    }

    pub fn or(children: Vec<WhereCondition>) -> Self {
        WhereCondition::Or(children)
    }

    /// Reject empty compound nodes anywhere in the tree.
    pub fn validate(&self) -> Result<(), DbError> {
        match self {
            WhereCondition::Atomic { key, .. } => {
                if key.is_empty() {
                    return Err(DbError::invalid_argument("filter key must not be empty"));
                }
                Ok(())
            }
            WhereCondition::And(children) | WhereCondition::Or(children) => {
                if children.is_empty() {
                    return Err(DbError::invalid_argument(
                        "compound filter node must have at least one child",
                    ));
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Number of atomic leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            WhereCondition::Atomic { .. } => 1,
            WhereCondition::And(children) | WhereCondition::Or(children) => {
                children.iter().map(WhereCondition::leaf_count).sum()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_compound_is_rejected() {
        assert!(WhereCondition::And(vec![]).validate().is_err());
        assert!(WhereCondition::Or(vec![]).validate().is_err());
    }

    #[test]
    fn nested_empty_compound_is_rejected() {
        let tree = WhereCondition::and(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::Or(vec![]),
        ]);
        assert!(tree.validate().is_err());
    }

    #[test]
    fn singleton_compound_is_legal() {
        let tree = WhereCondition::and(vec![WhereCondition::atomic("a", "=", "1")]);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn leaf_count_is_recursive() {
        let tree = WhereCondition::or(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::and(vec![
                WhereCondition::atomic("b", ">", "2"),
                WhereCondition::atomic("c", "<", "3"),
            ]),
        ]);
        assert_eq!(tree.leaf_count(), 3);
    }
}
