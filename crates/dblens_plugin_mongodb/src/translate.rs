use bson::{Bson, Document, doc};
use dblens_core::{DbError, WhereCondition};

/// Fold a where tree into a Mongo filter document.
///
/// `AND`/`OR` become `$and`/`$or`; comparison operators map onto
/// `$gt`/`$gte`/`$lt`/`$lte`/`$ne`, `LIKE` onto `$regex`, lists onto
/// `$in`/`$nin`.
pub fn translate_where(condition: &WhereCondition) -> Result<Document, DbError> {
    condition.validate()?;
    fold(condition)
}

fn fold(condition: &WhereCondition) -> Result<Document, DbError> {
    match condition {
        WhereCondition::Atomic {
            key,
            operator,
            value,
            ..
        } => atomic(key, operator, value),
        WhereCondition::And(children) => {
            let clauses = children
                .iter()
                .map(fold)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(doc! { "$and": clauses })
        }
        WhereCondition::Or(children) => {
            let clauses = children
                .iter()
                .map(fold)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(doc! { "$or": clauses })
        }
    }
}

fn atomic(key: &str, operator: &str, value: &str) -> Result<Document, DbError> {
    let normalized = operator
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    let filter = match normalized.as_str() {
        "=" => doc! { key: bson_literal(value) },
        "!=" | "<>" => doc! { key: { "$ne": bson_literal(value) } },
        ">" => doc! { key: { "$gt": bson_literal(value) } },
        ">=" => doc! { key: { "$gte": bson_literal(value) } },
        "<" => doc! { key: { "$lt": bson_literal(value) } },
        "<=" => doc! { key: { "$lte": bson_literal(value) } },
        "LIKE" | "CONTAINS" => doc! { key: { "$regex": value, "$options": "i" } },
        "NOT LIKE" => doc! { key: { "$not": { "$regex": value, "$options": "i" } } },
        "IN" => doc! { key: { "$in": list_literals(value) } },
        "NOT IN" => doc! { key: { "$nin": list_literals(value) } },
        // {key: null} matches both missing fields and explicit nulls.
        "IS NULL" => doc! { key: Bson::Null },
        "IS NOT NULL" => doc! { key: { "$ne": Bson::Null } },
        _ => return Err(DbError::InvalidOperator(operator.to_string())),
    };
    Ok(filter)
}

fn bson_literal(raw: &str) -> Bson {
    if let Ok(i) = raw.parse::<i64>() {
        return Bson::Int64(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Bson::Double(f);
    }
    match raw {
        "true" => Bson::Boolean(true),
        "false" => Bson::Boolean(false),
        _ => Bson::String(raw.to_string()),
    }
}

fn list_literals(raw: &str) -> Vec<Bson> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(bson_literal)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_comparisons() {
        assert_eq!(
            translate_where(&WhereCondition::atomic("age", "=", "30")).unwrap(),
            doc! { "age": 30i64 }
        );
        assert_eq!(
            translate_where(&WhereCondition::atomic("age", ">=", "30")).unwrap(),
            doc! { "age": { "$gte": 30i64 } }
        );
        assert_eq!(
            translate_where(&WhereCondition::atomic("name", "!=", "x")).unwrap(),
            doc! { "name": { "$ne": "x" } }
        );
    }

    #[test]
    fn like_becomes_case_insensitive_regex() {
        assert_eq!(
            translate_where(&WhereCondition::atomic("name", "LIKE", "ali")).unwrap(),
            doc! { "name": { "$regex": "ali", "$options": "i" } }
        );
    }

    #[test]
    fn lists_become_in_nin() {
        assert_eq!(
            translate_where(&WhereCondition::atomic("n", "IN", "1,2")).unwrap(),
            doc! { "n": { "$in": [1i64, 2i64] } }
        );
        assert_eq!(
            translate_where(&WhereCondition::atomic("s", "NOT IN", "a, b")).unwrap(),
            doc! { "s": { "$nin": ["a", "b"] } }
        );
    }

    #[test]
    fn compounds_nest() {
        let tree = WhereCondition::or(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::and(vec![
                WhereCondition::atomic("b", ">", "2"),
                WhereCondition::atomic("c", "IS NULL", ""),
            ]),
        ]);
        assert_eq!(
            translate_where(&tree).unwrap(),
            doc! { "$or": [
                { "a": 1i64 },
                { "$and": [
                    { "b": { "$gt": 2i64 } },
                    { "c": Bson::Null }
                ] }
            ] }
        );
    }

    #[test]
    fn unknown_operator_fails() {
        assert!(matches!(
            translate_where(&WhereCondition::atomic("a", "ELEMMATCH", "x")),
            Err(DbError::InvalidOperator(_))
        ));
    }

    #[test]
    fn empty_compound_is_rejected() {
        assert!(translate_where(&WhereCondition::And(vec![])).is_err());
    }
}
