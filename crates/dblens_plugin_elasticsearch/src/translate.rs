use dblens_core::{DbError, WhereCondition};
use serde_json::{Value as Json, json};

/// Fold a where tree into an Elastic query DSL fragment.
///
/// `AND` becomes `bool.must`, `OR` becomes `bool.should` with
/// `minimum_should_match = 1`; the recursive structure is preserved.
pub fn translate_where(condition: &WhereCondition) -> Result<Json, DbError> {
    condition.validate()?;
    fold(condition)
}

fn fold(condition: &WhereCondition) -> Result<Json, DbError> {
    match condition {
        WhereCondition::Atomic {
            key,
            operator,
            value,
            ..
        } => atomic(key, operator, value),
        WhereCondition::And(children) => {
            let clauses = children.iter().map(fold).collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "bool": { "must": clauses } }))
        }
        WhereCondition::Or(children) => {
            let clauses = children.iter().map(fold).collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "bool": { "should": clauses, "minimum_should_match": 1 } }))
        }
    }
}

fn atomic(key: &str, operator: &str, value: &str) -> Result<Json, DbError> {
    let normalized = operator
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    let clause = match normalized.as_str() {
        "=" => json!({ "term": { key: json_literal(value) } }),
        "!=" | "<>" => json!({ "bool": { "must_not": [{ "term": { key: json_literal(value) } }] } }),
        ">" => json!({ "range": { key: { "gt": json_literal(value) } } }),
        ">=" => json!({ "range": { key: { "gte": json_literal(value) } } }),
        "<" => json!({ "range": { key: { "lt": json_literal(value) } } }),
        "<=" => json!({ "range": { key: { "lte": json_literal(value) } } }),
        "LIKE" | "CONTAINS" => json!({ "wildcard": { key: format!("*{value}*") } }),
        "NOT LIKE" => {
            json!({ "bool": { "must_not": [{ "wildcard": { key: format!("*{value}*") } }] } })
        }
        "MATCH" => json!({ "match": { key: value } }),
        "IN" => json!({ "terms": { key: list_literals(value) } }),
        "NOT IN" => json!({ "bool": { "must_not": [{ "terms": { key: list_literals(value) } }] } }),
        "EXISTS" | "IS NOT NULL" => json!({ "exists": { "field": key } }),
        "NOT EXISTS" | "IS NULL" => {
            json!({ "bool": { "must_not": [{ "exists": { "field": key } }] } })
        }
        _ => return Err(DbError::InvalidOperator(operator.to_string())),
    };
    Ok(clause)
}

/// Numbers and booleans keep their JSON type so term/range queries hit
/// typed fields; everything else stays a string.
fn json_literal(raw: &str) -> Json {
    if let Ok(i) = raw.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return json!(f);
    }
    match raw {
        "true" => json!(true),
        "false" => json!(false),
        _ => json!(raw),
    }
}

fn list_literals(raw: &str) -> Json {
    Json::Array(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(json_literal)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_a_term_query() {
        let tree = WhereCondition::atomic("age", "=", "30");
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "term": { "age": 30 } })
        );
    }

    #[test]
    fn inequality_is_negated_term() {
        let tree = WhereCondition::atomic("name", "!=", "alice");
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "bool": { "must_not": [{ "term": { "name": "alice" } }] } })
        );
    }

    #[test]
    fn like_wraps_value_in_wildcards() {
        let tree = WhereCondition::atomic("name", "LIKE", "Ali");
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "wildcard": { "name": "*Ali*" } })
        );
    }

    #[test]
    fn and_or_become_bool_clauses() {
        let tree = WhereCondition::and(vec![
            WhereCondition::atomic("age", ">=", "30"),
            WhereCondition::atomic("name", "match", "Ali*"),
        ]);
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "bool": { "must": [
                { "range": { "age": { "gte": 30 } } },
                { "match": { "name": "Ali*" } }
            ] } })
        );

        let tree = WhereCondition::or(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::atomic("b", "=", "2"),
        ]);
        let translated = translate_where(&tree).unwrap();
        assert_eq!(translated["bool"]["minimum_should_match"], json!(1));
        assert_eq!(translated["bool"]["should"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn exists_maps_null_operators() {
        let tree = WhereCondition::atomic("field", "IS NOT NULL", "");
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "exists": { "field": "field" } })
        );

        let tree = WhereCondition::atomic("field", "IS NULL", "");
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "bool": { "must_not": [{ "exists": { "field": "field" } }] } })
        );
    }

    #[test]
    fn in_keeps_element_types() {
        let tree = WhereCondition::atomic("n", "IN", "1, 2, x");
        assert_eq!(
            translate_where(&tree).unwrap(),
            json!({ "terms": { "n": [1, 2, "x"] } })
        );
    }

    #[test]
    fn unknown_operator_fails_translation() {
        let tree = WhereCondition::and(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::atomic("b", "REGEXP", "x"),
        ]);
        assert!(matches!(
            translate_where(&tree),
            Err(DbError::InvalidOperator(_))
        ));
    }

    #[test]
    fn empty_compound_is_rejected() {
        assert!(translate_where(&WhereCondition::Or(vec![])).is_err());
    }
}
