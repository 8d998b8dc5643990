use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Typed database value used on the bind/write path.
///
/// The uniform row surface renders every cell as a string; this enum
/// exists so filter values and mutations are bound as typed parameters
/// instead of being spliced into statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// JSON stored as string for exact round-trip preservation.
    Json(String),
    /// Decimal stored as string to preserve exact precision.
    Decimal(String),
    /// Timestamp with timezone.
    DateTime(DateTime<Utc>),
    /// Date without time component.
    Date(NaiveDate),
    /// Time without date component.
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse a string cell into a typed value guided by a backend type name.
    ///
    /// The hint is the backend-native type string carried on the column;
    /// matching is substring-based so `"character varying"`, `"VARCHAR(64)"`
    /// and `"text"` all land on `Text`. Unrecognised hints fall back to
    /// `Text`, which every dialect can bind.
    pub fn parse_typed(raw: &str, type_hint: &str) -> Value {
        let hint = type_hint.to_ascii_lowercase();

        if raw.eq_ignore_ascii_case("null") && !hint.contains("char") && !hint.contains("text") {
            return Value::Null;
        }

        if hint.contains("bool") {
            return match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Value::Bool(true),
                "false" | "f" | "0" | "no" => Value::Bool(false),
                _ => Value::Text(raw.to_string()),
            };
        }

        if hint.contains("int") || hint.contains("serial") {
            if let Ok(i) = raw.trim().parse::<i64>() {
                return Value::Int(i);
            }
        }

        if hint.contains("float")
            || hint.contains("double")
            || hint.contains("real")
            || hint.contains("numeric")
            || hint.contains("decimal")
        {
            if let Ok(f) = raw.trim().parse::<f64>() {
                return Value::Float(f);
            }
        }

        if hint.contains("timestamp") || hint.contains("datetime") {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
                return Value::DateTime(dt.and_utc());
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                return Value::DateTime(dt.with_timezone(&Utc));
            }
        }

        if hint == "date" || hint.contains("date ") {
            if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                return Value::Date(d);
            }
        }

        if hint.starts_with("time") {
            if let Ok(t) = NaiveTime::parse_from_str(raw, "%H:%M:%S") {
                return Value::Time(t);
            }
        }

        if hint.contains("json") {
            return Value::Json(raw.to_string());
        }

        Value::Text(raw.to_string())
    }

    pub fn as_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) | Value::Json(s) | Value::Decimal(s) => s.clone(),
            Value::Bytes(b) => {
                serde_json::to_string(&b.iter().map(|v| *v as u64).collect::<Vec<_>>())
                    .unwrap_or_default()
            }
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%z").to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_display_string())
    }
}

impl Value {
    fn type_order(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Decimal(_) => 3,
            Value::Text(_) => 4,
            Value::Json(_) => 5,
            Value::DateTime(_) => 6,
            Value::Date(_) => 7,
            Value::Time(_) => 8,
            Value::Bytes(_) => 9,
            Value::Null => 10,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;

        match (self, other) {
            // Nulls last (SQL standard behavior)
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,

            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Json(a), Json(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),

            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),

            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_typed_integers() {
        assert_eq!(Value::parse_typed("42", "integer"), Value::Int(42));
        assert_eq!(Value::parse_typed("42", "bigint"), Value::Int(42));
        assert_eq!(Value::parse_typed("-7", "Int64"), Value::Int(-7));
    }

    #[test]
    fn parse_typed_bool_spellings() {
        assert_eq!(Value::parse_typed("true", "boolean"), Value::Bool(true));
        assert_eq!(Value::parse_typed("f", "bool"), Value::Bool(false));
        assert_eq!(Value::parse_typed("1", "boolean"), Value::Bool(true));
    }

    #[test]
    fn parse_typed_falls_back_to_text() {
        assert_eq!(
            Value::parse_typed("not-a-number", "integer"),
            Value::Text("not-a-number".to_string())
        );
        assert_eq!(
            Value::parse_typed("hello", "character varying"),
            Value::Text("hello".to_string())
        );
    }

    #[test]
    fn parse_typed_null_is_not_literal_for_text() {
        assert_eq!(Value::parse_typed("null", "integer"), Value::Null);
        assert_eq!(
            Value::parse_typed("null", "text"),
            Value::Text("null".to_string())
        );
    }

    #[test]
    fn nulls_sort_last() {
        let mut values = vec![Value::Null, Value::Int(2), Value::Int(1)];
        values.sort();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Null]);
    }

    #[test]
    fn cross_type_numeric_comparison() {
        assert!(Value::Int(1) < Value::Float(1.5));
        assert!(Value::Float(2.5) > Value::Int(2));
    }
}
