use dblens_core::{DbError, Value};
use postgres::types::{ToSql, Type};

/// Convert a bound [`Value`] to the driver parameter the prepared
/// statement expects. The declared parameter type comes from the server
/// at prepare time; conversion failures surface as `invalid-argument`
/// rather than a driver panic.
pub fn bind_param(value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync>, DbError> {
    if value.is_null() {
        return Ok(Box::new(Option::<String>::None));
    }

    let mismatch = |expected: &str| {
        DbError::invalid_argument(format!("cannot bind '{value}' as {expected} parameter"))
    };

    Ok(match ty.name() {
        "bool" => Box::new(as_bool(value).ok_or_else(|| mismatch("boolean"))?),
        "int2" => Box::new(as_int(value).ok_or_else(|| mismatch("smallint"))? as i16),
        "int4" => Box::new(as_int(value).ok_or_else(|| mismatch("integer"))? as i32),
        "int8" => Box::new(as_int(value).ok_or_else(|| mismatch("bigint"))?),
        "float4" => Box::new(as_float(value).ok_or_else(|| mismatch("real"))? as f32),
        "float8" => Box::new(as_float(value).ok_or_else(|| mismatch("double"))?),
        "json" | "jsonb" => {
            let raw = value.as_display_string();
            let parsed: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| DbError::invalid_argument(format!("invalid JSON value: {e}")))?;
            Box::new(parsed)
        }
        "uuid" => Box::new(
            uuid::Uuid::parse_str(&value.as_display_string())
                .map_err(|e| DbError::invalid_argument(format!("invalid UUID: {e}")))?,
        ),
        "timestamp" => match value {
            Value::DateTime(dt) => Box::new(dt.naive_utc()),
            other => Box::new(other.as_display_string()),
        },
        "timestamptz" => match value {
            Value::DateTime(dt) => Box::new(*dt),
            other => Box::new(other.as_display_string()),
        },
        "date" => match value {
            Value::Date(d) => Box::new(*d),
            other => Box::new(other.as_display_string()),
        },
        // Everything else (text family, numeric, enums, unknown) is
        // bound textually; the server casts where it can.
        _ => Box::new(value.as_display_string()),
    })
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Text(s) => match s.as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        Value::Text(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Text(s) => s.parse().ok(),
        _ => None,
    }
}

/// Render one result cell as a string; the uniform row surface carries
/// strings only, with composite values JSON-encoded.
pub fn cell_to_string(row: &postgres::Row, idx: usize) -> String {
    let col_type = row.columns()[idx].type_();

    match col_type.name() {
        "bool" => format_opt(row.try_get::<_, Option<bool>>(idx)),
        "int2" => format_opt(row.try_get::<_, Option<i16>>(idx)),
        "int4" => format_opt(row.try_get::<_, Option<i32>>(idx)),
        "int8" => format_opt(row.try_get::<_, Option<i64>>(idx)),
        "float4" => format_opt(row.try_get::<_, Option<f32>>(idx)),
        "float8" => format_opt(row.try_get::<_, Option<f64>>(idx)),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(|v| v.to_string())
            .unwrap_or_default(),
        "uuid" => format_opt(row.try_get::<_, Option<uuid::Uuid>>(idx)),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(|b| format!("\\x{}", hex::encode(b)))
            .unwrap_or_default(),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            .unwrap_or_default(),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(|v| v.to_rfc3339())
            .unwrap_or_default(),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(|v| v.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        "_text" | "_varchar" => row
            .try_get::<_, Option<Vec<String>>>(idx)
            .ok()
            .flatten()
            .map(|v| serde_json::to_string(&v).unwrap_or_default())
            .unwrap_or_default(),
        "_int4" => row
            .try_get::<_, Option<Vec<i32>>>(idx)
            .ok()
            .flatten()
            .map(|v| serde_json::to_string(&v).unwrap_or_default())
            .unwrap_or_default(),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .unwrap_or_default(),
    }
}

fn format_opt<T: std::fmt::Display>(result: Result<Option<T>, postgres::Error>) -> String {
    result
        .ok()
        .flatten()
        .map(|v| v.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_binding_accepts_text_spellings() {
        assert_eq!(as_int(&Value::Text("42".into())), Some(42));
        assert_eq!(as_int(&Value::Int(7)), Some(7));
        assert_eq!(as_int(&Value::Text("x".into())), None);
    }

    #[test]
    fn bool_binding_accepts_pg_spellings() {
        assert_eq!(as_bool(&Value::Text("t".into())), Some(true));
        assert_eq!(as_bool(&Value::Text("0".into())), Some(false));
        assert_eq!(as_bool(&Value::Text("maybe".into())), None);
    }

    #[test]
    fn mismatched_bind_is_invalid_argument() {
        let err = bind_param(&Value::Text("abc".into()), &Type::INT4).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }
}
