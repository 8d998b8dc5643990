use serde_json::Value as Json;

/// Map a caller-supplied field type to the Elastic mapping type used when
/// creating an index.
pub fn es_field_type(type_name: &str) -> &'static str {
    let t = type_name.to_ascii_lowercase();
    if t == "keyword" {
        "keyword"
    } else if t == "text" {
        "text"
    } else if t.starts_with("bool") {
        "boolean"
    } else if t.starts_with("date") || t.starts_with("time") {
        "date"
    } else if t.starts_with("int") || t.starts_with("long") {
        "long"
    } else if t.starts_with("float") || t.starts_with("double") || t.starts_with("decimal") {
        "double"
    } else if t.starts_with("geo") {
        "geo_point"
    } else if t == "object" || t == "json" {
        "object"
    } else {
        "text"
    }
}

/// Flatten an index mapping's `properties` into `(dotted path, type)`
/// pairs. Nested objects contribute their leaves with dot notation.
pub fn flatten_mapping(properties: &Json) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    walk(properties, "", &mut fields);
    fields.sort();
    fields
}

fn walk(properties: &Json, prefix: &str, out: &mut Vec<(String, String)>) {
    let Some(map) = properties.as_object() else {
        return;
    };

    for (name, spec) in map {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        if let Some(nested) = spec.get("properties") {
            walk(nested, &path, out);
        } else {
            let type_name = spec
                .get("type")
                .and_then(Json::as_str)
                .unwrap_or("object")
                .to_string();
            out.push((path, type_name));
        }
    }
}
