use strata_model::Value;

/// Double-quotes one identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes each dot-separated part of a possibly schema-qualified name.
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Unqualified part of `schema.table`.
pub fn bare_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

pub fn quoted_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders one cell in `COPY ... FORMAT text` encoding.
pub fn copy_text_field(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("\\N"),
        Value::Bool(true) => out.push('t'),
        Value::Bool(false) => out.push('f'),
        Value::Float(v) if v.is_nan() => out.push_str("NaN"),
        Value::Float(v) if v.is_infinite() => {
            out.push_str(if *v > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Text(text) => {
            for ch in text.chars() {
                match ch {
                    '\\' => out.push_str("\\\\"),
                    '\t' => out.push_str("\\t"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    other => out.push(other),
                }
            }
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Encodes rows as a `COPY FROM STDIN` text payload.
pub fn copy_text_payload(rows: &[Vec<Value>]) -> Vec<u8> {
    let mut out = String::with_capacity(rows.len() * 64);
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.push('\t');
            }
            copy_text_field(value, &mut out);
        }
        out.push('\n');
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn quoting() {
        assert_eq!(quote_ident("daily"), r#""daily""#);
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(quote_qualified("market.daily"), r#""market"."daily""#);
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(bare_name("market.daily"), "daily");
    }

    #[test]
    fn copy_payload_escapes_and_nulls() {
        let rows = vec![vec![
            Value::from("a\tb\\c\nd"),
            Value::Null,
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
            Value::Bool(true),
            Value::Float(f64::NEG_INFINITY),
            Value::Int(-3),
        ]];
        let payload = String::from_utf8(copy_text_payload(&rows)).unwrap();
        assert_eq!(payload, "a\\tb\\\\c\\nd\t\\N\t2024-01-02\tt\t-Infinity\t-3\n");
    }
}
