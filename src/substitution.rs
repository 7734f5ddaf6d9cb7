//! Placeholder substitution for `${name}` and `$name`.

use crate::model::{value_to_string, VariableScope};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

// The braced alternative is tried first at every position, so a
// `${name}` token is always consumed whole and never re-read as a bare
// `$name`. `replace_all` never revisits replaced text.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_]+)")
        .expect("failed to compile placeholder regex")
});

/// Copy `value`, rewriting every string leaf through `leaf`.
///
/// Objects are walked value-wise (keys are kept) and arrays
/// element-wise; numbers, booleans and null are cloned as-is.
pub fn map_strings<F>(value: &Value, leaf: &F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::String(text) => Value::String(leaf(text)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| map_strings(v, leaf)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), map_strings(v, leaf)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace the placeholders in `text` whose names are bound in
/// `scope`. Unknown names are left untouched.
pub fn substitute_str(text: &str, scope: &VariableScope) -> String {
    if scope.is_empty() || !text.contains('$') {
        return text.to_string();
    }

    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            match scope.get(name) {
                Some(value) => value_to_string(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Substitute placeholders throughout a JSON value.
pub fn substitute(value: &Value, scope: &VariableScope) -> Value {
    map_strings(value, &|text: &str| substitute_str(text, scope))
}

/// Substitute placeholders in header values.
pub fn substitute_headers(
    headers: &HashMap<String, String>,
    scope: &VariableScope,
) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.clone(), substitute_str(value, scope)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(pairs: &[(&str, Value)]) -> VariableScope {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_braced_and_bare_forms() {
        let vars = scope(&[("id", json!(42)), ("name", json!("bob"))]);
        assert_eq!(
            substitute_str("/users/${id}?who=$name", &vars),
            "/users/42?who=bob"
        );
    }

    #[test]
    fn test_same_name_in_both_forms_is_fully_resolved() {
        let vars = scope(&[("x", json!("v"))]);
        assert_eq!(substitute_str("$x and ${x}", &vars), "v and v");
    }

    #[test]
    fn test_unresolved_names_left_verbatim() {
        let vars = scope(&[("known", json!("k"))]);
        assert_eq!(
            substitute_str("${missing}/$missing/${known}", &vars),
            "${missing}/$missing/k"
        );
    }

    #[test]
    fn test_bare_form_uses_whole_word() {
        let vars = scope(&[("tok", json!("1")), ("token", json!("2"))]);
        assert_eq!(substitute_str("$tok $token", &vars), "1 2");

        let only_short = scope(&[("tok", json!("1"))]);
        assert_eq!(substitute_str("$token", &only_short), "$token");
    }

    #[test]
    fn test_null_becomes_empty_and_scalars_use_json_spelling() {
        let vars = scope(&[
            ("nothing", Value::Null),
            ("flag", json!(true)),
            ("ratio", json!(1.5)),
            ("obj", json!({"a": 1})),
        ]);
        assert_eq!(
            substitute_str("[${nothing}|$flag|$ratio|$obj]", &vars),
            r#"[|true|1.5|{"a":1}]"#
        );
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let vars = scope(&[("a", json!("$b")), ("b", json!("boom"))]);
        assert_eq!(substitute_str("${a}", &vars), "$b");
        assert_eq!(substitute_str("$a", &vars), "$b");
    }

    #[test]
    fn test_known_names_leave_no_placeholders() {
        let vars = scope(&[
            ("host", json!("example.com")),
            ("port", json!(8080)),
            ("user_1", json!("u")),
        ]);
        let templates = [
            "${host}:${port}",
            "$host:$port/$user_1",
            "${user_1}${user_1}$host",
            "prefix-${port}-$port-suffix",
        ];
        for template in templates {
            let out = substitute_str(template, &vars);
            for name in vars.keys() {
                assert!(!out.contains(&format!("${{{name}}}")), "{out}");
                assert!(!out.contains(&format!("${name}")), "{out}");
            }
        }
    }

    #[test]
    fn test_nested_structures_are_copied() {
        let vars = scope(&[("token", json!("abc")), ("n", json!(3))]);
        let original = json!({
            "auth": {"bearer": "${token}"},
            "list": ["$token", 1, null, false, ["${n}"]],
            "${token}": "key untouched"
        });

        let out = substitute(&original, &vars);

        assert_eq!(
            out,
            json!({
                "auth": {"bearer": "abc"},
                "list": ["abc", 1, null, false, ["3"]],
                "${token}": "key untouched"
            })
        );
        assert_eq!(original["auth"]["bearer"], json!("${token}"));
    }

    #[test]
    fn test_non_string_values_pass_through() {
        let vars = scope(&[("x", json!(1))]);
        assert_eq!(substitute(&json!(5), &vars), json!(5));
        assert_eq!(substitute(&json!(true), &vars), json!(true));
        assert_eq!(substitute(&Value::Null, &vars), Value::Null);
    }

    #[test]
    fn test_headers() {
        let vars = scope(&[("token", json!("abc"))]);
        let headers = HashMap::from([(
            "Authorization".to_string(),
            "Bearer ${token}".to_string(),
        )]);
        let out = substitute_headers(&headers, &vars);
        assert_eq!(out["Authorization"], "Bearer abc");
        assert_eq!(headers["Authorization"], "Bearer ${token}");
    }
}
