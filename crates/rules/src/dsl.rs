//! Condition DSL evaluator.
//!
//! Expressions are JSON trees interpreted against an episode's flat field
//! map.  Fixed semantics, kept deliberately small:
//!
//! - logical: `all`, `any`
//! - comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - boolean: `is_true`, `is_false`
//! - presence: `exists`
//! - string: `contains_lower`
//!
//! A missing field evaluates to false for every operator except `exists`
//! (so `ne` never fires on absent data).  Empty `all` is vacuously true,
//! empty `any` is false, an empty root expression is true.  An unknown
//! operator is a ruleset bug and errors out; [`validate_expr`] runs the same
//! walk at load time so evaluation never hits one in practice.

use anyhow::{bail, Result};
use serde_json::{Map, Value};

const OPERATORS: &[&str] = &[
    "all",
    "any",
    "eq",
    "ne",
    "gt",
    "gte",
    "lt",
    "lte",
    "is_true",
    "is_false",
    "exists",
    "contains_lower",
];

/// Evaluate `expr` against `fields`.
pub fn evaluate(expr: &Value, fields: &Map<String, Value>) -> Result<bool> {
    let Some(map) = expr.as_object() else {
        bail!("DSL expression must be a JSON object, got: {expr}");
    };

    // Empty condition is vacuously true.
    if map.is_empty() {
        return Ok(true);
    }

    if let Some(subs) = map.get("all") {
        let subs = expr_list(subs, "all")?;
        for sub in subs {
            if !evaluate(sub, fields)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    if let Some(subs) = map.get("any") {
        let subs = expr_list(subs, "any")?;
        for sub in subs {
            if evaluate(sub, fields)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if let Some(args) = map.get("eq") {
        let (field, expected) = binary_args(args, "eq")?;
        return Ok(match fields.get(field) {
            None => false,
            Some(value) => json_eq(value, expected),
        });
    }

    if let Some(args) = map.get("ne") {
        let (field, expected) = binary_args(args, "ne")?;
        return Ok(match fields.get(field) {
            // Missing field means "condition not met", never "differs".
            None => false,
            Some(value) => !json_eq(value, expected),
        });
    }

    if let Some(field) = map.get("is_true") {
        let field = field_name(field, "is_true")?;
        return Ok(fields.get(field) == Some(&Value::Bool(true)));
    }

    if let Some(field) = map.get("is_false") {
        let field = field_name(field, "is_false")?;
        return Ok(fields.get(field) == Some(&Value::Bool(false)));
    }

    if let Some(field) = map.get("exists") {
        let field = field_name(field, "exists")?;
        return Ok(matches!(fields.get(field), Some(value) if !value.is_null()));
    }

    if let Some(args) = map.get("contains_lower") {
        let (field, needle) = binary_args(args, "contains_lower")?;
        let Some(needle) = needle.as_str() else {
            bail!("contains_lower operand must be a string, got: {needle}");
        };
        return Ok(match fields.get(field).and_then(Value::as_str) {
            Some(haystack) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            None => false,
        });
    }

    for (op, cmp) in [
        ("gte", f64::ge as fn(&f64, &f64) -> bool),
        ("gt", f64::gt as fn(&f64, &f64) -> bool),
        ("lte", f64::le as fn(&f64, &f64) -> bool),
        ("lt", f64::lt as fn(&f64, &f64) -> bool),
    ] {
        if let Some(args) = map.get(op) {
            let (field, threshold) = binary_args(args, op)?;
            return Ok(match (fields.get(field).and_then(as_number), as_number(threshold)) {
                (Some(value), Some(threshold)) => cmp(&value, &threshold),
                // Missing field or non-numeric value: condition not met.
                _ => false,
            });
        }
    }

    bail!("unknown DSL operator: {:?}", map.keys().collect::<Vec<_>>());
}

/// Walk an expression tree and reject unknown operators or malformed
/// operands.  Run at ruleset load so evaluation is startup-safe.
pub fn validate_expr(expr: &Value) -> Result<()> {
    let Some(map) = expr.as_object() else {
        bail!("DSL expression must be a JSON object, got: {expr}");
    };

    if map.is_empty() {
        return Ok(());
    }

    for (op, args) in map {
        match op.as_str() {
            "all" | "any" => {
                for sub in expr_list(args, op)? {
                    validate_expr(sub)?;
                }
            }
            "eq" | "ne" | "gt" | "gte" | "lt" | "lte" | "contains_lower" => {
                binary_args(args, op)?;
            }
            "is_true" | "is_false" | "exists" => {
                field_name(args, op)?;
            }
            other => bail!(
                "unknown DSL operator '{other}' (expected one of: {})",
                OPERATORS.join(", ")
            ),
        }
    }

    Ok(())
}

fn expr_list<'a>(args: &'a Value, op: &str) -> Result<&'a Vec<Value>> {
    match args.as_array() {
        Some(list) => Ok(list),
        None => bail!("'{op}' operand must be a list of expressions, got: {args}"),
    }
}

fn binary_args<'a>(args: &'a Value, op: &str) -> Result<(&'a str, &'a Value)> {
    let Some(pair) = args.as_array().filter(|list| list.len() == 2) else {
        bail!("'{op}' operand must be a [field, value] pair, got: {args}");
    };
    let Some(field) = pair[0].as_str() else {
        bail!("'{op}' field name must be a string, got: {}", pair[0]);
    };
    Ok((field, &pair[1]))
}

fn field_name<'a>(args: &'a Value, op: &str) -> Result<&'a str> {
    match args.as_str() {
        Some(field) => Ok(field),
        None => bail!("'{op}' operand must be a field name, got: {args}"),
    }
}

/// Numeric coercion mirroring the comparison semantics: JSON numbers and
/// numeric strings coerce, everything else is a type mismatch.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Equality with numeric coercion so `5` and `5.0` compare equal the way the
/// rest of the numeric operators treat them.
fn json_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        if left.is_number() && right.is_number() {
            return l == r;
        }
    }
    left == right
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{evaluate, validate_expr};

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn empty_root_is_true() {
        assert!(evaluate(&json!({}), &Map::new()).unwrap());
    }

    #[test]
    fn empty_all_true_empty_any_false() {
        assert!(evaluate(&json!({"all": []}), &Map::new()).unwrap());
        assert!(!evaluate(&json!({"any": []}), &Map::new()).unwrap());
    }

    #[test]
    fn missing_field_is_false_for_every_operator_except_exists() {
        let empty = Map::new();
        for expr in [
            json!({"eq": ["f", "x"]}),
            json!({"ne": ["f", "x"]}),
            json!({"gt": ["f", 1]}),
            json!({"gte": ["f", 1]}),
            json!({"lt": ["f", 1]}),
            json!({"lte": ["f", 1]}),
            json!({"is_true": "f"}),
            json!({"is_false": "f"}),
            json!({"contains_lower": ["f", "x"]}),
        ] {
            assert!(!evaluate(&expr, &empty).unwrap(), "expected false for {expr}");
        }
        assert!(!evaluate(&json!({"exists": "f"}), &empty).unwrap());
    }

    #[test]
    fn ne_fires_only_on_present_differing_values() {
        let data = fields(json!({"vl_degree": "partial"}));
        assert!(evaluate(&json!({"ne": ["vl_degree", "total"]}), &data).unwrap());
        assert!(!evaluate(&json!({"ne": ["vl_degree", "partial"]}), &data).unwrap());
    }

    #[test]
    fn boolean_operators_require_exact_booleans() {
        let data = fields(json!({"vl_present": true, "h_present": "yes"}));
        assert!(evaluate(&json!({"is_true": "vl_present"}), &data).unwrap());
        assert!(!evaluate(&json!({"is_true": "h_present"}), &data).unwrap());
        assert!(!evaluate(&json!({"is_false": "vl_present"}), &data).unwrap());
    }

    #[test]
    fn exists_sees_non_null_values_only() {
        let data = fields(json!({"a": 0, "b": null}));
        assert!(evaluate(&json!({"exists": "a"}), &data).unwrap());
        assert!(!evaluate(&json!({"exists": "b"}), &data).unwrap());
    }

    #[test]
    fn numeric_comparison_coerces_strings_and_rejects_mismatches() {
        let data = fields(json!({"age": "62", "name": "pat"}));
        assert!(evaluate(&json!({"gte": ["age", 50]}), &data).unwrap());
        assert!(!evaluate(&json!({"lt": ["age", 50]}), &data).unwrap());
        assert!(!evaluate(&json!({"gt": ["name", 1]}), &data).unwrap());
    }

    #[test]
    fn contains_lower_is_case_insensitive() {
        let data = fields(json!({"notes": "Sudden LOSS of vision"}));
        assert!(evaluate(&json!({"contains_lower": ["notes", "loss"]}), &data).unwrap());
        assert!(!evaluate(&json!({"contains_lower": ["notes", "flash"]}), &data).unwrap());
    }

    #[test]
    fn nested_logical_expressions_compose() {
        let data = fields(json!({"vl_single_eye": "single", "vl_onset_speed": "subacute"}));
        let expr = json!({"all": [
            {"eq": ["vl_single_eye", "single"]},
            {"any": [
                {"eq": ["vl_onset_speed", "subacute"]},
                {"eq": ["vl_onset_speed", "acute"]},
            ]},
        ]});
        assert!(evaluate(&expr, &data).unwrap());
    }

    #[test]
    fn unknown_operator_fails_fast() {
        assert!(evaluate(&json!({"matches": ["f", ".*"]}), &Map::new()).is_err());
        assert!(validate_expr(&json!({"matches": ["f", ".*"]})).is_err());
    }

    #[test]
    fn validation_walks_nested_trees() {
        assert!(validate_expr(&json!({"all": [{"any": [{"bogus": "f"}]}]})).is_err());
        assert!(validate_expr(&json!({"all": [{"exists": "f"}]})).is_ok());
    }

    #[test]
    fn number_equality_coerces_representations() {
        let data = fields(json!({"count": 5}));
        assert!(evaluate(&json!({"eq": ["count", 5.0]}), &data).unwrap());
    }
}
