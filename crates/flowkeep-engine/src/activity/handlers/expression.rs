//! A small, deliberately limited boolean expression evaluator for `condition` nodes.
//!
//! Grammar: `clause (("&&" | "||") clause)*` where a clause is either a bare dot-path
//! (truthy check) or `<dot-path> <op> <literal>` with `op` one of
//! `== != < <= > >=`. No parentheses, no operator precedence beyond left-to-right — this
//! is a routing predicate, not a general-purpose language.

use serde_json::Value;

#[derive(Debug, PartialEq)]
enum Combinator {
    And,
    Or,
}

/// Evaluates `expression` against `data`, resolving dot-paths (`a.b.c`) into `data`.
/// Returns `false` on paths that don't resolve rather than erroring, matching the
/// dot-path mapper's "missing paths -> null" convention used elsewhere in this design.
pub fn evaluate(expression: &str, data: &Value) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return false;
    }

    let (clauses, combinators) = split_clauses(expression);
    let mut results = clauses.iter().map(|c| evaluate_clause(c, data));

    let Some(first) = results.next() else {
        return false;
    };
    combinators
        .iter()
        .zip(results)
        .fold(first, |acc, (combinator, next)| match combinator {
            Combinator::And => acc && next,
            Combinator::Or => acc || next,
        })
}

fn split_clauses(expression: &str) -> (Vec<String>, Vec<Combinator>) {
    let mut clauses = Vec::new();
    let mut combinators = Vec::new();
    let mut rest = expression;

    loop {
        if let Some(idx) = rest.find("&&") {
            let or_idx = rest.find("||");
            if or_idx.map_or(true, |o| idx < o) {
                clauses.push(rest[..idx].trim().to_string());
                combinators.push(Combinator::And);
                rest = &rest[idx + 2..];
                continue;
            }
        }
        if let Some(idx) = rest.find("||") {
            clauses.push(rest[..idx].trim().to_string());
            combinators.push(Combinator::Or);
            rest = &rest[idx + 2..];
            continue;
        }
        clauses.push(rest.trim().to_string());
        break;
    }

    (clauses, combinators)
}

fn evaluate_clause(clause: &str, data: &Value) -> bool {
    const OPS: &[&str] = &["==", "!=", "<=", ">=", "<", ">"];
    for op in OPS {
        if let Some(idx) = clause.find(op) {
            let lhs = clause[..idx].trim();
            let rhs = clause[idx + op.len()..].trim();
            let lhs_val = resolve_operand(lhs, data);
            let rhs_val = resolve_operand(rhs, data);
            return compare(op, &lhs_val, &rhs_val);
        }
    }
    // Bare path: truthy check.
    is_truthy(&resolve_path(clause, data))
}

fn resolve_operand(token: &str, data: &Value) -> Value {
    let token = token.trim();
    if let Some(stripped) = token
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| token.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
    {
        return Value::String(stripped.to_string());
    }
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = token.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Value::Number(num);
        }
    }
    resolve_path(token, data)
}

fn resolve_path(path: &str, data: &Value) -> Value {
    let mut current = data;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(op: &str, lhs: &Value, rhs: &Value) -> bool {
    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        _ => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return false;
            };
            match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_on_numbers() {
        assert!(evaluate("x == 1", &json!({"x": 1})));
        assert!(!evaluate("x == 1", &json!({"x": 2})));
    }

    #[test]
    fn nested_path_comparison() {
        assert!(evaluate(
            "A_output.status_code == 200",
            &json!({"A_output": {"status_code": 200}})
        ));
    }

    #[test]
    fn string_literal_equality() {
        assert!(evaluate("status == \"ok\"", &json!({"status": "ok"})));
    }

    #[test]
    fn missing_path_is_falsy() {
        assert!(!evaluate("missing == 1", &json!({})));
    }

    #[test]
    fn and_or_combinators() {
        assert!(evaluate(
            "a == 1 && b == 2",
            &json!({"a": 1, "b": 2})
        ));
        assert!(!evaluate("a == 1 && b == 3", &json!({"a": 1, "b": 2})));
        assert!(evaluate("a == 1 || b == 3", &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn bare_path_truthiness() {
        assert!(evaluate("approved", &json!({"approved": true})));
        assert!(!evaluate("approved", &json!({"approved": false})));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(evaluate("count > 5", &json!({"count": 10})));
        assert!(!evaluate("count > 5", &json!({"count": 3})));
        assert!(evaluate("count <= 5", &json!({"count": 5})));
    }
}
