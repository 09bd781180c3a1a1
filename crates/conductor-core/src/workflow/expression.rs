//! Guard condition evaluator.
//!
//! Guards are JEXL expressions evaluated by `jexl_eval` against a read-only
//! JSON context of prior action outputs and resolved parameters. Only pure
//! transforms are registered; there is no way to call out of the sandbox.
//!
//! Payloads are always passed as context objects, never interpolated into
//! expression text.

use jexl_eval::error::EvaluationError;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("guard evaluation failed: {0}")]
    EvalFailed(String),

    #[error("guard does not parse: {0}")]
    Syntax(String),

    #[error("invalid guard context: {0}")]
    InvalidContext(String),
}

fn str_arg(args: &[Value], idx: usize) -> &str {
    args.get(idx).and_then(Value::as_str).unwrap_or("")
}

/// JavaScript-like truthiness, used to coerce guard results.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Sandboxed evaluator for action guards and `conditional_branch` expressions.
pub struct GuardEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl GuardEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("not", |args: &[Value]| {
                Ok(json!(!args.first().is_some_and(truthy)))
            })
            // Strings count characters; arrays and objects count entries.
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate to a raw JSON value. `context` must be an object.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate and coerce the result with `truthy`.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, context).map(|v| truthy(&v))
    }

    /// Static well-formedness check, used by the validator.
    ///
    /// Runs a lexical balance check, then evaluates against an empty probe
    /// context and reports only parse failures. Evaluation failures caused by
    /// missing data are expected at definition time and ignored.
    pub fn check_syntax(&self, expression: &str) -> Result<(), ExpressionError> {
        if expression.trim().is_empty() {
            return Err(ExpressionError::Syntax("empty expression".to_string()));
        }
        check_balanced(expression)?;

        let probe = json!({ "actions": {}, "parameters": {}, "workflow": {} });
        match self.evaluator.eval_in_context(expression, &probe) {
            Err(e @ EvaluationError::ParseError(_)) => Err(ExpressionError::Syntax(e.to_string())),
            _ => Ok(()),
        }
    }
}

impl Default for GuardEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_balanced(expression: &str) -> Result<(), ExpressionError> {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in expression.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return Err(ExpressionError::Syntax(format!("unbalanced '{c}'")));
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err(ExpressionError::Syntax("unterminated string".to_string()));
    }
    if let Some(open) = stack.pop() {
        return Err(ExpressionError::Syntax(format!("unclosed '{open}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Value {
        json!({
            "actions": {
                "lookup": { "status": "completed", "output": { "tier": "GOLD", "score": 42.0 } },
                "notify": { "status": "skipped", "output": null }
            },
            "parameters": { "region": "eu-west", "tags": ["a", "b", "c"] },
            "workflow": { "name": "onboarding" }
        })
    }

    #[test]
    fn compares_prior_outputs() {
        let eval = GuardEvaluator::new();
        assert!(eval
            .evaluate_bool("actions.lookup.output.score > 40", &ctx())
            .unwrap());
        assert!(!eval
            .evaluate_bool("actions.lookup.output.score > 50", &ctx())
            .unwrap());
    }

    #[test]
    fn logical_operators_over_parameters() {
        let eval = GuardEvaluator::new();
        assert!(eval
            .evaluate_bool(
                "parameters.region == 'eu-west' && actions.lookup.status == 'completed'",
                &ctx()
            )
            .unwrap());
        assert!(eval
            .evaluate_bool("parameters.region == 'us' || workflow.name == 'onboarding'", &ctx())
            .unwrap());
    }

    #[test]
    fn transforms() {
        let eval = GuardEvaluator::new();
        assert!(eval
            .evaluate_bool("actions.lookup.output.tier|lower == 'gold'", &ctx())
            .unwrap());
        assert!(eval
            .evaluate_bool("parameters.region|startsWith('eu')", &ctx())
            .unwrap());
        assert_eq!(
            eval.evaluate_value("parameters.tags|length", &ctx()).unwrap(),
            json!(3.0)
        );
        assert!(eval
            .evaluate_bool("(actions.notify.output)|not", &ctx())
            .unwrap());
    }

    #[test]
    fn null_and_missing_are_falsy() {
        let eval = GuardEvaluator::new();
        assert!(!eval.evaluate_bool("actions.notify.output", &ctx()).unwrap());
        assert!(!eval.evaluate_bool("parameters.missing", &ctx()).unwrap());
    }

    #[test]
    fn non_object_context_rejected() {
        let eval = GuardEvaluator::new();
        assert!(matches!(
            eval.evaluate_bool("true", &json!([1, 2])),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn syntax_check() {
        let eval = GuardEvaluator::new();
        assert!(eval.check_syntax("actions.a.output.ok == true").is_ok());
        assert!(eval.check_syntax("parameters.x > 3").is_ok());
        assert!(eval.check_syntax("   ").is_err());
        assert!(eval.check_syntax("(a == 1").is_err());
        assert!(eval.check_syntax("a == 'open").is_err());
        assert!(eval.check_syntax("a])").is_err());
    }

    #[test]
    fn balanced_but_malformed_is_syntax_error() {
        let eval = GuardEvaluator::new();
        assert!(matches!(
            eval.check_syntax("a == == 1"),
            Err(ExpressionError::Syntax(_))
        ));
        // undefined data or transforms only fail at run time
        assert!(eval.check_syntax("parameters.x|nosuch").is_ok());
    }

    #[test]
    fn truthiness() {
        assert!(truthy(&json!(1.5)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!({})));
    }
}
