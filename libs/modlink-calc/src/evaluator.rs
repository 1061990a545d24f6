//! CalcEngine - Transform expression compiler and evaluator
//!
//! Provides formula evaluation with support for:
//! - Arithmetic: +, -, *, /, ^, %
//! - Comparison: <, >, <=, >=, ==, != (booleans evaluate to 1/0)
//! - Logic: &&, ||, !
//! - Built-in functions: scale, clamp, abs, min, max, round, sign, sqrt, pow
//! - Named constants: pi, e, kelvin_offset, knot, nautical_mile, deg, hour
//!
//! Expressions have a single free variable, `x`.

use crate::builtin_functions::{self, CONSTANTS};
use crate::error::{CalcError, Result};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value,
};
use tracing::trace;

/// Name of the single variable bound at evaluation time
pub const INPUT_VARIABLE: &str = "x";

/// Compile-once, evaluate-many contract used by the polling pipeline.
///
/// Any engine works as long as it can turn text into an immutable compiled
/// form and evaluate that form against one numeric input.
pub trait ExpressionEngine: Send + Sync + 'static {
    /// Parsed form of an expression, owned by whoever compiled it
    type Compiled: Send + Sync + 'static;

    /// Parse `text`, failing with [`CalcError::Compile`] on malformed syntax
    fn compile(&self, text: &str) -> Result<Self::Compiled>;

    /// Evaluate a compiled expression with `x` bound to `input`
    fn evaluate(&self, compiled: &Self::Compiled, input: f64) -> Result<f64>;
}

/// Expression parsed into an operator tree.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    tree: Node,
}

impl CompiledExpression {
    /// Original expression text
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// CalcEngine - `evalexpr` backed expression engine
///
/// # Example
/// ```
/// use modlink_calc::{CalcEngine, ExpressionEngine};
///
/// let engine = CalcEngine::new();
/// let compiled = engine.compile("x * 0.1 - 5").unwrap();
/// assert_eq!(engine.evaluate(&compiled, 100.0).unwrap(), 5.0);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct CalcEngine;

impl CalcEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build the evaluation context: constants, functions, then `x`
    fn context_for(input: f64) -> Result<HashMapContext> {
        let mut context = HashMapContext::new();

        for (name, value) in CONSTANTS {
            context
                .set_value((*name).to_string(), Value::Float(*value))
                .map_err(|e| {
                    CalcError::function(format!("Failed to set constant {}: {}", name, e))
                })?;
        }

        Self::register_stateless_functions(&mut context)?;

        context
            .set_value(INPUT_VARIABLE.to_string(), Value::Float(input))
            .map_err(|e| CalcError::evaluation(format!("Failed to bind x: {}", e)))?;

        Ok(context)
    }

    /// Register stateless functions with evalexpr context
    fn register_stateless_functions(context: &mut HashMapContext) -> Result<()> {
        // Helper to convert Value to f64 (handles both Int and Float)
        fn to_f64(value: &Value) -> std::result::Result<f64, EvalexprError> {
            match value {
                Value::Float(f) => Ok(*f),
                Value::Int(i) => Ok(*i as f64),
                _ => Err(EvalexprError::expected_number(value.clone())),
            }
        }

        // Tuple arguments with an arity check, so a wrong call is an error and not a panic
        fn args(
            value: &Value,
            name: &str,
            expected: usize,
        ) -> std::result::Result<Vec<f64>, EvalexprError> {
            let tuple = value.as_tuple()?;
            if tuple.len() != expected {
                return Err(EvalexprError::CustomMessage(format!(
                    "{} expects {} arguments, got {}",
                    name,
                    expected,
                    tuple.len()
                )));
            }
            tuple.iter().map(to_f64).collect()
        }

        let functions: [(&str, Function); 9] = [
            // scale(value, factor)
            (
                "scale",
                Function::new(|argument| {
                    let a = args(argument, "scale", 2)?;
                    Ok(Value::Float(builtin_functions::scale(a[0], a[1])))
                }),
            ),
            // clamp(value, min, max)
            (
                "clamp",
                Function::new(|argument| {
                    let a = args(argument, "clamp", 3)?;
                    Ok(Value::Float(builtin_functions::clamp(a[0], a[1], a[2])))
                }),
            ),
            // abs(value)
            (
                "abs",
                Function::new(|argument| {
                    Ok(Value::Float(builtin_functions::abs(to_f64(argument)?)))
                }),
            ),
            // min(a, b)
            (
                "min",
                Function::new(|argument| {
                    let a = args(argument, "min", 2)?;
                    Ok(Value::Float(builtin_functions::min(a[0], a[1])))
                }),
            ),
            // max(a, b)
            (
                "max",
                Function::new(|argument| {
                    let a = args(argument, "max", 2)?;
                    Ok(Value::Float(builtin_functions::max(a[0], a[1])))
                }),
            ),
            // round(value, decimals)
            (
                "round",
                Function::new(|argument| {
                    let a = args(argument, "round", 2)?;
                    Ok(Value::Float(builtin_functions::round(a[0], a[1] as i32)))
                }),
            ),
            // sign(value)
            (
                "sign",
                Function::new(|argument| {
                    Ok(Value::Float(builtin_functions::sign(to_f64(argument)?)))
                }),
            ),
            // sqrt(value)
            (
                "sqrt",
                Function::new(|argument| {
                    Ok(Value::Float(builtin_functions::sqrt(to_f64(argument)?)))
                }),
            ),
            // pow(base, exponent)
            (
                "pow",
                Function::new(|argument| {
                    let a = args(argument, "pow", 2)?;
                    Ok(Value::Float(builtin_functions::pow(a[0], a[1])))
                }),
            ),
        ];

        for (name, function) in functions {
            context
                .set_function(name.to_string(), function)
                .map_err(|e| CalcError::function(format!("Failed to register {}: {}", name, e)))?;
        }

        Ok(())
    }

    /// Convert evalexpr Value to f64
    fn value_to_f64(value: Value, formula: &str) -> Result<f64> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
            _ => Err(CalcError::evaluation(format!(
                "Expression did not evaluate to a number: {}",
                formula
            ))),
        }
    }
}

impl ExpressionEngine for CalcEngine {
    type Compiled = CompiledExpression;

    fn compile(&self, text: &str) -> Result<CompiledExpression> {
        if text.trim().is_empty() {
            return Err(CalcError::compile("Expression is empty"));
        }

        let tree = evalexpr::build_operator_tree(text)
            .map_err(|e| CalcError::compile(format!("Failed to parse '{}': {}", text, e)))?;

        Ok(CompiledExpression {
            source: text.to_string(),
            tree,
        })
    }

    fn evaluate(&self, compiled: &CompiledExpression, input: f64) -> Result<f64> {
        let context = Self::context_for(input)?;

        let value = compiled.tree.eval_with_context(&context).map_err(|e| {
            CalcError::evaluation(format!("Failed to evaluate '{}': {}", compiled.source, e))
        })?;
        let result = Self::value_to_f64(value, &compiled.source)?;

        // Float division by zero and friends do not fail inside evalexpr
        if input.is_finite() && !result.is_finite() {
            return Err(CalcError::evaluation(format!(
                "'{}' produced {} for x = {}",
                compiled.source, result, input
            )));
        }

        trace!(expression = %compiled.source, input, result, "evaluated");
        Ok(result)
    }
}
