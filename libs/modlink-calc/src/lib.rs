//! modlink-calc - Transform expressions for modlink
//!
//! Compiles a scalar expression over a single variable `x` once and evaluates
//! it for every decoded register value.
//!
//! # Example
//!
//! ```rust
//! use modlink_calc::{CalcEngine, ExpressionEngine};
//!
//! let engine = CalcEngine::new();
//!
//! // Raw tenths of a degree Celsius -> Kelvin
//! let compiled = engine.compile("x * 0.1 + kelvin_offset").unwrap();
//! let kelvin = engine.evaluate(&compiled, 215.0).unwrap();
//! assert!((kelvin - 294.65).abs() < 1e-9);
//! ```
//!
//! # Built-in Functions
//!
//! | Function | Signature | Description |
//! |----------|-----------|-------------|
//! | `scale` | `scale(value, factor)` | Multiply by factor |
//! | `clamp` | `clamp(value, min, max)` | Limit to range |
//! | `abs` | `abs(value)` | Absolute value |
//! | `min` | `min(a, b)` | Minimum of two |
//! | `max` | `max(a, b)` | Maximum of two |
//! | `round` | `round(value, decimals)` | Round to decimals |
//! | `sign` | `sign(value)` | Sign: -1, 0, or 1 |
//! | `sqrt` | `sqrt(value)` | Square root |
//! | `pow` | `pow(base, exponent)` | Power |
//!
//! # Constants
//!
//! `pi`, `e`, `kelvin_offset` (273.15), `knot` (m/s per knot),
//! `nautical_mile` (m), `deg` (rad per degree), `hour` (s).

pub mod builtin_functions;
pub mod error;
pub mod evaluator;

// Re-exports for convenience
pub use error::{CalcError, Result};
pub use evaluator::{CalcEngine, CompiledExpression, ExpressionEngine, INPUT_VARIABLE};
