//! Type-preserving randomization of BSON documents.
//!
//! Used both to derive synthetic documents from a user-supplied template and to
//! vary the filters of replayed transactions. Keys (including `$` operators)
//! are kept as-is and only leaf values change. Operands of the operators in
//! [`STRUCTURAL_OPERATORS`] and `$`-prefixed strings (field paths) are
//! copied unchanged.

use crate::pattern::{generate_random_digits, random_uppercase, random_word};
use bson::{oid::ObjectId, Bson, DateTime, Document};
use rand::Rng;

/// Milliseconds in the window used for randomized dates (one year back).
const DATE_WINDOW_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Operators whose operands are sort directions, projections, counts,
/// accumulators, patterns or type names rather than data.
pub const STRUCTURAL_OPERATORS: &[&str] = &[
    "$sort", "$project", "$limit", "$skip", "$sample", "$count", "$group", "$unwind",
    "$lookup", "$unset", "$exists", "$regex", "$options", "$type", "$size", "$mod",
    "$slice", "$meta",
];

/// Randomize every leaf value of `doc`, keeping its shape and value types.
pub fn randomize_document<R: Rng>(doc: &Document, rng: &mut R) -> Document {
    doc.iter()
        .map(|(key, value)| {
            let value = if STRUCTURAL_OPERATORS.contains(&key.as_str()) {
                value.clone()
            } else {
                randomize_value(value, rng)
            };
            (key.clone(), value)
        })
        .collect()
}

/// Randomize a single BSON value, preserving its type.
pub fn randomize_value<R: Rng>(value: &Bson, rng: &mut R) -> Bson {
    match value {
        Bson::Document(doc) => Bson::Document(randomize_document(doc, rng)),
        Bson::Array(items) => Bson::Array(items.iter().map(|v| randomize_value(v, rng)).collect()),
        Bson::String(s) if s.starts_with('$') => value.clone(),
        Bson::String(s) => Bson::String(randomize_string(s, rng)),
        Bson::Int32(n) => Bson::Int32(rng.random_range(0..=scale_i64(*n as i64)) as i32),
        Bson::Int64(n) => Bson::Int64(rng.random_range(0..=scale_i64(*n))),
        Bson::Double(f) => {
            let upper = if f.abs() < 1.0 { 1.0 } else { f.abs() * 2.0 };
            Bson::Double(rng.random::<f64>() * upper)
        }
        Bson::Boolean(_) => Bson::Boolean(rng.random_bool(0.5)),
        Bson::DateTime(_) => {
            let now = DateTime::now().timestamp_millis();
            Bson::DateTime(DateTime::from_millis(
                now - rng.random_range(0..DATE_WINDOW_MS),
            ))
        }
        Bson::ObjectId(_) => Bson::ObjectId(ObjectId::new()),
        other => other.clone(),
    }
}

/// Upper bound for a randomized integer: twice the magnitude, capped to stay
/// within `i32` so the value fits either integer width.
fn scale_i64(n: i64) -> i64 {
    n.saturating_abs().saturating_mul(2).clamp(1, i32::MAX as i64)
}

/// Randomize a string while keeping its general form.
///
/// Email addresses stay email addresses with a capitalized local part, digit
/// strings stay digit strings of the same length, everything else becomes a
/// word of the same length with the leading case preserved.
fn randomize_string<R: Rng>(s: &str, rng: &mut R) -> String {
    if s.is_empty() {
        return String::new();
    }
    if let Some((_, domain)) = s.split_once('@') {
        return format!(
            "{}{}.{}@{}",
            random_uppercase(rng),
            random_word(rng, 6),
            generate_random_digits(rng, 4),
            domain
        );
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return generate_random_digits(rng, s.len());
    }
    let len = s.chars().count();
    if s.starts_with(|c: char| c.is_uppercase()) {
        format!("{}{}", random_uppercase(rng), random_word(rng, len - 1))
    } else {
        random_word(rng, len)
    }
}
