//! Pattern-based string generator.
//!
//! Supports placeholders:
//! - `{index}` - document index
//! - `{letter}` - random uppercase letter `A`-`Z`
//! - `{word:N}` - random lowercase word of N letters
//! - `{rand:N}` - random N-digit number

use rand::Rng;

/// Generate a string based on a pattern with placeholders.
pub fn generate_pattern<R: Rng>(pattern: &str, rng: &mut R, index: u64) -> String {
    let mut result = pattern.replace("{index}", &index.to_string());

    while result.contains("{letter}") {
        let letter = random_uppercase(rng).to_string();
        result = result.replacen("{letter}", &letter, 1);
    }

    result = expand_sized(&result, "{word:", |n| random_word(rng, n));
    expand_sized(&result, "{rand:", |n| generate_random_digits(rng, n))
}

/// Replace every `{prefix:N}` placeholder using `fill(N)`.
///
/// A placeholder whose size does not parse is left in place and ends the scan.
fn expand_sized<F>(input: &str, prefix: &str, mut fill: F) -> String
where
    F: FnMut(usize) -> String,
{
    let mut result = input.to_string();
    let mut from = 0;
    while let Some(offset) = result[from..].find(prefix) {
        let start = from + offset;
        let Some(len) = result[start..].find('}') else {
            break;
        };
        let end = start + len;
        match result[start + prefix.len()..end].parse::<usize>() {
            Ok(n) => {
                let value = fill(n);
                result = format!("{}{}{}", &result[..start], value, &result[end + 1..]);
                from = start + value.len();
            }
            Err(_) => break,
        }
    }
    result
}

/// A random uppercase ASCII letter.
pub fn random_uppercase<R: Rng>(rng: &mut R) -> char {
    char::from(b'A' + rng.random_range(0..26u8))
}

/// A random lowercase ASCII word of `len` letters.
pub fn random_word<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(b'a' + rng.random_range(0..26u8)))
        .collect()
}

/// Generate a random number with exactly N digits.
pub fn generate_random_digits<R: Rng>(rng: &mut R, digits: usize) -> String {
    if digits == 0 {
        return String::new();
    }

    let mut result = String::with_capacity(digits);

    // First digit should be 1-9 to avoid leading zeros
    result.push(char::from(b'0' + rng.random_range(1..10u8)));

    for _ in 1..digits {
        result.push(char::from(b'0' + rng.random_range(0..10u8)));
    }

    result
}
