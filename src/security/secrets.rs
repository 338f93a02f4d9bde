use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

/// Minimum allowed length for webhook secrets.
pub const MIN_SECRET_LENGTH: usize = 48;

/// Minimum Shannon entropy for webhook secrets.
pub const MIN_ENTROPY: f64 = 3.5;

/// Known placeholder values that must never be used as real secrets.
const FORBIDDEN_SECRETS: &[&str] = &[
    "replace-with-secret",
    "replace-with-secret-must-be-at-least-32-chars-long",
    "another-secret-must-be-at-least-32-chars-long",
    "github-webhook-password",
    "topsecret",
    "secret",
    "password",
    "changeme",
    "your-webhook-secret-min-32-chars-long",
    "min-32-char-webhook-secret",
];

const PLACEHOLDER_SUBSTRINGS: &[&str] = &["replace", "changeme", "topsecret", "password"];

#[derive(Debug, Error, PartialEq)]
pub enum SecretError {
    #[error("secret too short (minimum {MIN_SECRET_LENGTH} characters, got {0})")]
    TooShort(usize),
    #[error("secret appears to be a placeholder value, please use a real secret")]
    Placeholder,
    #[error("secret has insufficient entropy ({0:.2} < {MIN_ENTROPY}) - use a more random secret")]
    LowEntropy(f64),
}

/// Ensures a webhook secret meets length, placeholder, and entropy requirements.
pub fn validate_secret(secret: &str) -> Result<(), SecretError> {
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(SecretError::TooShort(secret.len()));
    }

    let lower = secret.to_lowercase();
    if FORBIDDEN_SECRETS.contains(&lower.as_str()) {
        return Err(SecretError::Placeholder);
    }
    if PLACEHOLDER_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return Err(SecretError::Placeholder);
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY {
        return Err(SecretError::LowEntropy(entropy));
    }

    Ok(())
}

/// Generates a cryptographically random secret: 36 random bytes, URL-safe
/// base64 encoded to exactly 48 characters.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 36];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Quick advisory check for obviously weak secrets. Used for operator
/// warnings only; `validate_secret` is the enforcement path.
pub fn is_weak_secret(secret: &str) -> bool {
    if secret.len() < 32 {
        return true;
    }

    let mut chars = secret.chars();
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return true;
        }
    }

    if is_sequential(secret) {
        return true;
    }

    shannon_entropy(secret) < 2.5
}

/// Shannon entropy over character frequencies: H = -sum(p * log2(p)).
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut length = 0usize;
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
        length += 1;
    }

    let length = length as f64;
    freq.values().fold(0.0, |entropy, &count| {
        let p = count as f64 / length;
        entropy - p * p.log2()
    })
}

fn is_sequential(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 4 {
        return false;
    }

    let sequential = bytes
        .windows(2)
        .filter(|w| w[1] == w[0].wrapping_add(1) || w[1] == w[0].wrapping_sub(1))
        .count();

    sequential as f64 > bytes.len() as f64 * 0.7
}
