//! Cache Key Derivation
//!
//! Maps an operation name plus its arguments to a stable cache key.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Keys longer than this are replaced by a SHA-256 digest of the canonical form.
pub const MAX_PASSTHROUGH_KEY_LEN: usize = 128;

// == Key Deriver Trait ==
/// Deterministic mapping from an operation identity to a cache key.
pub trait KeyDeriver: Send + Sync + 'static {
    fn derive(&self, operation: &str, args: &Value) -> String;

    /// Derives a key from any serializable argument list.
    fn derive_from<A: Serialize + ?Sized>(&self, operation: &str, args: &A) -> Result<String>
    where
        Self: Sized,
    {
        let args = serde_json::to_value(args).map_err(|e| CacheError::KeyDerivation {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.derive(operation, &args))
    }
}

// == Canonical Key Deriver ==
/// Default strategy: `name:canonical-json`, or `name#sha256` when long.
///
/// Canonical JSON sorts object keys and drops whitespace, so structurally
/// equal arguments always produce the same key.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalKeyDeriver;

impl KeyDeriver for CanonicalKeyDeriver {
    fn derive(&self, operation: &str, args: &Value) -> String {
        let mut canonical = String::new();
        write_canonical(&mut canonical, args);

        if operation.len() + 1 + canonical.len() <= MAX_PASSTHROUGH_KEY_LEN {
            format!("{operation}:{canonical}")
        } else {
            let digest = Sha256::digest(canonical.as_bytes());
            format!("{operation}#{}", hex::encode(digest))
        }
    }
}

/// Writes `value` as compact JSON with object keys in sorted order.
pub fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::String(s) => write_string(out, s),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json escaping keeps strings containing ':' or quotes unambiguous
    let _ = write!(out, "{}", Value::String(s.to_string()));
}
