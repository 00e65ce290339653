//! Cache Key Codec
//!
//! Derives a bounded-length, storage-safe cache key from an arbitrary
//! identifier. The output alphabet is ASCII alphanumeric only, which is a
//! valid item name for every backing store used by the tiers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum length of an encoded key
pub const MAX_KEY_LEN: usize = 128;

/// Encoded prefix kept when a key is shortened with a digest suffix
const TRUNCATED_PREFIX_LEN: usize = MAX_KEY_LEN - 64;

/// Maximum length of the plain-text hint kept alongside a key
const HINT_LEN: usize = 96;

/// Separator between the identifier and its parameters. Canonical JSON never
/// contains it raw, and text identifiers holding it are quoted first.
const PARAMS_SEPARATOR: char = '\0';

/// Parameter set appended to an identifier
pub type KeyParams = BTreeMap<String, Value>;

// =============================================================================
// Identifier
// =============================================================================

/// Caller-supplied identifier for a cached resource
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    /// A plain string (usually a URL), used verbatim
    Text(String),
    /// A structured request descriptor, canonicalized before encoding
    Structured(Value),
}

impl Identifier {
    /// Text that contains the separator or already starts with a quote is
    /// written as a JSON string, so two identifiers never share a source.
    fn canonical(&self) -> String {
        match self {
            Identifier::Text(s) if s.contains(PARAMS_SEPARATOR) || s.starts_with('"') => {
                Value::String(s.clone()).to_string()
            }
            Identifier::Text(s) => s.clone(),
            Identifier::Structured(v) => canonical_json(v),
        }
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Text(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier::Text(s)
    }
}

impl From<&String> for Identifier {
    fn from(s: &String) -> Self {
        Identifier::Text(s.clone())
    }
}

impl From<Value> for Identifier {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => Identifier::Text(s),
            other => Identifier::Structured(other),
        }
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Encoded cache key shared by every tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    encoded: String,
    hint: String,
}

impl CacheKey {
    /// Derive a key from an identifier and an optional parameter set
    pub fn derive(identifier: impl Into<Identifier>, params: Option<&KeyParams>) -> Self {
        let mut source = identifier.into().canonical();
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            source.push(PARAMS_SEPARATOR);
            source.push_str(&canonical_params(params));
        }

        let encoded: String = STANDARD
            .encode(source.as_bytes())
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        let encoded = if encoded.len() > MAX_KEY_LEN {
            let digest = hex::encode(Sha256::digest(source.as_bytes()));
            format!("{}{}", &encoded[..TRUNCATED_PREFIX_LEN], digest)
        } else {
            encoded
        };

        Self {
            encoded,
            hint: hint_of(&source),
        }
    }

    /// Derive a key from an identifier alone
    pub fn of(identifier: impl Into<Identifier>) -> Self {
        Self::derive(identifier, None)
    }

    /// Wrap an already-derived key string
    pub fn raw(key: impl Into<String>) -> Self {
        let encoded = key.into();
        let hint = hint_of(&encoded);
        Self { encoded, hint }
    }

    /// The storage-safe key string
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Plain-text prefix of the identifier, for tagging and logs
    pub fn hint(&self) -> &str {
        &self.hint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

fn hint_of(source: &str) -> String {
    source
        .chars()
        .filter(|c| *c != PARAMS_SEPARATOR)
        .take(HINT_LEN)
        .collect()
}

fn canonical_params(params: &KeyParams) -> String {
    let object: serde_json::Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    canonical_json(&Value::Object(object))
}

/// Serialize a JSON value with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_separator_in_text_cannot_forge_params() {
        let mut params = KeyParams::new();
        params.insert("x".into(), json!(1));

        let with_params = CacheKey::derive("a", Some(&params));
        assert_ne!(with_params, CacheKey::of("a\0{\"x\":1}"));
        assert_ne!(CacheKey::of("a\0"), CacheKey::of("\"a\\u0000\""));

        // Ordinary identifiers keep their plain source
        assert_eq!(CacheKey::of("pokemon/25").hint(), "pokemon/25");
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::of("https://pokeapi.co/api/v2/pokemon/25");
        let b = CacheKey::of("https://pokeapi.co/api/v2/pokemon/25");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_distinct_inputs_yield_distinct_keys() {
        let keys: Vec<CacheKey> = (1..=151)
            .map(|id| CacheKey::of(format!("https://pokeapi.co/api/v2/pokemon/{}", id)))
            .collect();
        let unique: std::collections::HashSet<_> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_key_alphabet_is_alphanumeric() {
        let key = CacheKey::of("cards?name=Mr. Mime&set=base1/é+ü");
        assert!(!key.as_str().is_empty());
        assert!(key.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_structured_identifier_is_canonical() {
        let a = CacheKey::of(json!({"set": "base1", "page": 2, "filter": {"b": 1, "a": 2}}));
        let b = CacheKey::of(json!({"filter": {"a": 2, "b": 1}, "page": 2, "set": "base1"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_params_change_the_key() {
        let mut params = KeyParams::new();
        params.insert("id".into(), json!(25));

        let plain = CacheKey::of("pokemon");
        let with_params = CacheKey::derive("pokemon", Some(&params));
        assert_ne!(plain, with_params);

        // Empty params are ignored
        let empty = KeyParams::new();
        assert_eq!(CacheKey::derive("pokemon", Some(&empty)), plain);
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let mut a = KeyParams::new();
        a.insert("name".into(), json!("pikachu"));
        a.insert("page".into(), json!(1));

        let mut b = KeyParams::new();
        b.insert("page".into(), json!(1));
        b.insert("name".into(), json!("pikachu"));

        assert_eq!(
            CacheKey::derive("tcg-cards", Some(&a)),
            CacheKey::derive("tcg-cards", Some(&b))
        );
    }

    #[test]
    fn test_long_keys_are_bounded() {
        let long = format!("https://api.pokemontcg.io/v2/cards?q={}", "name:charizard ".repeat(40));
        let other = format!("{}x", long);

        let a = CacheKey::of(long.as_str());
        let b = CacheKey::of(other.as_str());

        assert_eq!(a.as_str().len(), MAX_KEY_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        // Same prefix, different digest suffix
        assert_ne!(a, b);
    }

    #[test]
    fn test_hint_keeps_plain_text() {
        let key = CacheKey::of("https://pokeapi.co/api/v2/pokemon/25");
        assert!(key.hint().contains("pokemon"));

        let raw = CacheKey::raw("tcg-prices-base1");
        assert_eq!(raw.as_str(), "tcg-prices-base1");
        assert_eq!(raw.hint(), "tcg-prices-base1");
    }
}
