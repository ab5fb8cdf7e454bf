//! Deterministic cache keys for function calls.
//!
//! Arguments are converted to JSON and written in a canonical form (object
//! keys sorted at every depth), then hashed with SHA-256. Named arguments
//! therefore produce the same key whatever order they were supplied in.

use crate::utils::sha256_hex;
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for `namespace` (the function identity) called with `args`.
    pub fn for_call<A: Serialize + ?Sized>(namespace: &str, args: &A) -> Result<Self> {
        let value = serde_json::to_value(args)?;
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);
        Ok(Self(format!(
            "{}:{}",
            namespace,
            sha256_hex(canonical.as_bytes())
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(k: CacheKey) -> Self {
        k.0
    }
}

/// Positional and named arguments of a call, for building keys by hand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallArgs {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.args.push(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn named<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.kwargs.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn key(&self, namespace: &str) -> Result<CacheKey> {
        CacheKey::for_call(namespace, self)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in fields.into_iter().enumerate() {
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
    use std::collections::HashMap;

    #[test]
    fn test_named_argument_order_is_irrelevant() {
        let a = CallArgs::new()
            .arg("sunset").unwrap()
            .named("width", &1024).unwrap()
            .named("model", "flux").unwrap();
        let b = CallArgs::new()
            .arg("sunset").unwrap()
            .named("model", "flux").unwrap()
            .named("width", &1024).unwrap();
        assert_eq!(a.key("image.generate").unwrap(), b.key("image.generate").unwrap());
    }

    #[test]
    fn test_nested_maps_are_canonical() {
        let mut m1 = HashMap::new();
        let mut m2 = HashMap::new();
        for i in 0..32 {
            m1.insert(format!("k{}", i), i);
        }
        for i in (0..32).rev() {
            m2.insert(format!("k{}", i), i);
        }
        assert_eq!(
            CacheKey::for_call("f", &("x", &m1)).unwrap(),
            CacheKey::for_call("f", &("x", &m2)).unwrap()
        );
    }

    #[test]
    fn test_distinct_inputs_distinct_keys() {
        let k1 = CacheKey::for_call("text.generate", &("hello", 0.7)).unwrap();
        let k2 = CacheKey::for_call("text.generate", &("hello", 0.8)).unwrap();
        let k3 = CacheKey::for_call("image.generate", &("hello", 0.7)).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert!(k1.as_str().starts_with("text.generate:"));
    }

    #[test]
    fn test_positional_order_matters() {
        let k1 = CacheKey::for_call("f", &(1, 2)).unwrap();
        let k2 = CacheKey::for_call("f", &(2, 1)).unwrap();
        assert_ne!(k1, k2);
    }
}
