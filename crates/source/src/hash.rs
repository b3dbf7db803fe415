//! Content hashing for change detection.
//!
//! Payloads are reduced to a canonical JSON encoding (object keys sorted,
//! directory multi-values sorted and de-duplicated, volatile bookkeeping
//! fields removed) and hashed with BLAKE3. The first eight bytes of the
//! digest, read little-endian, form the stored 64-bit hash.

use serde_json::Value;
use sorsync_config::SorConfig;
use std::collections::{BTreeMap, BTreeSet};

/// Fields that change without the entry's meaningful content changing.
pub const DEFAULT_VOLATILE_FIELDS: [&str; 5] =
    ["modifyTimestamp", "createTimestamp", "modifiersName", "creatorsName", "entryCSN"];

#[derive(Debug, Clone)]
pub struct ContentHasher {
    volatile: BTreeSet<String>,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl ContentHasher {
    /// Hasher excluding the default volatile fields plus `extra`.
    pub fn new(extra: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let volatile = DEFAULT_VOLATILE_FIELDS
            .iter()
            .map(|f| f.to_ascii_lowercase())
            .chain(extra.into_iter().map(|f| f.as_ref().to_ascii_lowercase()))
            .collect();
        Self { volatile }
    }

    pub fn for_sor(sor: &SorConfig) -> Self {
        Self::new(&sor.volatile_fields)
    }

    pub fn is_volatile(&self, field: &str) -> bool {
        self.volatile.contains(&field.to_ascii_lowercase())
    }

    /// Hash a structured payload. Volatile fields are dropped at every depth.
    pub fn hash_json(&self, value: &Value) -> i64 {
        let mut canonical = String::new();
        self.write_canonical(value, &mut canonical);
        digest(&canonical)
    }

    /// Hash a directory entry's attributes.
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, Vec<String>>) -> i64 {
        let value = attributes
            .iter()
            .map(|(name, values)| {
                let unique: BTreeSet<&String> = values.iter().collect();
                (name.clone(), Value::Array(unique.into_iter().map(|v| Value::String(v.clone())).collect()))
            })
            .collect::<serde_json::Map<_, _>>();
        self.hash_json(&Value::Object(value))
    }

    fn write_canonical(&self, value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut fields: Vec<(&String, &Value)> = map.iter().filter(|(k, _)| !self.is_volatile(k)).collect();
                fields.sort_by(|a, b| a.0.cmp(b.0));
                out.push('{');
                for (i, (key, value)) in fields.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    self.write_canonical(value, out);
                }
                out.push('}');
            },
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_canonical(item, out);
                }
                out.push(']');
            },
            scalar => out.push_str(&scalar.to_string()),
        }
    }
}

fn digest(canonical: &str) -> i64 {
    let digest = blake3::hash(canonical.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_le_bytes(head)
}
