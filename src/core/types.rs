//! Attribute, scope and resource types shared across the pipeline.
//!
//! [`AttributeSet`] is the map key for per-attribute-set aggregation state:
//! it is immutable, sorted by key, de-duplicated (last value wins) and
//! carries a precomputed hash so lookups on the measurement path never
//! rehash the attribute list.

use rustc_hash::FxHasher;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Attribute key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Arc<str>);

impl Key {
    /// Creates a new key
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Key(key.into())
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key(Arc::from(key))
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key(Arc::from(key))
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribute value
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(Arc<str>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            // Bitwise so that equality agrees with the hash
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::I64(i) => i.hash(state),
            Value::F64(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

/// A key-value attribute pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    pub key: Key,
    pub value: Value,
}

impl KeyValue {
    /// Creates a new attribute
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An immutable, order-independent, de-duplicated set of attributes
#[derive(Clone)]
pub struct AttributeSet {
    attrs: Arc<[KeyValue]>,
    hash: u64,
}

impl AttributeSet {
    /// Builds a set from a list of attributes. Later duplicates of a key win.
    pub fn new(attrs: &[KeyValue]) -> Self {
        let mut sorted = attrs.to_vec();
        // Stable sort keeps call order among equal keys, so the last
        // occurrence of each key is the one to retain.
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let mut deduped: Vec<KeyValue> = Vec::with_capacity(sorted.len());
        for kv in sorted {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        Self::from_sorted(deduped)
    }

    fn from_sorted(attrs: Vec<KeyValue>) -> Self {
        let mut hasher = FxHasher::default();
        attrs.hash(&mut hasher);
        AttributeSet {
            attrs: attrs.into(),
            hash: hasher.finish(),
        }
    }

    /// The empty attribute set
    pub fn empty() -> Self {
        Self::from_sorted(Vec::new())
    }

    /// Number of attributes in the set
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Returns true if the set carries no attributes
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Iterates the attributes in key order
    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.attrs.iter()
    }

    /// Returns the value stored for `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|idx| &self.attrs[idx].value)
    }

    /// Returns the attributes as a slice
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.attrs
    }

    /// Splits the set into the attributes accepted by `keep` and the ones it
    /// rejected.
    pub fn split(&self, keep: impl Fn(&KeyValue) -> bool) -> (AttributeSet, Vec<KeyValue>) {
        let mut kept = Vec::with_capacity(self.attrs.len());
        let mut dropped = Vec::new();
        for kv in self.attrs.iter() {
            if keep(kv) {
                kept.push(kv.clone());
            } else {
                dropped.push(kv.clone());
            }
        }
        (Self::from_sorted(kept), dropped)
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.attrs == other.attrs
    }
}

impl Eq for AttributeSet {}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.attrs.iter().map(|kv| (kv.key.as_str(), &kv.value)))
            .finish()
    }
}

impl From<&[KeyValue]> for AttributeSet {
    fn from(attrs: &[KeyValue]) -> Self {
        AttributeSet::new(attrs)
    }
}

impl<const N: usize> From<[KeyValue; N]> for AttributeSet {
    fn from(attrs: [KeyValue; N]) -> Self {
        AttributeSet::new(&attrs)
    }
}

/// The library that produced a group of instruments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: Option<String>,
    pub schema_url: Option<String>,
    pub attributes: AttributeSet,
}

impl InstrumentationScope {
    /// Creates a scope with the given name
    pub fn new(name: impl Into<String>) -> Self {
        InstrumentationScope {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }

    pub fn with_attributes(mut self, attrs: &[KeyValue]) -> Self {
        self.attributes = AttributeSet::new(attrs);
        self
    }
}

/// The entity producing telemetry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub attributes: AttributeSet,
    pub schema_url: Option<String>,
}

impl Resource {
    /// Creates a resource from attributes
    pub fn new(attrs: &[KeyValue]) -> Self {
        Resource {
            attributes: AttributeSet::new(attrs),
            schema_url: None,
        }
    }

    /// A resource without attributes
    pub fn empty() -> Self {
        Resource {
            attributes: AttributeSet::empty(),
            schema_url: None,
        }
    }

    pub fn with_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }
}

impl Default for Resource {
    fn default() -> Self {
        Resource::new(&[
            KeyValue::new("service.name", "unknown_service"),
            KeyValue::new("telemetry.sdk.name", "meterline"),
            KeyValue::new("telemetry.sdk.language", "rust"),
            KeyValue::new("telemetry.sdk.version", env!("CARGO_PKG_VERSION")),
        ])
    }
}
