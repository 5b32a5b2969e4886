//! The in-flight record and the path handle used to address one of its fields.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::batch::BatchHandle;

/// A field value. Mirrors the scalar/map union the wire format allows;
/// anything else is rejected on write (see [`Field::set`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A UTF-8 string.
    String(String),
    /// A signed 64-bit integer.
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A nested mapping of further values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the nested map if this value is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// The in-flight datum: a nested keyed structure plus an optional back
/// reference to the batch it belongs to.
///
/// An event is owned by exactly one in-flight worker at a time and is
/// transferred across channels; the only cross-task mutable state it
/// carries is `finished_outputs`, an atomic counter bumped by every
/// output deliverer that finishes with it.
#[derive(Debug, Clone)]
pub struct Event {
    fields: BTreeMap<String, Value>,
    batch: Option<Arc<BatchHandle>>,
    finished_outputs: Arc<AtomicU32>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Builds an empty event with no batch attached.
    pub fn new() -> Self {
        Event {
            fields: BTreeMap::new(),
            batch: None,
            finished_outputs: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Returns a path handle into this event. Building the handle never
    /// mutates the event; the path is not validated against the current
    /// tree until a `get`/`set`/`default`/`delete` call is made through it.
    pub fn field(&self, path: &[&str]) -> Field {
        Field {
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Convenience for a single top-level key; equivalent to `field(&[name])`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.field(&[name]).set(self, value.into());
    }

    /// Convenience accessor mirroring [`Event::set`].
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field(&[name]).get(self)
    }

    /// The batch this event is tracked under, if end-to-end acknowledgement
    /// is enabled for its originating send.
    pub fn batch(&self) -> Option<&Arc<BatchHandle>> {
        self.batch.as_ref()
    }

    /// Attaches a batch handle. Called once, by the sender, when a batch
    /// of events is created; synthetic events injected by filters are never
    /// given one (see `SPEC_FULL.md` section 9).
    pub(crate) fn attach_batch(&mut self, batch: Arc<BatchHandle>) {
        self.batch = Some(batch);
    }

    /// The number of outputs that have finished delivering this event so far.
    pub fn finished_outputs(&self) -> u32 {
        self.finished_outputs.load(Ordering::SeqCst)
    }

    /// Bumps the finished-output counter. Called once per output deliverer.
    pub(crate) fn mark_output_finished(&self) -> u32 {
        self.finished_outputs.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Depth-first, sorted-key traversal of every leaf field, used by codecs
    /// (e.g. key/value) that require deterministic output ordering.
    pub fn leaves(&self) -> Vec<(Vec<String>, &Value)> {
        let mut out = Vec::new();
        Self::leaves_into(&self.fields, &mut Vec::new(), &mut out);
        out
    }

    fn leaves_into<'a>(
        level: &'a BTreeMap<String, Value>,
        prefix: &mut Vec<String>,
        out: &mut Vec<(Vec<String>, &'a Value)>,
    ) {
        for (k, v) in level {
            prefix.push(k.clone());
            match v {
                Value::Map(inner) => Self::leaves_into(inner, prefix, out),
                scalar => out.push((prefix.clone(), scalar)),
            }
            prefix.pop();
        }
    }

    /// Merges `template`'s fields into `self` using default-semantics: a
    /// field already present in `self` is left untouched. Used by the
    /// extractor to apply an input's template event to decoded events.
    pub fn merge_defaults(&mut self, template: &Event) {
        for (path, value) in template.leaves() {
            let path_refs: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
            self.field(&path_refs).default(self, value.clone());
        }
    }
}

/// A path handle over an event: not owned by the event, and many may
/// coexist. Mirrors the original implementation's `Field` (path + event
/// reference); in Rust the event reference is passed explicitly to each
/// accessor rather than stored, to keep `Field` free of a borrow-checker
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    path: Vec<String>,
}

impl Field {
    /// Builds a path handle directly, without going through [`Event::field`].
    pub fn new(path: Vec<String>) -> Self {
        Field { path }
    }

    /// The path components this handle addresses.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Reads the current value at this path, or `None` if any component is
    /// absent.
    pub fn get<'e>(&self, event: &'e Event) -> Option<&'e Value> {
        let (last, init) = self.path.split_last()?;
        let mut level = &event.fields;
        for key in init {
            level = level.get(key)?.as_map()?;
        }
        level.get(last)
    }

    /// Writes unconditionally, autovivifying intermediate maps and
    /// replacing any intermediate value that isn't already a map (with a
    /// warning, per the data-model invariants).
    pub fn set(&self, event: &mut Event, value: Value) {
        let _ = self.write(event, value, true);
    }

    /// Writes only if the leaf is currently absent; a no-op otherwise.
    pub fn default(&self, event: &mut Event, value: Value) {
        let _ = self.write(event, value, false);
    }

    /// Deletes the leaf at this path, returning its previous value if any.
    pub fn delete(&self, event: &mut Event) -> Option<Value> {
        let (last, init) = self.path.split_last()?;
        let mut level = &mut event.fields;
        for key in init {
            level = level
                .entry(key.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()))
                .as_map_mut()?;
        }
        level.remove(last)
    }

    fn write(&self, event: &mut Event, value: Value, overwrite: bool) -> Result<(), &'static str> {
        let (last, init) = self.path.split_last().ok_or("cannot traverse empty path")?;

        match &value {
            Value::String(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_) => {}
            Value::Map(_) => return Err("only scalar values may be written through a field"),
        }

        let mut level = &mut event.fields;
        for (depth, key) in init.iter().enumerate() {
            let needs_replace = matches!(level.get(key), Some(v) if v.as_map().is_none());
            if needs_replace {
                warn!(
                    path = self.path[..=depth].join("."),
                    "implicitly overwriting non-map value with a nested map"
                );
                level.insert(key.clone(), Value::Map(BTreeMap::new()));
            }
            level = level
                .entry(key.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()))
                .as_map_mut()
                .expect("just inserted a map");
        }

        if level.contains_key(last) && !overwrite {
            return Ok(());
        }
        if level.contains_key(last) && overwrite && level.get(last).unwrap().as_map().is_some() {
            warn!(
                path = self.path.join("."),
                "implicitly replacing a nested map with a scalar"
            );
        }
        level.insert(last.clone(), value);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut e = Event::new();
        let f = e.field(&["message"]);
        f.set(&mut e, Value::String("hello".into()));
        assert_eq!(f.get(&e), Some(&Value::String("hello".into())));
    }

    #[test]
    fn default_does_not_overwrite() {
        let mut e = Event::new();
        let f = e.field(&["count"]);
        f.set(&mut e, Value::Int(1));
        f.default(&mut e, Value::Int(99));
        assert_eq!(f.get(&e), Some(&Value::Int(1)));
    }

    #[test]
    fn default_writes_when_absent() {
        let mut e = Event::new();
        let f = e.field(&["count"]);
        f.default(&mut e, Value::Int(5));
        assert_eq!(f.get(&e), Some(&Value::Int(5)));
    }

    #[test]
    fn autovivifies_intermediate_maps() {
        let mut e = Event::new();
        e.field(&["event", "ingested"]).set(&mut e, Value::String("now".into()));
        assert_eq!(
            e.field(&["event", "ingested"]).get(&e),
            Some(&Value::String("now".into()))
        );
    }

    #[test]
    fn dotted_key_is_literal() {
        let mut e = Event::new();
        e.field(&["a.b"]).set(&mut e, Value::Int(1));
        assert_eq!(e.field(&["a.b"]).get(&e), Some(&Value::Int(1)));
        assert_eq!(e.field(&["a"]).get(&e), None);
    }

    #[test]
    fn delete_removes_leaf() {
        let mut e = Event::new();
        e.field(&["x"]).set(&mut e, Value::Bool(true));
        assert_eq!(e.field(&["x"]).delete(&mut e), Some(Value::Bool(true)));
        assert_eq!(e.field(&["x"]).get(&e), None);
    }

    #[test]
    fn merge_defaults_fills_missing_only() {
        let mut template = Event::new();
        template.set("host", "server1");
        template.set("env", "prod");

        let mut e = Event::new();
        e.set("host", "actual-host");
        e.merge_defaults(&template);

        assert_eq!(e.get("host"), Some(&Value::String("actual-host".into())));
        assert_eq!(e.get("env"), Some(&Value::String("prod".into())));
    }
}
