//! Bidirectional bytes ↔ event transformation.
//!
//! Grounded on `original_source/codec/{json,kv,plain}.go`: a codec is a pure
//! function pair, `decode` turning one frame's bytes into an event and
//! `encode` the reverse, with no goroutine or channel of its own (unlike
//! [`crate::framing::Framing`], which does own a pump). The teacher's own
//! `decode`/`compression` processors operate on `Message.bytes` as an
//! ordinary pipeline stage; the specification instead keeps codecs at the
//! extractor boundary (section 4.3), which is the shape used here.

use std::collections::BTreeMap;

use crate::event::{Event, Value};
use crate::Error;

/// A bidirectional bytes ↔ event transformation. Implementations that claim
/// round-trip support must satisfy `decode(encode(e)) == e` modulo
/// deterministic key ordering; those that cannot must fail `encode`
/// explicitly rather than silently losing data.
pub trait Codec: Send + Sync {
    /// Decodes one frame of bytes into an event.
    fn decode(&self, frame: &[u8]) -> Result<Event, Error>;

    /// Encodes an event back into bytes. Codecs that cannot losslessly
    /// represent every event (e.g. an auto-detecting codec) must return
    /// [`Error::ProcessingError`] rather than guess.
    fn encode(&self, event: &Event) -> Result<Vec<u8>, Error>;
}

/// The whole frame becomes a single string field named `message`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl Codec for PlainCodec {
    fn decode(&self, frame: &[u8]) -> Result<Event, Error> {
        let text = String::from_utf8_lossy(frame).into_owned();
        let mut event = Event::new();
        event.set("message", text);
        Ok(event)
    }

    fn encode(&self, event: &Event) -> Result<Vec<u8>, Error> {
        let text = match event.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => format!("{other:?}"),
            None => String::new(),
        };
        Ok(text.into_bytes())
    }
}

/// Structured-object codec: the frame is a JSON object, decoded key-for-key
/// into the event's top-level fields (recursively for nested objects).
/// Round-trip capable.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    fn json_to_value(v: serde_json::Value) -> Result<Value, Error> {
        match v {
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    Ok(Value::Float(n.as_f64().unwrap_or_default()))
                }
            }
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, Self::json_to_value(v)?);
                }
                Ok(Value::Map(out))
            }
            serde_json::Value::Null => Ok(Value::String(String::new())),
            serde_json::Value::Array(_) => {
                Err(Error::ProcessingError("json codec does not support arrays".into()))
            }
        }
    }

    fn value_to_json(v: &Value) -> serde_json::Value {
        match v {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), Self::value_to_json(v));
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

impl Codec for JsonCodec {
    fn decode(&self, frame: &[u8]) -> Result<Event, Error> {
        let parsed: serde_json::Value = serde_json::from_slice(frame)?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(Error::ProcessingError(
                "json codec requires a top-level object".into(),
            ));
        };
        let mut event = Event::new();
        for (k, v) in map {
            event.set(&k, Self::json_to_value(v)?);
        }
        Ok(event)
    }

    fn encode(&self, event: &Event) -> Result<Vec<u8>, Error> {
        let mut obj = serde_json::Map::new();
        for (path, value) in event.leaves() {
            // flat json encoding; nested paths are joined back up via the
            // event's own map structure rather than re-nested here, since
            // `leaves()` already walked depth-first.
            insert_path(&mut obj, &path, Self::value_to_json(value));
        }
        Ok(serde_json::to_vec(&serde_json::Value::Object(obj))?)
    }
}

fn insert_path(obj: &mut serde_json::Map<String, serde_json::Value>, path: &[String], value: serde_json::Value) {
    if path.len() == 1 {
        obj.insert(path[0].clone(), value);
        return;
    }
    let entry = obj
        .entry(path[0].clone())
        .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    if let serde_json::Value::Object(inner) = entry {
        insert_path(inner, &path[1..], value);
    }
}

/// `logfmt`-style `key=value` pairs, one per line within the frame, decoded
/// into flat top-level fields. Encoding walks the event's leaves in sorted
/// order (the event's `BTreeMap` guarantees this) so output is deterministic
/// and round-trip capable for flat events.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValueCodec;

impl Codec for KeyValueCodec {
    fn decode(&self, frame: &[u8]) -> Result<Event, Error> {
        let text = String::from_utf8_lossy(frame);
        let mut event = Event::new();
        for pair in text.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"');
            event.set(key, value);
        }
        Ok(event)
    }

    fn encode(&self, event: &Event) -> Result<Vec<u8>, Error> {
        let mut parts = Vec::new();
        for (path, value) in event.leaves() {
            let key = path.join(".");
            let value = match value {
                Value::String(s) if s.contains(' ') => format!("\"{s}\""),
                Value::String(s) => s.clone(),
                Value::Int(i) => i.to_string(),
                Value::Float(f) => f.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Map(_) => unreachable!("leaves() never yields a map"),
            };
            parts.push(format!("{key}={value}"));
        }
        Ok(parts.join(" ").into_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_round_trips_message_field() {
        let codec = PlainCodec;
        let event = codec.decode(b"hello world").unwrap();
        assert_eq!(codec.encode(&event).unwrap(), b"hello world");
    }

    #[test]
    fn json_round_trips_flat_object() {
        let codec = JsonCodec;
        let event = codec.decode(br#"{"a":1,"b":"two"}"#).unwrap();
        assert_eq!(event.get("a"), Some(&Value::Int(1)));
        let back = codec.encode(&event).unwrap();
        let event2 = codec.decode(&back).unwrap();
        assert_eq!(event2.get("a"), Some(&Value::Int(1)));
        assert_eq!(event2.get("b"), Some(&Value::String("two".into())));
    }

    #[test]
    fn json_rejects_non_object_top_level() {
        let codec = JsonCodec;
        assert!(codec.decode(b"[1,2,3]").is_err());
    }

    #[test]
    fn kv_decodes_pairs() {
        let codec = KeyValueCodec;
        let event = codec.decode(b"level=info msg=\"hello world\"").unwrap();
        assert_eq!(event.get("level"), Some(&Value::String("info".into())));
        assert_eq!(event.get("msg"), Some(&Value::String("hello world".into())));
    }

    #[test]
    fn kv_round_trips_flat_event() {
        let codec = KeyValueCodec;
        let mut event = Event::new();
        event.set("a", "1");
        event.set("b", "two words");
        let encoded = codec.encode(&event).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.get("a"), Some(&Value::String("1".into())));
        assert_eq!(decoded.get("b"), Some(&Value::String("two words".into())));
    }
}
