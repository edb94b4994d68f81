//! Shape dictionaries for the stateful MsgPack codec.
//!
//! A *shape* is the ordered key list of a map whose keys are all strings,
//! which is what every struct looks like after `to_vec_named`. The sender
//! numbers each shape the first time it sees it and rewrites the map as
//!
//! ```text
//! [ ext(SHAPE_EXT_TYPE, id as u32 BE), value_0, value_1, ... ]
//! ```
//!
//! Newly numbered shapes are collected so the codec can ship them to the
//! peer in the STATE segment ahead of the data that uses them.
//!
//! A user array whose first item is itself a marker ext is prefixed with
//! `ext(ESCAPE_EXT_TYPE)` so the receiver never mistakes it for a shape.

use std::collections::HashMap;

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};

/// MsgPack ext type marking a compacted map.
pub(crate) const SHAPE_EXT_TYPE: i8 = 0x53;

/// MsgPack ext type marking an array that is literal data.
pub(crate) const ESCAPE_EXT_TYPE: i8 = 0x54;

/// One dictionary entry as carried in a STATE segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ShapeEntry {
    pub id: u32,
    pub keys: Vec<String>,
}

/// Sender side: assigns ids to shapes and compacts value trees.
#[derive(Debug, Default)]
pub(crate) struct OutboundShapes {
    ids: HashMap<Vec<String>, u32>,
    next_id: u32,
}

impl OutboundShapes {
    /// Replace every string-keyed map in `value` by its compact form.
    ///
    /// Shapes seen for the first time are appended to `fresh`.
    pub fn compact(&mut self, value: Value, fresh: &mut Vec<ShapeEntry>) -> Value {
        match value {
            Value::Map(entries) => match string_keys(&entries) {
                Some(keys) => {
                    let id = self.id_for(keys, fresh);
                    let mut items = Vec::with_capacity(entries.len() + 1);
                    items.push(Value::Ext(SHAPE_EXT_TYPE, id.to_be_bytes().to_vec()));
                    for (_, v) in entries {
                        items.push(self.compact(v, fresh));
                    }
                    Value::Array(items)
                }
                None => Value::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| (self.compact(k, fresh), self.compact(v, fresh)))
                        .collect(),
                ),
            },
            Value::Array(items) => {
                let escape = is_marker(items.first());
                let mut out = Vec::with_capacity(items.len() + usize::from(escape));
                if escape {
                    out.push(Value::Ext(ESCAPE_EXT_TYPE, Vec::new()));
                }
                out.extend(items.into_iter().map(|v| self.compact(v, fresh)));
                Value::Array(out)
            }
            other => other,
        }
    }

    fn id_for(&mut self, keys: Vec<String>, fresh: &mut Vec<ShapeEntry>) -> u32 {
        if let Some(&id) = self.ids.get(&keys) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        fresh.push(ShapeEntry {
            id,
            keys: keys.clone(),
        });
        self.ids.insert(keys, id);
        id
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.next_id = 0;
    }
}

/// Receiver side: learns shapes from STATE segments and expands trees.
#[derive(Debug, Default)]
pub(crate) struct InboundShapes {
    keys: HashMap<u32, Vec<String>>,
}

impl InboundShapes {
    pub fn learn(&mut self, entries: Vec<ShapeEntry>) {
        for entry in entries {
            self.keys.insert(entry.id, entry.keys);
        }
    }

    /// Undo [`OutboundShapes::compact`].
    pub fn expand(&self, value: Value) -> Result<Value> {
        match value {
            Value::Array(mut items) if is_escape(items.first()) => {
                items.remove(0);
                self.expand_items(items).map(Value::Array)
            }
            Value::Array(items) => match shape_ref(&items)? {
                Some(id) => {
                    let keys = self.keys.get(&id).ok_or(WireError::UnknownShape(id))?;
                    if keys.len() != items.len() - 1 {
                        return Err(WireError::Protocol(format!(
                            "shape {} has {} keys but {} values arrived",
                            id,
                            keys.len(),
                            items.len() - 1
                        )));
                    }
                    let mut entries = Vec::with_capacity(keys.len());
                    for (key, v) in keys.iter().zip(items.into_iter().skip(1)) {
                        entries.push((Value::from(key.as_str()), self.expand(v)?));
                    }
                    Ok(Value::Map(entries))
                }
                None => self.expand_items(items).map(Value::Array),
            },
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((self.expand(k)?, self.expand(v)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Map),
            other => Ok(other),
        }
    }

    fn expand_items(&self, items: Vec<Value>) -> Result<Vec<Value>> {
        items.into_iter().map(|v| self.expand(v)).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Keys of a non-empty map whose keys are all valid UTF-8 strings.
fn string_keys(entries: &[(Value, Value)]) -> Option<Vec<String>> {
    if entries.is_empty() {
        return None;
    }
    entries
        .iter()
        .map(|(k, _)| k.as_str().map(str::to_owned))
        .collect()
}

fn is_marker(item: Option<&Value>) -> bool {
    matches!(
        item,
        Some(Value::Ext(SHAPE_EXT_TYPE | ESCAPE_EXT_TYPE, _))
    )
}

fn is_escape(item: Option<&Value>) -> bool {
    matches!(item, Some(Value::Ext(ESCAPE_EXT_TYPE, _)))
}

/// Shape id if `items` is a compacted map.
fn shape_ref(items: &[Value]) -> Result<Option<u32>> {
    match items.first() {
        Some(Value::Ext(SHAPE_EXT_TYPE, data)) => {
            let raw: [u8; 4] = data.as_slice().try_into().map_err(|_| {
                WireError::Protocol(format!("shape reference of {} bytes", data.len()))
            })?;
            Ok(Some(u32::from_be_bytes(raw)))
        }
        _ => Ok(None),
    }
}
