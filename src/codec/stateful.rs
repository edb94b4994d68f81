//! Default stateful codec: MessagePack plus a shape dictionary.
//!
//! Each encode serializes the value with [`MsgPackCodec`], factors the field
//! names of every struct out into numbered shapes, and emits a STATE segment
//! only when the value used shapes the peer has not been told about yet.

use std::marker::PhantomData;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::shape::{InboundShapes, OutboundShapes, ShapeEntry};
use super::{DataStatePair, MessageType, MsgPackCodec, Slice, StatefulCodec};
use crate::error::{Result, WireError};

/// Stateful MessagePack codec.
///
/// The outbound and inbound dictionaries are independent: one tracks what
/// this side has told the peer, the other what the peer has told this side.
pub struct DefaultStatefulCodec<T> {
    outbound: Mutex<OutboundShapes>,
    inbound: Mutex<InboundShapes>,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> DefaultStatefulCodec<T> {
    pub fn new() -> Self {
        Self {
            outbound: Mutex::new(OutboundShapes::default()),
            inbound: Mutex::new(InboundShapes::default()),
            _phantom: PhantomData,
        }
    }

    /// Number of shapes already described to the peer.
    pub fn shapes_sent(&self) -> usize {
        self.outbound.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Number of shapes learned from the peer.
    pub fn shapes_received(&self) -> usize {
        self.inbound.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<T> Default for DefaultStatefulCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StatefulCodec<T> for DefaultStatefulCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<DataStatePair> {
        let tree = MsgPackCodec::to_tree(value)?;

        let mut fresh: Vec<ShapeEntry> = Vec::new();
        let compact = {
            let mut outbound = self.outbound.lock().map_err(|_| poisoned())?;
            outbound.compact(tree, &mut fresh)
        };

        let encoded = encode_segments(&compact, &fresh);
        if encoded.is_err() && !fresh.is_empty() {
            self.discard_outbound_state();
        }
        encoded
    }

    fn decode(&self, pair: DataStatePair) -> Result<T> {
        expect_tag(&pair.data, MessageType::Data)?;

        let mut inbound = self.inbound.lock().map_err(|_| poisoned())?;
        if let Some(state) = &pair.state {
            expect_tag(state, MessageType::State)?;
            let entries: Vec<ShapeEntry> = MsgPackCodec::decode(state.payload())?;
            inbound.learn(entries);
        }

        let compact = MsgPackCodec::read_tree(pair.data.payload())?;
        let tree = inbound.expand(compact)?;
        drop(inbound);

        MsgPackCodec::from_tree(&tree)
    }

    fn reset_state(&self) {
        self.discard_outbound_state();
        if let Ok(mut inbound) = self.inbound.lock() {
            inbound.clear();
        }
    }

    fn discard_outbound_state(&self) {
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.clear();
        }
    }
}

fn encode_segments(compact: &rmpv::Value, fresh: &[ShapeEntry]) -> Result<DataStatePair> {
    let data = Slice::tagged(MessageType::Data.as_byte(), &MsgPackCodec::write_tree(compact)?);
    let state = if fresh.is_empty() {
        None
    } else {
        Some(Slice::tagged(
            MessageType::State.as_byte(),
            &MsgPackCodec::encode(fresh)?,
        ))
    };
    Ok(DataStatePair::new(data, state))
}

fn expect_tag(slice: &Slice, expected: MessageType) -> Result<()> {
    match slice.tag() {
        Some(tag) if tag == expected.as_byte() => Ok(()),
        other => Err(WireError::Protocol(format!(
            "expected {:?} segment, got tag {:?}",
            expected, other
        ))),
    }
}

fn poisoned() -> WireError {
    WireError::Protocol("codec dictionary lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Order {
        id: u32,
        item: String,
        lines: Vec<Line>,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Line {
        sku: String,
        qty: u16,
    }

    fn order(id: u32) -> Order {
        Order {
            id,
            item: format!("order-{}", id),
            lines: vec![
                Line {
                    sku: "a".to_string(),
                    qty: 1,
                },
                Line {
                    sku: "b".to_string(),
                    qty: 2,
                },
            ],
        }
    }

    #[test]
    fn test_round_trip_across_repeated_calls() {
        let sender = DefaultStatefulCodec::<Order>::new();
        let receiver = DefaultStatefulCodec::<Order>::new();

        for id in 0..5 {
            let pair = sender.encode(&order(id)).unwrap();
            assert_eq!(receiver.decode(pair).unwrap(), order(id));
        }
    }

    #[test]
    fn test_state_only_for_new_shapes() {
        let codec = DefaultStatefulCodec::<Order>::new();

        let first = codec.encode(&order(1)).unwrap();
        let second = codec.encode(&order(2)).unwrap();
        let third = codec.encode(&order(3)).unwrap();

        assert!(first.state.is_some());
        assert!(second.state.is_none());
        assert!(third.state.is_none());
        assert_eq!(codec.shapes_sent(), 2);
    }

    #[test]
    fn test_segments_are_tagged() {
        let codec = DefaultStatefulCodec::<Order>::new();
        let pair = codec.encode(&order(1)).unwrap();

        assert_eq!(pair.data.tag(), Some(MessageType::Data.as_byte()));
        assert_eq!(
            pair.state.as_ref().and_then(Slice::tag),
            Some(MessageType::State.as_byte())
        );
    }

    #[test]
    fn test_decode_without_state_needs_primed_peer() {
        let sender = DefaultStatefulCodec::<Order>::new();
        let receiver = DefaultStatefulCodec::<Order>::new();

        let first = sender.encode(&order(1)).unwrap();
        let second = sender.encode(&order(2)).unwrap();

        // Second pair alone references shapes the receiver never saw.
        assert!(matches!(
            receiver.decode(second.clone()),
            Err(WireError::UnknownShape(_))
        ));

        receiver.decode(first).unwrap();
        assert_eq!(receiver.decode(second).unwrap(), order(2));
    }

    #[test]
    fn test_reset_state_resends_shapes() {
        let codec = DefaultStatefulCodec::<Order>::new();
        codec.encode(&order(1)).unwrap();
        codec.reset_state();

        let pair = codec.encode(&order(2)).unwrap();
        assert!(pair.state.is_some());
    }

    #[test]
    fn test_discarded_outbound_state_is_sent_again() {
        let sender = DefaultStatefulCodec::<Order>::new();
        let receiver = DefaultStatefulCodec::<Order>::new();

        // Lost in transit.
        let _lost = sender.encode(&order(1)).unwrap();
        sender.discard_outbound_state();

        let pair = sender.encode(&order(2)).unwrap();
        assert!(pair.state.is_some());
        assert_eq!(receiver.decode(pair).unwrap(), order(2));
    }

    #[test]
    fn test_discard_keeps_inbound_shapes() {
        let peer = DefaultStatefulCodec::<Order>::new();
        let codec = DefaultStatefulCodec::<Order>::new();

        codec.decode(peer.encode(&order(1)).unwrap()).unwrap();
        codec.discard_outbound_state();

        assert_eq!(codec.shapes_received(), 2);
        assert_eq!(codec.decode(peer.encode(&order(2)).unwrap()).unwrap(), order(2));
    }

    #[test]
    fn test_values_shaped_like_references_round_trip() {
        use rmpv::Value;

        let sender = DefaultStatefulCodec::<Vec<Value>>::new();
        let receiver = DefaultStatefulCodec::<Vec<Value>>::new();

        let args = vec![
            Value::Array(vec![Value::Ext(0x53, vec![0, 0, 0, 7]), Value::from(1)]),
            Value::Array(vec![Value::Ext(0x54, Vec::new()), Value::from("x")]),
        ];

        let pair = sender.encode(&args).unwrap();
        assert_eq!(receiver.decode(pair).unwrap(), args);
    }

    #[test]
    fn test_scalars_need_no_state() {
        let codec = DefaultStatefulCodec::<Vec<i64>>::new();
        let pair = codec.encode(&vec![1, -2, 3]).unwrap();
        assert!(pair.state.is_none());
        assert_eq!(codec.decode(pair).unwrap(), vec![1, -2, 3]);
    }

    #[test]
    fn test_wrong_data_tag_rejected() {
        let codec = DefaultStatefulCodec::<Vec<i64>>::new();
        let pair = DataStatePair::new(Slice::tagged(MessageType::State.as_byte(), &[0x90]), None);
        assert!(matches!(codec.decode(pair), Err(WireError::Protocol(_))));
    }
}
