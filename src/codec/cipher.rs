//! Encrypting decorator for stateful codecs.
//!
//! Each segment keeps its leading tag byte in the clear so the receive path
//! can classify frames before decryption; only the payload after the tag is
//! sealed. Sealing uses anonymous sealed boxes (X25519 + XSalsa20-Poly1305):
//! the sender needs only the peer's public key, the receiver its own secret
//! key, and any tampering or key mismatch fails authentication.
//!
//! # Example
//!
//! ```
//! use statewire::codec::{CipherCodec, DefaultStatefulCodec, SecretKey, StatefulCodec};
//! use crypto_box::aead::OsRng;
//!
//! let server_key = SecretKey::generate(&mut OsRng);
//!
//! // Client side only encrypts, server side only decrypts.
//! let client = CipherCodec::new(DefaultStatefulCodec::<String>::new(), Some(server_key.public_key()), None);
//! let server = CipherCodec::new(DefaultStatefulCodec::<String>::new(), None, Some(server_key));
//!
//! let pair = client.encode(&"secret".to_string()).unwrap();
//! assert_eq!(server.decode(pair).unwrap(), "secret");
//! ```

use std::marker::PhantomData;

use bytes::BytesMut;
use crypto_box::aead::OsRng;

pub use crypto_box::{PublicKey, SecretKey};

use super::{DataStatePair, Slice, StatefulCodec};
use crate::error::{Result, WireError};

/// Bytes a sealed box adds to its plaintext (ephemeral public key + tag).
pub const SEAL_OVERHEAD: usize = 32 + 16;

/// Codec decorator encrypting outbound and decrypting inbound segments.
///
/// Either key may be absent, in which case that direction passes segments
/// through untouched.
pub struct CipherCodec<C, T> {
    codec: C,
    encryption: Option<PublicKey>,
    decryption: Option<SecretKey>,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<C, T> CipherCodec<C, T>
where
    C: StatefulCodec<T>,
{
    pub fn new(codec: C, encryption: Option<PublicKey>, decryption: Option<SecretKey>) -> Self {
        Self {
            codec,
            encryption,
            decryption,
            _phantom: PhantomData,
        }
    }

    /// The wrapped codec.
    pub fn inner(&self) -> &C {
        &self.codec
    }
}

impl<C, T> StatefulCodec<T> for CipherCodec<C, T>
where
    C: StatefulCodec<T>,
{
    fn encode(&self, value: &T) -> Result<DataStatePair> {
        let mut pair = self.codec.encode(value)?;
        if let Some(key) = &self.encryption {
            pair.data = seal_slice(key, &pair.data)?;
            if let Some(state) = pair.state.take() {
                pair.state = Some(seal_slice(key, &state)?);
            }
        }
        Ok(pair)
    }

    fn decode(&self, mut pair: DataStatePair) -> Result<T> {
        if let Some(key) = &self.decryption {
            pair.data = open_slice(key, &pair.data)?;
            if let Some(state) = pair.state.take() {
                pair.state = Some(open_slice(key, &state)?);
            }
        }
        self.codec.decode(pair)
    }

    fn reset_state(&self) {
        self.codec.reset_state();
    }

    fn discard_outbound_state(&self) {
        self.codec.discard_outbound_state();
    }
}

/// Encrypt the payload of a segment, keeping its tag byte.
pub(crate) fn seal_slice(key: &PublicKey, slice: &Slice) -> Result<Slice> {
    let tag = slice.tag().ok_or_else(empty_segment)?;
    let sealed = key
        .seal(&mut OsRng, slice.payload())
        .map_err(|e| WireError::Cipher(format!("seal failed: {}", e)))?;

    let mut buf = BytesMut::with_capacity(1 + slice.payload().len() + SEAL_OVERHEAD);
    buf.extend_from_slice(&[tag]);
    buf.extend_from_slice(&sealed);
    Ok(Slice::whole(buf.freeze()))
}

/// Decrypt the payload of a segment, keeping its tag byte.
pub(crate) fn open_slice(key: &SecretKey, slice: &Slice) -> Result<Slice> {
    let tag = slice.tag().ok_or_else(empty_segment)?;
    if slice.payload().len() < SEAL_OVERHEAD {
        return Err(WireError::Cipher(format!(
            "sealed payload of {} bytes is shorter than the {} byte overhead",
            slice.payload().len(),
            SEAL_OVERHEAD
        )));
    }
    let opened = key
        .unseal(slice.payload())
        .map_err(|e| WireError::Cipher(format!("integrity check failed: {}", e)))?;

    Ok(Slice::tagged(tag, &opened))
}

fn empty_segment() -> WireError {
    WireError::Cipher("cannot transform an empty segment".to_string())
}
