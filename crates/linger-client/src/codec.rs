//! Message body codecs.
//!
//! A [`Codec`] turns caller values into request bodies and response bodies back
//! into caller values. The client checks once, at construction, that the codec
//! accepts the configured content type; individual calls never re-check it.

use std::fmt::{self, Debug};
use std::marker::PhantomData;

use bytes::Bytes;
use mime::Mime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error raised by a codec while encoding or decoding a body.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    /// Creates a codec error from any displayable cause.
    pub fn new(cause: impl fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err)
    }
}

impl From<std::string::FromUtf8Error> for CodecError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::new(err)
    }
}

/// Encodes and decodes message bodies.
pub trait Codec: Send + Sync + 'static {
    /// The decoded message body type.
    type Item: Send + 'static;

    /// The content type sent with encoded bodies unless the client overrides it.
    fn content_type(&self) -> Mime;

    /// Whether bodies of `content_type` can be produced and read by this codec.
    fn accepts(&self, content_type: &Mime) -> bool;

    /// Encodes a value into a request body.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn encode(&self, item: &Self::Item) -> Result<Bytes, CodecError>;

    /// Decodes a response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for this codec.
    fn decode(&self, body: Bytes) -> Result<Self::Item, CodecError>;
}

/// JSON bodies via `serde_json`.
pub struct JsonCodec<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn content_type(&self) -> Mime {
        mime::APPLICATION_JSON
    }

    fn accepts(&self, content_type: &Mime) -> bool {
        content_type.subtype() == mime::JSON || content_type.suffix() == Some(mime::JSON)
    }

    fn encode(&self, item: &T) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(item)?))
    }

    fn decode(&self, body: Bytes) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(&body)?)
    }
}

/// UTF-8 text bodies.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    type Item = String;

    fn content_type(&self) -> Mime {
        mime::TEXT_PLAIN_UTF_8
    }

    fn accepts(&self, content_type: &Mime) -> bool {
        content_type.type_() == mime::TEXT
    }

    fn encode(&self, item: &String) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(item.clone()))
    }

    fn decode(&self, body: Bytes) -> Result<String, CodecError> {
        Ok(String::from_utf8(body.to_vec())?)
    }
}

/// Opaque bodies passed through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Bytes;

    fn content_type(&self) -> Mime {
        mime::APPLICATION_OCTET_STREAM
    }

    fn accepts(&self, _content_type: &Mime) -> bool {
        true
    }

    fn encode(&self, item: &Bytes) -> Result<Bytes, CodecError> {
        Ok(item.clone())
    }

    fn decode(&self, body: Bytes) -> Result<Bytes, CodecError> {
        Ok(body)
    }
}

/// A codec built from a pair of plain functions and the content type they produce.
///
/// Only bodies of the same essence type (`type/subtype`, parameters ignored) are
/// accepted.
pub struct FnCodec<T, E, D> {
    content_type: Mime,
    encode: E,
    decode: D,
    _item: PhantomData<fn() -> T>,
}

impl<T, E, D> FnCodec<T, E, D>
where
    E: Fn(&T) -> Result<Bytes, CodecError>,
    D: Fn(Bytes) -> Result<T, CodecError>,
{
    /// Creates a codec from an encode and decode function.
    pub const fn new(content_type: Mime, encode: E, decode: D) -> Self {
        Self {
            content_type,
            encode,
            decode,
            _item: PhantomData,
        }
    }
}

impl<T, E, D> Debug for FnCodec<T, E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCodec")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl<T, E, D> Codec for FnCodec<T, E, D>
where
    T: Send + 'static,
    E: Fn(&T) -> Result<Bytes, CodecError> + Send + Sync + 'static,
    D: Fn(Bytes) -> Result<T, CodecError> + Send + Sync + 'static,
{
    type Item = T;

    fn content_type(&self) -> Mime {
        self.content_type.clone()
    }

    fn accepts(&self, content_type: &Mime) -> bool {
        content_type.essence_str() == self.content_type.essence_str()
    }

    fn encode(&self, item: &T) -> Result<Bytes, CodecError> {
        (self.encode)(item)
    }

    fn decode(&self, body: Bytes) -> Result<T, CodecError> {
        (self.decode)(body)
    }
}
