//! Coders: byte-level encodings of envelope values and windows.
//!
//! A `CoderSpec` is an instantiated coder tree. Model coders (bytes, strings,
//! varints, KV, iterables, length prefixes) have one fixed layout that every
//! runtime agrees on. `Serde` coders are runtime-specific: they encode an
//! `Element` through a serde format and are opaque to anything that does not
//! share the format, which is why the resolver length-prefixes them.

use crate::envelope::{Element, Envelope, PaneInfo, PaneTiming, Timestamp, Window};
use std::fmt;

/// Well-known coder URNs used in pipeline component tables.
pub mod urn {
    pub const BYTES: &str = "xylem:coder:bytes:v1";
    pub const STRING_UTF8: &str = "xylem:coder:string_utf8:v1";
    pub const VARINT: &str = "xylem:coder:varint:v1";
    pub const DOUBLE: &str = "xylem:coder:double:v1";
    pub const BOOL: &str = "xylem:coder:bool:v1";
    pub const KV: &str = "xylem:coder:kv:v1";
    pub const ITERABLE: &str = "xylem:coder:iterable:v1";
    pub const LENGTH_PREFIX: &str = "xylem:coder:length_prefix:v1";
    pub const GLOBAL_WINDOW: &str = "xylem:coder:global_window:v1";
    pub const INTERVAL_WINDOW: &str = "xylem:coder:interval_window:v1";
    /// Runtime-specific coder; the payload names the serde format.
    pub const SERDE: &str = "xylem:coder:serde:v1";

    /// Coders whose layout is shared across runtimes.
    pub fn is_model(urn: &str) -> bool {
        matches!(
            urn,
            BYTES
                | STRING_UTF8
                | VARINT
                | DOUBLE
                | BOOL
                | KV
                | ITERABLE
                | LENGTH_PREFIX
                | GLOBAL_WINDOW
                | INTERVAL_WINDOW
        )
    }
}

/// Whether a value is the last thing in its buffer or embedded in a larger
/// structure. Nested encodings must be self-delimiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Outer,
    Nested,
}

/// Serde format used by a `Serde` coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerdeFormat {
    Json,
    Msgpack,
    Cbor,
}

impl SerdeFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(SerdeFormat::Json),
            "msgpack" | "mp" => Some(SerdeFormat::Msgpack),
            "cbor" => Some(SerdeFormat::Cbor),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SerdeFormat::Json => "json",
            SerdeFormat::Msgpack => "msgpack",
            SerdeFormat::Cbor => "cbor",
        }
    }

    fn serialize(self, value: &Element) -> Result<Vec<u8>, CoderError> {
        match self {
            SerdeFormat::Json => {
                serde_json::to_vec(value).map_err(|e| CoderError::Serde(format!("JSON: {}", e)))
            }

            #[cfg(feature = "msgpack")]
            SerdeFormat::Msgpack => rmp_serde::to_vec(value)
                .map_err(|e| CoderError::Serde(format!("MessagePack: {}", e))),

            #[cfg(feature = "cbor")]
            SerdeFormat::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(value, &mut buf)
                    .map_err(|e| CoderError::Serde(format!("CBOR: {}", e)))?;
                Ok(buf)
            }

            #[allow(unreachable_patterns)]
            other => Err(CoderError::FormatDisabled(other.name())),
        }
    }

    fn deserialize(self, data: &[u8]) -> Result<Element, CoderError> {
        match self {
            SerdeFormat::Json => {
                serde_json::from_slice(data).map_err(|e| CoderError::Serde(format!("JSON: {}", e)))
            }

            #[cfg(feature = "msgpack")]
            SerdeFormat::Msgpack => rmp_serde::from_slice(data)
                .map_err(|e| CoderError::Serde(format!("MessagePack: {}", e))),

            #[cfg(feature = "cbor")]
            SerdeFormat::Cbor => {
                ciborium::from_reader(data).map_err(|e| CoderError::Serde(format!("CBOR: {}", e)))
            }

            #[allow(unreachable_patterns)]
            other => Err(CoderError::FormatDisabled(other.name())),
        }
    }
}

/// An instantiated value coder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoderSpec {
    Bytes,
    StringUtf8,
    VarInt,
    Double,
    Bool,
    Kv(Box<CoderSpec>, Box<CoderSpec>),
    Iterable(Box<CoderSpec>),
    LengthPrefix(Box<CoderSpec>),
    Serde(SerdeFormat),
}

impl CoderSpec {
    pub fn kv(key: CoderSpec, value: CoderSpec) -> Self {
        CoderSpec::Kv(Box::new(key), Box::new(value))
    }

    pub fn iterable(element: CoderSpec) -> Self {
        CoderSpec::Iterable(Box::new(element))
    }

    pub fn length_prefix(inner: CoderSpec) -> Self {
        CoderSpec::LengthPrefix(Box::new(inner))
    }

    /// Encode a value in the outer context.
    pub fn encode_to_vec(&self, value: &Element) -> Result<Vec<u8>, CoderError> {
        let mut out = Vec::new();
        self.encode(value, &mut out, Context::Outer)?;
        Ok(out)
    }

    /// Decode a value that occupies all of `data`.
    pub fn decode_from_slice(&self, data: &[u8]) -> Result<Element, CoderError> {
        let mut input = data;
        let value = self.decode(&mut input, Context::Outer)?;
        if !input.is_empty() {
            return Err(CoderError::TrailingBytes(input.len()));
        }
        Ok(value)
    }

    pub fn encode(
        &self,
        value: &Element,
        out: &mut Vec<u8>,
        context: Context,
    ) -> Result<(), CoderError> {
        match (self, value) {
            (CoderSpec::Bytes, Element::Bytes(bytes)) => {
                write_delimited(bytes, out, context);
                Ok(())
            }
            (CoderSpec::StringUtf8, Element::String(s)) => {
                write_delimited(s.as_bytes(), out, context);
                Ok(())
            }
            (CoderSpec::VarInt, Element::Int(n)) => {
                write_varint(*n as u64, out);
                Ok(())
            }
            (CoderSpec::Double, Element::Double(n)) => {
                out.extend_from_slice(&n.to_bits().to_be_bytes());
                Ok(())
            }
            (CoderSpec::Bool, Element::Bool(b)) => {
                out.push(u8::from(*b));
                Ok(())
            }
            (CoderSpec::Kv(key_coder, value_coder), Element::Kv(key, val)) => {
                key_coder.encode(key, out, Context::Nested)?;
                value_coder.encode(val, out, context)
            }
            (CoderSpec::Iterable(element_coder), Element::Iterable(items)) => {
                let count = i32::try_from(items.len())
                    .map_err(|_| CoderError::TooLarge(items.len()))?;
                out.extend_from_slice(&count.to_be_bytes());
                for item in items {
                    element_coder.encode(item, out, Context::Nested)?;
                }
                Ok(())
            }
            (CoderSpec::LengthPrefix(inner), value) => {
                let mut buf = Vec::new();
                inner.encode(value, &mut buf, Context::Outer)?;
                write_varint(buf.len() as u64, out);
                out.extend_from_slice(&buf);
                Ok(())
            }
            (CoderSpec::Serde(format), value) => {
                let bytes = format.serialize(value)?;
                write_delimited(&bytes, out, context);
                Ok(())
            }
            (coder, value) => Err(CoderError::Mismatch {
                coder: coder.to_string(),
                found: value.kind(),
            }),
        }
    }

    pub fn decode(&self, input: &mut &[u8], context: Context) -> Result<Element, CoderError> {
        match self {
            CoderSpec::Bytes => Ok(Element::Bytes(read_delimited(input, context)?.to_vec())),
            CoderSpec::StringUtf8 => {
                let raw = read_delimited(input, context)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| CoderError::InvalidUtf8(e.to_string()))?;
                Ok(Element::String(s.to_string()))
            }
            CoderSpec::VarInt => Ok(Element::Int(read_varint(input)? as i64)),
            CoderSpec::Double => {
                let raw = take(input, 8)?;
                let mut bits = [0u8; 8];
                bits.copy_from_slice(raw);
                Ok(Element::Double(f64::from_bits(u64::from_be_bytes(bits))))
            }
            CoderSpec::Bool => match take(input, 1)?[0] {
                0 => Ok(Element::Bool(false)),
                1 => Ok(Element::Bool(true)),
                other => Err(CoderError::InvalidTag { what: "bool", tag: other }),
            },
            CoderSpec::Kv(key_coder, value_coder) => {
                let key = key_coder.decode(input, Context::Nested)?;
                let value = value_coder.decode(input, context)?;
                Ok(Element::Kv(Box::new(key), Box::new(value)))
            }
            CoderSpec::Iterable(element_coder) => {
                let count = read_i32(input)?;
                let count = usize::try_from(count).map_err(|_| CoderError::NegativeLength(count))?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(element_coder.decode(input, Context::Nested)?);
                }
                Ok(Element::Iterable(items))
            }
            CoderSpec::LengthPrefix(inner) => {
                let len = read_varint(input)? as usize;
                let body = take(input, len)?;
                inner.decode_from_slice(body)
            }
            CoderSpec::Serde(format) => format.deserialize(read_delimited(input, context)?),
        }
    }
}

impl fmt::Display for CoderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoderSpec::Bytes => f.write_str("bytes"),
            CoderSpec::StringUtf8 => f.write_str("string_utf8"),
            CoderSpec::VarInt => f.write_str("varint"),
            CoderSpec::Double => f.write_str("double"),
            CoderSpec::Bool => f.write_str("bool"),
            CoderSpec::Kv(k, v) => write!(f, "kv<{}, {}>", k, v),
            CoderSpec::Iterable(e) => write!(f, "iterable<{}>", e),
            CoderSpec::LengthPrefix(inner) => write!(f, "length_prefix<{}>", inner),
            CoderSpec::Serde(format) => write!(f, "serde:{}", format.name()),
        }
    }
}

/// Coder for the windows an envelope is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowCoder {
    Global,
    Interval,
}

impl WindowCoder {
    fn encode(&self, window: &Window, out: &mut Vec<u8>) -> Result<(), CoderError> {
        match (self, window) {
            (WindowCoder::Global, Window::Global) => Ok(()),
            (WindowCoder::Interval, Window::Interval { start, end }) => {
                if end.0 < start.0 {
                    return Err(CoderError::InvalidWindow(format!(
                        "end {} is before start {}",
                        end.0, start.0
                    )));
                }
                out.extend_from_slice(&end.0.to_be_bytes());
                write_varint(end.0.abs_diff(start.0), out);
                Ok(())
            }
            (coder, _) => Err(CoderError::Mismatch {
                coder: coder.to_string(),
                found: "window",
            }),
        }
    }

    fn decode(&self, input: &mut &[u8]) -> Result<Window, CoderError> {
        match self {
            WindowCoder::Global => Ok(Window::Global),
            WindowCoder::Interval => {
                let end = read_i64(input)?;
                let span = read_varint(input)?;
                let start = end.checked_sub_unsigned(span).ok_or_else(|| {
                    CoderError::InvalidWindow(format!("span {} reaches before {}", span, end))
                })?;
                Ok(Window::Interval {
                    start: Timestamp(start),
                    end: Timestamp(end),
                })
            }
        }
    }
}

impl fmt::Display for WindowCoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowCoder::Global => f.write_str("global_window"),
            WindowCoder::Interval => f.write_str("interval_window"),
        }
    }
}

/// Full coder for envelopes: timestamp, windows, pane and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowedValueCoder {
    pub value: CoderSpec,
    pub window: WindowCoder,
}

impl WindowedValueCoder {
    pub fn new(value: CoderSpec, window: WindowCoder) -> Self {
        Self { value, window }
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CoderError> {
        let mut out = Vec::new();
        out.extend_from_slice(&envelope.timestamp.0.to_be_bytes());

        let count = i32::try_from(envelope.windows.len())
            .map_err(|_| CoderError::TooLarge(envelope.windows.len()))?;
        out.extend_from_slice(&count.to_be_bytes());
        for window in &envelope.windows {
            self.window.encode(window, &mut out)?;
        }

        let pane = &envelope.pane;
        out.push(u8::from(pane.is_first) | (u8::from(pane.is_last) << 1) | (pane.timing.tag() << 2));
        write_varint(pane.index as u64, &mut out);
        write_varint(pane.non_speculative_index as u64, &mut out);

        self.value.encode(&envelope.value, &mut out, Context::Outer)?;
        Ok(out)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Envelope, CoderError> {
        let mut input = data;
        let timestamp = Timestamp(read_i64(&mut input)?);

        let count = read_i32(&mut input)?;
        let count = usize::try_from(count).map_err(|_| CoderError::NegativeLength(count))?;
        let mut windows = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            windows.push(self.window.decode(&mut input)?);
        }

        let header = take(&mut input, 1)?[0];
        let timing = PaneTiming::from_tag((header >> 2) & 0b11).ok_or(CoderError::InvalidTag {
            what: "pane timing",
            tag: header,
        })?;
        let pane = PaneInfo {
            is_first: header & 1 != 0,
            is_last: header & 2 != 0,
            timing,
            index: read_varint(&mut input)? as i64,
            non_speculative_index: read_varint(&mut input)? as i64,
        };

        let value = self.value.decode(&mut input, Context::Outer)?;
        if !input.is_empty() {
            return Err(CoderError::TrailingBytes(input.len()));
        }
        Ok(Envelope::new(value, timestamp, windows, pane))
    }
}

impl fmt::Display for WindowedValueCoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "windowed_value<{}, {}>", self.value, self.window)
    }
}

/// Errors raised while encoding or decoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoderError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    #[error("coder {coder} cannot handle a {found} value")]
    Mismatch { coder: String, found: &'static str },

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid {what} tag: {tag}")]
    InvalidTag { what: &'static str, tag: u8 },

    #[error("varint is longer than 10 bytes")]
    VarIntOverflow,

    #[error("negative length: {0}")]
    NegativeLength(i32),

    #[error("collection of {0} items is too large to encode")]
    TooLarge(usize),

    #[error("invalid interval window: {0}")]
    InvalidWindow(String),

    #[error("serde encoding failed: {0}")]
    Serde(String),

    #[error("serde format '{0}' is not enabled in this build")]
    FormatDisabled(&'static str),
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(input: &mut &[u8]) -> Result<u64, CoderError> {
    let mut result = 0u64;
    for shift in (0..70).step_by(7) {
        let byte = take(input, 1)?[0];
        if shift == 63 && byte > 1 {
            return Err(CoderError::VarIntOverflow);
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(CoderError::VarIntOverflow)
}

fn read_i32(input: &mut &[u8]) -> Result<i32, CoderError> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(take(input, 4)?);
    Ok(i32::from_be_bytes(raw))
}

fn read_i64(input: &mut &[u8]) -> Result<i64, CoderError> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(take(input, 8)?);
    Ok(i64::from_be_bytes(raw))
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8], CoderError> {
    if input.len() < len {
        return Err(CoderError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

fn write_delimited(bytes: &[u8], out: &mut Vec<u8>, context: Context) {
    if context == Context::Nested {
        write_varint(bytes.len() as u64, out);
    }
    out.extend_from_slice(bytes);
}

fn read_delimited<'a>(input: &mut &'a [u8], context: Context) -> Result<&'a [u8], CoderError> {
    match context {
        Context::Outer => Ok(std::mem::take(input)),
        Context::Nested => {
            let len = read_varint(input)? as usize;
            take(input, len)
        }
    }
}
