//! Coder bridge between native and wire record shapes.
//!
//! Both directions re-encode only the value: it is written with the source
//! coder and read back with the target coder. Timestamp, windows and pane
//! pass through untouched. The two coders must share a byte layout, which
//! holds for an `sdk_coder`/`wire_coder` pair of the same collection.

use crate::coder::{CoderError, WindowedValueCoder};
use crate::envelope::Envelope;

/// Re-shape a native envelope into the wire representation.
pub fn into_wire_types(
    native: &WindowedValueCoder,
    wire: &WindowedValueCoder,
    envelope: Envelope,
) -> Result<Envelope, CoderError> {
    recode(native, wire, envelope)
}

/// Re-shape a wire envelope back into the native representation.
pub fn from_wire_types(
    wire: &WindowedValueCoder,
    native: &WindowedValueCoder,
    envelope: Envelope,
) -> Result<Envelope, CoderError> {
    recode(wire, native, envelope)
}

fn recode(
    from: &WindowedValueCoder,
    to: &WindowedValueCoder,
    envelope: Envelope,
) -> Result<Envelope, CoderError> {
    if from.value == to.value {
        return Ok(envelope);
    }
    let bytes = from.value.encode_to_vec(&envelope.value)?;
    let value = to.value.decode_from_slice(&bytes)?;
    Ok(envelope.with_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::{CoderSpec, SerdeFormat, WindowCoder};
    use crate::envelope::{Element, PaneInfo, PaneTiming, Timestamp, Window};

    fn pair() -> (WindowedValueCoder, WindowedValueCoder) {
        let native = WindowedValueCoder::new(
            CoderSpec::kv(
                CoderSpec::StringUtf8,
                CoderSpec::length_prefix(CoderSpec::Serde(SerdeFormat::Json)),
            ),
            WindowCoder::Interval,
        );
        let wire = WindowedValueCoder::new(
            CoderSpec::kv(
                CoderSpec::StringUtf8,
                CoderSpec::length_prefix(CoderSpec::Bytes),
            ),
            WindowCoder::Interval,
        );
        (native, wire)
    }

    fn envelope(value: Element) -> Envelope {
        Envelope::new(
            value,
            Timestamp(42),
            vec![Window::Interval {
                start: Timestamp(0),
                end: Timestamp(100),
            }],
            PaneInfo {
                is_first: true,
                is_last: false,
                timing: PaneTiming::Early,
                index: 0,
                non_speculative_index: -1,
            },
        )
    }

    #[test]
    fn test_into_wire_keeps_metadata() {
        let (native, wire) = pair();
        let original = envelope(Element::kv("k", true));

        let bridged = into_wire_types(&native, &wire, original.clone()).unwrap();
        assert_eq!(bridged.timestamp, original.timestamp);
        assert_eq!(bridged.windows, original.windows);
        assert_eq!(bridged.pane, original.pane);

        let Element::Kv(key, value) = &bridged.value else {
            panic!("expected kv, got {:?}", bridged.value);
        };
        assert_eq!(key.as_str(), Some("k"));
        assert_eq!(value.as_bytes(), Some(b"{\"bool\":true}".as_slice()));
    }

    #[test]
    fn test_wire_bytes_match_native_bytes() {
        let (native, wire) = pair();
        let original = envelope(Element::kv("k", 7i64));

        let bridged = into_wire_types(&native, &wire, original.clone()).unwrap();
        assert_eq!(
            wire.encode(&bridged).unwrap(),
            native.encode(&original).unwrap()
        );
    }

    #[test]
    fn test_round_trip() {
        let (native, wire) = pair();
        let original = envelope(Element::kv("k", "v"));

        let bridged = into_wire_types(&native, &wire, original.clone()).unwrap();
        let back = from_wire_types(&wire, &native, bridged).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_identical_coders_pass_through() {
        let coder = WindowedValueCoder::new(CoderSpec::VarInt, WindowCoder::Global);
        let original = Envelope::in_global_window(5i64, Timestamp::MIN);
        assert_eq!(
            into_wire_types(&coder, &coder, original.clone()).unwrap(),
            original
        );
    }

    #[test]
    fn test_value_not_matching_native_coder() {
        let (native, wire) = pair();
        let err = into_wire_types(&native, &wire, envelope(Element::Int(1))).unwrap_err();
        assert!(matches!(err, CoderError::Mismatch { .. }));
    }
}
