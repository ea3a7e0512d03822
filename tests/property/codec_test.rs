// tests/property/codec_test.rs

//! Frame codec properties: encode/decode agree, segmentation does not matter, and
//! oversized declarations are rejected up front.

use bytes::{BufMut, BytesMut};
use gatecore::core::GateError;
use gatecore::core::protocol::{Frame, GameFrameCodec};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn arb_frame() -> impl Strategy<Value = Frame> {
    (any::<u16>(), any::<i32>(), prop::collection::vec(any::<u8>(), 0..512))
        .prop_map(|(msg_id, sequence, payload)| Frame::new(msg_id, sequence, payload))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_decode_inverts_encode(frame in arb_frame()) {
        let mut codec = GameFrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        prop_assert_eq!(buf.len(), 10 + frame.payload.len());

        let decoded = codec.decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, Some(frame));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_any_segmentation_yields_same_frames(
        frames in prop::collection::vec(arb_frame(), 1..8),
        cuts in prop::collection::vec(1usize..64, 0..32),
    ) {
        let mut codec = GameFrameCodec::default();
        let mut wire = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).unwrap();
        }
        let wire = wire.freeze();

        // Feed the stream in chunks whose sizes come from `cuts`, then the remainder.
        let mut decoded = Vec::new();
        let mut buf = BytesMut::new();
        let mut offset: usize = 0;
        for cut in cuts.iter().copied().chain(std::iter::once(usize::MAX)) {
            let end = offset.saturating_add(cut).min(wire.len());
            buf.extend_from_slice(&wire[offset..end]);
            offset = end;
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
            if offset == wire.len() {
                break;
            }
        }
        prop_assert_eq!(decoded, frames);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_declaration_is_rejected(
        max in 6usize..4096,
        excess in 1u32..1_000_000,
    ) {
        let mut codec = GameFrameCodec::new(max);
        let mut buf = BytesMut::new();
        let declared = max as u32 + excess;
        buf.put_u32(declared);
        buf.put_u16(1);
        let result = codec.decode(&mut buf);
        prop_assert_eq!(
            result,
            Err(GateError::FrameTooLarge { declared: declared as usize, max })
        );
    }
}
