//! `Frame` en/decoding over a length-delimited byte stream.
//!
//! Grounded on the `Decoder`/`Encoder`-over-`Framed` shape used by
//! `hydro_deploy_integration::single_connection` (this pack's closest
//! reference for connection framing), adapted here from that module's
//! single-accepted-connection multiplexer to a plain per-peer JSON frame
//! codec: `LengthDelimitedCodec` handles the 4-byte length prefix, this type
//! only (de)serializes the payload in between.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::RemoteError;
use crate::wire::Frame;

#[derive(Default)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = RemoteError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RemoteError> {
        let Some(bytes) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let frame = serde_json::from_slice(&bytes)?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = RemoteError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), RemoteError> {
        let payload = serde_json::to_vec(&item)?;
        self.inner.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Control, Mode};
    use skitter_core::node::NodeRef;

    #[test]
    fn round_trips_a_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let frame = Frame::Hello {
            node: NodeRef::from("worker-1"),
            mode: Mode::Worker,
            tags: vec!["gpu".into()],
        };
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Frame::Hello { node, mode, tags } => {
                assert_eq!(node, NodeRef::from("worker-1"));
                assert_eq!(mode, Mode::Worker);
                assert_eq!(tags, vec!["gpu".to_string()]);
            }
            _ => panic!("unexpected frame"),
        }
        let _ = Frame::Control(Control::Ping);
    }
}
