//! Per-subscriber connection worker
//!
//! One task per connection: handshake, then forward queued frames to the
//! socket while watching the read side for EOF.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use super::broadcast::BroadcastHub;
use super::subscription::SubscriberId;
use crate::error::{Error, Result};
use crate::event::codec::{self, FrameReader, WireMessage};
use crate::router::TopicFilter;

pub(super) async fn run<S>(hub: Arc<BroadcastHub>, stream: S, peer: Option<SocketAddr>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut frames = FrameReader::new(reader, hub.config().max_frame_len);

    let filter = handshake(&hub, &mut frames).await?;
    let (id, mut rx) = hub.attach(filter, peer)?;

    let result = serve(id, &mut frames, &mut writer, &mut rx).await;

    hub.remove(id);
    let _ = writer.shutdown().await;

    tracing::debug!(subscriber_id = id.0, peer = ?peer, "Subscriber connection closed");
    result
}

async fn handshake<S>(hub: &BroadcastHub, frames: &mut FrameReader<ReadHalf<S>>) -> Result<TopicFilter>
where
    S: AsyncRead + AsyncWrite,
{
    let timeout = hub.config().handshake_timeout;

    let frame = tokio::time::timeout(timeout, frames.next_frame())
        .await
        .map_err(|_| Error::ConnectTimeout(timeout))??
        .ok_or_else(|| Error::Protocol("closed before hello".into()))?;

    match codec::decode(&frame)? {
        WireMessage::Hello { topic, scope_key } => Ok(TopicFilter { topic, scope_key }),
        other => Err(Error::Protocol(format!("expected hello, got {:?}", other))),
    }
}

async fn serve<S>(
    id: SubscriberId,
    frames: &mut FrameReader<ReadHalf<S>>,
    writer: &mut WriteHalf<S>,
    rx: &mut mpsc::Receiver<Bytes>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let welcome = codec::encode(&WireMessage::Welcome { subscriber_id: id.0 })?;
    writer.write_all(&welcome).await?;

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(frame) => writer.write_all(&frame).await?,
                // Removed from the hub
                None => return Ok(()),
            },
            incoming = frames.next_frame() => match incoming? {
                // Nothing is expected after hello; ignore
                Some(_) => {}
                None => return Ok(()),
            },
        }
    }
}
