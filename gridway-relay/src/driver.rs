//! Background I/O tasks: stream drivers and reply readers.
//!
//! A [`stream_task`] owns an agent peer's multiplexed stream exclusively:
//! it drains the outbound frame queue, parses inbound frames from a read
//! buffer, and delivers events to the relay. On read error, EOF, write
//! error, or a malformed frame it reports the closure exactly once and
//! exits; reconnection is demand-driven through `Relay::connect_agent`.
//!
//! A [`reply_reader`] owns the read half of a single-request connection:
//! it reads exactly one reply frame under the long reply budget and
//! delivers it (or the failure) to the relay.

use std::rc::Weak;
use std::time::Duration;

use gridway_core::{ConnId, PayloadCodec, Providers, TimeProvider};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::peer::PeerId;
use crate::relay::{NetStream, Relay};
use crate::reply::FailReason;
use crate::wire;

const READ_CHUNK: usize = 4096;

/// Drive one incarnation of a peer's multiplexed stream.
pub(crate) async fn stream_task<P: Providers, C: PayloadCodec>(
    relay: Weak<Relay<P, C>>,
    peer: PeerId,
    epoch: u64,
    mut stream: NetStream<P>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: mpsc::UnboundedReceiver<()>,
) {
    let mut read_buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            // Deliberate teardown: the stream was replaced or dropped.
            _ = shutdown.recv() => {
                tracing::debug!(peer = %peer, epoch, "stream task shut down");
                break;
            }

            maybe_frame = outbound.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if write_frames(&mut stream, frame, &mut outbound).await.is_err() {
                            tracing::debug!(peer = %peer, epoch, "stream write failed");
                            break;
                        }
                    }
                    // Peer state dropped the sender; nothing left to drive.
                    None => break,
                }
            }

            read = stream.read(&mut chunk) => {
                match read {
                    Ok(0) | Err(_) => {
                        tracing::debug!(peer = %peer, epoch, "stream read closed");
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&chunk[..n]);
                        if !deliver_frames(&relay, peer, &mut read_buf) {
                            break;
                        }
                    }
                }
            }
        }
    }

    // Whatever ended this incarnation, nothing can answer its in-flight
    // requests anymore. The purge is filtered by epoch and the detach is
    // stale-guarded, so reporting is safe on every exit path and happens
    // exactly once per incarnation.
    if let Some(relay) = relay.upgrade() {
        relay.on_stream_closed(peer, epoch);
    }
}

/// Write a frame plus anything queued behind it, then flush.
async fn write_frames<S>(
    stream: &mut S,
    first: Vec<u8>,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(&first).await?;
    while let Ok(frame) = outbound.try_recv() {
        stream.write_all(&frame).await?;
    }
    stream.flush().await
}

/// Parse complete frames out of the read buffer and deliver them.
///
/// Returns false when the stream must be torn down (malformed frame) or
/// the relay is gone.
fn deliver_frames<P: Providers, C: PayloadCodec>(
    relay: &Weak<Relay<P, C>>,
    peer: PeerId,
    buf: &mut Vec<u8>,
) -> bool {
    loop {
        match wire::try_decode_frame(buf) {
            Ok(Some((msg_id, payload, consumed))) => {
                buf.drain(..consumed);
                match relay.upgrade() {
                    Some(relay) => relay.on_stream_message(peer, msg_id, &payload),
                    None => return false,
                }
            }
            Ok(None) => return true, // need more data
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "malformed frame, tearing down stream");
                return false;
            }
        }
    }
}

/// Read one reply frame off a single-request connection.
///
/// Each read runs under the long reply budget, distinct from the short
/// routine I/O budget: decoding a reply may legitimately be slower than
/// routine traffic.
pub(crate) async fn reply_reader<P: Providers, C: PayloadCodec>(
    relay: Weak<Relay<P, C>>,
    conn: ConnId,
    mut read: tokio::io::ReadHalf<NetStream<P>>,
    time: P::Time,
    budget: Duration,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    let outcome: Result<Vec<u8>, FailReason> = loop {
        match time.timeout(budget, read.read(&mut chunk)).await {
            Err(_) => break Err(FailReason::Timeout),
            Ok(Err(_)) | Ok(Ok(0)) => break Err(FailReason::Decode),
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                match wire::try_decode_frame(&buf) {
                    Ok(Some((_msg_id, payload, _consumed))) => break Ok(payload),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(conn = %conn, error = %e, "malformed reply frame");
                        break Err(FailReason::Decode);
                    }
                }
            }
        }
    };

    if let Some(relay) = relay.upgrade() {
        relay.on_socket_reply(conn, outcome);
    }
}
