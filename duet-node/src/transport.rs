//! TCP data channel: length-prefixed text envelopes, one writer task and one reader task
//! per connection. The host accepts exactly one peer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use duet_core::wire::{encode_frame, frame_len, LEN_SIZE};
use duet_core::TransportEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

/// What the connection tasks report to the runner.
#[derive(Debug)]
pub enum LinkEvent {
    /// A data channel is up; its `Opened` event follows.
    Connected { channel: Channel, peer: SocketAddr },
    Transport(TransportEvent),
}

/// Sending half of an open data channel.
#[derive(Debug)]
pub struct Channel {
    tx: mpsc::UnboundedSender<String>,
    reader: AbortHandle,
}

impl Channel {
    /// Queue one envelope. False once the writer has gone away.
    pub fn send(&self, payload: String) -> bool {
        self.tx.send(payload).is_ok()
    }

    /// Stop reading and let the writer flush what is queued, then shut the socket down.
    pub fn close(self) {
        self.reader.abort();
    }
}

/// Bind the host's listener. Port 0 picks a free port.
pub async fn listen(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Accept the first peer; later connection attempts are refused.
pub fn spawn_accept(listener: TcpListener, events: mpsc::UnboundedSender<LinkEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut taken = false;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) if !taken => {
                    taken = true;
                    tracing::info!(%peer, "peer connected");
                    run_connection(stream, peer, events.clone());
                }
                Ok((_, peer)) => {
                    tracing::warn!(%peer, "room is full, refusing connection");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    })
}

/// Open the joiner's side of the data channel.
pub async fn connect(addr: SocketAddr, events: mpsc::UnboundedSender<LinkEvent>) -> std::io::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    tracing::info!(peer = %addr, "connected to host");
    run_connection(stream, addr, events);
    Ok(())
}

fn run_connection(stream: TcpStream, peer: SocketAddr, events: mpsc::UnboundedSender<LinkEvent>) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let closed = Arc::new(AtomicBool::new(false));

    let (start_tx, start_rx) = oneshot::channel::<()>();
    let reader_events = events.clone();
    let reader_closed = closed.clone();
    let reader_task = tokio::spawn(async move {
        if start_rx.await.is_err() {
            return;
        }
        loop {
            let mut len_buf = [0u8; LEN_SIZE];
            if reader.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = match frame_len(len_buf) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "bad frame header, closing");
                    break;
                }
            };
            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).await.is_err() {
                break;
            }
            match String::from_utf8(payload) {
                Ok(text) => {
                    if reader_events
                        .send(LinkEvent::Transport(TransportEvent::DataReceived(text)))
                        .is_err()
                    {
                        return;
                    }
                }
                Err(_) => tracing::debug!("non-utf8 frame, dropping"),
            }
        }
        report_closed(&reader_closed, &reader_events);
    });
    let reader_abort = reader_task.abort_handle();

    let writer_events = events.clone();
    let writer_reader = reader_abort.clone();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let frame = match encode_frame(&payload) {
                Ok(f) => f,
                Err(e) => {
                    // The peer must never see a stream with a gap in it.
                    tracing::warn!(
                        error = %e,
                        len = payload.len(),
                        "unframeable envelope, closing channel"
                    );
                    writer_reader.abort();
                    report_closed(&closed, &writer_events);
                    break;
                }
            };
            if let Err(e) = writer.write_all(&frame).await {
                tracing::debug!(error = %e, "write failed, closing writer");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let channel = Channel {
        tx,
        reader: reader_abort,
    };
    // Runner must hold the channel before any inbound data shows up.
    let _ = events.send(LinkEvent::Connected { channel, peer });
    let _ = events.send(LinkEvent::Transport(TransportEvent::Opened));
    let _ = start_tx.send(());
}

/// Each connection reports `Closed` at most once, whichever task notices first.
fn report_closed(closed: &AtomicBool, events: &mpsc::UnboundedSender<LinkEvent>) {
    if !closed.swap(true, Ordering::SeqCst) {
        let _ = events.send(LinkEvent::Transport(TransportEvent::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    async fn next_transport(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> TransportEvent {
        loop {
            if let LinkEvent::Transport(ev) = next(rx).await {
                return ev;
            }
        }
    }

    async fn next_channel(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Channel {
        loop {
            if let LinkEvent::Connected { channel, .. } = next(rx).await {
                return channel;
            }
        }
    }

    #[tokio::test]
    async fn envelopes_arrive_in_order_then_close() {
        let listener = listen(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let (join_tx, mut join_rx) = mpsc::unbounded_channel();
        let _accept = spawn_accept(listener, host_tx);
        connect(SocketAddr::from(([127, 0, 0, 1], port)), join_tx)
            .await
            .unwrap();

        let joiner = next_channel(&mut join_rx).await;
        let host = next_channel(&mut host_rx).await;
        assert_eq!(next_transport(&mut host_rx).await, TransportEvent::Opened);

        for i in 0..3 {
            assert!(joiner.send(format!("msg-{i}")));
        }
        for i in 0..3 {
            assert_eq!(
                next_transport(&mut host_rx).await,
                TransportEvent::DataReceived(format!("msg-{i}"))
            );
        }

        joiner.close();
        assert_eq!(next_transport(&mut host_rx).await, TransportEvent::Closed);
        drop(host);
    }

    #[tokio::test]
    async fn unframeable_envelope_closes_both_sides() {
        let listener = listen(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let (join_tx, mut join_rx) = mpsc::unbounded_channel();
        let _accept = spawn_accept(listener, host_tx);
        connect(SocketAddr::from(([127, 0, 0, 1], port)), join_tx)
            .await
            .unwrap();

        let joiner = next_channel(&mut join_rx).await;
        let _host = next_channel(&mut host_rx).await;
        assert_eq!(next_transport(&mut join_rx).await, TransportEvent::Opened);
        assert_eq!(next_transport(&mut host_rx).await, TransportEvent::Opened);

        assert!(joiner.send("before".into()));
        joiner.send("x".repeat(duet_core::wire::MAX_FRAME_LEN as usize + 1));
        joiner.send("after".into());

        assert_eq!(
            next_transport(&mut host_rx).await,
            TransportEvent::DataReceived("before".into())
        );
        assert_eq!(next_transport(&mut host_rx).await, TransportEvent::Closed);
        assert_eq!(next_transport(&mut join_rx).await, TransportEvent::Closed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(join_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_peer_is_refused() {
        let listener = listen(0).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], listener.local_addr().unwrap().port()));
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let _accept = spawn_accept(listener, host_tx);

        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        connect(addr, a_tx).await.unwrap();
        let _first = next_channel(&mut host_rx).await;

        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        connect(addr, b_tx).await.unwrap();
        let _b = next_channel(&mut b_rx).await;
        assert_eq!(next_transport(&mut b_rx).await, TransportEvent::Opened);
        assert_eq!(next_transport(&mut b_rx).await, TransportEvent::Closed);
    }
}
