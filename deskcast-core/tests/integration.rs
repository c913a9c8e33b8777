//! End-to-end tests against a real server on an ephemeral localhost
//! port, driven by tokio-tungstenite viewers.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskcast_core::{
    DeskError, Frame, InputEvent, InputReplayer, ManagerConfig, ReplayDispatcher, SessionManager,
    StreamServer,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Recording(Arc<Mutex<Vec<InputEvent>>>);

impl InputReplayer for Recording {
    fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Harness {
    addr: SocketAddr,
    manager: Arc<SessionManager>,
    replayed: Recording,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<Result<(), DeskError>>,
}

async fn start(max_connections: usize) -> Harness {
    start_with(max_connections, deskcast_core::HANDSHAKE_TIMEOUT).await
}

async fn start_with(max_connections: usize, handshake_timeout: Duration) -> Harness {
    let replayed = Recording::default();
    let replay = ReplayDispatcher::spawn(Box::new(replayed.clone())).unwrap();
    let manager = Arc::new(SessionManager::new(
        ManagerConfig {
            max_connections,
            queue_capacity: 2,
        },
        replay,
    ));
    let server = StreamServer::bind("127.0.0.1:0", Arc::clone(&manager))
        .await
        .unwrap()
        .with_handshake_timeout(handshake_timeout);
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server.serve(shutdown.clone()));

    Harness {
        addr,
        manager,
        replayed,
        shutdown,
        server,
    }
}

impl Harness {
    async fn connect(&self) -> Viewer {
        let (ws, _) = connect_async(format!("ws://{}", self.addr)).await.unwrap();
        ws
    }

    /// Wait until the registry holds `n` active sessions.
    async fn wait_active(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            loop {
                let active = self
                    .manager
                    .session_ids()
                    .into_iter()
                    .filter_map(|id| self.manager.get(id))
                    .filter(|s| s.is_active())
                    .count();
                if active == n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sessions never became active");
    }

    async fn wait_len(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.manager.len() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached expected size");
    }
}

async fn next_text(ws: &mut Viewer) -> String {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

/// Read until a close frame arrives and return its code and reason.
async fn expect_close(ws: &mut Viewer) -> (CloseCode, String) {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without a close frame")
            .expect("read failed");
        if let Message::Close(Some(frame)) = msg {
            return (frame.code, frame.reason.into_owned());
        }
    }
}

fn frame() -> Arc<Frame> {
    Arc::new(Frame::with_timestamp(
        1_700_000_000.5,
        640,
        360,
        60,
        0.5,
        vec![0xFF, 0xD8, 0xFF, 0xE0],
    ))
}

#[tokio::test]
async fn viewer_receives_broadcast_frame() {
    let h = start(2).await;
    let mut viewer = h.connect().await;
    h.wait_active(1).await;

    assert_eq!(h.manager.broadcast(frame()), 1);

    let value: Value = serde_json::from_str(&next_text(&mut viewer).await).unwrap();
    assert_eq!(value["type"], "frame");
    assert_eq!(value["encoding"], "jpeg-base64");
    assert_eq!(value["width"], 640);
    assert_eq!(value["height"], 360);
    assert_eq!(value["quality"], 60);
    assert_eq!(value["timestamp"], 1_700_000_000.5);
    assert_eq!(value["data"], "/9j/4A==");

    // The send is counted once the write completes, which can trail the
    // viewer's read.
    let session = h.manager.get(h.manager.session_ids()[0]).unwrap();
    tokio::time::timeout(WAIT, async {
        while session.summary().frames_sent < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("send never recorded");
    assert_eq!(session.summary().frames_sent, 1);
}

#[tokio::test]
async fn over_capacity_viewer_gets_busy_close() {
    let h = start(2).await;
    let _a = h.connect().await;
    let _b = h.connect().await;
    h.wait_active(2).await;

    let mut c = h.connect().await;
    let (code, reason) = expect_close(&mut c).await;
    assert_eq!(code, CloseCode::Again);
    assert_eq!(u16::from(code), 1013);
    assert_eq!(reason, "Server busy: max connections reached");
    assert_eq!(h.manager.len(), 2);
}

#[tokio::test]
async fn slot_frees_after_viewer_leaves() {
    let h = start(1).await;
    let mut a = h.connect().await;
    h.wait_active(1).await;

    a.close(None).await.unwrap();
    h.wait_len(0).await;

    let _b = h.connect().await;
    h.wait_active(1).await;
}

#[tokio::test]
async fn viewer_input_is_replayed_in_order() {
    let h = start(2).await;
    let mut viewer = h.connect().await;
    h.wait_active(1).await;

    for msg in [
        r#"{"type":"mouse","action":"move","x":100,"y":200}"#,
        r#"{"type":"mouse","action":"move","y":200}"#,
        "garbage",
        r#"{"type":"keyboard","action":"keydown","key":"a"}"#,
    ] {
        viewer.send(Message::Text(msg.to_string())).await.unwrap();
    }

    tokio::time::timeout(WAIT, async {
        while h.replayed.0.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("events never replayed");

    assert_eq!(
        *h.replayed.0.lock().unwrap(),
        vec![
            InputEvent::MouseMove { x: 100, y: 200 },
            InputEvent::KeyDown { key: "a".into() },
        ]
    );
    // Malformed messages leave the session open.
    assert_eq!(h.manager.len(), 1);
}

#[tokio::test]
async fn shutdown_sends_going_away() {
    let h = start(2).await;
    let mut viewer = h.connect().await;
    h.wait_active(1).await;

    h.shutdown.cancel();
    let (code, _) = expect_close(&mut viewer).await;
    assert_eq!(code, CloseCode::Away);

    tokio::time::timeout(WAIT, h.server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(h.manager.is_empty());
}

#[tokio::test]
async fn stalled_handshake_releases_slot() {
    let h = start_with(1, Duration::from_millis(200)).await;

    // Plain TCP, no upgrade request.
    let _idle = TcpStream::connect(h.addr).await.unwrap();
    h.wait_len(1).await;
    h.wait_len(0).await;

    let _viewer = h.connect().await;
    h.wait_active(1).await;
}

#[tokio::test]
async fn removed_session_is_released_while_viewer_stalls() {
    let h = start(1).await;
    // Connected but never read from.
    let _viewer = h.connect().await;
    h.wait_active(1).await;

    let id = h.manager.session_ids()[0];
    let session = h.manager.get(id).unwrap();
    let big = Arc::new(Frame::with_timestamp(
        1.0,
        1920,
        1080,
        60,
        1.0,
        vec![0xAB; 4 << 20],
    ));
    for _ in 0..40 {
        h.manager.broadcast(Arc::clone(&big));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(h.manager.remove(id));
    tokio::time::timeout(WAIT, async {
        while Arc::strong_count(&session) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection tasks still hold the session");
}

#[tokio::test]
async fn lost_viewer_leaves_others_streaming() {
    let h = start(2).await;
    let lost = h.connect().await;
    let mut kept = h.connect().await;
    h.wait_active(2).await;

    // Drop the socket without a close handshake.
    drop(lost);

    tokio::time::timeout(WAIT, async {
        while h.manager.len() != 1 {
            h.manager.broadcast(frame());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lost viewer never removed");

    h.manager.broadcast(frame());
    let value: Value = serde_json::from_str(&next_text(&mut kept).await).unwrap();
    assert_eq!(value["type"], "frame");
    assert!(h.manager.get(h.manager.session_ids()[0]).unwrap().is_active());
}
