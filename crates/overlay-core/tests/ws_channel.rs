use std::{
    net::{SocketAddr, TcpListener},
    thread,
    time::{Duration, Instant},
};

use overlay_core::{ChannelError, ChannelState, DetectionChannel, WsDetectionChannel};
use tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// One-connection detection service. Replies are chosen by the request body.
fn spawn_service() -> (SocketAddr, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut socket = tungstenite::accept(stream).unwrap();
        loop {
            let body = match socket.read() {
                Ok(Message::Binary(body)) => body,
                Ok(_) => continue,
                Err(_) => break,
            };
            let reply = match body.as_slice() {
                b"fail" => r#"{"error": "model failed"}"#.to_string(),
                b"garbage" => "not json".to_string(),
                b"silent" => continue,
                b"bye" => {
                    let _ = socket.close(None);
                    continue;
                }
                image => format!(
                    r#"{{"detections": [{{"data": "{}", "bbox": [1, 2, 3, 4], "confidence": 0.8, "decoded": null}}],
                        "count": 1, "processing_time": 0.005}}"#,
                    image.len()
                ),
            };
            if socket.send(Message::text(reply)).is_err() {
                break;
            }
        }
    });
    (addr, handle)
}

fn wait_for(channel: &WsDetectionChannel, state: ChannelState) {
    let deadline = Instant::now() + WAIT;
    while channel.state() != state && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(channel.state(), state);
}

#[test]
fn round_trips_requests_until_the_service_hangs_up() {
    let (addr, service) = spawn_service();
    let channel = WsDetectionChannel::connect(&format!("ws://{addr}")).unwrap();
    wait_for(&channel, ChannelState::Open);

    let mut pending = channel.send(b"jpegbytes".to_vec()).unwrap();
    let batch = pending.wait_timeout(WAIT).unwrap().unwrap();
    assert_eq!(batch.count, 1);
    assert_eq!(batch.detections[0].data, "9");
    assert!(batch.detections[0].bounds().is_some());

    let mut pending = channel.send(b"fail".to_vec()).unwrap();
    assert_eq!(
        pending.wait_timeout(WAIT),
        Some(Err(ChannelError::Service("model failed".into())))
    );

    let mut pending = channel.send(b"garbage".to_vec()).unwrap();
    assert!(matches!(
        pending.wait_timeout(WAIT),
        Some(Err(ChannelError::Decode(_)))
    ));
    assert_eq!(channel.state(), ChannelState::Open);

    let mut pending = channel.send(b"bye".to_vec()).unwrap();
    assert!(matches!(
        pending.wait_timeout(WAIT),
        Some(Err(ChannelError::Closed | ChannelError::Transport(_)))
    ));
    wait_for(&channel, ChannelState::Closed);
    assert_eq!(channel.send(b"again".to_vec()).err(), Some(ChannelError::NotOpen));

    service.join().unwrap();
}

#[test]
fn close_resolves_an_outstanding_request() {
    let (addr, service) = spawn_service();
    let mut channel = WsDetectionChannel::connect(&format!("ws://{addr}")).unwrap();
    wait_for(&channel, ChannelState::Open);

    let mut pending = channel.send(b"silent".to_vec()).unwrap();
    assert_eq!(pending.wait_timeout(Duration::from_millis(200)), None);

    channel.close();
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(pending.poll(), Some(Err(ChannelError::Closed)));

    service.join().unwrap();
}
