use std::io::Read;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ilprobe::channel::{
    read_frame, write_frame, ChannelConfig, HandshakeRequest, HandshakeResponse, ProbeChannel,
    ShutdownOutcome,
};
use ilprobe::domain::ChannelError;
use ilprobe::engine::server::response_entries;
use ilprobe::probes::ProbeTable;
use ilprobe_common::{
    ProbeEntry, ProbeKind, ProbeKindSet, PROTOCOL_VERSION, TAG_HANDSHAKE_REQUEST,
    TAG_HANDSHAKE_RESPONSE, TAG_SHUTDOWN, TAG_SHUTDOWN_ACK,
};

fn config(socket_path: PathBuf) -> ChannelConfig {
    ChannelConfig {
        socket_path,
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_millis(1000),
        shutdown_timeout: Duration::from_millis(150),
    }
}

/// Accept one profiler, answer its handshake with `respond`, then run `finish`
fn peer<R, F>(listener: UnixListener, respond: R, finish: F) -> JoinHandle<HandshakeRequest>
where
    R: FnOnce(&HandshakeRequest) -> (u8, Vec<u8>) + Send + 'static,
    F: FnOnce(&mut UnixStream) + Send + 'static,
{
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let frame = read_frame(&mut stream).unwrap();
        assert_eq!(frame.tag, TAG_HANDSHAKE_REQUEST);
        let request = HandshakeRequest::decode(&frame.payload).unwrap();
        let (tag, payload) = respond(&request);
        write_frame(&mut stream, tag, &payload).unwrap();
        finish(&mut stream);
        request
    })
}

fn full_table(request: &HandshakeRequest) -> (u8, Vec<u8>) {
    let response = HandshakeResponse {
        version: PROTOCOL_VERSION,
        entries: response_entries(&ProbeTable::synthetic(), request.capabilities),
    };
    (TAG_HANDSHAKE_RESPONSE, response.encode().unwrap())
}

fn acknowledge(stream: &mut UnixStream) {
    let frame = read_frame(stream).unwrap();
    assert_eq!(frame.tag, TAG_SHUTDOWN);
    write_frame(stream, TAG_SHUTDOWN_ACK, &[]).unwrap();
}

fn hang_up(_stream: &mut UnixStream) {}

fn listen() -> (tempfile::TempDir, PathBuf, UnixListener) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&path).unwrap();
    (dir, path, listener)
}

#[test]
fn test_connect_without_peer_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path().join("missing.sock"));
    config.connect_timeout = Duration::from_millis(200);

    let started = Instant::now();
    let err = ProbeChannel::connect(&config).unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ChannelError::Unavailable { .. }), "got {err}");
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(3), "connect took {elapsed:?}");
}

#[test]
fn test_handshake_and_acknowledged_shutdown() {
    let (_dir, path, listener) = listen();
    let engine = peer(listener, full_table, acknowledge);

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    let table = channel.exchange_probe_table(ProbeKindSet::all()).unwrap();
    assert_eq!(table.len(), ProbeKind::ALL.len());
    assert_eq!(table.address(ProbeKind::Call), ProbeTable::synthetic().address(ProbeKind::Call));

    assert_eq!(channel.shutdown().unwrap(), ShutdownOutcome::Acknowledged);
    let request = engine.join().unwrap();
    assert_eq!(request.version, PROTOCOL_VERSION);
    assert_eq!(request.capabilities, ProbeKindSet::all());
    assert_eq!(request.pid, std::process::id());
}

#[test]
fn test_shutdown_without_ack_releases_transport() {
    let (_dir, path, listener) = listen();
    let engine = peer(listener, full_table, |stream| {
        assert_eq!(read_frame(stream).unwrap().tag, TAG_SHUTDOWN);
        // stay silent; the profiler must close its end on its own
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    });

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    channel.exchange_probe_table(ProbeKindSet::all()).unwrap();

    let started = Instant::now();
    assert_eq!(channel.shutdown().unwrap(), ShutdownOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(2));
    // returns only once the profiler side has hung up
    engine.join().unwrap();
}

#[test]
fn test_shutdown_when_peer_hangs_up() {
    let (_dir, path, listener) = listen();
    let engine = peer(listener, full_table, hang_up);

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    channel.exchange_probe_table(ProbeKindSet::all()).unwrap();
    // the engine is gone before the notice is sent
    engine.join().unwrap();
    assert_eq!(channel.shutdown().unwrap(), ShutdownOutcome::PeerClosed);
}

#[test]
fn test_version_mismatch() {
    let (_dir, path, listener) = listen();
    let engine = peer(
        listener,
        |request| {
            let (tag, mut payload) = full_table(request);
            payload[0..2].copy_from_slice(&(PROTOCOL_VERSION + 1).to_le_bytes());
            (tag, payload)
        },
        hang_up,
    );

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    let err = channel.exchange_probe_table(ProbeKindSet::all()).unwrap_err();
    assert!(matches!(err, ChannelError::ProtocolMismatch(_)), "got {err}");
    engine.join().unwrap();
}

#[test]
fn test_missing_probe_kind() {
    let (_dir, path, listener) = listen();
    let engine = peer(
        listener,
        |request| {
            let table = ProbeTable::synthetic();
            let response = HandshakeResponse {
                version: PROTOCOL_VERSION,
                entries: response_entries(
                    &table,
                    request.capabilities.without(ProbeKind::Throw),
                ),
            };
            (TAG_HANDSHAKE_RESPONSE, response.encode().unwrap())
        },
        hang_up,
    );

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    let err = channel.exchange_probe_table(ProbeKindSet::all()).unwrap_err();
    assert!(matches!(err, ChannelError::ProtocolMismatch(ref m) if m.contains("throw")), "got {err}");
    engine.join().unwrap();
}

#[test]
fn test_duplicate_entry_is_malformed() {
    let (_dir, path, listener) = listen();
    let engine = peer(
        listener,
        |_| {
            let entry = ProbeEntry::new(ProbeKind::MethodEnter, 0x1000);
            let response =
                HandshakeResponse { version: PROTOCOL_VERSION, entries: vec![entry, entry] };
            (TAG_HANDSHAKE_RESPONSE, response.encode().unwrap())
        },
        hang_up,
    );

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    let err = channel
        .exchange_probe_table(ProbeKindSet::EMPTY.with(ProbeKind::MethodEnter))
        .unwrap_err();
    assert!(matches!(err, ChannelError::MalformedMessage(_)), "got {err}");
    engine.join().unwrap();
}

#[test]
fn test_wrong_response_tag_is_malformed() {
    let (_dir, path, listener) = listen();
    let engine = peer(listener, |_| (TAG_SHUTDOWN_ACK, Vec::new()), hang_up);

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    let err = channel.exchange_probe_table(ProbeKindSet::all()).unwrap_err();
    assert!(matches!(err, ChannelError::MalformedMessage(ref m) if m.contains("tag 4")), "got {err}");
    engine.join().unwrap();
}

#[test]
fn test_truncated_response_is_malformed() {
    let (_dir, path, listener) = listen();
    let engine = peer(
        listener,
        |request| {
            let (tag, mut payload) = full_table(request);
            payload.truncate(payload.len() - 3);
            (tag, payload)
        },
        hang_up,
    );

    let mut channel = ProbeChannel::connect(&config(path)).unwrap();
    let err = channel.exchange_probe_table(ProbeKindSet::all()).unwrap_err();
    assert!(matches!(err, ChannelError::MalformedMessage(_)), "got {err}");
    engine.join().unwrap();
}
