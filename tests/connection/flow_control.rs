//! Stream and connection windows

use spdy_sans_io::{Config, Event, Frame, StatusCode};

use super::{body_of, request, Pair, RawPeer};

#[test]
fn test_sender_stalls_until_receiver_consumes() {
    let server = Config::server().with_initial_window_size(16 * 1024);
    let mut pair = Pair::with_configs(Config::client(), server);
    let id = pair.client.open_stream(request("/upload"), 0, false, pair.now).unwrap();
    pair.client.write_data(id, &vec![9u8; 64 * 1024], true, pair.now).unwrap();
    pair.pump();

    // Nothing consumed yet, so only the first window made it across.
    let first = pair.server_events();
    assert_eq!(body_of(&first, id).0.len(), 16 * 1024);
    pair.pump();
    assert_eq!(body_of(&pair.server_events(), id).0.len(), 16 * 1024);

    let (_, rest) = pair.run_until_idle();
    let (body, ended) = body_of(&rest, id);
    assert_eq!(body.len(), 32 * 1024);
    assert!(ended);
}

#[test]
fn test_unconsumed_events_hold_back_credit() {
    let server = Config::server().with_initial_window_size(16 * 1024);
    let mut pair = Pair::with_configs(Config::client(), server);
    let id = pair.client.open_stream(request("/upload"), 0, false, pair.now).unwrap();
    pair.client.write_data(id, &vec![1u8; 32 * 1024], false, pair.now).unwrap();
    pair.pump();
    pair.pump();

    // Events sit in the queue; no WINDOW_UPDATE has gone out.
    assert!(!pair.server.has_pending_send());
    assert!(pair.client.stream(id).unwrap().has_pending_writes());
}

#[test]
fn test_connection_window_shared_by_streams() {
    let mut pair = Pair::new();
    let a = pair.client.open_stream(request("/a"), 0, false, pair.now).unwrap();
    let b = pair.client.open_stream(request("/b"), 0, false, pair.now).unwrap();
    pair.client.write_data(a, &vec![1u8; 40 * 1024], true, pair.now).unwrap();
    pair.client.write_data(b, &vec![2u8; 40 * 1024], true, pair.now).unwrap();
    pair.pump();

    let early = pair.server_events();
    let total = body_of(&early, a).0.len() + body_of(&early, b).0.len();
    assert_eq!(total, 64 * 1024);
    assert_eq!(pair.client.connection_send_window(), 0);

    let (_, rest) = pair.run_until_idle();
    let all: Vec<Event> = early.into_iter().chain(rest).collect();
    assert_eq!(body_of(&all, a), (vec![1u8; 40 * 1024], true));
    assert_eq!(body_of(&all, b), (vec![2u8; 40 * 1024], true));
}

#[test]
fn test_larger_connection_window_is_announced() {
    let server = Config::server().with_connection_window(1 << 20);
    let mut pair = Pair::with_configs(Config::client(), server);
    assert_eq!(pair.client.connection_send_window(), 1 << 20);

    let a = pair.client.open_stream(request("/a"), 0, false, pair.now).unwrap();
    let b = pair.client.open_stream(request("/b"), 0, false, pair.now).unwrap();
    pair.client.write_data(a, &vec![0u8; 64 * 1024], false, pair.now).unwrap();
    pair.client.write_data(b, &vec![0u8; 64 * 1024], false, pair.now).unwrap();
    pair.pump();

    // Each stream fills its own window; the connection has room for both.
    let events = pair.server_events();
    assert_eq!(body_of(&events, a).0.len(), 64 * 1024);
    assert_eq!(body_of(&events, b).0.len(), 64 * 1024);
}

#[test]
fn test_window_overrun_resets_only_that_stream() {
    let server = Config::server().with_initial_window_size(1024);
    let mut pair = Pair::with_configs(Config::client(), server);
    let mut peer = RawPeer::new();

    let bytes = peer.encode(&[
        Frame::SynStream {
            stream_id: 1,
            associated_stream_id: 0,
            priority: 0,
            unidirectional: false,
            fin: false,
            headers: request("/"),
        },
        Frame::Data {
            stream_id: 1,
            fin: false,
            data: vec![0; 2048],
        },
    ]);
    pair.server.recv(&bytes, pair.now).unwrap();

    let events = pair.server_events();
    assert!(matches!(events[0], Event::StreamOpened { stream_id: 1, .. }));
    assert_eq!(
        events[1],
        Event::Reset {
            stream_id: 1,
            status: StatusCode::FlowControlError,
            remote: false
        }
    );
    let frames = peer.decode(&pair.server.take_pending_send());
    assert!(frames.contains(&Frame::RstStream {
        stream_id: 1,
        status: StatusCode::FlowControlError
    }));
    assert!(!pair.server.is_closed());
}
