//! GOAWAY, graceful and abrupt shutdown, connection errors

use std::time::Duration;

use spdy_sans_io::{CloseReason, Config, Error, Event, Frame, GoAwayStatus, StatusCode};

use super::{reply, request, Pair, RawPeer};

#[test]
fn test_graceful_close_waits_for_in_flight_streams() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(request("/"), 0, true, pair.now).unwrap();
    pair.pump();
    pair.server_events();

    pair.server.close(true, pair.now);
    pair.pump();
    assert!(pair.server.is_draining());
    assert_eq!(
        pair.client_events(),
        vec![Event::GoAway {
            last_stream_id: id,
            status: GoAwayStatus::Ok
        }]
    );
    assert!(matches!(
        pair.client.open_stream(request("/more"), 0, true, pair.now),
        Err(Error::Refused(_))
    ));

    pair.server.respond(id, reply(), true, pair.now).unwrap();
    assert_eq!(
        pair.server_events(),
        vec![Event::Closed {
            reason: CloseReason::Graceful
        }]
    );
    pair.pump();

    let events = pair.client_events();
    assert!(matches!(events[0], Event::Response { .. }));
    assert_eq!(
        events.last(),
        Some(&Event::Closed {
            reason: CloseReason::GoAway(GoAwayStatus::Ok)
        })
    );
}

#[test]
fn test_streams_above_last_good_are_refused() {
    let mut pair = Pair::new();
    let first = pair.client.open_stream(request("/a"), 0, false, pair.now).unwrap();
    pair.pump();

    // GOAWAY and a new SYN_STREAM cross on the wire.
    pair.server.close(true, pair.now);
    let second = pair.client.open_stream(request("/b"), 0, false, pair.now).unwrap();
    pair.pump();

    let client_events = pair.client_events();
    assert_eq!(
        client_events,
        vec![
            Event::GoAway {
                last_stream_id: first,
                status: GoAwayStatus::Ok
            },
            Event::Reset {
                stream_id: second,
                status: StatusCode::RefusedStream,
                remote: true
            },
        ]
    );
    assert!(!pair
        .server_events()
        .iter()
        .any(|e| matches!(e, Event::StreamOpened { stream_id, .. } if *stream_id == second)));
    assert!(pair.client.stream_state(first).is_some());
}

#[test]
fn test_abort_resets_everything() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(request("/"), 0, false, pair.now).unwrap();
    pair.pump();
    pair.server_events();

    pair.client.close(false, pair.now);
    assert!(pair.client.is_closed());
    assert_eq!(
        pair.client_events(),
        vec![
            Event::Reset {
                stream_id: id,
                status: StatusCode::Cancel,
                remote: false
            },
            Event::Closed {
                reason: CloseReason::Aborted
            },
        ]
    );

    pair.pump();
    let events = pair.server_events();
    assert!(events.contains(&Event::Reset {
        stream_id: id,
        status: StatusCode::Cancel,
        remote: true
    }));
    assert!(pair.server.is_closed());
}

#[test]
fn test_drain_deadline_cancels_stragglers() {
    let client = Config::client().with_close_timeout(Duration::from_secs(1));
    let mut pair = Pair::with_configs(client, Config::server());
    let id = pair.client.open_stream(request("/slow"), 0, false, pair.now).unwrap();
    pair.pump();
    pair.server_events();

    pair.client.close(true, pair.now);
    assert_eq!(pair.client.poll_timeout(), Some(pair.now + Duration::from_secs(1)));
    pair.advance(Duration::from_millis(999));
    assert!(!pair.client.is_closed());

    pair.advance(Duration::from_millis(1));
    assert!(pair.client.is_closed());
    assert_eq!(
        pair.client_events(),
        vec![
            Event::Reset {
                stream_id: id,
                status: StatusCode::Cancel,
                remote: false
            },
            Event::Closed {
                reason: CloseReason::Graceful
            },
        ]
    );
    pair.pump();
    assert!(pair.server_events().contains(&Event::Reset {
        stream_id: id,
        status: StatusCode::Cancel,
        remote: true
    }));
}

#[test]
fn test_protocol_violation_sends_goaway() {
    let mut pair = Pair::new();
    let mut peer = RawPeer::new();
    let bytes = peer.encode(&[Frame::Data {
        stream_id: 1,
        fin: false,
        data: vec![0; 8],
    }]);

    let err = pair.server.recv(&bytes, pair.now).unwrap_err();
    assert!(matches!(err, Error::Connection { status: GoAwayStatus::ProtocolError, .. }));
    assert_eq!(
        peer.decode(&pair.server.take_pending_send()),
        vec![Frame::GoAway {
            last_good_stream_id: 0,
            status: GoAwayStatus::ProtocolError
        }]
    );
    assert!(matches!(
        pair.server_events()[..],
        [Event::Closed {
            reason: CloseReason::Error { status: GoAwayStatus::ProtocolError, .. }
        }]
    ));
}

#[test]
fn test_undecodable_bytes_close_the_connection() {
    let mut pair = Pair::new();
    let err = pair
        .server
        .recv(&[0x80, 0x03, 0x00, 0x63, 0, 0, 0, 0], pair.now)
        .unwrap_err();
    assert!(matches!(err, Error::Frame(_)));
    assert!(pair.server.is_closed());
    assert_eq!(pair.server.open_stream(request("/"), 0, true, pair.now), Err(Error::ConnectionClosed));
}
