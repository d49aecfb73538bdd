//! Server push

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use spdy_sans_io::{Config, Error, Event, Headers, StatusCode};

use super::{body_of, reply, request, Pair};

fn promise(path: &str) -> Headers {
    [
        (":method", "GET"),
        (":path", path),
        (":version", "HTTP/1.1"),
        (":host", "localhost"),
        (":scheme", "https"),
        (":status", "200 OK"),
    ]
    .into_iter()
    .collect()
}

#[test]
fn test_push_promise_arrives_before_its_data() {
    let mut pair = Pair::new();
    let origin = pair.client.open_stream(request("/"), 2, true, pair.now).unwrap();
    pair.pump();

    pair.server.respond(origin, reply(), false, pair.now).unwrap();
    let pushed = pair.server.push(origin, promise("/style.css"), pair.now).unwrap();
    assert_eq!(pushed, 2);
    pair.server.write_data(pushed, b"body { }", true, pair.now).unwrap();
    pair.server.write_data(origin, b"<html>", true, pair.now).unwrap();
    pair.pump();

    let events = pair.client_events();
    let opened_at = events
        .iter()
        .position(|e| {
            matches!(e, Event::StreamOpened { stream_id, associated_stream_id: Some(o), priority: 2, .. }
                if *stream_id == pushed && *o == origin)
        })
        .expect("push promise delivered");
    let first_data = events
        .iter()
        .position(|e| matches!(e, Event::Data { stream_id, .. } if *stream_id == pushed))
        .unwrap();
    assert!(opened_at < first_data);
    assert_eq!(body_of(&events, pushed), (b"body { }".to_vec(), true));
    assert_eq!(body_of(&events, origin), (b"<html>".to_vec(), true));
    assert_eq!(pair.server.pushes_promised(), 1);
    assert_eq!(pair.client.active_streams(), 0);
}

#[test]
fn test_gzip_pushed_resource() {
    let original = b"pushed stylesheet contents ".repeat(200);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&original).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut pair = Pair::new();
    let origin = pair.client.open_stream(request("/"), 0, true, pair.now).unwrap();
    pair.pump();
    pair.server.respond(origin, reply(), false, pair.now).unwrap();

    let mut headers = promise("/style.css");
    headers.append("content-encoding", "gzip");
    let pushed = pair.server.push(origin, headers, pair.now).unwrap();
    pair.server.write_data(pushed, &compressed, true, pair.now).unwrap();
    pair.server.write_data(origin, b"", true, pair.now).unwrap();

    let (events, _) = pair.run_until_idle();
    let gzip = events.iter().any(|e| {
        matches!(e, Event::StreamOpened { stream_id, headers, .. }
            if *stream_id == pushed && headers.get("content-encoding") == Some("gzip"))
    });
    assert!(gzip);

    let (body, ended) = body_of(&events, pushed);
    assert!(ended);
    let mut decoded = Vec::new();
    GzDecoder::new(&body[..]).read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_push_refused_when_disabled() {
    let client = Config::client().with_enable_push(false);
    let mut pair = Pair::with_configs(client, Config::server());
    let origin = pair.client.open_stream(request("/"), 0, true, pair.now).unwrap();
    pair.pump();
    pair.server.respond(origin, reply(), false, pair.now).unwrap();
    let pushed = pair.server.push(origin, promise("/a.js"), pair.now).unwrap();
    pair.pump();

    assert!(!pair
        .client_events()
        .iter()
        .any(|e| matches!(e, Event::StreamOpened { .. })));
    assert_eq!(
        pair.server_events().last(),
        Some(&Event::Reset {
            stream_id: pushed,
            status: StatusCode::RefusedStream,
            remote: true
        })
    );
}

#[test]
fn test_client_cannot_push() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(request("/"), 0, false, pair.now).unwrap();
    assert_eq!(
        pair.client.push(id, promise("/x"), pair.now),
        Err(Error::InvalidState("only servers push"))
    );
}

#[test]
fn test_pushed_stream_is_read_only_for_client() {
    let mut pair = Pair::new();
    let origin = pair.client.open_stream(request("/"), 0, true, pair.now).unwrap();
    pair.pump();
    pair.server.respond(origin, reply(), false, pair.now).unwrap();
    let pushed = pair.server.push(origin, promise("/a.js"), pair.now).unwrap();
    pair.pump();

    assert!(matches!(
        pair.client.write_data(pushed, b"nope", false, pair.now),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        pair.server.respond(pushed, reply(), false, pair.now),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_push_needs_open_origin() {
    let mut pair = Pair::new();
    let origin = pair.client.open_stream(request("/"), 0, true, pair.now).unwrap();
    pair.pump();
    pair.server.respond(origin, reply(), true, pair.now).unwrap();
    assert!(pair.server.push(origin, promise("/late.css"), pair.now).is_err());
}

#[test]
fn test_push_body_after_origin_closed() {
    let mut pair = Pair::new();
    let origin = pair.client.open_stream(request("/"), 0, true, pair.now).unwrap();
    pair.pump();
    pair.server_events();

    let pushed = pair.server.push(origin, promise("/late.txt"), pair.now).unwrap();
    pair.server.respond(origin, reply(), true, pair.now).unwrap();
    pair.pump();
    let events = pair.client_events();
    assert!(events.contains(&Event::End { stream_id: origin }));
    assert!(!events.iter().any(|e| matches!(e, Event::Data { .. })));

    // Both halves of the origin are closed; the pushed stream lives on.
    pair.server.write_data(pushed, b"yes, wtf", true, pair.now).unwrap();
    pair.pump();
    assert_eq!(
        pair.client_events(),
        vec![
            Event::Data {
                stream_id: pushed,
                data: b"yes, wtf".to_vec()
            },
            Event::End { stream_id: pushed },
        ]
    );
}
