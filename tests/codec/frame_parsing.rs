//! Tests for SPDY frame header and payload parsing

use spdy_sans_io::{
    flags, frame_type, CompressionContext, Decoded, Frame, FrameCodec, FrameHeader, GoAwayStatus,
    Headers, StatusCode,
};

#[test]
fn test_control_header_parse() {
    // SETTINGS, version 3, no flags, length 12
    let header_bytes = [0x80, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x0c];
    let header = FrameHeader::parse(&header_bytes).unwrap();

    assert!(header.control);
    assert_eq!(header.version, 3);
    assert_eq!(header.frame_type, frame_type::SETTINGS);
    assert_eq!(header.length, 12);
    assert_eq!(header.total_size(), 20);
}

#[test]
fn test_data_header_parse() {
    // DATA, stream 5, FIN, length 3
    let header_bytes = [0x00, 0x00, 0x00, 0x05, flags::FIN, 0x00, 0x00, 0x03];
    let header = FrameHeader::parse(&header_bytes).unwrap();

    assert!(!header.control);
    assert_eq!(header.stream_id, 5);
    assert!(header.is_fin());
    assert_eq!(header.length, 3);
}

#[test]
fn test_header_needs_eight_bytes() {
    assert!(FrameHeader::parse(&[0x80, 0x03, 0x00]).is_none());
}

#[test]
fn test_parse_data_frame() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [0, 0, 0, 1, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];
    let frames = codec.process(&bytes, &mut ctx).unwrap();
    assert_eq!(
        frames,
        vec![Frame::Data {
            stream_id: 1,
            fin: false,
            data: b"hello".to_vec()
        }]
    );
}

#[test]
fn test_parse_ping() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [0x80, 0x03, 0x00, 0x06, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x07];
    let frames = codec.process(&bytes, &mut ctx).unwrap();
    assert_eq!(frames, vec![Frame::Ping { id: 7 }]);
}

#[test]
fn test_parse_rst_stream() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [
        0x80, 0x03, 0x00, 0x03, 0x00, 0x00, 0x00, 0x08, // header
        0x00, 0x00, 0x00, 0x03, // stream 3
        0x00, 0x00, 0x00, 0x05, // CANCEL
    ];
    let frames = codec.process(&bytes, &mut ctx).unwrap();
    assert_eq!(
        frames,
        vec![Frame::RstStream {
            stream_id: 3,
            status: StatusCode::Cancel
        }]
    );
}

#[test]
fn test_parse_goaway() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [
        0x80, 0x03, 0x00, 0x07, 0x00, 0x00, 0x00, 0x08, //
        0x00, 0x00, 0x00, 0x09, //
        0x00, 0x00, 0x00, 0x01,
    ];
    let frames = codec.process(&bytes, &mut ctx).unwrap();
    assert_eq!(
        frames,
        vec![Frame::GoAway {
            last_good_stream_id: 9,
            status: GoAwayStatus::ProtocolError
        }]
    );
}

#[test]
fn test_parse_window_update_masks_reserved_bit() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [
        0x80, 0x03, 0x00, 0x09, 0x00, 0x00, 0x00, 0x08, //
        0x80, 0x00, 0x00, 0x01, //
        0x00, 0x00, 0x10, 0x00,
    ];
    let frames = codec.process(&bytes, &mut ctx).unwrap();
    assert_eq!(
        frames,
        vec![Frame::WindowUpdate {
            stream_id: 1,
            delta: 4096
        }]
    );
}

#[test]
fn test_parse_settings_entries() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [
        0x80, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x0c, //
        0x00, 0x00, 0x00, 0x01, // one entry
        0x00, 0x00, 0x00, 0x07, // INITIAL_WINDOW_SIZE
        0x00, 0x01, 0x00, 0x00,
    ];
    match &codec.process(&bytes, &mut ctx).unwrap()[..] {
        [Frame::Settings { clear, settings }] => {
            assert!(!clear);
            assert_eq!(settings.len(), 1);
            assert_eq!(settings[0].id, 7);
            assert_eq!(settings[0].value, 65536);
        }
        other => panic!("expected SETTINGS, got {:?}", other),
    }
}

#[test]
fn test_noop_frames_are_skipped() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let mut bytes = vec![0x80, 0x03, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&[0x80, 0x03, 0x00, 0x06, 0x00, 0x00, 0x00, 0x04, 0, 0, 0, 2]);
    let frames = codec.process(&bytes, &mut ctx).unwrap();
    assert_eq!(frames, vec![Frame::Ping { id: 2 }]);
}

#[test]
fn test_partial_frame_waits_for_more_bytes() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let bytes = [0, 0, 0, 1, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];

    codec.feed(&bytes[..6]);
    assert_eq!(codec.decode(&mut ctx).unwrap(), Decoded::NeedMoreBytes);
    codec.feed(&bytes[6..10]);
    assert_eq!(codec.decode(&mut ctx).unwrap(), Decoded::NeedMoreBytes);
    assert_eq!(codec.buffered(), 10);
    codec.feed(&bytes[10..]);
    assert!(matches!(
        codec.decode(&mut ctx).unwrap(),
        Decoded::Frame(Frame::Data { stream_id: 1, .. })
    ));
    assert_eq!(codec.buffered(), 0);
}

#[test]
fn test_byte_at_a_time() {
    let mut writer = CompressionContext::new();
    let mut out = Vec::new();
    let headers: Headers = [(":status", "200 OK"), (":version", "HTTP/1.1")]
        .into_iter()
        .collect();
    FrameCodec::encode(
        &Frame::SynReply {
            stream_id: 1,
            fin: false,
            headers,
        },
        &mut writer,
        &mut out,
    )
    .unwrap();

    let mut codec = FrameCodec::new();
    let mut reader = CompressionContext::new();
    let mut frames = Vec::new();
    for b in &out {
        frames.extend(codec.process(std::slice::from_ref(b), &mut reader).unwrap());
    }
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], Frame::SynReply { stream_id: 1, .. }));
}

/// Two SYN_STREAMs as a zlib-based SPDY/3 client writes them: the header
/// blocks share one compression stream primed with the SPDY dictionary, and
/// the second block leans on the first.
const BROWSER_SYN_STREAMS: [u8; 151] = [
    // SYN_STREAM 1, FIN, priority 2, GET /index.html
    0x80, 0x03, 0x00, 0x01, 0x01, 0x00, 0x00, 0x69, 0x00, 0x00, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x78, 0xbb, 0xe3, 0xc6, 0xa7, 0xc2,
    0x02, 0xa5, 0x45, 0x50, 0x76, 0xb2, 0x82, 0x16, 0x08, 0xdc, 0xa9, 0x15,
    0x89, 0xa0, 0x80, 0xd5, 0x4b, 0x06, 0x97, 0x13, 0xec, 0x56, 0x88, 0xd4,
    0xec, 0xee, 0x1a, 0x02, 0x56, 0x59, 0x90, 0x08, 0x2e, 0xb3, 0xb8, 0xf5,
    0x33, 0xf3, 0x52, 0x52, 0x2b, 0xf4, 0x40, 0x0e, 0x07, 0xab, 0x2c, 0x06,
    0x96, 0x95, 0xb9, 0xe0, 0x02, 0x35, 0xa3, 0xa4, 0xa4, 0x00, 0x94, 0xde,
    0x39, 0xac, 0xb0, 0x27, 0x73, 0x2c, 0xe5, 0x35, 0x0f, 0xb2, 0x37, 0x30,
    0x72, 0x20, 0x67, 0x71, 0x41, 0x4a, 0xa5, 0x6e, 0x09, 0x30, 0x01, 0x01,
    0x00, 0x00, 0x00, 0xff, 0xff,
    // SYN_STREAM 3, FIN, priority 2, GET /style.css
    0x80, 0x03, 0x00, 0x01, 0x01, 0x00, 0x00, 0x1e, 0x00, 0x00, 0x00, 0x03,
    0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x22, 0xdf, 0xbd, 0x5c, 0xfa, 0xc5,
    0x25, 0x95, 0x20, 0x85, 0xc5, 0xc5, 0xf4, 0x73, 0x2e, 0x00, 0x00, 0x00,
    0xff, 0xff,
];

#[test]
fn test_parse_zlib_syn_streams() {
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    let frames = codec.process(&BROWSER_SYN_STREAMS, &mut ctx).unwrap();
    assert_eq!(frames.len(), 2);

    let paths: Vec<&str> = frames
        .iter()
        .map(|frame| match frame {
            Frame::SynStream {
                priority: 2,
                fin: true,
                associated_stream_id: 0,
                headers,
                ..
            } => {
                assert_eq!(headers.get(":method"), Some("GET"));
                assert_eq!(headers.get(":host"), Some("example.com"));
                assert_eq!(headers.get("accept-encoding"), Some("gzip,deflate"));
                assert_eq!(headers.get("user-agent"), Some("spdy-test"));
                headers.get(":path").unwrap_or_default()
            }
            other => panic!("expected SYN_STREAM, got {other:?}"),
        })
        .collect();
    assert_eq!(paths, vec!["/index.html", "/style.css"]);
    assert_eq!(frames[1].stream_id(), 3);
}

#[test]
fn test_zlib_stream_cannot_start_mid_way() {
    // The second frame alone lacks the zlib header and the history it uses.
    let mut codec = FrameCodec::new();
    let mut ctx = CompressionContext::new();
    assert!(matches!(
        codec.process(&BROWSER_SYN_STREAMS[113..], &mut ctx),
        Err(spdy_sans_io::FrameError::Compression(_))
    ));
}
