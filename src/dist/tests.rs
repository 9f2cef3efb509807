use super::connection::{encode_send_frame, parse_frame, PASS_THROUGH};
use super::epmd::{port_please_request, read_port_response};
use super::handshake::{read_message, write_message};
use super::*;
use eetf::{Atom, Binary, FixInteger, Term, Tuple};
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

const COOKIE: &str = "secretcookie";
const PEER_CHALLENGE: u32 = 0x1234_5678;

fn atom(name: &str) -> Term {
    Term::Atom(Atom {
        name: name.to_string(),
    })
}

fn int(value: i32) -> Term {
    Term::FixInteger(FixInteger { value })
}

fn tuple(elements: Vec<Term>) -> Term {
    Term::Tuple(Tuple { elements })
}

fn binary(bytes: &[u8]) -> Term {
    Term::Binary(Binary {
        bytes: bytes.to_vec(),
    })
}

fn encode(term: &Term) -> Vec<u8> {
    let mut out = Vec::new();
    term.encode(&mut out).unwrap();
    out
}

fn frame_body(control: &Term, message: Option<&Term>) -> Vec<u8> {
    let mut body = vec![PASS_THROUGH];
    body.extend(encode(control));
    if let Some(message) = message {
        body.extend(encode(message));
    }
    body
}

const PEER_NAME: &[u8] = b"peer@127.0.0.1";

fn challenge_v6() -> Vec<u8> {
    let mut challenge = vec![b'N'];
    challenge.extend_from_slice(&(BRIDGE_FLAGS | 0x1).to_be_bytes());
    challenge.extend_from_slice(&PEER_CHALLENGE.to_be_bytes());
    challenge.extend_from_slice(&7u32.to_be_bytes());
    challenge.extend_from_slice(&(PEER_NAME.len() as u16).to_be_bytes());
    challenge.extend_from_slice(PEER_NAME);
    challenge
}

/// Pre-OTP-23 challenge: version, 32-bit flags, challenge, then the bare name.
fn challenge_v5() -> Vec<u8> {
    let mut challenge = vec![b'n'];
    challenge.extend_from_slice(&5u16.to_be_bytes());
    challenge.extend_from_slice(&0x0003_7ffdu32.to_be_bytes());
    challenge.extend_from_slice(&PEER_CHALLENGE.to_be_bytes());
    challenge.extend_from_slice(PEER_NAME);
    challenge
}

/// Peer side of the handshake. `ack_cookie` lets a test answer with the wrong secret.
fn accept_handshake(stream: &mut TcpStream, ack_cookie: &str) -> Vec<u8> {
    accept_handshake_with(stream, ack_cookie, &challenge_v6())
}

fn accept_handshake_with(stream: &mut TcpStream, ack_cookie: &str, challenge: &[u8]) -> Vec<u8> {
    let name_msg = read_message(stream).unwrap();
    write_message(stream, b"sok").unwrap();
    write_message(stream, challenge).unwrap();

    let reply = read_message(stream).unwrap();
    assert_eq!(reply[0], b'r');
    assert_eq!(&reply[5..21], digest(COOKIE, PEER_CHALLENGE).as_slice());
    let their_challenge = u32::from_be_bytes([reply[1], reply[2], reply[3], reply[4]]);

    let mut ack = vec![b'a'];
    ack.extend_from_slice(&digest(ack_cookie, their_challenge));
    write_message(stream, &ack).unwrap();
    name_msg
}

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut body).unwrap();
    body
}

fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    stream.write_all(&(body.len() as u32).to_be_bytes()).unwrap();
    stream.write_all(body).unwrap();
}

#[test]
fn node_name_parses_host_suffix() {
    assert_eq!(
        NodeName::parse("app@build-01"),
        NodeName::new("app", "build-01")
    );
    assert_eq!(NodeName::parse("app"), NodeName::new("app", DEFAULT_HOST));
    assert_eq!(NodeName::parse("app@"), NodeName::new("app", DEFAULT_HOST));
    assert_eq!(NodeName::new("maude", "host").to_string(), "maude@host");
}

#[test]
fn digest_matches_known_vector() {
    let cookie = "1234567890".repeat(7);
    let expected = [
        0x57, 0xed, 0xf4, 0xa2, 0x2b, 0xe3, 0xc9, 0x55, 0xac, 0x49, 0xda, 0x2e, 0x21, 0x07, 0xb6,
        0x7a,
    ];
    assert_eq!(digest(&cookie, 1_234_567_890), expected);
}

#[test]
fn port_please_request_is_length_prefixed() {
    assert_eq!(
        port_please_request("app").unwrap(),
        vec![0, 4, b'z', b'a', b'p', b'p']
    );
}

#[test]
fn port_response_decodes_registered_node() {
    let mut bytes = vec![b'w', 0];
    bytes.extend_from_slice(&40_123u16.to_be_bytes());
    bytes.extend_from_slice(&[77, 0, 0, 6, 0, 5]);
    bytes.extend_from_slice(&[0, 3, b'a', b'p', b'p', 0, 0]);
    let node = read_port_response(&mut Cursor::new(bytes), "app").unwrap();
    assert_eq!(node.port, 40_123);
    assert_eq!(node.node_type, 77);
    assert_eq!(node.highest_version, 6);
    assert_eq!(node.lowest_version, 5);
}

#[test]
fn port_response_reports_unregistered_node() {
    let err = read_port_response(&mut Cursor::new(vec![b'w', 1]), "ghost").unwrap_err();
    assert!(matches!(err, EpmdError::NotRegistered(name, 1) if name == "ghost"));
    let err = read_port_response(&mut Cursor::new(vec![b'x', 0]), "ghost").unwrap_err();
    assert!(matches!(err, EpmdError::UnexpectedResponse(b'x')));
}

#[test]
fn handshake_completes_with_matching_cookie() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_handshake(&mut stream, COOKIE)
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeName::new("maude_bridge", "127.0.0.1");
    let info = perform_handshake(&mut stream, &local, COOKIE, 42, 99).unwrap();
    assert_eq!(info.name, "peer@127.0.0.1");
    assert_eq!(info.creation, 7);

    let name_msg = peer.join().unwrap();
    assert_eq!(name_msg[0], b'N');
    let flags = u64::from_be_bytes(name_msg[1..9].try_into().unwrap());
    assert_eq!(flags, BRIDGE_FLAGS);
    assert_eq!(flags & 0x1, 0, "bridge must connect as a hidden node");
    assert_eq!(&name_msg[15..], b"maude_bridge@127.0.0.1");
}

#[test]
fn handshake_accepts_legacy_challenge() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_handshake_with(&mut stream, COOKIE, &challenge_v5())
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeName::new("maude_bridge", "127.0.0.1");
    let info = perform_handshake(&mut stream, &local, COOKIE, 42, 99).unwrap();
    assert_eq!(info.name, "peer@127.0.0.1");
    assert_eq!(info.flags, 0x0003_7ffd);
    assert_eq!(info.creation, 0);
    peer.join().unwrap();
}

#[test]
fn handshake_rejects_wrong_cookie_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_handshake(&mut stream, "othercookie");
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeName::new("maude_bridge", "127.0.0.1");
    let err = perform_handshake(&mut stream, &local, COOKIE, 42, 99).unwrap_err();
    assert!(matches!(err, HandshakeError::DigestMismatch));
    peer.join().unwrap();
}

#[test]
fn handshake_surfaces_rejected_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = read_message(&mut stream).unwrap();
        write_message(&mut stream, b"snot_allowed").unwrap();
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeName::new("maude_bridge", "127.0.0.1");
    let err = perform_handshake(&mut stream, &local, COOKIE, 42, 99).unwrap_err();
    assert!(matches!(err, HandshakeError::Rejected(status) if status == "not_allowed"));
    peer.join().unwrap();
}

#[test]
fn reg_send_frame_carries_reply_address() {
    let control = tuple(vec![int(6), atom("caller"), atom(""), atom("maude_bridge")]);
    let message = atom("ping");
    match parse_frame(&frame_body(&control, Some(&message))) {
        Inbound::Message { reply_to, payload } => {
            assert_eq!(reply_to, Some(atom("caller")));
            assert_eq!(payload, encode(&message));
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[test]
fn send_frame_has_no_reply_address() {
    let control = tuple(vec![int(2), atom(""), atom("bridge_pid")]);
    let message = atom("ping");
    assert!(matches!(
        parse_frame(&frame_body(&control, Some(&message))),
        Inbound::Message { reply_to: None, .. }
    ));
}

#[test]
fn send_sender_and_traced_reg_send_carry_reply_address() {
    let message = atom("ping");
    let controls = [
        tuple(vec![int(22), atom("caller"), atom("bridge_pid")]),
        tuple(vec![int(16), atom("caller"), atom(""), atom("maude_bridge"), atom("token")]),
    ];
    for control in controls {
        match parse_frame(&frame_body(&control, Some(&message))) {
            Inbound::Message { reply_to, .. } => assert_eq!(reply_to, Some(atom("caller"))),
            other => panic!("expected message, got {other:?}"),
        }
    }
}

#[test]
fn non_message_frames_are_ignored() {
    // LINK control message.
    let link = tuple(vec![int(1), atom("a"), atom("b")]);
    assert!(matches!(parse_frame(&frame_body(&link, None)), Inbound::Ignored));
    // REG_SEND with no payload.
    let empty = tuple(vec![int(6), atom("a"), atom(""), atom("b")]);
    assert!(matches!(parse_frame(&frame_body(&empty, None)), Inbound::Ignored));
    assert!(matches!(parse_frame(&[0x01, 131]), Inbound::Ignored));
    assert!(matches!(parse_frame(&[PASS_THROUGH, 0xff, 0x00]), Inbound::Ignored));
}

#[test]
fn send_frame_encodes_control_and_message() {
    let to = atom("caller");
    let message = tuple(vec![atom("ok"), binary(b"3")]);
    let frame = encode_send_frame(&to, &message).unwrap();
    let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
    assert_eq!(len, frame.len() - 4);
    assert_eq!(frame[4], PASS_THROUGH);

    let mut cursor = Cursor::new(&frame[5..]);
    let control = Term::decode(&mut cursor).unwrap();
    assert_eq!(control, tuple(vec![int(2), atom(""), to]));
    let decoded = Term::decode(&mut cursor).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn connection_opens_via_epmd_and_exchanges_frames() {
    let node_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let node_port = node_listener.local_addr().unwrap().port();
    let epmd_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let epmd_port = epmd_listener.local_addr().unwrap().port();

    let epmd = thread::spawn(move || {
        let (mut stream, _) = epmd_listener.accept().unwrap();
        let mut request = [0u8; 7];
        stream.read_exact(&mut request).unwrap();
        assert_eq!(&request, b"\x00\x05zpeer");
        let mut response = vec![b'w', 0];
        response.extend_from_slice(&node_port.to_be_bytes());
        response.extend_from_slice(&[77, 0, 0, 6, 0, 5, 0, 4]);
        response.extend_from_slice(b"peer\x00\x00");
        stream.write_all(&response).unwrap();
    });

    let node = thread::spawn(move || {
        let (mut stream, _) = node_listener.accept().unwrap();
        accept_handshake(&mut stream, COOKIE);

        // Tick must be echoed.
        stream.write_all(&[0u8; 4]).unwrap();
        let mut tick = [0xffu8; 4];
        stream.read_exact(&mut tick).unwrap();
        assert_eq!(tick, [0u8; 4]);

        let control = tuple(vec![int(6), atom("caller"), atom(""), atom("maude_bridge")]);
        write_frame(&mut stream, &frame_body(&control, Some(&atom("ping"))));
        read_frame(&mut stream)
    });

    let local = NodeName::new("maude_bridge", "127.0.0.1");
    let peer = NodeName::parse("peer@127.0.0.1");
    let timeout = Duration::from_secs(5);
    let mut conn = DistConnection::open(&local, &peer, COOKIE, epmd_port, timeout).unwrap();
    epmd.join().unwrap();
    assert_eq!(conn.peer().name, "peer@127.0.0.1");

    let mut inbound = conn.receive(timeout).unwrap();
    assert!(matches!(inbound, Inbound::Tick));
    inbound = conn.receive(timeout).unwrap();
    let (from, payload) = match inbound {
        Inbound::Message {
            reply_to: Some(from),
            payload,
        } => (from, payload),
        other => panic!("expected message, got {other:?}"),
    };
    assert_eq!(payload, encode(&atom("ping")));
    assert_eq!(conn.sequence(), 1);

    conn.reply(&from, &atom("pong")).unwrap();
    let reply = node.join().unwrap();
    let mut cursor = Cursor::new(&reply[1..]);
    assert_eq!(
        Term::decode(&mut cursor).unwrap(),
        tuple(vec![int(2), atom(""), atom("caller")])
    );
    assert_eq!(Term::decode(&mut cursor).unwrap(), atom("pong"));

    assert!(matches!(
        conn.receive(Duration::from_millis(200)),
        Err(SessionError::Closed) | Ok(Inbound::Timeout)
    ));
    conn.close();
    assert!(matches!(
        conn.receive(Duration::from_millis(10)),
        Err(SessionError::Closed)
    ));
}

#[test]
fn slow_frame_body_survives_short_connect_timeout() {
    let node_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let node_port = node_listener.local_addr().unwrap().port();
    let epmd_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let epmd_port = epmd_listener.local_addr().unwrap().port();

    let epmd = thread::spawn(move || {
        let (mut stream, _) = epmd_listener.accept().unwrap();
        let mut request = [0u8; 7];
        stream.read_exact(&mut request).unwrap();
        let mut response = vec![b'w', 0];
        response.extend_from_slice(&node_port.to_be_bytes());
        response.extend_from_slice(&[77, 0, 0, 6, 0, 5, 0, 4]);
        response.extend_from_slice(b"peer\x00\x00");
        stream.write_all(&response).unwrap();
    });

    let node = thread::spawn(move || {
        let (mut stream, _) = node_listener.accept().unwrap();
        accept_handshake(&mut stream, COOKIE);
        let control = tuple(vec![int(6), atom("caller"), atom(""), atom("maude_bridge")]);
        let body = frame_body(&control, Some(&atom("ping")));
        stream.write_all(&(body.len() as u32).to_be_bytes()).unwrap();
        thread::sleep(Duration::from_millis(600));
        stream.write_all(&body).unwrap();
        // Hold the socket open until the bridge has read the frame.
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });

    let local = NodeName::new("maude_bridge", "127.0.0.1");
    let peer = NodeName::parse("peer@127.0.0.1");
    let connect_timeout = Duration::from_millis(200);
    let mut conn = DistConnection::open(&local, &peer, COOKIE, epmd_port, connect_timeout).unwrap();
    epmd.join().unwrap();

    let inbound = conn.receive(Duration::from_secs(5)).unwrap();
    assert!(matches!(inbound, Inbound::Message { reply_to: Some(_), .. }));
    conn.close();
    node.join().unwrap();
}
