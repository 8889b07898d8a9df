//! Socket-level integration tests against a stub FNE
//!
//! A loopback UDP socket plays the FNE: it answers the three-step login
//! handshake and then records whatever the gateway transmits, so the tests
//! can assert the exact bytes a real server would see.

use op25_gateway::call::{CallManager, StreamSink};
use op25_gateway::fne::codec::crc16_ccitt;
use op25_gateway::fne::FneSession;
use op25_gateway::ingress::frame::{VoiceFrame, FRAME_TYPE_LDU1};
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PEER_ID: u32 = 9_000_999;
const SALT: u32 = 0xDEAD_BEEF;

/// SHA-256 of DE AD BE EF "PASSWORD"
const EXPECTED_KEY: [u8; 32] = [
    0x68, 0xAE, 0xB3, 0x3C, 0x52, 0xA3, 0xEA, 0x6A, 0xEC, 0x28, 0xA7, 0xED, 0xB9, 0x84, 0xCC,
    0xCD, 0x7A, 0xF1, 0x4E, 0x9F, 0x8B, 0x94, 0x43, 0x51, 0x0F, 0xAB, 0x82, 0x19, 0x25, 0x94,
    0x46, 0xEE,
];

fn ack_reply(salt: Option<u32>) -> Vec<u8> {
    let mut buf = vec![0u8; 42];
    buf[18] = 0x7E;
    if let Some(salt) = salt {
        buf[38..42].copy_from_slice(&salt.to_be_bytes());
    }
    buf
}

/// Answer the RPTL/RPTK/RPTC exchange, returning the socket and the three
/// frames the client sent
fn serve_handshake(server: UdpSocket) -> thread::JoinHandle<(UdpSocket, Vec<Vec<u8>>)> {
    thread::spawn(move || {
        let mut frames = Vec::new();
        let mut buf = [0u8; 512];

        let (len, peer) = server.recv_from(&mut buf).expect("no RPTL");
        frames.push(buf[..len].to_vec());
        server.send_to(&ack_reply(Some(SALT)), peer).unwrap();

        let (len, peer) = server.recv_from(&mut buf).expect("no RPTK");
        frames.push(buf[..len].to_vec());
        server.send_to(&ack_reply(None), peer).unwrap();

        let (len, peer) = server.recv_from(&mut buf).expect("no RPTC");
        frames.push(buf[..len].to_vec());
        server.send_to(&ack_reply(None), peer).unwrap();

        (server, frames)
    })
}

fn connect_session() -> (Arc<FneSession>, UdpSocket, Vec<Vec<u8>>) {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let handle = serve_handshake(server);

    let session = Arc::new(FneSession::new("127.0.0.1", port, PEER_ID, "PASSWORD"));
    session.connect().expect("handshake failed");
    assert!(session.is_connected());

    let (server, frames) = handle.join().unwrap();
    (session, server, frames)
}

/// Next datagram that is not a keep-alive PING
fn recv_non_ping(server: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 512];
    loop {
        let (len, _) = server.recv_from(&mut buf).expect("no frame from gateway");
        if len >= 32 && buf[18] == 0x74 {
            continue;
        }
        return buf[..len].to_vec();
    }
}

fn voice_frame(talkgroup: u32, source_id: u32, voice_index: u8, fill: u8) -> VoiceFrame {
    VoiceFrame {
        nac: 0x293,
        talkgroup,
        source_id,
        frame_type: FRAME_TYPE_LDU1,
        voice_index,
        flags: 0,
        reserved: 0,
        imbe: [fill; 11],
    }
}

#[test]
fn handshake_is_byte_exact() {
    let (session, _server, frames) = connect_session();

    // RPTL: header + magic + peer id
    let rptl = &frames[0];
    assert_eq!(rptl.len(), 40);
    assert_eq!(rptl[0], 0x90);
    assert_eq!(rptl[1], 0x56);
    assert_eq!(&rptl[2..4], &[0x00, 0x00]); // First sequence of the session
    assert_eq!(&rptl[4..8], &160u32.to_be_bytes()); // First timestamp
    assert_eq!(rptl[18], 0x60);
    assert_eq!(rptl[19], 0xFF);
    assert_eq!(&rptl[32..36], b"RPTL");
    assert_eq!(&rptl[36..40], &PEER_ID.to_be_bytes());
    let crc = u16::from_be_bytes([rptl[16], rptl[17]]);
    assert_eq!(crc, crc16_ccitt(&rptl[32..]));

    // RPTK: the salted password digest sits at offsets 40-71
    let rptk = &frames[1];
    assert_eq!(rptk.len(), 72);
    assert_eq!(rptk[18], 0x61);
    assert_eq!(&rptk[32..36], b"RPTK");
    assert_eq!(&rptk[36..40], &PEER_ID.to_be_bytes());
    assert_eq!(&rptk[40..72], &EXPECTED_KEY);
    let crc = u16::from_be_bytes([rptk[16], rptk[17]]);
    assert_eq!(crc, crc16_ccitt(&rptk[32..]));

    // RPTC: magic + reserved word + JSON peer description
    let rptc = &frames[2];
    assert_eq!(rptc[18], 0x62);
    assert_eq!(&rptc[32..36], b"RPTC");
    assert_eq!(&rptc[36..40], &[0x00, 0x00, 0x00, 0x00]);
    let body: serde_json::Value = serde_json::from_slice(&rptc[40..]).unwrap();
    assert_eq!(body["identity"], "OP25-Gateway");
    assert_eq!(body["rxFrequency"], 449_000_000u32);
    assert_eq!(body["software"], "OP25-Gateway-1.0");

    // All three steps share one login stream id
    assert_eq!(&frames[0][20..24], &frames[1][20..24]);
    assert_eq!(&frames[1][20..24], &frames[2][20..24]);

    session.disconnect();
}

#[test]
fn single_call_produces_grant_ldu1_and_terminator() {
    let (session, server, _) = connect_session();

    // Let the first keep-alive PING clear before driving the call
    thread::sleep(Duration::from_millis(200));

    let calls = CallManager::new(
        Arc::clone(&session) as Arc<dyn StreamSink>,
        0,
        0,
        Duration::from_millis(1000),
    );

    for i in 0..9u8 {
        calls.handle_frame(&voice_frame(1001, 5001, i, 0xB0 + i));
    }

    // Grant-demand TDU opens the call
    let tdu = recv_non_ping(&server);
    assert_eq!(tdu.len(), 56);
    assert_eq!(tdu[18], 0x00); // Protocol function
    assert_eq!(tdu[19], 0x01); // P25 sub-function
    assert_eq!(&tdu[28..32], &24u32.to_be_bytes());
    let payload = &tdu[32..];
    assert_eq!(&payload[0..4], b"P25D");
    assert_eq!(payload[22], 0x03); // TDU DUID
    assert_eq!(payload[14], 0x80); // Grant demand flag
    assert_eq!(&payload[5..8], &[0x00, 0x13, 0x89]); // Source 5001
    assert_eq!(&payload[8..11], &[0x00, 0x03, 0xE9]); // Talkgroup 1001
    let tdu_seq = u16::from_be_bytes([tdu[2], tdu[3]]);

    // First LDU1 follows with the new-call trailer and all nine payloads
    let ldu1 = recv_non_ping(&server);
    assert_eq!(ldu1.len(), 233);
    assert_eq!(&ldu1[28..32], &201u32.to_be_bytes());
    let crc = u16::from_be_bytes([ldu1[16], ldu1[17]]);
    assert_eq!(crc, crc16_ccitt(&ldu1[32..]));
    // Sequence stays monotonic within the stream
    let ldu1_seq = u16::from_be_bytes([ldu1[2], ldu1[3]]);
    assert!(ldu1_seq > tdu_seq);
    assert_ne!(ldu1_seq, 0xFFFF);
    let payload = &ldu1[32..];
    assert_eq!(payload[22], 0x05); // LDU1 DUID
    assert_eq!(payload[180], 0x01);
    assert_eq!(payload[181], 0x80);
    let slots = [34usize, 47, 65, 82, 99, 116, 133, 150, 166];
    for (i, &off) in slots.iter().enumerate() {
        assert_eq!(&payload[off..off + 11], &[0xB0 + i as u8; 11]);
    }

    // Stopping the manager closes the call with an end-of-call terminator
    calls.stop();
    let term = recv_non_ping(&server);
    assert_eq!(term.len(), 56);
    assert_eq!(&term[2..4], &[0xFF, 0xFF]);
    assert_eq!(term[32 + 4], 0x0F); // Call-termination LCO
    assert_eq!(term[32 + 22], 0x03);

    session.disconnect();
}

#[test]
fn idle_timeout_terminates_call() {
    let (session, server, _) = connect_session();
    thread::sleep(Duration::from_millis(200));

    let calls = CallManager::new(
        Arc::clone(&session) as Arc<dyn StreamSink>,
        0,
        0,
        Duration::from_millis(200),
    );
    calls.start().unwrap();

    calls.handle_frame(&voice_frame(1001, 5001, 0, 0x11));

    let tdu = recv_non_ping(&server);
    assert_eq!(tdu[32 + 14], 0x80);

    // The supervisor wakes every 100 ms; the terminator lands well inside
    // the server's 5-second window
    let term = recv_non_ping(&server);
    assert_eq!(&term[2..4], &[0xFF, 0xFF]);
    assert_eq!(term[32 + 4], 0x0F);

    calls.stop();
    session.disconnect();
}

#[test]
fn talkgroup_override_rewrites_destination() {
    let (session, server, _) = connect_session();
    thread::sleep(Duration::from_millis(200));

    let calls = CallManager::new(
        Arc::clone(&session) as Arc<dyn StreamSink>,
        777,
        0,
        Duration::from_millis(1000),
    );

    for i in 0..9u8 {
        calls.handle_frame(&voice_frame(1001, 5001, i, 0x22));
    }

    let tdu = recv_non_ping(&server);
    assert_eq!(&tdu[32 + 8..32 + 11], &[0x00, 0x03, 0x09]); // 777

    let ldu1 = recv_non_ping(&server);
    assert_eq!(&ldu1[32 + 8..32 + 11], &[0x00, 0x03, 0x09]);

    calls.stop();
    let term = recv_non_ping(&server);
    assert_eq!(&term[32 + 8..32 + 11], &[0x00, 0x03, 0x09]);

    session.disconnect();
}

#[test]
fn full_pipeline_from_ingress_datagrams() {
    let (session, server, _) = connect_session();
    thread::sleep(Duration::from_millis(200));

    let calls = Arc::new(CallManager::new(
        Arc::clone(&session) as Arc<dyn StreamSink>,
        0,
        0,
        Duration::from_millis(1000),
    ));

    let ingress_port = 39321;
    let mut receiver = op25_gateway::ingress::IngressReceiver::new(ingress_port);
    receiver.start(Arc::clone(&calls)).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .connect(("127.0.0.1", ingress_port))
        .unwrap();

    // One garbage datagram, then a full nine-frame group
    sender.send(&[0u8; 10]).unwrap();
    for i in 0..9u8 {
        sender
            .send(&voice_frame(1001, 5001, i, 0x40 + i).to_bytes())
            .unwrap();
    }

    let tdu = recv_non_ping(&server);
    assert_eq!(tdu[32 + 14], 0x80); // Grant demand

    let ldu1 = recv_non_ping(&server);
    assert_eq!(ldu1.len(), 233);
    let slots = [34usize, 47, 65, 82, 99, 116, 133, 150, 166];
    for (i, &off) in slots.iter().enumerate() {
        assert_eq!(&ldu1[32 + off..32 + off + 11], &[0x40 + i as u8; 11]);
    }

    let stats = receiver.stats();
    assert_eq!(stats.received.load(std::sync::atomic::Ordering::Relaxed), 9);
    assert_eq!(stats.invalid.load(std::sync::atomic::Ordering::Relaxed), 1);

    receiver.stop();
    calls.stop();
    let term = recv_non_ping(&server);
    assert_eq!(&term[2..4], &[0xFF, 0xFF]);

    session.disconnect();
}

#[test]
fn handshake_times_out_against_silent_server() {
    // A bound socket that never answers: connect must fail, not hang
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();

    let session = FneSession::new("127.0.0.1", port, PEER_ID, "PASSWORD");
    let start = std::time::Instant::now();
    assert!(session.connect().is_err());
    assert!(!session.is_connected());
    assert!(start.elapsed() < Duration::from_secs(10));
}
