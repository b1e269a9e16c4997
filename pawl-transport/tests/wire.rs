//! Wire-level tests.
//!
//! A raw protocol peer built straight from `pawl-core` sits on the
//! other end of a real session, so the bytes a session emits can be
//! inspected and the bytes it swallows can be forged.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use pawl_core::crypto::PublicKey;
use pawl_core::frame::{read_frame, write_frame};
use pawl_core::{KeyPair, MAX_FRAME_LEN, RatchetMessage, RatchetState};
use pawl_transport::{Session, handshake};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("loopback address")
}

/// Stand up a client session dialing a raw listener owned by the test.
async fn session_against_raw_peer() -> (Session, mpsc::Receiver<Vec<u8>>, TcpStream, RatchetState)
{
    let listener = TcpListener::bind(loopback()).await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let mut client = Session::client(loopback(), addr).expect("client session");
    client.start();
    let client_rx = client.take_receiver().expect("client receiver");

    let (mut stream, _) = listener.accept().await.expect("accept");
    let state = handshake::server(&mut stream).await.expect("handshake");
    (client, client_rx, stream, state)
}

async fn expect_closed(rx: &mut mpsc::Receiver<Vec<u8>>) {
    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for the inbound channel to close");
    assert_eq!(received, None, "plaintext was delivered");
}

#[tokio::test]
async fn wire_public_keys_rotate_across_a_full_turn() {
    let (mut client, mut client_rx, mut stream, mut state) = session_against_raw_peer().await;

    // client speaks first
    client.sender().send(b"q".to_vec()).await.expect("send");
    let q = RatchetMessage::from_bytes(&read_frame(&mut stream).await.expect("frame"))
        .expect("parse");
    assert_eq!(state.open(&q).expect("open"), b"q");
    assert_eq!(q.count, 0);

    // we answer; answering rotates our wire key
    let r = state.seal(b"r").expect("seal");
    write_frame(&mut stream, &r.to_bytes().expect("encode"))
        .await
        .expect("write");
    let got = timeout(Duration::from_secs(5), client_rx.recv())
        .await
        .expect("timely reply")
        .expect("open channel");
    assert_eq!(got, b"r");
    assert_eq!(r.count, 0);

    // the client's next message opens a new chain under a new key
    client.sender().send(b"s".to_vec()).await.expect("send");
    let s = RatchetMessage::from_bytes(&read_frame(&mut stream).await.expect("frame"))
        .expect("parse");
    assert_eq!(state.open(&s).expect("open"), b"s");
    assert_eq!(s.count, 0);

    assert_ne!(r.public_key, q.public_key);
    assert_ne!(s.public_key, q.public_key);
    assert_ne!(s.public_key, r.public_key);

    client.stop().await;
}

#[tokio::test]
async fn handshake_frames_carry_bare_keys_and_first_chain_rides_the_second() {
    // manual handshake so the handshake frames themselves are visible
    let listener = TcpListener::bind(loopback()).await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let mut client = Session::client(loopback(), addr).expect("client session");
    client.start();

    let (mut stream, _) = listener.accept().await.expect("accept");

    let first = KeyPair::generate();
    let client_first = read_frame(&mut stream).await.expect("round one");
    assert_eq!(client_first.len(), 32);
    write_frame(&mut stream, &first.public_bytes())
        .await
        .expect("write");
    let round_one: [u8; 32] = client_first.as_slice().try_into().expect("key size");
    let shared = first.agree(&PublicKey::from(round_one));

    let local = KeyPair::generate();
    let client_second = read_frame(&mut stream).await.expect("round two");
    assert_eq!(client_second.len(), 32);
    write_frame(&mut stream, &local.public_bytes())
        .await
        .expect("write");
    let round_two: [u8; 32] = client_second.as_slice().try_into().expect("key size");
    let mut state = RatchetState::new(shared, local, PublicKey::from(round_two));

    assert_ne!(round_one, round_two, "handshake rounds reused a key");

    client.sender().send(b"hello".to_vec()).await.expect("send");
    let message = RatchetMessage::from_bytes(&read_frame(&mut stream).await.expect("frame"))
        .expect("parse");

    // the first chain is keyed by the pair retained from round two,
    // not the round-one pair the root secret came from
    assert_eq!(message.public_key, round_two);
    assert_ne!(message.public_key, round_one);
    assert_eq!(message.count, 0);
    assert_eq!(state.open(&message).expect("open"), b"hello");

    client.stop().await;
}

#[tokio::test]
async fn wire_format_is_the_agreed_json() {
    let (mut client, _client_rx, mut stream, _state) = session_against_raw_peer().await;

    client.sender().send(b"shape".to_vec()).await.expect("send");
    let payload = read_frame(&mut stream).await.expect("frame");
    let value: serde_json::Value = serde_json::from_slice(&payload).expect("json");

    let object = value.as_object().expect("object");
    for field in ["Count", "Nonce", "Message", "PublicKey"] {
        assert!(object.contains_key(field), "missing {field}");
    }
    assert!(value["Count"].is_i64());
    assert!(value["Nonce"].is_string());
    assert!(value["Message"].is_string());
    assert!(value["PublicKey"].is_string());

    client.stop().await;
}

#[tokio::test]
async fn tampered_ciphertext_is_never_delivered() {
    let (mut client, mut client_rx, mut stream, mut state) = session_against_raw_peer().await;

    let mut message = state.seal(b"sealed tight").expect("seal");
    message.ciphertext[0] ^= 0x01;
    write_frame(&mut stream, &message.to_bytes().expect("encode"))
        .await
        .expect("write");

    // the listener exits on the authentication failure and the
    // inbound channel closes without a delivery
    expect_closed(&mut client_rx).await;
    client.stop().await;
}

#[tokio::test]
async fn garbage_payload_kills_the_session() {
    let (mut client, mut client_rx, mut stream, _state) = session_against_raw_peer().await;

    write_frame(&mut stream, b"{\"not\": \"a ratchet message\"")
        .await
        .expect("write");

    expect_closed(&mut client_rx).await;
    client.stop().await;
}

#[tokio::test]
async fn oversize_announcement_kills_the_session_without_a_read() {
    let (mut client, mut client_rx, mut stream, _state) = session_against_raw_peer().await;

    // advertise a payload over the ceiling and then send nothing:
    // the session must die on the announcement alone
    let huge = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
    stream.write_all(&huge).await.expect("write");
    stream.flush().await.expect("flush");

    expect_closed(&mut client_rx).await;
    client.stop().await;
}

#[tokio::test]
async fn forged_extreme_count_kills_the_session_without_panic() {
    let (mut client, mut client_rx, mut stream, mut state) = session_against_raw_peer().await;

    // a well-formed frame whose index claims the far end of i32: the
    // session must die on a rejection, not an overflow
    let mut message = state.seal(b"bait").expect("seal");
    message.count = i32::MAX;
    write_frame(&mut stream, &message.to_bytes().expect("encode"))
        .await
        .expect("write");

    expect_closed(&mut client_rx).await;
    client.stop().await;
}

#[tokio::test]
async fn replayed_frame_kills_the_session() {
    let (mut client, mut client_rx, mut stream, mut state) = session_against_raw_peer().await;

    let first = state.seal(b"one").expect("seal");
    let second = state.seal(b"two").expect("seal");
    let second_bytes = second.to_bytes().expect("encode");

    write_frame(&mut stream, &first.to_bytes().expect("encode"))
        .await
        .expect("write");
    write_frame(&mut stream, &second_bytes).await.expect("write");

    let got = timeout(Duration::from_secs(5), client_rx.recv())
        .await
        .expect("timely")
        .expect("open channel");
    assert_eq!(got, b"one");
    let got = timeout(Duration::from_secs(5), client_rx.recv())
        .await
        .expect("timely")
        .expect("open channel");
    assert_eq!(got, b"two");

    // an index the receiving chain has passed is refused outright
    write_frame(&mut stream, &first.to_bytes().expect("encode"))
        .await
        .expect("write");
    expect_closed(&mut client_rx).await;

    client.stop().await;
}
