/// Integration test: the control-frame codec over a real TCP socket pair,
/// including the length-prefix framing boundary (a frame split across two
/// reads, and two frames arriving back to back in one read).
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use goexpose_proto::protocol::FrameCodec;
use goexpose_proto::{ControlFrame, FrameType};

#[tokio::test]
async fn frames_survive_tcp_fragmentation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let codec = FrameCodec::default();
        let a = codec.read_frame(&mut sock).await.unwrap();
        let b = codec.read_frame(&mut sock).await.unwrap();
        (a, b)
    });

    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    let codec = FrameCodec::default();

    let first = ControlFrame::expose_tcp(25565);
    let second = ControlFrame::connect(25565, 47925);

    // Write the first frame one byte at a time to force the reader to
    // assemble it across many partial reads.
    let wire = codec.encode(&first).unwrap();
    for byte in &wire {
        client.write_all(std::slice::from_ref(byte)).await.unwrap();
    }

    // Write the second frame whole, immediately after — the reader must
    // not confuse it with trailing bytes of the first.
    let wire2 = codec.encode(&second).unwrap();
    client.write_all(&wire2).await.unwrap();

    let (a, b) = server.await.unwrap();
    assert_eq!(a, first);
    assert_eq!(b, second);
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected_without_reading_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let codec = FrameCodec::new(16);
        codec.read_frame(&mut sock).await
    });

    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    // Claim a 1000-byte body but never send it; the codec must reject based
    // on the length prefix alone.
    client.write_all(&1000u16.to_be_bytes()).await.unwrap();

    let result = server.await.unwrap();
    assert!(result.is_err());
}

#[test]
fn stop_frame_type_is_never_encodable() {
    let codec = FrameCodec::default();
    let stop = ControlFrame { typ: FrameType::Stop, data: vec![] };
    assert!(codec.encode(&stop).is_err());
}
