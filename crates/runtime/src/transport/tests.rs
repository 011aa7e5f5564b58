use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

#[test]
fn length_prefix_is_little_endian() {
    let length: u32 = 1234;
    let bytes = length.to_le_bytes();

    assert_eq!(bytes[0], (length & 0xFF) as u8);
    assert_eq!(bytes[1], ((length >> 8) & 0xFF) as u8);
    assert_eq!(bytes[2], ((length >> 16) & 0xFF) as u8);
    assert_eq!(bytes[3], ((length >> 24) & 0xFF) as u8);
    assert_eq!(u32::from_le_bytes(bytes), length);
}

#[test]
fn encode_frame_prefixes_payload_length() {
    let frame = encode_frame(serde_json::json!({"test": "hello"})).unwrap();
    let payload = serde_json::to_vec(&serde_json::json!({"test": "hello"})).unwrap();

    assert_eq!(frame.len(), 4 + payload.len());
    assert_eq!(&frame[0..4], &(payload.len() as u32).to_le_bytes());
    assert_eq!(&frame[4..], &payload[..]);
}

#[test]
fn decoder_emits_single_frame_from_one_chunk() {
    let mut decoder = FrameDecoder::new();
    let payload = b"{\"id\":1}";
    let mut chunk = (payload.len() as u32).to_le_bytes().to_vec();
    chunk.extend_from_slice(payload);

    let frames = decoder.push(&chunk).unwrap();
    assert_eq!(frames, vec![payload.to_vec()]);
    assert!(!decoder.mid_frame());
}

#[test]
fn decoder_handles_one_byte_chunks() {
    let mut decoder = FrameDecoder::new();
    let payload = b"{\"id\":42,\"result\":{}}";
    let mut stream = (payload.len() as u32).to_le_bytes().to_vec();
    stream.extend_from_slice(payload);

    let mut frames = Vec::new();
    for byte in stream {
        frames.extend(decoder.push(&[byte]).unwrap());
    }
    assert_eq!(frames, vec![payload.to_vec()]);
    assert!(!decoder.mid_frame());
}

#[test]
fn decoder_handles_chunk_boundary_inside_prefix() {
    let mut decoder = FrameDecoder::new();
    let payload = b"hello world";
    let prefix = (payload.len() as u32).to_le_bytes();

    // Split the 4-byte prefix across two chunks.
    assert!(decoder.push(&prefix[..2]).unwrap().is_empty());
    assert!(decoder.mid_frame());
    let mut tail = prefix[2..].to_vec();
    tail.extend_from_slice(payload);
    let frames = decoder.push(&tail).unwrap();
    assert_eq!(frames, vec![payload.to_vec()]);
}

#[test]
fn decoder_emits_many_frames_from_one_chunk() {
    let mut decoder = FrameDecoder::new();
    let payloads: Vec<&[u8]> = vec![b"first", b"second", b"third"];

    let mut stream = Vec::new();
    for payload in &payloads {
        stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        stream.extend_from_slice(payload);
    }
    // Leave a partial tail: prefix of a fourth frame plus half its payload.
    stream.extend_from_slice(&8u32.to_le_bytes());
    stream.extend_from_slice(b"part");

    let frames = decoder.push(&stream).unwrap();
    assert_eq!(
        frames,
        payloads.iter().map(|p| p.to_vec()).collect::<Vec<_>>()
    );
    assert!(decoder.mid_frame());

    let frames = decoder.push(b"ial!").unwrap();
    assert_eq!(frames, vec![b"partial!".to_vec()]);
    assert!(!decoder.mid_frame());
}

#[test]
fn decoder_emits_empty_frame() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.push(&0u32.to_le_bytes()).unwrap();
    assert_eq!(frames, vec![Vec::<u8>::new()]);
}

#[test]
fn decoder_rejects_absurd_length_prefix() {
    let mut decoder = FrameDecoder::new();
    let result = decoder.push(&u32::MAX.to_le_bytes());
    assert!(matches!(result, Err(Error::TransportError(_))));
}

#[test]
fn framing_round_trips_for_arbitrary_chunk_sizes() {
    let messages = vec![
        serde_json::json!({"id": 1, "result": {"value": "a"}}),
        serde_json::json!({"guid": "page@1", "method": "close", "params": {}}),
        serde_json::json!({"id": 2, "error": {"error": {"message": "x".repeat(500)}}}),
    ];

    let mut stream = Vec::new();
    for message in &messages {
        let payload = serde_json::to_vec(message).unwrap();
        stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        stream.extend_from_slice(&payload);
    }

    for chunk_size in [1, 2, 3, 5, 7, 64, stream.len()] {
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            for frame in decoder.push(chunk).unwrap() {
                decoded.push(serde_json::from_slice::<serde_json::Value>(&frame).unwrap());
            }
        }
        assert_eq!(decoded, messages, "chunk size {chunk_size}");
        assert!(!decoder.mid_frame());
    }
}

#[tokio::test]
async fn send_writes_camelized_frame() {
    let (mut stdin_read, stdin_write) = tokio::io::duplex(1024);
    let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

    let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
    let (mut sender, _receiver) = transport.into_parts();

    sender
        .send(serde_json::json!({
            "id": 1,
            "guid": "",
            "method": "initialize",
            "params": {"sdk_language": "rust", "timeout": 30000},
        }))
        .await
        .unwrap();

    let mut len_buf = [0u8; 4];
    stdin_read.read_exact(&mut len_buf).await.unwrap();
    let length = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; length];
    stdin_read.read_exact(&mut payload).await.unwrap();

    let received: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(received["method"], "initialize");
    assert_eq!(received["params"]["sdkLanguage"], "rust");
    assert_eq!(received["params"]["timeout"], 30000);
    assert!(received["params"].get("sdk_language").is_none());
}

#[tokio::test]
async fn receives_messages_in_sequence_as_snake_case() {
    let (_stdin_read, stdin_write) = tokio::io::duplex(4096);
    let (stdout_read, mut stdout_write) = tokio::io::duplex(4096);

    let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
    let read_task = tokio::spawn(async move { transport.run().await });

    let wire_messages = vec![
        serde_json::json!({"id": 1, "result": {"wallTime": 5}}),
        serde_json::json!({"guid": "page@1", "method": "pageError", "params": {}}),
        serde_json::json!({"id": 2, "result": {}}),
    ];

    for message in &wire_messages {
        let payload = serde_json::to_vec(message).unwrap();
        stdout_write
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stdout_write.write_all(&payload).await.unwrap();
    }
    stdout_write.flush().await.unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first["result"]["wall_time"], 5);
    let second = rx.recv().await.unwrap();
    assert_eq!(second["method"], "page_error");
    let third = rx.recv().await.unwrap();
    assert_eq!(third["id"], 2);

    drop(stdout_write);
    drop(rx);
    let _ = read_task.await;
}

#[tokio::test]
async fn large_message_crosses_read_chunks() {
    let (_stdin_read, stdin_write) = tokio::io::duplex(1024 * 1024);
    let (stdout_read, mut stdout_write) = tokio::io::duplex(1024 * 1024);

    let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
    let read_task = tokio::spawn(async move { transport.run().await });

    let large = serde_json::json!({"id": 1, "result": {"data": "x".repeat(100_000)}});
    let payload = serde_json::to_vec(&large).unwrap();
    assert!(payload.len() > READ_CHUNK_BYTES);

    stdout_write
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stdout_write.write_all(&payload).await.unwrap();
    stdout_write.flush().await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received, large);

    drop(stdout_write);
    drop(rx);
    let _ = read_task.await;
}

#[tokio::test]
async fn truncated_stream_is_a_fatal_error() {
    let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
    let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

    let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

    // Two bytes of a length prefix, then EOF.
    stdout_write.write_all(&[0x01, 0x02]).await.unwrap();
    stdout_write.flush().await.unwrap();
    drop(stdout_write);

    let result = transport.run().await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("mid-frame"), "got: {err}");
}

#[tokio::test]
async fn malformed_payload_is_a_fatal_error() {
    let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
    let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

    let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

    let payload = b"not json at all";
    stdout_write
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stdout_write.write_all(payload).await.unwrap();
    stdout_write.flush().await.unwrap();

    let result = transport.run().await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("malformed frame payload"), "got: {err}");
}

#[tokio::test]
async fn clean_eof_at_frame_boundary_shuts_down() {
    let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
    let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

    let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);

    let payload = serde_json::to_vec(&serde_json::json!({"id": 1, "result": {}})).unwrap();
    stdout_write
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stdout_write.write_all(&payload).await.unwrap();
    stdout_write.flush().await.unwrap();
    drop(stdout_write);

    let result = transport.run().await;
    assert!(result.is_ok());
    drop(transport);

    let received = rx.recv().await.unwrap();
    assert_eq!(received["id"], 1);
    assert!(rx.recv().await.is_none());
}
