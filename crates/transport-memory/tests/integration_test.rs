//! Integration tests for memory transport

use bytes::Bytes;
use nexus_transport::Transport;
use nexus_transport_memory::MemoryTransport;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

#[tokio::test]
async fn test_memory_echo_server() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::new_default();
    let listener = transport
        .listen("mem-echo")
        .await
        .expect("Failed to create listener");

    // Start echo server
    let server_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok(conn) => {
                    info!("Server accepted connection");

                    tokio::spawn(async move {
                        loop {
                            match conn.recv().await {
                                Ok(data) => {
                                    info!("Server echoing {} bytes", data.len());
                                    if let Err(e) = conn.send(data).await {
                                        info!("Server send error: {}", e);
                                        break;
                                    }
                                }
                                Err(e) => {
                                    info!("Server receive error: {}", e);
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    info!("Accept error: {}", e);
                    break;
                }
            }
        }
    });

    let client = transport
        .connect("mem-echo")
        .await
        .expect("Failed to connect");

    let test_messages = vec![
        Bytes::from("Hello, Memory!"),
        Bytes::from("Test message 2"),
        Bytes::from("🦀 Rust is awesome!"),
    ];

    for msg in test_messages {
        client.send(msg.clone()).await.expect("Failed to send");

        let response = timeout(Duration::from_secs(1), client.recv())
            .await
            .expect("Timeout")
            .expect("Failed to receive");

        assert_eq!(msg, response);
    }

    client.close().await.expect("Failed to close client");
    server_task.abort();
}

#[tokio::test]
async fn test_multiple_clients() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::new_default();
    let listener = transport
        .listen("mem-multi")
        .await
        .expect("Failed to create listener");

    // Server tags each reply with the order connections arrived in
    let server_task = tokio::spawn(async move {
        let mut connection_count = 0u32;
        while let Ok(conn) = listener.accept().await {
            connection_count += 1;
            let tag = connection_count;
            tokio::spawn(async move {
                while let Ok(data) = conn.recv().await {
                    let mut reply = format!("{tag}:").into_bytes();
                    reply.extend_from_slice(&data);
                    if conn.send(Bytes::from(reply)).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let first = transport.connect("mem-multi").await.expect("connect");
    let second = transport.connect("mem-multi").await.expect("connect");

    first.send(Bytes::from("a")).await.expect("send");
    second.send(Bytes::from("b")).await.expect("send");

    let first_reply = timeout(Duration::from_secs(1), first.recv())
        .await
        .expect("Timeout")
        .expect("recv");
    let second_reply = timeout(Duration::from_secs(1), second.recv())
        .await
        .expect("Timeout")
        .expect("recv");

    assert_eq!(first_reply, Bytes::from("1:a"));
    assert_eq!(second_reply, Bytes::from("2:b"));

    server_task.abort();
}
