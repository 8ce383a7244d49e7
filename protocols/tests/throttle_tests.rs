//! Write-throttling timing tests over a loopback connection

use rustircc_core::*;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

async fn ready_session(
    throttling: ThrottleSetting,
) -> (Client, String, BufReader<tokio::net::TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::with_throttling(ThrottleSetting::Flag(false));
    rustircc_protocols::register(&client);

    let config = NetworkConfig {
        host: "127.0.0.1".to_string(),
        port,
        nick: "alice".to_string(),
        throttling,
        ..Default::default()
    };
    let id = client.add(config).await.unwrap();

    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("timed out waiting for a connection")
        .unwrap();
    let mut reader = BufReader::new(stream);

    // Drain the handshake (CAP REQ, CAP END, NICK, USER)
    for _ in 0..4 {
        read_line(&mut reader).await;
    }
    for _ in 0..500 {
        if client.connections().lookup(&id).map(|conn| conn.state()) == Some(ReadyState::Ready) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (client, id, reader)
}

async fn read_line(reader: &mut BufReader<tokio::net::TcpStream>) -> String {
    let mut line = String::new();
    let n = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    assert!(n > 0, "connection closed while expecting a line");
    line.trim_end().to_string()
}

#[tokio::test]
async fn test_throttled_writes_are_spaced_and_ordered() {
    let (client, id, mut reader) = ready_session(ThrottleSetting::IntervalMs(100)).await;

    for i in 1..=3 {
        client
            .write(&format!("PRIVMSG #t :line {}", i), Some(id.as_str()))
            .await
            .unwrap();
    }

    let first = read_line(&mut reader).await;
    let t_first = Instant::now();
    assert_eq!(first, "PRIVMSG #t :line 1");
    assert_eq!(read_line(&mut reader).await, "PRIVMSG #t :line 2");
    assert_eq!(read_line(&mut reader).await, "PRIVMSG #t :line 3");
    let elapsed = t_first.elapsed();

    // Two refill intervals between the first and third write, with slack
    // for scheduling jitter
    assert!(
        elapsed >= Duration::from_millis(150),
        "throttled writes arrived too fast: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_disabled_throttling_passes_writes_through() {
    let (client, id, mut reader) = ready_session(ThrottleSetting::Flag(false)).await;

    for i in 1..=4 {
        client
            .write(&format!("PRIVMSG #t :line {}", i), Some(id.as_str()))
            .await
            .unwrap();
    }

    read_line(&mut reader).await;
    let t_first = Instant::now();
    for i in 2..=4 {
        assert_eq!(
            read_line(&mut reader).await,
            format!("PRIVMSG #t :line {}", i)
        );
    }
    assert!(
        t_first.elapsed() < Duration::from_millis(100),
        "unthrottled writes were delayed"
    );
}
