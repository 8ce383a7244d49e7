//! Tests for dynamic command routing and connection registration

use rustircc_core::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MockProtocol;

#[async_trait]
impl Protocol for MockProtocol {
    fn parse(&self, mut config: NetworkConfig, short_form: Option<&str>) -> Result<NetworkConfig> {
        if let Some(short) = short_form {
            config.host = short.to_string();
        }
        if config.host.is_empty() {
            return Err(Error::Config("host is required".to_string()));
        }
        Ok(config)
    }

    async fn setup(&self, _client: &Client, _config: &NetworkConfig) -> Result<Transport> {
        let (local, _remote) = tokio::io::duplex(256);
        Ok(Transport::from_stream(local))
    }
}

/// Connect command that completes the handshake immediately
async fn instant_connect(client: Client, args: CommandArgs) -> Result<()> {
    let id = args.text_at(0).unwrap().to_string();
    let conn = client.connections().lookup(&id).unwrap();
    conn.set_state(ReadyState::Handshaking);
    conn.mark_ready(&client);
    Ok(())
}

/// Connect command that leaves the connection handshaking
async fn stalled_connect(client: Client, args: CommandArgs) -> Result<()> {
    let id = args.text_at(0).unwrap().to_string();
    let conn = client.connections().lookup(&id).unwrap();
    conn.set_state(ReadyState::Handshaking);
    Ok(())
}

type Captured = Arc<Mutex<Vec<(usize, Vec<String>)>>>;

fn capture_command(client: &Client, protocol: &str, command: &str) -> Captured {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    client.define(protocol, command, move |_, args: CommandArgs| {
        let sink = sink.clone();
        async move {
            let texts = args.texts().iter().map(|s| s.to_string()).collect();
            sink.lock().unwrap().push((args.len(), texts));
            Ok(())
        }
    });
    captured
}

fn mock_client() -> Client {
    let client = Client::new();
    client.register_protocol("mock", Arc::new(MockProtocol));
    client.define("mock", "connect", instant_connect);
    client
}

fn mock_config(name: Option<&str>) -> NetworkConfig {
    NetworkConfig {
        host: "mock.example.org".to_string(),
        protocol: "mock".to_string(),
        name: name.map(str::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_sequential_identifier_assignment_via_add() {
    let client = mock_client();
    for expected in ["0", "1", "2"] {
        let id = client.add(mock_config(None)).await.unwrap();
        assert_eq!(id, expected);
    }
    assert_eq!(client.connection_ids(), vec!["0", "1", "2"]);
}

#[tokio::test]
async fn test_duplicate_name_fails_without_overwriting() {
    let client = mock_client();
    client.add(mock_config(Some("home"))).await.unwrap();
    let before = client.connections().lookup("home").unwrap();

    let err = client.add(mock_config(Some("home"))).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateId(name) if name == "home"));

    let after = client.connections().lookup("home").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_dispatch_preserves_argument_list() {
    let client = mock_client();
    let captured = capture_command(&client, "mock", "cmdx");
    let id = client.add(mock_config(None)).await.unwrap();

    client
        .invoke(
            "cmdx",
            CommandArgs::new().arg("a").arg("b").arg(&id),
        )
        .await
        .unwrap();

    let calls = captured.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (len, texts) = &calls[0];
    assert_eq!(*len, 3);
    assert_eq!(texts, &vec!["a".to_string(), "b".to_string(), id]);
}

#[tokio::test]
async fn test_dispatch_keeps_trailing_callback_in_args() {
    let client = mock_client();
    let captured = capture_command(&client, "mock", "cmdx");
    let id = client.add(mock_config(None)).await.unwrap();
    let completed = Arc::new(AtomicUsize::new(0));

    let flag = completed.clone();
    client
        .invoke(
            "cmdx",
            CommandArgs::new()
                .arg("a")
                .arg(&id)
                .arg_callback(move || {
                    flag.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await
        .unwrap();

    let calls = captured.lock().unwrap();
    assert_eq!(calls.len(), 1);
    // the callback is routed around, not stripped
    assert_eq!(calls[0].0, 3);
    assert_eq!(calls[0].1, vec!["a".to_string(), id]);
}

#[tokio::test]
async fn test_dispatch_routes_by_connection_protocol() {
    let client = mock_client();
    client.register_protocol("alt", Arc::new(MockProtocol));
    client.define("alt", "connect", instant_connect);

    let on_mock = capture_command(&client, "mock", "who");
    let on_alt = capture_command(&client, "alt", "who");

    let mock_id = client.add(mock_config(None)).await.unwrap();
    let mut alt_config = mock_config(None);
    alt_config.protocol = "alt".to_string();
    let alt_id = client.add(alt_config).await.unwrap();

    client
        .invoke("who", CommandArgs::new().arg(&alt_id))
        .await
        .unwrap();
    client
        .invoke("who", CommandArgs::new().arg(&mock_id))
        .await
        .unwrap();

    assert_eq!(on_mock.lock().unwrap().len(), 1);
    assert_eq!(on_alt.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_command_fails() {
    let client = mock_client();
    let id = client.add(mock_config(None)).await.unwrap();

    let err = client
        .invoke("no_such_command", CommandArgs::new().arg(&id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownCommand { protocol, command }
            if protocol == "mock" && command == "no_such_command"
    ));
}

#[tokio::test]
async fn test_unrecognized_id_falls_back_to_default_protocol() {
    let client = mock_client();
    // "irc" has no descriptor here, but command tables are open
    let captured = capture_command(&client, "irc", "cmdx");

    client
        .invoke("cmdx", CommandArgs::new().arg("no-such-connection"))
        .await
        .unwrap();

    assert_eq!(captured.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invocations_deferred_until_ready() {
    let client = mock_client();
    client.register_protocol("slow", Arc::new(MockProtocol));
    client.define("slow", "connect", stalled_connect);
    let captured = capture_command(&client, "slow", "cmdx");

    let mut config = mock_config(None);
    config.protocol = "slow".to_string();
    let id = client.add(config).await.unwrap();
    let conn = client.connections().lookup(&id).unwrap();
    assert_eq!(conn.state(), ReadyState::Handshaking);

    client
        .invoke("cmdx", CommandArgs::new().arg("early").arg(&id))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(captured.lock().unwrap().is_empty());

    conn.mark_ready(&client);
    for _ in 0..50 {
        if !captured.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let calls = captured.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec!["early".to_string(), id]);
}
