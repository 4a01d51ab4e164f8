use anyhow::Result;
use fixtured::dispatch::Dispatcher;
use fixtured::events::{ChannelSink, DataEvent, ServerEvent, StatusEvent};
use fixtured::ingest_log::{IngestLog, IngestStatus};
use fixtured::logger::NoopLogger;
use fixtured::server::{ServerState, TcpIngestServer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

fn free_port() -> Result<u16> {
    let sock = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = sock.local_addr()?.port();
    drop(sock);
    Ok(port)
}

fn test_message(path: &Path, result_path: Option<&Path>) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?><TestResult><BlockTestComplete>");
    xml.push_str(&format!("<Path>{}</Path>", path.display()));
    if let Some(rp) = result_path {
        xml.push_str(&format!("<ResultPath>{}</ResultPath>", rp.display()));
    }
    xml.push_str("</BlockTestComplete></TestResult>");
    xml
}

async fn recv(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn server_with_sink(landing: &Path) -> (TcpIngestServer, UnboundedReceiver<ServerEvent>) {
    let (sink, rx) = ChannelSink::new();
    let dispatcher = Dispatcher::new(landing.to_path_buf(), Arc::new(NoopLogger));
    let server = TcpIngestServer::new(dispatcher, Arc::new(sink))
        .ingest_log(IngestLog::new(landing));
    (server, rx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fragmented_message_is_ingested_end_to_end() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("block7.log");
    let res = tmp.path().join("block7.res");
    std::fs::write(&src, b"pin failures")?;
    std::fs::write(&res, b"result data")?;
    let landing = tmp.path().join("landing");

    let (server, mut rx) = server_with_sink(&landing);
    let port = free_port()?;
    let addr = server.start("127.0.0.1", port).await?;
    assert_eq!(addr.port(), port);
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Status(StatusEvent::Running {
            host: "127.0.0.1".into(),
            port
        })
    );

    let message = test_message(&src, Some(&res));
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let client = stream.local_addr()?.to_string();
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Status(StatusEvent::ClientConnected {
            client: client.clone()
        })
    );

    // Deliver in three fragments to exercise reassembly across reads.
    let bytes = message.as_bytes();
    for chunk in [&bytes[..10], &bytes[10..25], &bytes[25..]] {
        stream.write_all(chunk).await?;
        stream.flush().await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Data(DataEvent::Data {
            client: client.clone(),
            data: message.clone()
        })
    );

    drop(stream);
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Status(StatusEvent::ClientDisconnected { client })
    );

    // Dispatch completes before the connection loop advances, so by the
    // disconnect event both copies have landed.
    assert_eq!(std::fs::read(landing.join("block7.log"))?, b"pin failures");
    assert_eq!(std::fs::read(landing.join("block7.res"))?, b"result data");

    let entries = IngestLog::new(&landing).read_log()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, IngestStatus::Decoded);
    assert_eq!(entries[0].blocks, 1);
    assert_eq!(entries[0].files_copied, 2);
    assert_eq!(entries[0].copy_errors, 0);

    server.stop().await;
    assert_eq!(recv(&mut rx).await, ServerEvent::Status(StatusEvent::Stopped));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decode_failure_keeps_the_connection_alive() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("ok.log");
    std::fs::write(&src, b"ok")?;
    let landing = tmp.path().join("landing");

    let (server, mut rx) = server_with_sink(&landing);
    let port = free_port()?;
    server.start("127.0.0.1", port).await?;
    recv(&mut rx).await; // running

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let client = stream.local_addr()?.to_string();
    recv(&mut rx).await; // client-connected

    let bad = "<?xml version=\"1.0\"?><TestResult><Oops></TestResult>";
    let good = test_message(&src, None);
    stream.write_all(bad.as_bytes()).await?;
    stream.write_all(good.as_bytes()).await?;
    stream.flush().await?;

    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Data(DataEvent::Data {
            client: client.clone(),
            data: bad.to_string()
        })
    );
    let ServerEvent::Data(DataEvent::Error { message }) = recv(&mut rx).await else {
        panic!("expected decode error event");
    };
    assert!(message.starts_with("XML parsing error"));

    // The malformed message did not close the connection; the next message
    // decodes and dispatches normally.
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Data(DataEvent::Data {
            client: client.clone(),
            data: good.clone()
        })
    );
    drop(stream);
    recv(&mut rx).await; // client-disconnected
    assert!(landing.join("ok.log").exists());

    let entries = IngestLog::new(&landing).read_log()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].status, IngestStatus::DecodeFailed);
    assert_eq!(entries[1].status, IngestStatus::Decoded);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn double_start_fails_and_leaves_one_listener() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, mut rx) = server_with_sink(&tmp.path().join("landing"));
    let port = free_port()?;

    let addr = server.start("127.0.0.1", port).await?;
    recv(&mut rx).await; // running

    let err = server.start("127.0.0.1", port).await.unwrap_err();
    assert!(err.to_string().contains("already running"));
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Status(StatusEvent::Error {
            message: "server is already running".into()
        })
    );

    // The original listener still accepts.
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(server.local_addr(), Some(addr));
    let _stream = TcpStream::connect(("127.0.0.1", port)).await?;
    recv(&mut rx).await; // client-connected

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_when_not_running_emits_stopped_once() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, mut rx) = server_with_sink(&tmp.path().join("landing"));

    assert_eq!(server.state(), ServerState::Stopped);
    server.stop().await;
    assert_eq!(recv(&mut rx).await, ServerEvent::Status(StatusEvent::Stopped));
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_failure_reverts_to_stopped() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, mut rx) = server_with_sink(&tmp.path().join("landing"));

    // Hold the port so the bind fails.
    let blocker = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = blocker.local_addr()?.port();

    assert!(server.start("127.0.0.1", port).await.is_err());
    let ServerEvent::Status(StatusEvent::Error { message }) = recv(&mut rx).await else {
        panic!("expected bind error event");
    };
    assert!(message.contains("bind"));
    assert_eq!(server.state(), ServerState::Stopped);

    // A later start on a free port succeeds.
    drop(blocker);
    server.start("127.0.0.1", port).await?;
    assert_eq!(server.state(), ServerState::Running);
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_after_stop_works() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, mut rx) = server_with_sink(&tmp.path().join("landing"));

    let port1 = free_port()?;
    server.start("127.0.0.1", port1).await?;
    recv(&mut rx).await; // running
    server.stop().await;
    assert_eq!(recv(&mut rx).await, ServerEvent::Status(StatusEvent::Stopped));

    let port2 = free_port()?;
    server.start("127.0.0.1", port2).await?;
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Status(StatusEvent::Running {
            host: "127.0.0.1".into(),
            port: port2
        })
    );
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_lived_connections_leave_no_registry_entries() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (server, mut rx) = server_with_sink(&tmp.path().join("landing"));
    let port = free_port()?;
    server.start("127.0.0.1", port).await?;
    recv(&mut rx).await; // running

    // Connections that close immediately can finish their server-side task
    // before the accept loop gets scheduled again; none may linger in the
    // active set.
    for _ in 0..10 {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        drop(stream);
    }

    let mut connected = 0;
    let mut disconnected = 0;
    while disconnected < 10 {
        match recv(&mut rx).await {
            ServerEvent::Status(StatusEvent::ClientConnected { .. }) => connected += 1,
            ServerEvent::Status(StatusEvent::ClientDisconnected { .. }) => disconnected += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(connected, 10);
    // Each connection deregisters itself before its disconnect event, so by
    // now the registry must be empty.
    assert_eq!(server.connection_count(), 0);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_overflow_disconnects_only_the_offender() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("fine.log");
    std::fs::write(&src, b"fine")?;
    let landing = tmp.path().join("landing");

    let (sink, mut rx) = ChannelSink::new();
    let dispatcher = Dispatcher::new(landing.clone(), Arc::new(NoopLogger));
    let server = TcpIngestServer::new(dispatcher, Arc::new(sink)).max_pending(256);
    let port = free_port()?;
    server.start("127.0.0.1", port).await?;
    recv(&mut rx).await; // running

    let mut offender = TcpStream::connect(("127.0.0.1", port)).await?;
    recv(&mut rx).await; // client-connected
    let mut healthy = TcpStream::connect(("127.0.0.1", port)).await?;
    let healthy_client = healthy.local_addr()?.to_string();
    recv(&mut rx).await; // client-connected

    // Unterminated garbage past the cap tears down the offender.
    offender.write_all(&[b'x'; 1024]).await?;
    offender.flush().await?;
    let ServerEvent::Status(StatusEvent::Error { message }) = recv(&mut rx).await else {
        panic!("expected overflow error event");
    };
    assert!(message.contains("pending buffer overflow"));
    let ServerEvent::Status(StatusEvent::ClientDisconnected { .. }) = recv(&mut rx).await else {
        panic!("expected offender disconnect");
    };

    // The healthy connection still ingests.
    let message = test_message(&src, None);
    healthy.write_all(message.as_bytes()).await?;
    healthy.flush().await?;
    assert_eq!(
        recv(&mut rx).await,
        ServerEvent::Data(DataEvent::Data {
            client: healthy_client,
            data: message
        })
    );

    server.stop().await;
    Ok(())
}
