use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Result, anyhow};
use robot_messaging::{
    Client, CommunicationService, Message, MessageKind, MessagingError, RequestHandler,
    ResponseHandler, Server, ServerHandle,
    codec::FrameError,
    world::{Point, REMOTE_ROBOT, RobotWorld, encode_position},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    runtime::Handle,
    time::timeout,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(3);

fn echo_handler() -> Arc<dyn RequestHandler> {
    Arc::new(|request: Message| -> anyhow::Result<Message> {
        let (_, body) = request.into_parts();
        Ok(Message::new(MessageKind::EchoResponse, body))
    })
}

fn quiet_responses() -> Arc<dyn ResponseHandler> {
    Arc::new(|_: &Message| -> anyhow::Result<()> { Ok(()) })
}

fn start_server(handler: Arc<dyn RequestHandler>) -> Result<ServerHandle> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    Ok(Server::bind_addr(&Handle::current(), addr, handler)?.start())
}

fn client_for(server: &ServerHandle) -> Client {
    Client::new(
        &Handle::current(),
        "127.0.0.1",
        server.local_addr().port(),
        quiet_responses(),
    )
}

/// Reads until the server hangs up and returns whatever it sent first.
async fn read_until_closed(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut received = Vec::new();
    match timeout(STEP_TIMEOUT, stream.read_to_end(&mut received)).await? {
        Ok(_) => Ok(received),
        // A reset also means the server is done with this socket.
        Err(_) => Ok(received),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_returns_the_request_body() -> Result<()> {
    let server = start_server(echo_handler())?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let client = Client::new(
        &Handle::current(),
        "127.0.0.1",
        server.local_addr().port(),
        Arc::new(move |response: &Message| -> anyhow::Result<()> {
            recorder.lock().unwrap().push(response.clone());
            Ok(())
        }),
    );

    let response = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::EchoRequest, "hello robot")),
    )
    .await??;

    let expected = Message::new(MessageKind::EchoResponse, "hello robot");
    assert_eq!(response, expected);
    assert_eq!(seen.lock().unwrap().as_slice(), &[expected]);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_bodies_survive_the_exchange() -> Result<()> {
    let server = start_server(echo_handler())?;
    let client = client_for(&server);

    let response = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::EchoRequest, "")),
    )
    .await??;

    assert_eq!(response.kind(), MessageKind::EchoResponse);
    assert!(response.body().is_empty());
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_dispatches_each_get_their_own_reply() -> Result<()> {
    let server = start_server(echo_handler())?;
    let client = client_for(&server);

    let pending: Vec<_> = (0..16)
        .map(|i| {
            let body = format!("request-{i}");
            (
                body.clone(),
                client.dispatch_message(Message::new(MessageKind::EchoRequest, body)),
            )
        })
        .collect();

    for (body, task) in pending {
        let response = timeout(STEP_TIMEOUT, task).await???;
        assert_eq!(response.kind(), MessageKind::EchoResponse);
        assert_eq!(response.body_text(), body);
    }

    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn robot_world_applies_position_updates() -> Result<()> {
    let world = Arc::new(RobotWorld::new());
    world.populate();
    world.set_position(REMOTE_ROBOT, Point::new(0, 0));
    let server = start_server(world.clone())?;
    let client = client_for(&server);

    let response = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::UpdatePositionRequest, "00500050")),
    )
    .await??;

    assert_eq!(
        response,
        Message::new(MessageKind::UpdatePositionResponse, "")
    );
    assert_eq!(world.position_of(REMOTE_ROBOT), Some(Point::new(50, 50)));
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_position_updates_are_each_acknowledged() -> Result<()> {
    let world = Arc::new(RobotWorld::new());
    let server = start_server(world.clone())?;
    let client = client_for(&server);

    let sent: Vec<Point> = (1..=12).map(|i| Point::new(i * 10, i * 20)).collect();
    let mut pending = Vec::new();
    for position in &sent {
        let body = encode_position(*position)?;
        pending.push(client.dispatch_message(Message::new(MessageKind::UpdatePositionRequest, body)));
    }

    for task in pending {
        let response = timeout(STEP_TIMEOUT, task).await???;
        assert_eq!(
            response,
            Message::new(MessageKind::UpdatePositionResponse, "")
        );
    }

    // Updates race each other, so any one of them may land last.
    let last = world
        .position_of(REMOTE_ROBOT)
        .ok_or_else(|| anyhow!("remote robot was never placed"))?;
    assert!(sent.contains(&last));
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_kinds_still_get_a_reply() -> Result<()> {
    let world = Arc::new(RobotWorld::new());
    let server = start_server(world)?;
    let client = client_for(&server);

    let response = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::Unknown(42), "?")),
    )
    .await??;

    assert_eq!(response.kind(), MessageKind::Unknown(42));
    assert_eq!(response.body_text(), "unhandled request");
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_connections_do_not_stop_the_server() -> Result<()> {
    let server = start_server(echo_handler())?;
    let addr = server.local_addr();

    // Header announcing a body far beyond the limit.
    let mut oversized = TcpStream::connect(addr).await?;
    let mut header = Vec::new();
    header.extend_from_slice(&0u32.to_be_bytes());
    header.extend_from_slice(&(1u32 << 30).to_be_bytes());
    oversized.write_all(&header).await?;
    assert!(read_until_closed(&mut oversized).await?.is_empty());

    // Header promising ten bytes, followed by three and a hang-up.
    let mut truncated = TcpStream::connect(addr).await?;
    let mut frame = Vec::new();
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&10u32.to_be_bytes());
    frame.extend_from_slice(b"abc");
    truncated.write_all(&frame).await?;
    truncated.shutdown().await?;
    assert!(read_until_closed(&mut truncated).await?.is_empty());

    // A peer that connects and leaves without a word.
    drop(TcpStream::connect(addr).await?);

    assert!(!server.is_finished());
    let response = timeout(
        STEP_TIMEOUT,
        client_for(&server).dispatch(Message::new(MessageKind::EchoRequest, "still there?")),
    )
    .await??;
    assert_eq!(response.body_text(), "still there?");

    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_failure_closes_without_a_reply() -> Result<()> {
    let server = start_server(Arc::new(|_: Message| -> anyhow::Result<Message> {
        Err(anyhow!("robot offline"))
    }))?;

    let err = timeout(
        STEP_TIMEOUT,
        client_for(&server).dispatch(Message::new(MessageKind::EchoRequest, "ping")),
    )
    .await?
    .expect_err("server should not answer");

    assert!(matches!(
        err,
        MessagingError::Protocol(FrameError::ConnectionClosed)
    ));
    assert!(!server.is_finished());
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn response_handler_failure_reaches_the_caller() -> Result<()> {
    let server = start_server(echo_handler())?;
    let client = Client::new(
        &Handle::current(),
        "127.0.0.1",
        server.local_addr().port(),
        Arc::new(|_: &Message| -> anyhow::Result<()> { Err(anyhow!("cannot apply")) }),
    );

    let err = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::EchoRequest, "ping")),
    )
    .await?
    .expect_err("response handler refuses");

    match err {
        MessagingError::Handler { kind, reason } => {
            assert_eq!(kind, MessageKind::EchoResponse);
            assert!(reason.contains("cannot apply"));
        }
        other => return Err(anyhow!("unexpected error: {other}")),
    }
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_failure_names_host_and_port() -> Result<()> {
    // Reserve a port, then free it so nothing is listening there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let client = Client::new(&Handle::current(), "127.0.0.1", port, quiet_responses());

    let err = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::EchoRequest, "anyone?")),
    )
    .await?
    .expect_err("nothing is listening");

    assert!(matches!(err, MessagingError::Connection { .. }));
    assert!(
        err.to_string()
            .contains(&format!("host = 127.0.0.1, port = {port}")),
        "unexpected message: {err}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_message_reports_failures_through_the_handle() -> Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let client = Client::new(&Handle::current(), "127.0.0.1", port, quiet_responses());

    let result = timeout(
        STEP_TIMEOUT,
        client.dispatch_message(Message::new(MessageKind::EchoRequest, "anyone?")),
    )
    .await??;

    assert!(matches!(result, Err(MessagingError::Connection { .. })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_drops_silent_peers_after_the_exchange_timeout() -> Result<()> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let server = Server::bind_addr(&Handle::current(), addr, echo_handler())?
        .with_exchange_timeout(Duration::from_millis(100))
        .start();

    let mut silent = TcpStream::connect(server.local_addr()).await?;
    assert!(read_until_closed(&mut silent).await?.is_empty());

    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_gives_up_on_a_silent_server() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let mute = tokio::spawn(async move {
        // Hold the connection open without ever answering.
        let accepted = listener.accept().await;
        tokio::time::sleep(STEP_TIMEOUT).await;
        drop(accepted);
    });

    let client = Client::new(&Handle::current(), "127.0.0.1", port, quiet_responses())
        .with_exchange_timeout(Duration::from_millis(100));
    let err = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::EchoRequest, "hello?")),
    )
    .await?
    .expect_err("server never answers");

    assert!(matches!(err, MessagingError::TimedOut { .. }));
    mute.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_request_is_refused_before_sending() -> Result<()> {
    let server = start_server(echo_handler())?;
    let client = client_for(&server).with_max_body_len(4);

    let err = timeout(
        STEP_TIMEOUT,
        client.dispatch(Message::new(MessageKind::EchoRequest, "too long")),
    )
    .await?
    .expect_err("body exceeds the limit");

    assert!(matches!(
        err,
        MessagingError::Protocol(FrameError::Oversized { len: 8, max: 4 })
    ));
    server.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_accepting() -> Result<()> {
    let server = start_server(echo_handler())?;
    let addr = server.local_addr();

    timeout(STEP_TIMEOUT, server.shutdown()).await??;

    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binding_a_busy_port_fails_immediately() -> Result<()> {
    let taken = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = taken.local_addr()?;

    let result = Server::bind_addr(&Handle::current(), addr, echo_handler());

    assert!(matches!(result, Err(MessagingError::Bind { .. })));
    Ok(())
}

#[test]
fn global_service_hosts_servers_and_clients() -> Result<()> {
    let service = CommunicationService::global()?;
    let context = service.context();

    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let server = Server::bind_addr(&context, addr, echo_handler())?.start();
    let client = Client::new(&context, "127.0.0.1", server.local_addr().port(), quiet_responses());

    let response = service.block_on(async {
        timeout(
            STEP_TIMEOUT,
            client.dispatch(Message::new(MessageKind::EchoRequest, "from the service")),
        )
        .await
    })??;
    assert_eq!(response.body_text(), "from the service");

    service.block_on(server.shutdown())?;
    Ok(())
}
