use cube::codec::Codec;
use cube::config::{Protocol, ServerInfo, ServiceConfig};
use cube::network::{
    Connection, FilterFunc, FilterRegistry, Framer, HandlerRegistry, Opportunity, Parser, Service,
    ServiceShared, ServiceStatus, Supervisor,
};
use cube::NetworkError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const ECHO: u16 = 7;

fn server(configure: impl FnOnce(&mut ServiceConfig), filters: &FilterRegistry) -> Supervisor {
    let mut config = ServiceConfig::server(Protocol::Tcp, "127.0.0.1", 0);
    config.info = ServerInfo {
        id: 9,
        ..ServerInfo::default()
    };
    configure(&mut config);
    config.init().expect("valid config");

    let mut handlers = HandlerRegistry::new();
    handlers
        .register::<Vec<u8>, _>(ECHO, |ctx, body| {
            ctx.session.send(ECHO, body.clone())?;
            Ok(())
        })
        .expect("register echo");

    let pipeline = filters
        .pipeline(&config.filter_chain, &config.middle_chain)
        .expect("pipeline");
    let shared = ServiceShared::new(
        config,
        pipeline,
        Arc::new(handlers),
        Framer::default(),
        Codec::default(),
    );
    Supervisor::new(shared).expect("supervisor")
}

async fn connect(addr: SocketAddr) -> Connection {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let local = stream.local_addr().ok();
    Connection::from_stream(stream, Framer::default(), local, Some(addr))
}

/// Steps the service until `done` holds or a second passes.
async fn drive(service: &mut Supervisor, mut done: impl FnMut(&Supervisor) -> bool) -> bool {
    for _ in 0..200 {
        service.update();
        if done(service) {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Steps the service for a fixed number of ticks.
async fn step(service: &mut Supervisor, ticks: usize) {
    for _ in 0..ticks {
        service.update();
        sleep(Duration::from_millis(5)).await;
    }
}

fn parser() -> Parser {
    Parser::new(Codec::default(), Framer::default().header_len())
}

#[tokio::test]
async fn test_tcp_echo_through_supervisor() {
    let mut service = server(|_| {}, &FilterRegistry::new());
    service.start().expect("start");
    let addr = service.local_addr().expect("bound address");

    let mut client = connect(addr).await;
    assert!(drive(&mut service, |s| s.session_count() == 1).await);

    let mut frame = parser().marshal(ECHO, &b"ping".to_vec()).expect("marshal");
    Framer::default().encode(&mut frame).expect("frame");
    client.writer.write_frame(frame).await.expect("write");

    step(&mut service, 20).await;
    let reply = timeout(Duration::from_secs(1), client.reader.read_frame())
        .await
        .expect("echo within a second")
        .expect("echo frame");
    let mut body = Vec::<u8>::new();
    let msg_id = parser().unmarshal_into(&reply, &mut body).expect("unmarshal");
    assert_eq!(msg_id, ECHO);
    assert_eq!(body, b"ping");

    service.shutdown();
    assert!(drive(&mut service, |s| s.session_count() == 0).await);
    assert_eq!(service.update(), ServiceStatus::Closed);
    assert!(matches!(
        client.reader.read_frame().await,
        Err(NetworkError::ConnectionClosed | NetworkError::Frame(_) | NetworkError::Io(_))
    ));
}

#[tokio::test]
async fn test_connections_beyond_limit_are_dropped() {
    let mut service = server(|c| c.max_conn_num = 1, &FilterRegistry::new());
    service.start().expect("start");
    let addr = service.local_addr().expect("bound address");

    let _first = connect(addr).await;
    assert!(drive(&mut service, |s| s.session_count() == 1).await);

    let mut second = connect(addr).await;
    step(&mut service, 20).await;
    assert_eq!(service.session_count(), 1);
    assert!(timeout(Duration::from_secs(1), second.reader.read_frame())
        .await
        .expect("dropped connection ends")
        .is_err());

    service.shutdown();
    assert!(drive(&mut service, |s| s.session_count() == 0).await);
}

#[tokio::test]
async fn test_after_connected_veto_closes_session() {
    let mut filters = FilterRegistry::new();
    filters.register_filter("refuse", || {
        Box::new(FilterFunc::new().on(Opportunity::AfterConnected, |_| false))
    });
    let mut service = server(|c| c.filter_chain = vec!["refuse".to_string()], &filters);
    service.start().expect("start");
    let addr = service.local_addr().expect("bound address");

    let mut client = connect(addr).await;
    step(&mut service, 20).await;
    assert!(timeout(Duration::from_secs(1), client.reader.read_frame())
        .await
        .expect("refused connection ends")
        .is_err());
    assert!(drive(&mut service, |s| s.session_count() == 0).await);

    service.shutdown();
    step(&mut service, 20).await;
    assert_eq!(service.update(), ServiceStatus::Closed);
}
