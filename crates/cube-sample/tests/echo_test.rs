use cube::lifecycle::AppBuilder;
use cube_sample::{network, sample_config, Blacklist, Stats};
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

async fn wait_for(mut done: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    done()
}

/// Server and client on one network rally pings until the round limit.
#[tokio::test]
async fn test_ping_pong_rally() {
    let stats = Arc::new(Stats::default());
    let network = network(sample_config(free_port()), Blacklist::new(), Arc::clone(&stats), 3)
        .expect("Failed to build network");
    let app = AppBuilder::new("echo-test").network(network).start();

    assert!(
        wait_for(|| stats.pongs() >= 3, Duration::from_secs(5)).await,
        "only {} pongs",
        stats.pongs()
    );
    assert_eq!(stats.pings(), 3);

    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .expect("App did not shut down");
}

/// A blacklisted peer is closed right after connecting and never pings.
#[tokio::test]
async fn test_blacklisted_client_is_refused() {
    let stats = Arc::new(Stats::default());
    let blacklist = Blacklist::new();
    blacklist.block(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let network = network(sample_config(free_port()), blacklist, Arc::clone(&stats), 3)
        .expect("Failed to build network");
    let app = AppBuilder::new("blacklist-test").network(network).start();

    assert!(wait_for(|| stats.refused() >= 1, Duration::from_secs(5)).await);
    assert_eq!(stats.pongs(), 0);

    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .expect("App did not shut down");
}
