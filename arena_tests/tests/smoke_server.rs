use arena_shared::config::ServerConfig;
use arena_tests::TestServer;

/// Smoke test: server starts, idles, and shuts down cleanly.
#[tokio::test]
async fn server_starts_and_stops() -> anyhow::Result<()> {
    let server = TestServer::start(ServerConfig {
        sync_interval_ms: 5,
        spawn_interval_ms: 5,
        ..Default::default()
    })
    .await?;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(server.probe.status().items, 0);
    server.stop().await
}
