//! Socket-level integration tests: real server, real clients.

use std::time::Duration;

use arena_client::ArenaClient;
use arena_shared::{
    config::ServerConfig,
    math::Position,
    net::MAX_REQUEST_FRAME_LEN,
    protocol::{
        encode_event, DeleteItemPayload, DeletePlayerPayload, EnvironmentPayload, Event,
        PongPayload, Uid,
    },
};
use arena_tests::{TestServer, WAIT};

const QUIET: Duration = Duration::from_millis(200);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_gets_id_and_private_environment() -> anyhow::Result<()> {
    let server = TestServer::start(TestServer::quiet_config()).await?;

    let mut ann = ArenaClient::connect(server.addr).await?;
    let (ann_id, items) = ann.login("Ann", WAIT).await?;
    assert_eq!(ann_id, 0);
    assert!(items.is_empty());

    let mut bob = ArenaClient::connect(server.addr).await?;
    let (bob_id, _) = bob.login("Bob", WAIT).await?;
    assert_ne!(ann_id, bob_id);

    // Bob's login snapshot is not delivered to Ann.
    let leaked = ann
        .recv_until(QUIET, |e| {
            matches!(e, Event::Environment(_) | Event::LoginResponse(_))
        })
        .await?;
    assert!(leaked.is_none());
    assert_eq!(server.probe.status().players, 2);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_snapshot_beyond_request_limit_is_delivered() -> anyhow::Result<()> {
    let server = TestServer::start(TestServer::quiet_config()).await?;
    for i in 0..3000 {
        let f = i as f32 * 0.001;
        server.store.create_item(Position::new(f, 0.5, -f));
    }
    let live: Vec<Uid> = server.store.snapshot_items().iter().map(|i| i.id).collect();

    let mut ann = ArenaClient::connect(server.addr).await?;
    let (_, items) = ann.login("Ann", WAIT).await?;
    let mut got: Vec<Uid> = items.iter().map(|i| i.id).collect();
    got.sort();
    assert_eq!(got, live);
    let wire_len = encode_event(&Event::Environment(EnvironmentPayload { items }))?.len();
    assert!(wire_len > MAX_REQUEST_FRAME_LEN, "snapshot only {wire_len} bytes");

    // The connection keeps working afterwards.
    ann.ping("still there").await?;
    let pong = ann
        .recv_until(WAIT, |e| matches!(e, Event::Pong(_)))
        .await?;
    assert!(pong.is_some());
    assert_eq!(server.probe.status().connections, 1);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_keeps_connection_open() -> anyhow::Result<()> {
    let server = TestServer::start(TestServer::quiet_config()).await?;
    let mut client = ArenaClient::connect(server.addr).await?;

    client
        .send_raw(r#"{"Method":"teleport","Payload":{"Id":0}}"#)
        .await?;
    client.send_raw("definitely not json").await?;
    client.ping("hello").await?;

    let pong = client.recv(WAIT).await?;
    assert_eq!(
        pong,
        Some(Event::Pong(PongPayload {
            message: "pong".into()
        }))
    );
    assert_eq!(server.probe.status().connections, 1);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn position_update_is_synced_to_others_once() -> anyhow::Result<()> {
    let server = TestServer::start(TestServer::quiet_config()).await?;
    let mut ann = ArenaClient::connect(server.addr).await?;
    let mut bob = ArenaClient::connect(server.addr).await?;
    let (ann_id, _) = ann.login("Ann", WAIT).await?;
    bob.login("Bob", WAIT).await?;

    ann.move_to(Position::new(1.0, 0.5, 2.0)).await?;

    let sync = bob
        .recv_until(WAIT, |e| matches!(e, Event::Sync(_)))
        .await?;
    let Some(Event::Sync(payload)) = sync else {
        panic!("no sync received");
    };
    assert_eq!(payload.players.len(), 1);
    assert_eq!(payload.players[0].id, ann_id);
    assert_eq!(payload.players[0].position, Position::new(1.0, 0.5, 2.0));
    assert_eq!(payload.players[0].score, 0);

    // No further change, so no further sync.
    let again = bob
        .recv_until(QUIET, |e| matches!(e, Event::Sync(_)))
        .await?;
    assert!(again.is_none());

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_item_pickup_and_elimination() -> anyhow::Result<()> {
    let server = TestServer::start(ServerConfig {
        sync_interval_ms: 20,
        spawn_interval_ms: 40,
        ..Default::default()
    })
    .await?;

    let mut ann = ArenaClient::connect(server.addr).await?;
    let mut bob = ArenaClient::connect(server.addr).await?;
    let (ann_id, _) = ann.login("Ann", WAIT).await?;
    let (bob_id, _) = bob.login("Bob", WAIT).await?;

    let spawn = ann
        .recv_until(WAIT, |e| matches!(e, Event::Spawn(_)))
        .await?;
    let Some(Event::Spawn(spawn)) = spawn else {
        panic!("no spawn received");
    };
    let item = spawn.item;
    assert!((-5.0..5.0).contains(&item.position.x));
    assert!((-5.0..5.0).contains(&item.position.z));
    assert_eq!(item.position.y, 0.5);

    ann.get_item(item.id).await?;
    let deleted = bob
        .recv_until(WAIT, |e| {
            matches!(e, Event::DeleteItem(p) if p.item_id == item.id)
        })
        .await?;
    assert_eq!(
        deleted,
        Some(Event::DeleteItem(DeleteItemPayload { item_id: item.id }))
    );

    // The score change reaches Ann through sync.
    let own = ann
        .recv_until(WAIT, |e| match e {
            Event::Sync(p) => p.players.iter().any(|s| s.id == ann_id && s.score == 1),
            _ => false,
        })
        .await?;
    assert!(own.is_some());
    assert_eq!(ann.world.own_score, 1);

    // Bob (score 0) reports the collision; he is the one removed.
    bob.collide_with(ann_id).await?;
    let gone = ann
        .recv_until(WAIT, |e| matches!(e, Event::DeletePlayer(_)))
        .await?;
    assert_eq!(
        gone,
        Some(Event::DeletePlayer(DeletePlayerPayload { id: bob_id }))
    );
    bob.recv_until(WAIT, |e| matches!(e, Event::DeletePlayer(_)))
        .await?;
    assert!(bob.world.eliminated);
    assert_eq!(server.probe.status().players, 1);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn equal_scores_collide_without_elimination() -> anyhow::Result<()> {
    let server = TestServer::start(TestServer::quiet_config()).await?;
    let mut ann = ArenaClient::connect(server.addr).await?;
    let mut bob = ArenaClient::connect(server.addr).await?;
    let (ann_id, _) = ann.login("Ann", WAIT).await?;
    let (bob_id, _) = bob.login("Bob", WAIT).await?;

    ann.collide_with(bob_id).await?;
    bob.collide_with(ann_id).await?;

    let gone = ann
        .recv_until(QUIET, |e| matches!(e, Event::DeletePlayer(_)))
        .await?;
    assert!(gone.is_none());
    assert_eq!(server.probe.status().players, 2);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contested_item_is_deleted_once() -> anyhow::Result<()> {
    let server = TestServer::start(ServerConfig {
        sync_interval_ms: 20,
        spawn_interval_ms: 40,
        ..Default::default()
    })
    .await?;

    let mut observer = ArenaClient::connect(server.addr).await?;
    observer.login("Observer", WAIT).await?;

    let mut racers = Vec::new();
    for n in 0..4 {
        let mut c = ArenaClient::connect(server.addr).await?;
        c.login(&format!("Racer{n}"), WAIT).await?;
        racers.push(c);
    }

    let Some(Event::Spawn(spawn)) = observer
        .recv_until(WAIT, |e| matches!(e, Event::Spawn(_)))
        .await?
    else {
        panic!("no spawn received");
    };
    let item_id = spawn.item.id;

    let grabs: Vec<_> = racers
        .into_iter()
        .map(|mut c| {
            tokio::spawn(async move {
                c.get_item(item_id).await?;
                Ok::<_, anyhow::Error>(c)
            })
        })
        .collect();
    let mut racers = Vec::new();
    for g in grabs {
        racers.push(g.await??);
    }

    let mut deletes = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(400);
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        if left.is_zero() {
            break;
        }
        match observer.recv(left).await? {
            Some(Event::DeleteItem(p)) if p.item_id == item_id => deletes += 1,
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(deletes, 1);

    drop(racers);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_environment_resync_reaches_everyone() -> anyhow::Result<()> {
    let server = TestServer::start(ServerConfig {
        environment_resync_ms: Some(30),
        ..TestServer::quiet_config()
    })
    .await?;
    let mut ann = ArenaClient::connect(server.addr).await?;
    let mut bob = ArenaClient::connect(server.addr).await?;
    ann.login("Ann", WAIT).await?;
    bob.login("Bob", WAIT).await?;

    for client in [&mut ann, &mut bob] {
        let env = client
            .recv_until(WAIT, |e| matches!(e, Event::Environment(_)))
            .await?;
        assert!(env.is_some());
    }

    server.stop().await
}
