//! Client implementation.

use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use arena_shared::{
    math::Position,
    net::FrameConn,
    protocol::{
        decode_event, encode_request, CollisionPayload, Event, GetItemPayload, ItemState,
        LoginPayload, PingPayload, PlayerUpdatePayload, Request, Uid,
    },
};
use tracing::{debug, info, warn};

use crate::world::WorldView;

/// Connected client.
pub struct ArenaClient {
    conn: FrameConn,
    /// Id assigned at login.
    pub player_id: Option<Uid>,
    /// Mirror of the server's world, updated by `recv`.
    pub world: WorldView,
}

impl ArenaClient {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %addr, "Connecting to server");
        let conn = FrameConn::connect(addr).await?;
        Ok(Self {
            conn,
            player_id: None,
            world: WorldView::default(),
        })
    }

    pub async fn send(&mut self, request: &Request) -> anyhow::Result<()> {
        let text = encode_request(request)?;
        debug!(method = request.method(), ">> request");
        self.conn.send(&text).await
    }

    /// Sends a raw frame, bypassing the codec.
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.conn.send(text).await
    }

    /// Waits up to `timeout` for the next event and applies it to `world`.
    /// `Ok(None)` on timeout. Frames with unknown methods are skipped.
    pub async fn recv(&mut self, timeout: Duration) -> anyhow::Result<Option<Event>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(text) = self.conn.recv_timeout(left).await? else {
                return Ok(None);
            };
            match decode_event(&text) {
                Ok(event) => {
                    self.world.apply(&event);
                    return Ok(Some(event));
                }
                Err(e) => warn!(error = %e, "Ignoring server message"),
            }
        }
    }

    /// Receives until `pred` matches or `timeout` elapses. Non-matching
    /// events are still applied to `world`.
    pub async fn recv_until<F>(&mut self, timeout: Duration, mut pred: F) -> anyhow::Result<Option<Event>>
    where
        F: FnMut(&Event) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            match self.recv(left).await? {
                Some(event) if pred(&event) => return Ok(Some(event)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Logs in and waits for the id and the initial item list.
    pub async fn login(&mut self, name: &str, timeout: Duration) -> anyhow::Result<(Uid, Vec<ItemState>)> {
        self.send(&Request::Login(LoginPayload {
            name: name.to_string(),
        }))
        .await?;

        let id = match self
            .recv_until(timeout, |e| matches!(e, Event::LoginResponse(_)))
            .await?
        {
            Some(Event::LoginResponse(p)) => p.id,
            _ => bail!("no login_response within {timeout:?}"),
        };
        self.player_id = Some(id);
        self.world.own_id = Some(id);

        let items = match self
            .recv_until(timeout, |e| matches!(e, Event::Environment(_)))
            .await?
        {
            Some(Event::Environment(p)) => p.items,
            _ => bail!("no environment within {timeout:?}"),
        };
        info!(player_id = id, items = items.len(), "Logged in");
        Ok((id, items))
    }

    pub async fn ping(&mut self, message: &str) -> anyhow::Result<()> {
        self.send(&Request::Ping(PingPayload {
            message: message.to_string(),
        }))
        .await
    }

    pub async fn move_to(&mut self, position: Position) -> anyhow::Result<()> {
        let id = self.player_id.context("not logged in")?;
        self.send(&Request::PlayerUpdate(PlayerUpdatePayload { id, position }))
            .await
    }

    pub async fn get_item(&mut self, item_id: Uid) -> anyhow::Result<()> {
        let player_id = self.player_id.context("not logged in")?;
        self.send(&Request::GetItem(GetItemPayload { item_id, player_id }))
            .await
    }

    pub async fn collide_with(&mut self, other: Uid) -> anyhow::Result<()> {
        let alpha_id = self.player_id.context("not logged in")?;
        self.send(&Request::Collision(CollisionPayload {
            alpha_id,
            bravo_id: other,
        }))
        .await
    }
}
