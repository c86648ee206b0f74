//! Message handlers.
//!
//! One method per request type. Each performs a bounded read/modify/emit
//! sequence: a single atomic store call, then zero or more sends. No
//! handler can fail; missing entities and lost races are logged and
//! ignored.

use std::sync::Arc;

use arena_shared::protocol::{
    decode_request, CollisionPayload, DeleteItemPayload, DeletePlayerPayload, EnvironmentPayload,
    Event, GetItemPayload, LoginPayload, LoginResponsePayload, PingPayload, PlayerUpdatePayload,
    PongPayload, ProtocolError, Request,
};
use tracing::{debug, info, warn};

use crate::{
    outbound::{ConnectionId, Outbound, OutboundExt},
    store::{CollisionOutcome, EntityStore},
};

/// Reply text carried by every `pong`.
pub const PONG_MESSAGE: &str = "pong";

/// Routes decoded requests to the store and emits the resulting events.
pub struct Handlers {
    store: Arc<EntityStore>,
    out: Arc<dyn Outbound>,
}

impl Handlers {
    pub fn new(store: Arc<EntityStore>, out: Arc<dyn Outbound>) -> Self {
        Self { store, out }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Decodes one inbound frame and runs its handler.
    ///
    /// A decode error means nothing was executed; the caller logs it and
    /// keeps the connection open.
    pub fn dispatch(&self, conn: ConnectionId, text: &str) -> Result<(), ProtocolError> {
        let request = decode_request(text)?;
        self.handle(conn, request);
        Ok(())
    }

    pub fn handle(&self, conn: ConnectionId, request: Request) {
        debug!(%conn, method = request.method(), ">> request");
        match request {
            Request::Ping(p) => self.on_ping(conn, p),
            Request::Login(p) => self.on_login(conn, p),
            Request::PlayerUpdate(p) => self.on_player_update(conn, p),
            Request::GetItem(p) => self.on_get_item(conn, p),
            Request::Collision(p) => self.on_collision(conn, p),
        }
    }

    pub fn on_ping(&self, conn: ConnectionId, payload: PingPayload) {
        debug!(%conn, message = %payload.message, "Ping");
        self.out.send_event_to(
            conn,
            &Event::Pong(PongPayload {
                message: PONG_MESSAGE.to_string(),
            }),
        );
    }

    /// Creates a player, answers with its id, then sends the current item
    /// list to the same connection only.
    pub fn on_login(&self, conn: ConnectionId, payload: LoginPayload) {
        let player = self.store.create_player(&payload.name);
        info!(%conn, player_id = player.id, name = %player.name, "Player login");

        self.out.send_event_to(
            conn,
            &Event::LoginResponse(LoginResponsePayload { id: player.id }),
        );
        self.send_environment(conn);
    }

    fn send_environment(&self, conn: ConnectionId) {
        let items = self
            .store
            .snapshot_items()
            .iter()
            .map(|item| item.state())
            .collect();
        self.out
            .send_event_to(conn, &Event::Environment(EnvironmentPayload { items }));
    }

    pub fn on_player_update(&self, conn: ConnectionId, payload: PlayerUpdatePayload) {
        if !self.store.set_player_position(payload.id, payload.position) {
            debug!(%conn, player_id = payload.id, "Update for unknown player ignored");
        }
    }

    pub fn on_get_item(&self, conn: ConnectionId, payload: GetItemPayload) {
        let GetItemPayload { item_id, player_id } = payload;
        match self.store.pick_up_item(item_id, player_id) {
            Some((_, credited)) => {
                if credited {
                    info!(%conn, item_id, player_id, "Item picked up");
                } else {
                    warn!(%conn, item_id, player_id, "Item taken by unknown player");
                }
                self.out
                    .broadcast_event(&Event::DeleteItem(DeleteItemPayload { item_id }));
            }
            None => {
                debug!(%conn, item_id, player_id, "Item not found");
            }
        }
    }

    pub fn on_collision(&self, conn: ConnectionId, payload: CollisionPayload) {
        let CollisionPayload { alpha_id, bravo_id } = payload;
        match self.store.resolve_collision(alpha_id, bravo_id) {
            CollisionOutcome::Eliminated(loser) => {
                info!(%conn, loser = loser.id, score = loser.score, "Player eliminated");
                self.out
                    .broadcast_event(&Event::DeletePlayer(DeletePlayerPayload { id: loser.id }));
            }
            CollisionOutcome::Tie => {
                debug!(%conn, alpha_id, bravo_id, "Collision tie");
            }
            CollisionOutcome::MissingPlayer => {
                debug!(%conn, alpha_id, bravo_id, "Collision with unknown player ignored");
            }
        }
    }
}
