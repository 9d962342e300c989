//! Model world: the reference implementation.
//!
//! A deliberately simple re-statement of the relay's rules over plain
//! collections. It is the oracle the real driver is checked against, so it
//! favors obviousness over speed and shares no code with the engine.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use parlor_server::DEFAULT_GRACE_WINDOW;

use super::operation::{
    ClientId, MODEL_ROOMS, ModelRoom, Operation, OperationError, OperationResult, reaction_for,
    user_name,
};
use crate::invariants::SystemSnapshot;

/// A message as the model stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    /// Author user id.
    pub author: String,
    /// Body.
    pub content: String,
    /// Reaction per user id.
    pub reactions: BTreeMap<String, String>,
    /// Readers, author included.
    pub read_by: BTreeSet<String>,
}

/// One known user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUserState {
    /// User id.
    pub user_id: String,
    /// Online flag.
    pub connected: bool,
    /// Room currently occupied.
    pub current_room: Option<String>,
}

/// One configured room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoomState {
    /// Room id.
    pub room_id: String,
    /// Members, sorted.
    pub members: Vec<String>,
    /// Log in append order.
    pub messages: Vec<ModelMessage>,
}

/// Observable state for oracle comparison.
///
/// This is the subset of world state that can be compared against the real
/// implementation. Message ids and timestamps are left out: they come from
/// the environment, not from the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Known users sorted by id.
    pub users: Vec<ModelUserState>,
    /// Rooms in configuration order.
    pub rooms: Vec<ModelRoomState>,
}

impl From<&SystemSnapshot> for ObservableState {
    fn from(snapshot: &SystemSnapshot) -> Self {
        let mut users: Vec<_> = snapshot
            .users
            .iter()
            .map(|user| ModelUserState {
                user_id: user.user_id.to_string(),
                connected: user.connected,
                current_room: user.current_room.as_ref().map(ToString::to_string),
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let rooms = snapshot
            .rooms
            .iter()
            .map(|room| {
                let mut members: Vec<_> = room.members.iter().map(ToString::to_string).collect();
                members.sort();
                ModelRoomState {
                    room_id: room.room_id.to_string(),
                    members,
                    messages: room
                        .messages
                        .iter()
                        .map(|m| ModelMessage {
                            author: m.author_id.to_string(),
                            content: m.content.clone(),
                            reactions: m
                                .reactions
                                .iter()
                                .map(|(user, reaction)| (user.to_string(), reaction.clone()))
                                .collect(),
                            read_by: m.read_by.iter().map(ToString::to_string).collect(),
                        })
                        .collect(),
                }
            })
            .collect();

        Self { users, rooms }
    }
}

#[derive(Debug, Clone)]
struct ModelUser {
    connected: bool,
    room: Option<usize>,
    last_room: Option<usize>,
    disconnected_at: Duration,
}

/// Model world - the reference implementation.
///
/// Tracks known users, room membership and room logs for a fixed set of
/// clients, and applies operations with the relay's semantics.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    num_clients: usize,
    /// Presence records, keyed by client (present while known).
    users: BTreeMap<ClientId, ModelUser>,
    /// Members per configured room.
    members: Vec<BTreeSet<ClientId>>,
    /// Log per configured room.
    logs: Vec<Vec<ModelMessage>>,
    /// Virtual time since start.
    now: Duration,
    grace: Option<Duration>,
}

impl ModelWorld {
    /// Create a model world with the default grace window.
    pub fn new(num_clients: usize) -> Self {
        Self::with_grace(num_clients, Some(DEFAULT_GRACE_WINDOW))
    }

    /// Create a model world with a custom grace window.
    pub fn with_grace(num_clients: usize, grace: Option<Duration>) -> Self {
        Self {
            num_clients,
            users: BTreeMap::new(),
            members: vec![BTreeSet::new(); MODEL_ROOMS.len()],
            logs: vec![Vec::new(); MODEL_ROOMS.len()],
            now: Duration::ZERO,
            grace,
        }
    }

    /// Number of clients in the world.
    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    /// Whether a client is online.
    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.users.get(&client_id).is_some_and(|u| u.connected)
    }

    /// Whether the relay still remembers a client's user.
    pub fn is_known(&self, client_id: ClientId) -> bool {
        self.users.contains_key(&client_id)
    }

    /// Messages in a configured room.
    pub fn log_len(&self, room: ModelRoom) -> usize {
        match room {
            ModelRoom::Configured(index) => self.logs[index].len(),
            ModelRoom::Missing => 0,
        }
    }

    /// Apply an operation and return the result.
    ///
    /// This is the main entry point for model-based testing.
    /// The result should match the real implementation's result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let result = match op {
            Operation::Connect { client_id } => {
                self.apply_connect(*client_id);
                Ok(())
            },
            Operation::Disconnect { client_id } => self.apply_disconnect(*client_id),
            Operation::Join { client_id, room_id } => {
                self.apply_join(*client_id, ModelRoom::from_selector(*room_id))
            },
            Operation::Send { client_id, room_id, content } => {
                self.apply_send(*client_id, ModelRoom::from_selector(*room_id), content.to_text())
            },
            Operation::React { client_id, room_id, position, reaction } => self.apply_react(
                *client_id,
                ModelRoom::from_selector(*room_id),
                *position,
                reaction_for(*reaction),
            ),
            Operation::MarkRead { client_id, room_id, position } => {
                self.apply_mark_read(*client_id, ModelRoom::from_selector(*room_id), *position)
            },
            Operation::Typing { client_id, .. } => self.require_connected(*client_id),
            Operation::PrivateMessage { from, to, .. } => self.apply_private_message(*from, *to),
            Operation::AdvanceTime { seconds } => {
                self.apply_advance(Duration::from_secs(u64::from(*seconds)));
                Ok(())
            },
        };

        match result {
            Ok(()) => OperationResult::Ok,
            Err(e) => OperationResult::Error(e),
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let mut users: Vec<_> = self
            .users
            .iter()
            .map(|(&client_id, user)| ModelUserState {
                user_id: user_name(client_id),
                connected: user.connected,
                current_room: user.room.map(|index| MODEL_ROOMS[index].to_string()),
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let rooms = MODEL_ROOMS
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let mut members: Vec<_> = self.members[index].iter().map(|&c| user_name(c)).collect();
                members.sort();
                ModelRoomState {
                    room_id: (*name).to_string(),
                    members,
                    messages: self.logs[index].clone(),
                }
            })
            .collect();

        ObservableState { users, rooms }
    }

    fn require_connected(&self, client_id: ClientId) -> Result<(), OperationError> {
        if self.is_connected(client_id) { Ok(()) } else { Err(OperationError::NotConnected) }
    }

    fn apply_connect(&mut self, client_id: ClientId) {
        let room = match self.users.get(&client_id) {
            // Takeover keeps the room.
            Some(user) if user.connected => return,
            Some(user) => user.last_room.unwrap_or(0),
            None => 0,
        };

        self.users.insert(client_id, ModelUser {
            connected: true,
            room: Some(room),
            last_room: None,
            disconnected_at: self.now,
        });
        self.members[room].insert(client_id);
    }

    fn apply_disconnect(&mut self, client_id: ClientId) -> Result<(), OperationError> {
        self.require_connected(client_id)?;
        let now = self.now;
        let Some(user) = self.users.get_mut(&client_id) else {
            return Err(OperationError::NotConnected);
        };

        user.connected = false;
        user.last_room = user.room.take();
        user.disconnected_at = now;
        for members in &mut self.members {
            members.remove(&client_id);
        }
        Ok(())
    }

    fn apply_join(&mut self, client_id: ClientId, room: ModelRoom) -> Result<(), OperationError> {
        self.require_connected(client_id)?;
        let ModelRoom::Configured(target) = room else {
            return Err(OperationError::RoomNotFound);
        };

        for members in &mut self.members {
            members.remove(&client_id);
        }
        self.members[target].insert(client_id);
        if let Some(user) = self.users.get_mut(&client_id) {
            user.room = Some(target);
        }
        Ok(())
    }

    fn apply_send(
        &mut self,
        client_id: ClientId,
        room: ModelRoom,
        content: String,
    ) -> Result<(), OperationError> {
        self.require_connected(client_id)?;
        let ModelRoom::Configured(target) = room else {
            return Err(OperationError::RoomNotFound);
        };

        let author = user_name(client_id);
        self.logs[target].push(ModelMessage {
            read_by: BTreeSet::from([author.clone()]),
            author,
            content,
            reactions: BTreeMap::new(),
        });
        Ok(())
    }

    fn apply_react(
        &mut self,
        client_id: ClientId,
        room: ModelRoom,
        position: u8,
        reaction: &str,
    ) -> Result<(), OperationError> {
        self.require_connected(client_id)?;
        let message = self.message_mut(room, position)?;
        message.reactions.insert(user_name(client_id), reaction.to_string());
        Ok(())
    }

    fn apply_mark_read(
        &mut self,
        client_id: ClientId,
        room: ModelRoom,
        position: u8,
    ) -> Result<(), OperationError> {
        self.require_connected(client_id)?;
        let message = self.message_mut(room, position)?;
        message.read_by.insert(user_name(client_id));
        Ok(())
    }

    fn apply_private_message(&self, from: ClientId, to: ClientId) -> Result<(), OperationError> {
        self.require_connected(from)?;
        if self.is_connected(to) { Ok(()) } else { Err(OperationError::UserUnavailable) }
    }

    fn apply_advance(&mut self, by: Duration) {
        self.now += by;
        let Some(grace) = self.grace else {
            return;
        };
        let now = self.now;
        self.users.retain(|_, user| user.connected || now - user.disconnected_at < grace);
    }

    fn message_mut(
        &mut self,
        room: ModelRoom,
        position: u8,
    ) -> Result<&mut ModelMessage, OperationError> {
        let ModelRoom::Configured(index) = room else {
            return Err(OperationError::MessageNotFound);
        };
        self.logs[index].get_mut(position as usize).ok_or(OperationError::MessageNotFound)
    }
}
