//! Per-backend protocol state and the three-layer frame decoder.
//!
//! The session outlives single connections: the client id assigned by the
//! server is reused when reconnecting, and the presence table and pending
//! self-echo entries survive a socket drop.
//!
//! Decoding never fails. Anything unexpected is logged under the target of
//! the layer that rejected it and dropped:
//!
//! - `abot_dubtrack::layer1`: transport codes
//! - `abot_dubtrack::layer2`: actions and presence
//! - `abot_dubtrack::layer3`: content kinds

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::model::Content;
use crate::model::wire::{Action, ContentMessage, Frame, Presence, PresenceUpdate};

pub(crate) const LAYER1: &str = "abot_dubtrack::layer1";
pub(crate) const LAYER2: &str = "abot_dubtrack::layer2";
pub(crate) const LAYER3: &str = "abot_dubtrack::layer3";

/// Texts we sent whose echo must not reach handlers.
#[derive(Debug, Default)]
pub struct SuppressionList {
    pending: Mutex<Vec<String>>,
}

impl SuppressionList {
    /// Remembers `text` until its echo arrives.
    pub fn record(&self, text: &str) {
        self.pending.lock().push(text.to_string());
    }

    /// Removes one entry equal to `text`. Returns whether one was found.
    pub fn take(&self, text: &str) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|t| t == text) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no echo is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Protocol state shared by the consume loop and the room channel.
#[derive(Debug, Default)]
pub struct ProtocolSession {
    client_id: RwLock<Option<String>>,
    connection_id: RwLock<Option<String>>,
    presence: Mutex<HashMap<String, HashSet<String>>>,
    suppressed: SuppressionList,
}

impl ProtocolSession {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnection identifier assigned by the server.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    /// Identifier of the current socket.
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.read().clone()
    }

    /// Connection ids currently open for `client_id`, sorted.
    pub fn connections(&self, client_id: &str) -> Vec<String> {
        let mut ids: Vec<_> = self
            .presence
            .lock()
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Pending self-echo entries.
    pub fn suppression(&self) -> &SuppressionList {
        &self.suppressed
    }

    /// Forgets the connection id of a closed socket.
    pub(crate) fn connection_closed(&self) {
        self.connection_id.write().take();
    }

    /// Decodes one socket text frame.
    ///
    /// Returns content only for message actions of a known kind that are not
    /// the echo of our own chat.
    pub fn decode(&self, text: &str) -> Option<Content> {
        match Frame::split(text) {
            None => {
                debug!(target: LAYER1, "Empty frame");
                None
            }
            Some(Frame::Init(payload)) => {
                debug!(target: LAYER1, payload, "Connection init");
                None
            }
            Some(Frame::Ping) => {
                warn!(target: LAYER1, "Unexpected ping from server");
                None
            }
            Some(Frame::Pong) => {
                trace!(target: LAYER1, "Pong");
                None
            }
            Some(Frame::Unknown(code)) => {
                warn!(target: LAYER1, %code, frame = text, "Unknown transport code");
                None
            }
            Some(Frame::Data(json)) => match Action::parse(json) {
                Ok(action) => self.handle_action(action),
                Err(e) => {
                    warn!(target: LAYER2, error = %e, frame = text, "Dropping malformed frame");
                    None
                }
            },
        }
    }

    fn handle_action(&self, action: Action) -> Option<Content> {
        match action {
            Action::ClientId {
                client_id,
                connection_id,
            } => {
                debug!(target: LAYER2, %client_id, %connection_id, "Client id assigned");
                *self.client_id.write() = Some(client_id);
                *self.connection_id.write() = Some(connection_id);
                None
            }
            Action::Ack => {
                trace!(target: LAYER2, "Subscription acknowledged");
                None
            }
            Action::Presence(update) => {
                self.handle_presence(update);
                None
            }
            Action::Message(message) => self.handle_message(message),
            Action::Other(number) => {
                info!(target: LAYER2, action = number, "Unknown action");
                None
            }
        }
    }

    fn handle_presence(&self, update: PresenceUpdate) {
        let presence = update.presence;

        if let Some(req_id) = update.req_id.as_deref() {
            let ours = self.connection_id();
            if presence.connection_id != ours {
                error!(
                    target: LAYER2,
                    req_id,
                    theirs = ?presence.connection_id,
                    ?ours,
                    "Presence reply for another connection, ignoring"
                );
                return;
            }
        }

        let (Some(client_id), Some(connection_id)) = (presence.client_id, presence.connection_id)
        else {
            warn!(target: LAYER2, "Presence without client or connection id");
            return;
        };

        let mut table = self.presence.lock();
        match presence.action {
            Presence::CONNECT => {
                trace!(target: LAYER2, %client_id, %connection_id, "Connected");
                table.entry(client_id).or_default().insert(connection_id);
            }
            Presence::DISCONNECT => {
                let removed = table
                    .get_mut(&client_id)
                    .is_some_and(|set| set.remove(&connection_id));
                if !removed {
                    warn!(
                        target: LAYER2,
                        %client_id,
                        %connection_id,
                        "Disconnect for an unknown client/connection pair"
                    );
                }
                if table.get(&client_id).is_some_and(HashSet::is_empty) {
                    table.remove(&client_id);
                }
            }
            other => {
                warn!(target: LAYER2, action = other, "Unknown presence action");
            }
        }
    }

    fn handle_message(&self, message: ContentMessage) -> Option<Content> {
        if message.encoding != "json" {
            info!(
                target: LAYER3,
                encoding = %message.encoding,
                name = %message.name,
                "Skipping non-JSON content"
            );
            return None;
        }

        match Content::decode(&message.name, &message.data) {
            Ok(Some(content)) => {
                if let Content::ChatMessage(chat) = &content
                    && self.suppressed.take(&chat.message)
                {
                    debug!(target: LAYER3, text = %chat.message, "Suppressing own message");
                    return None;
                }
                trace!(target: LAYER3, kind = content.kind(), "Decoded content");
                Some(content)
            }
            Ok(None) => {
                info!(
                    target: LAYER3,
                    name = %message.name,
                    data = %message.data,
                    "Unknown content kind, dropping"
                );
                None
            }
            Err(e) => {
                warn!(target: LAYER3, error = %e, "Dropping malformed content");
                None
            }
        }
    }
}
