//! Live connections and per-lobby broadcast groups.

use std::net::IpAddr;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::ServerMsg;

pub type ConnId = Uuid;

/// What a connection has told us about itself. Needed by handlers that
/// only receive the connection, e.g. disconnect and quit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub player_name: String,
    pub lobby_code: String,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.player_name.is_empty() || self.lobby_code.is_empty()
    }
}

struct Connection {
    addr: IpAddr,
    tx: mpsc::UnboundedSender<ServerMsg>,
    session: Session,
}

#[derive(Default)]
pub struct Rooms {
    connections: DashMap<ConnId, Connection>,
    /// lobby code -> member connections in join order
    rooms: DashMap<String, Vec<ConnId>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the queue its writer drains.
    pub fn register(&self, id: ConnId, addr: IpAddr) -> mpsc::UnboundedReceiver<ServerMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Connection {
                addr,
                tx,
                session: Session::default(),
            },
        );
        rx
    }

    /// Drops a connection from the registry and from every room.
    pub fn unregister(&self, id: ConnId) -> Option<Session> {
        self.rooms.retain(|_, members| {
            members.retain(|member| *member != id);
            !members.is_empty()
        });
        self.connections.remove(&id).map(|(_, conn)| conn.session)
    }

    pub fn join(&self, code: &str, id: ConnId) {
        let mut members = self.rooms.entry(code.to_string()).or_default();
        if !members.contains(&id) {
            members.push(id);
        }
    }

    pub fn leave(&self, code: &str, id: ConnId) {
        let empty = match self.rooms.get_mut(code) {
            Some(mut members) => {
                members.retain(|member| *member != id);
                members.is_empty()
            }
            None => false,
        };
        if empty {
            self.rooms.remove_if(code, |_, members| members.is_empty());
        }
    }

    pub fn members(&self, code: &str) -> Vec<ConnId> {
        self.rooms
            .get(code)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Finds the room member whose session carries `player_name`.
    pub fn find_member(&self, code: &str, player_name: &str) -> Option<ConnId> {
        let wanted = player_name.to_lowercase();
        self.members(code).into_iter().find(|id| {
            self.connections
                .get(id)
                .is_some_and(|conn| conn.session.player_name.to_lowercase() == wanted)
        })
    }

    pub fn addr(&self, id: ConnId) -> Option<IpAddr> {
        self.connections.get(&id).map(|conn| conn.addr)
    }

    pub fn session(&self, id: ConnId) -> Session {
        self.connections
            .get(&id)
            .map(|conn| conn.session.clone())
            .unwrap_or_default()
    }

    pub fn set_session(&self, id: ConnId, player_name: &str, lobby_code: &str) {
        if let Some(mut conn) = self.connections.get_mut(&id) {
            conn.session = Session {
                player_name: player_name.to_string(),
                lobby_code: lobby_code.to_string(),
            };
        }
    }

    pub fn clear_session(&self, id: ConnId) {
        if let Some(mut conn) = self.connections.get_mut(&id) {
            conn.session = Session::default();
        }
    }

    /// Sends to a single connection.
    pub fn emit(&self, id: ConnId, msg: ServerMsg) {
        if let Some(conn) = self.connections.get(&id) {
            let _ = conn.tx.send(msg);
        }
    }

    /// Sends to every member of the lobby's room.
    pub fn broadcast(&self, code: &str, msg: ServerMsg) {
        for id in self.members(code) {
            self.emit(id, msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn broadcast_reaches_only_room_members() {
        let rooms = Rooms::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = rooms.register(a, LOCAL);
        let mut rx_b = rooms.register(b, LOCAL);
        let mut rx_c = rooms.register(c, LOCAL);
        rooms.join("ROOM01", a);
        rooms.join("ROOM01", b);
        rooms.join("ROOM02", c);

        rooms.broadcast("ROOM01", ServerMsg::NextScreen);
        assert_eq!(rx_a.try_recv().unwrap(), ServerMsg::NextScreen);
        assert_eq!(rx_b.try_recv().unwrap(), ServerMsg::NextScreen);
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn leave_and_unregister_drop_membership() {
        let rooms = Rooms::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _rx_a = rooms.register(a, LOCAL);
        let _rx_b = rooms.register(b, LOCAL);
        rooms.join("ROOM01", a);
        rooms.join("ROOM01", a);
        rooms.join("ROOM01", b);
        assert_eq!(rooms.members("ROOM01"), vec![a, b]);

        rooms.leave("ROOM01", a);
        assert_eq!(rooms.members("ROOM01"), vec![b]);

        rooms.set_session(b, "Bob", "ROOM01");
        let session = rooms.unregister(b).unwrap();
        assert_eq!(session.player_name, "Bob");
        assert!(rooms.members("ROOM01").is_empty());
        assert!(rooms.addr(b).is_none());
    }

    #[test]
    fn find_member_matches_session_name() {
        let rooms = Rooms::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _rx_a = rooms.register(a, LOCAL);
        let _rx_b = rooms.register(b, LOCAL);
        rooms.join("ROOM01", a);
        rooms.join("ROOM01", b);
        rooms.set_session(a, "Alice", "ROOM01");
        rooms.set_session(b, "Bob", "ROOM01");

        assert_eq!(rooms.find_member("ROOM01", "bob"), Some(b));
        assert_eq!(rooms.find_member("ROOM01", "Cara"), None);

        rooms.clear_session(b);
        assert!(rooms.session(b).is_empty());
        assert_eq!(rooms.find_member("ROOM01", "Bob"), None);
    }
}
