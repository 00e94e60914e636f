//! Relay transport.
//!
//! A relay is a shared log of [`Bundle`]s that federated servers append to
//! and read from. Each server belongs to a team identified by its server id
//! and authenticated with a shared [`Secret`]. Bundle ids are assigned by the
//! relay and strictly increase, so a server tracks its progress with a single
//! cursor id.
//!
//! [`MemoryRelay`] is the relay service itself; the `parley-relay` binary
//! serves it over the wire protocol with [`relay_dispatcher`].
//! [`RemoteRelay`] is the TCP client a server uses to reach it.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;

use parley_shared::constants::MAX_COLLECTION_LEN;
use parley_shared::{Id, Opcode, ProtocolError, Secret, Time, Wire};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::{Connection, TcpConnection};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::ServerError;
use crate::timeline::Timeline;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One object as the relay sees it: id, display text and creation time.
///
/// For a user the text is the name, for a conversation the title, and for a
/// message its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub id: Id,
    pub text: String,
    pub time: Time,
}

impl Wire for Component {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.id.write_to(out)?;
        self.text.write_to(out)?;
        self.time.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: Id::read_from(input)?,
            text: String::read_from(input)?,
            time: Time::read_from(input)?,
        })
    }
}

/// A user/conversation/message triple tagged with a relay-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub id: Id,
    pub user: Component,
    pub conversation: Component,
    pub message: Component,
}

impl Wire for Bundle {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.id.write_to(out)?;
        self.user.write_to(out)?;
        self.conversation.write_to(out)?;
        self.message.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: Id::read_from(input)?,
            user: Component::read_from(input)?,
            conversation: Component::read_from(input)?,
            message: Component::read_from(input)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Relay capability
// ---------------------------------------------------------------------------

pub trait Relay: Send {
    /// Up to `max` bundles with ids greater than `cursor`, in id order.
    fn read(
        &mut self,
        server: Id,
        secret: &Secret,
        cursor: Id,
        max: u32,
    ) -> Result<Vec<Bundle>, ServerError>;

    /// Append a triple; returns the assigned bundle id when the relay
    /// accepted it.
    fn write(
        &mut self,
        server: Id,
        secret: &Secret,
        user: &Component,
        conversation: &Component,
        message: &Component,
    ) -> Result<Option<Id>, ServerError>;
}

// ---------------------------------------------------------------------------
// In-memory relay
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRelay {
    teams: HashMap<Id, Secret>,
    bundles: Vec<Bundle>,
}

impl MemoryRelay {
    pub fn new(teams: HashMap<Id, Secret>) -> Self {
        Self {
            teams,
            bundles: Vec::new(),
        }
    }

    pub fn add_team(&mut self, server: Id, secret: Secret) {
        self.teams.insert(server, secret);
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    fn authorized(&self, server: Id, secret: &Secret) -> bool {
        self.teams
            .get(&server)
            .is_some_and(|known| known.matches(secret))
    }

    /// A fresh id strictly greater than every id handed out so far.
    fn next_id(&self) -> Id {
        let candidate = Id::generate();
        match self.bundles.last() {
            Some(last) if candidate <= last.id => Id(Uuid::from_u128(last.id.0.as_u128() + 1)),
            _ => candidate,
        }
    }
}

impl Relay for MemoryRelay {
    fn read(
        &mut self,
        server: Id,
        secret: &Secret,
        cursor: Id,
        max: u32,
    ) -> Result<Vec<Bundle>, ServerError> {
        if !self.authorized(server, secret) {
            return Err(ServerError::RelayDenied(server));
        }
        // Ids are strictly increasing, so everything after the cursor is a
        // contiguous tail. A batch never exceeds what the wire can carry.
        let start = self.bundles.partition_point(|bundle| bundle.id <= cursor);
        let max = (max as usize).min(MAX_COLLECTION_LEN);
        Ok(self.bundles[start..]
            .iter()
            .take(max)
            .cloned()
            .collect())
    }

    fn write(
        &mut self,
        server: Id,
        secret: &Secret,
        user: &Component,
        conversation: &Component,
        message: &Component,
    ) -> Result<Option<Id>, ServerError> {
        if !self.authorized(server, secret) {
            return Err(ServerError::RelayDenied(server));
        }
        let id = self.next_id();
        self.bundles.push(Bundle {
            id,
            user: user.clone(),
            conversation: conversation.clone(),
            message: message.clone(),
        });
        debug!(bundle = %id, server = %server, "bundle stored");
        Ok(Some(id))
    }
}

// ---------------------------------------------------------------------------
// Relay service handlers
// ---------------------------------------------------------------------------

/// Dispatch table for the relay service.
pub fn relay_dispatcher() -> Dispatcher<MemoryRelay> {
    Dispatcher::new()
        .register(Opcode::RelayReadRequest, handle_read)
        .register(Opcode::RelayWriteRequest, handle_write)
}

fn handle_read(
    relay: &mut MemoryRelay,
    _: &Timeline<MemoryRelay>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<Outcome, ServerError> {
    let server = Id::read_from(input)?;
    let secret = Secret::read_from(input)?;
    let cursor = Id::read_from(input)?;
    let max = u32::read_from(input)?;

    match relay.read(server, &secret, cursor, max) {
        Ok(bundles) => {
            Opcode::RelayReadResponse.write_to(output)?;
            bundles.write_to(output)?;
            Ok(Outcome::Replied)
        }
        Err(ServerError::RelayDenied(_)) => Ok(Outcome::Denied),
        Err(e) => Err(e),
    }
}

fn handle_write(
    relay: &mut MemoryRelay,
    _: &Timeline<MemoryRelay>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<Outcome, ServerError> {
    let server = Id::read_from(input)?;
    let secret = Secret::read_from(input)?;
    let user = Component::read_from(input)?;
    let conversation = Component::read_from(input)?;
    let message = Component::read_from(input)?;

    match relay.write(server, &secret, &user, &conversation, &message) {
        Ok(id) => {
            Opcode::RelayWriteResponse.write_to(output)?;
            id.write_to(output)?;
            Ok(Outcome::Replied)
        }
        Err(ServerError::RelayDenied(_)) => Ok(Outcome::Denied),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// TCP client
// ---------------------------------------------------------------------------

/// Relay client speaking the wire protocol, one connection per call.
#[derive(Debug, Clone)]
pub struct RemoteRelay {
    addr: String,
    io_timeout: Duration,
}

impl RemoteRelay {
    pub fn new(addr: impl Into<String>, io_timeout: Duration) -> Self {
        let addr = addr.into();
        info!(relay = %addr, "using remote relay");
        Self { addr, io_timeout }
    }

    /// Send one request and check the response code. `Ok(None)` means the
    /// relay answered access-denied.
    fn exchange<F>(&self, opcode: Opcode, expected: Opcode, body: F) -> Result<Option<TcpConnection>, ServerError>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), ProtocolError>,
    {
        let mut conn = TcpConnection::connect(&self.addr, self.io_timeout)?;
        {
            let (_, output) = conn.split();
            opcode.write_to(output)?;
            body(output)?;
            output.flush()?;
        }

        let (input, _) = conn.split();
        let code = u32::read_from(input)?;
        match Opcode::from_code(code) {
            Some(op) if op == expected => Ok(Some(conn)),
            Some(Opcode::AccessDenied) => Ok(None),
            _ => Err(ServerError::RelayResponse(code)),
        }
    }
}

impl Relay for RemoteRelay {
    fn read(
        &mut self,
        server: Id,
        secret: &Secret,
        cursor: Id,
        max: u32,
    ) -> Result<Vec<Bundle>, ServerError> {
        let conn = self.exchange(Opcode::RelayReadRequest, Opcode::RelayReadResponse, |out| {
            server.write_to(out)?;
            secret.write_to(out)?;
            cursor.write_to(out)?;
            max.write_to(out)
        })?;
        let Some(mut conn) = conn else {
            return Err(ServerError::RelayDenied(server));
        };
        let (input, _) = conn.split();
        let bundles = Vec::<Bundle>::read_from(input)?;
        // Best effort; the response is already complete.
        let _ = conn.close();
        Ok(bundles)
    }

    fn write(
        &mut self,
        server: Id,
        secret: &Secret,
        user: &Component,
        conversation: &Component,
        message: &Component,
    ) -> Result<Option<Id>, ServerError> {
        let conn = self.exchange(Opcode::RelayWriteRequest, Opcode::RelayWriteResponse, |out| {
            server.write_to(out)?;
            secret.write_to(out)?;
            user.write_to(out)?;
            conversation.write_to(out)?;
            message.write_to(out)
        })?;
        let Some(mut conn) = conn else {
            return Err(ServerError::RelayDenied(server));
        };
        let (input, _) = conn.split();
        let id = Option::<Id>::read_from(input)?;
        let _ = conn.close();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection;
    use crate::timeline;

    fn component(text: &str) -> Component {
        Component {
            id: Id::generate(),
            text: text.to_string(),
            time: Time::now(),
        }
    }

    fn relay_with_team() -> (MemoryRelay, Id, Secret) {
        let server = Id::generate();
        let secret = Secret::new(vec![7; 16]);
        let mut relay = MemoryRelay::default();
        relay.add_team(server, secret.clone());
        (relay, server, secret)
    }

    #[test]
    fn test_wrong_secret_denied() {
        let (mut relay, server, _) = relay_with_team();
        let wrong = Secret::new(vec![8; 16]);
        let (u, c, m) = (component("alice"), component("general"), component("hi"));

        assert!(matches!(
            relay.write(server, &wrong, &u, &c, &m),
            Err(ServerError::RelayDenied(_))
        ));
        assert!(matches!(
            relay.read(Id::generate(), &wrong, Id::NULL, 10),
            Err(ServerError::RelayDenied(_))
        ));
        assert!(relay.is_empty());
    }

    #[test]
    fn test_read_after_cursor_respects_max() {
        let (mut relay, server, secret) = relay_with_team();
        let mut ids = Vec::new();
        for text in ["one", "two", "three", "four"] {
            let id = relay
                .write(server, &secret, &component("alice"), &component("general"), &component(text))
                .unwrap()
                .unwrap();
            ids.push(id);
        }
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        let first = relay.read(server, &secret, Id::NULL, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message.text, "one");

        let rest = relay.read(server, &secret, first[1].id, 10).unwrap();
        let texts: Vec<&str> = rest.iter().map(|b| b.message.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "four"]);

        assert!(relay.read(server, &secret, ids[3], 10).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_read_is_capped_to_encodable_batch() {
        let (mut relay, server, secret) = relay_with_team();
        let (u, c) = (component("alice"), component("general"));
        for _ in 0..=MAX_COLLECTION_LEN {
            relay.write(server, &secret, &u, &c, &component("x")).unwrap();
        }

        let mut request = Vec::new();
        Opcode::RelayReadRequest.write_to(&mut request).unwrap();
        server.write_to(&mut request).unwrap();
        secret.write_to(&mut request).unwrap();
        Id::NULL.write_to(&mut request).unwrap();
        u32::MAX.write_to(&mut request).unwrap();

        let (timeline, _executor) = timeline::timeline::<MemoryRelay>();
        let mut output = Vec::new();
        relay_dispatcher()
            .dispatch(&mut relay, &timeline, &mut request.as_slice(), &mut output)
            .unwrap();

        let mut response = output.as_slice();
        Opcode::RelayReadResponse.expect(&mut response).unwrap();
        let bundles = Vec::<Bundle>::read_from(&mut response).unwrap();
        assert_eq!(bundles.len(), MAX_COLLECTION_LEN);

        // The next pull resumes after the batch and picks up the remainder.
        let rest = relay
            .read(server, &secret, bundles[MAX_COLLECTION_LEN - 1].id, u32::MAX)
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_remote_relay_over_tcp() {
        let (relay, server, secret) = relay_with_team();
        let (timeline, executor) = timeline::timeline();
        let worker = std::thread::spawn(move || executor.run(relay));

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        runtime.spawn(connection::accept_loop(
            listener,
            timeline.clone(),
            Arc::new(relay_dispatcher()),
            Duration::from_secs(2),
        ));

        let mut client = RemoteRelay::new(addr, Duration::from_secs(2));
        let written = client
            .write(server, &secret, &component("alice"), &component("general"), &component("hi"))
            .unwrap();
        assert!(written.is_some());

        let bundles = client.read(server, &secret, Id::NULL, 32).unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].message.text, "hi");
        assert_eq!(Some(bundles[0].id), written);

        let denied = client.read(server, &Secret::new(vec![1]), Id::NULL, 32);
        assert!(matches!(denied, Err(ServerError::RelayDenied(_))));

        timeline.shutdown();
        let relay = worker.join().unwrap();
        assert_eq!(relay.len(), 1);
    }
}
