//! Relay synchronisation.
//!
//! [`RelayPull`] periodically reads bundles past the cursor and merges them
//! into the model. Merging is look-up-or-create for each of the user,
//! conversation and message, so replaying a bundle is harmless. The first
//! server to see a conversation makes the bundle's user its local creator;
//! other servers may pick a different creator for the same conversation.
//!
//! Locally created messages are pushed to the relay by a one-shot task from
//! [`schedule_push`]. Merged messages are never pushed back.

use std::time::Duration;

use parley_shared::Id;
use parley_store::{ConversationHeader, Message, Model, StoreError, User};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::relay::{Bundle, Component};
use crate::server::ServerState;
use crate::timeline::{RecurringTask, Timeline};

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

pub struct RelayPull {
    period: Duration,
}

impl RelayPull {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl RecurringTask<ServerState> for RelayPull {
    fn name(&self) -> &'static str {
        "relay-pull"
    }

    fn run(&mut self, state: &mut ServerState, _: &Timeline<ServerState>) -> anyhow::Result<()> {
        pull(state)?;
        Ok(())
    }

    fn next_delay(&self) -> Duration {
        self.period
    }
}

/// What a single bundle added to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Merged {
    pub user: bool,
    pub conversation: bool,
    pub message: bool,
}

/// Read one batch from the relay and merge it. A failed read leaves the
/// cursor where it was. Returns the number of bundles processed.
pub fn pull(state: &mut ServerState) -> Result<usize, ServerError> {
    let Some(link) = state.relay.as_mut() else {
        return Ok(0);
    };

    let bundles = link
        .relay
        .read(link.server, &link.secret, state.cursor, link.batch_size)?;
    if bundles.is_empty() {
        return Ok(0);
    }

    let created = merge_batch(&mut state.model, &mut state.cursor, &bundles);
    info!(
        bundles = bundles.len(),
        messages = created,
        cursor = %state.cursor,
        "relay batch merged"
    );
    Ok(bundles.len())
}

/// Merge `bundles` in order, advancing `cursor` past each one. Returns how
/// many new messages were created.
///
/// A bundle that cannot be merged is logged and skipped so one bad record
/// cannot stall the stream.
pub fn merge_batch(model: &mut Model, cursor: &mut Id, bundles: &[Bundle]) -> usize {
    let mut created = 0;
    for bundle in bundles {
        match merge_bundle(model, bundle) {
            Ok(merged) => {
                if merged.message {
                    created += 1;
                }
            }
            Err(e) => warn!(bundle = %bundle.id, error = %e, "skipping unmergeable bundle"),
        }
        advance(cursor, bundle.id);
    }
    created
}

/// Look up or create the bundle's user, conversation and message.
pub fn merge_bundle(model: &mut Model, bundle: &Bundle) -> Result<Merged, StoreError> {
    let mut merged = Merged::default();

    let user = bundle.user.id;
    if model.user(&user).is_none() {
        model.insert_user(User {
            id: user,
            name: bundle.user.text.clone(),
            creation: bundle.user.time,
        })?;
        merged.user = true;
    }

    let conversation = bundle.conversation.id;
    if model.conversation(&conversation).is_none() {
        model.insert_conversation(ConversationHeader::new(
            conversation,
            bundle.conversation.text.clone(),
            user,
            bundle.conversation.time,
        ))?;
        debug!(conversation = %conversation, creator = %user, "conversation first seen via relay");
        merged.conversation = true;
    }

    if model.message(&bundle.message.id).is_none() {
        model.insert_message(Message::new(
            bundle.message.id,
            user,
            conversation,
            bundle.message.text.clone(),
            bundle.message.time,
        ))?;
        merged.message = true;
    }

    Ok(merged)
}

/// Move the cursor forward to `id`; never backwards.
pub fn advance(cursor: &mut Id, id: Id) {
    if id > *cursor {
        *cursor = id;
    } else {
        debug!(bundle = %id, cursor = %cursor, "relay returned a bundle at or behind the cursor");
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Schedule a one-shot push of a locally created message.
pub fn schedule_push(timeline: &Timeline<ServerState>, message: Id) -> Result<(), ServerError> {
    timeline.schedule_now(move |state, _| {
        push(state, message)?;
        Ok(())
    })
}

/// Write the message with its author and conversation to the relay.
pub fn push(state: &mut ServerState, message: Id) -> Result<Option<Id>, ServerError> {
    let Some(link) = state.relay.as_mut() else {
        return Ok(None);
    };
    let Some((user, conversation, content)) = components(&state.model, &message) else {
        return Err(ServerError::Internal(format!(
            "message {message} vanished before push"
        )));
    };

    let bundle = link
        .relay
        .write(link.server, &link.secret, &user, &conversation, &content)?;
    debug!(message = %message, bundle = ?bundle, "message pushed to relay");
    Ok(bundle)
}

/// The relay components for a stored message, if its author and
/// conversation are known.
pub fn components(model: &Model, message: &Id) -> Option<(Component, Component, Component)> {
    let message = model.message(message)?;
    let user = model.user(&message.author)?;
    let conversation = model.conversation(&message.conversation)?;
    Some((
        Component {
            id: user.id,
            text: user.name.clone(),
            time: user.creation,
        },
        Component {
            id: conversation.id,
            text: conversation.title.clone(),
            time: conversation.creation,
        },
        Component {
            id: message.id,
            text: message.content.clone(),
            time: message.creation,
        },
    ))
}

#[cfg(test)]
mod tests {
    use parley_shared::{Secret, Time};
    use proptest::prelude::*;

    use super::*;
    use crate::relay::{MemoryRelay, Relay};
    use crate::server::{RelayLink, ServerInfo};
    use crate::timeline;

    fn component(text: &str, millis: i64) -> Component {
        Component {
            id: Id::generate(),
            text: text.to_string(),
            time: Time::from_millis(millis).unwrap(),
        }
    }

    fn bundle(user: &Component, conversation: &Component, text: &str, millis: i64) -> Bundle {
        Bundle {
            id: Id::generate(),
            user: user.clone(),
            conversation: conversation.clone(),
            message: component(text, millis),
        }
    }

    /// A relay shared by reference-counted handle so a test can inspect it.
    struct Shared(std::sync::Arc<std::sync::Mutex<MemoryRelay>>);

    impl Relay for Shared {
        fn read(&mut self, server: Id, secret: &Secret, cursor: Id, max: u32) -> Result<Vec<Bundle>, ServerError> {
            self.0.lock().unwrap().read(server, secret, cursor, max)
        }

        fn write(
            &mut self,
            server: Id,
            secret: &Secret,
            user: &Component,
            conversation: &Component,
            message: &Component,
        ) -> Result<Option<Id>, ServerError> {
            self.0.lock().unwrap().write(server, secret, user, conversation, message)
        }
    }

    fn state_with_relay(relay: MemoryRelay, server: Id, secret: Secret, batch: u32) -> ServerState {
        ServerState::new(ServerInfo::now()).with_relay(RelayLink {
            relay: Box::new(relay),
            server,
            secret,
            batch_size: batch,
        })
    }

    #[test]
    fn test_first_observer_becomes_creator() {
        let mut model = Model::new();
        let bob = component("bob", 1_000);
        let alice = component("alice", 1_000);
        let general = component("general", 1_500);

        merge_bundle(&mut model, &bundle(&bob, &general, "from bob", 2_000)).unwrap();
        let merged = merge_bundle(&mut model, &bundle(&alice, &general, "from alice", 3_000)).unwrap();
        assert_eq!(
            merged,
            Merged {
                user: true,
                conversation: false,
                message: true
            }
        );

        let header = model.conversation(&general.id).unwrap();
        assert_eq!(header.creator, bob.id);
        assert!(header.owners.contains(&bob.id));
        // Later authors are not added as members by merging.
        assert!(!header.members.contains(&alice.id));
        assert_eq!(model.message_count(&general.id), 2);
    }

    #[test]
    fn test_pull_failure_keeps_cursor() {
        let server = Id::generate();
        let relay = MemoryRelay::default();
        let mut state = state_with_relay(relay, server, Secret::new(vec![1]), 32);
        let before = Id::generate();
        state.cursor = before;

        assert!(matches!(pull(&mut state), Err(ServerError::RelayDenied(_))));
        assert_eq!(state.cursor, before);
    }

    #[test]
    fn test_pull_reads_in_batches() {
        let server = Id::generate();
        let secret = Secret::new(vec![5; 8]);
        let mut relay = MemoryRelay::default();
        relay.add_team(server, secret.clone());
        let (alice, general) = (component("alice", 1), component("general", 2));
        for i in 0..5 {
            relay
                .write(server, &secret, &alice, &general, &component(&format!("m{i}"), 10 + i))
                .unwrap();
        }

        let mut state = state_with_relay(relay, server, secret, 2);
        assert_eq!(pull(&mut state).unwrap(), 2);
        assert_eq!(pull(&mut state).unwrap(), 2);
        assert_eq!(pull(&mut state).unwrap(), 1);
        assert_eq!(pull(&mut state).unwrap(), 0);
        assert_eq!(state.model.message_count(&general.id), 5);
    }

    #[test]
    fn test_stale_bundle_id_leaves_cursor() {
        let older = Id::generate();
        let newer = Id::generate();
        let mut cursor = newer;

        advance(&mut cursor, older);
        assert_eq!(cursor, newer);
        advance(&mut cursor, newer);
        assert_eq!(cursor, newer);
        advance(&mut cursor, Id::generate());
        assert!(cursor > newer);
    }

    #[test]
    fn test_local_message_pushed_once() {
        let server = Id::generate();
        let secret = Secret::new(vec![9; 4]);
        let shared = std::sync::Arc::new(std::sync::Mutex::new(MemoryRelay::default()));
        shared.lock().unwrap().add_team(server, secret.clone());

        let mut state = ServerState::new(ServerInfo::now()).with_relay(RelayLink {
            relay: Box::new(Shared(shared.clone())),
            server,
            secret,
            batch_size: 32,
        });
        let alice = state.model.create_user("alice".into()).unwrap();
        let general = state
            .model
            .create_conversation("general".into(), alice.id)
            .unwrap();
        let message = state
            .model
            .create_message(alice.id, general.id, "hi".into())
            .unwrap();

        let (timeline, mut executor) = timeline::timeline();
        schedule_push(&timeline, message.id).unwrap();
        assert_eq!(executor.run_pending(&mut state), 1);
        assert_eq!(shared.lock().unwrap().len(), 1);

        // Pulling our own bundle back creates nothing and schedules no push.
        assert_eq!(pull(&mut state).unwrap(), 1);
        assert_eq!(state.model.message_count(&general.id), 1);
        assert_eq!(executor.run_pending(&mut state), 0);
        assert_eq!(shared.lock().unwrap().len(), 1);
    }

    fn arb_bundles() -> impl Strategy<Value = Vec<Bundle>> {
        // A few users and conversations, many messages, some replayed.
        (1usize..4, 1usize..4, 1usize..24).prop_flat_map(|(users, conversations, messages)| {
            let users: Vec<Component> = (0..users).map(|i| component(&format!("u{i}"), i as i64)).collect();
            let conversations: Vec<Component> =
                (0..conversations).map(|i| component(&format!("c{i}"), i as i64)).collect();
            let picks = proptest::collection::vec(
                (0..users.len(), 0..conversations.len(), 0i64..10_000, any::<bool>()),
                messages,
            );
            picks.prop_map(move |picks| {
                let mut out: Vec<Bundle> = Vec::new();
                for (u, c, millis, replay) in picks {
                    match out.last() {
                        Some(previous) if replay => out.push(previous.clone()),
                        _ => out.push(bundle(&users[u], &conversations[c], "text", millis)),
                    }
                }
                out
            })
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(bundles in arb_bundles()) {
            let mut once = Model::new();
            let mut cursor = Id::NULL;
            merge_batch(&mut once, &mut cursor, &bundles);
            let revision = once.revision();

            // Replaying everything changes nothing.
            let mut replay_cursor = cursor;
            prop_assert_eq!(merge_batch(&mut once, &mut replay_cursor, &bundles), 0);
            prop_assert_eq!(once.revision(), revision);
            prop_assert_eq!(replay_cursor, cursor);

            let distinct: std::collections::HashSet<Id> =
                bundles.iter().map(|b| b.message.id).collect();
            let stored: usize = once.conversations().map(|c| once.message_count(&c.id)).sum();
            prop_assert_eq!(stored, distinct.len());
        }

        #[test]
        fn prop_cursor_never_rewinds(bundles in arb_bundles(), batch in 1u32..6) {
            let server = Id::generate();
            let secret = Secret::new(vec![3; 8]);
            let mut relay = MemoryRelay::default();
            relay.add_team(server, secret.clone());
            for b in &bundles {
                relay.write(server, &secret, &b.user, &b.conversation, &b.message).unwrap();
            }

            let mut state = state_with_relay(relay, server, secret, batch);
            let mut previous = state.cursor;
            loop {
                let processed = pull(&mut state).unwrap();
                prop_assert!(state.cursor >= previous);
                if processed == 0 {
                    break;
                }
                prop_assert!(state.cursor > previous);
                previous = state.cursor;
            }
        }
    }
}
