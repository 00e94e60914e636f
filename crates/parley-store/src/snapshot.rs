//! Whole-model snapshots.
//!
//! A [`Snapshot`] is a detached copy of every record in a [`Model`] plus the
//! relay cursor. [`SnapshotStore`] is the narrow save/load capability the
//! server's persistence task drives; [`Database`] implements it by rewriting
//! every table inside one transaction.

use std::collections::HashMap;

use parley_shared::{Id, Time};

use crate::database::Database;
use crate::error::Result;
use crate::interests::CURSOR_KEY;
use crate::model::Model;
use crate::models::{ConversationHeader, ConversationPayload, InterestSet, Message, User};

const SAVED_AT_KEY: &str = "saved_at";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub conversations: Vec<ConversationHeader>,
    pub payloads: Vec<ConversationPayload>,
    pub messages: Vec<Message>,
    pub interests: Vec<InterestSet>,
    pub cursor: Id,
}

impl Snapshot {
    /// Copy every record out of the model.
    pub fn capture(model: &Model, cursor: Id) -> Self {
        Self {
            users: model.users().cloned().collect(),
            conversations: model.conversations().cloned().collect(),
            payloads: model.payloads().copied().collect(),
            messages: model.all_messages().cloned().collect(),
            interests: model.interest_sets().cloned().collect(),
            cursor,
        }
    }

    /// Rebuild a model from this snapshot, returning it with the cursor.
    pub fn into_model(self) -> (Model, Id) {
        let model = Model::restore(
            self.users,
            self.conversations,
            self.payloads,
            self.messages,
            self.interests,
        );
        (model, self.cursor)
    }
}

/// Opaque save/load capability for whole-model snapshots.
pub trait SnapshotStore: Send {
    fn save(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<Snapshot>>;
}

impl SnapshotStore for Database {
    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        self.clear_interest_sets()?;
        self.clear_conversations()?;
        self.clear_users()?;

        for user in &snapshot.users {
            self.insert_user(user)?;
        }

        let payloads: HashMap<Id, &ConversationPayload> =
            snapshot.payloads.iter().map(|p| (p.id, p)).collect();
        for header in &snapshot.conversations {
            let payload = payloads
                .get(&header.id)
                .map(|p| **p)
                .unwrap_or_else(|| ConversationPayload::empty(header.id));
            self.insert_conversation(header, &payload)?;
        }

        for message in &snapshot.messages {
            self.insert_message(message)?;
        }
        for interests in &snapshot.interests {
            self.insert_interest_set(interests)?;
        }

        self.set_state(CURSOR_KEY, &snapshot.cursor.to_string())?;
        self.set_state(SAVED_AT_KEY, &Time::now().as_millis().to_string())?;

        tx.commit()?;

        tracing::debug!(
            users = snapshot.users.len(),
            conversations = snapshot.conversations.len(),
            messages = snapshot.messages.len(),
            cursor = %snapshot.cursor,
            "snapshot written"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        if self.state(SAVED_AT_KEY)?.is_none() {
            return Ok(None);
        }

        let (conversations, payloads) = self.list_conversations()?;
        Ok(Some(Snapshot {
            users: self.list_users()?,
            conversations,
            payloads,
            messages: self.list_messages()?,
            interests: self.list_interest_sets()?,
            cursor: self.cursor()?,
        }))
    }
}
