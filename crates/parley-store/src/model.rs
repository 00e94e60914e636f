//! In-memory model of users, conversations, messages and interest sets.
//!
//! The [`Model`] is owned by the server's single scheduler thread and is never
//! shared, so it carries no locking. Every mutation bumps a revision counter
//! that the persistence task uses to skip unchanged snapshots.

use std::collections::{BTreeMap, HashMap};

use parley_shared::{Id, Time};

use crate::error::{Result, StoreError};
use crate::models::{ConversationHeader, ConversationPayload, InterestSet, Message, User};

#[derive(Debug, Default)]
pub struct Model {
    users: BTreeMap<Id, User>,
    conversations: BTreeMap<Id, ConversationHeader>,
    payloads: HashMap<Id, ConversationPayload>,
    messages: HashMap<Id, Message>,
    interests: HashMap<Id, InterestSet>,
    revision: u64,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn user(&self, id: &Id) -> Option<&User> {
        self.users.get(id)
    }

    /// All users in creation order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn insert_user(&mut self, user: User) -> Result<()> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate {
                kind: "user",
                id: user.id,
            });
        }
        self.users.insert(user.id, user);
        self.touch();
        Ok(())
    }

    pub fn create_user(&mut self, name: String) -> Result<User> {
        let user = User {
            id: Id::generate(),
            name,
            creation: Time::now(),
        };
        self.insert_user(user.clone())?;
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub fn conversation(&self, id: &Id) -> Option<&ConversationHeader> {
        self.conversations.get(id)
    }

    /// All conversation headers in creation order.
    pub fn conversations(&self) -> impl Iterator<Item = &ConversationHeader> {
        self.conversations.values()
    }

    pub fn payload(&self, id: &Id) -> Option<&ConversationPayload> {
        self.payloads.get(id)
    }

    pub fn insert_conversation(&mut self, header: ConversationHeader) -> Result<()> {
        if self.conversations.contains_key(&header.id) {
            return Err(StoreError::Duplicate {
                kind: "conversation",
                id: header.id,
            });
        }
        if !self.users.contains_key(&header.creator) {
            return Err(StoreError::MissingReference {
                kind: "user",
                id: header.creator,
            });
        }
        self.payloads
            .insert(header.id, ConversationPayload::empty(header.id));
        self.conversations.insert(header.id, header);
        self.touch();
        Ok(())
    }

    pub fn create_conversation(&mut self, title: String, owner: Id) -> Result<ConversationHeader> {
        let header = ConversationHeader::new(Id::generate(), title, owner, Time::now());
        self.insert_conversation(header.clone())?;
        Ok(header)
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    pub fn is_member(&self, conversation: &Id, user: &Id) -> bool {
        self.conversations
            .get(conversation)
            .is_some_and(|c| c.members.contains(user))
    }

    pub fn is_owner(&self, conversation: &Id, user: &Id) -> bool {
        self.conversations
            .get(conversation)
            .is_some_and(|c| c.owners.contains(user))
    }

    pub fn is_creator(&self, conversation: &Id, user: &Id) -> bool {
        self.conversations
            .get(conversation)
            .is_some_and(|c| c.creator == *user)
    }

    /// Apply a role change to one conversation. The closure sees the header's
    /// owner and member sets; the creator and metadata stay untouched.
    pub fn update_roles<F>(&mut self, conversation: &Id, change: F) -> Result<()>
    where
        F: FnOnce(&mut std::collections::BTreeSet<Id>, &mut std::collections::BTreeSet<Id>),
    {
        let header = self
            .conversations
            .get_mut(conversation)
            .ok_or(StoreError::MissingReference {
                kind: "conversation",
                id: *conversation,
            })?;
        change(&mut header.owners, &mut header.members);
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn message(&self, id: &Id) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Link a message into its conversation.
    ///
    /// Messages are kept in `(creation, id)` order; a message that arrives late
    /// (e.g. from the relay) is spliced in at its position rather than
    /// appended.
    pub fn insert_message(&mut self, mut message: Message) -> Result<()> {
        if self.messages.contains_key(&message.id) {
            return Err(StoreError::Duplicate {
                kind: "message",
                id: message.id,
            });
        }
        if !self.users.contains_key(&message.author) {
            return Err(StoreError::MissingReference {
                kind: "user",
                id: message.author,
            });
        }
        let payload = *self
            .payloads
            .get(&message.conversation)
            .ok_or(StoreError::MissingReference {
                kind: "conversation",
                id: message.conversation,
            })?;

        // Walk back from the tail to the last message that sorts before this one.
        let key = (message.creation, message.id);
        let mut previous = payload.last_message;
        while let Some(existing) = self.messages.get(&previous) {
            if (existing.creation, existing.id) < key {
                break;
            }
            previous = existing.previous;
        }
        let next = match self.messages.get(&previous) {
            Some(prev) => prev.next,
            None => payload.first_message,
        };

        message.previous = previous;
        message.next = next;

        if let Some(prev) = self.messages.get_mut(&previous) {
            prev.next = message.id;
        }
        if let Some(following) = self.messages.get_mut(&next) {
            following.previous = message.id;
        }

        let entry = self
            .payloads
            .entry(message.conversation)
            .or_insert_with(|| ConversationPayload::empty(message.conversation));
        if previous.is_null() {
            entry.first_message = message.id;
        }
        if next.is_null() {
            entry.last_message = message.id;
        }

        self.messages.insert(message.id, message);
        self.touch();
        Ok(())
    }

    pub fn create_message(&mut self, author: Id, conversation: Id, content: String) -> Result<Message> {
        let id = Id::generate();
        self.insert_message(Message::new(id, author, conversation, content, Time::now()))?;
        self.messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::MissingReference { kind: "message", id })
    }

    /// Messages of a conversation, oldest first.
    pub fn messages_in(&self, conversation: &Id) -> Vec<&Message> {
        let mut out = Vec::new();
        let mut cursor = self
            .payloads
            .get(conversation)
            .map(|p| p.first_message)
            .unwrap_or(Id::NULL);
        while let Some(message) = self.messages.get(&cursor) {
            out.push(message);
            cursor = message.next;
        }
        out
    }

    pub fn message_count(&self, conversation: &Id) -> usize {
        self.messages_in(conversation).len()
    }

    // ------------------------------------------------------------------
    // Interest sets
    // ------------------------------------------------------------------

    /// The user's interest set, or an empty one if none was ever stored.
    pub fn interest_set(&self, user: &Id) -> InterestSet {
        self.interests
            .get(user)
            .cloned()
            .unwrap_or_else(|| InterestSet::empty(*user))
    }

    /// Replace the user's interest set wholesale.
    pub fn set_interest_set(&mut self, user: Id, mut interests: InterestSet) {
        interests.owner = user;
        self.interests.insert(user, interests);
        self.touch();
    }

    pub fn interest_sets(&self) -> impl Iterator<Item = &InterestSet> {
        self.interests.values()
    }

    // ------------------------------------------------------------------
    // Restore
    // ------------------------------------------------------------------

    /// Rebuild a model from snapshot records. Message links and payload
    /// pointers are taken as stored.
    pub fn restore(
        users: Vec<User>,
        conversations: Vec<ConversationHeader>,
        payloads: Vec<ConversationPayload>,
        messages: Vec<Message>,
        interests: Vec<InterestSet>,
    ) -> Self {
        let mut model = Self::new();
        model.users = users.into_iter().map(|u| (u.id, u)).collect();
        model.conversations = conversations.into_iter().map(|c| (c.id, c)).collect();
        model.payloads = model
            .conversations
            .keys()
            .map(|id| (*id, ConversationPayload::empty(*id)))
            .collect();
        for payload in payloads {
            model.payloads.insert(payload.id, payload);
        }
        model.messages = messages.into_iter().map(|m| (m.id, m)).collect();
        model.interests = interests.into_iter().map(|i| (i.owner, i)).collect();
        model
    }

    pub fn all_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &ConversationPayload> {
        self.payloads.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_conversation() -> (Model, User, ConversationHeader) {
        let mut model = Model::new();
        let alice = model.create_user("alice".into()).unwrap();
        let general = model
            .create_conversation("general".into(), alice.id)
            .unwrap();
        (model, alice, general)
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let mut model = Model::new();
        let user = model.create_user("alice".into()).unwrap();
        let err = model.insert_user(user).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { kind: "user", .. }));
    }

    #[test]
    fn test_conversation_requires_known_creator() {
        let mut model = Model::new();
        let err = model
            .create_conversation("general".into(), Id::generate())
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference { kind: "user", .. }));
        assert_eq!(model.conversations().count(), 0);
    }

    #[test]
    fn test_roles_queries() {
        let (model, alice, general) = model_with_conversation();
        assert!(model.is_member(&general.id, &alice.id));
        assert!(model.is_owner(&general.id, &alice.id));
        assert!(model.is_creator(&general.id, &alice.id));
        assert!(!model.is_member(&Id::generate(), &alice.id));
    }

    #[test]
    fn test_messages_are_linked_in_order() {
        let (mut model, alice, general) = model_with_conversation();
        let first = model.create_message(alice.id, general.id, "one".into()).unwrap();
        let second = model.create_message(alice.id, general.id, "two".into()).unwrap();

        let messages = model.messages_in(&general.id);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);

        assert_eq!(model.message(&first.id).unwrap().next, second.id);
        assert_eq!(model.message(&second.id).unwrap().previous, first.id);

        let payload = model.payload(&general.id).unwrap();
        assert_eq!(payload.first_message, first.id);
        assert_eq!(payload.last_message, second.id);
    }

    #[test]
    fn test_late_message_is_spliced_by_creation_time() {
        let (mut model, alice, general) = model_with_conversation();
        let early = Time::from_millis(1_000).unwrap();
        let middle = Time::from_millis(2_000).unwrap();
        let late = Time::from_millis(3_000).unwrap();

        let a = Message::new(Id::generate(), alice.id, general.id, "a".into(), early);
        let c = Message::new(Id::generate(), alice.id, general.id, "c".into(), late);
        let b = Message::new(Id::generate(), alice.id, general.id, "b".into(), middle);
        model.insert_message(a.clone()).unwrap();
        model.insert_message(c.clone()).unwrap();
        model.insert_message(b.clone()).unwrap();

        let contents: Vec<&str> = model
            .messages_in(&general.id)
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert_eq!(model.message(&c.id).unwrap().previous, b.id);
        assert_eq!(model.message(&a.id).unwrap().next, b.id);
    }

    #[test]
    fn test_message_before_all_others_becomes_first() {
        let (mut model, alice, general) = model_with_conversation();
        let later = Message::new(
            Id::generate(),
            alice.id,
            general.id,
            "later".into(),
            Time::from_millis(5_000).unwrap(),
        );
        let earlier = Message::new(
            Id::generate(),
            alice.id,
            general.id,
            "earlier".into(),
            Time::from_millis(1_000).unwrap(),
        );
        model.insert_message(later.clone()).unwrap();
        model.insert_message(earlier.clone()).unwrap();

        let payload = model.payload(&general.id).unwrap();
        assert_eq!(payload.first_message, earlier.id);
        assert_eq!(payload.last_message, later.id);
    }

    #[test]
    fn test_message_requires_known_conversation() {
        let (mut model, alice, _) = model_with_conversation();
        let err = model
            .create_message(alice.id, Id::generate(), "lost".into())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingReference { kind: "conversation", .. }
        ));
    }

    #[test]
    fn test_interest_set_defaults_and_replaces() {
        let (mut model, alice, general) = model_with_conversation();
        assert_eq!(model.interest_set(&alice.id), InterestSet::empty(alice.id));

        let mut interests = InterestSet::empty(Id::generate());
        interests.conversations.insert(general.id);
        model.set_interest_set(alice.id, interests);

        let stored = model.interest_set(&alice.id);
        assert_eq!(stored.owner, alice.id);
        assert!(stored.conversations.contains(&general.id));

        model.set_interest_set(alice.id, InterestSet::empty(alice.id));
        assert!(model.interest_set(&alice.id).conversations.is_empty());
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut model = Model::new();
        let before = model.revision();
        model.create_user("alice".into()).unwrap();
        assert!(model.revision() > before);

        let after = model.revision();
        let _ = model.user(&Id::NULL);
        assert_eq!(model.revision(), after);
    }
}
