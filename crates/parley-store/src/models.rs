//! Domain records owned by the [`Model`](crate::Model).
//!
//! Every record derives `Serialize` and `Deserialize` and implements
//! [`Wire`] so handlers can write it straight onto a connection.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use parley_shared::{Id, ProtocolError, Time, Wire};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A chat participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub creation: Time,
}

impl Wire for User {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.id.write_to(out)?;
        self.name.write_to(out)?;
        self.creation.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: Id::read_from(input)?,
            name: String::read_from(input)?,
            creation: Time::read_from(input)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Header metadata and authority roles of a conversation.
///
/// The creator never changes. Owners and members are tracked separately: an
/// owner that was deposed stays a member, and nothing forces owners to be
/// members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationHeader {
    pub id: Id,
    pub title: String,
    pub creation: Time,
    pub creator: Id,
    pub owners: BTreeSet<Id>,
    pub members: BTreeSet<Id>,
    pub restricted: bool,
}

impl ConversationHeader {
    /// A fresh conversation whose creator is its only owner and member.
    pub fn new(id: Id, title: String, creator: Id, creation: Time) -> Self {
        Self {
            id,
            title,
            creation,
            creator,
            owners: BTreeSet::from([creator]),
            members: BTreeSet::from([creator]),
            restricted: false,
        }
    }
}

impl Wire for ConversationHeader {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.id.write_to(out)?;
        self.title.write_to(out)?;
        self.creation.write_to(out)?;
        self.creator.write_to(out)?;
        self.owners.write_to(out)?;
        self.members.write_to(out)?;
        self.restricted.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: Id::read_from(input)?,
            title: String::read_from(input)?,
            creation: Time::read_from(input)?,
            creator: Id::read_from(input)?,
            owners: BTreeSet::read_from(input)?,
            members: BTreeSet::read_from(input)?,
            restricted: bool::read_from(input)?,
        })
    }
}

/// First and last message of a conversation. [`Id::NULL`] when empty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationPayload {
    pub id: Id,
    pub first_message: Id,
    pub last_message: Id,
}

impl ConversationPayload {
    pub fn empty(id: Id) -> Self {
        Self {
            id,
            first_message: Id::NULL,
            last_message: Id::NULL,
        }
    }
}

impl Wire for ConversationPayload {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.id.write_to(out)?;
        self.first_message.write_to(out)?;
        self.last_message.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: Id::read_from(input)?,
            first_message: Id::read_from(input)?,
            last_message: Id::read_from(input)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, linked to its neighbours in the conversation.
///
/// Content never changes after creation; only `previous`/`next` are
/// maintained by the store as later messages arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Id,
    pub author: Id,
    pub conversation: Id,
    pub content: String,
    pub creation: Time,
    pub previous: Id,
    pub next: Id,
}

impl Message {
    /// An unlinked message; the store fills in the links on insert.
    pub fn new(id: Id, author: Id, conversation: Id, content: String, creation: Time) -> Self {
        Self {
            id,
            author,
            conversation,
            content,
            creation,
            previous: Id::NULL,
            next: Id::NULL,
        }
    }
}

impl Wire for Message {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.id.write_to(out)?;
        self.previous.write_to(out)?;
        self.creation.write_to(out)?;
        self.author.write_to(out)?;
        self.content.write_to(out)?;
        self.next.write_to(out)?;
        self.conversation.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let id = Id::read_from(input)?;
        let previous = Id::read_from(input)?;
        let creation = Time::read_from(input)?;
        let author = Id::read_from(input)?;
        let content = String::read_from(input)?;
        let next = Id::read_from(input)?;
        let conversation = Id::read_from(input)?;
        Ok(Self {
            id,
            author,
            conversation,
            content,
            creation,
            previous,
            next,
        })
    }
}

// ---------------------------------------------------------------------------
// Interest set
// ---------------------------------------------------------------------------

/// Conversations and users a user watches, plus per-conversation counters
/// (messages seen at the last status update).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterestSet {
    pub owner: Id,
    pub users: BTreeSet<Id>,
    pub conversations: BTreeSet<Id>,
    pub counters: BTreeMap<Id, u32>,
}

impl InterestSet {
    pub fn empty(owner: Id) -> Self {
        Self {
            owner,
            ..Self::default()
        }
    }
}

impl Wire for InterestSet {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.owner.write_to(out)?;
        self.users.write_to(out)?;
        self.conversations.write_to(out)?;
        self.counters.write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Self {
            owner: Id::read_from(input)?,
            users: BTreeSet::read_from(input)?,
            conversations: BTreeSet::read_from(input)?,
            counters: BTreeMap::read_from(input)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use parley_shared::protocol::to_bytes;

    use super::*;

    #[test]
    fn test_new_conversation_roles() {
        let creator = Id::generate();
        let header = ConversationHeader::new(Id::generate(), "general".into(), creator, Time::now());
        assert!(header.owners.contains(&creator));
        assert!(header.members.contains(&creator));
        assert!(!header.restricted);
    }

    #[test]
    fn test_header_wire_layout_decodes() {
        let creator = Id::generate();
        let mut header =
            ConversationHeader::new(Id::generate(), "general".into(), creator, Time::now());
        header.members.insert(Id::generate());
        header.restricted = true;

        let bytes = to_bytes(&header).unwrap();
        let decoded = ConversationHeader::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_interest_set_counters_decode() {
        let mut interests = InterestSet::empty(Id::generate());
        let conversation = Id::generate();
        interests.conversations.insert(conversation);
        interests.counters.insert(conversation, 12);

        let bytes = to_bytes(&interests).unwrap();
        let decoded = InterestSet::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.counters.get(&conversation), Some(&12));
        assert_eq!(decoded, interests);
    }
}
