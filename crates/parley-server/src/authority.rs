//! Conversation role changes.
//!
//! Every conversation has exactly one creator, a set of owners and a set of
//! members. [`decide`] is a pure check of whether `actor` may apply a
//! [`Parameter`] to `target`; [`apply`] performs an approved transition.
//!
//! The creator is never restricted by the owner-only rules, and since no
//! rule lets anyone but the creator target the creator, the creator keeps its
//! roles for the life of the conversation.

use std::collections::BTreeSet;
use std::fmt;

use parley_shared::Id;
use parley_store::ConversationHeader;

/// A requested role transition, named by its one-letter wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// `O`: make the target an owner (and a member).
    Promote,
    /// `o`: take owner rights away, leaving a plain member.
    Demote,
    /// `m`: add the target as a member.
    Member,
    /// `b`: remove the target from the conversation entirely.
    Remove,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Promote,
        Parameter::Demote,
        Parameter::Member,
        Parameter::Remove,
    ];

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "O" => Some(Self::Promote),
            "o" => Some(Self::Demote),
            "m" => Some(Self::Member),
            "b" => Some(Self::Remove),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Promote => "O",
            Self::Demote => "o",
            Self::Member => "m",
            Self::Remove => "b",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a role change was refused. All of them map to the same access-denied
/// response on the wire; the reason only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    SelfTarget,
    NotMember,
    NotOwner,
    OwnerCannotDemote,
    TargetIsOwner,
    TargetIsCreator,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::SelfTarget => "actor targets itself",
            Self::NotMember => "actor is not a member",
            Self::NotOwner => "actor is neither owner nor creator",
            Self::OwnerCannotDemote => "owners may not demote",
            Self::TargetIsOwner => "owners may not act on other owners",
            Self::TargetIsCreator => "owners may not act on the creator",
        };
        f.write_str(reason)
    }
}

/// Decide whether `actor` may apply `parameter` to `target` in `header`.
pub fn decide(
    header: &ConversationHeader,
    actor: Id,
    target: Id,
    parameter: Parameter,
) -> Result<(), Denial> {
    if actor == target {
        return Err(Denial::SelfTarget);
    }
    if !header.members.contains(&actor) {
        return Err(Denial::NotMember);
    }

    let is_creator = header.creator == actor;
    if is_creator {
        return Ok(());
    }
    if !header.owners.contains(&actor) {
        return Err(Denial::NotOwner);
    }

    // Plain owner from here on.
    if parameter == Parameter::Demote {
        return Err(Denial::OwnerCannotDemote);
    }
    if header.owners.contains(&target) {
        return Err(Denial::TargetIsOwner);
    }
    if header.creator == target {
        return Err(Denial::TargetIsCreator);
    }
    Ok(())
}

/// Apply an approved transition to the role sets.
pub fn apply(
    parameter: Parameter,
    target: Id,
    owners: &mut BTreeSet<Id>,
    members: &mut BTreeSet<Id>,
) {
    match parameter {
        Parameter::Promote => {
            owners.insert(target);
            members.insert(target);
        }
        Parameter::Demote => {
            owners.remove(&target);
            members.insert(target);
        }
        Parameter::Member => {
            members.insert(target);
        }
        Parameter::Remove => {
            owners.remove(&target);
            members.remove(&target);
        }
    }
}
