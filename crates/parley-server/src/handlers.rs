//! Client request handlers.
//!
//! Every handler reads its full request before validating anything, checks
//! membership or authority before mutating, and writes its response code
//! followed by the payload. Refusals return [`Outcome::Denied`] and leave the
//! access-denied code to the dispatcher.

use std::io::{Read, Write};

use parley_shared::{Id, Opcode, Wire};
use parley_store::{ConversationPayload, InterestSet, Message};
use tracing::{debug, info, warn};

use crate::authority::{self, Parameter};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::ServerError;
use crate::server::ServerState;
use crate::sync;
use crate::timeline::Timeline;

type HandlerResult = Result<Outcome, ServerError>;

/// Register every client opcode on `dispatcher`.
pub fn register(dispatcher: Dispatcher<ServerState>) -> Dispatcher<ServerState> {
    dispatcher
        .register(Opcode::NewUserRequest, new_user)
        .register(Opcode::NewConversationRequest, new_conversation)
        .register(Opcode::NewMessageRequest, new_message)
        .register(Opcode::GetUsersRequest, get_users)
        .register(Opcode::GetAllConversationsRequest, get_all_conversations)
        .register(Opcode::GetConversationsByIdRequest, get_conversations_by_id)
        .register(Opcode::GetMessagesByIdRequest, get_messages_by_id)
        .register(Opcode::ServerInfoRequest, server_info)
        .register(Opcode::InterestSetRequest, get_interest_set)
        .register(Opcode::InterestSetRecord, record_interest_set)
        .register(Opcode::ConversationAuthorityRequest, conversation_authority)
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

fn new_user(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let name = String::read_from(input)?;

    let user = state.model.create_user(name)?;
    info!(user = %user.id, name = %user.name, "user created");

    Opcode::NewUserResponse.write_to(output)?;
    Some(user).write_to(output)?;
    Ok(Outcome::Replied)
}

fn new_conversation(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let title = String::read_from(input)?;
    let owner = Id::read_from(input)?;

    let header = if state.model.user(&owner).is_some() {
        let header = state.model.create_conversation(title, owner)?;
        info!(conversation = %header.id, owner = %owner, "conversation created");
        Some(header)
    } else {
        debug!(owner = %owner, "conversation owner unknown");
        None
    };

    Opcode::NewConversationResponse.write_to(output)?;
    header.write_to(output)?;
    Ok(Outcome::Replied)
}

fn new_message(
    state: &mut ServerState,
    timeline: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let author = Id::read_from(input)?;
    let conversation = Id::read_from(input)?;
    let body = String::read_from(input)?;

    if !state.model.is_member(&conversation, &author) {
        debug!(author = %author, conversation = %conversation, "author is not a member");
        return Ok(Outcome::Denied);
    }

    let message = state.model.create_message(author, conversation, body)?;
    debug!(message = %message.id, conversation = %conversation, "message created");

    let id = message.id;
    Opcode::NewMessageResponse.write_to(output)?;
    Some(message).write_to(output)?;

    if state.relay.is_some() {
        if let Err(e) = sync::schedule_push(timeline, id) {
            warn!(message = %id, error = %e, "could not schedule relay push");
        }
    }
    Ok(Outcome::Replied)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn get_users(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    _: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let users: Vec<_> = state.model.users().cloned().collect();
    Opcode::GetUsersResponse.write_to(output)?;
    users.write_to(output)?;
    Ok(Outcome::Replied)
}

fn get_all_conversations(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    _: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let headers: Vec<_> = state.model.conversations().cloned().collect();
    Opcode::GetAllConversationsResponse.write_to(output)?;
    headers.write_to(output)?;
    Ok(Outcome::Replied)
}

/// Payloads for the requested ids that exist, in request order.
fn get_conversations_by_id(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let ids = Vec::<Id>::read_from(input)?;

    let payloads: Vec<ConversationPayload> = ids
        .iter()
        .filter_map(|id| state.model.payload(id).copied())
        .collect();

    Opcode::GetConversationsByIdResponse.write_to(output)?;
    payloads.write_to(output)?;
    Ok(Outcome::Replied)
}

/// Messages for the requested ids, restricted to the named conversation.
/// Unknown ids and messages from other conversations are skipped.
fn get_messages_by_id(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let conversation = Id::read_from(input)?;
    let requester = Id::read_from(input)?;
    let ids = Vec::<Id>::read_from(input)?;

    if !state.model.is_member(&conversation, &requester) {
        debug!(requester = %requester, conversation = %conversation, "requester is not a member");
        return Ok(Outcome::Denied);
    }

    let messages: Vec<Message> = ids
        .iter()
        .filter_map(|id| state.model.message(id))
        .filter(|message| message.conversation == conversation)
        .cloned()
        .collect();

    Opcode::GetMessagesByIdResponse.write_to(output)?;
    messages.write_to(output)?;
    Ok(Outcome::Replied)
}

fn server_info(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    _: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    Opcode::ServerInfoResponse.write_to(output)?;
    state.info.version.write_to(output)?;
    state.info.start.write_to(output)?;
    Ok(Outcome::Replied)
}

// ---------------------------------------------------------------------------
// Interest sets
// ---------------------------------------------------------------------------

fn get_interest_set(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let user = Id::read_from(input)?;
    Opcode::InterestSetResponse.write_to(output)?;
    state.model.interest_set(&user).write_to(output)?;
    Ok(Outcome::Replied)
}

/// Replace a user's interest set. There is no response, not even a code.
fn record_interest_set(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    _: &mut dyn Write,
) -> HandlerResult {
    let user = Id::read_from(input)?;
    let interests = InterestSet::read_from(input)?;

    if state.model.user(&user).is_none() {
        debug!(user = %user, "ignoring interest set for unknown user");
        return Ok(Outcome::Replied);
    }
    state.model.set_interest_set(user, interests);
    Ok(Outcome::Replied)
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

fn conversation_authority(
    state: &mut ServerState,
    _: &Timeline<ServerState>,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> HandlerResult {
    let conversation = Id::read_from(input)?;
    let target = Id::read_from(input)?;
    let actor = Id::read_from(input)?;
    let parameter = String::read_from(input)?;

    let Some(parameter) = Parameter::parse(&parameter) else {
        debug!(parameter = %parameter, "unknown authority parameter");
        return Ok(Outcome::Denied);
    };
    let Some(header) = state.model.conversation(&conversation) else {
        debug!(conversation = %conversation, "unknown conversation");
        return Ok(Outcome::Denied);
    };
    if state.model.user(&target).is_none() {
        debug!(target = %target, "unknown target user");
        return Ok(Outcome::Denied);
    }
    if let Err(denial) = authority::decide(header, actor, target, parameter) {
        debug!(
            conversation = %conversation,
            actor = %actor,
            target = %target,
            %parameter,
            reason = %denial,
            "authority change denied"
        );
        return Ok(Outcome::Denied);
    }

    state.model.update_roles(&conversation, |owners, members| {
        authority::apply(parameter, target, owners, members)
    })?;
    info!(conversation = %conversation, actor = %actor, target = %target, %parameter, "roles changed");

    Opcode::ConversationAuthorityResponse.write_to(output)?;
    Ok(Outcome::Replied)
}
