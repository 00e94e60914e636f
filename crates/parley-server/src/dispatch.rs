//! Opcode dispatch table.
//!
//! A [`Dispatcher`] maps each request [`Opcode`] to a [`Handler`]. The
//! dispatcher reads the opcode, runs the handler, and writes the shared
//! access-denied code when the handler refuses. Unknown or unregistered
//! opcodes get the `NoMessage` sentinel and nothing else.

use std::collections::HashMap;
use std::io::{Read, Write};

use parley_shared::{Opcode, Wire};
use tracing::debug;

use crate::error::ServerError;
use crate::timeline::Timeline;

/// What a handler did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler wrote its full response (possibly empty).
    Replied,
    /// The request was refused; nothing was mutated and nothing written.
    Denied,
}

/// Result of dispatching one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Handled(Opcode, Outcome),
    Unknown(u32),
}

pub trait Handler<S>: Send + Sync {
    fn handle(
        &self,
        state: &mut S,
        timeline: &Timeline<S>,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Outcome, ServerError>;
}

impl<S, F> Handler<S> for F
where
    F: Fn(&mut S, &Timeline<S>, &mut dyn Read, &mut dyn Write) -> Result<Outcome, ServerError>
        + Send
        + Sync,
{
    fn handle(
        &self,
        state: &mut S,
        timeline: &Timeline<S>,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Outcome, ServerError> {
        self(state, timeline, input, output)
    }
}

pub struct Dispatcher<S> {
    handlers: HashMap<Opcode, Box<dyn Handler<S>>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> Dispatcher<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `opcode`, replacing any previous one.
    pub fn register<H>(mut self, opcode: Opcode, handler: H) -> Self
    where
        H: Handler<S> + 'static,
    {
        self.handlers.insert(opcode, Box::new(handler));
        self
    }

    /// Read one opcode from `input` and run its handler.
    pub fn dispatch(
        &self,
        state: &mut S,
        timeline: &Timeline<S>,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Dispatched, ServerError> {
        let code = u32::read_from(input)?;

        let Some((opcode, handler)) =
            Opcode::from_code(code).and_then(|op| self.handlers.get(&op).map(|h| (op, h)))
        else {
            debug!(code, "no handler for opcode");
            Opcode::NoMessage.write_to(output)?;
            return Ok(Dispatched::Unknown(code));
        };

        let outcome = handler.handle(state, timeline, input, output)?;
        if outcome == Outcome::Denied {
            debug!(?opcode, "request denied");
            Opcode::AccessDenied.write_to(output)?;
        }
        Ok(Dispatched::Handled(opcode, outcome))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use parley_shared::protocol::to_bytes;

    use super::*;
    use crate::timeline;

    fn echo(
        count: &mut u32,
        _: &Timeline<u32>,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Outcome, ServerError> {
        let value = u32::read_from(input)?;
        *count += 1;
        Opcode::NewUserResponse.write_to(output)?;
        value.write_to(output)?;
        Ok(Outcome::Replied)
    }

    fn refuse(
        _: &mut u32,
        _: &Timeline<u32>,
        _: &mut dyn Read,
        _: &mut dyn Write,
    ) -> Result<Outcome, ServerError> {
        Ok(Outcome::Denied)
    }

    fn dispatcher() -> Dispatcher<u32> {
        Dispatcher::new()
            .register(Opcode::NewUserRequest, echo)
            .register(Opcode::NewMessageRequest, refuse)
    }

    fn request(code: u32, body: &[u8]) -> Cursor<Vec<u8>> {
        let mut bytes = to_bytes(&code).unwrap();
        bytes.extend_from_slice(body);
        Cursor::new(bytes)
    }

    #[test]
    fn test_registered_opcode_runs_handler() {
        let (timeline, _executor) = timeline::timeline();
        let mut count = 0;
        let mut output = Vec::new();

        let dispatched = dispatcher()
            .dispatch(
                &mut count,
                &timeline,
                &mut request(Opcode::NewUserRequest.code(), &to_bytes(&7u32).unwrap()),
                &mut output,
            )
            .unwrap();

        assert_eq!(
            dispatched,
            Dispatched::Handled(Opcode::NewUserRequest, Outcome::Replied)
        );
        assert_eq!(count, 1);
        let mut reply = Cursor::new(output);
        Opcode::NewUserResponse.expect(&mut reply).unwrap();
        assert_eq!(u32::read_from(&mut reply).unwrap(), 7);
    }

    #[test]
    fn test_unknown_opcode_writes_sentinel_only() {
        let (timeline, _executor) = timeline::timeline();
        let mut count = 0;
        let mut output = Vec::new();

        let dispatched = dispatcher()
            .dispatch(&mut count, &timeline, &mut request(9_999, &[]), &mut output)
            .unwrap();

        assert_eq!(dispatched, Dispatched::Unknown(9_999));
        assert_eq!(output, to_bytes(&Opcode::NoMessage.code()).unwrap());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_known_but_unregistered_opcode_is_unknown() {
        let (timeline, _executor) = timeline::timeline();
        let mut count = 0;
        let mut output = Vec::new();
        let code = Opcode::ServerInfoRequest.code();

        let dispatched = dispatcher()
            .dispatch(&mut count, &timeline, &mut request(code, &[]), &mut output)
            .unwrap();

        assert_eq!(dispatched, Dispatched::Unknown(code));
        assert_eq!(output, to_bytes(&Opcode::NoMessage.code()).unwrap());
    }

    #[test]
    fn test_denied_writes_access_denied() {
        let (timeline, _executor) = timeline::timeline();
        let mut count = 0;
        let mut output = Vec::new();

        dispatcher()
            .dispatch(
                &mut count,
                &timeline,
                &mut request(Opcode::NewMessageRequest.code(), &[]),
                &mut output,
            )
            .unwrap();

        assert_eq!(output, to_bytes(&Opcode::AccessDenied.code()).unwrap());
    }

    #[test]
    fn test_truncated_request_is_transport_error() {
        let (timeline, _executor) = timeline::timeline();
        let mut count = 0;
        let mut output = Vec::new();

        let result = dispatcher().dispatch(
            &mut count,
            &timeline,
            &mut request(Opcode::NewUserRequest.code(), &[0, 1]),
            &mut output,
        );

        assert!(matches!(result, Err(ServerError::Protocol(_))));
        assert!(output.is_empty());
    }
}
