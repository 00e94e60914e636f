//! Binary wire protocol.
//!
//! Every exchange starts with a big-endian `u32` opcode followed by a fixed,
//! opcode-defined sequence of length-prefixed values. The [`Wire`] trait is the
//! codec for one such value; records built from these primitives implement it
//! in the crate that owns them.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use crate::constants::{MAX_COLLECTION_LEN, MAX_SECRET_SIZE, MAX_STRING_SIZE};
use crate::error::ProtocolError;
use crate::types::{Id, Secret, Time};

/// Request and response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Opcode {
    /// Sentinel written for requests no handler understands
    NoMessage = 0,

    NewMessageRequest = 1,
    NewMessageResponse = 2,
    NewUserRequest = 3,
    NewUserResponse = 4,
    NewConversationRequest = 5,
    NewConversationResponse = 6,
    GetUsersRequest = 7,
    GetUsersResponse = 8,
    GetAllConversationsRequest = 9,
    GetAllConversationsResponse = 10,
    GetConversationsByIdRequest = 11,
    GetConversationsByIdResponse = 12,
    GetMessagesByIdRequest = 13,
    GetMessagesByIdResponse = 14,
    ServerInfoRequest = 15,
    ServerInfoResponse = 16,
    InterestSetRequest = 17,
    InterestSetResponse = 18,
    /// Store a user's interest set. Has no response.
    InterestSetRecord = 19,
    ConversationAuthorityRequest = 21,
    ConversationAuthorityResponse = 22,
    /// Membership, authority or federation check failed
    AccessDenied = 23,

    RelayReadRequest = 31,
    RelayReadResponse = 32,
    RelayWriteRequest = 33,
    RelayWriteResponse = 34,
}

impl Opcode {
    pub fn from_code(code: u32) -> Option<Self> {
        use Opcode::*;
        Some(match code {
            0 => NoMessage,
            1 => NewMessageRequest,
            2 => NewMessageResponse,
            3 => NewUserRequest,
            4 => NewUserResponse,
            5 => NewConversationRequest,
            6 => NewConversationResponse,
            7 => GetUsersRequest,
            8 => GetUsersResponse,
            9 => GetAllConversationsRequest,
            10 => GetAllConversationsResponse,
            11 => GetConversationsByIdRequest,
            12 => GetConversationsByIdResponse,
            13 => GetMessagesByIdRequest,
            14 => GetMessagesByIdResponse,
            15 => ServerInfoRequest,
            16 => ServerInfoResponse,
            17 => InterestSetRequest,
            18 => InterestSetResponse,
            19 => InterestSetRecord,
            21 => ConversationAuthorityRequest,
            22 => ConversationAuthorityResponse,
            23 => AccessDenied,
            31 => RelayReadRequest,
            32 => RelayReadResponse,
            33 => RelayWriteRequest,
            34 => RelayWriteResponse,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn write_to<W: Write + ?Sized>(self, out: &mut W) -> Result<(), ProtocolError> {
        self.code().write_to(out)
    }

    /// Read a response code and check it against the expected one.
    pub fn expect<R: Read + ?Sized>(self, input: &mut R) -> Result<(), ProtocolError> {
        let actual = u32::read_from(input)?;
        if actual != self.code() {
            return Err(ProtocolError::UnexpectedResponse {
                expected: self.code(),
                actual,
            });
        }
        Ok(())
    }
}

/// Codec for a single wire value.
pub trait Wire: Sized {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError>;
    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError>;
}

fn read_array<const N: usize, R: Read + ?Sized>(input: &mut R) -> Result<[u8; N], ProtocolError> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_len<R: Read + ?Sized>(input: &mut R, max: usize) -> Result<usize, ProtocolError> {
    let len = u32::read_from(input)? as usize;
    if len > max {
        return Err(ProtocolError::StringTooLong { len, max });
    }
    Ok(len)
}

fn write_len<W: Write + ?Sized>(out: &mut W, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::StringTooLong { len, max });
    }
    (len as u32).write_to(out)
}

impl Wire for u32 {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        out.write_all(&self.to_be_bytes())?;
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(u32::from_be_bytes(read_array(input)?))
    }
}

impl Wire for i64 {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        out.write_all(&self.to_be_bytes())?;
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(i64::from_be_bytes(read_array(input)?))
    }
}

impl Wire for bool {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        out.write_all(&[u8::from(*self)])?;
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        match read_array::<1, _>(input)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidFlag(other)),
        }
    }
}

impl Wire for String {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        write_len(out, self.len(), MAX_STRING_SIZE)?;
        out.write_all(self.as_bytes())?;
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let len = read_len(input, MAX_STRING_SIZE)?;
        let mut buf = vec![0u8; len];
        input.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl Wire for Id {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        out.write_all(self.as_bytes())?;
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        Ok(Id::from_bytes(read_array(input)?))
    }
}

impl Wire for Time {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        self.as_millis().write_to(out)
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let millis = i64::read_from(input)?;
        Time::from_millis(millis).ok_or(ProtocolError::InvalidTime(millis))
    }
}

impl Wire for Secret {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        write_len(out, self.as_bytes().len(), MAX_SECRET_SIZE)?;
        out.write_all(self.as_bytes())?;
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let len = read_len(input, MAX_SECRET_SIZE)?;
        let mut buf = vec![0u8; len];
        input.read_exact(&mut buf)?;
        Ok(Secret::new(buf))
    }
}

/// Nullable value: presence byte followed by the value when present.
impl<T: Wire> Wire for Option<T> {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        match self {
            Some(value) => {
                true.write_to(out)?;
                value.write_to(out)
            }
            None => false.write_to(out),
        }
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        if bool::read_from(input)? {
            Ok(Some(T::read_from(input)?))
        } else {
            Ok(None)
        }
    }
}

fn read_count<R: Read + ?Sized>(input: &mut R) -> Result<usize, ProtocolError> {
    let count = u32::read_from(input)? as usize;
    if count > MAX_COLLECTION_LEN {
        return Err(ProtocolError::CollectionTooLarge {
            count,
            max: MAX_COLLECTION_LEN,
        });
    }
    Ok(count)
}

fn write_count<W: Write + ?Sized>(out: &mut W, count: usize) -> Result<(), ProtocolError> {
    if count > MAX_COLLECTION_LEN {
        return Err(ProtocolError::CollectionTooLarge {
            count,
            max: MAX_COLLECTION_LEN,
        });
    }
    (count as u32).write_to(out)
}

impl<T: Wire> Wire for Vec<T> {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        write_count(out, self.len())?;
        for item in self {
            item.write_to(out)?;
        }
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let count = read_count(input)?;
        // A hostile count must not turn into a huge allocation up front.
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::read_from(input)?);
        }
        Ok(items)
    }
}

impl<T: Wire + Ord> Wire for BTreeSet<T> {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        write_count(out, self.len())?;
        for item in self {
            item.write_to(out)?;
        }
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let count = read_count(input)?;
        let mut items = BTreeSet::new();
        for _ in 0..count {
            items.insert(T::read_from(input)?);
        }
        Ok(items)
    }
}

impl<K: Wire + Ord, V: Wire> Wire for BTreeMap<K, V> {
    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), ProtocolError> {
        write_count(out, self.len())?;
        for (key, value) in self {
            key.write_to(out)?;
            value.write_to(out)?;
        }
        Ok(())
    }

    fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, ProtocolError> {
        let count = read_count(input)?;
        let mut items = BTreeMap::new();
        for _ in 0..count {
            let key = K::read_from(input)?;
            items.insert(key, V::read_from(input)?);
        }
        Ok(items)
    }
}

/// Encode a value into a fresh buffer.
pub fn to_bytes<T: Wire>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    value.write_to(&mut buf)?;
    Ok(buf)
}
