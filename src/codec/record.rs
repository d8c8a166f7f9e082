use super::error::Error;
use super::value::{FieldMap, Value};

// Tag assignments are stable bit patterns: direction(2) . category(3) . opcode(3).
const TAG_VERIFY: u8 = 0b00_000_001;
const TAG_QUERY: u8 = 0b00_000_010;
const TAG_OPEN: u8 = 0b00_000_011;
const TAG_CLOSE: u8 = 0b00_000_100;
const TAG_ECHO: u8 = 0b00_100_000;
const TAG_ANNOUNCE: u8 = 0b10_000_000;
const TAG_VERIFY_SUCCESS: u8 = 0b10_000_001;
const TAG_QUERY_SUCCESS: u8 = 0b10_000_010;
const TAG_OPEN_SUCCESS: u8 = 0b10_000_011;
const TAG_CLOSE_SUCCESS: u8 = 0b10_000_100;
const TAG_ECHO_SUCCESS: u8 = 0b10_100_000;
const TAG_VERIFY_FAILURE: u8 = 0b11_000_001;
const TAG_QUERY_FAILURE: u8 = 0b11_000_010;
const TAG_OPEN_FAILURE: u8 = 0b11_000_011;
const TAG_CLOSE_FAILURE: u8 = 0b11_000_100;

/// A decoded or to-be-encoded wire record.
///
/// Success records carry `state` where the variant declares it; failure
/// records carry `message` and optionally `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Verify { token: String },
    Query {},
    Open {},
    Close {},
    Echo { message: String },
    Announce {
        contract_address: String,
        locker_id: String,
        name: String,
        image_urls: Vec<String>,
        open_close_type: String,
    },
    VerifySuccess {},
    QuerySuccess { state: String },
    OpenSuccess { state: String },
    CloseSuccess { state: String },
    EchoSuccess { message: String },
    VerifyFailure { message: String, state: Option<String> },
    QueryFailure { message: String, state: Option<String> },
    OpenFailure { message: String, state: Option<String> },
    CloseFailure { message: String, state: Option<String> },
}

impl Record {
    /// `encode(record) -> bytes`
    pub fn encode(&self) -> Vec<u8> {
        let (tag, fields) = self.fields();
        let capacity = 2 + fields.iter().map(|(n, v)| 2 + n.len() + value_len(v)).sum::<usize>();
        let mut out = Vec::with_capacity(capacity);
        out.push(tag);
        out.push(u8::try_from(fields.len()).expect("field count fits in a byte"));
        for (name, value) in &fields {
            out.push(u8::try_from(name.len()).expect("field name fits in a byte"));
            out.extend_from_slice(name.as_bytes());
            out.push(value.type_tag());
            value.write_payload(&mut out);
        }
        out
    }

    /// `decode(bytes) -> record_or_error`
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let (&tag, body) = bytes.split_first().ok_or(Error::Empty)?;
        let map = parse_body(body)?;
        match tag {
            TAG_VERIFY => Ok(Self::Verify { token: required_str(map, "token", &["token"])? }),
            TAG_QUERY => {
                checked_empty(map)?;
                Ok(Self::Query {})
            }
            TAG_OPEN => {
                checked_empty(map)?;
                Ok(Self::Open {})
            }
            TAG_CLOSE => {
                checked_empty(map)?;
                Ok(Self::Close {})
            }
            TAG_ECHO => Ok(Self::Echo { message: required_str(map, "message", &["message"])? }),
            TAG_ANNOUNCE => {
                let allowed = ["contract_address", "locker_id", "name", "image_urls", "open_close_type"];
                let mut map = check_unknown(map, &allowed)?;
                Ok(Self::Announce {
                    contract_address: take_str(&mut map, "contract_address")?,
                    locker_id: take_str(&mut map, "locker_id")?,
                    name: take_str(&mut map, "name")?,
                    image_urls: take_str_array(&mut map, "image_urls")?,
                    open_close_type: take_str(&mut map, "open_close_type")?,
                })
            }
            TAG_VERIFY_SUCCESS => {
                checked_empty(map)?;
                Ok(Self::VerifySuccess {})
            }
            TAG_QUERY_SUCCESS => Ok(Self::QuerySuccess { state: required_str(map, "state", &["state"])? }),
            TAG_OPEN_SUCCESS => Ok(Self::OpenSuccess { state: required_str(map, "state", &["state"])? }),
            TAG_CLOSE_SUCCESS => Ok(Self::CloseSuccess { state: required_str(map, "state", &["state"])? }),
            TAG_ECHO_SUCCESS => Ok(Self::EchoSuccess { message: required_str(map, "message", &["message"])? }),
            TAG_VERIFY_FAILURE => {
                let (message, state) = failure_fields(map)?;
                Ok(Self::VerifyFailure { message, state })
            }
            TAG_QUERY_FAILURE => {
                let (message, state) = failure_fields(map)?;
                Ok(Self::QueryFailure { message, state })
            }
            TAG_OPEN_FAILURE => {
                let (message, state) = failure_fields(map)?;
                Ok(Self::OpenFailure { message, state })
            }
            TAG_CLOSE_FAILURE => {
                let (message, state) = failure_fields(map)?;
                Ok(Self::CloseFailure { message, state })
            }
            other => Err(Error::UnknownTag(other)),
        }
    }

    fn fields(&self) -> (u8, Vec<(&'static str, Value)>) {
        match self {
            Self::Verify { token } => (TAG_VERIFY, vec![("token", token.clone().into())]),
            Self::Query {} => (TAG_QUERY, vec![]),
            Self::Open {} => (TAG_OPEN, vec![]),
            Self::Close {} => (TAG_CLOSE, vec![]),
            Self::Echo { message } => (TAG_ECHO, vec![("message", message.clone().into())]),
            Self::Announce { contract_address, locker_id, name, image_urls, open_close_type } => (
                TAG_ANNOUNCE,
                vec![
                    ("contract_address", contract_address.clone().into()),
                    ("locker_id", locker_id.clone().into()),
                    ("name", name.clone().into()),
                    ("image_urls", image_urls.clone().into()),
                    ("open_close_type", open_close_type.clone().into()),
                ],
            ),
            Self::VerifySuccess {} => (TAG_VERIFY_SUCCESS, vec![]),
            Self::QuerySuccess { state } => (TAG_QUERY_SUCCESS, vec![("state", state.clone().into())]),
            Self::OpenSuccess { state } => (TAG_OPEN_SUCCESS, vec![("state", state.clone().into())]),
            Self::CloseSuccess { state } => (TAG_CLOSE_SUCCESS, vec![("state", state.clone().into())]),
            Self::EchoSuccess { message } => (TAG_ECHO_SUCCESS, vec![("message", message.clone().into())]),
            Self::VerifyFailure { message, state } => (TAG_VERIFY_FAILURE, failure_out(message, state)),
            Self::QueryFailure { message, state } => (TAG_QUERY_FAILURE, failure_out(message, state)),
            Self::OpenFailure { message, state } => (TAG_OPEN_FAILURE, failure_out(message, state)),
            Self::CloseFailure { message, state } => (TAG_CLOSE_FAILURE, failure_out(message, state)),
        }
    }
}

fn failure_out(message: &str, state: &Option<String>) -> Vec<(&'static str, Value)> {
    let mut out = vec![("message", Value::from(message))];
    if let Some(state) = state {
        out.push(("state", Value::from(state.as_str())));
    }
    out
}

fn failure_fields(map: FieldMap) -> Result<(String, Option<String>), Error> {
    let mut map = check_unknown(map, &["message", "state"])?;
    let message = take_str(&mut map, "message")?;
    let state = take_opt_str(&mut map, "state")?;
    Ok((message, state))
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::U8(_) | Value::I8(_) | Value::Bool(_) => 1,
        Value::U16(_) | Value::I16(_) => 2,
        Value::U32(_) | Value::I32(_) => 4,
        Value::U64(_) | Value::I64(_) => 8,
        Value::Str(s) => 2 + s.len(),
        Value::StrArray(items) => 2 + items.iter().map(|i| 2 + i.len()).sum::<usize>(),
    }
}

/// Required record with no fields: any field present is an unknown field.
fn checked_empty(map: FieldMap) -> Result<(), Error> {
    check_unknown(map, &[]).map(|_| ())
}

fn required_str(map: FieldMap, name: &'static str, allowed: &[&'static str]) -> Result<String, Error> {
    let mut map = check_unknown(map, allowed)?;
    take_str(&mut map, name)
}

fn check_unknown(map: FieldMap, allowed: &[&'static str]) -> Result<FieldMap, Error> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::UnknownField(key.clone()));
        }
    }
    Ok(map)
}

fn take_str(map: &mut FieldMap, name: &'static str) -> Result<String, Error> {
    match map.remove(name) {
        Some(Value::Str(s)) => Ok(s),
        Some(_) => Err(Error::WrongFieldType(name)),
        None => Err(Error::MissingField(name)),
    }
}

fn take_opt_str(map: &mut FieldMap, name: &'static str) -> Result<Option<String>, Error> {
    match map.remove(name) {
        Some(Value::Str(s)) => Ok(Some(s)),
        Some(_) => Err(Error::WrongFieldType(name)),
        None => Ok(None),
    }
}

fn take_str_array(map: &mut FieldMap, name: &'static str) -> Result<Vec<String>, Error> {
    match map.remove(name) {
        Some(Value::StrArray(items)) => Ok(items),
        Some(_) => Err(Error::WrongFieldType(name)),
        None => Err(Error::MissingField(name)),
    }
}

/// Generic body parse: `count(u8) || count * (name_len(u8) || name || type_tag(u8) || value)`.
///
/// Structural malformation (truncated length, unknown type tag, truncated
/// value, invalid UTF-8) is reported as [`Error::BodyNotMap`]; leftover bytes
/// after the declared field count is [`Error::ExtraPositional`].
fn parse_body(body: &[u8]) -> Result<FieldMap, Error> {
    let mut cursor = body;
    let count = take_u8(&mut cursor).ok_or(Error::BodyNotMap)?;
    let mut map = FieldMap::new();
    for _ in 0..count {
        let name_len = take_u8(&mut cursor).ok_or(Error::BodyNotMap)? as usize;
        let name_bytes = take_n(&mut cursor, name_len).ok_or(Error::BodyNotMap)?;
        let name = std::str::from_utf8(name_bytes).map_err(|_| Error::BodyNotMap)?.to_string();
        let type_tag = take_u8(&mut cursor).ok_or(Error::BodyNotMap)?;
        let value = parse_value(type_tag, &mut cursor)?;
        map.insert(name, value);
    }
    if !cursor.is_empty() {
        return Err(Error::ExtraPositional);
    }
    Ok(map)
}

fn parse_value(type_tag: u8, cursor: &mut &[u8]) -> Result<Value, Error> {
    Ok(match type_tag {
        0x01 => Value::U8(take_u8(cursor).ok_or(Error::BodyNotMap)?),
        0x02 => Value::U16(u16::from_be_bytes(take_array(cursor)?)),
        0x03 => Value::U32(u32::from_be_bytes(take_array(cursor)?)),
        0x04 => Value::U64(u64::from_be_bytes(take_array(cursor)?)),
        0x05 => Value::I8(take_u8(cursor).ok_or(Error::BodyNotMap)? as i8),
        0x06 => Value::I16(i16::from_be_bytes(take_array(cursor)?)),
        0x07 => Value::I32(i32::from_be_bytes(take_array(cursor)?)),
        0x08 => Value::I64(i64::from_be_bytes(take_array(cursor)?)),
        0x09 => Value::Bool(take_u8(cursor).ok_or(Error::BodyNotMap)? != 0),
        0x0A => Value::Str(take_string(cursor)?),
        0x0B => {
            let count = u16::from_be_bytes(take_array(cursor)?);
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(take_string(cursor)?);
            }
            Value::StrArray(items)
        }
        _ => return Err(Error::BodyNotMap),
    })
}

fn take_string(cursor: &mut &[u8]) -> Result<String, Error> {
    let len = u16::from_be_bytes(take_array(cursor)?) as usize;
    let bytes = take_n(cursor, len).ok_or(Error::BodyNotMap)?;
    std::str::from_utf8(bytes).map(str::to_string).map_err(|_| Error::BodyNotMap)
}

fn take_u8(cursor: &mut &[u8]) -> Option<u8> {
    let (&first, rest) = cursor.split_first()?;
    *cursor = rest;
    Some(first)
}

fn take_n<'a>(cursor: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if cursor.len() < n {
        return None;
    }
    let (taken, rest) = cursor.split_at(n);
    *cursor = rest;
    Some(taken)
}

fn take_array<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N], Error> {
    let bytes = take_n(cursor, N).ok_or(Error::BodyNotMap)?;
    Ok(bytes.try_into().expect("take_n returns exactly N bytes"))
}
