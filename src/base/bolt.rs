// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Minimal bolt client.
//!
//! Only enough of the protocol to prove a database usable: version
//! negotiation, then basic authentication, then a polite goodbye. Messages
//! are PackStream structures sent in chunks, each chunk prefixed with its
//! length as a big endian `u16`, and every message terminated by an empty
//! chunk.
//!
//! Servers speaking bolt 5.1 or later take credentials in a separate LOGON
//! message after HELLO. Older servers expect them inside HELLO itself.

use super::{BaseError, Result};

use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    io,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, instrument};
use url::Url;

const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Offered versions as `[0, range, minor, major]`, most preferred first.
const BOLT_VERSIONS: [[u8; 4]; 4] = [[0, 4, 4, 5], [0, 2, 4, 4], [0, 0, 0, 4], [0, 0, 0, 3]];

const HELLO: u8 = 0x01;
const GOODBYE: u8 = 0x02;
const LOGON: u8 = 0x6A;
const SUCCESS: u8 = 0x70;
const FAILURE: u8 = 0x7F;

/// Where the database accepts bolt connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoltEndpoint {
    pub host: String,
    pub port: u16,
}

impl BoltEndpoint {
    /// Parse endpoint from a connection URI like `bolt://localhost:7687`.
    ///
    /// Without an explicit port in the URI, `default_port` is used.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::InvalidUri`] if the URI does not parse, has no
    ///   host, or uses a scheme other than plain `bolt` or `neo4j`.
    pub fn from_uri(uri: &str, default_port: u16) -> Result<Self> {
        let invalid = |reason: &str| BaseError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        };
        let url = Url::parse(uri).map_err(|err| invalid(&err.to_string()))?;
        if !matches!(url.scheme(), "bolt" | "neo4j") {
            return Err(invalid("only plain bolt:// and neo4j:// are supported"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;

        Ok(Self {
            host: host.into(),
            port: url.port().unwrap_or(default_port),
        })
    }
}

impl Display for BoltEndpoint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}:{}", self.host, self.port)
    }
}

/// Bolt protocol version agreed on during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BoltVersion {
    pub major: u8,
    pub minor: u8,
}

impl BoltVersion {
    const SEPARATE_LOGON: Self = Self { major: 5, minor: 1 };
    const BOLT_AGENT: Self = Self { major: 5, minor: 3 };
}

impl Display for BoltVersion {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}.{}", self.major, self.minor)
    }
}

/// Basic authentication credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BoltAuth {
    pub user: String,
    pub password: String,
}

impl BoltAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    fn fields(&self) -> Vec<(String, Value)> {
        vec![
            ("scheme".into(), Value::from("basic")),
            ("principal".into(), Value::from(self.user.as_str())),
            ("credentials".into(), Value::from(self.password.as_str())),
        ]
    }
}

impl Debug for BoltAuth {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("BoltAuth")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Negotiate a bolt version with target endpoint, then authenticate.
///
/// # Errors
///
/// - Return [`HandshakeError::Io`] if the connection fails.
/// - Return [`HandshakeError::Unsupported`] if the server accepts none of the
///   offered versions.
/// - Return [`HandshakeError::Rejected`] if the server refuses the
///   credentials.
/// - Return [`HandshakeError::Unexpected`] or [`HandshakeError::Malformed`]
///   if the server answers with something other than SUCCESS or FAILURE.
#[instrument(skip(endpoint, auth), level = "debug")]
pub async fn bolt_handshake(
    endpoint: &BoltEndpoint,
    auth: &BoltAuth,
) -> Result<BoltVersion, HandshakeError> {
    let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;

    let mut request = Vec::with_capacity(20);
    request.extend_from_slice(&BOLT_MAGIC);
    for version in BOLT_VERSIONS {
        request.extend_from_slice(&version);
    }
    stream.write_all(&request).await?;

    let mut response = [0u8; 4];
    stream.read_exact(&mut response).await?;
    if response == [0; 4] {
        return Err(HandshakeError::Unsupported);
    }
    let version = BoltVersion {
        major: response[3],
        minor: response[2],
    };
    debug!("agreed on bolt {version}");

    authenticate(&mut stream, version, auth).await?;

    // Goodbye has no reply, and the server may already be gone.
    let _ = write_message(&mut stream, GOODBYE, &[]).await;

    Ok(version)
}

async fn authenticate(
    stream: &mut TcpStream,
    version: BoltVersion,
    auth: &BoltAuth,
) -> Result<(), HandshakeError> {
    let agent = format!("nfops/{}", env!("CARGO_PKG_VERSION"));
    let mut hello = vec![("user_agent".to_string(), Value::from(agent.as_str()))];
    if version >= BoltVersion::BOLT_AGENT {
        let product = vec![("product".to_string(), Value::from(agent.as_str()))];
        hello.push(("bolt_agent".into(), Value::Map(product)));
    }

    if version < BoltVersion::SEPARATE_LOGON {
        hello.extend(auth.fields());
        write_message(stream, HELLO, &[Value::Map(hello)]).await?;
        return expect_success(stream, "HELLO").await;
    }

    write_message(stream, HELLO, &[Value::Map(hello)]).await?;
    expect_success(stream, "HELLO").await?;
    write_message(stream, LOGON, &[Value::Map(auth.fields())]).await?;
    expect_success(stream, "LOGON").await
}

async fn expect_success(
    stream: &mut TcpStream,
    request: &'static str,
) -> Result<(), HandshakeError> {
    let reply = read_message(stream)
        .await?
        .ok_or(HandshakeError::Malformed(request))?;

    match reply.signature {
        SUCCESS => Ok(()),
        FAILURE => {
            let metadata = reply.fields.first();
            let text = |key: &str| {
                metadata
                    .and_then(|metadata| metadata.get(key))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            Err(HandshakeError::Rejected {
                request,
                code: text("code"),
                message: text("message"),
            })
        }
        signature => Err(HandshakeError::Unexpected { request, signature }),
    }
}

/// One decoded bolt message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Message {
    pub(crate) signature: u8,
    pub(crate) fields: Vec<Value>,
}

/// Write message as a PackStream structure in one or more chunks.
pub(crate) async fn write_message<S>(
    stream: &mut S,
    signature: u8,
    fields: &[Value],
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    // INVARIANT: Bolt messages never carry more than 15 fields.
    let mut body = vec![0xB0 | (fields.len() as u8 & 0x0F), signature];
    for field in fields {
        field.encode(&mut body);
    }

    let mut framed = Vec::with_capacity(body.len() + 4);
    for chunk in body.chunks(u16::MAX as usize) {
        framed.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        framed.extend_from_slice(chunk);
    }
    framed.extend_from_slice(&[0, 0]);

    stream.write_all(&framed).await?;
    stream.flush().await
}

/// Read next message, skipping empty keep-alive chunks.
///
/// Returns `None` if the bytes do not form a PackStream structure.
pub(crate) async fn read_message<S>(stream: &mut S) -> io::Result<Option<Message>>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let length = stream.read_u16().await? as usize;
        if length == 0 {
            if body.is_empty() {
                continue;
            }
            break;
        }

        let start = body.len();
        body.resize(start + length, 0);
        stream.read_exact(&mut body[start..]).await?;
    }

    let mut bytes = body.as_slice();
    let Some([marker, signature]) = take::<2>(&mut bytes) else {
        return Ok(None);
    };
    if marker & 0xF0 != 0xB0 {
        return Ok(None);
    }

    let mut fields = Vec::new();
    for _ in 0..(marker & 0x0F) {
        let Some(field) = Value::decode(&mut bytes) else {
            return Ok(None);
        };
        fields.push(field);
    }

    Ok(Some(Message { signature, fields }))
}

/// PackStream value, minus structures and bytes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(0xC0),
            Self::Bool(false) => out.push(0xC2),
            Self::Bool(true) => out.push(0xC3),
            Self::Int(int) if (-16..128).contains(int) => out.push(*int as i8 as u8),
            Self::Int(int) => {
                out.push(0xCB);
                out.extend_from_slice(&int.to_be_bytes());
            }
            Self::Float(float) => {
                out.push(0xC1);
                out.extend_from_slice(&float.to_be_bytes());
            }
            Self::String(text) => encode_str(out, text),
            Self::List(items) => {
                encode_header(out, items.len(), 0x90, [0xD4, 0xD5, 0xD6]);
                for item in items {
                    item.encode(out);
                }
            }
            Self::Map(entries) => {
                encode_header(out, entries.len(), 0xA0, [0xD8, 0xD9, 0xDA]);
                for (key, value) in entries {
                    encode_str(out, key);
                    value.encode(out);
                }
            }
        }
    }

    fn decode(bytes: &mut &[u8]) -> Option<Self> {
        let [marker] = take::<1>(bytes)?;
        let value = match marker {
            0x00..=0x7F => Self::Int(i64::from(marker)),
            0xF0..=0xFF => Self::Int(i64::from(marker as i8)),
            0xC0 => Self::Null,
            0xC2 => Self::Bool(false),
            0xC3 => Self::Bool(true),
            0xC1 => Self::Float(f64::from_be_bytes(take(bytes)?)),
            0xC8 => Self::Int(i64::from(i8::from_be_bytes(take(bytes)?))),
            0xC9 => Self::Int(i64::from(i16::from_be_bytes(take(bytes)?))),
            0xCA => Self::Int(i64::from(i32::from_be_bytes(take(bytes)?))),
            0xCB => Self::Int(i64::from_be_bytes(take(bytes)?)),
            0x80..=0x8F | 0xD0..=0xD2 => {
                let length = decode_length(marker, 0x80, 0xD0, bytes)?;
                Self::String(decode_str(bytes, length)?)
            }
            0x90..=0x9F | 0xD4..=0xD6 => {
                let length = decode_length(marker, 0x90, 0xD4, bytes)?;
                let items = (0..length)
                    .map(|_| Self::decode(bytes))
                    .collect::<Option<Vec<_>>>()?;
                Self::List(items)
            }
            0xA0..=0xAF | 0xD8..=0xDA => {
                let length = decode_length(marker, 0xA0, 0xD8, bytes)?;
                let entries = (0..length)
                    .map(|_| match Self::decode(bytes)? {
                        Self::String(key) => Some((key, Self::decode(bytes)?)),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                Self::Map(entries)
            }
            _ => return None,
        };

        Some(value)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::String(text.into())
    }
}

fn encode_str(out: &mut Vec<u8>, text: &str) {
    encode_header(out, text.len(), 0x80, [0xD0, 0xD1, 0xD2]);
    out.extend_from_slice(text.as_bytes());
}

/// Write size marker: tiny form below 16, then 8, 16 and 32 bit forms.
fn encode_header(out: &mut Vec<u8>, length: usize, tiny: u8, sized: [u8; 3]) {
    if length < 16 {
        out.push(tiny | length as u8);
    } else if let Ok(length) = u8::try_from(length) {
        out.extend_from_slice(&[sized[0], length]);
    } else if let Ok(length) = u16::try_from(length) {
        out.push(sized[1]);
        out.extend_from_slice(&length.to_be_bytes());
    } else {
        out.push(sized[2]);
        out.extend_from_slice(&(length as u32).to_be_bytes());
    }
}

fn decode_length(marker: u8, tiny: u8, sized: u8, bytes: &mut &[u8]) -> Option<usize> {
    let length = match marker.wrapping_sub(sized) {
        0 => usize::from(u8::from_be_bytes(take(bytes)?)),
        1 => usize::from(u16::from_be_bytes(take(bytes)?)),
        2 => u32::from_be_bytes(take(bytes)?) as usize,
        _ => usize::from(marker - tiny),
    };
    Some(length)
}

fn decode_str(bytes: &mut &[u8], length: usize) -> Option<String> {
    if bytes.len() < length {
        return None;
    }
    let (text, rest) = bytes.split_at(length);
    *bytes = rest;
    String::from_utf8(text.to_vec()).ok()
}

fn take<const N: usize>(bytes: &mut &[u8]) -> Option<[u8; N]> {
    let (head, rest) = bytes.split_first_chunk::<N>()?;
    *bytes = rest;
    Some(*head)
}

/// Bolt handshake error types.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("server supports none of the offered bolt versions")]
    Unsupported,

    #[error("server rejected {request}: {message} ({code})")]
    Rejected {
        request: &'static str,
        code: String,
        message: String,
    },

    #[error("unexpected bolt message 0x{signature:02X} in reply to {request}")]
    Unexpected { request: &'static str, signature: u8 },

    #[error("malformed bolt message in reply to {0}")]
    Malformed(&'static str),
}

impl HandshakeError {
    /// Whether the server refused the credentials themselves.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if code.starts_with("Neo.ClientError.Security."))
    }
}
