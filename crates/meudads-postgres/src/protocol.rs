//! PostgreSQL wire protocol encoding and decoding.
//!
//! Covers the subset of protocol 3.0 the adapter needs: startup and
//! password authentication plus the extended query flow
//! (Parse/Bind/Describe/Execute/Sync). All multi-byte integers are
//! big-endian.

#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196_608;

/// Frontend message type bytes.
mod frontend_type {
    pub const PASSWORD: u8 = b'p';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Target of a Describe message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeKind {
    Statement,
    Portal,
}

impl DescribeKind {
    fn as_byte(self) -> u8 {
        match self {
            Self::Statement => b'S',
            Self::Portal => b'P',
        }
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    Startup {
        version: i32,
        params: Vec<(String, String)>,
    },
    PasswordMessage(String),
    Parse {
        name: String,
        query: String,
        param_types: Vec<u32>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    Describe {
        kind: DescribeKind,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Sync,
    Terminate,
}

/// One column of a RowDescription message.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: u32,
    pub format: i16,
}

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<u32>,
}

/// Messages received from the server.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMd5Password { salt: [u8; 4] },
    AuthenticationUnsupported(i32),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery { status: u8 },
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ParseComplete,
    BindComplete,
    NoData,
    ParameterDescription(Vec<u32>),
    PortalSuspended,
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
    /// A message type this client does not interpret; skipped by callers.
    Unknown(u8),
}

/// Buffer for encoding frontend messages.
#[derive(Debug, Clone, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    /// Encode a frontend message, returning the encoded bytes.
    pub fn write(&mut self, msg: &FrontendMessage) -> &[u8] {
        self.buf.clear();
        match msg {
            FrontendMessage::Startup { version, params } => self.write_startup(*version, params),
            FrontendMessage::PasswordMessage(password) => {
                self.write_string_message(frontend_type::PASSWORD, password);
            }
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            } => self.write_parse(name, query, param_types),
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => self.write_bind(portal, statement, param_formats, params, result_formats),
            FrontendMessage::Describe { kind, name } => self.write_describe(*kind, name),
            FrontendMessage::Execute { portal, max_rows } => self.write_execute(portal, *max_rows),
            FrontendMessage::Sync => self.write_empty_message(frontend_type::SYNC),
            FrontendMessage::Terminate => self.write_empty_message(frontend_type::TERMINATE),
        }
        &self.buf
    }

    // Startup has no type byte; the length field includes itself.
    fn write_startup(&mut self, version: i32, params: &[(String, String)]) {
        let mut body_len = 4;
        for (key, value) in params {
            body_len += key.len() + 1 + value.len() + 1;
        }
        body_len += 1;

        self.buf.extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(&version.to_be_bytes());
        for (key, value) in params {
            self.buf.extend_from_slice(key.as_bytes());
            self.buf.push(0);
            self.buf.extend_from_slice(value.as_bytes());
            self.buf.push(0);
        }
        self.buf.push(0);
    }

    fn write_parse(&mut self, name: &str, query: &str, param_types: &[u32]) {
        self.buf.push(frontend_type::PARSE);
        let body_len = name.len() + 1 + query.len() + 1 + 2 + param_types.len() * 4;
        self.buf.extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        self.buf.extend_from_slice(query.as_bytes());
        self.buf.push(0);
        self.buf
            .extend_from_slice(&(param_types.len() as i16).to_be_bytes());
        for &oid in param_types {
            self.buf.extend_from_slice(&oid.to_be_bytes());
        }
    }

    fn write_bind(
        &mut self,
        portal: &str,
        statement: &str,
        param_formats: &[i16],
        params: &[Option<Vec<u8>>],
        result_formats: &[i16],
    ) {
        self.buf.push(frontend_type::BIND);

        let mut body_len = portal.len() + 1 + statement.len() + 1;
        body_len += 2 + param_formats.len() * 2;
        body_len += 2;
        for param in params {
            body_len += 4;
            if let Some(data) = param {
                body_len += data.len();
            }
        }
        body_len += 2 + result_formats.len() * 2;

        self.buf.extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(portal.as_bytes());
        self.buf.push(0);
        self.buf.extend_from_slice(statement.as_bytes());
        self.buf.push(0);

        self.buf
            .extend_from_slice(&(param_formats.len() as i16).to_be_bytes());
        for &fmt in param_formats {
            self.buf.extend_from_slice(&fmt.to_be_bytes());
        }

        self.buf
            .extend_from_slice(&(params.len() as i16).to_be_bytes());
        for param in params {
            match param {
                Some(data) => {
                    self.buf
                        .extend_from_slice(&(data.len() as i32).to_be_bytes());
                    self.buf.extend_from_slice(data);
                }
                // -1 length marks a NULL parameter
                None => self.buf.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }

        self.buf
            .extend_from_slice(&(result_formats.len() as i16).to_be_bytes());
        for &fmt in result_formats {
            self.buf.extend_from_slice(&fmt.to_be_bytes());
        }
    }

    fn write_describe(&mut self, kind: DescribeKind, name: &str) {
        self.buf.push(frontend_type::DESCRIBE);
        let body_len = 1 + name.len() + 1;
        self.buf.extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.push(kind.as_byte());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
    }

    fn write_execute(&mut self, portal: &str, max_rows: i32) {
        self.buf.push(frontend_type::EXECUTE);
        let body_len = portal.len() + 1 + 4;
        self.buf.extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(portal.as_bytes());
        self.buf.push(0);
        self.buf.extend_from_slice(&max_rows.to_be_bytes());
    }

    fn write_empty_message(&mut self, type_byte: u8) {
        self.buf.push(type_byte);
        self.buf.extend_from_slice(&4_i32.to_be_bytes());
    }

    fn write_string_message(&mut self, type_byte: u8, s: &str) {
        self.buf.push(type_byte);
        self.buf
            .extend_from_slice(&((s.len() + 5) as i32).to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }
}

/// Incremental decoder for backend messages.
///
/// Bytes read from the socket are appended with [`feed`](Self::feed);
/// [`next_message`](Self::next_message) returns `None` while a frame
/// is incomplete.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
    pos: usize,
}

impl MessageReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(8192),
            pos: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        // Drop consumed prefix before growing.
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > 4096 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Decode the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>, String> {
        let avail = &self.buf[self.pos..];
        if avail.len() < 5 {
            return Ok(None);
        }
        let type_byte = avail[0];
        let len = i32::from_be_bytes([avail[1], avail[2], avail[3], avail[4]]);
        if len < 4 {
            return Err(format!("invalid message length {len} for type {type_byte:#x}"));
        }
        let frame_len = 1 + len as usize;
        if avail.len() < frame_len {
            return Ok(None);
        }
        let body = &avail[5..frame_len];
        let msg = decode_body(type_byte, body)?;
        self.pos += frame_len;
        Ok(Some(msg))
    }
}

fn decode_body(type_byte: u8, body: &[u8]) -> Result<BackendMessage, String> {
    let mut cur = Cursor::new(body);
    let msg = match type_byte {
        b'R' => match cur.read_i32()? {
            0 => BackendMessage::AuthenticationOk,
            3 => BackendMessage::AuthenticationCleartextPassword,
            5 => {
                let salt = cur.read_bytes(4)?;
                BackendMessage::AuthenticationMd5Password {
                    salt: [salt[0], salt[1], salt[2], salt[3]],
                }
            }
            other => BackendMessage::AuthenticationUnsupported(other),
        },
        b'S' => BackendMessage::ParameterStatus {
            name: cur.read_cstr()?,
            value: cur.read_cstr()?,
        },
        b'K' => BackendMessage::BackendKeyData {
            process_id: cur.read_i32()?,
            secret_key: cur.read_i32()?,
        },
        b'Z' => BackendMessage::ReadyForQuery {
            status: cur.read_u8()?,
        },
        b'T' => {
            let count = cur.read_i16()?;
            let mut fields = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let name = cur.read_cstr()?;
                let _table_oid = cur.read_i32()?;
                let _attnum = cur.read_i16()?;
                let type_oid = cur.read_i32()? as u32;
                let _typlen = cur.read_i16()?;
                let _typmod = cur.read_i32()?;
                let format = cur.read_i16()?;
                fields.push(FieldDescription {
                    name,
                    type_oid,
                    format,
                });
            }
            BackendMessage::RowDescription(fields)
        }
        b'D' => {
            let count = cur.read_i16()?;
            let mut values = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let len = cur.read_i32()?;
                if len < 0 {
                    values.push(None);
                } else {
                    values.push(Some(cur.read_bytes(len as usize)?.to_vec()));
                }
            }
            BackendMessage::DataRow(values)
        }
        b'C' => BackendMessage::CommandComplete(cur.read_cstr()?),
        b'I' => BackendMessage::EmptyQueryResponse,
        b'1' => BackendMessage::ParseComplete,
        b'2' => BackendMessage::BindComplete,
        b'n' => BackendMessage::NoData,
        b's' => BackendMessage::PortalSuspended,
        b't' => {
            let count = cur.read_i16()?;
            let mut oids = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                oids.push(cur.read_i32()? as u32);
            }
            BackendMessage::ParameterDescription(oids)
        }
        b'E' => BackendMessage::ErrorResponse(decode_error_fields(&mut cur)?),
        b'N' => BackendMessage::NoticeResponse(decode_error_fields(&mut cur)?),
        other => BackendMessage::Unknown(other),
    };
    Ok(msg)
}

fn decode_error_fields(cur: &mut Cursor<'_>) -> Result<ErrorFields, String> {
    let mut map: HashMap<u8, String> = HashMap::new();
    loop {
        let code = cur.read_u8()?;
        if code == 0 {
            break;
        }
        map.insert(code, cur.read_cstr()?);
    }
    Ok(ErrorFields {
        severity: map.remove(&b'S').unwrap_or_default(),
        code: map.remove(&b'C').unwrap_or_default(),
        message: map.remove(&b'M').unwrap_or_default(),
        detail: map.remove(&b'D'),
        hint: map.remove(&b'H'),
        position: map.remove(&b'P').and_then(|p| p.parse().ok()),
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| "truncated message body".to_string())?;
        self.pos += 1;
        Ok(b)
    }

    fn read_i16(&mut self) -> Result<i16, String> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> Result<i32, String> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| "truncated message body".to_string())?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_cstr(&mut self) -> Result<String, String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| "unterminated string in message body".to_string())?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}
