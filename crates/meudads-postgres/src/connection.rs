//! Synchronous PostgreSQL connection.
//!
//! One TCP connection, extended query protocol, text format only.
//! Callers serialize access; the adapter wraps this in a mutex.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use meudads_core::{
    ColumnInfo, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, Row, Value,
};
use tracing::{debug, warn};

use crate::config::PgConfig;
use crate::protocol::{
    BackendMessage, DescribeKind, ErrorFields, FrontendMessage, MessageReader, MessageWriter,
    PROTOCOL_VERSION,
};
use crate::types::{decode_value, encode_value};

/// Result of one statement executed over the wire.
#[derive(Debug)]
pub struct PgQueryResult {
    pub rows: Vec<Row>,
    /// CommandComplete tag, e.g. `"UPDATE 3"`. Absent for empty statements.
    pub command_tag: Option<String>,
}

impl PgQueryResult {
    /// Affected-row count reported by the server.
    ///
    /// Only write commands report one: a `SELECT n` tag counts rows
    /// returned, not rows written, so it yields `None` here.
    pub fn rows_affected(&self) -> Option<u64> {
        let tag = self.command_tag.as_deref()?;
        let command = tag.split_whitespace().next()?;
        if !matches!(command, "INSERT" | "UPDATE" | "DELETE") {
            return None;
        }
        parse_command_tag(tag)
    }
}

/// The trailing count of a CommandComplete tag.
///
/// Tags look like `INSERT 0 1`, `UPDATE 3`, `SELECT 5`; the count is
/// always the last whitespace-separated token. Tags without a count
/// (`CREATE TABLE`, `BEGIN`) yield `None`.
pub fn parse_command_tag(tag: &str) -> Option<u64> {
    tag.rsplit(char::is_whitespace).next()?.parse().ok()
}

pub struct PgConnection {
    stream: TcpStream,
    reader: MessageReader,
    writer: MessageWriter,
    process_id: i32,
    secret_key: i32,
    read_buf: [u8; 8192],
}

impl PgConnection {
    /// Connect and authenticate.
    ///
    /// Supports trust, cleartext and MD5 password authentication.
    /// SCRAM and TLS are not implemented; servers requiring them fail
    /// with an authentication error.
    pub fn connect(config: &PgConfig) -> Result<Self> {
        if config.ssl_requested {
            warn!(
                host = %config.host,
                "database URL requests TLS but this client connects in plaintext"
            );
        }

        let addr = config
            .addr()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| connect_error(format!("cannot resolve host {}", config.host)))?;
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(|e| connect_error(format!("cannot connect to {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.connect_timeout))?;

        let mut conn = Self {
            stream,
            reader: MessageReader::new(),
            writer: MessageWriter::new(),
            process_id: 0,
            secret_key: 0,
            read_buf: [0; 8192],
        };

        conn.send(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: config.startup_params(),
        })?;
        conn.authenticate(config)?;
        // The timeout only bounds startup. Queries have no adapter-level
        // deadline; a mid-response timeout would desync the stream for
        // the rest of the process.
        conn.stream.set_read_timeout(None)?;
        debug!(
            host = %config.host,
            database = %config.database,
            backend_pid = conn.process_id,
            "connected to PostgreSQL"
        );
        Ok(conn)
    }

    fn authenticate(&mut self, config: &PgConfig) -> Result<()> {
        loop {
            match self.receive()? {
                BackendMessage::AuthenticationOk => {}
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = config.password.clone().ok_or_else(|| {
                        auth_error("server requires a password but the URL has none")
                    })?;
                    self.send(&FrontendMessage::PasswordMessage(password))?;
                }
                BackendMessage::AuthenticationMd5Password { salt } => {
                    let password = config.password.as_deref().ok_or_else(|| {
                        auth_error("server requires a password but the URL has none")
                    })?;
                    let hashed = md5_password(&config.user, password, salt);
                    self.send(&FrontendMessage::PasswordMessage(hashed))?;
                }
                BackendMessage::AuthenticationUnsupported(code) => {
                    return Err(auth_error(format!(
                        "unsupported authentication method {code} (only trust, cleartext and md5 are implemented)"
                    )));
                }
                BackendMessage::ParameterStatus { .. } => {}
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::ReadyForQuery { .. } => return Ok(()),
                BackendMessage::ErrorResponse(fields) => {
                    return Err(error_from_fields(&fields, None));
                }
                other => {
                    return Err(protocol_error(format!(
                        "unexpected message during startup: {other:?}"
                    )));
                }
            }
        }
    }

    /// Execute one statement through the extended query protocol.
    ///
    /// `sql` must already use `$n` placeholders.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<PgQueryResult> {
        let mut encoded = Vec::with_capacity(params.len());
        let mut param_types = Vec::with_capacity(params.len());
        for value in params {
            let (bytes, type_oid) = encode_value(value)?;
            encoded.push(bytes);
            param_types.push(type_oid);
        }

        self.send_batch(&[
            FrontendMessage::Parse {
                name: String::new(),
                query: sql.to_string(),
                param_types,
            },
            FrontendMessage::Bind {
                portal: String::new(),
                statement: String::new(),
                param_formats: vec![0],
                params: encoded,
                result_formats: vec![0],
            },
            FrontendMessage::Describe {
                kind: DescribeKind::Portal,
                name: String::new(),
            },
            FrontendMessage::Execute {
                portal: String::new(),
                max_rows: 0,
            },
            FrontendMessage::Sync,
        ])?;

        let mut columns: Option<Arc<ColumnInfo>> = None;
        let mut oids: Vec<u32> = Vec::new();
        let mut rows = Vec::new();
        let mut command_tag = None;
        let mut error: Option<Error> = None;

        loop {
            match self.receive()? {
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::NoData
                | BackendMessage::ParameterDescription(_)
                | BackendMessage::ParameterStatus { .. } => {}
                BackendMessage::RowDescription(fields) => {
                    oids = fields.iter().map(|f| f.type_oid).collect();
                    let names = fields.into_iter().map(|f| f.name).collect();
                    columns = Some(Arc::new(ColumnInfo::new(names)));
                }
                BackendMessage::DataRow(raw) => {
                    if error.is_some() {
                        continue;
                    }
                    // Keep draining on failure so the stream stays in sync.
                    match decode_row(columns.as_ref(), &oids, raw) {
                        Ok(row) => rows.push(row),
                        Err(e) => error = Some(e),
                    }
                }
                BackendMessage::CommandComplete(tag) => command_tag = Some(tag),
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(fields) => {
                    // Drain until ReadyForQuery so the connection stays usable.
                    error = Some(error_from_fields(&fields, Some(sql)));
                }
                BackendMessage::ReadyForQuery { .. } => {
                    return match error {
                        Some(err) => Err(err),
                        None => Ok(PgQueryResult { rows, command_tag }),
                    };
                }
                BackendMessage::PortalSuspended => {
                    return Err(protocol_error("portal suspended with unlimited fetch"));
                }
                other => {
                    return Err(protocol_error(format!(
                        "unexpected message during query: {other:?}"
                    )));
                }
            }
        }
    }

    /// Liveness probe.
    pub fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1", &[]).map(drop)
    }

    /// Send Terminate and drop the socket. Errors are ignored; the
    /// server cleans up on disconnect either way.
    pub fn close(&mut self) {
        let bytes = self.writer.write(&FrontendMessage::Terminate).to_vec();
        let _ = self.stream.write_all(&bytes);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn send(&mut self, msg: &FrontendMessage) -> Result<()> {
        let bytes = self.writer.write(msg).to_vec();
        self.stream.write_all(&bytes)?;
        Ok(())
    }

    fn send_batch(&mut self, msgs: &[FrontendMessage]) -> Result<()> {
        let mut batch = Vec::with_capacity(1024);
        for msg in msgs {
            batch.extend_from_slice(self.writer.write(msg));
        }
        self.stream.write_all(&batch)?;
        Ok(())
    }

    /// Next backend message, skipping notices.
    fn receive(&mut self) -> Result<BackendMessage> {
        loop {
            match self.reader.next_message().map_err(protocol_error)? {
                Some(BackendMessage::NoticeResponse(fields)) => {
                    debug!(
                        severity = %fields.severity,
                        message = %fields.message,
                        "server notice"
                    );
                }
                Some(BackendMessage::Unknown(type_byte)) => {
                    debug!(type_byte, "skipping unhandled message type");
                }
                Some(msg) => return Ok(msg),
                None => {
                    let n = self.stream.read(&mut self.read_buf)?;
                    if n == 0 {
                        return Err(Error::Connection(ConnectionError {
                            kind: ConnectionErrorKind::Disconnected,
                            message: "server closed the connection".to_string(),
                            source: None,
                        }));
                    }
                    self.reader.feed(&self.read_buf[..n]);
                }
            }
        }
    }
}

fn decode_row(
    columns: Option<&Arc<ColumnInfo>>,
    oids: &[u32],
    raw: Vec<Option<Vec<u8>>>,
) -> Result<Row> {
    let columns = columns.ok_or_else(|| protocol_error("DataRow before RowDescription"))?;
    let mut values = Vec::with_capacity(raw.len());
    for (i, cell) in raw.into_iter().enumerate() {
        match cell {
            None => values.push(Value::Null),
            Some(bytes) => {
                let type_oid = oids.get(i).copied().unwrap_or(0);
                values.push(decode_value(type_oid, &bytes)?);
            }
        }
    }
    Ok(Row::with_columns(Arc::clone(columns), values))
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// `md5` + hex(md5(hex(md5(password + user)) + salt)).
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{password}{user}")));
    let mut salted = inner.into_bytes();
    salted.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(salted))
}

/// Map an ErrorResponse to the adapter error taxonomy by SQLSTATE class.
fn error_from_fields(fields: &ErrorFields, sql: Option<&str>) -> Error {
    let class = fields.code.get(..2).unwrap_or("");
    match class {
        "08" => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: fields.message.clone(),
            source: None,
        }),
        "28" => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Authentication,
            message: fields.message.clone(),
            source: None,
        }),
        _ => {
            let kind = match (class, fields.code.as_str()) {
                ("42", "42P01" | "42703") => QueryErrorKind::NotFound,
                ("42", _) => QueryErrorKind::Syntax,
                ("23", _) => QueryErrorKind::Constraint,
                (_, "57014") => QueryErrorKind::Cancelled,
                ("57", _) => QueryErrorKind::Timeout,
                _ => QueryErrorKind::Database,
            };
            Error::Query(QueryError {
                kind,
                sql: sql.map(str::to_string),
                sqlstate: Some(fields.code.clone()),
                message: fields.message.clone(),
                detail: fields.detail.clone(),
                hint: fields.hint.clone(),
                position: fields.position.map(|p| p as usize),
                source: None,
            })
        }
    }
}

fn connect_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: message.into(),
        source: None,
    })
}

fn auth_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: message.into(),
        source: None,
    })
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn read_timeout_is_cleared_after_startup() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().expect("accept");
            let mut len_buf = [0u8; 4];
            sock.read_exact(&mut len_buf).expect("startup length");
            let len = i32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len - 4];
            sock.read_exact(&mut body).expect("startup body");
            // Trust auth: AuthenticationOk then ReadyForQuery(idle).
            sock.write_all(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0]).expect("auth ok");
            sock.write_all(&[b'Z', 0, 0, 0, 5, b'I']).expect("ready");
            // Hold the socket until the client terminates.
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf);
        });

        let config = PgConfig {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            ..PgConfig::default()
        };
        let conn = PgConnection::connect(&config).expect("connect to mock server");
        assert_eq!(conn.stream.read_timeout().expect("read timeout"), None);

        drop(conn);
        server.join().expect("mock server");
    }

    #[test]
    fn command_tag_counts() {
        assert_eq!(parse_command_tag("INSERT 0 1"), Some(1));
        assert_eq!(parse_command_tag("UPDATE 3"), Some(3));
        assert_eq!(parse_command_tag("DELETE 0"), Some(0));
        assert_eq!(parse_command_tag("SELECT 5"), Some(5));
        assert_eq!(parse_command_tag("CREATE TABLE"), None);
        assert_eq!(parse_command_tag("BEGIN"), None);
    }

    fn result_with_tag(tag: &str) -> PgQueryResult {
        PgQueryResult {
            rows: Vec::new(),
            command_tag: Some(tag.to_string()),
        }
    }

    #[test]
    fn rows_affected_only_for_write_commands() {
        assert_eq!(result_with_tag("INSERT 0 1").rows_affected(), Some(1));
        assert_eq!(result_with_tag("UPDATE 3").rows_affected(), Some(3));
        assert_eq!(result_with_tag("DELETE 0").rows_affected(), Some(0));
        // A SELECT tag counts rows returned, never rows written.
        assert_eq!(result_with_tag("SELECT 5").rows_affected(), None);
        assert_eq!(result_with_tag("CREATE TABLE").rows_affected(), None);
        assert_eq!(
            PgQueryResult {
                rows: Vec::new(),
                command_tag: None,
            }
            .rows_affected(),
            None
        );
    }

    #[test]
    fn md5_password_format() {
        let hashed = md5_password("meudads", "s3cret", [1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 3 + 32);
        // Deterministic for the same inputs.
        assert_eq!(hashed, md5_password("meudads", "s3cret", [1, 2, 3, 4]));
    }

    #[test]
    fn sqlstate_classification() {
        let fields = |code: &str| ErrorFields {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: "boom".to_string(),
            detail: None,
            hint: None,
            position: None,
        };

        match error_from_fields(&fields("23505"), None) {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Constraint);
                assert!(q.is_unique_violation());
            }
            other => panic!("unexpected: {other:?}"),
        }
        match error_from_fields(&fields("42601"), Some("SELEC 1")) {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Syntax);
                assert_eq!(q.sql.as_deref(), Some("SELEC 1"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        match error_from_fields(&fields("42P01"), None) {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::NotFound),
            other => panic!("unexpected: {other:?}"),
        }
        match error_from_fields(&fields("28P01"), None) {
            Error::Connection(c) => assert_eq!(c.kind, ConnectionErrorKind::Authentication),
            other => panic!("unexpected: {other:?}"),
        }
        match error_from_fields(&fields("57014"), None) {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::Cancelled),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
