//! Text-format value conversion between [`Value`] and the wire.

use meudads_core::{Error, Result, TypeError, Value};

/// Type OIDs from `pg_type.dat` for the types the adapter handles.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const VARCHAR: u32 = 1043;
    pub const BPCHAR: u32 = 1042;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const NUMERIC: u32 = 1700;
    pub const JSONB: u32 = 3802;
}

/// Encode a parameter in text format.
///
/// Returns `(bytes, oid)`; a `None` bytes value marks SQL NULL. Text
/// parameters are sent with an unspecified OID so the server infers
/// the column type, which keeps comparisons against `varchar` and
/// `timestamptz` columns working without explicit casts.
pub fn encode_value(value: &Value) -> Result<(Option<Vec<u8>>, u32)> {
    let encoded = match value {
        Value::Null => (None, 0),
        Value::Bool(b) => (Some(if *b { b"t".to_vec() } else { b"f".to_vec() }), oid::BOOL),
        Value::Int(i) => (Some(i.to_string().into_bytes()), oid::INT4),
        Value::BigInt(i) => (Some(i.to_string().into_bytes()), oid::INT8),
        Value::Double(f) => (Some(encode_float(*f).into_bytes()), oid::FLOAT8),
        Value::Text(s) => (Some(s.clone().into_bytes()), 0),
        Value::Bytes(b) => (Some(encode_bytea(b).into_bytes()), oid::BYTEA),
        Value::Json(j) => {
            let text = serde_json::to_string(j).map_err(|e| {
                Error::Type(TypeError {
                    expected: "serializable JSON",
                    actual: e.to_string(),
                    column: None,
                })
            })?;
            (Some(text.into_bytes()), oid::JSON)
        }
    };
    Ok(encoded)
}

fn encode_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        f.to_string()
    }
}

fn encode_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Decode a text-format column value according to its type OID.
///
/// Temporal types are kept as their server text rendering; the
/// dashboard layer treats dates as opaque strings.
pub fn decode_value(type_oid: u32, bytes: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(bytes).map_err(|_| type_error(type_oid, "invalid UTF-8"))?;
    let value = match type_oid {
        oid::BOOL => Value::Bool(matches!(text, "t" | "true" | "TRUE" | "1")),
        oid::INT2 | oid::INT4 => Value::Int(
            text.parse()
                .map_err(|_| type_error(type_oid, text))?,
        ),
        oid::INT8 => Value::BigInt(
            text.parse()
                .map_err(|_| type_error(type_oid, text))?,
        ),
        oid::FLOAT4 | oid::FLOAT8 | oid::NUMERIC => Value::Double(decode_float(text)?),
        oid::BYTEA => Value::Bytes(decode_bytea(text)?),
        oid::JSON | oid::JSONB => Value::Json(
            serde_json::from_str(text).map_err(|_| type_error(type_oid, text))?,
        ),
        _ => Value::Text(text.to_string()),
    };
    Ok(value)
}

fn decode_float(text: &str) -> Result<f64> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        other => other
            .parse()
            .map_err(|_| type_error(oid::FLOAT8, other)),
    }
}

fn decode_bytea(text: &str) -> Result<Vec<u8>> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| type_error(oid::BYTEA, text))?;
    if hex.len() % 2 != 0 {
        return Err(type_error(oid::BYTEA, text));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).map_err(|_| type_error(oid::BYTEA, text))?;
        out.push(u8::from_str_radix(pair, 16).map_err(|_| type_error(oid::BYTEA, text))?);
    }
    Ok(out)
}

fn type_error(type_oid: u32, text: &str) -> Error {
    Error::Type(TypeError {
        expected: "decodable text-format value",
        actual: format!("{text:?} (type oid {type_oid})"),
        column: None,
    })
}
