//! Conversion between PostgreSQL wire values and JSON
//!
//! Result columns are decoded according to their declared type, and JSON
//! parameters are encoded to whatever type the server inferred for each
//! placeholder. Decoding never yields `null` for a non-null value: types
//! without a dedicated conversion fall back to their text form, or to a
//! `\x`-prefixed hex string when the binary form is not text.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use std::error::Error;
use std::fmt::Write;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;
const NUMERIC_BASE_DIGITS: usize = 4;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A result column decoded to JSON
#[derive(Debug, Clone, PartialEq)]
pub struct JsonColumn(pub Value);

impl<'a> FromSql<'a> for JsonColumn {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        column_value(ty, raw).map(JsonColumn)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Decode a non-null column value of type `ty`
fn column_value(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    let value = match ty {
        t if *t == Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        t if *t == Type::INT2 => i16::from_sql(ty, raw)?.into(),
        t if *t == Type::INT4 => i32::from_sql(ty, raw)?.into(),
        t if *t == Type::INT8 => i64::from_sql(ty, raw)?.into(),
        t if *t == Type::OID => u32::from_sql(ty, raw)?.into(),
        t if *t == Type::FLOAT4 => float_value(f64::from(f32::from_sql(ty, raw)?)),
        t if *t == Type::FLOAT8 => float_value(f64::from_sql(ty, raw)?),
        t if *t == Type::NUMERIC => Value::String(decode_numeric(raw)?),
        t if *t == Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.to_string()),
        t if *t == Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
        t if *t == Type::TIMESTAMP => Value::String(
            NaiveDateTime::from_sql(ty, raw)?
                .format(TIMESTAMP_FORMAT)
                .to_string(),
        ),
        t if *t == Type::TIMESTAMPTZ => {
            Value::String(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339())
        }
        t if *t == Type::JSON || *t == Type::JSONB => Value::from_sql(ty, raw)?,
        t if *t == Type::UUID => Value::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        t if <&str as FromSql>::accepts(t) => Value::String(<&str>::from_sql(ty, raw)?.to_string()),
        t => match t.kind() {
            Kind::Array(_) => {
                let items = Vec::<Option<JsonColumn>>::from_sql(ty, raw)?;
                Value::Array(
                    items
                        .into_iter()
                        .map(|item| item.map(|c| c.0).unwrap_or(Value::Null))
                        .collect(),
                )
            }
            _ => Value::String(hex_string(raw)),
        },
    };
    Ok(value)
}

/// NaN and infinities have no JSON number form
fn float_value(v: f64) -> Value {
    match serde_json::Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None => Value::String(v.to_string()),
    }
}

fn hex_string(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, BoxError> {
    let bytes: &[u8] = *buf;
    let (head, rest) = bytes
        .split_first_chunk::<2>()
        .ok_or("truncated numeric value")?;
    *buf = rest;
    Ok(u16::from_be_bytes(*head))
}

/// Render a binary `numeric` as its exact decimal text
///
/// The value is sent as base-10000 digit groups with a weight (exponent of
/// the first group) and a display scale.
pub fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let mut buf = raw;
    let ndigits = read_u16(&mut buf)? as i16;
    let weight = read_u16(&mut buf)? as i16;
    let sign = read_u16(&mut buf)?;
    let dscale = read_u16(&mut buf)? as usize;

    let digits = (0..ndigits.max(0))
        .map(|_| read_u16(&mut buf).map(|d| d as i16))
        .collect::<Result<Vec<i16>, _>>()?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{:04x}", other).into()),
    }

    let digit = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    let weight = i32::from(weight);
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", digit(i));
            } else {
                let _ = write!(out, "{:04}", digit(i));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + NUMERIC_BASE_DIGITS);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit(i));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

/// Encode decimal text (`-12.340`, `NaN`) as a binary `numeric`
pub fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let text = text.trim();
    let special = match text {
        "NaN" => Some(NUMERIC_NAN),
        "Infinity" | "+Infinity" => Some(NUMERIC_PINF),
        "-Infinity" => Some(NUMERIC_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(sign);
        out.put_u16(0);
        return Ok(());
    }

    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(format!("'{}' is not a decimal number", text).into());
    }

    let dscale = u16::try_from(frac_part.len()).map_err(|_| "numeric scale too large")?;

    let int_trimmed = int_part.trim_start_matches('0');
    let int_pad = (NUMERIC_BASE_DIGITS - int_trimmed.len() % NUMERIC_BASE_DIGITS) % NUMERIC_BASE_DIGITS;
    let frac_pad = (NUMERIC_BASE_DIGITS - frac_part.len() % NUMERIC_BASE_DIGITS) % NUMERIC_BASE_DIGITS;
    let padded = format!(
        "{}{}{}{}",
        "0".repeat(int_pad),
        int_trimmed,
        frac_part,
        "0".repeat(frac_pad)
    );

    let mut groups = padded
        .as_bytes()
        .chunks(NUMERIC_BASE_DIGITS)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect::<Vec<i16>>();

    let int_groups = (int_pad + int_trimmed.len()) / NUMERIC_BASE_DIGITS;
    let mut weight = i32::try_from(int_groups).map_err(|_| "numeric value too large")? - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= i32::try_from(leading).map_err(|_| "numeric value too large")?;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let ndigits = i16::try_from(groups.len()).map_err(|_| "numeric value too large")?;
    let weight = i16::try_from(weight).map_err(|_| "numeric value too large")?;
    let sign = if negative && !groups.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    out.put_i16(ndigits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for group in groups {
        out.put_i16(group);
    }
    Ok(())
}

/// A JSON query parameter, encoded to the type the server declared for its
/// placeholder
#[derive(Debug)]
pub struct JsonParam<'a>(pub &'a Value);

impl JsonParam<'_> {
    fn as_text(&self) -> Option<String> {
        match self.0 {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn as_i64(&self) -> Result<i64, BoxError> {
        match self.0 {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| format!("{} is not an integer", n).into()),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|e| format!("'{}' is not an integer: {}", s, e).into()),
            other => Err(format!("cannot bind {} as an integer", other).into()),
        }
    }

    fn as_f64(&self) -> Result<f64, BoxError> {
        match self.0 {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| format!("{} is not a float", n).into()),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|e| format!("'{}' is not a float: {}", s, e).into()),
            other => Err(format!("cannot bind {} as a float", other).into()),
        }
    }

    fn as_str(&self, ty: &Type) -> Result<&str, BoxError> {
        match self.0 {
            Value::String(s) => Ok(s.trim()),
            other => Err(format!("cannot bind {} as {}", other, ty).into()),
        }
    }
}

impl ToSql for JsonParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.0.is_null() {
            return Ok(IsNull::Yes);
        }

        match ty {
            t if *t == Type::BOOL => match self.0 {
                Value::Bool(b) => b.to_sql(ty, out),
                Value::String(s) => s.trim().parse::<bool>()?.to_sql(ty, out),
                other => Err(format!("cannot bind {} as boolean", other).into()),
            },
            t if *t == Type::INT2 => i16::try_from(self.as_i64()?)?.to_sql(ty, out),
            t if *t == Type::INT4 => i32::try_from(self.as_i64()?)?.to_sql(ty, out),
            t if *t == Type::INT8 => self.as_i64()?.to_sql(ty, out),
            t if *t == Type::OID => u32::try_from(self.as_i64()?)?.to_sql(ty, out),
            t if *t == Type::FLOAT4 => (self.as_f64()? as f32).to_sql(ty, out),
            t if *t == Type::FLOAT8 => self.as_f64()?.to_sql(ty, out),
            t if *t == Type::NUMERIC => {
                let text = self
                    .as_text()
                    .ok_or_else(|| format!("cannot bind {} as numeric", self.0))?;
                encode_numeric(&text, out)?;
                Ok(IsNull::No)
            }
            t if *t == Type::DATE => self.as_str(ty)?.parse::<NaiveDate>()?.to_sql(ty, out),
            t if *t == Type::TIME => self.as_str(ty)?.parse::<NaiveTime>()?.to_sql(ty, out),
            t if *t == Type::TIMESTAMP => parse_timestamp(self.as_str(ty)?)?.to_sql(ty, out),
            t if *t == Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(self.as_str(ty)?)?
                .with_timezone(&Utc)
                .to_sql(ty, out),
            t if *t == Type::JSON || *t == Type::JSONB => self.0.to_sql(ty, out),
            t if *t == Type::UUID => self.as_str(ty)?.parse::<uuid::Uuid>()?.to_sql(ty, out),
            t if <&str as ToSql>::accepts(t) => match self.as_text() {
                Some(text) => text.to_sql(ty, out),
                None => self.0.to_string().to_sql(ty, out),
            },
            t => Err(format!("unsupported parameter type {}", t).into()),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    s.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| s.parse::<NaiveDate>().map(|d| d.and_time(NaiveTime::MIN)))
        .map_err(|e| format!("'{}' is not a timestamp: {}", s, e).into())
}
