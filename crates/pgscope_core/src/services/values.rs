//! PostgreSQL row to JSON conversion.
//!
//! Values are decoded from the binary wire format by column type. SQL NULL
//! becomes JSON null; a non-null value of a type with no mapping becomes the
//! marker string `<unsupported type NAME>` so it is never mistaken for NULL.

use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value as JsonValue};
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;
use uuid::Uuid;

/// Convert every column of a row to a JSON value, in column order.
pub fn row_values(row: &Row) -> Vec<JsonValue> {
    (0..row.len()).map(|i| column_value(row, i)).collect()
}

fn column_value(row: &Row, i: usize) -> JsonValue {
    let ty = row.columns()[i].type_();
    match row.try_get::<_, Option<RawValue>>(i) {
        Ok(Some(RawValue(raw))) => decode_value(ty, raw),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::warn!(column = i, error = %e, "Failed to read column value");
            unsupported(ty)
        }
    }
}

/// The undecoded bytes of a non-null value of any type.
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Decode one non-null value of type `ty`.
pub(crate) fn decode_value(ty: &Type, raw: &[u8]) -> JsonValue {
    decode(ty, raw).unwrap_or_else(|| unsupported(ty))
}

fn unsupported(ty: &Type) -> JsonValue {
    JsonValue::String(format!("<unsupported type {}>", ty.name()))
}

fn parse<'a, T: FromSql<'a>>(ty: &Type, raw: &'a [u8]) -> Option<T> {
    T::from_sql(ty, raw).ok()
}

fn float(v: f64) -> JsonValue {
    // NaN and infinities have no JSON number form
    Number::from_f64(v).map(JsonValue::Number).unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn array<T>(values: Vec<Option<T>>, f: impl Fn(T) -> JsonValue) -> JsonValue {
    JsonValue::Array(values.into_iter().map(|v| v.map(&f).unwrap_or(JsonValue::Null)).collect())
}

fn decode(ty: &Type, raw: &[u8]) -> Option<JsonValue> {
    let text = |s: String| JsonValue::String(s);

    let value = match *ty {
        Type::BOOL => JsonValue::Bool(parse::<bool>(ty, raw)?),

        Type::INT2 => parse::<i16>(ty, raw)?.into(),
        Type::INT4 => parse::<i32>(ty, raw)?.into(),
        Type::INT8 => parse::<i64>(ty, raw)?.into(),
        Type::OID => parse::<u32>(ty, raw)?.into(),

        Type::FLOAT4 => float(parse::<f32>(ty, raw)? as f64),
        Type::FLOAT8 => float(parse::<f64>(ty, raw)?),

        Type::NUMERIC => text(parse::<PgNumeric>(ty, raw)?.0),
        Type::MONEY => text(parse::<PgMoney>(ty, raw)?.0),

        Type::UUID => text(parse::<Uuid>(ty, raw)?.to_string()),
        Type::JSON | Type::JSONB => parse::<JsonValue>(ty, raw)?,

        Type::BYTEA => text(bytea_hex(&parse::<Vec<u8>>(ty, raw)?)),
        Type::INET => text(parse::<IpAddr>(ty, raw)?.to_string()),
        // The single-byte "char" type, not CHAR(n)
        Type::CHAR => text(char::from(parse::<i8>(ty, raw)? as u8).to_string()),

        Type::TIMESTAMPTZ => text(parse::<DateTime<Utc>>(ty, raw)?.to_rfc3339()),
        Type::TIMESTAMP => text(parse::<NaiveDateTime>(ty, raw)?.to_string()),
        Type::DATE => text(parse::<NaiveDate>(ty, raw)?.to_string()),
        Type::TIME => text(parse::<NaiveTime>(ty, raw)?.to_string()),
        Type::TIMETZ => text(parse::<PgTimeTz>(ty, raw)?.0),
        Type::INTERVAL => text(parse::<PgInterval>(ty, raw)?.0),

        Type::INT4_ARRAY => array(parse::<Vec<Option<i32>>>(ty, raw)?, JsonValue::from),
        Type::INT8_ARRAY => array(parse::<Vec<Option<i64>>>(ty, raw)?, JsonValue::from),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            array(parse::<Vec<Option<String>>>(ty, raw)?, JsonValue::String)
        }

        // Enum labels travel as their text
        _ if matches!(ty.kind(), Kind::Enum(_)) => text(std::str::from_utf8(raw).ok()?.to_string()),
        _ if <String as FromSql<'_>>::accepts(ty) => text(parse::<String>(ty, raw)?),
        _ => return None,
    };
    Some(value)
}

/// BYTEA in PostgreSQL's hex output form, e.g. `\x0102`.
fn bytea_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

type FromSqlResult<T> = Result<T, Box<dyn std::error::Error + Sync + Send>>;

fn be_i64(raw: &[u8], at: usize) -> FromSqlResult<i64> {
    let bytes: [u8; 8] = raw.get(at..at + 8).ok_or("value too short")?.try_into()?;
    Ok(i64::from_be_bytes(bytes))
}

fn be_i32(raw: &[u8], at: usize) -> FromSqlResult<i32> {
    let bytes: [u8; 4] = raw.get(at..at + 4).ok_or("value too short")?.try_into()?;
    Ok(i32::from_be_bytes(bytes))
}

const MICROS_PER_SECOND: u64 = 1_000_000;

/// `HH:MM:SS[.ffffff]` for a non-negative count of microseconds. Hours may
/// exceed 24.
fn clock(micros: u64) -> String {
    let secs = micros / MICROS_PER_SECOND;
    let frac = micros % MICROS_PER_SECOND;
    let mut out = format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
    if frac > 0 {
        let digits = format!("{frac:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

/// TIMETZ as `HH:MM:SS+HH[:MM]`.
///
/// The wire form is microseconds since midnight then the zone offset in
/// seconds west of UTC.
struct PgTimeTz(String);

impl<'a> FromSql<'a> for PgTimeTz {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> FromSqlResult<Self> {
        let micros = be_i64(raw, 0)?;
        let east = -be_i32(raw, 8)?;

        let mut text = clock(u64::try_from(micros)?);
        text.push(if east < 0 { '-' } else { '+' });
        let offset = east.unsigned_abs();
        text.push_str(&format!("{:02}", offset / 3600));
        if offset % 3600 != 0 {
            text.push_str(&format!(":{:02}", offset / 60 % 60));
        }
        if offset % 60 != 0 {
            text.push_str(&format!(":{:02}", offset % 60));
        }
        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMETZ
    }
}

/// INTERVAL in PostgreSQL's default output style, e.g.
/// `1 year 2 mons 3 days 04:05:06`.
///
/// The wire form is microseconds, then days, then months.
struct PgInterval(String);

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> FromSqlResult<Self> {
        let micros = be_i64(raw, 0)?;
        let days = be_i32(raw, 8)?;
        let months = be_i32(raw, 12)?;

        let mut parts = Vec::new();
        let mut negative_seen = false;
        for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
            if value != 0 {
                negative_seen |= value < 0;
                let plural = if value == 1 { "" } else { "s" };
                parts.push(format!("{value} {unit}{plural}"));
            }
        }

        if micros != 0 || parts.is_empty() {
            let sign = if micros < 0 {
                "-"
            } else if negative_seen {
                "+"
            } else {
                ""
            };
            parts.push(format!("{sign}{}", clock(micros.unsigned_abs())));
        }
        Ok(Self(parts.join(" ")))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// MONEY as a plain decimal amount with two fractional digits.
///
/// The wire form is an int8 count of the smallest currency unit; the
/// currency symbol depends on the server locale and is not included.
struct PgMoney(String);

impl<'a> FromSql<'a> for PgMoney {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> FromSqlResult<Self> {
        let cents = be_i64(raw, 0)?;
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        Ok(Self(format!("{sign}{}.{:02}", abs / 100, abs % 100)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }
}

/// NUMERIC rendered as its exact decimal text.
///
/// The binary wire format is a base-10000 digit array with weight, sign and
/// display scale.
struct PgNumeric(String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("numeric value too short".into());
        }
        let word = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);

        let ndigits = word(0) as usize;
        let weight = word(2) as i16 as i32;
        let sign = word(4);
        let dscale = word(6) as usize;

        match sign {
            NUMERIC_NAN => return Ok(Self("NaN".to_string())),
            NUMERIC_PINF => return Ok(Self("Infinity".to_string())),
            NUMERIC_NINF => return Ok(Self("-Infinity".to_string())),
            _ => {}
        }

        if raw.len() < 8 + ndigits * 2 {
            return Err("numeric digit array truncated".into());
        }
        let digits: Vec<u16> = (0..ndigits).map(|d| word(8 + d * 2)).collect();

        let mut int_part = String::new();
        if weight >= 0 {
            for group in 0..=weight {
                let digit = digits.get(group as usize).copied().unwrap_or(0);
                if int_part.is_empty() {
                    int_part.push_str(&digit.to_string());
                } else {
                    int_part.push_str(&format!("{digit:04}"));
                }
            }
        }
        if int_part.is_empty() {
            int_part.push('0');
        }

        let mut frac_part = String::new();
        if dscale > 0 {
            let mut group = weight + 1;
            while frac_part.len() < dscale {
                let digit = if group < 0 {
                    0
                } else {
                    digits.get(group as usize).copied().unwrap_or(0)
                };
                frac_part.push_str(&format!("{digit:04}"));
                group += 1;
            }
            frac_part.truncate(dscale);
        }

        let mut text = String::new();
        if sign == NUMERIC_NEG {
            text.push('-');
        }
        text.push_str(&int_part);
        if !frac_part.is_empty() {
            text.push('.');
            text.push_str(&frac_part);
        }
        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}
