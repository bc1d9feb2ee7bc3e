use std::ops::Bound;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use common::errors::{AppError, AppResult};
use common::models::DatabaseFamily;
use rust_decimal::Decimal;
use serde_json::value::RawValue;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgRange, PgTimeTz};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::mac_address::MacAddress;
use sqlx::types::Json;
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    array_of, connect_error, decode_as, native_url, query_error, undecoded, Credentials,
    DatabaseDriver, RowSet, Session,
};
use crate::value::{Interval, NativeValue};

pub struct PostgresDriver {
    name: String,
}

impl PostgresDriver {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::PostgreSQL
    }

    async fn open(&self, url: &str, credentials: &Credentials) -> AppResult<Box<dyn Session>> {
        let mut options = PgConnectOptions::from_str(native_url(url))
            .map_err(|e| AppError::SessionBuildFailed(e.to_string()))?;
        if let Some(username) = &credentials.username {
            options = options.username(username);
        }
        if let Some(password) = &credentials.password {
            options = options.password(password);
        }

        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(connect_error)?;
        tracing::debug!(driver = %self.name, "PostgreSQL session opened");
        Ok(Box::new(PostgresSession {
            conn: Mutex::new(Some(conn)),
        }))
    }
}

struct PostgresSession {
    conn: Mutex<Option<PgConnection>>,
}

#[async_trait]
impl Session for PostgresSession {
    async fn query(&self, sql: &str) -> AppResult<RowSet> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(AppError::NoActiveSession)?;

        let statement = (&mut *conn).prepare(sql).await.map_err(query_error)?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = statement
            .query()
            .fetch_all(&mut *conn)
            .await
            .map_err(query_error)?;

        Ok(RowSet {
            columns,
            rows: rows.iter().map(decode_row).collect(),
        })
    }

    async fn ping(&self) -> AppResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(AppError::NoActiveSession)?;
        conn.ping()
            .await
            .map_err(|e| AppError::ConnectionInvalid(e.to_string()))
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "PostgreSQL session did not close cleanly");
            }
        }
    }
}

fn decode_row(row: &PgRow) -> Vec<NativeValue> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

/// Types whose binary encoding is their UTF-8 text.
const TEXT_TYPES: &[&str] = &["TEXT", "VARCHAR", "CHAR", "NAME", "CITEXT", "UNKNOWN", "XML"];

/// Results arrive in binary format, so every mapped type needs a real decoder.
/// Anything else is kept as raw bytes.
fn decode_cell(row: &PgRow, idx: usize) -> NativeValue {
    let type_name = row.column(idx).type_info().name().to_string();
    let t = type_name.as_str();

    match t {
        "BOOL" => decode_as!(row, idx, bool, t, NativeValue::Bool),
        "INT2" => decode_as!(row, idx, i16, t, |v: i16| NativeValue::Int(v.into())),
        "INT4" => decode_as!(row, idx, i32, t, |v: i32| NativeValue::Int(v.into())),
        "INT8" => decode_as!(row, idx, i64, t, NativeValue::Int),
        "OID" => decode_as!(row, idx, Oid, t, |v: Oid| NativeValue::UInt(v.0.into())),
        "FLOAT4" => decode_as!(row, idx, f32, t, |v: f32| NativeValue::Float(v.into())),
        "FLOAT8" => decode_as!(row, idx, f64, t, NativeValue::Float),
        "NUMERIC" => decode_as!(row, idx, Decimal, t, NativeValue::Decimal),
        "MONEY" => decode_as!(row, idx, PgMoney, t, money),
        _ if TEXT_TYPES.contains(&t) => decode_as!(unchecked row, idx, String, t, NativeValue::Text),
        "\"CHAR\"" => decode_as!(row, idx, i8, t, |v: i8| NativeValue::Text((v as u8 as char).to_string())),
        "BYTEA" => decode_as!(row, idx, Vec<u8>, t, NativeValue::Bytes),
        "UUID" => decode_as!(row, idx, Uuid, t, NativeValue::Uuid),
        "JSON" | "JSONB" => decode_as!(row, idx, Json<Box<RawValue>>, t, |v: Json<Box<RawValue>>| {
            raw_json(t, v)
        }),
        "INET" | "CIDR" => decode_as!(unchecked row, idx, IpNetwork, t, |v: IpNetwork| {
            NativeValue::Text(format_inet(v, t == "CIDR"))
        }),
        "MACADDR" => decode_as!(row, idx, MacAddress, t, |v: MacAddress| NativeValue::Text(format_mac(v))),
        "DATE" => decode_as!(row, idx, NaiveDate, t, NativeValue::Date),
        "TIME" => decode_as!(row, idx, NaiveTime, t, NativeValue::Time),
        "TIMETZ" => decode_as!(row, idx, PgTimeTz<NaiveTime, FixedOffset>, t, |v: PgTimeTz<NaiveTime, FixedOffset>| {
            NativeValue::Text(format!("{}{}", v.time, format_offset(v.offset.local_minus_utc())))
        }),
        "TIMESTAMP" => decode_as!(row, idx, NaiveDateTime, t, NativeValue::Timestamp),
        "TIMESTAMPTZ" => decode_as!(row, idx, DateTime<Utc>, t, NativeValue::TimestampTz),
        "INTERVAL" => decode_as!(row, idx, PgInterval, t, |v: PgInterval| {
            NativeValue::Interval(Interval::from_parts(v.months, v.days, v.microseconds))
        }),
        "INT4RANGE" => decode_as!(row, idx, PgRange<i32>, t, |r: PgRange<i32>| range(&r, |v| v.to_string())),
        "INT8RANGE" => decode_as!(row, idx, PgRange<i64>, t, |r: PgRange<i64>| range(&r, |v| v.to_string())),
        "NUMRANGE" => decode_as!(row, idx, PgRange<Decimal>, t, |r: PgRange<Decimal>| range(&r, |v| v.to_string())),
        "DATERANGE" => decode_as!(row, idx, PgRange<NaiveDate>, t, |r: PgRange<NaiveDate>| range(&r, |v| v.to_string())),
        "TSRANGE" => decode_as!(row, idx, PgRange<NaiveDateTime>, t, |r: PgRange<NaiveDateTime>| {
            range(&r, |v| format!("\"{}\"", v))
        }),
        "TSTZRANGE" => decode_as!(row, idx, PgRange<DateTime<Utc>>, t, |r: PgRange<DateTime<Utc>>| {
            range(&r, |v| format!("\"{}+00\"", v.naive_utc()))
        }),
        "POINT" => from_wire(row, idx, t, point_text),
        "BIT" | "VARBIT" => from_wire(row, idx, t, bit_text),
        "BOOL[]" => decode_as!(row, idx, Vec<Option<bool>>, t, |v| array_of(v, NativeValue::Bool)),
        "INT2[]" => decode_as!(row, idx, Vec<Option<i16>>, t, |v| array_of(v, |x: i16| {
            NativeValue::Int(x.into())
        })),
        "INT4[]" => decode_as!(row, idx, Vec<Option<i32>>, t, |v| array_of(v, |x: i32| {
            NativeValue::Int(x.into())
        })),
        "INT8[]" => decode_as!(row, idx, Vec<Option<i64>>, t, |v| array_of(v, NativeValue::Int)),
        "FLOAT4[]" => decode_as!(row, idx, Vec<Option<f32>>, t, |v| array_of(v, |x: f32| {
            NativeValue::Float(x.into())
        })),
        "FLOAT8[]" => decode_as!(row, idx, Vec<Option<f64>>, t, |v| array_of(v, NativeValue::Float)),
        "NUMERIC[]" => decode_as!(row, idx, Vec<Option<Decimal>>, t, |v| array_of(v, NativeValue::Decimal)),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" | "CHAR[]" => {
            decode_as!(row, idx, Vec<Option<String>>, t, |v| array_of(v, NativeValue::Text))
        }
        "UUID[]" => decode_as!(row, idx, Vec<Option<Uuid>>, t, |v| array_of(v, NativeValue::Uuid)),
        "DATE[]" => decode_as!(row, idx, Vec<Option<NaiveDate>>, t, |v| array_of(v, NativeValue::Date)),
        "TIME[]" => decode_as!(row, idx, Vec<Option<NaiveTime>>, t, |v| array_of(v, NativeValue::Time)),
        "TIMESTAMP[]" => decode_as!(row, idx, Vec<Option<NaiveDateTime>>, t, |v| {
            array_of(v, NativeValue::Timestamp)
        }),
        "TIMESTAMPTZ[]" => decode_as!(row, idx, Vec<Option<DateTime<Utc>>>, t, |v| {
            array_of(v, NativeValue::TimestampTz)
        }),
        "JSON[]" | "JSONB[]" => decode_as!(unchecked row, idx, Vec<Option<Json<Box<RawValue>>>>, t, |v| {
            array_of(v, |x: Json<Box<RawValue>>| raw_json(t.trim_end_matches("[]"), x))
        }),
        "INET[]" | "CIDR[]" => decode_as!(unchecked row, idx, Vec<Option<IpNetwork>>, t, |v| {
            array_of(v, |x: IpNetwork| NativeValue::Text(format_inet(x, t == "CIDR[]")))
        }),
        _ => match row.try_get_raw(idx) {
            Ok(raw) if sqlx::ValueRef::is_null(&raw) => NativeValue::Null,
            _ if is_textual(row.column(idx).type_info()) => {
                decode_as!(unchecked row, idx, String, t, NativeValue::Text)
            }
            _ => undecoded(row, idx, t),
        },
    }
}

/// Enum labels and domains over text types are sent as plain text.
fn is_textual(info: &PgTypeInfo) -> bool {
    match info.kind() {
        PgTypeKind::Enum(_) => true,
        PgTypeKind::Domain(base) => TEXT_TYPES.contains(&base.name()),
        _ => false,
    }
}

/// Keeps the document text exactly as the server sent it.
fn raw_json(type_name: &str, value: Json<Box<RawValue>>) -> NativeValue {
    NativeValue::Json {
        type_name: type_name.to_string(),
        text: value.0.get().to_string(),
    }
}

/// Amounts in the server's currency, assuming two fractional digits.
fn money(value: PgMoney) -> NativeValue {
    NativeValue::Decimal(Decimal::new(value.0, 2))
}

fn range<T>(value: &PgRange<T>, render: impl Fn(&T) -> String) -> NativeValue {
    NativeValue::Text(format_range(value, render))
}

/// Decodes types sqlx has no decoder for straight from their wire bytes.
fn from_wire(row: &PgRow, idx: usize, type_name: &str, parse: fn(&[u8]) -> Option<String>) -> NativeValue {
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
        Ok(Some(bytes)) => parse(&bytes).map(NativeValue::Text).unwrap_or(NativeValue::Bytes(bytes)),
        Ok(None) => NativeValue::Null,
        Err(_) => undecoded(row, idx, type_name),
    }
}

/// Host addresses print without a prefix, like `inet` output does.
fn format_inet(net: IpNetwork, cidr: bool) -> String {
    let host_prefix = if net.is_ipv4() { 32 } else { 128 };
    if !cidr && net.prefix() == host_prefix {
        net.ip().to_string()
    } else {
        format!("{}/{}", net.ip(), net.prefix())
    }
}

fn format_mac(mac: MacAddress) -> String {
    mac.bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// `+02`, `+05:30`, `-03:30:15`.
fn format_offset(seconds_east: i32) -> String {
    let sign = if seconds_east < 0 { '-' } else { '+' };
    let abs = seconds_east.unsigned_abs();
    let (hours, minutes, seconds) = (abs / 3600, abs % 3600 / 60, abs % 60);
    match (minutes, seconds) {
        (0, 0) => format!("{}{:02}", sign, hours),
        (_, 0) => format!("{}{:02}:{:02}", sign, hours, minutes),
        _ => format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds),
    }
}

fn format_range<T>(value: &PgRange<T>, render: impl Fn(&T) -> String) -> String {
    let lower = match &value.start {
        Bound::Included(v) => format!("[{}", render(v)),
        Bound::Excluded(v) => format!("({}", render(v)),
        Bound::Unbounded => "(".to_string(),
    };
    let upper = match &value.end {
        Bound::Included(v) => format!("{}]", render(v)),
        Bound::Excluded(v) => format!("{})", render(v)),
        Bound::Unbounded => ")".to_string(),
    };
    format!("{},{}", lower, upper)
}

/// `point` is two big-endian float8 values.
fn point_text(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 {
        return None;
    }
    let x = f64::from_be_bytes(bytes[..8].try_into().ok()?);
    let y = f64::from_be_bytes(bytes[8..].try_into().ok()?);
    Some(format!("({},{})", x, y))
}

/// `bit`/`varbit` is an int4 bit count followed by the bits, most significant first.
fn bit_text(bytes: &[u8]) -> Option<String> {
    let count = i32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
    let count = usize::try_from(count).ok()?;
    let data = &bytes[4..];
    if data.len() * 8 < count {
        return None;
    }
    Some(
        (0..count)
            .map(|i| if data[i / 8] & (0x80 >> (i % 8)) != 0 { '1' } else { '0' })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConverterRegistry;
    use crate::engines::POSTGRES_DRIVER;
    use serde_json::{json, Value};

    #[test]
    fn inet_host_drops_prefix_but_cidr_keeps_it() {
        let host = IpNetwork::new("127.0.0.1".parse().unwrap(), 32).unwrap();
        assert_eq!(format_inet(host, false), "127.0.0.1");
        let net = IpNetwork::new("10.0.0.0".parse().unwrap(), 8).unwrap();
        assert_eq!(format_inet(net, false), "10.0.0.0/8");
        assert_eq!(format_inet(host, true), "127.0.0.1/32");
        let v6 = IpNetwork::new("::1".parse().unwrap(), 128).unwrap();
        assert_eq!(format_inet(v6, false), "::1");
    }

    #[test]
    fn mac_address_is_lowercase_colon_separated() {
        let mac = MacAddress::new([0x08, 0x00, 0x2b, 0x01, 0x02, 0xaf]);
        assert_eq!(format_mac(mac), "08:00:2b:01:02:af");
    }

    #[test]
    fn money_keeps_cents() {
        assert_eq!(money(PgMoney(1234)), NativeValue::Decimal(Decimal::new(1234, 2)));
        assert_eq!(money(PgMoney(-5)).to_string(), "-0.05");
    }

    #[test]
    fn timetz_offsets() {
        assert_eq!(format_offset(7200), "+02");
        assert_eq!(format_offset(-(5 * 3600 + 30 * 60)), "-05:30");
        assert_eq!(format_offset(3600 + 15), "+01:00:15");
        assert_eq!(format_offset(0), "+00");
    }

    #[test]
    fn range_bounds() {
        let r = PgRange {
            start: Bound::Included(1),
            end: Bound::Excluded(10),
        };
        assert_eq!(format_range(&r, |v| v.to_string()), "[1,10)");
        let open: PgRange<i32> = PgRange {
            start: Bound::Unbounded,
            end: Bound::Included(5),
        };
        assert_eq!(format_range(&open, |v| v.to_string()), "(,5]");
    }

    #[test]
    fn point_from_wire_bytes() {
        let mut bytes = 1.5f64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&2.0f64.to_be_bytes());
        assert_eq!(point_text(&bytes).as_deref(), Some("(1.5,2)"));
        assert_eq!(point_text(&bytes[..8]), None);
    }

    #[test]
    fn bits_from_wire_bytes() {
        assert_eq!(bit_text(&[0, 0, 0, 4, 0b0101_0000]).as_deref(), Some("0101"));
        assert_eq!(bit_text(&[0, 0, 0, 10, 0xff, 0b0100_0000]).as_deref(), Some("1111111101"));
        assert_eq!(bit_text(&[0, 0, 0, 9, 0xff]), None);
    }

    /// Runs against a live server when `GATEWAY_TEST_POSTGRES_URL` is set.
    #[tokio::test]
    async fn server_types_render_as_text() {
        let Ok(url) = std::env::var("GATEWAY_TEST_POSTGRES_URL") else {
            return;
        };
        let session = PostgresDriver::new(POSTGRES_DRIVER)
            .open(&url, &Credentials::default())
            .await
            .unwrap();
        let set = session
            .query(
                "SELECT '127.0.0.1'::inet AS ip, '10.0.0.0/8'::cidr AS net, \
                 '08:00:2b:01:02:03'::macaddr AS mac, 12.34::money AS m, \
                 '12:00+02'::timetz AS tz, ARRAY[DATE '2024-01-01'] AS ds, \
                 ARRAY[TIMESTAMP '2024-01-01 10:00:00'] AS tss, '[1,10)'::int4range AS r, \
                 point(1.5, 2) AS p, B'0101' AS b, '{\"b\": 1,  \"a\": 2}'::json AS j, \
                 ARRAY['{\"a\": 1}'::jsonb] AS js",
            )
            .await
            .unwrap();
        session.close().await;

        let converters = ConverterRegistry::with_defaults();
        let row: serde_json::Map<String, Value> = set
            .columns
            .iter()
            .cloned()
            .zip(set.rows[0].iter().map(|cell| converters.convert(cell)))
            .collect();

        assert_eq!(row["ip"], "127.0.0.1");
        assert_eq!(row["net"], "10.0.0.0/8");
        assert_eq!(row["mac"], "08:00:2b:01:02:03");
        assert_eq!(row["m"], "12.34");
        assert_eq!(row["tz"], "12:00:00+02");
        assert_eq!(row["ds"], json!(["2024-01-01"]));
        assert_eq!(row["tss"], json!(["2024-01-01T10:00:00"]));
        assert_eq!(row["r"], "[1,10)");
        assert_eq!(row["p"], "(1.5,2)");
        assert_eq!(row["b"], "0101");
        assert_eq!(row["j"], r#"{"b": 1,  "a": 2}"#);
        assert_eq!(row["js"], json!([r#"{"a": 1}"#]));
    }
}
