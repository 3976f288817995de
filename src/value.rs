use std::fmt::{self, Display, Formatter};

use bytes::{Buf, Bytes};

use crate::error::{BoxDynError, Error};
use crate::protocol::{ColumnDefinition, ColumnFlags, ColumnType};

/// The disposition of a value in a result row: decoded from the text
/// protocol (`COM_QUERY`) or the binary protocol (`COM_STMT_EXECUTE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MySqlValueFormat {
    Text,
    Binary,
}

/// Type information for a result column or bound parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlTypeInfo {
    pub(crate) r#type: ColumnType,
    pub(crate) flags: ColumnFlags,
    pub(crate) char_set: u16,
}

impl MySqlTypeInfo {
    pub(crate) fn from_column(column: &ColumnDefinition) -> Self {
        Self {
            r#type: column.r#type,
            flags: column.flags,
            char_set: column.char_set,
        }
    }

    pub(crate) const fn binary(r#type: ColumnType, unsigned: bool) -> Self {
        Self {
            r#type,
            flags: if unsigned {
                ColumnFlags::UNSIGNED
            } else {
                ColumnFlags::empty()
            },
            char_set: 63, // binary
        }
    }

    /// The wire type of the column.
    pub fn r#type(&self) -> ColumnType {
        self.r#type
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED)
    }
}

impl Display for MySqlTypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_unsigned() {
            write!(f, "{} UNSIGNED", self.r#type.name())
        } else {
            f.write_str(self.r#type.name())
        }
    }
}

/// A calendar date as transferred by the binary protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// A date and time as transferred by the binary protocol for `DATETIME`
/// and `TIMESTAMP` columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlDateTime {
    pub date: MySqlDate,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

/// A (possibly negative) duration as transferred by the binary protocol for
/// `TIME` columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlTime {
    pub negative: bool,
    pub days: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl MySqlDate {
    fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_binary_resultset.html#sect_protocol_binary_resultset_row_value_date
//
// DATE/DATETIME/TIMESTAMP are transferred as a length byte (0, 4, 7, or 11)
// followed by that many bytes of calendar fields; TIME as a length byte
// (0, 8, or 12) followed by sign/days/time fields.

pub(crate) fn encode_date_time(dt: &MySqlDateTime, buf: &mut Vec<u8>) {
    let len: u8 = if dt.microsecond != 0 {
        11
    } else if dt.hour != 0 || dt.minute != 0 || dt.second != 0 {
        7
    } else if !dt.date.is_zero() {
        4
    } else {
        0
    };

    buf.push(len);

    if len >= 4 {
        buf.extend_from_slice(&dt.date.year.to_le_bytes());
        buf.push(dt.date.month);
        buf.push(dt.date.day);
    }

    if len >= 7 {
        buf.push(dt.hour);
        buf.push(dt.minute);
        buf.push(dt.second);
    }

    if len == 11 {
        buf.extend_from_slice(&dt.microsecond.to_le_bytes());
    }
}

pub(crate) fn decode_date_time(mut buf: Bytes) -> Result<MySqlDateTime, Error> {
    let len = if buf.is_empty() { 0 } else { buf.get_u8() };

    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(err_protocol!("invalid DATETIME length {}", len));
    }

    let mut dt = MySqlDateTime::default();

    if len >= 4 {
        dt.date.year = buf.get_u16_le();
        dt.date.month = buf.get_u8();
        dt.date.day = buf.get_u8();
    }

    if len >= 7 {
        dt.hour = buf.get_u8();
        dt.minute = buf.get_u8();
        dt.second = buf.get_u8();
    }

    if len == 11 {
        dt.microsecond = buf.get_u32_le();
    }

    Ok(dt)
}

pub(crate) fn encode_time(time: &MySqlTime, buf: &mut Vec<u8>) {
    let len: u8 = if time.microsecond != 0 {
        12
    } else if time.days != 0 || time.hour != 0 || time.minute != 0 || time.second != 0 {
        8
    } else {
        0
    };

    buf.push(len);

    if len >= 8 {
        buf.push(time.negative as u8);
        buf.extend_from_slice(&time.days.to_le_bytes());
        buf.push(time.hour);
        buf.push(time.minute);
        buf.push(time.second);
    }

    if len == 12 {
        buf.extend_from_slice(&time.microsecond.to_le_bytes());
    }
}

pub(crate) fn decode_time(mut buf: Bytes) -> Result<MySqlTime, Error> {
    let len = if buf.is_empty() { 0 } else { buf.get_u8() };

    if !matches!(len, 0 | 8 | 12) {
        return Err(err_protocol!("invalid TIME length {}", len));
    }

    let mut time = MySqlTime::default();

    if len >= 8 {
        time.negative = buf.get_u8() != 0;
        time.days = buf.get_u32_le();
        time.hour = buf.get_u8();
        time.minute = buf.get_u8();
        time.second = buf.get_u8();
    }

    if len == 12 {
        time.microsecond = buf.get_u32_le();
    }

    Ok(time)
}

/// A single value from a result row, undecoded.
#[derive(Debug)]
pub struct MySqlValue<'r> {
    pub(crate) value: Option<&'r [u8]>,
    pub(crate) type_info: &'r MySqlTypeInfo,
    pub(crate) format: MySqlValueFormat,
}

impl<'r> MySqlValue<'r> {
    pub fn type_info(&self) -> &MySqlTypeInfo {
        self.type_info
    }

    pub fn format(&self) -> MySqlValueFormat {
        self.format
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// The raw bytes of the value, exactly as received.
    pub fn as_bytes(&self) -> Result<&'r [u8], BoxDynError> {
        self.value.ok_or_else(|| "unexpected NULL".into())
    }

    pub fn as_str(&self) -> Result<&'r str, BoxDynError> {
        Ok(std::str::from_utf8(self.as_bytes()?)?)
    }

    pub fn to_i64(&self) -> Result<i64, BoxDynError> {
        match self.format {
            MySqlValueFormat::Text => Ok(self.as_str()?.parse()?),

            MySqlValueFormat::Binary => {
                let buf = self.as_bytes()?;

                Ok(match self.type_info.r#type {
                    ColumnType::Tiny => i64::from(buf[0] as i8),
                    ColumnType::Short | ColumnType::Year => {
                        i64::from(i16::from_le_bytes(checked(buf)?))
                    }
                    ColumnType::Long | ColumnType::Int24 => {
                        i64::from(i32::from_le_bytes(checked(buf)?))
                    }
                    ColumnType::LongLong => i64::from_le_bytes(checked(buf)?),

                    // DECIMAL and friends arrive as strings even in binary rows
                    ColumnType::Decimal | ColumnType::NewDecimal => self.as_str()?.parse()?,

                    other => {
                        return Err(format!("cannot decode {} as an integer", other.name()).into());
                    }
                })
            }
        }
    }

    pub fn to_u64(&self) -> Result<u64, BoxDynError> {
        match self.format {
            MySqlValueFormat::Text => Ok(self.as_str()?.parse()?),

            MySqlValueFormat::Binary => {
                let buf = self.as_bytes()?;

                Ok(match self.type_info.r#type {
                    ColumnType::Tiny => u64::from(buf[0]),
                    ColumnType::Short | ColumnType::Year => {
                        u64::from(u16::from_le_bytes(checked(buf)?))
                    }
                    ColumnType::Long | ColumnType::Int24 => {
                        u64::from(u32::from_le_bytes(checked(buf)?))
                    }
                    ColumnType::LongLong => u64::from_le_bytes(checked(buf)?),
                    ColumnType::Bit => {
                        // big-endian, up to 8 bytes
                        buf.iter().fold(0_u64, |acc, &b| (acc << 8) | u64::from(b))
                    }

                    other => {
                        return Err(format!("cannot decode {} as an integer", other.name()).into());
                    }
                })
            }
        }
    }

    pub fn to_f32(&self) -> Result<f32, BoxDynError> {
        match (self.format, self.type_info.r#type) {
            (MySqlValueFormat::Binary, ColumnType::Float) => {
                Ok(f32::from_le_bytes(checked(self.as_bytes()?)?))
            }

            _ => Ok(self.to_f64()? as f32),
        }
    }

    pub fn to_f64(&self) -> Result<f64, BoxDynError> {
        match self.format {
            MySqlValueFormat::Text => Ok(self.as_str()?.parse()?),

            MySqlValueFormat::Binary => {
                let buf = self.as_bytes()?;

                Ok(match self.type_info.r#type {
                    ColumnType::Float => f64::from(f32::from_le_bytes(checked(buf)?)),
                    ColumnType::Double => f64::from_le_bytes(checked(buf)?),
                    ColumnType::Decimal | ColumnType::NewDecimal => self.as_str()?.parse()?,

                    other => {
                        return Err(format!("cannot decode {} as a float", other.name()).into());
                    }
                })
            }
        }
    }

    pub fn to_date_time(&self) -> Result<MySqlDateTime, BoxDynError> {
        match self.format {
            MySqlValueFormat::Binary => {
                Ok(decode_date_time(Bytes::copy_from_slice(self.as_bytes()?))?)
            }

            MySqlValueFormat::Text => parse_text_date_time(self.as_str()?),
        }
    }

    pub fn to_time(&self) -> Result<MySqlTime, BoxDynError> {
        match self.format {
            MySqlValueFormat::Binary => Ok(decode_time(Bytes::copy_from_slice(self.as_bytes()?))?),

            MySqlValueFormat::Text => parse_text_time(self.as_str()?),
        }
    }
}

fn checked<const N: usize>(buf: &[u8]) -> Result<[u8; N], BoxDynError> {
    buf.get(..N)
        .and_then(|buf| <[u8; N]>::try_from(buf).ok())
        .ok_or_else(|| format!("expected at least {} bytes, found {}", N, buf.len()).into())
}

// `YYYY-MM-DD[ hh:mm:ss[.ffffff]]`
fn parse_text_date_time(s: &str) -> Result<MySqlDateTime, BoxDynError> {
    let mut dt = MySqlDateTime::default();

    let (date, time) = match s.split_once(' ') {
        Some((date, time)) => (date, Some(time)),
        None => (s, None),
    };

    let mut parts = date.splitn(3, '-');
    dt.date.year = next_part(&mut parts, "year")?;
    dt.date.month = next_part(&mut parts, "month")?;
    dt.date.day = next_part(&mut parts, "day")?;

    if let Some(time) = time {
        let (time, micros) = match time.split_once('.') {
            Some((time, frac)) => (time, Some(frac)),
            None => (time, None),
        };

        let mut parts = time.splitn(3, ':');
        dt.hour = next_part(&mut parts, "hour")?;
        dt.minute = next_part(&mut parts, "minute")?;
        dt.second = next_part(&mut parts, "second")?;

        if let Some(micros) = micros {
            // fractional seconds are transferred at whatever precision the
            // column declares; normalize to microseconds
            let padded = format!("{:0<6}", micros);
            dt.microsecond = padded[..6].parse()?;
        }
    }

    Ok(dt)
}

// `[-][h]hh:mm:ss[.ffffff]`, hours may exceed 24
fn parse_text_time(s: &str) -> Result<MySqlTime, BoxDynError> {
    let mut time = MySqlTime::default();

    let s = match s.strip_prefix('-') {
        Some(rest) => {
            time.negative = true;
            rest
        }
        None => s,
    };

    let (clock, micros) = match s.split_once('.') {
        Some((clock, frac)) => (clock, Some(frac)),
        None => (s, None),
    };

    let mut parts = clock.splitn(3, ':');
    let hours: u32 = next_part(&mut parts, "hour")?;
    time.days = hours / 24;
    time.hour = (hours % 24) as u8;
    time.minute = next_part(&mut parts, "minute")?;
    time.second = next_part(&mut parts, "second")?;

    if let Some(micros) = micros {
        let padded = format!("{:0<6}", micros);
        time.microsecond = padded[..6].parse()?;
    }

    Ok(time)
}

fn next_part<'a, T: std::str::FromStr>(
    parts: &mut impl Iterator<Item = &'a str>,
    field: &str,
) -> Result<T, BoxDynError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parts
        .next()
        .ok_or_else(|| format!("missing {} field", field))?
        .parse()?)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn date_time_encodes_at_minimal_width() {
        let mut dt = MySqlDateTime {
            date: MySqlDate {
                year: 2023,
                month: 6,
                day: 14,
            },
            ..Default::default()
        };

        let mut buf = Vec::new();
        encode_date_time(&dt, &mut buf);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], 4);

        dt.hour = 13;
        let mut buf = Vec::new();
        encode_date_time(&dt, &mut buf);
        assert_eq!(buf[0], 7);

        dt.microsecond = 125_000;
        let mut buf = Vec::new();
        encode_date_time(&dt, &mut buf);
        assert_eq!(buf[0], 11);
        assert_eq!(decode_date_time(Bytes::from(buf)).unwrap(), dt);
    }

    #[test]
    fn time_round_trips() {
        let time = MySqlTime {
            negative: true,
            days: 3,
            hour: 2,
            minute: 30,
            second: 1,
            microsecond: 0,
        };

        let mut buf = Vec::new();
        encode_time(&time, &mut buf);
        assert_eq!(buf[0], 8);
        assert_eq!(decode_time(Bytes::from(buf)).unwrap(), time);
    }

    #[test]
    fn zero_date_time_is_empty() {
        let mut buf = Vec::new();
        encode_date_time(&MySqlDateTime::default(), &mut buf);
        assert_eq!(&buf[..], &[0]);

        assert_eq!(
            decode_date_time(Bytes::from_static(b"\x00")).unwrap(),
            MySqlDateTime::default()
        );
    }

    #[test]
    fn it_parses_text_temporals() {
        let dt = parse_text_date_time("2023-06-14 13:05:09.125").unwrap();
        assert_eq!(dt.date.year, 2023);
        assert_eq!(dt.second, 9);
        assert_eq!(dt.microsecond, 125_000);

        let time = parse_text_time("-50:10:20").unwrap();
        assert!(time.negative);
        assert_eq!(time.days, 2);
        assert_eq!(time.hour, 2);
        assert_eq!(time.minute, 10);
    }
}
