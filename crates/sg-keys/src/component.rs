use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, TimeZone};
use rust_decimal::Decimal;
use uuid::Uuid;

use sg_types::{FromValue, KeyError, ToValue};

use crate::codec::take;

/// Longest UTF-8 string component. The length byte carries the null flag in
/// its low bit, leaving seven bits for the length.
pub const MAX_STRING_BYTES: usize = 127;

const TICKS_PER_SECOND: i64 = 10_000_000;
/// Seconds from 0001-01-01T00:00:00 to the Unix epoch.
const CE_TO_UNIX_SECONDS: i64 = 62_135_596_800;

/// The closed set of identifier kinds a key component may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    Decimal,
    Uuid,
    DateTime,
    DateTimeOffset,
    TimeSpan,
    String,
    Nullable,
    Enum,
}

impl KeyKind {
    pub fn name(self) -> &'static str {
        match self {
            KeyKind::Bool => "bool",
            KeyKind::I8 => "i8",
            KeyKind::I16 => "i16",
            KeyKind::I32 => "i32",
            KeyKind::I64 => "i64",
            KeyKind::U8 => "u8",
            KeyKind::U16 => "u16",
            KeyKind::U32 => "u32",
            KeyKind::U64 => "u64",
            KeyKind::F32 => "f32",
            KeyKind::F64 => "f64",
            KeyKind::Char => "char",
            KeyKind::Decimal => "decimal",
            KeyKind::Uuid => "uuid",
            KeyKind::DateTime => "datetime",
            KeyKind::DateTimeOffset => "datetimeoffset",
            KeyKind::TimeSpan => "timespan",
            KeyKind::String => "string",
            KeyKind::Nullable => "nullable",
            KeyKind::Enum => "enum",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value usable as a shard, record, child or grandchild id.
///
/// Each kind owns its binary encoding; the key codec concatenates component
/// encodings with no type tags, so the key's type parameters alone determine
/// how bytes are read back.
pub trait KeyComponent:
    Clone + PartialEq + Default + fmt::Debug + ToValue + FromValue + Send + Sync + 'static
{
    const KIND: KeyKind;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError>;

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError>;

    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

fn invalid(kind: KeyKind, reason: impl Into<String>) -> KeyError {
    KeyError::InvalidValue { kind: kind.name(), reason: reason.into() }
}

macro_rules! fixed_width_component {
    ($($ty:ty => $kind:ident),* $(,)?) => {$(
        impl KeyComponent for $ty {
            const KIND: KeyKind = KeyKind::$kind;

            fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
                out.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }

            fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
                let bytes = take(input, std::mem::size_of::<$ty>(), Self::KIND.name())?;
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    )*};
}

fixed_width_component!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64,
);

impl KeyComponent for bool {
    const KIND: KeyKind = KeyKind::Bool;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        out.push(u8::from(*self));
        Ok(())
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        match take(input, 1, Self::KIND.name())?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(invalid(Self::KIND, format!("byte {other:#04x}"))),
        }
    }
}

impl KeyComponent for char {
    const KIND: KeyKind = KeyKind::Char;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        out.extend_from_slice(&u32::from(*self).to_le_bytes());
        Ok(())
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        let raw = u32::decode_from(input)?;
        char::from_u32(raw).ok_or_else(|| invalid(Self::KIND, format!("{raw:#x} is not a scalar value")))
    }
}

impl KeyComponent for Decimal {
    const KIND: KeyKind = KeyKind::Decimal;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        out.extend_from_slice(&self.serialize());
        Ok(())
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(take(input, 16, Self::KIND.name())?);
        let scale = buf[2];
        if scale > 28 {
            return Err(invalid(Self::KIND, format!("scale {scale} exceeds 28")));
        }
        Ok(Decimal::deserialize(buf))
    }
}

impl KeyComponent for Uuid {
    const KIND: KeyKind = KeyKind::Uuid;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        out.extend_from_slice(&self.to_bytes_le());
        Ok(())
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(take(input, 16, Self::KIND.name())?);
        Ok(Uuid::from_bytes_le(buf))
    }
}

// ---------------------------------------------------------------------------
// Date and time kinds, stored as 100ns ticks since 0001-01-01.
// Sub-tick precision is truncated on encode.
// ---------------------------------------------------------------------------

fn datetime_to_ticks(kind: KeyKind, dt: &NaiveDateTime) -> Result<i64, KeyError> {
    let utc = dt.and_utc();
    utc.timestamp()
        .checked_add(CE_TO_UNIX_SECONDS)
        .and_then(|s| s.checked_mul(TICKS_PER_SECOND))
        .and_then(|t| t.checked_add(i64::from(utc.timestamp_subsec_nanos() / 100)))
        .ok_or_else(|| invalid(kind, format!("{dt} is outside the tick range")))
}

fn ticks_to_datetime(kind: KeyKind, ticks: i64) -> Result<NaiveDateTime, KeyError> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND) - CE_TO_UNIX_SECONDS;
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| invalid(kind, format!("{ticks} ticks is outside the supported range")))
}

impl KeyComponent for NaiveDateTime {
    const KIND: KeyKind = KeyKind::DateTime;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        datetime_to_ticks(Self::KIND, self)?.encode_into(out)
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        ticks_to_datetime(Self::KIND, i64::decode_from(input)?)
    }
}

impl KeyComponent for DateTime<FixedOffset> {
    const KIND: KeyKind = KeyKind::DateTimeOffset;

    /// Local clock ticks followed by offset ticks.
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        datetime_to_ticks(Self::KIND, &self.naive_local())?.encode_into(out)?;
        (i64::from(self.offset().local_minus_utc()) * TICKS_PER_SECOND).encode_into(out)
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        let local = ticks_to_datetime(Self::KIND, i64::decode_from(input)?)?;
        let offset_ticks = i64::decode_from(input)?;
        if offset_ticks % TICKS_PER_SECOND != 0 {
            return Err(invalid(Self::KIND, "offset is not a whole number of seconds"));
        }
        let offset = i32::try_from(offset_ticks / TICKS_PER_SECOND)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| invalid(Self::KIND, format!("offset of {offset_ticks} ticks")))?;
        offset
            .from_local_datetime(&local)
            .single()
            .ok_or_else(|| invalid(Self::KIND, "local time does not map to an instant"))
    }
}

impl KeyComponent for TimeDelta {
    const KIND: KeyKind = KeyKind::TimeSpan;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        let ticks = self
            .num_seconds()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|t| t.checked_add(i64::from(self.subsec_nanos() / 100)))
            .ok_or_else(|| invalid(Self::KIND, "duration is outside the tick range"))?;
        ticks.encode_into(out)
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        let ticks = i64::decode_from(input)?;
        let whole = TimeDelta::try_seconds(ticks / TICKS_PER_SECOND)
            .ok_or_else(|| invalid(Self::KIND, format!("{ticks} ticks")))?;
        Ok(whole + TimeDelta::nanoseconds((ticks % TICKS_PER_SECOND) * 100))
    }
}

// ---------------------------------------------------------------------------
// Variable-width kinds
// ---------------------------------------------------------------------------

impl KeyComponent for String {
    const KIND: KeyKind = KeyKind::String;

    /// `(len << 1) | 1` followed by the UTF-8 bytes. A zero length byte is
    /// the null marker and never decodes into a plain `String`.
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        let bytes = self.as_bytes();
        if bytes.len() > MAX_STRING_BYTES {
            return Err(KeyError::StringTooLong { len: bytes.len(), max: MAX_STRING_BYTES });
        }
        out.push(((bytes.len() as u8) << 1) | 1);
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        let marker = take(input, 1, Self::KIND.name())?[0];
        if marker & 1 == 0 {
            return Err(invalid(Self::KIND, "null string in a non-nullable component"));
        }
        let len = usize::from(marker >> 1);
        let bytes = take(input, len, Self::KIND.name())?;
        String::from_utf8(bytes.to_vec()).map_err(|e| invalid(Self::KIND, e.to_string()))
    }
}

impl<T: KeyComponent> KeyComponent for Option<T> {
    const KIND: KeyKind = KeyKind::Nullable;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KeyError> {
        match self {
            None => {
                out.push(0);
                Ok(())
            }
            Some(v) => {
                out.push(1);
                v.encode_into(out)
            }
        }
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyError> {
        match take(input, 1, Self::KIND.name())?[0] {
            0 => Ok(None),
            1 => T::decode_from(input).map(Some),
            other => Err(invalid(Self::KIND, format!("has-value flag {other:#04x}"))),
        }
    }
}

/// Implements [`KeyComponent`] (and the value conversions it requires) for a
/// fieldless enum over an integer representation. The enum must be `Copy`,
/// `Default`, `PartialEq`, `Debug` and implement `TryFrom<$repr>`.
///
/// ```ignore
/// key_component_enum!(Region, u8);
/// ```
#[macro_export]
macro_rules! key_component_enum {
    ($ty:ty, $repr:ty) => {
        impl $crate::ToValue for $ty {
            fn to_value(&self) -> $crate::Value {
                $crate::ToValue::to_value(&(*self as $repr))
            }
        }

        impl $crate::FromValue for $ty {
            fn from_value(value: &$crate::Value) -> Option<Self> {
                <$repr as $crate::FromValue>::from_value(value)
                    .and_then(|raw| <$ty as ::std::convert::TryFrom<$repr>>::try_from(raw).ok())
            }
        }

        impl $crate::KeyComponent for $ty {
            const KIND: $crate::KeyKind = $crate::KeyKind::Enum;

            fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), $crate::KeyError> {
                $crate::KeyComponent::encode_into(&(*self as $repr), out)
            }

            fn decode_from(input: &mut &[u8]) -> Result<Self, $crate::KeyError> {
                let raw = <$repr as $crate::KeyComponent>::decode_from(input)?;
                <$ty as ::std::convert::TryFrom<$repr>>::try_from(raw).map_err(|_| {
                    $crate::KeyError::InvalidValue {
                        kind: $crate::KeyKind::Enum.name(),
                        reason: format!("{} is not a variant of {}", raw, stringify!($ty)),
                    }
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn round_trip<T: KeyComponent>(value: T) -> T {
        let mut out = Vec::new();
        value.encode_into(&mut out).unwrap();
        let mut input = out.as_slice();
        let back = T::decode_from(&mut input).unwrap();
        assert!(input.is_empty(), "{} left {} bytes", T::KIND, input.len());
        back
    }

    #[test]
    fn integers_use_little_endian_natural_width() {
        let mut out = Vec::new();
        0x0102_0304i32.encode_into(&mut out).unwrap();
        assert_eq!(out, [0x04, 0x03, 0x02, 0x01]);

        out.clear();
        7u16.encode_into(&mut out).unwrap();
        assert_eq!(out, [7, 0]);
    }

    #[test]
    fn string_length_byte_carries_null_flag() {
        let mut out = Vec::new();
        "ab".to_string().encode_into(&mut out).unwrap();
        assert_eq!(out, [0b101, b'a', b'b']);

        out.clear();
        None::<String>.encode_into(&mut out).unwrap();
        assert_eq!(out, [0]);
    }

    #[test]
    fn string_over_limit_is_rejected() {
        let mut out = Vec::new();
        let ok = "x".repeat(MAX_STRING_BYTES);
        ok.encode_into(&mut out).unwrap();
        assert_eq!(round_trip(ok.clone()), ok);

        let err = "x".repeat(MAX_STRING_BYTES + 1).encode_into(&mut out).unwrap_err();
        assert_eq!(err, KeyError::StringTooLong { len: MAX_STRING_BYTES + 1, max: MAX_STRING_BYTES });
    }

    #[test]
    fn null_marker_does_not_decode_as_plain_string() {
        let mut input: &[u8] = &[0];
        assert!(matches!(String::decode_from(&mut input), Err(KeyError::InvalidValue { .. })));
    }

    #[test]
    fn nullable_values_prefix_a_flag_byte() {
        let mut out = Vec::new();
        Some(5u8).encode_into(&mut out).unwrap();
        assert_eq!(out, [1, 5]);
        assert_eq!(round_trip(Some(-3i64)), Some(-3));
        assert_eq!(round_trip(None::<i64>), None);
    }

    #[test]
    fn fixed_sixteen_byte_kinds() {
        let mut out = Vec::new();
        Decimal::new(-12345, 3).encode_into(&mut out).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(round_trip(Decimal::new(-12345, 3)), Decimal::new(-12345, 3));

        let id = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
        assert_eq!(round_trip(id), id);
    }

    #[test]
    fn dates_round_trip_at_tick_precision() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_nano_opt(13, 45, 10, 123_456_700)
            .unwrap();
        assert_eq!(round_trip(dt), dt);

        let mut out = Vec::new();
        NaiveDate::from_ymd_opt(1, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap().encode_into(&mut out).unwrap();
        assert_eq!(out, 0i64.to_le_bytes());

        let offset = FixedOffset::east_opt(-5 * 3600).unwrap();
        let dto = offset.from_local_datetime(&dt).single().unwrap();
        out.clear();
        dto.encode_into(&mut out).unwrap();
        assert_eq!(out.len(), 16);
        let back = round_trip(dto);
        assert_eq!(back, dto);
        assert_eq!(back.offset(), &offset);

        let span = TimeDelta::seconds(-90) + TimeDelta::nanoseconds(-500);
        assert_eq!(round_trip(span), span);
    }

    #[test]
    fn truncated_input_names_the_kind() {
        let mut input: &[u8] = &[1, 2];
        assert_eq!(i32::decode_from(&mut input), Err(KeyError::Truncated { kind: "i32" }));
    }

    #[test]
    fn invalid_bool_and_char_bytes_are_rejected() {
        let mut input: &[u8] = &[2];
        assert!(bool::decode_from(&mut input).is_err());
        let surrogate = 0xD800u32.to_le_bytes();
        let mut input: &[u8] = &surrogate;
        assert!(char::decode_from(&mut input).is_err());
    }
}
