//! `ganymede.v2` messages.
//!
//! Scalar fields holding their default value are omitted on encode, as
//! proto3 does. Unknown fields are skipped on decode.

use crate::proto::*;
use grpc::{DecodeError, Message};
use std::time::{SystemTime, UNIX_EPOCH};

fn decode_u32(wire_type: u8, buf: &mut &[u8]) -> Result<u32, DecodeError> {
    expect_wire_type(wire_type, WIRE_TYPE_VARINT)?;
    Ok(decode_varint(buf)? as u32)
}

fn decode_i32(wire_type: u8, buf: &mut &[u8]) -> Result<i32, DecodeError> {
    expect_wire_type(wire_type, WIRE_TYPE_VARINT)?;
    Ok(decode_varint(buf)? as i64 as i32)
}

fn decode_i64(wire_type: u8, buf: &mut &[u8]) -> Result<i64, DecodeError> {
    expect_wire_type(wire_type, WIRE_TYPE_VARINT)?;
    Ok(decode_varint(buf)? as i64)
}

fn decode_bool(wire_type: u8, buf: &mut &[u8]) -> Result<bool, DecodeError> {
    expect_wire_type(wire_type, WIRE_TYPE_VARINT)?;
    Ok(decode_varint(buf)? != 0)
}

fn decode_len<'a>(wire_type: u8, buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    expect_wire_type(wire_type, WIRE_TYPE_LEN)?;
    decode_length_delimited(buf)
}

fn string_len(field_number: u32, s: &str) -> usize {
    if s.is_empty() {
        0
    } else {
        bytes_len(field_number, s.len())
    }
}

fn put_string(field_number: u32, s: &str, buf: &mut Vec<u8>) {
    if !s.is_empty() {
        encode_string(field_number, s, buf);
    }
}

fn int_len(field_number: u32, value: i64) -> usize {
    if value == 0 {
        0
    } else {
        int64_len(field_number, value)
    }
}

fn put_int(field_number: u32, value: i64, buf: &mut Vec<u8>) {
    if value != 0 {
        encode_int64(field_number, value, buf);
    }
}

fn optional_len<M: Message>(field_number: u32, message: &Option<M>) -> usize {
    message.as_ref().map_or(0, |m| message_len(field_number, m))
}

fn put_optional<M: Message>(field_number: u32, message: &Option<M>, buf: &mut Vec<u8>) {
    if let Some(m) = message {
        encode_message(field_number, m, buf);
    }
}

/// `google.protobuf.Duration`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Duration {
    pub seconds: i64,
    pub nanos: i32,
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self {
            seconds: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            nanos: d.subsec_nanos() as i32,
        }
    }
}

impl Duration {
    /// Negative durations clamp to zero.
    pub fn to_std(self) -> std::time::Duration {
        let seconds = u64::try_from(self.seconds).unwrap_or(0);
        let nanos = u32::try_from(self.nanos).unwrap_or(0).min(999_999_999);
        std::time::Duration::new(seconds, nanos)
    }
}

macro_rules! seconds_nanos_message {
    ($ty:ty) => {
        impl Message for $ty {
            fn encoded_len(&self) -> usize {
                int_len(1, self.seconds) + int_len(2, self.nanos as i64)
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                put_int(1, self.seconds, buf);
                put_int(2, self.nanos as i64, buf);
            }

            fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
                let mut out = Self::default();
                while !buf.is_empty() {
                    let (field_number, wire_type) = decode_tag(&mut buf)?;
                    match field_number {
                        1 => out.seconds = decode_i64(wire_type, &mut buf)?,
                        2 => out.nanos = decode_i32(wire_type, &mut buf)?,
                        _ => skip_field(wire_type, &mut buf)?,
                    }
                }
                Ok(out)
            }
        }
    };
}

seconds_nanos_message!(Duration);
seconds_nanos_message!(Timestamp);

/// `google.protobuf.Timestamp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => {
                let d = Duration::from(d);
                Self {
                    seconds: d.seconds,
                    nanos: d.nanos,
                }
            }
            Err(_) => Self::default(),
        }
    }
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }
}

/// Request of `DeviceService/Poll`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollRequest {
    pub device_mac: String,
    pub uptime: Option<Duration>,
}

impl Message for PollRequest {
    fn encoded_len(&self) -> usize {
        string_len(1, &self.device_mac) + optional_len(2, &self.uptime)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_string(1, &self.device_mac, buf);
        put_optional(2, &self.uptime, buf);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => {
                    expect_wire_type(wire_type, WIRE_TYPE_LEN)?;
                    out.device_mac = decode_string(1, &mut buf)?;
                }
                2 => out.uptime = Some(Duration::decode(decode_len(wire_type, &mut buf)?)?),
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

/// Response of `DeviceService/Poll`: who the device is and how it should
/// behave until the next poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollResponse {
    pub device_uid: String,
    pub device_display_name: String,
    pub config_display_name: String,
    /// Local time is UTC plus this many minutes.
    pub timezone_offset_minutes: i32,
    pub light_config: Option<LightConfig>,
    pub poll_period: Option<Duration>,
}

impl Message for PollResponse {
    fn encoded_len(&self) -> usize {
        string_len(1, &self.device_uid)
            + string_len(2, &self.device_display_name)
            + string_len(3, &self.config_display_name)
            + int_len(4, self.timezone_offset_minutes as i64)
            + optional_len(5, &self.light_config)
            + optional_len(6, &self.poll_period)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_string(1, &self.device_uid, buf);
        put_string(2, &self.device_display_name, buf);
        put_string(3, &self.config_display_name, buf);
        put_int(4, self.timezone_offset_minutes as i64, buf);
        put_optional(5, &self.light_config, buf);
        put_optional(6, &self.poll_period, buf);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1..=3 => {
                    expect_wire_type(wire_type, WIRE_TYPE_LEN)?;
                    let value = decode_string(field_number, &mut buf)?;
                    match field_number {
                        1 => out.device_uid = value,
                        2 => out.device_display_name = value,
                        _ => out.config_display_name = value,
                    }
                }
                4 => out.timezone_offset_minutes = decode_i32(wire_type, &mut buf)?,
                5 => {
                    out.light_config = Some(LightConfig::decode(decode_len(wire_type, &mut buf)?)?)
                }
                6 => out.poll_period = Some(Duration::decode(decode_len(wire_type, &mut buf)?)?),
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightConfig {
    pub luminaires: Vec<Luminaire>,
}

impl Message for LightConfig {
    fn encoded_len(&self) -> usize {
        self.luminaires.iter().map(|l| message_len(1, l)).sum()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for luminaire in &self.luminaires {
            encode_message(1, luminaire, buf);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => out
                    .luminaires
                    .push(Luminaire::decode(decode_len(wire_type, &mut buf)?)?),
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

/// One output pin and the times of day it is on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Luminaire {
    pub port: u32,
    /// `false` drives the pin low while the light is on.
    pub active_high: bool,
    pub photo_period: Vec<DailySchedule>,
}

impl Message for Luminaire {
    fn encoded_len(&self) -> usize {
        let mut len = int_len(1, self.port as i64);
        if self.active_high {
            len += uint64_len(2, 1);
        }
        len + self
            .photo_period
            .iter()
            .map(|s| message_len(3, s))
            .sum::<usize>()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_int(1, self.port as i64, buf);
        if self.active_high {
            encode_bool(2, true, buf);
        }
        for schedule in &self.photo_period {
            encode_message(3, schedule, buf);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => out.port = decode_u32(wire_type, &mut buf)?,
                2 => out.active_high = decode_bool(wire_type, &mut buf)?,
                3 => out
                    .photo_period
                    .push(DailySchedule::decode(decode_len(wire_type, &mut buf)?)?),
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

/// On from `start` (inclusive) to `stop` (exclusive), every day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailySchedule {
    pub start: Option<TimeOfDay>,
    pub stop: Option<TimeOfDay>,
}

impl Message for DailySchedule {
    fn encoded_len(&self) -> usize {
        optional_len(1, &self.start) + optional_len(2, &self.stop)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_optional(1, &self.start, buf);
        put_optional(2, &self.stop, buf);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => out.start = Some(TimeOfDay::decode(decode_len(wire_type, &mut buf)?)?),
                2 => out.stop = Some(TimeOfDay::decode(decode_len(wire_type, &mut buf)?)?),
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    pub fn seconds_since_midnight(&self) -> u32 {
        self.hour
            .saturating_mul(3600)
            .saturating_add(self.minute.saturating_mul(60))
            .saturating_add(self.second)
    }
}

impl Message for TimeOfDay {
    fn encoded_len(&self) -> usize {
        int_len(1, self.hour as i64)
            + int_len(2, self.minute as i64)
            + int_len(3, self.second as i64)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_int(1, self.hour as i64, buf);
        put_int(2, self.minute as i64, buf);
        put_int(3, self.second as i64, buf);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => out.hour = decode_u32(wire_type, &mut buf)?,
                2 => out.minute = decode_u32(wire_type, &mut buf)?,
                3 => out.second = decode_u32(wire_type, &mut buf)?,
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

/// Request of `MeasurementsService/PushMeasurements`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushMeasurementsRequest {
    pub measurements: Vec<Measurement>,
}

impl Message for PushMeasurementsRequest {
    fn encoded_len(&self) -> usize {
        self.measurements.iter().map(|m| message_len(1, m)).sum()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for measurement in &self.measurements {
            encode_message(1, measurement, buf);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => out
                    .measurements
                    .push(Measurement::decode(decode_len(wire_type, &mut buf)?)?),
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub timestamp: Option<Timestamp>,
    pub device_id: String,
    pub atmosphere: Option<AtmosphericMeasurements>,
}

impl Message for Measurement {
    fn encoded_len(&self) -> usize {
        optional_len(1, &self.timestamp)
            + string_len(2, &self.device_id)
            + optional_len(3, &self.atmosphere)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_optional(1, &self.timestamp, buf);
        put_string(2, &self.device_id, buf);
        put_optional(3, &self.atmosphere, buf);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => out.timestamp = Some(Timestamp::decode(decode_len(wire_type, &mut buf)?)?),
                2 => {
                    expect_wire_type(wire_type, WIRE_TYPE_LEN)?;
                    out.device_id = decode_string(2, &mut buf)?;
                }
                3 => {
                    out.atmosphere = Some(AtmosphericMeasurements::decode(decode_len(
                        wire_type, &mut buf,
                    )?)?)
                }
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

/// Degrees Celsius and percent relative humidity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AtmosphericMeasurements {
    pub temperature: f32,
    pub humidity: f32,
}

impl Message for AtmosphericMeasurements {
    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.temperature != 0.0 {
            len += float_len(1);
        }
        if self.humidity != 0.0 {
            len += float_len(2);
        }
        len
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        if self.temperature != 0.0 {
            encode_float(1, self.temperature, buf);
        }
        if self.humidity != 0.0 {
            encode_float(2, self.humidity, buf);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 | 2 => {
                    expect_wire_type(wire_type, WIRE_TYPE_FIXED32)?;
                    let value = decode_float(&mut buf)?;
                    if field_number == 1 {
                        out.temperature = value;
                    } else {
                        out.humidity = value;
                    }
                }
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> PollResponse {
        PollResponse {
            device_uid: "xyz".into(),
            device_display_name: "greenhouse".into(),
            config_display_name: "seedlings".into(),
            timezone_offset_minutes: -300,
            light_config: Some(LightConfig {
                luminaires: vec![Luminaire {
                    port: 4,
                    active_high: true,
                    photo_period: vec![DailySchedule {
                        start: Some(TimeOfDay::new(6, 0, 0)),
                        stop: Some(TimeOfDay::new(18, 30, 0)),
                    }],
                }],
            }),
            poll_period: Some(Duration {
                seconds: 900,
                nanos: 0,
            }),
        }
    }

    #[test]
    fn test_poll_request_wire_bytes() {
        let request = PollRequest {
            device_mac: "aa:bb".into(),
            uptime: Some(Duration {
                seconds: 5,
                nanos: 0,
            }),
        };
        let encoded = request.encode_to_vec();
        assert_eq!(
            encoded,
            vec![0x0A, 5, b'a', b'a', b':', b'b', b'b', 0x12, 2, 0x08, 5]
        );
        assert_eq!(request.encoded_len(), encoded.len());
    }

    #[test]
    fn test_poll_response_decodes_nested_config() {
        let response = sample_response();
        let encoded = response.encode_to_vec();
        assert_eq!(response.encoded_len(), encoded.len());

        let decoded = PollResponse::decode(&encoded).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.timezone_offset_minutes, -300);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut encoded = Vec::new();
        encode_string(1, "xyz", &mut encoded);
        encode_uint64(42, 7, &mut encoded);
        encode_string(43, "future", &mut encoded);

        let decoded = PollResponse::decode(&encoded).unwrap();
        assert_eq!(decoded.device_uid, "xyz");
        assert!(decoded.light_config.is_none());
    }

    #[test]
    fn test_wrong_wire_type_is_rejected() {
        let mut encoded = Vec::new();
        encode_uint64(1, 7, &mut encoded);
        assert_eq!(
            PollResponse::decode(&encoded),
            Err(DecodeError::WireType(WIRE_TYPE_VARINT))
        );
    }

    #[test]
    fn test_empty_buffer_decodes_to_defaults() {
        assert_eq!(PollResponse::decode(&[]).unwrap(), PollResponse::default());
        assert!(PollResponse::default().encode_to_vec().is_empty());
    }

    #[test]
    fn test_measurement_encoding() {
        let request = PushMeasurementsRequest {
            measurements: vec![Measurement {
                timestamp: Some(Timestamp {
                    seconds: 1_700_000_000,
                    nanos: 0,
                }),
                device_id: "xyz".into(),
                atmosphere: Some(AtmosphericMeasurements {
                    temperature: 21.5,
                    humidity: 40.0,
                }),
            }],
        };
        let encoded = request.encode_to_vec();
        assert_eq!(request.encoded_len(), encoded.len());
        assert_eq!(PushMeasurementsRequest::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_duration_conversions() {
        let d = Duration::from(std::time::Duration::new(12, 500));
        assert_eq!(d, Duration { seconds: 12, nanos: 500 });
        assert_eq!(d.to_std(), std::time::Duration::new(12, 500));

        let negative = Duration {
            seconds: -1,
            nanos: 0,
        };
        assert_eq!(negative.to_std(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_time_of_day_seconds() {
        assert_eq!(TimeOfDay::new(0, 0, 0).seconds_since_midnight(), 0);
        assert_eq!(TimeOfDay::new(18, 30, 15).seconds_since_midnight(), 66_615);
    }
}
