use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use thiserror::Error;
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::protocol::STATISTICS_PAYLOAD_LEN;

const COUNT_MASK: u16 = 0x3FFF;
const STATE_MASK: u16 = 0x0003;
const STATE_SHIFT: u32 = 14;
const BASE_YEAR: u16 = 2000;

/// Errors returned when decoding a statistics payload.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum DecodeError {
    #[error("statistics payload must be {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
}

/// Device-local timestamp carried in the statistics payload.
///
/// Fields are passed through from the firmware without range validation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct StatisticsTimestamp {
    /// Full year, `2000 + offset`.
    pub year: u16,
    /// One-based month.
    pub month: u16,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Firmware-defined weekday, nominally `0..=6`.
    pub weekday: u8,
}

impl StatisticsTimestamp {
    /// Converts to a calendar date-time, or `None` when any field is out of range.
    #[must_use]
    pub fn to_datetime(&self) -> Option<PrimitiveDateTime> {
        let month = Month::try_from(u8::try_from(self.month).ok()?).ok()?;
        let date = Date::from_calendar_date(i32::from(self.year), month, self.day).ok()?;
        let time = Time::from_hms(self.hour, self.minute, self.second).ok()?;
        Some(PrimitiveDateTime::new(date, time))
    }
}

impl Display for StatisticsTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Decoded statistics record.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct StatisticsRecord {
    /// Event counter, `0..=16383`.
    pub count: u16,
    /// Operational state, `0..=3`.
    pub state: u8,
    pub timestamp: StatisticsTimestamp,
}

/// Codec for the statistics characteristic value.
pub struct StatisticsHandler;

impl StatisticsHandler {
    /// Decodes a 9-byte statistics payload.
    ///
    /// ```
    /// use spraystat::StatisticsHandler;
    ///
    /// let record = StatisticsHandler::decode(&[0x00, 0x05, 0x1E, 0x0A, 0x0D, 0x14, 0x03, 0x06, 0x19])?;
    /// assert_eq!(5, record.count);
    /// assert_eq!(7, record.timestamp.month);
    /// assert_eq!(2025, record.timestamp.year);
    /// # Ok::<(), spraystat::DecodeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::BadLength`] when the payload is not exactly 9 bytes.
    pub fn decode(payload: &[u8]) -> Result<StatisticsRecord, DecodeError> {
        let bytes: [u8; STATISTICS_PAYLOAD_LEN] =
            payload.try_into().map_err(|_error| DecodeError::BadLength {
                expected: STATISTICS_PAYLOAD_LEN,
                actual: payload.len(),
            })?;
        let [meta_high, meta_low, second, minute, hour, day, weekday, month, year_offset] = bytes;
        let (count, state) = Self::unpack_meta(u16::from_be_bytes([meta_high, meta_low]));

        Ok(StatisticsRecord {
            count,
            state,
            timestamp: StatisticsTimestamp {
                year: BASE_YEAR + u16::from(year_offset),
                month: u16::from(month) + 1,
                day,
                hour,
                minute,
                second,
                weekday,
            },
        })
    }

    /// Packs a count and state into the 16-bit meta field, masking out-of-range bits.
    #[must_use]
    pub fn pack_meta(count: u16, state: u8) -> u16 {
        ((u16::from(state) & STATE_MASK) << STATE_SHIFT) | (count & COUNT_MASK)
    }

    fn unpack_meta(meta: u16) -> (u16, u8) {
        let state = (meta >> STATE_SHIFT) & STATE_MASK;
        (meta & COUNT_MASK, state as u8)
    }
}
