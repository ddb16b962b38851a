// Room availability for the booking calendar.
// There is no reservation backend behind the site yet; rooms are booked through an
// external engine. `ChecksumAvailability` is a stand-in that gives each room a stable,
// plausible-looking pattern of blocked nights until a real provider is wired in.

use chrono::{Datelike, Duration, NaiveDate};

// Number of days shown in the booking calendar, starting today
pub const DEFAULT_WINDOW_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub available: bool,
}

pub trait AvailabilityProvider: Send + Sync {
    fn is_available(&self, room_id: &str, date: NaiveDate) -> bool;

    // Blocked dates in [start, start + days)
    fn unavailable_dates(&self, room_id: &str, start: NaiveDate, days: u32) -> Vec<NaiveDate> {
        dates_from(start, days)
            .filter(|date| !self.is_available(room_id, *date))
            .collect()
    }

    // Calendar of `days` days from `start`; dates before `today` are never bookable
    fn calendar(
        &self,
        room_id: &str,
        start: NaiveDate,
        days: u32,
        today: NaiveDate,
    ) -> Vec<DayAvailability> {
        dates_from(start, days)
            .map(|date| DayAvailability {
                date,
                available: date >= today && self.is_available(room_id, date),
            })
            .collect()
    }
}

fn dates_from(start: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..days as i64).map(move |offset| start + Duration::days(offset))
}

/// Placeholder availability, not backed by any booking data.
///
/// A night is blocked when the sum of the character codes of its `YYYY-MM-DD`
/// form plus the length of the room id, taken modulo 10, is 3 or less. That
/// blocks roughly a third of all nights, and the same room and date always give
/// the same answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumAvailability;

impl ChecksumAvailability {
    pub fn new() -> Self {
        Self
    }

    fn checksum(room_id: &str, date: NaiveDate) -> u32 {
        let iso = format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day());
        iso.bytes().map(u32::from).sum::<u32>() + room_id.chars().count() as u32
    }
}

impl AvailabilityProvider for ChecksumAvailability {
    fn is_available(&self, room_id: &str, date: NaiveDate) -> bool {
        Self::checksum(room_id, date) % 10 > 3
    }
}
