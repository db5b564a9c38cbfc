use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Source of the current instant and of the business calendar day.
///
/// Every date-dependent rule (daily deal seed, double-date and holiday
/// events, "claimed today" checks) reads the day from here, never from the
/// ambient system time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the business timezone the calendar day is evaluated in.
    fn offset(&self) -> FixedOffset;

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.offset()).date_naive()
    }
}

/// Wall clock evaluated in a fixed business timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Builds the clock from an offset in minutes east of UTC, falling back
    /// to UTC when the value is out of range.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// A clock pinned to one instant. Used by tests and replay tooling.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { now, offset }
    }

    /// Pins the clock at noon, business time, on `day`.
    pub fn at_noon(day: NaiveDate, offset: FixedOffset) -> Self {
        let now = day
            .and_hms_opt(12, 0, 0)
            .and_then(|local| offset.from_local_datetime(&local).single())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_default();
        Self { now, offset }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}
