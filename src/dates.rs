use chrono::{DateTime, Duration, SecondsFormat, Utc};
use chrono_tz::Tz;

/// Zone every normalized range is expressed in.
pub const RANGE_TZ: Tz = chrono_tz::America::Los_Angeles;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Set when any input was replaced by a derived default.
    pub adjusted: bool,
}

impl DateRange {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }
}

/// Clamps a requested (start, end) range so it never reaches past "now".
///
/// Rules, applied in order:
/// 1. `end` missing or after now: `end = now - 1 minute`
/// 2. `start` missing or not before `end`: `start = end - 1 day`
/// 3. `start` not before now: `start = now - 1 day`
///
/// Nothing here fails. Substitutions are reported as warnings and through
/// [`DateRange::adjusted`].
#[derive(Debug, Clone, Copy)]
pub struct DateNormalizer {
    tz: Tz,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self { tz: RANGE_TZ }
    }
}

impl DateNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> DateRange {
        self.normalize_at(Utc::now(), start, end)
    }

    pub fn normalize_at(
        &self,
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> DateRange {
        let now = now.with_timezone(&self.tz);
        let mut start = start.map(|s| s.with_timezone(&self.tz));
        let mut end = end.map(|e| e.with_timezone(&self.tz));
        let mut adjusted = false;

        tracing::debug!(now = %show(&now), "normalizing date range");

        let e = match end.take() {
            Some(e) if e <= now => e,
            original => {
                let e = now - Duration::minutes(1);
                tracing::warn!(
                    requested = ?original.map(|o| show(&o)),
                    substituted = %show(&e),
                    "end adjusted"
                );
                adjusted = true;
                e
            }
        };

        let mut s = match start.take() {
            Some(s) if s < e => s,
            original => {
                let s = e - Duration::days(1);
                tracing::warn!(
                    requested = ?original.map(|o| show(&o)),
                    substituted = %show(&s),
                    "start adjusted"
                );
                adjusted = true;
                s
            }
        };

        if s >= now {
            let replaced = s;
            s = now - Duration::days(1);
            tracing::warn!(requested = %show(&replaced), substituted = %show(&s), "start moved before now");
            adjusted = true;
        }

        DateRange { start: s, end: e, adjusted }
    }
}

fn show(dt: &DateTime<Tz>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// `2024-05-24T16:59:00Z`, whole seconds, always UTC.
pub fn utc_seconds_z(dt: &DateTime<Tz>) -> String {
    dt.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn utc_rfc3339(dt: &DateTime<Tz>) -> String {
    dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)
}
