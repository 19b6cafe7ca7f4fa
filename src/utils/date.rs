//! Date formatting helpers for log output.

use std::fmt;
use chrono::{DateTime, Utc};
use chrono::format::{Item, Numeric, Pad};


//------------ Constructing ISO Dates ----------------------------------------

const UTC_ISO_DATE: &[Item<'static>] = &[
    Item::Numeric(Numeric::Year, Pad::Zero),
    Item::Literal("-"),
    Item::Numeric(Numeric::Month, Pad::Zero),
    Item::Literal("-"),
    Item::Numeric(Numeric::Day, Pad::Zero),
    Item::Literal("T"),
    Item::Numeric(Numeric::Hour, Pad::Zero),
    Item::Literal(":"),
    Item::Numeric(Numeric::Minute, Pad::Zero),
    Item::Literal(":"),
    Item::Numeric(Numeric::Second, Pad::Zero),
    Item::Literal("Z"),
];

/// Formats a UTC timestamp in `YYYY-MM-DDTHH:MM:SSZ` form for log lines.
pub fn format_iso_date(date: DateTime<Utc>) -> impl fmt::Display + '_ {
    date.format_with_items(UTC_ISO_DATE.iter())
}


#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_iso_date() {
        let date = Utc.with_ymd_and_hms(2021, 3, 5, 8, 49, 37).unwrap();
        assert_eq!(format_iso_date(date).to_string(), "2021-03-05T08:49:37Z");
    }
}
