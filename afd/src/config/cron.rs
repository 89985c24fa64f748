//! Parser for the five-field time specification used in DIR_CONFIG
//! `time` options: `minute hour day-of-month month day-of-week`, each
//! field `*`, `*/step`, a value, a range `a-b`, or a comma list of
//! those. Day-of-week follows crontab: 0 and 7 both mean Sunday.

use crate::status::fra::TimeEntry;

use super::file::ConfigError;

fn field_error(line: usize, reason: String) -> ConfigError {
    ConfigError::MalformedDirConfig { line, reason }
}

/// Parses one field into a bitmask where bit `v - min` is set for each
/// matching value `v`.
fn parse_field(spec: &str, min: u32, max: u32, line: usize) -> Result<u64, ConfigError> {
    let mut mask = 0u64;
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| field_error(line, format!("bad step in '{part}'")))?;
                if step == 0 {
                    return Err(field_error(line, format!("zero step in '{part}'")));
                }
                (r, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = a
                .parse()
                .map_err(|_| field_error(line, format!("bad range start in '{part}'")))?;
            let hi = b
                .parse()
                .map_err(|_| field_error(line, format!("bad range end in '{part}'")))?;
            (lo, hi)
        } else {
            let v: u32 = range
                .parse()
                .map_err(|_| field_error(line, format!("bad value '{part}'")))?;
            (v, v)
        };
        if lo < min || hi > max || lo > hi {
            return Err(field_error(line, format!("'{part}' outside {min}..{max}")));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << (v - min);
            v += step;
        }
    }
    Ok(mask)
}

/// Parses one `time` option value into a [`TimeEntry`].
pub fn parse_time_entry(spec: &str, line: usize) -> Result<TimeEntry, ConfigError> {
    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(field_error(
            line,
            format!("expected 5 time fields, got {}", fields.len()),
        ));
    }
    // Fold crontab's "7 = Sunday" alias onto bit 0.
    let dow_raw = parse_field(fields[4], 0, 7, line)? as u8;
    let day_of_week = (dow_raw & 0x7f) | (dow_raw >> 7);
    Ok(TimeEntry {
        minute: parse_field(fields[0], 0, 59, line)?,
        hour: parse_field(fields[1], 0, 23, line)? as u32,
        day_of_month: parse_field(fields[2], 1, 31, line)? as u32,
        month: parse_field(fields[3], 1, 12, line)? as u16,
        day_of_week,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_every_minute() {
        let e = parse_time_entry("* * * * *", 1).unwrap();
        // 1970-01-01 00:00 was a Thursday.
        assert!(e.matches(0));
        assert!(e.matches(86_400 * 37 + 60 * 61));
    }

    #[test]
    fn step_and_list_fields() {
        let e = parse_time_entry("*/15 6,18 1 * *", 1).unwrap();
        assert_eq!(e.minute, 1 | 1 << 15 | 1 << 30 | 1 << 45);
        assert_eq!(e.hour, 1 << 6 | 1 << 18);
        // Day-of-month bit 0 is the 1st.
        assert_eq!(e.day_of_month, 1);
    }

    #[test]
    fn range_with_step() {
        let e = parse_time_entry("10-20/5 * * * *", 1).unwrap();
        assert_eq!(e.minute, 1 << 10 | 1 << 15 | 1 << 20);
    }

    #[test]
    fn sunday_aliases_fold_together() {
        let zero = parse_time_entry("* * * * 0", 1).unwrap();
        let seven = parse_time_entry("* * * * 7", 1).unwrap();
        assert_eq!(zero.day_of_week, 1);
        assert_eq!(zero.day_of_week, seven.day_of_week);
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        assert!(parse_time_entry("60 * * * *", 3).is_err());
        assert!(parse_time_entry("* 24 * * *", 3).is_err());
        assert!(parse_time_entry("* * 0 * *", 3).is_err());
        assert!(parse_time_entry("* * * 13 *", 3).is_err());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(parse_time_entry("* * * *", 1).is_err());
    }

    #[test]
    fn parsed_schedule_drives_next_after() {
        // 06:00 and 18:00 daily.
        let e = parse_time_entry("0 6,18 * * *", 1).unwrap();
        let midnight = 1_700_006_400; // 2023-11-15 00:00:00 UTC
        assert_eq!(e.next_after(midnight), Some(midnight + 6 * 3600));
        assert_eq!(
            e.next_after(midnight + 6 * 3600),
            Some(midnight + 18 * 3600)
        );
    }
}
