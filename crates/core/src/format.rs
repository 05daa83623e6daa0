/// Formats seconds as `M:SS`, or `H:MM:SS` once past an hour.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::format_duration;

    #[test]
    fn formats_minutes_and_hours() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(61.9), "1:01");
        assert_eq!(format_duration(3_725.0), "1:02:05");
        assert_eq!(format_duration(f64::NAN), "0:00");
    }
}
