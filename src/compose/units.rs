//! Durations, byte sizes and CPU counts as written in compose files

use crate::error::{Result, StackError};
use regex::Regex;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Parse a Go-style duration ("1m30s", "500ms", "1.5h") into nanoseconds
pub fn parse_duration(s: &str) -> Result<i64> {
    let invalid = || StackError::InvalidConfig(format!("invalid duration: {:?}", s));
    let s = s.trim();
    if s == "0" {
        return Ok(0);
    }

    let re = Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h)")
        .map_err(|e| StackError::InvalidConfig(e.to_string()))?;

    let mut total = 0f64;
    let mut consumed = 0;
    for caps in re.captures_iter(s) {
        let whole = caps.get(0).ok_or_else(invalid)?;
        if whole.start() != consumed {
            return Err(invalid());
        }
        consumed = whole.end();

        let value: f64 = caps[1].parse().map_err(|_| invalid())?;
        let unit = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => NANOS_PER_SECOND,
            "m" => 60.0 * NANOS_PER_SECOND,
            _ => 3600.0 * NANOS_PER_SECOND,
        };
        total += value * unit;
    }

    if consumed == 0 || consumed != s.len() {
        return Err(invalid());
    }
    Ok(total.round() as i64)
}

/// Parse an optional duration; unset means zero
pub fn opt_duration(s: Option<&str>) -> Result<Option<i64>> {
    s.map(parse_duration).transpose()
}

/// Parse a byte size ("512m", "1.5GB", "1024")
pub fn parse_bytes(s: &str) -> Result<i64> {
    let invalid = || StackError::InvalidConfig(format!("invalid size: {:?}", s));
    let re = Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([kmgtp]?)(?:i?b)?\s*$")
        .map_err(|e| StackError::InvalidConfig(e.to_string()))?;
    let caps = re.captures(s).ok_or_else(invalid)?;

    let value: f64 = caps[1].parse().map_err(|_| invalid())?;
    let shift = match caps[2].to_ascii_lowercase().as_str() {
        "" => 0,
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        _ => 50,
    };
    Ok((value * (1u64 << shift) as f64) as i64)
}

/// Parse a fractional CPU count into nano CPUs
pub fn parse_nano_cpus(s: &str) -> Result<i64> {
    let cpus: f64 = s
        .trim()
        .parse()
        .map_err(|_| StackError::InvalidConfig(format!("invalid cpus value: {:?}", s)))?;
    if cpus < 0.0 {
        return Err(StackError::InvalidConfig(format!("invalid cpus value: {:?}", s)));
    }
    Ok((cpus * NANOS_PER_SECOND).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0").unwrap(), 0);
        assert_eq!(parse_duration("10s").unwrap(), 10_000_000_000);
        assert_eq!(parse_duration("1m30s").unwrap(), 90_000_000_000);
        assert_eq!(parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(parse_duration("1.5h").unwrap(), 5_400_000_000_000);
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10 s").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_bytes("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_bytes("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_bytes("1.5k").unwrap(), 1536);
        assert!(parse_bytes("lots").is_err());
    }

    #[test]
    fn test_parse_nano_cpus() {
        assert_eq!(parse_nano_cpus("0.5").unwrap(), 500_000_000);
        assert_eq!(parse_nano_cpus("2").unwrap(), 2_000_000_000);
        assert!(parse_nano_cpus("-1").is_err());
    }
}
