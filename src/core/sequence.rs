//! Triangular-wave telemetry generator
//!
//! Produces deterministic values for live PIDs (engine speed, vehicle
//! speed) from the number of times the owning rule has been hit.

use super::counters::Counters;

/// Triangular value for invocation `count`
///
/// `factor * |max - (count + max) mod (2 * max)| + base`, period `2 * max`.
pub fn triangle(count: i64, base: i64, max: i64, factor: i64) -> i64 {
    if max <= 0 {
        return base;
    }
    let period = 2 * max;
    factor * (max - (count + max).rem_euclid(period)).abs() + base
}

/// Encode `value` as `width` bytes of space-separated uppercase hex
pub fn hex_bytes(value: i64, width: usize) -> String {
    let digits = width * 2;
    let masked = if width >= 8 {
        value as u64
    } else {
        (value as u64) & ((1u64 << (width * 8)) - 1)
    };
    let text = format!("{:0digits$X}", masked, digits = digits);
    text.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Triangular value for `count`, hex-encoded
pub fn sequence(count: i64, base: i64, max: i64, factor: i64, width: usize) -> String {
    hex_bytes(triangle(count, base, max, factor), width)
}

/// Triangular value driven by the counter named `pid`
pub fn sequence_for(
    counters: &Counters,
    pid: &str,
    base: i64,
    max: i64,
    factor: i64,
    width: usize,
) -> String {
    sequence(counters.count(pid), base, max, factor, width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_wave_period() {
        let values: Vec<i64> = (0..=400).map(|c| triangle(c, 2400, 200, 80)).collect();

        assert_eq!(values[0], 2400);
        assert_eq!(values[200], 2400 + 80 * 200);
        assert_eq!(values[400], values[0]);

        for c in 0..200 {
            assert_eq!(values[c + 1] - values[c], 80, "rising at {}", c);
        }
        for c in 200..400 {
            assert_eq!(values[c] - values[c + 1], 80, "falling at {}", c);
        }
        for c in 0..400 {
            assert_eq!(triangle(c as i64 + 400, 2400, 200, 80), values[c]);
        }
    }

    #[test]
    fn test_sequence_encoding() {
        assert_eq!(sequence(0, 2400, 200, 80, 2), "09 60");
        assert_eq!(sequence(200, 2400, 200, 80, 2), "47 E0");
        assert_eq!(sequence(1, 2400, 200, 80, 2), "09 B0");
        assert_eq!(sequence(3, 0, 60, 2, 1), "06");
    }

    #[test]
    fn test_sequence_for_reads_counter() {
        let mut counters = Counters::new();
        counters.set("ENGINE_RPM", 200);
        assert_eq!(sequence_for(&counters, "ENGINE_RPM", 2400, 200, 80, 2), "47 E0");
        assert_eq!(sequence_for(&counters, "MISSING", 2400, 200, 80, 2), "09 60");
    }

    #[test]
    fn test_zero_max_is_flat() {
        assert_eq!(triangle(17, 5, 0, 3), 5);
    }
}
