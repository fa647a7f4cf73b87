// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count with binary units, e.g. `1536` -> `"1.5 KiB"`.
///
/// At most two fractional digits are kept and trailing zeros are dropped.
/// Values beyond the TiB range stay in TiB.
pub fn size_to_human(bytes: u64) -> String {
    let mut val = bytes as f64;
    let mut unit = 0;
    while val >= 1024.0 && unit < UNITS.len() - 1 {
        val /= 1024.0;
        unit += 1;
    }

    let fixed = format!("{:.2}", val);
    // only strip zeros from the fraction
    let trimmed = match fixed.contains('.') {
        true => fixed.trim_end_matches('0').trim_end_matches('.'),
        false => fixed.as_str(),
    };
    format!("{} {}", trimmed, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_units() {
        assert_eq!(size_to_human(0), "0 B");
        assert_eq!(size_to_human(1), "1 B");
        assert_eq!(size_to_human(1000), "1000 B");
        assert_eq!(size_to_human(1023), "1023 B");
        assert_eq!(size_to_human(1024), "1 KiB");
        assert_eq!(size_to_human(1536), "1.5 KiB");
        assert_eq!(size_to_human(10 * 1024 + 512), "10.5 KiB");
        assert_eq!(size_to_human(1024 * 1024), "1 MiB");
        assert_eq!(size_to_human(3 * 1024 * 1024 * 1024), "3 GiB");
        assert_eq!(size_to_human(1 << 40), "1 TiB");
    }

    #[test]
    fn test_size_rounding() {
        // 1.333.. KiB
        assert_eq!(size_to_human(1365), "1.33 KiB");
        // 1.999.. rounds up to two digits
        assert_eq!(size_to_human(2047), "2 KiB");
        assert_eq!(size_to_human(100 * 1024), "100 KiB");
    }

    #[test]
    fn test_size_clamp() {
        assert_eq!(size_to_human(2048 << 40), "2048 TiB");
        assert!(size_to_human(u64::MAX).ends_with(" TiB"));
    }

    #[test]
    fn test_size_monotonic() {
        let parse = |s: &str| -> (f64, usize) {
            let (num, unit) = s.split_once(' ').unwrap();
            let idx = UNITS.iter().position(|u| *u == unit).unwrap();
            (num.parse::<f64>().unwrap(), idx)
        };
        let mut last = (0f64, 0usize);
        for bytes in (0u64..(8 << 20)).step_by(4093) {
            let (num, unit) = parse(&size_to_human(bytes));
            if unit == last.1 {
                assert!(num >= last.0, "{} not monotonic", bytes);
            } else {
                assert!(unit > last.1);
            }
            last = (num, unit);
        }
    }
}
