//! Orchestrator resource quantities (`500m`, `1Gi`, `2`, `1e3`)

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity string into base units. `None` if malformed.
pub fn parse(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| n * factor);
        }
    }

    // Exponent form must be checked before the `E` (exa) suffix
    if let Some(pos) = s.find(['e', 'E']) {
        let (mantissa, exponent) = (&s[..pos], &s[pos + 1..]);
        if !exponent.is_empty() {
            if let (Some(m), Ok(e)) = (parse_number(mantissa), exponent.parse::<i32>()) {
                return Some(m * 10f64.powi(e));
            }
        }
    }

    for (suffix, factor) in DECIMAL_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| n * factor);
        }
    }

    parse_number(s)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-')) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Value in thousandths of the base unit, rounded up
pub fn milli_value(q: &Quantity) -> Option<i64> {
    parse(&q.0).map(|v| (v * 1000.0).ceil() as i64)
}

/// Value in base units, rounded up
pub fn value(q: &Quantity) -> Option<i64> {
    parse(&q.0).map(|v| v.ceil() as i64)
}

pub fn from_count(n: i64) -> Quantity {
    Quantity(n.to_string())
}

pub fn from_mebibytes(mb: i64) -> Quantity {
    Quantity(format!("{mb}Mi"))
}
