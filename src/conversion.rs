use crate::constants::Degree;

/// Split a sexagesimal field into its three numeric components.
///
/// Accepts whitespace or `:` separators (`"12 34 56.7"`, `"12:34:56.7"`).
fn split_sexagesimal(field: &str) -> Option<(f64, f64, f64)> {
    let parts: Vec<&str> = field
        .split(|c: char| c.is_whitespace() || c == ':')
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() != 3 {
        return None;
    }

    let a: f64 = parts[0].trim_start_matches(['-', '+']).parse().ok()?;
    let b: f64 = parts[1].parse().ok()?;
    let c: f64 = parts[2].parse().ok()?;
    if !(0.0..60.0).contains(&b) || !(0.0..60.0).contains(&c) {
        return None;
    }
    Some((a, b, c))
}

/// Parse a right ascension given in hours (`HH MM SS.SS`) to degrees.
///
/// Arguments
/// ---------
/// * `ra`: the sexagesimal right ascension, in hours
///
/// Returns
/// -------
/// * The right ascension in degrees, or `None` if the field is malformed.
pub(crate) fn parse_ra_hours(ra: &str) -> Option<Degree> {
    let (h, m, s) = split_sexagesimal(ra.trim())?;
    Some((h + m / 60.0 + s / 3600.0) * 15.0)
}

/// Parse a declination given as `±DD MM SS.SS` to degrees.
///
/// The sign is read from the first field so that `-00 30 00` stays negative.
pub(crate) fn parse_dec_degrees(dec: &str) -> Option<Degree> {
    let dec = dec.trim();
    let sign = if dec.starts_with('-') { -1.0 } else { 1.0 };
    let (d, m, s) = split_sexagesimal(dec)?;
    Some(sign * (d + m / 60.0 + s / 3600.0))
}

#[cfg(test)]
mod conversion_test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_parse_ra_hours() {
        assert_relative_eq!(parse_ra_hours("00 40 30.00").unwrap(), 10.125, epsilon = 1e-12);
        assert_relative_eq!(
            parse_ra_hours("12:30:49.42").unwrap(),
            187.70591666666667,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            parse_ra_hours(" 23 59 59.9 ").unwrap(),
            359.99958333333336,
            epsilon = 1e-9
        );
        assert_eq!(parse_ra_hours("12 30"), None);
        assert_eq!(parse_ra_hours("12 75 00"), None);
        assert_eq!(parse_ra_hours("aa bb cc"), None);
    }

    #[test]
    fn test_parse_dec_degrees() {
        assert_relative_eq!(parse_dec_degrees("+20 00 36.0").unwrap(), 20.01, epsilon = 1e-12);
        assert_relative_eq!(
            parse_dec_degrees("-00 30 00").unwrap(),
            -0.5,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            parse_dec_degrees("-12:23:28.0").unwrap(),
            -12.391111111111112,
            epsilon = 1e-9
        );
        assert_eq!(parse_dec_degrees("+12 23"), None);
        assert_eq!(parse_dec_degrees("+12 23 61.0"), None);
    }
}
