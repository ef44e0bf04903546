//! Decimal amounts as the storefront sends them, e.g. `"45.00"`.

/// Parses a decimal amount into cents. At most two fraction digits count.
pub fn parse_cents(amount: &str) -> Option<i64> {
    let amount = amount.trim();
    let (negative, magnitude) = match amount.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, amount),
    };
    let (whole, fraction) = magnitude.split_once('.').unwrap_or((magnitude, "0"));
    if !is_digits(whole) || !is_digits(fraction) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let fraction: i64 = format!("{fraction:0<2}").get(..2)?.parse().ok()?;
    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

/// Formats cents as a decimal amount with two fraction digits.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let magnitude = cents.unsigned_abs();
    format!("{sign}{}.{:02}", magnitude / 100, magnitude % 100)
}

fn is_digits(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storefront_amounts() {
        assert_eq!(parse_cents("45.00"), Some(4500));
        assert_eq!(parse_cents("1.5"), Some(150));
        assert_eq!(parse_cents("12"), Some(1200));
        assert_eq!(parse_cents(" 0.05 "), Some(5));
        assert_eq!(parse_cents("abc"), None);
        assert_eq!(parse_cents("1.-5"), None);
        assert_eq!(parse_cents(""), None);
    }

    #[test]
    fn negative_amounts_keep_their_sign() {
        assert_eq!(parse_cents("-1.50"), Some(-150));
        assert_eq!(parse_cents("-0.05"), Some(-5));
        assert_eq!(format_cents(-150), "-1.50");
        assert_eq!(format_cents(-5), "-0.05");
    }

    #[test]
    fn formats_two_fraction_digits() {
        assert_eq!(format_cents(12345), "123.45");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(0), "0.00");
    }
}
