/// Thousands separator used by the vi-VN locale.
pub const GROUP_SEPARATOR: char = '.';
/// Decimal separator used by the vi-VN locale.
pub const DECIMAL_SEPARATOR: char = ',';
/// vi-VN number formatting keeps at most three fraction digits.
const MAX_FRACTION_DIGITS: usize = 3;

/// Formats a count or an amount for display on a receipt.
///
/// Missing and non-finite inputs render as `"0"`, never as an empty string.
pub fn format_amount(value: Option<f64>) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return "0".to_string();
    };

    let fixed = format!("{:.*}", MAX_FRACTION_DIGITS, v.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut out = String::with_capacity(fixed.len() + fixed.len() / 3 + 1);
    let is_zero = int_part.chars().all(|c| c == '0') && frac_part.is_empty();
    if v.is_sign_negative() && !is_zero {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if !frac_part.is_empty() {
        out.push(DECIMAL_SEPARATOR);
        out.push_str(frac_part);
    }
    out
}

/// Plain textual form of a number: integers without a decimal point, everything else in
/// shortest round-trip form. Used for cell text.
pub fn number_text(value: f64) -> String {
    if !value.is_finite() || value == 0.0 {
        return "0".to_string();
    }
    format!("{}", value)
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(GROUP_SEPARATOR);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_missing_render_as_zero() {
        assert_eq!(format_amount(Some(0.0)), "0");
        assert_eq!(format_amount(None), "0");
        assert_eq!(format_amount(Some(f64::NAN)), "0");
        assert_eq!(format_amount(Some(-0.0)), "0");
    }

    #[test]
    fn groups_thousands_with_dots() {
        assert_eq!(format_amount(Some(1234567.0)), "1.234.567");
        assert_eq!(format_amount(Some(150000.0)), "150.000");
        assert_eq!(format_amount(Some(999.0)), "999");
        assert_eq!(format_amount(Some(1000.0)), "1.000");
        assert_eq!(format_amount(Some(-1200000.0)), "-1.200.000");
    }

    #[test]
    fn keeps_up_to_three_fraction_digits() {
        assert_eq!(format_amount(Some(1234.5)), "1.234,5");
        assert_eq!(format_amount(Some(0.125)), "0,125");
        assert_eq!(format_amount(Some(2.0004)), "2");
    }

    #[test]
    fn number_text_drops_trailing_point() {
        assert_eq!(number_text(8.0), "8");
        assert_eq!(number_text(1.5), "1.5");
        assert_eq!(number_text(-0.0), "0");
    }
}
