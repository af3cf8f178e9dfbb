//! E.164 phone-number helpers.

/// Returns the country-code digits of an E.164 number, for metrics tagging.
///
/// Follows the ITU zone layout: zones 1 and 7 are one-digit codes; the other
/// zones mix two- and three-digit codes, with the three-digit ranges listed
/// per zone below. Returns an empty string when the input is not a plausible
/// `+`-prefixed number.
pub fn country_code(number: &str) -> String {
    let digits = number.strip_prefix('+').unwrap_or(number);
    let mut chars = digits.chars();

    let Some(first) = chars.next() else {
        return String::new();
    };
    if !first.is_ascii_digit() {
        return String::new();
    }

    let len = match first {
        '1' | '7' => 1,
        '2' => match chars.next() {
            // Egypt, South Africa and the 28x range keep two digits; the
            // rest of Africa is three.
            Some('0') | Some('7') | Some('8') => 2,
            _ => 3,
        },
        '3' | '4' => match chars.next() {
            // 35x, 37x, 38x (Europe) and 42x are three-digit blocks.
            Some('5') | Some('7') | Some('8') if first == '3' => 3,
            Some('2') if first == '4' => 3,
            _ => 2,
        },
        '5' => match chars.next() {
            Some('0') | Some('9') => 3,
            _ => 2,
        },
        '6' => match chars.next() {
            Some('7') | Some('8') | Some('9') => 3,
            _ => 2,
        },
        '8' => match chars.next() {
            Some('0') | Some('5') | Some('7') | Some('8') => 3,
            _ => 2,
        },
        '9' => match chars.next() {
            Some('6') | Some('7') | Some('9') => 3,
            _ => 2,
        },
        _ => 2,
    };

    digits.chars().take(len.min(digits.len())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_digit_zones() {
        assert_eq!(country_code("+15550100"), "1");
        assert_eq!(country_code("+79261234567"), "7");
    }

    #[test]
    fn test_two_digit_codes() {
        assert_eq!(country_code("+447911123456"), "44");
        assert_eq!(country_code("+4915112345678"), "49");
        assert_eq!(country_code("+201001234567"), "20");
        assert_eq!(country_code("+5511998765432"), "55");
    }

    #[test]
    fn test_three_digit_codes() {
        assert_eq!(country_code("+2348031234567"), "234");
        assert_eq!(country_code("+3564567890"), "356");
        assert_eq!(country_code("+4201234567"), "420");
        assert_eq!(country_code("+9981234567"), "998");
        assert_eq!(country_code("+85212345678"), "852");
    }

    #[test]
    fn test_degenerate_input() {
        assert_eq!(country_code(""), "");
        assert_eq!(country_code("+"), "");
        assert_eq!(country_code("bogus"), "");
    }
}
