use log::warn;
use serde_json::Value;

/// Applies a digit mask like `"#####.###"` to a raw reading.
///
/// Every `#` takes one digit, the reading is left padded with zeros up to
/// the number of placeholders. Readings that are not plain digits or that
/// have more digits than the mask has placeholders are returned unchanged.
pub fn apply_format(mask: &str, raw: &str) -> String {
    let places = mask.chars().filter(|c| *c == '#').count();

    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        warn!("Reading {raw:?} is not a plain number, not applying format {mask:?}");
        return raw.to_string();
    }

    if raw.len() > places {
        warn!("Reading {raw} has more digits than format {mask:?} can hold");
        return raw.to_string();
    }

    let padded = format!("{raw:0>places$}");
    let mut digits = padded.chars();

    return mask.chars()
        .map(|c| match c {
            '#' => digits.next().unwrap_or('0'),
            other => other,
        })
        .collect();
}

/// rtlamr writes ids and consumption as numbers, some forks as strings
pub fn json_scalar(value: Option<&Value>) -> Option<String> {
    return match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_format_pads() {
        assert_eq!(apply_format("####", "7"), "0007");
        assert_eq!(apply_format("#####.##", "1234567"), "12345.67");
        assert_eq!(apply_format("###.###", "42"), "000.042");
    }

    #[test]
    fn test_apply_format_exact_length() {
        assert_eq!(apply_format("##-##", "1234"), "12-34");
    }

    #[test]
    fn test_apply_format_keeps_unfit_values() {
        assert_eq!(apply_format("##", "12345"), "12345");
        assert_eq!(apply_format("####", "-12"), "-12");
        assert_eq!(apply_format("####", ""), "");
    }

    #[test]
    fn test_json_scalar() {
        assert_eq!(json_scalar(Some(&json!(12345678))), Some("12345678".to_string()));
        assert_eq!(json_scalar(Some(&json!(" 7 "))), Some("7".to_string()));
        assert_eq!(json_scalar(Some(&json!(""))), None);
        assert_eq!(json_scalar(Some(&json!(null))), None);
        assert_eq!(json_scalar(Some(&json!([1, 2]))), None);
        assert_eq!(json_scalar(None), None);
    }
}
