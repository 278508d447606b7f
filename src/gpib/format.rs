//! ## Format
//!
//! The printf and scanf conversions command tables use to build messages
//! and parse replies: `%d %i %u %x %X %o %c %s %f %F %e %E %g %G %%` with
//! flags, width, precision and length modifiers, plus `%[set]` and `%n`
//! when scanning.
//!

use std::fmt;

use crate::error::{Error, Result};

/// ### Value
///
/// An argument to [`sprintf`] or a result of [`sscanf`].
///
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Long(i64),
    ULong(u64),
    Double(f64),
    Str(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::ULong(v) => Some(*v as i64),
            Value::Double(v) => Some(*v as i64),
            Value::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Long(v) => Some(*v as u64),
            Value::ULong(v) => Some(*v),
            Value::Double(v) => Some(*v as u64),
            Value::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::ULong(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::ULong(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
        }
    }
}

// CONVERSION SPEC
// ==========

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    suppress: bool,
    conv: char,
}

/// Parse the part of a conversion after `%`, returning the spec and the
/// number of bytes consumed.
fn parse_spec(fmt: &[u8], scanning: bool) -> Result<(Spec, usize)> {
    let mut spec = Spec::default();
    let mut i = 0;
    if scanning && fmt.first() == Some(&b'*') {
        spec.suppress = true;
        i += 1;
    }
    while !scanning && i < fmt.len() {
        match fmt[i] {
            b'-' => spec.left = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'0' => spec.zero = true,
            b'#' => spec.alt = true,
            _ => break,
        }
        i += 1;
    }
    let (width, used) = digits(&fmt[i..]);
    spec.width = width;
    i += used;
    if !scanning && fmt.get(i) == Some(&b'.') {
        let (precision, used) = digits(&fmt[i + 1..]);
        spec.precision = Some(precision.unwrap_or(0));
        i += 1 + used;
    }
    while let Some(b'h' | b'l' | b'L' | b'q' | b'j' | b'z' | b't') = fmt.get(i) {
        i += 1;
    }
    match fmt.get(i) {
        Some(&c) => {
            spec.conv = c as char;
            Ok((spec, i + 1))
        }
        None => Err(Error::Format("incomplete conversion".into())),
    }
}

fn digits(s: &[u8]) -> (Option<usize>, usize) {
    let n = s.iter().take_while(|b| b.is_ascii_digit()).count();
    if n == 0 {
        return (None, 0);
    }
    let value = s[..n]
        .iter()
        .fold(0usize, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as usize));
    (Some(value), n)
}

// PRINTF
// ==========

/// ### Sprintf
///
/// Format `args` as C's `snprintf` would.
///
/// #### Arguments
/// - `fmt` -> the format
/// - `args` -> one value per conversion
///
/// #### Returns
/// The formatted string, or `Format` if the format is malformed, runs out
/// of arguments or gets a string where it wants a number.
///
pub fn sprintf(fmt: &str, args: &[Value]) -> Result<String> {
    let bytes = fmt.as_bytes();
    let mut out = String::with_capacity(fmt.len() + 16);
    let mut args = args.iter();
    let mut literal_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        out.push_str(&fmt[literal_start..i]);
        let (spec, used) = parse_spec(&bytes[i + 1..], false)?;
        i += 1 + used;
        literal_start = i;
        if spec.conv == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| Error::Format(format!("missing argument for %{}", spec.conv)))?;
        format_one(&mut out, &spec, arg)?;
    }
    out.push_str(&fmt[literal_start..]);
    Ok(out)
}

fn format_one(out: &mut String, spec: &Spec, arg: &Value) -> Result<()> {
    let not_a_number = || Error::Format(format!("%{} wants a number, got {:?}", spec.conv, arg));
    match spec.conv {
        'd' | 'i' => {
            let v = arg.as_i64().ok_or_else(not_a_number)?;
            let digits = with_precision(v.unsigned_abs().to_string(), spec.precision);
            pad_number(out, spec, sign(v < 0, spec), "", &digits, spec.precision.is_none());
        }
        'u' | 'x' | 'X' | 'o' => {
            let v = arg.as_u64().ok_or_else(not_a_number)?;
            let (digits, prefix) = match spec.conv {
                'u' => (v.to_string(), ""),
                'x' => (format!("{:x}", v), if spec.alt && v != 0 { "0x" } else { "" }),
                'X' => (format!("{:X}", v), if spec.alt && v != 0 { "0X" } else { "" }),
                _ => {
                    let octal = format!("{:o}", v);
                    (if spec.alt && !octal.starts_with('0') { format!("0{}", octal) } else { octal }, "")
                }
            };
            let digits = with_precision(digits, spec.precision);
            pad_number(out, spec, "", prefix, &digits, spec.precision.is_none());
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
            let v = arg.as_f64().ok_or_else(not_a_number)?;
            let upper = spec.conv.is_ascii_uppercase();
            if !v.is_finite() {
                let text = match (v.is_nan(), upper) {
                    (true, false) => "nan",
                    (true, true) => "NAN",
                    (false, false) => "inf",
                    (false, true) => "INF",
                };
                pad_number(out, spec, sign(v.is_sign_negative() && !v.is_nan(), spec), "", text, false);
                return Ok(());
            }
            let precision = spec.precision.unwrap_or(6);
            let body = match spec.conv.to_ascii_lowercase() {
                'f' => fixed(v.abs(), precision, spec.alt),
                'e' => exponential(v.abs(), precision, spec.alt, upper),
                _ => general(v.abs(), precision, spec.alt, upper),
            };
            pad_number(out, spec, sign(v.is_sign_negative(), spec), "", &body, true);
        }
        's' => {
            let text = arg.to_string();
            let text = match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            };
            pad(out, spec, &text);
        }
        'c' => {
            let c = match arg {
                Value::Str(s) => s.chars().next().unwrap_or('\0'),
                other => other
                    .as_u64()
                    .and_then(|v| char::from_u32(v as u32))
                    .ok_or_else(not_a_number)?,
            };
            pad(out, spec, &c.to_string());
        }
        other => return Err(Error::Format(format!("unsupported conversion %{}", other))),
    }
    Ok(())
}

fn sign(negative: bool, spec: &Spec) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn with_precision(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    }
}

fn pad(out: &mut String, spec: &Spec, text: &str) {
    let fill = spec.width.unwrap_or(0).saturating_sub(text.chars().count());
    if spec.left {
        out.push_str(text);
        out.extend(std::iter::repeat(' ').take(fill));
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(text);
    }
}

fn pad_number(out: &mut String, spec: &Spec, sign: &str, prefix: &str, digits: &str, zero_ok: bool) {
    let len = sign.len() + prefix.len() + digits.len();
    let fill = spec.width.unwrap_or(0).saturating_sub(len);
    if spec.left {
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(digits);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if spec.zero && zero_ok {
        out.push_str(sign);
        out.push_str(prefix);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(digits);
    }
}

fn fixed(v: f64, precision: usize, alt: bool) -> String {
    let mut s = format!("{:.*}", precision, v);
    if alt && precision == 0 {
        s.push('.');
    }
    s
}

/// Split Rust's `1.5e3` form into mantissa and exponent.
fn rust_exp(v: f64, precision: usize) -> (String, i32) {
    let s = format!("{:.*e}", precision, v);
    match s.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (s, 0),
    }
}

fn exponential(v: f64, precision: usize, alt: bool, upper: bool) -> String {
    let (mut mantissa, exp) = rust_exp(v, precision);
    if alt && precision == 0 {
        mantissa.push('.');
    }
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.unsigned_abs())
}

fn general(v: f64, precision: usize, alt: bool, upper: bool) -> String {
    let p = precision.max(1);
    let exp = if v == 0.0 { 0 } else { rust_exp(v, p - 1).1 };
    let mut s = if exp < -4 || exp >= p as i32 {
        exponential(v, p - 1, alt, upper)
    } else {
        fixed(v, (p as i32 - 1 - exp) as usize, alt)
    };
    if !alt {
        s = strip_zeros(&s);
    }
    s
}

/// Drop trailing zeros of the fraction, and the point if nothing is left.
fn strip_zeros(s: &str) -> String {
    let (body, exp) = match s.find(['e', 'E']) {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    if !body.contains('.') {
        return s.to_string();
    }
    let body = body.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", body, exp)
}

// SCANF
// ==========

/// ### Sscanf
///
/// Parse `input` against `fmt` as C's `sscanf` would. Scanning stops at the
/// first mismatch; the values converted up to there are returned.
///
/// #### Returns
/// One value per conversion that was not suppressed with `*`, or `Format`
/// if the format itself is malformed.
///
pub fn sscanf(input: &str, fmt: &str) -> Result<Vec<Value>> {
    let input = input.as_bytes();
    let fmt = fmt.as_bytes();
    let mut values = Vec::new();
    let mut pos = 0;
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        if c.is_ascii_whitespace() {
            pos = skip_ws(input, pos);
            i += 1;
            continue;
        }
        if c != b'%' {
            if input.get(pos) != Some(&c) {
                break;
            }
            pos += 1;
            i += 1;
            continue;
        }
        let (spec, used) = parse_spec(&fmt[i + 1..], true)?;
        i += 1 + used;
        let mut set = None;
        if spec.conv == '[' {
            let (parsed, used) = parse_set(&fmt[i..])?;
            set = Some(parsed);
            i += used;
        }
        let width = spec.width.unwrap_or(usize::MAX);
        let value = match spec.conv {
            '%' => {
                pos = skip_ws(input, pos);
                if input.get(pos) != Some(&b'%') {
                    break;
                }
                pos += 1;
                continue;
            }
            'n' => Some(Value::Long(pos as i64)),
            'c' => {
                let n = spec.width.unwrap_or(1);
                if input.len() < pos + n {
                    break;
                }
                let text = String::from_utf8_lossy(&input[pos..pos + n]).into_owned();
                pos += n;
                Some(Value::Str(text))
            }
            '[' => {
                let set = set.unwrap_or_default();
                let n = input[pos..]
                    .iter()
                    .take(width)
                    .take_while(|&&b| set.matches(b))
                    .count();
                if n == 0 {
                    break;
                }
                let text = String::from_utf8_lossy(&input[pos..pos + n]).into_owned();
                pos += n;
                Some(Value::Str(text))
            }
            's' => {
                pos = skip_ws(input, pos);
                let n = input[pos..]
                    .iter()
                    .take(width)
                    .take_while(|b| !b.is_ascii_whitespace())
                    .count();
                if n == 0 {
                    break;
                }
                let text = String::from_utf8_lossy(&input[pos..pos + n]).into_owned();
                pos += n;
                Some(Value::Str(text))
            }
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                pos = skip_ws(input, pos);
                let end = input.len().min(pos.saturating_add(width));
                match scan_integer(&input[pos..end], spec.conv) {
                    Some((value, n)) => {
                        pos += n;
                        Some(value)
                    }
                    None => break,
                }
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'a' => {
                pos = skip_ws(input, pos);
                let end = input.len().min(pos.saturating_add(width));
                match scan_float(&input[pos..end]) {
                    Some((value, n)) => {
                        pos += n;
                        Some(Value::Double(value))
                    }
                    None => break,
                }
            }
            other => return Err(Error::Format(format!("unsupported conversion %{}", other))),
        };
        if let (Some(value), false) = (value, spec.suppress) {
            values.push(value);
        }
    }
    Ok(values)
}

fn skip_ws(input: &[u8], pos: usize) -> usize {
    pos + input[pos.min(input.len())..]
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count()
}

fn scan_integer(s: &[u8], conv: char) -> Option<(Value, usize)> {
    let mut i = 0;
    let negative = match s.first() {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };
    let has_hex_prefix =
        |i: usize| s.get(i) == Some(&b'0') && matches!(s.get(i + 1), Some(b'x' | b'X')) && s.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
    let radix = match conv {
        'x' | 'X' => {
            if has_hex_prefix(i) {
                i += 2;
            }
            16
        }
        'o' => 8,
        'i' if has_hex_prefix(i) => {
            i += 2;
            16
        }
        'i' if s.get(i) == Some(&b'0') => 8,
        _ => 10,
    };
    let n = s[i..]
        .iter()
        .take_while(|b| (**b as char).is_digit(radix))
        .count();
    if n == 0 {
        return None;
    }
    let text = std::str::from_utf8(&s[i..i + n]).ok()?;
    let magnitude = u64::from_str_radix(text, radix).ok()?;
    let value = match conv {
        'd' | 'i' => {
            let v = if negative {
                0i64.checked_sub_unsigned(magnitude)?
            } else {
                i64::try_from(magnitude).ok()?
            };
            Value::Long(v)
        }
        _ => Value::ULong(if negative { magnitude.wrapping_neg() } else { magnitude }),
    };
    Some((value, i + n))
}

fn scan_float(s: &[u8]) -> Option<(f64, usize)> {
    let mut i = 0;
    if matches!(s.first(), Some(b'-' | b'+')) {
        i += 1;
    }
    let lower: Vec<u8> = s[i..].iter().take(8).map(u8::to_ascii_lowercase).collect();
    for word in [&b"infinity"[..], b"inf", b"nan"] {
        if lower.starts_with(word) {
            let end = i + word.len();
            let text = std::str::from_utf8(&s[..end]).ok()?;
            return Some((text.parse().ok()?, end));
        }
    }
    let int_digits = s[i..].iter().take_while(|b| b.is_ascii_digit()).count();
    i += int_digits;
    let mut frac_digits = 0;
    if s.get(i) == Some(&b'.') {
        frac_digits = s[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        i += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return None;
    }
    if matches!(s.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(s.get(j), Some(b'-' | b'+')) {
            j += 1;
        }
        let exp_digits = s[j..].iter().take_while(|b| b.is_ascii_digit()).count();
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }
    let text = std::str::from_utf8(&s[..i]).ok()?;
    Some((text.parse().ok()?, i))
}

#[derive(Default)]
struct ScanSet {
    negate: bool,
    ranges: Vec<(u8, u8)>,
}

impl ScanSet {
    fn matches(&self, b: u8) -> bool {
        self.ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi) != self.negate
    }
}

/// Parse the body of `%[...]`, starting after the `[`.
fn parse_set(fmt: &[u8]) -> Result<(ScanSet, usize)> {
    let mut set = ScanSet::default();
    let mut i = 0;
    if fmt.first() == Some(&b'^') {
        set.negate = true;
        i += 1;
    }
    // a leading ] is a member, not the end
    if fmt.get(i) == Some(&b']') {
        set.ranges.push((b']', b']'));
        i += 1;
    }
    while let Some(&c) = fmt.get(i) {
        if c == b']' {
            return Ok((set, i + 1));
        }
        match (fmt.get(i + 1), fmt.get(i + 2)) {
            (Some(b'-'), Some(&hi)) if hi != b']' => {
                set.ranges.push((c, hi));
                i += 3;
            }
            _ => {
                set.ranges.push((c, c));
                i += 1;
            }
        }
    }
    Err(Error::Format("unterminated %[".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn one(fmt: &str, value: Value) -> String {
        sprintf(fmt, &[value]).unwrap()
    }

    #[test]
    fn integers() {
        assert_eq!(one("%d", Value::Long(-42)), "-42");
        assert_eq!(one("%5d", Value::Long(42)), "   42");
        assert_eq!(one("%-5d|", Value::Long(42)), "42   |");
        assert_eq!(one("%05d", Value::Long(-42)), "-0042");
        assert_eq!(one("%+d", Value::Long(7)), "+7");
        assert_eq!(one("%.3d", Value::Long(7)), "007");
        assert_eq!(one("%ld", Value::Long(i64::MIN)), i64::MIN.to_string());
        assert_eq!(one("%#x", Value::ULong(255)), "0xff");
        assert_eq!(one("%X", Value::ULong(255)), "FF");
        assert_eq!(one("%#o", Value::ULong(8)), "010");
        assert_eq!(one("%lu", Value::ULong(u64::MAX)), u64::MAX.to_string());
    }

    #[test]
    fn floats() {
        assert_eq!(one("%f", Value::Double(3.14)), "3.140000");
        assert_eq!(one("%.2f", Value::Double(-2.005)), "-2.00");
        assert_eq!(one("%8.3f", Value::Double(1.5)), "   1.500");
        assert_eq!(one("%e", Value::Double(1234.5)), "1.234500e+03");
        assert_eq!(one("%.2E", Value::Double(0.000123)), "1.23E-04");
        assert_eq!(one("%g", Value::Double(0.0001)), "0.0001");
        assert_eq!(one("%g", Value::Double(1e-5)), "1e-05");
        assert_eq!(one("%g", Value::Double(123456.0)), "123456");
        assert_eq!(one("%g", Value::Double(1234567.0)), "1.23457e+06");
        assert_eq!(one("%g", Value::Double(3.14)), "3.14");
        assert_eq!(one("%g", Value::Double(0.0)), "0");
        assert_eq!(one("%f", Value::Long(2)), "2.000000");
        assert_eq!(one("%f", Value::Double(f64::NAN)), "nan");
    }

    #[test]
    fn strings_and_literals() {
        assert_eq!(sprintf("VOLT %s;%%", &[Value::Str("5".into())]).unwrap(), "VOLT 5;%");
        assert_eq!(one("%.3s", Value::Str("abcdef".into())), "abc");
        assert_eq!(one("%-4s|", Value::Str("ab".into())), "ab  |");
        assert_eq!(one("%c", Value::Long(65)), "A");
        assert_eq!(sprintf("plain", &[]).unwrap(), "plain");
    }

    #[test]
    fn sprintf_errors() {
        assert!(matches!(sprintf("%d", &[]), Err(Error::Format(_))));
        assert!(matches!(sprintf("%d", &[Value::Str("x".into())]), Err(Error::Format(_))));
        assert!(matches!(sprintf("%", &[Value::Long(1)]), Err(Error::Format(_))));
        assert!(matches!(sprintf("%k", &[Value::Long(1)]), Err(Error::Format(_))));
    }

    #[test]
    fn scan_numbers() {
        assert_eq!(sscanf("  -17", "%d").unwrap(), vec![Value::Long(-17)]);
        assert_eq!(sscanf("0x1F", "%x").unwrap(), vec![Value::ULong(31)]);
        assert_eq!(sscanf("017", "%i").unwrap(), vec![Value::Long(15)]);
        assert_eq!(sscanf("3.14\n", "%lf").unwrap(), vec![Value::Double(3.14)]);
        assert_eq!(sscanf("+1.5E-3", "%g").unwrap(), vec![Value::Double(1.5e-3)]);
        assert_eq!(
            sscanf("V=1.25,I=0.5", "V=%lf,I=%lf").unwrap(),
            vec![Value::Double(1.25), Value::Double(0.5)]
        );
    }

    #[test]
    fn scan_strings() {
        assert_eq!(
            sscanf("OK ready", "%s %s").unwrap(),
            vec![Value::Str("OK".into()), Value::Str("ready".into())]
        );
        assert_eq!(sscanf("ABCDEF", "%3s").unwrap(), vec![Value::Str("ABC".into())]);
        assert_eq!(
            sscanf("12:34xyz", "%[0-9:]%n").unwrap(),
            vec![Value::Str("12:34".into()), Value::Long(5)]
        );
        assert_eq!(sscanf("abc,def", "%[^,]").unwrap(), vec![Value::Str("abc".into())]);
        assert_eq!(sscanf("7 8", "%*d %d").unwrap(), vec![Value::Long(8)]);
    }

    #[test]
    fn scan_stops_at_mismatch() {
        assert_eq!(sscanf("V=1 X=2", "V=%d I=%d").unwrap(), vec![Value::Long(1)]);
        assert!(sscanf("abc", "%d").unwrap().is_empty());
        assert!(sscanf("", "%lf").unwrap().is_empty());
        assert!(matches!(sscanf("a", "%[abc"), Err(Error::Format(_))));
    }

    proptest! {
        #[test]
        fn long_survives_print_then_scan(v in any::<i64>()) {
            let text = sprintf("%ld", &[Value::Long(v)]).unwrap();
            prop_assert_eq!(sscanf(&text, "%ld").unwrap(), vec![Value::Long(v)]);
        }

        #[test]
        fn padded_hex_scans_back(v in any::<u32>(), width in 0usize..12) {
            let text = sprintf(&format!("%#0{}x", width), &[Value::ULong(v as u64)]).unwrap();
            prop_assert!(text.len() >= width);
            prop_assert_eq!(sscanf(&text, "%x").unwrap(), vec![Value::ULong(v as u64)]);
        }
    }
}
