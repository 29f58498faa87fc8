//! Typed operand values and the parsers that turn condition literals into them.
//!
//! Every operand kind has a total (or, for booleans and text, equality-only)
//! order so that a single evaluator can compare collected measurements against
//! thresholds without knowing where the measurement came from.

use crate::error::ValueError;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Tolerance used when comparing percentages, so `20%` and `0.2` are equal.
const PERCENT_EPSILON: f64 = 1e-9;

/// The kind of a typed operand. Literals in a condition are parsed under the
/// kind of the value they are compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandKind {
    Integer,
    /// Byte sizes and other resource quantities (`1Gi`, `500m`, `2k`).
    Quantity,
    Percentage,
    Duration,
    Version,
    Enum(Arc<EnumOrder>),
    Bool,
    Text,
}

impl OperandKind {
    /// Whether `<`, `>`, `<=` and `>=` are meaningful for this kind.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, OperandKind::Bool | OperandKind::Text)
    }

    /// Parse a literal as a value of this kind.
    pub fn parse(&self, literal: &str) -> Result<Value, ValueError> {
        match self {
            OperandKind::Integer => parse_integer(literal).map(Value::Integer),
            OperandKind::Quantity => Quantity::parse(literal).map(Value::Quantity),
            OperandKind::Percentage => parse_percentage(literal).map(Value::Percentage),
            OperandKind::Duration => parse_duration(literal).map(Value::Duration),
            OperandKind::Version => Version::parse(literal).map(Value::Version),
            OperandKind::Enum(order) => EnumValue::parse(order, literal).map(Value::Enum),
            OperandKind::Bool => parse_bool(literal).map(Value::Bool),
            OperandKind::Text => {
                let text = literal.trim();
                if text.is_empty() {
                    return Err(ValueError::Empty);
                }
                Ok(Value::Text(text.to_string()))
            }
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandKind::Integer => write!(f, "integer"),
            OperandKind::Quantity => write!(f, "quantity"),
            OperandKind::Percentage => write!(f, "percentage"),
            OperandKind::Duration => write!(f, "duration"),
            OperandKind::Version => write!(f, "version"),
            OperandKind::Enum(order) => write!(f, "{}", order.name()),
            OperandKind::Bool => write!(f, "boolean"),
            OperandKind::Text => write!(f, "text"),
        }
    }
}

/// A typed, comparable operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Quantity(Quantity),
    /// Stored as a fraction: `20%` is `0.2`.
    Percentage(f64),
    Duration(Duration),
    Version(Version),
    Enum(EnumValue),
    Bool(bool),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> OperandKind {
        match self {
            Value::Integer(_) => OperandKind::Integer,
            Value::Quantity(_) => OperandKind::Quantity,
            Value::Percentage(_) => OperandKind::Percentage,
            Value::Duration(_) => OperandKind::Duration,
            Value::Version(_) => OperandKind::Version,
            Value::Enum(e) => OperandKind::Enum(Arc::clone(&e.order)),
            Value::Bool(_) => OperandKind::Bool,
            Value::Text(_) => OperandKind::Text,
        }
    }

    /// Order two values. Returns `None` when the kinds cannot be compared.
    ///
    /// Integers and quantities compare with each other (an integer is a
    /// whole number of units).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Quantity(a), Value::Quantity(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Quantity(b)) => Some(Quantity::from_units(*a).cmp(b)),
            (Value::Quantity(a), Value::Integer(b)) => Some(a.cmp(&Quantity::from_units(*b))),
            (Value::Percentage(a), Value::Percentage(b)) => {
                if (a - b).abs() < PERCENT_EPSILON {
                    Some(Ordering::Equal)
                } else {
                    a.partial_cmp(b)
                }
            }
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Version(a), Value::Version(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) if a.order.name == b.order.name => {
                Some(a.ordinal.cmp(&b.ordinal))
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Quantity(q) => write!(f, "{}", q),
            Value::Percentage(p) => write!(f, "{}%", (p * 10000.0).round() / 100.0),
            Value::Duration(d) => write!(f, "{:?}", d),
            Value::Version(v) => write!(f, "{}", v),
            Value::Enum(e) => write!(f, "{}", e.label()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Parse a signed decimal integer.
pub fn parse_integer(literal: &str) -> Result<i64, ValueError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Err(ValueError::Empty);
    }
    literal
        .parse()
        .map_err(|_| ValueError::Integer(literal.to_string()))
}

/// Parse a byte size (`1024`, `4Ki`, `1Gi`, `2G`) into a number of bytes.
pub fn parse_byte_size(literal: &str) -> Result<u64, ValueError> {
    let quantity = Quantity::parse(literal)?;
    quantity
        .whole_units()
        .and_then(|units| u64::try_from(units).ok())
        .ok_or_else(|| ValueError::FractionalBytes(literal.trim().to_string()))
}

/// Parse a percentage written either as a fraction (`0.2`) or with a percent
/// sign (`20%`). Both forms normalize to the fraction.
pub fn parse_percentage(literal: &str) -> Result<f64, ValueError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Err(ValueError::Empty);
    }
    let (number, scale) = match literal.strip_suffix('%') {
        Some(number) => (number.trim(), 100.0),
        None => (literal, 1.0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| ValueError::Percentage(literal.to_string()))?;
    if !value.is_finite() {
        return Err(ValueError::Percentage(literal.to_string()));
    }
    Ok(value / scale)
}

/// Parse a duration such as `300ms`, `1.5s` or `1h30m`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is accepted;
/// any other number needs a unit.
pub fn parse_duration(literal: &str) -> Result<Duration, ValueError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Err(ValueError::Empty);
    }
    if literal == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = || ValueError::Duration(literal.to_string());

    let mut rest = literal;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return Err(invalid()),
        };

        let (int_digits, frac_digits) = number.split_once('.').unwrap_or((number, ""));
        if (int_digits.is_empty() && frac_digits.is_empty()) || frac_digits.len() > 18 {
            return Err(invalid());
        }
        let int: u128 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().map_err(|_| invalid())?
        };
        let frac: u128 = if frac_digits.is_empty() {
            0
        } else {
            frac_digits.parse().map_err(|_| invalid())?
        };
        let scale = 10u128.pow(frac_digits.len() as u32);

        let whole = int.checked_mul(unit_nanos).ok_or_else(invalid)?;
        let part = frac.checked_mul(unit_nanos).ok_or_else(invalid)? / scale;
        total = total
            .checked_add(whole)
            .and_then(|t| t.checked_add(part))
            .ok_or_else(invalid)?;

        rest = next;
    }

    let nanos = u64::try_from(total).map_err(|_| invalid())?;
    Ok(Duration::from_nanos(nanos))
}

/// Parse a boolean literal (`true`, `false`, `1`, `0`, `t`, `f`, any case).
pub fn parse_bool(literal: &str) -> Result<bool, ValueError> {
    match literal.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        "" => Err(ValueError::Empty),
        _ => Err(ValueError::Bool(literal.trim().to_string())),
    }
}

/// A resource quantity held exactly in thousandths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity {
    millis: i128,
}

impl Quantity {
    pub fn from_units(units: i64) -> Self {
        Self {
            millis: units as i128 * 1000,
        }
    }

    pub fn from_millis(millis: i128) -> Self {
        Self { millis }
    }

    pub fn millis(&self) -> i128 {
        self.millis
    }

    /// The quantity as whole units, if it has no fractional part.
    pub fn whole_units(&self) -> Option<i128> {
        (self.millis % 1000 == 0).then_some(self.millis / 1000)
    }

    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.millis.checked_add(other.millis).map(Quantity::from_millis)
    }

    /// Parse a quantity with an optional decimal (`k`, `M`, `G`, `T`, `P`,
    /// `E`), binary (`Ki` .. `Ei`) or milli (`m`) suffix. Fractions below a
    /// thousandth round up.
    pub fn parse(literal: &str) -> Result<Self, ValueError> {
        let literal = literal.trim();
        if literal.is_empty() {
            return Err(ValueError::Empty);
        }
        let invalid = || ValueError::Quantity(literal.to_string());

        let split = literal
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(literal.len());
        let (number, suffix) = literal.split_at(split);

        let multiplier: i128 = match suffix {
            "m" => 1,
            "" => 1_000,
            "k" => 1_000 * 1_000,
            "M" => 1_000 * 1_000_000,
            "G" => 1_000 * 1_000_000_000,
            "T" => 1_000 * 1_000_000_000_000,
            "P" => 1_000 * 1_000_000_000_000_000,
            "E" => 1_000 * 1_000_000_000_000_000_000,
            "Ki" => 1_000 * (1 << 10),
            "Mi" => 1_000 * (1 << 20),
            "Gi" => 1_000 * (1 << 30),
            "Ti" => 1_000 * (1 << 40),
            "Pi" => 1_000 * (1 << 50),
            "Ei" => 1_000 * (1 << 60),
            _ => return Err(invalid()),
        };

        let (negative, unsigned) = match number.as_bytes().first() {
            Some(b'-') => (true, &number[1..]),
            Some(b'+') => (false, &number[1..]),
            _ => (false, number),
        };
        let (int_digits, frac_digits) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (int_digits.is_empty() && frac_digits.is_empty())
            || !all_digits(int_digits)
            || !all_digits(frac_digits)
            || int_digits.len() > 24
            || frac_digits.len() > 18
        {
            return Err(invalid());
        }

        let int: i128 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().map_err(|_| invalid())?
        };
        let frac: i128 = if frac_digits.is_empty() {
            0
        } else {
            frac_digits.parse().map_err(|_| invalid())?
        };
        let scale = 10i128.pow(frac_digits.len() as u32);

        let whole = int.checked_mul(multiplier).ok_or_else(invalid)?;
        let frac_scaled = frac.checked_mul(multiplier).ok_or_else(invalid)?;
        let frac_millis = (frac_scaled + scale - 1) / scale;
        let millis = whole.checked_add(frac_millis).ok_or_else(invalid)?;

        Ok(Self {
            millis: if negative { -millis } else { millis },
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.whole_units() {
            Some(units) => write!(f, "{}", units),
            None => write!(f, "{}m", self.millis),
        }
    }
}

/// A tolerant dotted version. Missing trailing components compare as zero,
/// and so does an `x` wildcard component: `15.x` orders as `15.0`.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    pre_release: Option<String>,
    wildcard_at: Option<usize>,
}

impl Version {
    pub fn parse(literal: &str) -> Result<Self, ValueError> {
        let raw = literal.trim();
        if raw.is_empty() {
            return Err(ValueError::Empty);
        }
        let invalid = || ValueError::Version(raw.to_string());

        let unprefixed = raw
            .strip_prefix('v')
            .or_else(|| raw.strip_prefix('V'))
            .unwrap_or(raw);
        // Build metadata never participates in ordering.
        let without_build = unprefixed.split('+').next().unwrap_or_default();
        let (core, pre_release) = match without_build.split_once('-') {
            Some((_, "")) => return Err(invalid()),
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (without_build, None),
        };
        if core.is_empty() {
            return Err(invalid());
        }

        let mut components = Vec::new();
        let mut wildcard_at = None;
        for (index, part) in core.split('.').enumerate() {
            if part.eq_ignore_ascii_case("x") || part == "*" {
                wildcard_at.get_or_insert(index);
                components.push(0);
                continue;
            }
            components.push(part.parse::<u64>().map_err(|_| invalid())?);
        }

        Ok(Self {
            components,
            pre_release,
            wildcard_at,
        })
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard_at.is_some()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        match (&self.pre_release, &other.pre_release) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| match self.wildcard_at {
                Some(at) if i >= at => "x".to_string(),
                _ => c.to_string(),
            })
            .collect();
        write!(f, "{}", parts.join("."))?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// A caller-declared total order over named states, lowest first.
///
/// ```
/// use bundlecheck::condition::EnumOrder;
/// let health = EnumOrder::new("ceph health", ["HEALTH_ERR", "HEALTH_WARN", "HEALTH_OK"]);
/// assert_eq!(health.ordinal("health_warn"), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumOrder {
    name: String,
    levels: Vec<String>,
}

impl EnumOrder {
    pub fn new<I, S>(name: impl Into<String>, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Position of `label` in the order, case-insensitively.
    pub fn ordinal(&self, label: &str) -> Option<usize> {
        let label = label.trim();
        self.levels.iter().position(|l| l.eq_ignore_ascii_case(label))
    }
}

/// One level of an [`EnumOrder`].
#[derive(Debug, Clone)]
pub struct EnumValue {
    ordinal: usize,
    order: Arc<EnumOrder>,
}

impl EnumValue {
    pub fn parse(order: &Arc<EnumOrder>, label: &str) -> Result<Self, ValueError> {
        if label.trim().is_empty() {
            return Err(ValueError::Empty);
        }
        let ordinal = order.ordinal(label).ok_or_else(|| ValueError::UnknownLevel {
            value: label.trim().to_string(),
            order: order.name.clone(),
            levels: order.levels.clone(),
        })?;
        Ok(Self {
            ordinal,
            order: Arc::clone(order),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn label(&self) -> &str {
        &self.order.levels[self.ordinal]
    }

    pub fn order(&self) -> &Arc<EnumOrder> {
        &self.order
    }
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal && self.order.name == other.order.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1Gi").unwrap(), 1_073_741_824);
        assert_eq!(parse_byte_size("4Ki").unwrap(), 4096);
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
        assert_eq!(parse_byte_size("2G").unwrap(), 2_000_000_000);
        assert_eq!(parse_byte_size("1.5Ki").unwrap(), 1536);
        assert_eq!(parse_byte_size("7951376Ki").unwrap(), 7_951_376 * 1024);
        assert!(parse_byte_size("500m").is_err());
        assert!(parse_byte_size("-1").is_err());
        assert!(parse_byte_size("12Qi").is_err());
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn test_quantity_milli_and_ordering() {
        let half = Quantity::parse("500m").unwrap();
        let one = Quantity::parse("1").unwrap();
        assert!(half < one);
        assert_eq!(half.millis(), 500);
        assert_eq!(Quantity::parse("0.5").unwrap(), half);
        assert_eq!(half.to_string(), "500m");
        assert_eq!(one.to_string(), "1");
        assert!(Quantity::parse("1.2.3").is_err());
        assert!(Quantity::parse("Gi").is_err());
    }

    #[test]
    fn test_percentage_forms_compare_equal() {
        let a = Value::Percentage(parse_percentage("20%").unwrap());
        let b = Value::Percentage(parse_percentage("0.20").unwrap());
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        assert!(parse_percentage("abc%").is_err());
        assert!(parse_percentage("NaN").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("25ns").unwrap(), Duration::from_nanos(25));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_version_padding_and_wildcards() {
        let v14 = Version::parse("14.0.0").unwrap();
        let bound = Version::parse("15.x").unwrap();
        assert!(v14 < bound);
        assert_eq!(Version::parse("1.2").unwrap(), Version::parse("1.2.0").unwrap());
        assert!(bound.has_wildcard());
        assert_eq!(bound, Version::parse("15.0").unwrap());
        assert!(Version::parse("15.9.3").unwrap() > bound);
        assert_eq!(bound.to_string(), "15.x");
        assert!(v14 > Version::parse("x").unwrap());

        let actual = Version::parse("15.0.2001.0").unwrap();
        assert!(actual > Version::parse("15.0.2000.x").unwrap());
    }

    #[test]
    fn test_version_prefix_and_pre_release() {
        assert_eq!(Version::parse("v1.26.3").unwrap(), Version::parse("1.26.3").unwrap());
        assert_eq!(
            Version::parse("1.26.3+k3s1").unwrap(),
            Version::parse("1.26.3").unwrap()
        );
        assert!(Version::parse("1.27.0-rc.1").unwrap() < Version::parse("1.27.0").unwrap());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.2-").is_err());
        assert_eq!(Version::parse("15.0.x").unwrap().to_string(), "15.0.x");
    }

    #[test]
    fn test_enum_order() {
        let order = Arc::new(EnumOrder::new(
            "ceph health",
            ["HEALTH_ERR", "HEALTH_WARN", "HEALTH_OK"],
        ));
        let ok = EnumValue::parse(&order, "HEALTH_OK").unwrap();
        let warn = EnumValue::parse(&order, "health_warn").unwrap();
        assert_eq!(
            Value::Enum(ok.clone()).compare(&Value::Enum(warn.clone())),
            Some(Ordering::Greater)
        );
        assert_eq!(warn.label(), "HEALTH_WARN");
        assert!(matches!(
            EnumValue::parse(&order, "HEALTH_UNKNOWN"),
            Err(ValueError::UnknownLevel { .. })
        ));
    }

    #[test]
    fn test_kind_parse_and_mixed_comparison() {
        assert_eq!(OperandKind::Bool.parse("TRUE").unwrap(), Value::Bool(true));
        assert!(OperandKind::Bool.parse("maybe").is_err());
        assert!(!OperandKind::Text.is_ordered());
        assert!(OperandKind::Quantity.is_ordered());

        let count = Value::Integer(32);
        let cores = OperandKind::Quantity.parse("32").unwrap();
        assert_eq!(count.compare(&cores), Some(Ordering::Equal));
        assert_eq!(Value::Text("a".into()).compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Percentage(0.85).to_string(), "85%");
        assert_eq!(Value::Duration(Duration::from_millis(1500)).to_string(), "1.5s");
        assert_eq!(
            Value::Quantity(Quantity::parse("4Ki").unwrap()).to_string(),
            "4096"
        );
    }
}
