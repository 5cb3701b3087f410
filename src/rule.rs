//! Placement rules as they appear in the configuration file.
//!
//! A [`PlacementRule`] pairs a [`Matcher`] (which windows) with a
//! [`GeometrySpec`] (where to put them) and a [`MonitorSelector`] (relative
//! to which output).  Lengths and monitor selectors accept several wire
//! formats, so they carry hand-written deserializers:
//!
//! | Field      | Accepted values                                  |
//! |------------|--------------------------------------------------|
//! | length     | `960`, `"960"`, `"50%"`, `"33.3%"`, `-50`        |
//! | monitor    | `1`, `"1"`, `"primary"`, `"current"`             |

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One coordinate or dimension of a target geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    /// Absolute pixels.  For `x`/`y` this is an offset from the target
    /// monitor's origin.
    Pixels(i32),
    /// Percentage of the target monitor's width (for `x`/`width`) or height
    /// (for `y`/`height`).  `50.0` means half.
    Percent(f64),
}

impl Length {
    /// Resolve against a monitor dimension, yielding pixels relative to the
    /// monitor origin.
    pub fn resolve(&self, dimension: u32) -> i64 {
        match *self {
            Length::Pixels(px) => px as i64,
            Length::Percent(pct) => (pct / 100.0 * dimension as f64).round() as i64,
        }
    }

    fn is_positive(&self) -> bool {
        match *self {
            Length::Pixels(px) => px > 0,
            Length::Percent(pct) => pct > 0.0,
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Pixels(px) => write!(f, "{}", px),
            Length::Percent(pct) => write!(f, "{}%", pct),
        }
    }
}

/// Parse `"50%"`, `"12.5%"`, `"960"` or `"-50"`.
fn parse_length(s: &str) -> Option<Length> {
    let s = s.trim();
    if let Some(pct) = s.strip_suffix('%') {
        let pct: f64 = pct.trim().parse().ok()?;
        return pct.is_finite().then_some(Length::Percent(pct));
    }
    s.parse().ok().map(Length::Pixels)
}

impl<'de> Deserialize<'de> for Length {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Visitor;
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = Length;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "integer pixels or a string like \"50%\"")
            }
            fn visit_i64<E>(self, n: i64) -> Result<Length, E>
            where
                E: DeError,
            {
                i32::try_from(n)
                    .map(Length::Pixels)
                    .map_err(|_| DeError::custom(format!("length out of range: {}", n)))
            }
            fn visit_u64<E>(self, n: u64) -> Result<Length, E>
            where
                E: DeError,
            {
                i32::try_from(n)
                    .map(Length::Pixels)
                    .map_err(|_| DeError::custom(format!("length out of range: {}", n)))
            }
            fn visit_f64<E>(self, n: f64) -> Result<Length, E>
            where
                E: DeError,
            {
                Err(DeError::custom(format!(
                    "pixel lengths must be integers, got {}; write \"{}%\" for a percentage",
                    n, n
                )))
            }
            fn visit_str<E>(self, s: &str) -> Result<Length, E>
            where
                E: DeError,
            {
                parse_length(s).ok_or_else(|| DeError::custom(format!("invalid length: {:?}", s)))
            }
        }
        deserializer.deserialize_any(V)
    }
}

impl Serialize for Length {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Length::Pixels(px) => serializer.serialize_i32(*px),
            Length::Percent(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// Target rectangle of a rule, relative to the selected monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometrySpec {
    pub x: Length,
    pub y: Length,
    pub width: Length,
    pub height: Length,
}

/// Which monitor a rule's geometry is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorSelector {
    /// The monitor at this index in the backend's list.
    Index(usize),
    /// Index 0, unless `primary_monitor` is configured.
    Primary,
    /// Whatever monitor the window is on right now.
    #[default]
    Current,
}

impl fmt::Display for MonitorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorSelector::Index(i) => write!(f, "{}", i),
            MonitorSelector::Primary => write!(f, "primary"),
            MonitorSelector::Current => write!(f, "current"),
        }
    }
}

impl<'de> Deserialize<'de> for MonitorSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Visitor;
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = MonitorSelector;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "monitor index, \"primary\" or \"current\"")
            }
            fn visit_u64<E>(self, n: u64) -> Result<MonitorSelector, E> {
                Ok(MonitorSelector::Index(n as usize))
            }
            fn visit_i64<E>(self, n: i64) -> Result<MonitorSelector, E>
            where
                E: DeError,
            {
                usize::try_from(n)
                    .map(MonitorSelector::Index)
                    .map_err(|_| DeError::custom(format!("invalid monitor index: {}", n)))
            }
            fn visit_str<E>(self, s: &str) -> Result<MonitorSelector, E>
            where
                E: DeError,
            {
                match s.trim().to_lowercase().as_str() {
                    "primary" => Ok(MonitorSelector::Primary),
                    "current" => Ok(MonitorSelector::Current),
                    other => other
                        .parse()
                        .map(MonitorSelector::Index)
                        .map_err(|_| DeError::custom(format!("invalid monitor selector: {:?}", s))),
                }
            }
        }
        deserializer.deserialize_any(V)
    }
}

impl Serialize for MonitorSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MonitorSelector::Index(i) => serializer.serialize_u64(*i as u64),
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// How a [`Matcher`] compares its patterns.  Always case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The pattern occurs anywhere in the field.
    #[default]
    Substring,
    /// The field equals the pattern.
    Exact,
}

impl MatchMode {
    pub fn accepts(&self, pattern: &str, value: &str) -> bool {
        match self {
            MatchMode::Substring => value.contains(pattern),
            MatchMode::Exact => value == pattern,
        }
    }
}

/// Window property a [`Matcher`] pattern applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Class,
    Instance,
    Title,
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchField::Class => write!(f, "class"),
            MatchField::Instance => write!(f, "instance"),
            MatchField::Title => write!(f, "title"),
        }
    }
}

/// Predicate over a window's class, instance and title.
///
/// Every field that is set must match; unset fields are ignored.  A matcher
/// with no fields at all is rejected at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Matcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: MatchMode,
}

impl Matcher {
    /// Iterate over the `(field, pattern)` pairs this matcher declares.
    pub fn patterns(&self) -> impl Iterator<Item = (MatchField, &str)> {
        [
            (MatchField::Class, self.class.as_deref()),
            (MatchField::Instance, self.instance.as_deref()),
            (MatchField::Title, self.title.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, p)| p.map(|p| (field, p)))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .patterns()
            .map(|(field, p)| format!("{}={:?}", field, p))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A declarative placement rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementRule {
    /// Optional label used in log output and the summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "match")]
    pub matcher: Matcher,
    pub geometry: GeometrySpec,
    #[serde(default)]
    pub monitor: MonitorSelector,
    /// Higher wins when several rules match one window.
    #[serde(default)]
    pub priority: i32,
    /// When set, a missing window is waited for instead of ignored.
    #[serde(default)]
    pub expected: bool,
    /// Virtual desktop / workspace to move the window to after placing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<u32>,
}

impl PlacementRule {
    /// Human-readable label: the rule's `name`, or its matcher.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("[{}]", self.matcher),
        }
    }

    /// Check invariants serde cannot express.  Returns a description of the
    /// first problem found.
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.matcher.patterns().next().is_none() {
            return Err("match must set at least one of class, instance, title".into());
        }
        if let Some((field, _)) = self.matcher.patterns().find(|(_, p)| p.is_empty()) {
            return Err(format!("match.{} must not be empty", field));
        }
        if !self.geometry.width.is_positive() {
            return Err(format!("width must be positive, got {}", self.geometry.width));
        }
        if !self.geometry.height.is_positive() {
            return Err(format!("height must be positive, got {}", self.geometry.height));
        }
        Ok(())
    }
}
