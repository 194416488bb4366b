//! Resource quantities and aggregated resource vectors.
//!
//! Quantities use the Kubernetes notation: a decimal number followed by an
//! optional suffix (`m`, `k`, `M`, `G`, `T`, `P`, `E`, `Ki`, `Mi`, `Gi`,
//! `Ti`, `Pi`, `Ei`). Internally every quantity is kept in milli-units.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FrameworkError, FrameworkResult};

/// CPU, accounted in milli-cores.
pub const RESOURCE_CPU: &str = "cpu";
/// Memory, accounted in bytes.
pub const RESOURCE_MEMORY: &str = "memory";
/// Local scratch storage, accounted in bytes.
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// Resource name to quantity, e.g. `{"cpu": "500m", "memory": "1Gi"}`.
pub type ResourceList = BTreeMap<String, Quantity>;

/// A resource amount stored in milli-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    milli: i64,
}

impl Quantity {
    /// A quantity of `milli` thousandths of a unit.
    pub fn from_milli(milli: i64) -> Self {
        Self { milli }
    }

    /// A quantity of whole units, saturating if it does not fit.
    pub fn from_value(value: i64) -> Self {
        Self {
            milli: value.saturating_mul(1000),
        }
    }

    /// The quantity in milli-units.
    pub fn milli_value(&self) -> i64 {
        self.milli
    }

    /// Whole units, rounded up.
    pub fn value(&self) -> i64 {
        let units = self.milli / 1000;
        if self.milli % 1000 > 0 { units + 1 } else { units }
    }
}

impl FromStr for Quantity {
    type Err = FrameworkError;

    fn from_str(s: &str) -> FrameworkResult<Self> {
        parse_milli(s).map(Self::from_milli)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % 1000 == 0 {
            write!(f, "{}", self.milli / 1000)
        } else {
            write!(f, "{}m", self.milli)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Float(f64),
            Str(String),
        }

        let text = match Repr::deserialize(deserializer)? {
            Repr::Int(v) => return Ok(Quantity::from_value(v)),
            Repr::Float(v) => v.to_string(),
            Repr::Str(s) => s,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

fn invalid(quantity: &str, reason: &str) -> FrameworkError {
    FrameworkError::InvalidQuantity {
        quantity: quantity.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_milli(input: &str) -> FrameworkResult<i64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    // Multiplier applied to reach milli-units.
    let multiplier: i128 = match suffix {
        "m" => 1,
        "" => 1_000,
        "k" => 1_000_000,
        "M" => 1_000_000_000,
        "G" => 1_000_000_000_000,
        "T" => 1_000_000_000_000_000,
        "P" => 1_000_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000_000,
        "Ki" => 1_024 * 1_000,
        "Mi" => 1_024i128.pow(2) * 1_000,
        "Gi" => 1_024i128.pow(3) * 1_000,
        "Ti" => 1_024i128.pow(4) * 1_000,
        "Pi" => 1_024i128.pow(5) * 1_000,
        "Ei" => 1_024i128.pow(6) * 1_000,
        _ => return Err(invalid(input, "unknown suffix")),
    };

    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid(input, "missing number"));
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid(input, "malformed number"));
    }
    if int_part.len() + frac_part.len() > 30 {
        return Err(invalid(input, "too many digits"));
    }

    let mantissa: i128 = format!("{int_part}{frac_part}")
        .parse()
        .map_err(|_| invalid(input, "malformed number"))?;
    let scale = 10i128.pow(frac_part.len() as u32);
    let scaled = mantissa
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(input, "out of range"))?;

    // Round up to the next milli-unit, like the orchestrator does.
    let mut milli = scaled / scale;
    if scaled % scale != 0 {
        milli += 1;
    }
    if negative {
        milli = -milli;
    }
    i64::try_from(milli).map_err(|_| invalid(input, "out of range"))
}

/// Aggregated resources of a node or a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resources {
    pub milli_cpu: i64,
    pub memory_bytes: i64,
    /// Bytes.
    pub ephemeral_storage: i64,
    /// Any other resource by name, in whole units.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extended: BTreeMap<String, i64>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the quantities in `list`.
    pub fn from_list(list: &ResourceList) -> Self {
        let mut resources = Self::new();
        resources.add_list(list);
        resources
    }

    /// Adds every quantity of `list`.
    pub fn add_list(&mut self, list: &ResourceList) {
        for (name, quantity) in list {
            self.apply(name, quantity, 1);
        }
    }

    /// Subtracts every quantity of `list`.
    pub fn subtract_list(&mut self, list: &ResourceList) {
        for (name, quantity) in list {
            self.apply(name, quantity, -1);
        }
    }

    /// Adds `other` in place, saturating at the `i64` bounds.
    pub fn add(&mut self, other: &Resources) {
        self.milli_cpu = self.milli_cpu.saturating_add(other.milli_cpu);
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
        self.ephemeral_storage = self.ephemeral_storage.saturating_add(other.ephemeral_storage);
        for (name, value) in &other.extended {
            let entry = self.extended.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*value);
        }
    }

    /// Subtracts `other` in place, saturating at the `i64` bounds.
    pub fn subtract(&mut self, other: &Resources) {
        self.milli_cpu = self.milli_cpu.saturating_sub(other.milli_cpu);
        self.memory_bytes = self.memory_bytes.saturating_sub(other.memory_bytes);
        self.ephemeral_storage = self.ephemeral_storage.saturating_sub(other.ephemeral_storage);
        for (name, value) in &other.extended {
            let entry = self.extended.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_sub(*value);
        }
    }

    /// `true` if every resource in `self` fits into `other`. Extended
    /// resources missing from `other` do not fit.
    pub fn less_than_or_equal(&self, other: &Resources) -> bool {
        if self.milli_cpu > other.milli_cpu
            || self.memory_bytes > other.memory_bytes
            || self.ephemeral_storage > other.ephemeral_storage
        {
            return false;
        }
        self.extended.iter().all(|(name, value)| {
            other
                .extended
                .get(name)
                .is_some_and(|available| value <= available)
        })
    }

    fn apply(&mut self, name: &str, quantity: &Quantity, sign: i64) {
        let (slot, amount) = match name {
            RESOURCE_CPU => (&mut self.milli_cpu, quantity.milli_value()),
            RESOURCE_MEMORY => (&mut self.memory_bytes, quantity.value()),
            RESOURCE_EPHEMERAL_STORAGE => (&mut self.ephemeral_storage, quantity.value()),
            _ => (
                self.extended.entry(name.to_string()).or_insert(0),
                quantity.value(),
            ),
        };
        *slot = slot.saturating_add(sign.saturating_mul(amount));
    }
}
