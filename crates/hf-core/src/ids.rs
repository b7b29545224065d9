use core::fmt;
use core::num::NonZeroU32;

/// Client-assigned order of a run slot.
///
/// - starts at 1 and only grows within a registry session
/// - `NonZero` enables `Option<RunOrder>` to be niche-optimized
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RunOrder(NonZeroU32);

impl RunOrder {
    /// The first order handed out by a fresh registry.
    pub const fn first() -> Self {
        Self(NonZeroU32::MIN)
    }

    /// Wrap a raw order value; zero is not a valid order.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    /// The order allocated after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for RunOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunOrder({})", self.get())
    }
}

impl fmt::Display for RunOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.get())
    }
}

/// Server-side experiment result identifier. Opaque to the client.
///
/// The gateway sends these as JSON numbers or strings; both deserialize.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ResultId(String);

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ResultId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}

impl ResultId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultId({})", self.0)
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResultId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResultId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Catalog ID aliases for clarity (no runtime cost).
pub type ProjectId = i64;
pub type NodeId = i64;
pub type ModelId = i64;
pub type ExperimentId = i64;
pub type CategoryId = i64;
