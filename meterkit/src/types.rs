use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::Display,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// The value part of an attribute's key/value pair.
///
/// Equality, ordering and hashing look at the value only: `Str("a")`, `String("a")` and
/// `Shared("a")` are the same dimension.
#[derive(Debug, Clone)]
pub enum Dimension {
    /// A static string dimension. Feel really good about these.
    Str(&'static str),
    /// Avoid String dimensions when you can, as clones can add up.
    String(String),
    /// If you have a rarely-changing identifier you could consider using shared memory
    /// instead of cloning repeatedly.
    Shared(Arc<String>),
    /// A number dimension.
    Number(u64),
    /// A boolean dimension.
    Boolean(bool),
}

impl Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::Str(s) => write!(f, "{s}"),
            Dimension::String(s) => write!(f, "{s}"),
            Dimension::Shared(s) => write!(f, "{s}"),
            Dimension::Number(n) => write!(f, "{n}"),
            Dimension::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// An identifier for instruments and attribute keys.
///
/// Like [`Dimension`], names compare by their text regardless of how they are stored.
#[derive(Debug, Clone)]
pub enum Name {
    /// A static string Name.
    Str(&'static str),
    /// A String name. Avoid these when you can, because clones can add up.
    String(String),
    /// If you have a rarely-changing identifier you could consider using shared memory
    /// instead of cloning repeatedly.
    Shared(Arc<String>),
}

/// An attribute set: a unique, ordered set of key/value pairs attached to a measurement.
///
/// Two measurements on the same instrument with equal attribute sets land in the same series.
pub type DimensionPosition = BTreeMap<Name, Dimension>;

impl Name {
    /// an &str view of the name
    pub fn as_str(&self) -> &str {
        match self {
            Name::Str(s) => s,
            Name::String(s) => s,
            Name::Shared(s) => s,
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
enum DimensionKey<'a> {
    Text(&'a str),
    Number(u64),
    Boolean(bool),
}

impl Dimension {
    fn key(&self) -> DimensionKey<'_> {
        match self {
            Dimension::Str(s) => DimensionKey::Text(s),
            Dimension::String(s) => DimensionKey::Text(s),
            Dimension::Shared(s) => DimensionKey::Text(s),
            Dimension::Number(n) => DimensionKey::Number(*n),
            Dimension::Boolean(b) => DimensionKey::Boolean(*b),
        }
    }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Dimension {}

impl PartialOrd for Dimension {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dimension {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for Dimension {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        match name {
            Name::Str(s) => s.to_owned(),
            Name::String(s) => s,
            Name::Shared(s) => {
                std::sync::Arc::<String>::try_unwrap(s).unwrap_or_else(|this| this.to_string())
            }
        }
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for Name {
    #[inline]
    fn from(s: &'static str) -> Self {
        Self::Str(s)
    }
}

impl From<String> for Name {
    #[inline]
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Arc<String>> for Name {
    #[inline]
    fn from(s: Arc<String>) -> Self {
        Self::Shared(s)
    }
}

impl From<&'static str> for Dimension {
    #[inline]
    fn from(s: &'static str) -> Self {
        Self::Str(s)
    }
}

impl From<String> for Dimension {
    #[inline]
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Arc<String>> for Dimension {
    #[inline]
    fn from(s: Arc<String>) -> Self {
        Self::Shared(s)
    }
}

impl From<u64> for Dimension {
    #[inline]
    fn from(n: u64) -> Self {
        Dimension::Number(n)
    }
}

impl From<u32> for Dimension {
    #[inline]
    fn from(n: u32) -> Self {
        Dimension::Number(n as u64)
    }
}

impl From<u16> for Dimension {
    #[inline]
    fn from(n: u16) -> Self {
        Dimension::Number(n as u64)
    }
}

impl From<u8> for Dimension {
    #[inline]
    fn from(n: u8) -> Self {
        Dimension::Number(n as u64)
    }
}

impl From<bool> for Dimension {
    #[inline]
    fn from(b: bool) -> Self {
        Dimension::Boolean(b)
    }
}

/// Build an attribute set from key/value pairs.
///
/// ```
/// # use meterkit::types::{attributes, Dimension, Name};
/// let attributes = attributes([("method", Dimension::from("GET")), ("status_code", 200_u16.into())]);
/// assert_eq!(Some(&Dimension::Number(200)), attributes.get(&Name::from("status_code")));
/// ```
pub fn attributes(
    pairs: impl IntoIterator<Item = (impl Into<Name>, impl Into<Dimension>)>,
) -> DimensionPosition {
    pairs
        .into_iter()
        .map(|(name, dimension)| (name.into(), dimension.into()))
        .collect()
}
