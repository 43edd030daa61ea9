//! # Option Container
//!
//! ## Purpose
//!
//! Ordered `(number, value)` list carried by every message. Numbers may repeat
//! (Uri-Path, Uri-Query, ETag, ...), and the relative order of repeated numbers
//! is meaningful: `/a/b` and `/b/a` differ only in Uri-Path order.
//!
//! ## Ordering Invariant
//!
//! Both framings delta-encode option numbers, so the wire requires ascending
//! numbers. [`Options::add`] keeps the list sorted by inserting after the last
//! option whose number is `<=` the new one, which also preserves insertion
//! order among equal numbers. [`Options::push`] appends blindly and is meant
//! for decoders that already read options in wire order.

use crate::error::{TypesError, TypesResult};
use bytes::Bytes;
use std::fmt;

/// Largest option value the option codec can express (2-byte extension + 269)
pub const MAX_OPTION_VALUE_SIZE: usize = 65535 + 269;

/// Registered option number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OptionId(pub u16);

impl OptionId {
    pub const IF_MATCH: OptionId = OptionId(1);
    pub const URI_HOST: OptionId = OptionId(3);
    pub const ETAG: OptionId = OptionId(4);
    pub const IF_NONE_MATCH: OptionId = OptionId(5);
    pub const OBSERVE: OptionId = OptionId(6);
    pub const URI_PORT: OptionId = OptionId(7);
    pub const LOCATION_PATH: OptionId = OptionId(8);
    pub const URI_PATH: OptionId = OptionId(11);
    pub const CONTENT_FORMAT: OptionId = OptionId(12);
    pub const MAX_AGE: OptionId = OptionId(14);
    pub const URI_QUERY: OptionId = OptionId(15);
    pub const ACCEPT: OptionId = OptionId(17);
    pub const LOCATION_QUERY: OptionId = OptionId(20);
    pub const BLOCK2: OptionId = OptionId(23);
    pub const BLOCK1: OptionId = OptionId(27);
    pub const SIZE2: OptionId = OptionId(28);
    pub const PROXY_URI: OptionId = OptionId(35);
    pub const PROXY_SCHEME: OptionId = OptionId(39);
    pub const SIZE1: OptionId = OptionId(60);

    /// Critical options must be understood by the receiver (odd numbers)
    pub const fn is_critical(self) -> bool {
        self.0 & 0x01 == 0x01
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            OptionId::IF_MATCH => "If-Match",
            OptionId::URI_HOST => "Uri-Host",
            OptionId::ETAG => "ETag",
            OptionId::IF_NONE_MATCH => "If-None-Match",
            OptionId::OBSERVE => "Observe",
            OptionId::URI_PORT => "Uri-Port",
            OptionId::LOCATION_PATH => "Location-Path",
            OptionId::URI_PATH => "Uri-Path",
            OptionId::CONTENT_FORMAT => "Content-Format",
            OptionId::MAX_AGE => "Max-Age",
            OptionId::URI_QUERY => "Uri-Query",
            OptionId::ACCEPT => "Accept",
            OptionId::LOCATION_QUERY => "Location-Query",
            OptionId::BLOCK2 => "Block2",
            OptionId::BLOCK1 => "Block1",
            OptionId::SIZE2 => "Size2",
            OptionId::PROXY_URI => "Proxy-Uri",
            OptionId::PROXY_SCHEME => "Proxy-Scheme",
            OptionId::SIZE1 => "Size1",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Option({})", self.0),
        }
    }
}

/// A single option instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub id: OptionId,
    pub value: Bytes,
}

impl CoapOption {
    pub fn new(id: OptionId, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

/// Ordered option list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Options {
    items: Vec<CoapOption>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CoapOption> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[CoapOption] {
        &self.items
    }

    /// Drop every option but keep the allocation
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Insert an option in ascending position, after existing options with the same number
    pub fn add(&mut self, id: OptionId, value: impl Into<Bytes>) -> TypesResult<()> {
        let value = value.into();
        check_value_len(id, &value)?;
        let position = self.items.partition_point(|opt| opt.id <= id);
        self.items.insert(position, CoapOption { id, value });
        Ok(())
    }

    /// Append without reordering; used by decoders that already read in wire order
    pub fn push(&mut self, option: CoapOption) {
        self.items.push(option);
    }

    /// Replace every option with this number by a single value
    pub fn set(&mut self, id: OptionId, value: impl Into<Bytes>) -> TypesResult<()> {
        let value = value.into();
        check_value_len(id, &value)?;
        self.remove(id);
        let position = self.items.partition_point(|opt| opt.id <= id);
        self.items.insert(position, CoapOption { id, value });
        Ok(())
    }

    /// Remove all options with this number, returning how many were removed
    pub fn remove(&mut self, id: OptionId) -> usize {
        let before = self.items.len();
        self.items.retain(|opt| opt.id != id);
        before - self.items.len()
    }

    pub fn has(&self, id: OptionId) -> bool {
        self.items.iter().any(|opt| opt.id == id)
    }

    /// First value for this number
    pub fn get(&self, id: OptionId) -> Option<&Bytes> {
        self.items.iter().find(|opt| opt.id == id).map(|opt| &opt.value)
    }

    /// Every value for this number, in list order
    pub fn get_all(&self, id: OptionId) -> impl Iterator<Item = &Bytes> + '_ {
        self.items
            .iter()
            .filter(move |opt| opt.id == id)
            .map(|opt| &opt.value)
    }

    /// Decode the first value for this number as a big-endian uint
    pub fn get_uint(&self, id: OptionId) -> TypesResult<Option<u32>> {
        match self.get(id) {
            Some(value) => decode_uint(id, value).map(Some),
            None => Ok(None),
        }
    }

    /// Replace this number with a minimally encoded uint
    pub fn set_uint(&mut self, id: OptionId, value: u32) -> TypesResult<()> {
        self.set(id, encode_uint(value))
    }

    /// Make this list equal to `other`, reusing the allocation
    pub fn reset_to(&mut self, other: &Options) {
        self.items.clear();
        self.items.extend(other.items.iter().cloned());
    }

    /// Copy that owns fresh storage for every value
    ///
    /// `Clone` shares value storage with the source, which may pin a pooled
    /// decode buffer. Use this when the copy outlives the source message.
    pub fn deep_clone(&self) -> Options {
        Options {
            items: self
                .items
                .iter()
                .map(|opt| CoapOption {
                    id: opt.id,
                    value: Bytes::copy_from_slice(&opt.value),
                })
                .collect(),
        }
    }

    /// True when numbers never decrease, which delta encoding requires
    pub fn is_sorted(&self) -> bool {
        self.items.windows(2).all(|pair| pair[0].id <= pair[1].id)
    }
}

impl<'a> IntoIterator for &'a Options {
    type Item = &'a CoapOption;
    type IntoIter = std::slice::Iter<'a, CoapOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, opt) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", opt.id, hex::encode(&opt.value))?;
        }
        f.write_str("]")
    }
}

fn check_value_len(id: OptionId, value: &Bytes) -> TypesResult<()> {
    if value.len() > MAX_OPTION_VALUE_SIZE {
        return Err(TypesError::OptionValueTooLong {
            option: id.0,
            size: value.len(),
            limit: MAX_OPTION_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Minimal big-endian encoding; zero encodes as an empty value
pub fn encode_uint(value: u32) -> Bytes {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Bytes::copy_from_slice(&bytes[skip..])
}

pub fn decode_uint(id: OptionId, value: &[u8]) -> TypesResult<u32> {
    if value.len() > 4 {
        return Err(TypesError::InvalidUint {
            option: id.0,
            size: value.len(),
        });
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}
