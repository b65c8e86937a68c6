//! Chunk metadata: a restricted tagged value model and its TLV codec.
//!
//! Meta values are deliberately not a language-native dynamic map. Each value
//! is one of five tagged scalars, and a `ChunkMeta` record is serialized as
//! length-prefixed TLV so readers can decode it without a schema.
//!
//! # Wire format (little-endian)
//!
//! | Field | Encoding |
//! |-------|----------|
//! | field_count | u16 |
//! | field | key string, tag u8, value body |
//! | tag_count | u16 |
//! | tag | string |
//!
//! Strings are `u32` length followed by UTF-8 bytes. Value bodies: Null has
//! none, Bool is one byte, I64/F64 are 8 LE bytes, Str is a string.

use crate::error::{MemPackError, MemPackResult};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_F64: u8 = 3;
const TAG_STR: u8 = 4;

/// A metadata value: the restricted JSON-scalar subset.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl MetaValue {
    fn wire_tag(&self) -> u8 {
        match self {
            Self::Null => TAG_NULL,
            Self::Bool(_) => TAG_BOOL,
            Self::I64(_) => TAG_I64,
            Self::F64(_) => TAG_F64,
            Self::Str(_) => TAG_STR,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

/// Metadata attached to a chunk: sorted key/value fields plus a tag set.
///
/// Fields are kept sorted by key so serialization is canonical; building the
/// same meta twice yields identical bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkMeta {
    fields: Vec<(String, MetaValue)>,
    tags: Vec<String>,
}

impl ChunkMeta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping keys sorted.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.binary_search_by(|(k, _)| k.as_str().cmp(&key)) {
            Ok(idx) => self.fields[idx].1 = value,
            Err(idx) => self.fields.insert(idx, (key, value)),
        }
    }

    /// Builder-style `set`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| &self.fields[idx].1)
    }

    /// Add a tag if not already present, keeping tags sorted.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if let Err(idx) = self.tags.binary_search(&tag) {
            self.tags.insert(idx, tag);
        }
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.binary_search_by(|t| t.as_str().cmp(tag)).is_ok()
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, MetaValue)] {
        &self.fields
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// True when every `(key, value)` pair in `filter` matches this meta.
    #[must_use]
    pub fn matches_all(&self, filter: &[(String, MetaValue)]) -> bool {
        filter.iter().all(|(k, v)| self.get(k) == Some(v))
    }

    /// Serialize to the TLV wire format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());
        for (key, value) in &self.fields {
            write_str(&mut buf, key);
            buf.push(value.wire_tag());
            match value {
                MetaValue::Null => {}
                MetaValue::Bool(b) => buf.push(u8::from(*b)),
                MetaValue::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                MetaValue::F64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                MetaValue::Str(s) => write_str(&mut buf, s),
            }
        }
        buf.extend_from_slice(&(self.tags.len() as u16).to_le_bytes());
        for tag in &self.tags {
            write_str(&mut buf, tag);
        }
        buf
    }

    /// Decode from the TLV wire format.
    pub fn from_bytes(bytes: &[u8]) -> MemPackResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let field_count = cursor.read_u16()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let key = cursor.read_string()?;
            let tag = cursor.read_u8()?;
            let value = match tag {
                TAG_NULL => MetaValue::Null,
                TAG_BOOL => MetaValue::Bool(cursor.read_u8()? != 0),
                TAG_I64 => MetaValue::I64(i64::from_le_bytes(cursor.read_array()?)),
                TAG_F64 => MetaValue::F64(f64::from_le_bytes(cursor.read_array()?)),
                TAG_STR => MetaValue::Str(cursor.read_string()?),
                other => {
                    return Err(MemPackError::HeaderCorrupt {
                        reason: format!("unknown meta value tag {other}"),
                    })
                }
            };
            fields.push((key, value));
        }
        let tag_count = cursor.read_u16()? as usize;
        let mut tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            tags.push(cursor.read_string()?);
        }
        Ok(Self { fields, tags })
    }
}

/// Minimal bounds-checked byte cursor for TLV decoding.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> MemPackResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(MemPackError::HeaderCorrupt {
                reason: "truncated meta record".to_string(),
            }),
        }
    }

    fn read_u8(&mut self) -> MemPackResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> MemPackResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_array<const N: usize>(&mut self) -> MemPackResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_string(&mut self) -> MemPackResult<String> {
        let len = u32::from_le_bytes(self.read_array()?) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MemPackError::HeaderCorrupt {
            reason: "meta string is not valid UTF-8".to_string(),
        })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChunkMeta {
        ChunkMeta::new()
            .with("source", "quantum_computing.md")
            .with("position", 3i64)
            .with("score", 0.5f64)
            .with("draft", false)
            .with("note", MetaValue::Null)
    }

    #[test]
    fn round_trips_all_value_kinds() {
        let mut meta = sample();
        meta.add_tag("physics");
        meta.add_tag("notes");

        let decoded = ChunkMeta::from_bytes(&meta.to_bytes()).unwrap();
        assert_eq!(decoded, meta);
        assert!(decoded.has_tag("physics"));
        assert_eq!(
            decoded.get("source"),
            Some(&MetaValue::Str("quantum_computing.md".into()))
        );
    }

    #[test]
    fn serialization_is_canonical() {
        let a = ChunkMeta::new().with("b", 1i64).with("a", 2i64);
        let b = ChunkMeta::new().with("a", 2i64).with("b", 1i64);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn set_replaces_existing_key() {
        let meta = ChunkMeta::new().with("k", 1i64).with("k", 2i64);
        assert_eq!(meta.get("k"), Some(&MetaValue::I64(2)));
        assert_eq!(meta.fields().len(), 1);
    }

    #[test]
    fn matches_all_requires_every_pair() {
        let meta = sample();
        let filter = vec![("position".to_string(), MetaValue::I64(3))];
        assert!(meta.matches_all(&filter));

        let wrong = vec![
            ("position".to_string(), MetaValue::I64(3)),
            ("draft".to_string(), MetaValue::Bool(true)),
        ];
        assert!(!meta.matches_all(&wrong));
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = sample().to_bytes();
        assert!(ChunkMeta::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(ChunkMeta::from_bytes(&[0x05]).is_err());
    }
}
