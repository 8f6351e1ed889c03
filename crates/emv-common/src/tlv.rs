//! BER-TLV (ISO/IEC 8825-1) decoding and encoding
//!
//! EMV responses are sequences of tag-length-value objects. Constructed tags
//! (bit 6 of the first tag byte set) carry a nested sequence of objects and are
//! decoded recursively; primitive tags keep their value bytes untouched.
//!
//! Decoding never panics on malformed input. [`decode`] returns everything it
//! managed to parse together with the error that stopped it, so callers can
//! decide whether a partial result is still useful.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Maximum nesting of constructed tags accepted by the decoder
pub const MAX_DEPTH: usize = 32;

/// Errors raised while decoding BER-TLV data
///
/// Offsets are absolute positions in the buffer handed to the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("tag at offset {offset} is longer than 3 bytes")]
    TagTooLong { offset: usize },

    #[error("indefinite length at offset {offset} is not supported")]
    IndefiniteLength { offset: usize },

    #[error("length field at offset {offset} uses {count} bytes (at most 4 allowed)")]
    LengthFieldTooLong { offset: usize, count: usize },

    #[error("value at offset {offset} declares {declared} bytes but only {available} remain")]
    ValueOverrun {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("constructed tags nested deeper than {MAX_DEPTH} levels at offset {offset}")]
    DepthExceeded { offset: usize },

    #[error("data object list at offset {offset} requests {total} bytes (at most 255 allowed)")]
    DataObjectListTooLong { offset: usize, total: usize },
}

/// Tag class (bits 8-7 of the first tag byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

/// A 1 to 3 byte tag identifier, stored big-endian in a `u32`
///
/// `TagId::new(0x9F38)` is the two byte tag `9F 38`. The byte length is
/// derived from the magnitude of the value, which is unambiguous for valid
/// tags since a multi-byte tag never starts with `00`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(u32);

impl TagId {
    /// Create a tag identifier from its big-endian numeric form
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Parse a tag identifier that must span exactly `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (id, next) = read_tag(bytes, 0)?;
        if next != bytes.len() {
            return Err(DecodeError::TagTooLong { offset: 0 });
        }
        Ok(id)
    }

    /// Numeric value of the tag (e.g. `0x9F38`)
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Number of bytes in the encoded tag
    pub const fn byte_len(self) -> usize {
        if self.0 > 0xFFFF {
            3
        } else if self.0 > 0xFF {
            2
        } else {
            1
        }
    }

    /// Encoded tag bytes
    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_be_bytes()[4 - self.byte_len()..].to_vec()
    }

    /// First byte of the encoded tag, which carries class and form bits
    pub const fn first_byte(self) -> u8 {
        (self.0 >> ((self.byte_len() - 1) * 8)) as u8
    }

    /// Whether the tag is constructed (holds nested TLV objects)
    pub const fn is_constructed(self) -> bool {
        self.first_byte() & 0x20 != 0
    }

    pub const fn class(self) -> TagClass {
        match self.first_byte() >> 6 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$X}", self.0, width = self.byte_len() * 2)
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self)
    }
}

impl Serialize for TagId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value of a decoded tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// Raw value bytes of a primitive tag
    Primitive(Vec<u8>),
    /// Child objects of a constructed tag, in encounter order
    Constructed(Vec<Tag>),
}

/// A single BER-TLV data object
///
/// `length` is the byte count of the raw value as it appeared on the wire
/// (or as it encodes, for tags built in memory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    id: TagId,
    length: usize,
    value: TagValue,
}

impl Tag {
    /// Create a primitive tag
    pub fn primitive(id: TagId, value: Vec<u8>) -> Self {
        Self {
            id,
            length: value.len(),
            value: TagValue::Primitive(value),
        }
    }

    /// Create a constructed tag from its children
    pub fn constructed(id: TagId, children: Vec<Tag>) -> Self {
        let length = children.iter().map(Tag::encoded_len).sum();
        Self {
            id,
            length,
            value: TagValue::Constructed(children),
        }
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    /// Length of the raw value in bytes
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn value(&self) -> &TagValue {
        &self.value
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.value, TagValue::Constructed(_))
    }

    /// Value bytes of a primitive tag
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            TagValue::Primitive(bytes) => Some(bytes),
            TagValue::Constructed(_) => None,
        }
    }

    /// Children of a constructed tag (empty for primitive tags)
    pub fn children(&self) -> &[Tag] {
        match &self.value {
            TagValue::Primitive(_) => &[],
            TagValue::Constructed(children) => children,
        }
    }

    /// Direct child with the given tag
    pub fn child(&self, id: TagId) -> Option<&Tag> {
        self.children().iter().find(|c| c.id == id)
    }

    /// Depth-first search for a tag, starting with `self`
    pub fn find(&self, id: TagId) -> Option<&Tag> {
        if self.id == id {
            return Some(self);
        }
        find_tag(self.children(), id)
    }

    /// Value bytes as they would be encoded (children re-encoded for
    /// constructed tags)
    pub fn value_bytes(&self) -> Vec<u8> {
        match &self.value {
            TagValue::Primitive(bytes) => bytes.clone(),
            TagValue::Constructed(children) => encode_all(children),
        }
    }

    /// Size of this object once encoded
    pub fn encoded_len(&self) -> usize {
        let content = self.content_len();
        self.id.byte_len() + length_field_len(content) + content
    }

    /// Pre-order flattening of this tree as `(depth, tag)` pairs
    pub fn flatten(&self) -> Vec<(usize, &Tag)> {
        let mut out = Vec::new();
        self.flatten_into(0, &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a Tag)>) {
        out.push((depth, self));
        for child in self.children() {
            child.flatten_into(depth + 1, out);
        }
    }

    fn content_len(&self) -> usize {
        match &self.value {
            TagValue::Primitive(bytes) => bytes.len(),
            TagValue::Constructed(children) => children.iter().map(Tag::encoded_len).sum(),
        }
    }
}

/// Depth-first search for a tag across a sequence of trees
pub fn find_tag(tags: &[Tag], id: TagId) -> Option<&Tag> {
    tags.iter().find_map(|t| t.find(id))
}

/// Every occurrence of a tag across a sequence of trees, in pre-order
pub fn find_all(tags: &[Tag], id: TagId) -> Vec<&Tag> {
    tags.iter()
        .flat_map(Tag::flatten)
        .filter_map(|(_, t)| (t.id == id).then_some(t))
        .collect()
}

/// Result of decoding a buffer
///
/// `tags` holds every top-level object decoded before `error` (if any)
/// stopped the decoder; `consumed` is the offset where decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub tags: Vec<Tag>,
    pub consumed: usize,
    pub error: Option<DecodeError>,
}

impl Decoded {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Discard partial results if decoding did not finish cleanly
    pub fn into_result(self) -> Result<Vec<Tag>, DecodeError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.tags),
        }
    }
}

/// Decode a buffer into a sequence of tag trees
pub fn decode(data: &[u8]) -> Decoded {
    let mut tags = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if is_padding(data[offset]) {
            offset += 1;
            continue;
        }
        match decode_at(data, offset, data.len(), 0) {
            Ok((tag, next)) => {
                tags.push(tag);
                offset = next;
            }
            Err(error) => {
                return Decoded {
                    tags,
                    consumed: offset,
                    error: Some(error),
                };
            }
        }
    }

    Decoded {
        tags,
        consumed: offset,
        error: None,
    }
}

/// Decode the single object starting at `offset`, returning it and the
/// offset of the byte that follows it
pub fn decode_one(data: &[u8], offset: usize) -> Result<(Tag, usize), DecodeError> {
    decode_at(data, offset, data.len(), 0)
}

/// Read a tag identifier at `offset`, returning it and the next offset
pub fn read_tag(data: &[u8], offset: usize) -> Result<(TagId, usize), DecodeError> {
    parse_tag(data, offset, data.len())
}

/// Encode a single tag tree
pub fn encode(tag: &Tag) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.encoded_len());
    encode_into(tag, &mut out);
    out
}

/// Encode a sequence of tag trees back to back
pub fn encode_all(tags: &[Tag]) -> Vec<u8> {
    let mut out = Vec::new();
    for tag in tags {
        encode_into(tag, &mut out);
    }
    out
}

/// Encode a length field (short form below 128, long form otherwise)
pub fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = (length as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode_into(tag: &Tag, out: &mut Vec<u8>) {
    out.extend_from_slice(&tag.id.to_bytes());
    encode_length(tag.content_len(), out);
    match &tag.value {
        TagValue::Primitive(bytes) => out.extend_from_slice(bytes),
        TagValue::Constructed(children) => {
            for child in children {
                encode_into(child, out);
            }
        }
    }
}

fn length_field_len(length: usize) -> usize {
    if length < 0x80 {
        1
    } else {
        let significant = (usize::BITS - length.leading_zeros()).div_ceil(8) as usize;
        1 + significant
    }
}

// 00 filler between data objects (EMV Book 3 Annex B). FF starts a
// private constructed tag and is never skipped.
fn is_padding(byte: u8) -> bool {
    byte == 0x00
}

fn decode_at(
    data: &[u8],
    offset: usize,
    end: usize,
    depth: usize,
) -> Result<(Tag, usize), DecodeError> {
    if depth >= MAX_DEPTH {
        return Err(DecodeError::DepthExceeded { offset });
    }

    let (id, after_tag) = parse_tag(data, offset, end)?;
    let (length, value_start) = parse_length(data, after_tag, end)?;

    let available = end - value_start;
    if length > available {
        return Err(DecodeError::ValueOverrun {
            offset,
            declared: length,
            available,
        });
    }
    let value_end = value_start + length;

    let value = if id.is_constructed() {
        TagValue::Constructed(decode_children(data, value_start, value_end, depth + 1)?)
    } else {
        TagValue::Primitive(data[value_start..value_end].to_vec())
    };

    Ok((Tag { id, length, value }, value_end))
}

fn decode_children(
    data: &[u8],
    start: usize,
    end: usize,
    depth: usize,
) -> Result<Vec<Tag>, DecodeError> {
    let mut children = Vec::new();
    let mut offset = start;
    while offset < end {
        if is_padding(data[offset]) {
            offset += 1;
            continue;
        }
        let (child, next) = decode_at(data, offset, end, depth)?;
        children.push(child);
        offset = next;
    }
    Ok(children)
}

fn parse_tag(data: &[u8], offset: usize, end: usize) -> Result<(TagId, usize), DecodeError> {
    if offset >= end {
        return Err(DecodeError::UnexpectedEnd { offset });
    }
    let first = data[offset];
    if first & 0x1F != 0x1F {
        return Ok((TagId(first as u32), offset + 1));
    }

    // Subsequent bytes continue while bit 8 is set
    let mut value = first as u32;
    let mut pos = offset + 1;
    loop {
        if pos - offset >= 3 {
            return Err(DecodeError::TagTooLong { offset });
        }
        if pos >= end {
            return Err(DecodeError::UnexpectedEnd { offset: pos });
        }
        let byte = data[pos];
        value = (value << 8) | byte as u32;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((TagId(value), pos))
}

fn parse_length(data: &[u8], offset: usize, end: usize) -> Result<(usize, usize), DecodeError> {
    if offset >= end {
        return Err(DecodeError::UnexpectedEnd { offset });
    }
    let first = data[offset];
    if first & 0x80 == 0 {
        return Ok((first as usize, offset + 1));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 {
        return Err(DecodeError::IndefiniteLength { offset });
    }
    if count > 4 {
        return Err(DecodeError::LengthFieldTooLong { offset, count });
    }
    if offset + 1 + count > end {
        return Err(DecodeError::UnexpectedEnd { offset });
    }

    let length = data[offset + 1..offset + 1 + count]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((length, offset + 1 + count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_byte_tag() {
        let mut data = vec![0x5F, 0x20, 0x0A];
        data.extend_from_slice(b"CARDHOLDER");

        let tags = decode(&data).into_result().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id(), TagId::new(0x5F20));
        assert_eq!(tags[0].length(), 10);
        assert_eq!(tags[0].bytes(), Some(&b"CARDHOLDER"[..]));
        assert!(!tags[0].is_constructed());
    }

    #[test]
    fn test_constructed_recursion() {
        let data = [0x70, 0x07, 0x5A, 0x05, 0x11, 0x22, 0x33, 0x44, 0x55];
        let tags = decode(&data).into_result().unwrap();

        assert_eq!(tags.len(), 1);
        let record = &tags[0];
        assert_eq!(record.id(), TagId::new(0x70));
        assert!(record.is_constructed());
        assert_eq!(record.children().len(), 1);

        let pan = &record.children()[0];
        assert_eq!(pan.id(), TagId::new(0x5A));
        assert_eq!(pan.bytes(), Some(&[0x11, 0x22, 0x33, 0x44, 0x55][..]));
    }

    #[test]
    fn test_constructed_length_past_children_is_overrun() {
        // Outer length 0A claims more than the 7 bytes that follow
        let data = [0x70, 0x0A, 0x5A, 0x05, 0x11, 0x22, 0x33, 0x44, 0x55];
        let decoded = decode(&data);
        assert!(decoded.tags.is_empty());
        assert_eq!(
            decoded.error,
            Some(DecodeError::ValueOverrun {
                offset: 0,
                declared: 10,
                available: 7
            })
        );
    }

    #[test]
    fn test_three_byte_tag() {
        let data = [0xDF, 0x81, 0x01, 0x01, 0xAA];
        let (tag, next) = decode_one(&data, 0).unwrap();
        assert_eq!(tag.id(), TagId::new(0xDF8101));
        assert_eq!(tag.id().byte_len(), 3);
        assert_eq!(next, 5);
    }

    #[test]
    fn test_tag_too_long_keeps_partial_result() {
        let data = [0x5A, 0x01, 0x11, 0xDF, 0x81, 0x81, 0x01, 0x01, 0xAA];
        let decoded = decode(&data);
        assert_eq!(decoded.tags.len(), 1);
        assert_eq!(decoded.consumed, 3);
        assert_eq!(decoded.error, Some(DecodeError::TagTooLong { offset: 3 }));
    }

    #[test]
    fn test_length_bound_safety() {
        for data in [
            &[0x5A, 0x05, 0x11, 0x22][..],
            &[0x5A, 0x81, 0xFF, 0x00][..],
            &[0x5A, 0x84, 0xFF, 0xFF, 0xFF, 0xFF, 0x00][..],
            &[0x9F][..],
            &[0x5A, 0x82, 0x01][..],
        ] {
            let decoded = decode(data);
            assert!(decoded.error.is_some(), "expected error for {:02X?}", data);
        }
    }

    #[test]
    fn test_indefinite_and_oversized_length() {
        assert_eq!(
            decode(&[0x70, 0x80, 0x00, 0x00]).error,
            Some(DecodeError::IndefiniteLength { offset: 1 })
        );
        assert_eq!(
            decode(&[0x5A, 0x85, 0, 0, 0, 0, 1, 0xAA]).error,
            Some(DecodeError::LengthFieldTooLong { offset: 1, count: 5 })
        );
    }

    #[test]
    fn test_long_form_length() {
        let value = vec![0xAB; 200];
        let mut data = vec![0x90, 0x81, 0xC8];
        data.extend_from_slice(&value);

        let tags = decode(&data).into_result().unwrap();
        assert_eq!(tags[0].length(), 200);
        assert_eq!(encode(&tags[0]), data);
    }

    #[test]
    fn test_depth_limit() {
        let mut tree = Tag::primitive(TagId::new(0x5A), vec![0x01]);
        for _ in 0..(MAX_DEPTH + 4) {
            tree = Tag::constructed(TagId::new(0x70), vec![tree]);
        }
        let decoded = decode(&encode(&tree));
        assert!(matches!(
            decoded.error,
            Some(DecodeError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn test_padding_is_skipped() {
        let data = [0x00, 0x5A, 0x01, 0x11, 0x00, 0x00, 0x50, 0x01, 0x41, 0x00];
        let tags = decode(&data).into_result().unwrap();
        let ids: Vec<_> = tags.iter().map(Tag::id).collect();
        assert_eq!(ids, vec![TagId::new(0x5A), TagId::new(0x50)]);
    }

    #[test]
    fn test_ff_starts_a_private_tag() {
        let data = [0xFF, 0x01, 0x03, 0x5A, 0x01, 0x11];
        let tags = decode(&data).into_result().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id(), TagId::new(0xFF01));
        assert!(tags[0].id().is_constructed());
        assert_eq!(
            find_tag(&tags, TagId::new(0x5A)).and_then(Tag::bytes),
            Some(&[0x11][..])
        );

        // A trailing FF is a truncated tag, not filler
        let decoded = decode(&[0x5A, 0x01, 0x11, 0xFF]);
        assert_eq!(decoded.tags.len(), 1);
        assert_eq!(decoded.error, Some(DecodeError::UnexpectedEnd { offset: 4 }));
    }

    #[test]
    fn test_round_trip() {
        let tree = Tag::constructed(
            TagId::new(0x6F),
            vec![
                Tag::primitive(TagId::new(0x84), b"2PAY.SYS.DDF01".to_vec()),
                Tag::constructed(
                    TagId::new(0xA5),
                    vec![Tag::constructed(
                        TagId::new(0xBF0C),
                        vec![Tag::constructed(
                            TagId::new(0x61),
                            vec![
                                Tag::primitive(
                                    TagId::new(0x4F),
                                    vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10],
                                ),
                                Tag::primitive(TagId::new(0x87), vec![0x01]),
                                Tag::primitive(TagId::new(0x9F0A), vec![0xFF; 150]),
                            ],
                        )],
                    )],
                ),
                Tag::constructed(
                    TagId::new(0xFF01),
                    vec![Tag::primitive(TagId::new(0x5A), vec![0x11])],
                ),
            ],
        );

        let encoded = encode(&tree);
        assert_eq!(encoded.len(), tree.encoded_len());
        let decoded = decode(&encoded).into_result().unwrap();
        assert_eq!(decoded, vec![tree]);
    }

    #[test]
    fn test_find_and_flatten() {
        let data = [
            0x70, 0x0C, 0x61, 0x05, 0x4F, 0x03, 0xA0, 0x00, 0x01, 0x61, 0x03, 0x4F, 0x01, 0x02,
        ];
        let tags = decode(&data).into_result().unwrap();

        let aids = find_all(&tags, TagId::new(0x4F));
        assert_eq!(aids.len(), 2);
        assert_eq!(aids[1].bytes(), Some(&[0x02][..]));
        assert_eq!(
            find_tag(&tags, TagId::new(0x4F)).and_then(Tag::bytes),
            Some(&[0xA0, 0x00, 0x01][..])
        );

        let depths: Vec<_> = tags[0].flatten().iter().map(|(d, _)| *d).collect();
        assert_eq!(depths, vec![0, 1, 2, 1, 2]);
    }

    #[test]
    fn test_tag_id_properties() {
        let pdol = TagId::new(0x9F38);
        assert_eq!(pdol.to_bytes(), vec![0x9F, 0x38]);
        assert_eq!(pdol.to_string(), "9F38");
        assert_eq!(pdol.class(), TagClass::ContextSpecific);
        assert!(!pdol.is_constructed());
        assert!(TagId::new(0xBF0C).is_constructed());
        assert_eq!(TagId::new(0x4F).to_string(), "4F");
        assert_eq!(TagId::from_bytes(&[0x9F, 0x38]), Ok(pdol));
        assert!(TagId::from_bytes(&[0x9F]).is_err());
    }
}
