//! EMV Common - Tag registry and BER-TLV codec shared by the EMV crates
//!
//! This crate has no I/O. It turns raw card responses into tag trees and back,
//! and knows the names and formats of the EMV tags the engine works with.

pub mod tags;
pub mod tlv;

pub use tags::{get_tag_name, tag_format, TagFormat};
pub use tlv::{
    decode, decode_one, encode, encode_all, find_all, find_tag, DecodeError, Decoded, Tag,
    TagClass, TagId, TagValue,
};
