//! Header codec: the 16-byte prefix plus the JSON index.
//!
//! ## Index shapes
//!
//! Each JSON object in the index is matched against a closed set of shapes:
//!
//! | keys present                    | entry                  |
//! |---------------------------------|------------------------|
//! | `files`                         | [`Entry::Directory`]   |
//! | `link`                          | [`Entry::Symlink`]     |
//! | `size` + `offset`               | [`Entry::File`]        |
//! | `size` (+ optional `unpacked`)  | [`Entry::UnpackedFile`]|
//!
//! Anything else, including `offset` together with `"unpacked": true`, is
//! rejected as a corrupt header rather than guessed at.

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AsarError, Result};
use crate::io::ReadAt;

use super::structures::{Entry, HEADER_ALIGNMENT, HeaderPrefix, align_up};

/// A decoded header: the raw prefix and the entry tree it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub prefix: HeaderPrefix,
    pub root: Entry,
}

impl Header {
    /// Offset of the blob region from the start of the archive.
    pub fn base_offset(&self) -> u64 {
        self.prefix.base_offset()
    }
}

/// Encodes and decodes the archive header.
pub struct HeaderCodec;

impl HeaderCodec {
    /// Decode a header from the leading bytes of an archive.
    ///
    /// `bytes` may extend past the header; anything after the JSON index is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Header> {
        let prefix = HeaderPrefix::from_bytes(bytes)?;
        let start = HeaderPrefix::SIZE;
        let end = start + prefix.header_string_size as usize;
        if bytes.len() < end {
            return Err(AsarError::corrupt(format!(
                "index needs {} bytes, only {} available",
                prefix.header_string_size,
                bytes.len() - start
            )));
        }
        let root = Self::parse_index(&bytes[start..end])?;
        Ok(Header { prefix, root })
    }

    /// Read and decode the header from a random-access source.
    pub fn read<R: ReadAt + ?Sized>(reader: &R) -> Result<Header> {
        if reader.size() < HeaderPrefix::SIZE as u64 {
            return Err(AsarError::corrupt(format!(
                "archive is {} bytes, shorter than the {}-byte prefix",
                reader.size(),
                HeaderPrefix::SIZE
            )));
        }

        let mut prefix_buf = [0u8; HeaderPrefix::SIZE];
        reader.read_exact_at(0, &mut prefix_buf)?;
        let prefix = HeaderPrefix::from_bytes(&prefix_buf)?;

        let string_size = prefix.header_string_size as u64;
        if reader.size() < HeaderPrefix::SIZE as u64 + string_size {
            return Err(AsarError::corrupt(format!(
                "index needs {} bytes, archive has {} after the prefix",
                string_size,
                reader.size() - HeaderPrefix::SIZE as u64
            )));
        }

        let mut index = vec![0u8; string_size as usize];
        reader.read_exact_at(HeaderPrefix::SIZE as u64, &mut index)?;
        let root = Self::parse_index(&index)?;
        Ok(Header { prefix, root })
    }

    /// Encode an entry tree into prefix plus NUL-padded JSON index.
    pub fn encode(root: &Entry) -> Result<Vec<u8>> {
        if !root.is_dir() {
            return Err(AsarError::corrupt("root entry must be a directory"));
        }

        let json = serde_json::to_vec(&entry_to_json(root))?;
        let string_len = u32::try_from(json.len())
            .map_err(|_| AsarError::corrupt(format!("index of {} bytes exceeds u32", json.len())))?;
        let prefix = HeaderPrefix::for_string_len(string_len);

        let padded_len = align_up(json.len() as u64, HEADER_ALIGNMENT) as usize;
        let mut out = Vec::with_capacity(HeaderPrefix::SIZE + padded_len);
        out.extend_from_slice(&prefix.to_bytes());
        out.extend_from_slice(&json);
        out.resize(HeaderPrefix::SIZE + padded_len, 0);
        Ok(out)
    }

    fn parse_index(index: &[u8]) -> Result<Entry> {
        let text = std::str::from_utf8(index)
            .map_err(|e| AsarError::corrupt(format!("index is not UTF-8: {e}")))?;
        let StrictValue(value) = serde_json::from_str(text)
            .map_err(|e| AsarError::corrupt(format!("index is not valid JSON: {e}")))?;

        let root = entry_from_json("", &value)?;
        if !root.is_dir() {
            return Err(AsarError::corrupt("root entry is not a directory"));
        }
        Ok(root)
    }
}

/// JSON value that refuses duplicate object keys.
///
/// `serde_json::Value` keeps the last of two equal keys, which would silently
/// drop one of two same-named entries in a directory.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(StrictVisitor).map(StrictValue)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value without duplicate keys")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(StrictValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut obj = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            let StrictValue(value) = map.next_value()?;
            if obj.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate key {key:?}")));
            }
            obj.insert(key, value);
        }
        Ok(Value::Object(obj))
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

/// Entry names become path components on extraction, so they must be plain names.
fn validate_name(parent: &str, name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(AsarError::corrupt(format!(
            "invalid entry name {name:?} in {}",
            display_path(parent)
        )));
    }
    Ok(())
}

fn optional_flag(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<bool>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(AsarError::corrupt(format!(
            "{}: '{key}' must be a boolean, got {other}",
            display_path(path)
        ))),
    }
}

fn parse_offset(value: &Value, path: &str) -> Result<u64> {
    let parsed = match value {
        Value::String(s) => s.parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        AsarError::corrupt(format!("{}: invalid offset {value}", display_path(path)))
    })
}

fn entry_from_json(path: &str, value: &Value) -> Result<Entry> {
    let obj = value.as_object().ok_or_else(|| {
        AsarError::corrupt(format!("{}: entry is not an object", display_path(path)))
    })?;

    let has = |key: &str| obj.contains_key(key);

    if has("files") {
        if has("link") || has("offset") || has("size") {
            return Err(AsarError::corrupt(format!(
                "{}: directory entry carries file or link keys",
                display_path(path)
            )));
        }
        let files = obj["files"].as_object().ok_or_else(|| {
            AsarError::corrupt(format!("{}: 'files' is not an object", display_path(path)))
        })?;

        let mut children = BTreeMap::new();
        for (name, child) in files {
            validate_name(path, name)?;
            let child = entry_from_json(&join_path(path, name), child)?;
            children.insert(name.clone(), child);
        }
        return Ok(Entry::Directory(children));
    }

    if let Some(link) = obj.get("link") {
        if has("offset") || has("size") {
            return Err(AsarError::corrupt(format!(
                "{}: link entry carries file keys",
                display_path(path)
            )));
        }
        let link = link.as_str().ok_or_else(|| {
            AsarError::corrupt(format!("{}: 'link' is not a string", display_path(path)))
        })?;
        return Ok(Entry::Symlink { link: link.to_string() });
    }

    let Some(size) = obj.get("size") else {
        return Err(AsarError::corrupt(format!(
            "{}: entry matches no recognized shape",
            display_path(path)
        )));
    };
    let size = size.as_u64().ok_or_else(|| {
        AsarError::corrupt(format!("{}: invalid size {size}", display_path(path)))
    })?;
    let executable = optional_flag(obj, "executable", path)?.unwrap_or(false);
    let unpacked = optional_flag(obj, "unpacked", path)?;

    // exactly one of `offset` and unpacked; a missing flag without offset means unpacked
    match (obj.get("offset"), unpacked) {
        (Some(offset), None | Some(false)) => Ok(Entry::File {
            size,
            offset: parse_offset(offset, path)?,
            executable,
        }),
        (None, None | Some(true)) => Ok(Entry::UnpackedFile { size, executable }),
        (Some(_), Some(true)) => Err(AsarError::corrupt(format!(
            "{}: file is both packed and unpacked",
            display_path(path)
        ))),
        (None, Some(false)) => Err(AsarError::corrupt(format!(
            "{}: file has no offset but is marked as not unpacked",
            display_path(path)
        ))),
    }
}

// Keys are inserted in sorted order so the output is the same whether or not
// serde_json's map preserves insertion order.
fn entry_to_json(entry: &Entry) -> Value {
    let mut obj = Map::new();
    match entry {
        Entry::Directory(children) => {
            let files: Map<String, Value> = children
                .iter()
                .map(|(name, child)| (name.clone(), entry_to_json(child)))
                .collect();
            obj.insert("files".into(), Value::Object(files));
        }
        Entry::File { size, offset, executable } => {
            if *executable {
                obj.insert("executable".into(), Value::Bool(true));
            }
            obj.insert("offset".into(), Value::String(offset.to_string()));
            obj.insert("size".into(), Value::from(*size));
        }
        Entry::UnpackedFile { size, executable } => {
            if *executable {
                obj.insert("executable".into(), Value::Bool(true));
            }
            obj.insert("size".into(), Value::from(*size));
            obj.insert("unpacked".into(), Value::Bool(true));
        }
        Entry::Symlink { link } => {
            obj.insert("link".into(), Value::String(link.clone()));
        }
    }
    Value::Object(obj)
}
