//! The recursive value model and its TLV codec.

use super::{WireError, MAX_KEY_LEN};

pub(crate) const TYPE_BYTES: u8 = 1;
pub(crate) const TYPE_TABLE: u8 = 2;
pub(crate) const TYPE_LIST: u8 = 3;

/// A single RNDC wire value.
///
/// Leaves are byte strings; integers travel as their decimal ASCII
/// representation and are parsed on demand via [`Value::as_u32`] and
/// [`Value::as_u64`]. Lists appear only in decoded packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An opaque byte string (wire type 1).
    Bytes(Vec<u8>),
    /// A nested ordered table (wire type 2).
    Table(Table),
    /// An ordered sequence of bare values (wire type 3).
    List(Vec<Value>),
}

impl Value {
    /// Borrow the raw bytes of a string value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow a string value as UTF-8 text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    /// Parse a string value as a decimal ASCII integer.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.as_str()?.parse().ok()
    }

    /// Parse a string value as a decimal ASCII integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_str()?.parse().ok()
    }

    /// Borrow a table value.
    #[must_use]
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Borrow a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    fn wire_type(&self) -> u8 {
        match self {
            Value::Bytes(_) => TYPE_BYTES,
            Value::Table(_) => TYPE_TABLE,
            Value::List(_) => TYPE_LIST,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into_bytes())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Bytes(n.to_string().into_bytes())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Bytes(n.to_string().into_bytes())
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

/// An insertion-ordered mapping from short ASCII keys to [`Value`]s.
///
/// Order is preserved on the wire and round-trips through the codec. Keys
/// are unique; inserting an existing key replaces the value in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    entries: Vec<(String, Value)>,
}

impl Table {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Fetch a nested table.
    #[must_use]
    pub fn get_table(&self, key: &str) -> Option<&Table> {
        self.get(key)?.as_table()
    }

    /// Fetch a string value as UTF-8 text.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Fetch the raw bytes of a string value.
    #[must_use]
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key)?.as_bytes()
    }

    /// Fetch a decimal ASCII integer.
    #[must_use]
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)?.as_u32()
    }

    /// Insert a value, replacing any existing entry for the key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let at = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(at).1)
    }

    /// Fetch the table under `key`, inserting an empty one if the entry is
    /// absent or not a table.
    pub(crate) fn subtable_mut(&mut self, key: &str) -> &mut Table {
        if !matches!(self.get(key), Some(Value::Table(_))) {
            self.insert(key, Table::new());
        }
        match self.get_mut(key) {
            Some(Value::Table(t)) => t,
            _ => unreachable!("subtable was just inserted"),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Table {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Table::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

// ---- encoding ----

/// Append one `klen key value` entry.
pub(crate) fn encode_entry(out: &mut Vec<u8>, key: &str, value: &Value) -> Result<(), WireError> {
    if !key.is_ascii() {
        return Err(WireError::BadTableKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(WireError::KeyTooLong(key.to_owned()));
    }
    out.push(key.len() as u8);
    out.extend_from_slice(key.as_bytes());
    encode_value(out, value)
}

/// Append every entry of `table` in insertion order.
pub(crate) fn encode_table_body(out: &mut Vec<u8>, table: &Table) -> Result<(), WireError> {
    for (key, value) in table.iter() {
        encode_entry(out, key, value)?;
    }
    Ok(())
}

fn encode_value(out: &mut Vec<u8>, value: &Value) -> Result<(), WireError> {
    out.push(value.wire_type());
    match value {
        Value::Bytes(b) => {
            let len = u32::try_from(b.len()).map_err(|_| WireError::ValueTooLarge(b.len()))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(b);
            Ok(())
        }
        Value::Table(t) => {
            let slot = begin_len(out);
            encode_table_body(out, t)?;
            end_len(out, slot)
        }
        Value::List(items) => {
            let slot = begin_len(out);
            for item in items {
                encode_value(out, item)?;
            }
            end_len(out, slot)
        }
    }
}

/// Reserve a u32 length field, returning its offset for [`end_len`].
fn begin_len(out: &mut Vec<u8>) -> usize {
    let at = out.len();
    out.extend_from_slice(&[0u8; 4]);
    at
}

/// Backpatch the length field reserved at `at` with the bytes written since.
fn end_len(out: &mut [u8], at: usize) -> Result<(), WireError> {
    let len = out.len() - at - 4;
    let len = u32::try_from(len).map_err(|_| WireError::ValueTooLarge(len))?;
    out[at..at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

// ---- decoding ----

/// Bounds-checked cursor over an input buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::ShortRead {
                offset: self.pos,
                wanted: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32_be(&mut self) -> Result<u32, WireError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// Decode entries until the reader is exhausted.
pub(crate) fn decode_table_body(r: &mut Reader<'_>, depth: usize) -> Result<Table, WireError> {
    let mut table = Table::new();
    while !r.is_empty() {
        let klen = r.u8()? as usize;
        let key = String::from_utf8(r.take(klen)?.to_vec()).map_err(|_| WireError::BadTableKey)?;
        if !key.is_ascii() {
            return Err(WireError::BadTableKey);
        }
        if table.contains_key(&key) {
            return Err(WireError::DuplicateKey(key));
        }
        let value = decode_value(r, depth)?;
        table.entries.push((key, value));
    }
    Ok(table)
}

pub(crate) fn decode_value(r: &mut Reader<'_>, depth: usize) -> Result<Value, WireError> {
    if depth == 0 {
        return Err(WireError::DepthLimit);
    }
    let ty = r.u8()?;
    let vlen = r.u32_be()? as usize;
    let payload = r.take(vlen)?;
    match ty {
        TYPE_BYTES => Ok(Value::Bytes(payload.to_vec())),
        TYPE_TABLE => {
            let mut sub = Reader::new(payload);
            Ok(Value::Table(decode_table_body(&mut sub, depth - 1)?))
        }
        TYPE_LIST => {
            let mut sub = Reader::new(payload);
            let mut items = Vec::new();
            while !sub.is_empty() {
                items.push(decode_value(&mut sub, depth - 1)?);
            }
            Ok(Value::List(items))
        }
        other => Err(WireError::UnknownDataType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MAX_DEPTH;
    use proptest::prelude::*;

    fn round_trip(table: &Table) -> Table {
        let mut buf = Vec::new();
        encode_table_body(&mut buf, table).expect("encode");
        let mut r = Reader::new(&buf);
        decode_table_body(&mut r, MAX_DEPTH).expect("decode")
    }

    #[test]
    fn table_preserves_insertion_order() {
        let mut t = Table::new();
        t.insert("zeta", "1");
        t.insert("alpha", "2");
        t.insert("mid", "3");
        let keys: Vec<&str> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        // Replacement keeps the original slot.
        t.insert("alpha", "9");
        let keys: Vec<&str> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        assert_eq!(t.get_str("alpha"), Some("9"));
    }

    #[test]
    fn integers_travel_as_decimal_ascii() {
        let mut t = Table::new();
        t.insert("_nonce", 121u32);
        assert_eq!(t.get_bytes("_nonce"), Some(&b"121"[..]));
        assert_eq!(t.get_u32("_nonce"), Some(121));
    }

    #[test]
    fn nested_table_round_trip() {
        let mut inner = Table::new();
        inner.insert("type", "status");
        let mut outer = Table::new();
        outer.insert("_data", inner.clone());
        outer.insert("raw", vec![0u8, 255, 7]);
        let back = round_trip(&outer);
        assert_eq!(back, outer);
        assert_eq!(back.get_table("_data"), Some(&inner));
    }

    #[test]
    fn list_round_trip() {
        let mut t = Table::new();
        t.insert(
            "zones",
            Value::List(vec![Value::from("example.com"), Value::from("example.net")]),
        );
        assert_eq!(round_trip(&t), t);
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut buf = Vec::new();
        encode_entry(&mut buf, "cat", &Value::from("a")).unwrap();
        encode_entry(&mut buf, "cat", &Value::from("b")).unwrap();
        let mut r = Reader::new(&buf);
        let err = decode_table_body(&mut r, MAX_DEPTH).unwrap_err();
        assert!(matches!(err, WireError::DuplicateKey(k) if k == "cat"));
    }

    #[test]
    fn unknown_type_byte_rejected() {
        let buf = [3u8, b'c', b'a', b't', 9, 0, 0, 0, 0];
        let mut r = Reader::new(&buf);
        let err = decode_table_body(&mut r, MAX_DEPTH).unwrap_err();
        assert!(matches!(err, WireError::UnknownDataType(9)));
    }

    #[test]
    fn truncated_value_is_short_read() {
        let mut buf = Vec::new();
        encode_entry(&mut buf, "cat", &Value::from("meow")).unwrap();
        let cut = &buf[..buf.len() - 2];
        let mut r = Reader::new(cut);
        let err = decode_table_body(&mut r, MAX_DEPTH).unwrap_err();
        assert!(matches!(err, WireError::ShortRead { wanted: 2, .. }));
    }

    #[test]
    fn depth_limit_enforced() {
        let mut buf = Vec::new();
        // MAX_DEPTH + 1 nested tables around a single leaf.
        let mut v = Value::from("leaf");
        for _ in 0..=MAX_DEPTH {
            let mut t = Table::new();
            t.insert("n", v);
            v = Value::Table(t);
        }
        match &v {
            Value::Table(t) => encode_table_body(&mut buf, t).unwrap(),
            _ => unreachable!(),
        }
        let mut r = Reader::new(&buf);
        let err = decode_table_body(&mut r, MAX_DEPTH).unwrap_err();
        assert!(matches!(err, WireError::DepthLimit));
    }

    #[test]
    fn oversized_key_rejected_on_encode() {
        let mut buf = Vec::new();
        let key = "k".repeat(256);
        let err = encode_entry(&mut buf, &key, &Value::from("v")).unwrap_err();
        assert!(matches!(err, WireError::KeyTooLong(_)));
    }

    #[test]
    fn non_ascii_key_rejected_on_encode() {
        let mut buf = Vec::new();
        let err = encode_entry(&mut buf, "kéy", &Value::from("v")).unwrap_err();
        assert!(matches!(err, WireError::BadTableKey));
    }

    proptest! {
        #[test]
        fn prop_flat_table_round_trips(
            entries in prop::collection::vec(
                ("[a-z_]{1,12}", prop::collection::vec(any::<u8>(), 0..64)),
                0..8,
            )
        ) {
            let table: Table = entries.into_iter().collect();
            prop_assert_eq!(round_trip(&table), table);
        }

        #[test]
        fn prop_encode_is_deterministic(
            entries in prop::collection::vec(
                ("[a-z_]{1,12}", prop::collection::vec(any::<u8>(), 0..64)),
                0..8,
            )
        ) {
            let table: Table = entries.into_iter().collect();
            let mut a = Vec::new();
            let mut b = Vec::new();
            encode_table_body(&mut a, &table).unwrap();
            encode_table_body(&mut b, &table).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
