//! Sorted-by-hash child lookup map embedded in directory records.
//!
//! Layout: `size: u64`, then `size` records of `(key_hash: u64, value: u64)`
//! sorted ascending by hash. The key hash is **XXH64 with seed 0 over the
//! child name's UTF-8 bytes**; this choice is part of the on-disk format and
//! must not change, or existing archives become unreadable.
//!
//! Hashes collide, so lookup always verifies the candidate's full name: the
//! binary search finds the leftmost record of an equal-hash run, then each
//! record in the run is resolved to its node name and compared against the
//! query. The writer keeps one record per inserted name (a stable sort
//! preserves distinct colliding names), so the reader's name check is always
//! able to disambiguate.

use std::io::{self, Write};

use xxhash_rust::xxh64::xxh64;

use crate::codec::{write_u64, ByteReader};
use crate::error::{Error, Result};

/// Bytes occupied by the record-count header.
pub const HDR_SIZE: u64 = 8;

/// Bytes occupied by one `(key_hash, value)` record.
pub const REC_SIZE: u64 = 16;

/// The format's key hash.
pub fn hash_key(name: &str) -> u64 {
    xxh64(name.as_bytes(), 0)
}

/// Space an encoded map with `n` records occupies; used by the builder to
/// reserve room before child ids are known.
pub fn byte_size(n: u64) -> u64 {
    HDR_SIZE + REC_SIZE * n
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Accumulates `(name, value)` pairs and writes them hash-sorted.
#[derive(Default)]
pub struct MapWriter {
    entries: Vec<(u64, u64)>,
}

impl MapWriter {
    pub fn new() -> Self {
        MapWriter::default()
    }

    pub fn add(&mut self, key: &str, value: u64) {
        self.entries.push((hash_key(key), value));
    }

    #[cfg(test)]
    fn add_hashed(&mut self, hash: u64, value: u64) {
        self.entries.push((hash, value));
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the header and records. The sort is stable, so records with
    /// colliding hashes stay in insertion order.
    pub fn write<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.entries.sort_by_key(|&(h, _)| h);
        write_u64(out, self.entries.len() as u64)?;
        for &(hash, value) in &self.entries {
            write_u64(out, hash)?;
            write_u64(out, value)?;
        }
        Ok(())
    }
}

// ── Reader view ──────────────────────────────────────────────────────────────

/// Borrowed view over an encoded map inside a larger region.
#[derive(Clone, Copy)]
pub struct Map<'a> {
    records: &'a [u8],
    len: u64,
}

impl<'a> Map<'a> {
    /// Parses the map starting at `at` within `region`, validating that all
    /// records lie inside the region.
    pub fn parse(region: &'a [u8], at: usize) -> Result<Self> {
        let mut r = ByteReader::at(region, at)?;
        let len = r.read_u64()?;
        let bytes = len
            .checked_mul(REC_SIZE)
            .and_then(|b| usize::try_from(b).ok())
            .ok_or_else(|| Error::Malformed("child map record count overflows".into()))?;
        let start = r.pos();
        if start + bytes > region.len() {
            return Err(Error::Malformed(format!(
                "child map with {len} records extends past end of archive"
            )));
        }
        Ok(Map {
            records: &region[start..start + bytes],
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn hash_at(&self, idx: u64) -> u64 {
        let off = (idx * REC_SIZE) as usize;
        u64::from_le_bytes(self.records[off..off + 8].try_into().unwrap())
    }

    /// The value of the record at `idx` in hash order.
    pub fn value_at(&self, idx: u64) -> Result<u64> {
        if idx >= self.len {
            return Err(Error::NotFound(format!(
                "child map index {idx} out of range ({} records)",
                self.len
            )));
        }
        let off = (idx * REC_SIZE + 8) as usize;
        Ok(u64::from_le_bytes(self.records[off..off + 8].try_into().unwrap()))
    }

    /// Iterates `(key_hash, value)` records in hash order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, u64)> + 'a {
        let map = *self;
        (0..self.len).map(move |i| {
            let off = (i * REC_SIZE) as usize;
            (
                u64::from_le_bytes(map.records[off..off + 8].try_into().unwrap()),
                u64::from_le_bytes(map.records[off + 8..off + 16].try_into().unwrap()),
            )
        })
    }

    /// Looks up `key`, resolving candidate values to their full names via
    /// `resolve` (reading the named node from the archive). Returns the first
    /// record in the equal-hash run whose resolved name matches.
    pub fn get<F>(&self, key: &str, mut resolve: F) -> Result<Option<u64>>
    where
        F: FnMut(u64) -> Result<&'a str>,
    {
        let qhash = hash_key(key);
        // Leftmost record with hash >= qhash; equal-hash runs start here.
        let mut lo = 0u64;
        let mut hi = self.len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.hash_at(mid) < qhash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let mut idx = lo;
        while idx < self.len && self.hash_at(idx) == qhash {
            let value = self.value_at(idx)?;
            if resolve(value)? == key {
                return Ok(Some(value));
            }
            idx += 1;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(w: &mut MapWriter) -> Vec<u8> {
        let mut buf = Vec::new();
        w.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn records_are_sorted_by_hash() {
        let mut w = MapWriter::new();
        for (i, name) in ["zeta", "alpha", "midpoint", "a", "zz"].iter().enumerate() {
            w.add(name, i as u64);
        }
        let buf = encode(&mut w);
        let map = Map::parse(&buf, 0).unwrap();
        assert_eq!(map.len(), 5);
        let hashes: Vec<u64> = map.entries().map(|(h, _)| h).collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn lookup_resolves_names() {
        let names = ["one", "two", "three", "four"];
        let mut w = MapWriter::new();
        for (i, name) in names.iter().enumerate() {
            w.add(name, i as u64);
        }
        let buf = encode(&mut w);
        let map = Map::parse(&buf, 0).unwrap();
        let resolve = |v: u64| Ok(names[v as usize]);
        for (i, name) in names.iter().enumerate() {
            assert_eq!(map.get(name, resolve).unwrap(), Some(i as u64));
        }
        assert_eq!(map.get("five", resolve).unwrap(), None);
    }

    #[test]
    fn empty_map() {
        let mut w = MapWriter::new();
        let buf = encode(&mut w);
        let map = Map::parse(&buf, 0).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.get("x", |_| Ok("x")).unwrap(), None);
        assert!(map.value_at(0).is_err());
    }

    #[test]
    fn colliding_hashes_fall_back_to_name_check() {
        // Forge records that collide with the query's real hash; lookup must
        // scan the whole run and pick the record whose name matches.
        let qhash = hash_key("needle");
        let mut w = MapWriter::new();
        w.add_hashed(qhash.wrapping_sub(1), 10);
        w.add_hashed(qhash, 11);
        w.add_hashed(qhash, 12);
        w.add_hashed(qhash, 13);
        w.add_hashed(qhash.wrapping_add(1), 14);
        let buf = encode(&mut w);
        let map = Map::parse(&buf, 0).unwrap();

        let resolve = |v: u64| {
            Ok(match v {
                11 => "decoy",
                12 => "needle",
                13 => "needle2",
                _ => "other",
            })
        };
        assert_eq!(map.get("needle", resolve).unwrap(), Some(12));
        // A name hashing elsewhere is not found even though the run exists.
        assert_eq!(map.get("nothere", resolve).unwrap(), None);
    }

    #[test]
    fn truncated_region_is_malformed() {
        let mut w = MapWriter::new();
        w.add("a", 1);
        w.add("b", 2);
        let mut buf = encode(&mut w);
        buf.truncate(buf.len() - 1);
        assert!(Map::parse(&buf, 0).is_err());
    }
}
