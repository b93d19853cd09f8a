//! Key hash functions.
//!
//! Each store selects one of these to map keys onto pages. The numeric
//! codes are part of the engine's public surface and never change.

use crate::error::{EngineError, EngineResult};

/// A key hash function known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFunction {
    /// Table-based 32-bit CRC (MSB first).
    Crc32,
    /// Hash from ejb's hsearch.
    Ejb,
    /// Phong's linear congruential hash.
    Phong,
    /// OZ's sdbm hash.
    Oz,
    /// Chris Torek's hash.
    Torek,
    /// Fowler/Noll/Vo (FNV-1, 32 bit).
    Fnv,
    /// STL string hash.
    Stl,
    /// MD5 prefix.
    Md5,
    /// SHA-1 prefix.
    Sha1,
    /// Bob Jenkins' 1996 hash.
    Jenkins,
    /// Paul Hsieh's SuperFastHash.
    Hsieh,
}

impl HashFunction {
    /// Hash used for newly created stores.
    pub const DEFAULT: Self = Self::Fnv;

    /// Every hash function, in code order.
    pub const ALL: [Self; 11] = [
        Self::Crc32,
        Self::Ejb,
        Self::Phong,
        Self::Oz,
        Self::Torek,
        Self::Fnv,
        Self::Stl,
        Self::Md5,
        Self::Sha1,
        Self::Jenkins,
        Self::Hsieh,
    ];

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Crc32 => 0,
            Self::Ejb => 1,
            Self::Phong => 2,
            Self::Oz => 3,
            Self::Torek => 4,
            Self::Fnv => 5,
            Self::Stl => 6,
            Self::Md5 => 7,
            Self::Sha1 => 8,
            Self::Jenkins => 9,
            Self::Hsieh => 10,
        }
    }

    /// Looks up a hash function by numeric code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Hashes `key`.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for the digest-based functions (MD5, SHA-1),
    /// which this engine does not carry.
    pub fn hash(self, key: &[u8]) -> EngineResult<u32> {
        Ok(match self {
            Self::Crc32 => crc32(key),
            Self::Ejb => ejb(key),
            Self::Phong => phong(key),
            Self::Oz => oz(key),
            Self::Torek => torek(key),
            Self::Fnv => fnv(key),
            Self::Stl => stl(key),
            Self::Jenkins => jenkins(key),
            Self::Hsieh => super_fast(key),
            Self::Md5 | Self::Sha1 => {
                return Err(EngineError::unsupported(format!(
                    "hash function {self:?} ({})",
                    self.code()
                )))
            }
        })
    }
}

impl Default for HashFunction {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const CRC32_POLY: u32 = 0x04c1_1db7;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

fn crc32(key: &[u8]) -> u32 {
    key.iter().fold(!0u32, |crc, &b| {
        (crc << 8) ^ CRC32_TABLE[((crc >> 24) ^ u32::from(b)) as usize]
    })
}

fn ejb(key: &[u8]) -> u32 {
    let h = key.iter().fold(0u32, |h, &b| {
        h.wrapping_mul(37) ^ u32::from(b).wrapping_sub(u32::from(b' '))
    });
    h % 1_048_583
}

fn phong(key: &[u8]) -> u32 {
    key.iter().fold(0u32, |h, &b| {
        h.wrapping_mul(0x63c6_3cd9)
            .wrapping_add(0x9c39_c33d)
            .wrapping_add(u32::from(b))
    })
}

fn oz(key: &[u8]) -> u32 {
    key.iter()
        .fold(0u32, |h, &b| u32::from(b).wrapping_add(h.wrapping_mul(65599)))
}

fn torek(key: &[u8]) -> u32 {
    key.iter()
        .fold(0u32, |h, &b| (h << 5).wrapping_add(h).wrapping_add(u32::from(b)))
}

fn fnv(key: &[u8]) -> u32 {
    key.iter().fold(33_554_467u32, |h, &b| {
        h.wrapping_mul(0x0100_0193) ^ u32::from(b)
    })
}

fn stl(key: &[u8]) -> u32 {
    key.iter()
        .fold(0u32, |h, &b| h.wrapping_mul(5).wrapping_add(u32::from(b)))
}

fn jenkins_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 13);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 8);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 13);
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 12);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 16);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 5);
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 3);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 10);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 15);
}

fn le_word(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |w, (i, &b)| w | (u32::from(b) << (8 * i)))
}

fn jenkins(key: &[u8]) -> u32 {
    let mut a = 0x9e37_79b9u32;
    let mut b = 0x9e37_79b9u32;
    let mut c = 0xaec4_9ac0u32;

    let mut chunks = key.chunks_exact(12);
    for chunk in &mut chunks {
        a = a.wrapping_add(le_word(&chunk[0..4]));
        b = b.wrapping_add(le_word(&chunk[4..8]));
        c = c.wrapping_add(le_word(&chunk[8..12]));
        jenkins_mix(&mut a, &mut b, &mut c);
    }

    // Tail: the low byte of `c` carries the length.
    let tail = chunks.remainder();
    c = c.wrapping_add(key.len() as u32);
    a = a.wrapping_add(le_word(&tail[..tail.len().min(4)]));
    if tail.len() > 4 {
        b = b.wrapping_add(le_word(&tail[4..tail.len().min(8)]));
    }
    if tail.len() > 8 {
        c = c.wrapping_add(le_word(&tail[8..]) << 8);
    }
    jenkins_mix(&mut a, &mut b, &mut c);
    c
}

fn get16(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8)
}

fn signed_byte(b: u8) -> u32 {
    i32::from(b as i8) as u32
}

fn super_fast(key: &[u8]) -> u32 {
    if key.is_empty() {
        return 0;
    }
    let mut hash = key.len() as u32;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        hash = hash.wrapping_add(get16(&chunk[0..2]));
        let tmp = (get16(&chunk[2..4]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let rest = chunks.remainder();
    match rest.len() {
        3 => {
            hash = hash.wrapping_add(get16(rest));
            hash ^= hash << 16;
            hash ^= signed_byte(rest[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(get16(rest));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(signed_byte(rest[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }

    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash.wrapping_add(hash >> 6)
}
