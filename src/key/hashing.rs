//! The hash functions of the built-in key types, and the generic hash and
//! equality used by heterogeneous tables.

use super::Key;
use crate::common::error::Result;

use once_cell::sync::Lazy;
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
};

// Constants of the xxHash64 lane mixing, used to combine tuple elements.
const PRIME_1: u64 = 0x9E37_79B1_85EB_CA87;
const PRIME_2: u64 = 0xC2B2_AE3D_27D4_EB4F;
const PRIME_5: u64 = 0x27D4_EB2F_1656_67C5;

const NONE_HASH: u64 = 0xFCA8_6420;
const NAN_HASH: u64 = 0;

// Every string is hashed with the same keys for the lifetime of the process.
static STR_HASHER: Lazy<RandomState> = Lazy::new(RandomState::new);

pub(crate) fn hash_int(i: i64) -> u64 {
    i as u64
}

/// Integral floats hash like the equal integer, so `1` and `1.0` collide and
/// can be found by each other.
pub(crate) fn hash_float(x: f64) -> u64 {
    if x.is_nan() {
        NAN_HASH
    } else if let Some(i) = float_as_int(x) {
        hash_int(i)
    } else {
        let bits = x.to_bits();
        (bits ^ (bits >> 32)).wrapping_mul(PRIME_1)
    }
}

pub(crate) fn hash_str(s: &str) -> u64 {
    let mut hasher = STR_HASHER.build_hasher();
    s.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn hash_identity(ptr: *const ()) -> u64 {
    // The low bits of an allocation address are almost always zero.
    (ptr as usize as u64).rotate_right(4)
}

/// Combines the hashes of the tuple elements. Every element is hashed with
/// `hash_element`, and the first error is returned.
pub(crate) fn hash_tuple(
    items: &[Key],
    mut hash_element: impl FnMut(&Key) -> Result<u64>,
) -> Result<u64> {
    let mut acc = PRIME_5;
    for item in items {
        let lane = hash_element(item)?;
        acc = acc.wrapping_add(lane.wrapping_mul(PRIME_2));
        acc = acc.rotate_left(31);
        acc = acc.wrapping_mul(PRIME_1);
    }
    Ok(acc.wrapping_add(items.len() as u64 ^ (PRIME_5 ^ 3_527_539)))
}

/// Hashes a key with the hash function of its own type.
pub(crate) fn generic_hash(key: &Key) -> Result<u64> {
    match key {
        Key::None => Ok(NONE_HASH),
        Key::Int(i) => Ok(hash_int(*i)),
        Key::Float(x) => Ok(hash_float(*x)),
        Key::Str(s) => Ok(hash_str(s)),
        Key::Tuple(items) => hash_tuple(items, generic_hash),
        Key::Type(class) => Ok(hash_identity(Arc::as_ptr(class) as *const ())),
        Key::Object(obj) => Ok(obj.class().protocol()?.hash(key)? as u64),
    }
}

/// The language's equality over any two keys.
pub(crate) fn generic_equals(a: &Key, b: &Key) -> bool {
    if a.is_same(b) {
        return true;
    }
    match (a, b) {
        (Key::Int(x), Key::Int(y)) => x == y,
        (Key::Float(x), Key::Float(y)) => x == y,
        (Key::Int(i), Key::Float(x)) | (Key::Float(x), Key::Int(i)) => int_equals_float(*i, *x),
        (Key::Str(x), Key::Str(y)) => x == y,
        (Key::Tuple(x), Key::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| generic_equals(l, r))
        }
        (Key::Type(x), Key::Type(y)) => Arc::ptr_eq(x, y),
        (Key::Object(obj), _) => {
            let by_left = obj
                .class()
                .protocol()
                .map_or(false, |protocol| protocol.equals(a, b));
            by_left || reflected_equals(a, b)
        }
        (_, Key::Object(_)) => reflected_equals(a, b),
        _ => false,
    }
}

// Asks the class of the right hand operand.
fn reflected_equals(a: &Key, b: &Key) -> bool {
    match b {
        Key::Object(obj) => obj
            .class()
            .protocol()
            .map_or(false, |protocol| protocol.equals(b, a)),
        _ => false,
    }
}

fn float_as_int(x: f64) -> Option<i64> {
    // The range is exclusive at the top because 2^63 is not an i64.
    const MIN: f64 = -9_223_372_036_854_775_808.0;
    const MAX: f64 = 9_223_372_036_854_775_808.0;

    if x.fract() == 0.0 && (MIN..MAX).contains(&x) {
        Some(x as i64)
    } else {
        None
    }
}

fn int_equals_float(i: i64, x: f64) -> bool {
    float_as_int(x) == Some(i)
}
