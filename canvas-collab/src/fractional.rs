//! # Fractional Order Keys
//!
//! Elements are ordered by string keys drawn from the base-62 alphabet
//! `0-9A-Za-z`, compared byte-wise. Keys have unbounded length, so a new key
//! can always be placed between two neighbours without renumbering anything:
//!
//! ```text
//!   "V"  ──  key_between("V", "W")  ──►  "VV"
//!   "a"  ──  key_between("a", "a1") ──►  "a0V"
//!   None ──  key_between(None, "1") ──►  "0V"
//! ```
//!
//! A key never ends in the zero digit. Without that rule nothing could be
//! placed before `"0"`, or between `"a"` and `"a0"`.

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::{IndexError, IndexResult};

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const BASE: usize = DIGITS.len();

const ZERO: u8 = DIGITS[0];

/// A position in the scene order.
///
/// Construction with [`OrderKey::new`] does not validate, because keys arrive
/// from peers and malformed ones must be repaired rather than rejected. Use
/// [`OrderKey::parse`] where an invalid key is a caller error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(String);

impl OrderKey {
    /// Wrap a key without validating it.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Wrap a key, rejecting malformed input.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidKey`] if the key is empty, contains a
    /// character outside the alphabet, or ends with the zero digit.
    pub fn parse(key: impl Into<String>) -> IndexResult<Self> {
        let key = key.into();
        if is_valid_key(&key) {
            Ok(Self(key))
        } else {
            Err(IndexError::InvalidKey(key))
        }
    }

    /// Whether the key is well formed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_key(&self.0)
    }

    /// The raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the raw string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for OrderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that a key is non-empty, uses only the base-62 alphabet and does not
/// end with the zero digit.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    match bytes.last() {
        None => false,
        Some(&last) => last != ZERO && bytes.iter().all(|&b| digit_value(b).is_some()),
    }
}

/// Generate a key strictly between `lower` and `upper`.
///
/// Either bound may be absent, meaning "before everything" or "after
/// everything".
///
/// # Errors
///
/// Returns [`IndexError::InvalidKey`] for a malformed bound and
/// [`IndexError::InvalidOrder`] when both bounds are given and
/// `lower >= upper`.
pub fn key_between(lower: Option<&OrderKey>, upper: Option<&OrderKey>) -> IndexResult<OrderKey> {
    check_bounds(lower, upper)?;
    Ok(between_unchecked(lower, upper))
}

/// Generate `n` strictly increasing keys between `lower` and `upper`.
///
/// Keys are spread by recursive bisection so later insertions between them
/// stay short. Spacing is best effort; strict ordering is guaranteed.
///
/// # Errors
///
/// Same conditions as [`key_between`], checked even when `n` is zero.
pub fn keys_between(
    lower: Option<&OrderKey>,
    upper: Option<&OrderKey>,
    n: usize,
) -> IndexResult<Vec<OrderKey>> {
    check_bounds(lower, upper)?;
    let mut keys = Vec::with_capacity(n);
    bisect(lower, upper, n, &mut keys);
    Ok(keys)
}

/// Rewrite order keys so they strictly increase along the current sequence.
///
/// Elements are never moved. A run of elements whose keys are missing,
/// malformed, or not greater than the last good key is rekeyed in one
/// [`keys_between`] pass, bounded below by that key and above by the first
/// good key after the run (or open-ended if there is none). Keys handed out
/// to a run of `n` elements grow with `log n`, not `n`.
///
/// Returns the number of keys rewritten. Running it on an already valid
/// sequence rewrites nothing.
pub fn validate_and_repair(elements: &mut [Element]) -> usize {
    let mut previous: Option<OrderKey> = None;
    let mut repaired = 0;
    let mut start = 0;

    while start < elements.len() {
        if fits_after(&elements[start], previous.as_ref()) {
            previous = elements[start].index.clone();
            start += 1;
            continue;
        }

        let end = elements[start..]
            .iter()
            .position(|element| fits_after(element, previous.as_ref()))
            .map_or(elements.len(), |offset| start + offset);
        let upper = elements.get(end).and_then(Element::valid_index).cloned();

        let mut keys = Vec::with_capacity(end - start);
        bisect(previous.as_ref(), upper.as_ref(), end - start, &mut keys);
        for (element, key) in elements[start..end].iter_mut().zip(keys) {
            tracing::trace!(
                element = %element.id,
                old = ?element.index,
                new = %key,
                "Repaired order key"
            );
            element.index = Some(key);
        }

        repaired += end - start;
        previous = elements[end - 1].index.clone();
        start = end;
    }

    if repaired > 0 {
        tracing::debug!(repaired, total = elements.len(), "Order keys repaired");
    }
    repaired
}

/// Whether `element` has a usable key strictly above `previous`.
fn fits_after(element: &Element, previous: Option<&OrderKey>) -> bool {
    element
        .valid_index()
        .is_some_and(|key| previous.is_none_or(|prev| key > prev))
}

fn check_bounds(lower: Option<&OrderKey>, upper: Option<&OrderKey>) -> IndexResult<()> {
    for key in [lower, upper].into_iter().flatten() {
        if !key.is_valid() {
            return Err(IndexError::InvalidKey(key.0.clone()));
        }
    }
    if let (Some(lower), Some(upper)) = (lower, upper) {
        if lower >= upper {
            return Err(IndexError::InvalidOrder {
                lower: lower.0.clone(),
                upper: upper.0.clone(),
            });
        }
    }
    Ok(())
}

fn bisect(lower: Option<&OrderKey>, upper: Option<&OrderKey>, n: usize, out: &mut Vec<OrderKey>) {
    if n == 0 {
        return;
    }
    let mid = between_unchecked(lower, upper);
    let left = (n - 1) / 2;
    bisect(lower, Some(&mid), left, out);
    out.push(mid.clone());
    bisect(Some(&mid), upper, n - 1 - left, out);
}

/// Bounds must be valid and ordered.
fn between_unchecked(lower: Option<&OrderKey>, upper: Option<&OrderKey>) -> OrderKey {
    let lower = lower.map_or(&[][..], |key| key.0.as_bytes());
    let upper = upper.map(|key| key.0.as_bytes());
    let mut out = String::new();
    midpoint(lower, upper, &mut out);
    OrderKey(out)
}

/// Append to `out` the digits of a key strictly between `lower` and `upper`,
/// treating missing trailing digits of `lower` as zeros.
fn midpoint(mut lower: &[u8], mut upper: Option<&[u8]>, out: &mut String) {
    loop {
        if let Some(bound) = upper {
            let shared = bound
                .iter()
                .enumerate()
                .take_while(|&(i, &digit)| lower.get(i).copied().unwrap_or(ZERO) == digit)
                .count();
            if shared > 0 {
                out.extend(bound[..shared].iter().map(|&b| char::from(b)));
                lower = lower.get(shared..).unwrap_or(&[]);
                upper = Some(&bound[shared..]);
                continue;
            }
        }

        let lo = lower.first().and_then(|&b| digit_value(b)).unwrap_or(0);
        let hi = upper
            .and_then(<[u8]>::first)
            .and_then(|&b| digit_value(b))
            .unwrap_or(BASE);

        if hi - lo > 1 {
            out.push(char::from(DIGITS[(lo + hi) / 2]));
            return;
        }
        if let Some(bound) = upper.filter(|bound| bound.len() > 1) {
            out.push(char::from(bound[0]));
            return;
        }
        out.push(char::from(DIGITS[lo]));
        lower = lower.get(1..).unwrap_or(&[]);
        upper = None;
    }
}

fn digit_value(byte: u8) -> Option<usize> {
    match byte {
        b'0'..=b'9' => Some(usize::from(byte - b'0')),
        b'A'..=b'Z' => Some(usize::from(byte - b'A') + 10),
        b'a'..=b'z' => Some(usize::from(byte - b'a') + 36),
        _ => None,
    }
}
