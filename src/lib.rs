//! Provide the bijective Burrows-Wheeler transform (BBWT) and its inverse, driven by a
//! linear-time circular suffix array construction over the Lyndon factorization of the input.
//!
//! The transform is a lossless, bijective reordering of the input symbols. Unlike the classical
//! BWT it needs no sentinel and no primary index: the inverse is computed from the transformed
//! data alone. The circular suffix array is built with an induced-sorting algorithm in the
//! style of [SA-IS](https://doi.org/10.1109/DCC.2009.42), adapted to sort the infinite
//! circular suffixes of each Lyndon factor.
//!
//! # Example
//! ```ignore
//! use std::fs;
//! use std::io;
//!
//! fn main() -> io::Result<()> {
//!     let mut buf = fs::read("./english.100MB")?;
//!     let mut csa = vec![0i64; buf.len()];
//!
//!     bbwt::bbwt_in_place(&mut buf, &mut csa, 256).expect("scratch allocation failed");
//!
//!     Ok(())
//! }
//! ```
use contracts::*;
use std::collections::TryReserveError;
use thiserror::Error;

mod private {
    use num::{traits::Signed, PrimInt};
    use std::fmt::Debug;

    pub trait Symbol: PrimInt + Copy + Debug {
        fn of_u(v: usize) -> Self;
        fn to_u(&self) -> usize;
    }

    pub trait Index: Symbol + Signed {}

    macro_rules! impl_symbol {
        ($int:ty) => {
            impl Symbol for $int {
                #[inline]
                fn of_u(v: usize) -> Self {
                    v as $int
                }
                #[inline]
                fn to_u(&self) -> usize {
                    *self as usize
                }
            }
        };
    }

    impl_symbol!(u8);

    impl_symbol!(u16);

    #[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
    impl_symbol!(u32);

    impl_symbol!(usize);

    impl_symbol!(i32);

    #[cfg(target_pointer_width = "64")]
    impl_symbol!(i64);

    impl_symbol!(isize);

    impl Index for i32 {}

    #[cfg(target_pointer_width = "64")]
    impl Index for i64 {}

    impl Index for isize {}
}

/// A trait for input symbols: primitive integer types whose values fit into `usize`.
///
/// This is a [sealed trait](https://rust-lang.github.io/api-guidelines/future-proofing.html).
/// The signed index types implement it as well, since each recursion level feeds the reduced
/// label string (stored in the index type) back through the sorter.
pub trait Symbol: private::Symbol {}

/// A trait for suffix array indexes: primitive signed integer types.
///
/// The sorter uses `-1` as the "empty slot" marker, so the type must be signed. A slot must
/// hold any position of the input; [`bbwt_in_place`] additionally stores symbol values in the
/// slots, so there the type must hold any value below the alphabet size too.
///
/// This is a [sealed trait](https://rust-lang.github.io/api-guidelines/future-proofing.html).
pub trait Index: Symbol + private::Index {}

macro_rules! impl_symbol {
    ($int:ty) => {
        impl Symbol for $int {}
    };
}

impl_symbol!(u8);

impl_symbol!(u16);

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl_symbol!(u32);

impl_symbol!(usize);

impl_symbol!(i32);

#[cfg(target_pointer_width = "64")]
impl_symbol!(i64);

impl_symbol!(isize);

impl Index for i32 {}

#[cfg(target_pointer_width = "64")]
impl Index for i64 {}

impl Index for isize {}

/// The error type for the transform entry points.
///
/// Domain logic cannot fail on well-formed inputs; running out of memory while reserving the
/// internal scratch buffers is the only runtime error. On error the output and suffix array
/// buffers hold arbitrary intermediate data.
#[derive(Debug, Error)]
pub enum Error {
    /// Reserving an internal scratch buffer failed.
    #[error("allocation of {needed} scratch elements failed")]
    Alloc {
        /// Number of elements that could not be reserved.
        needed: usize,
        #[source]
        source: TryReserveError,
    },
}

fn try_vec<T: Clone>(value: T, len: usize) -> Result<Vec<T>, Error> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|source| Error::Alloc { needed: len, source })?;
    v.resize(len, value);
    Ok(v)
}

/// v == -1
#[inline]
fn is_empty_slot<I: Index>(v: I) -> bool {
    v < I::zero()
}

#[inline]
fn empty<I: Index>() -> I {
    I::zero() - I::one()
}

/// A fixed-size set of positions in `[0, size)` with word-skipping neighbour scans.
///
/// Used to mark Lyndon factor starts, S-type positions and special factors. Out-of-range
/// queries answer `false` and out-of-range updates are ignored, so scans over per-factor
/// windows need no explicit boundary handling.
pub struct BitSet {
    words: Vec<u64>,
    num_bits: usize,
}

impl BitSet {
    /// Create a zero-initialized set over `[0, num_bits)`.
    pub fn new(num_bits: usize) -> Result<Self, Error> {
        let words = try_vec(0u64, (num_bits >> 6) + 1)?;

        Ok(Self { words, num_bits })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.num_bits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    #[inline]
    pub fn get(&self, pos: usize) -> bool {
        pos < self.num_bits && (self.words[pos >> 6] >> (pos & 63)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, pos: usize, val: bool) {
        if pos >= self.num_bits {
            return;
        }

        if val {
            self.words[pos >> 6] |= 1u64 << (pos & 63);
        } else {
            self.words[pos >> 6] &= !(1u64 << (pos & 63));
        }
    }

    /// Smallest member greater than `pos`.
    ///
    /// The scan runs off the buffer unless some bit above `pos` is set; callers guarantee
    /// this with a sentinel bit at the last position.
    pub fn next(&self, pos: usize) -> usize {
        let pos = pos + 1;
        let mut j = pos >> 6;
        let c = self.words[j] >> (pos & 63);

        if c != 0 {
            return pos + c.trailing_zeros() as usize;
        }

        loop {
            j += 1;

            if self.words[j] != 0 {
                return (j << 6) + self.words[j].trailing_zeros() as usize;
            }
        }
    }

    /// Largest member smaller than `pos`, or `None` if no position below `pos` is set.
    pub fn prev(&self, pos: usize) -> Option<usize> {
        if pos == 0 {
            return None;
        }

        let pos = pos - 1;
        let mut j = pos >> 6;
        let c = self.words[j] << (63 - (pos & 63));

        if c != 0 {
            return Some(pos - c.leading_zeros() as usize);
        }

        while j > 0 {
            j -= 1;

            if self.words[j] != 0 {
                return Some((j << 6) + 63 - self.words[j].leading_zeros() as usize);
            }
        }

        None
    }
}

/// Compute the Lyndon factorization of `s` with Duval's algorithm.
///
/// The start of every factor is marked in `factors`, and the position past the last symbol
/// is always marked as a sentinel. With `first`, the starting position of the first
/// occurrence of each distinct factor is marked as well. Runs in linear time.
///
/// Consecutive factors are non-increasing lexicographically and their concatenation is `s`.
///
/// # Arguments
/// - `s`: input string
/// - `factors`: output set over at least `s.len() + 1` positions
/// - `first`: optional output set over at least `s.len() + 1` positions
///
/// Returns the number of factors.
#[requires(factors.len() > s.len(), "`factors` must cover positions `0..=s.len()`")]
#[requires(
    first.as_ref().map_or(true, |f| f.len() > s.len()),
    "`first` must cover positions `0..=s.len()`"
)]
pub fn lyndon_factors<C: Symbol>(
    s: &[C],
    factors: &mut BitSet,
    first: Option<&mut BitSet>,
) -> usize {
    let mut first = first;
    let len = s.len();
    let mut num_factors = 0;
    let mut i = 0;

    while i < len {
        // Find the longest prefix of s[i..] that is a power of a single Lyndon word.
        let mut j = i + 1;
        let mut k = i;

        while j < len && s[k] <= s[j] {
            if s[k] < s[j] {
                k = i;
            } else {
                k += 1;
            }

            j += 1;
        }

        if let Some(f) = first.as_deref_mut() {
            f.set(i, true);
        }

        // Emit one factor per repetition of the period.
        while i <= k {
            factors.set(i, true);
            num_factors += 1;
            i += j - k;
        }
    }

    factors.set(len, true);

    num_factors
}

/// buckets[c] = number of symbols smaller than c; buckets[alph_size] = s.len()
fn fill_buckets<C: Symbol>(s: &[C], alph_size: usize) -> Result<Vec<usize>, Error> {
    let mut buckets = try_vec(0usize, alph_size + 1)?;

    for c in s {
        buckets[c.to_u() + 1] += 1;
    }

    for i in 0..alph_size {
        buckets[i + 1] += buckets[i];
    }

    Ok(buckets)
}

/// pos begins a Lyndon factor, or is S-type with an L-type predecessor in the same factor
#[inline]
fn is_lms_pos(pos: usize, factors: &BitSet, stype: &BitSet) -> bool {
    factors.get(pos) || (pos > 0 && stype.get(pos) && !stype.get(pos - 1))
}

/// Circular predecessor of `pos` within its Lyndon factor.
#[inline]
fn factor_prev(pos: usize, factors: &BitSet) -> usize {
    if factors.get(pos) {
        factors.next(pos) - 1
    } else {
        pos - 1
    }
}

/// Mark S-type positions of every Lyndon factor in `stype`, and factors without any internal
/// LMS boundary (singletons included) in `special`. Unmarked positions are L-type.
fn classify_suffixes<C: Symbol>(
    s: &[C],
    factors: &BitSet,
    stype: &mut BitSet,
    special: &mut BitSet,
) {
    let len = s.len();
    let mut fstart = 0;

    while fstart < len {
        let fend = factors.next(fstart);

        stype.set(fstart, true);

        for j in (fstart..fend - 1).rev() {
            if s[j] < s[j + 1] || (s[j] == s[j + 1] && stype.get(j + 1)) {
                stype.set(j, true);
            }
        }

        // Count descent-ascent alternations right to left; a factor without any ascent has
        // no LMS induction material and must be pinned during L-induction instead.
        let mut m = 0;
        let mut c = 0;
        let mut c1 = s[fend - 1].to_u();

        for i in (fstart..fend - 1).rev() {
            let c0 = s[i].to_u();

            if c0 < c1 + c {
                c = 1;
            } else if c != 0 {
                m += 1;
                c = 0;
            }

            c1 = c0;
        }

        if m == 0 && c == 0 {
            special.set(fstart, true);
        }

        fstart = fend;
    }

    special.set(len, true);
}

/// Induce L-type suffixes left to right from the suffixes already placed.
///
/// Special factors have no entry to induce from: their suffix is pinned at the head of its
/// bucket the moment the scan reaches it, keyed by the factor's start symbol. The pending
/// starts drain from the largest position down, which is lexicographically smallest first
/// since consecutive Lyndon factors are non-increasing.
fn induce_l<C: Symbol, I: Index>(
    s: &[C],
    sa: &mut [I],
    factors: &BitSet,
    stype: &BitSet,
    special: &BitSet,
    buckets: &mut [usize],
) {
    let len = s.len();
    let mut pending = special.prev(len);

    for i in 0..len {
        while let Some(p) = pending {
            if buckets[s[p].to_u()] != i {
                break;
            }

            let j = factors.next(p) - 1;
            sa[buckets[s[j].to_u()]] = I::of_u(j);
            buckets[s[j].to_u()] += 1;
            pending = special.prev(p);
        }

        if is_empty_slot(sa[i]) {
            continue;
        }

        let j = factor_prev(sa[i].to_u(), factors);

        if !stype.get(j) {
            sa[buckets[s[j].to_u()]] = I::of_u(j);
            buckets[s[j].to_u()] += 1;
        }
    }
}

/// Induce S-type suffixes right to left from the suffixes already placed.
fn induce_s<C: Symbol, I: Index>(
    s: &[C],
    sa: &mut [I],
    factors: &BitSet,
    stype: &BitSet,
    buckets: &mut [usize],
) {
    for i in (0..s.len()).rev() {
        if is_empty_slot(sa[i]) {
            continue;
        }

        let j = sa[i].to_u();

        // Factor starts only wrap to L-type positions, nothing to induce from them here.
        if factors.get(j) {
            continue;
        }

        let j = j - 1;

        if stype.get(j) {
            buckets[s[j].to_u() + 1] -= 1;
            sa[buckets[s[j].to_u() + 1]] = I::of_u(j);
        }
    }
}

/// Compute the circular suffix array of `s` under the Lyndon factorization `factors`.
///
/// Pre-condition: `s.len() >= 2`, `sa.len() == s.len()`, all symbols below `alph_size`.
fn csa_induce<C: Symbol, I: Index>(
    s: &[C],
    sa: &mut [I],
    factors: &BitSet,
    alph_size: usize,
) -> Result<(), Error> {
    debug_assert_eq!(s.len(), sa.len());

    let len = s.len();

    let mut stype = BitSet::new(len)?;
    let mut special = BitSet::new(len + 1)?;
    classify_suffixes(s, factors, &mut stype, &mut special);

    let buckets = fill_buckets(s, alph_size)?;
    let mut tmp = try_vec(0usize, alph_size + 1)?;

    for slot in sa.iter_mut() {
        *slot = empty();
    }

    // Place each LMS suffix outside special factors at the end of its bucket.
    tmp.copy_from_slice(&buckets);

    for i in 0..len {
        if is_lms_pos(i, factors, &stype) && !special.get(i) {
            tmp[s[i].to_u() + 1] -= 1;
            sa[tmp[s[i].to_u() + 1]] = I::of_u(i);
        }
    }

    tmp.copy_from_slice(&buckets);
    induce_l(s, sa, factors, &stype, &special, &mut tmp);

    tmp.copy_from_slice(&buckets);
    induce_s(s, sa, factors, &stype, &mut tmp);

    // Compact the LMS suffixes, now sorted by their LMS substrings, to the front.
    let mut num_lms = 0;

    for i in 0..len {
        if is_empty_slot(sa[i]) {
            continue;
        }

        let j = sa[i].to_u();

        if is_lms_pos(j, factors, &stype) && !special.get(j) {
            sa[num_lms] = I::of_u(j);
            num_lms += 1;
        }
    }

    for slot in sa[num_lms..].iter_mut() {
        *slot = I::zero();
    }

    // Record the length of the LMS substring starting at pos in the upper half of sa, at
    // num_lms + pos / 2. No two LMS positions are adjacent, so the slots never collide.
    let mut fstart = 0;

    while fstart < len {
        let fend = factors.next(fstart);

        let mut j = fend;
        let mut c = 0;
        let mut c1 = s[fend - 1].to_u();

        for i in (fstart..fend - 1).rev() {
            let c0 = s[i].to_u();

            if c0 < c1 + c {
                c = 1;
            } else if c != 0 {
                sa[num_lms + ((i + 1) >> 1)] = I::of_u(j - i - 1);
                j = i + 1;
                c = 0;
            }

            c1 = c0;
        }

        if j < fend || c != 0 {
            sa[num_lms + (fstart >> 1)] = I::of_u(j - fstart);
        }

        fstart = fend;
    }

    // Two LMS substrings share a label iff their lengths and contents are equal; the walk
    // is in sorted order, so labels are issued in lexicographic order.
    let mut num_labels = 0;
    let mut q = 0;
    let mut q_len = 0;

    for i in 0..num_lms {
        let pos = sa[i].to_u();
        let sub_len = sa[num_lms + (pos >> 1)].to_u();
        let mut distinct = true;

        if sub_len == q_len {
            let mut j = 0;

            while j < sub_len && s[pos + j] == s[q + j] {
                j += 1;
            }

            if j == sub_len {
                distinct = false;
            }
        }

        if distinct {
            num_labels += 1;
            q = pos;
            q_len = sub_len;
        }

        sa[num_lms + (pos >> 1)] = I::of_u(num_labels);
    }

    // Shared labels mean the pre-sort could not fully order those LMS suffixes; sort the
    // reduced label string recursively. Unique labels mean the compacted order is exact.
    if num_labels < num_lms {
        let mut red_factors = BitSet::new(num_lms + 1)?;
        let mut out_pos = 0;

        for in_pos in 0..len {
            if is_lms_pos(in_pos, factors, &stype) && !special.get(in_pos) {
                red_factors.set(out_pos, factors.get(in_pos));
                out_pos += 1;
            }
        }

        red_factors.set(num_lms, true);

        let mut red = try_vec(I::zero(), num_lms)?;
        let mut out_pos = num_lms;

        for in_pos in (num_lms..len).rev() {
            if sa[in_pos] != I::zero() {
                out_pos -= 1;
                red[out_pos] = sa[in_pos] - I::one();
            }
        }

        csa_induce(&red, &mut sa[..num_lms], &red_factors, num_labels)?;

        // Expand the reduced suffix array back to positions of the original string.
        let mut out_pos = 0;

        for in_pos in 0..len {
            if is_lms_pos(in_pos, factors, &stype) && !special.get(in_pos) {
                red[out_pos] = I::of_u(in_pos);
                out_pos += 1;
            }
        }

        for i in 0..num_lms {
            sa[i] = red[sa[i].to_u()];
        }
    }

    // Re-place the LMS suffixes at their bucket ends, this time in the exact order, and
    // induce the complete suffix array from them.
    for slot in sa[num_lms..].iter_mut() {
        *slot = empty();
    }

    tmp.copy_from_slice(&buckets);

    for i in (0..num_lms).rev() {
        let j = sa[i].to_u();
        sa[i] = empty();
        tmp[s[j].to_u() + 1] -= 1;
        sa[tmp[s[j].to_u() + 1]] = I::of_u(j);
    }

    tmp.copy_from_slice(&buckets);
    induce_l(s, sa, factors, &stype, &special, &mut tmp);

    tmp.copy_from_slice(&buckets);
    induce_s(s, sa, factors, &stype, &mut tmp);

    Ok(())
}

/// Compute the circular suffix array of `s`.
///
/// `csa[r] = i` means that the infinite circular suffix starting at position `i` and
/// wrapping around inside the Lyndon factor containing `i` has rank `r` among all such
/// suffixes. Runs in O(n) time.
///
/// # Arguments
/// - `s`: input string, all symbols below `alph_size`
/// - `csa`: output buffer of at least `s.len()` slots
/// - `alph_size`: alphabet size (`256` for bytes)
///
/// # Example
/// ```
/// let s = b"banana";
///
/// let mut csa = vec![0i32; s.len()];
///
/// bbwt::circular_suffix_array(s, &mut csa, 256).unwrap();
///
/// assert_eq!(csa, vec![5, 3, 1, 0, 4, 2]);
/// ```
#[requires(csa.len() >= s.len(), "`csa` must have at least `s.len()` slots")]
#[requires(
    s.is_empty() || I::max_value().to_u() >= s.len() - 1,
    "positions of `s` must fit into `I`"
)]
#[requires(s.iter().all(|c| c.to_u() < alph_size), "symbols must be below `alph_size`")]
pub fn circular_suffix_array<C: Symbol, I: Index>(
    s: &[C],
    csa: &mut [I],
    alph_size: usize,
) -> Result<(), Error> {
    let len = s.len();

    if len == 0 {
        return Ok(());
    }

    if len == 1 {
        csa[0] = I::zero();

        return Ok(());
    }

    let mut factors = BitSet::new(len + 1)?;
    lyndon_factors(s, &mut factors, None);

    csa_induce(s, &mut csa[..len], &factors, alph_size)
}

/// Compute the bijective Burrows-Wheeler transform of `s` into `out`.
///
/// `out[r]` is the symbol circularly preceding the rank-`r` suffix within its Lyndon
/// factor. `csa` is scratch space on return. For transforming a buffer in place use
/// [`bbwt_in_place`].
///
/// # Arguments
/// - `s`: input string, all symbols below `alph_size`
/// - `out`: output buffer of at least `s.len()` symbols
/// - `csa`: scratch buffer of at least `s.len()` slots
/// - `alph_size`: alphabet size (`256` for bytes)
///
/// # Example
/// ```
/// let s = b"mississippi";
///
/// let mut out = vec![0u8; s.len()];
/// let mut csa = vec![0i32; s.len()];
///
/// bbwt::bbwt(s, &mut out, &mut csa, 256).unwrap();
///
/// assert_eq!(&out, b"ipssmpissii");
/// ```
#[requires(out.len() >= s.len(), "`out` must have at least `s.len()` symbols")]
#[requires(csa.len() >= s.len(), "`csa` must have at least `s.len()` slots")]
#[requires(
    s.is_empty() || I::max_value().to_u() >= s.len() - 1,
    "positions of `s` must fit into `I`"
)]
#[requires(s.iter().all(|c| c.to_u() < alph_size), "symbols must be below `alph_size`")]
pub fn bbwt<C: Symbol, I: Index>(
    s: &[C],
    out: &mut [C],
    csa: &mut [I],
    alph_size: usize,
) -> Result<(), Error> {
    let len = s.len();

    if len == 0 {
        return Ok(());
    }

    if len == 1 {
        out[0] = s[0];

        return Ok(());
    }

    let mut factors = BitSet::new(len + 1)?;
    lyndon_factors(s, &mut factors, None);

    csa_induce(s, &mut csa[..len], &factors, alph_size)?;

    for out_pos in 0..len {
        out[out_pos] = s[factor_prev(csa[out_pos].to_u(), &factors)];
    }

    Ok(())
}

/// Compute the bijective Burrows-Wheeler transform of `data` in place.
///
/// Every slot of `data` is both a source and a destination, so the transform is first
/// materialized into the suffix array buffer as packed symbol values and then copied back.
/// The index type must therefore hold any value below `alph_size` as well.
///
/// # Example
/// ```
/// let mut data = b"banana".to_vec();
/// let mut csa = vec![0i32; data.len()];
///
/// bbwt::bbwt_in_place(&mut data, &mut csa, 256).unwrap();
///
/// assert_eq!(&data, b"annbaa");
/// ```
#[requires(csa.len() >= data.len(), "`csa` must have at least `data.len()` slots")]
#[requires(
    data.is_empty() || I::max_value().to_u() >= data.len() - 1,
    "positions of `data` must fit into `I`"
)]
#[requires(
    alph_size == 0 || I::max_value().to_u() >= alph_size - 1,
    "symbol values must fit into `I`"
)]
#[requires(data.iter().all(|c| c.to_u() < alph_size), "symbols must be below `alph_size`")]
pub fn bbwt_in_place<C: Symbol, I: Index>(
    data: &mut [C],
    csa: &mut [I],
    alph_size: usize,
) -> Result<(), Error> {
    let len = data.len();

    if len <= 1 {
        return Ok(());
    }

    let mut factors = BitSet::new(len + 1)?;
    lyndon_factors(data, &mut factors, None);

    csa_induce(data, &mut csa[..len], &factors, alph_size)?;

    for pos in 0..len {
        let src = factor_prev(csa[pos].to_u(), &factors);
        csa[pos] = I::of_u(data[src].to_u());
    }

    for pos in 0..len {
        data[pos] = C::of_u(csa[pos].to_u());
    }

    Ok(())
}

/// Invert the bijective Burrows-Wheeler transform `t` into `out`.
///
/// Builds the standard permutation of `t` and walks its cycles backwards; each cycle yields
/// one Lyndon factor of the original string, emitted right to left. Allocates an internal
/// scratch of `t.len()` indexes.
///
/// # Arguments
/// - `t`: transformed string, all symbols below `alph_size`
/// - `out`: output buffer of at least `t.len()` symbols
/// - `alph_size`: alphabet size (`256` for bytes)
///
/// # Example
/// ```
/// let t = b"annbaa";
///
/// let mut out = vec![0u8; t.len()];
///
/// bbwt::unbbwt(t, &mut out, 256).unwrap();
///
/// assert_eq!(&out, b"banana");
/// ```
#[requires(out.len() >= t.len(), "`out` must have at least `t.len()` symbols")]
#[requires(t.iter().all(|c| c.to_u() < alph_size), "symbols must be below `alph_size`")]
pub fn unbbwt<C: Symbol>(t: &[C], out: &mut [C], alph_size: usize) -> Result<(), Error> {
    const CONSUMED: usize = usize::MAX;

    let len = t.len();

    if len == 0 {
        return Ok(());
    }

    if len == 1 {
        out[0] = t[0];

        return Ok(());
    }

    let mut count = try_vec(0usize, alph_size)?;
    let mut before = try_vec(0usize, alph_size)?;
    let mut seen = try_vec(0usize, alph_size)?;
    let mut perm = try_vec(0usize, len)?;

    for c in t {
        count[c.to_u()] += 1;
    }

    for c in 1..alph_size {
        before[c] = before[c - 1] + count[c - 1];
    }

    for (i, c) in t.iter().enumerate() {
        perm[i] = before[c.to_u()] + seen[c.to_u()];
        seen[c.to_u()] += 1;
    }

    // Each cycle of the permutation is one Lyndon factor of the original string, recovered
    // back to front.
    let mut out_pos = len;

    for j in 0..len {
        if perm[j] == CONSUMED {
            continue;
        }

        let mut in_pos = j;

        while perm[in_pos] != CONSUMED {
            out_pos -= 1;
            out[out_pos] = t[in_pos];

            let next = perm[in_pos];
            perm[in_pos] = CONSUMED;
            in_pos = next;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbwt_of(s: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; s.len()];
        let mut csa = vec![0i32; s.len()];
        bbwt(s, &mut out, &mut csa, 256).unwrap();
        out
    }

    fn unbbwt_of(t: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; t.len()];
        unbbwt(t, &mut out, 256).unwrap();
        out
    }

    fn csa_of(s: &[u8]) -> Vec<i32> {
        let mut csa = vec![0i32; s.len()];
        circular_suffix_array(s, &mut csa, 256).unwrap();
        csa
    }

    fn is_permutation(csa: &[i32]) -> bool {
        let mut seen = vec![false; csa.len()];

        for &i in csa {
            if i < 0 || i as usize >= csa.len() || seen[i as usize] {
                return false;
            }

            seen[i as usize] = true;
        }

        true
    }

    #[test]
    fn bitset_get_set() {
        let mut set = BitSet::new(10).unwrap();

        set.set(0, true);
        set.set(7, true);
        set.set(9, true);
        set.set(7, false);

        assert!(set.get(0));
        assert!(!set.get(7));
        assert!(set.get(9));
        assert!(!set.get(10));
        assert!(!set.get(1000));

        set.set(1000, true);
        assert!(!set.get(1000));
    }

    #[test]
    fn bitset_next_skips_empty_words() {
        let mut set = BitSet::new(300).unwrap();

        set.set(2, true);
        set.set(259, true);

        assert_eq!(set.next(0), 2);
        assert_eq!(set.next(2), 259);
        assert_eq!(set.next(63), 259);
        assert_eq!(set.next(64), 259);
    }

    #[test]
    fn bitset_prev_scans_by_word() {
        let mut set = BitSet::new(300).unwrap();

        set.set(2, true);
        set.set(259, true);

        assert_eq!(set.prev(300), Some(259));
        assert_eq!(set.prev(259), Some(2));
        assert_eq!(set.prev(64), Some(2));
        assert_eq!(set.prev(2), None);
        assert_eq!(set.prev(0), None);
    }

    #[test]
    fn lyndon_factors_banana() {
        // banana = b . an . an . a
        let s = b"banana";
        let mut factors = BitSet::new(s.len() + 1).unwrap();
        let mut first = BitSet::new(s.len() + 1).unwrap();

        let count = lyndon_factors(s, &mut factors, Some(&mut first));

        assert_eq!(count, 4);

        let marks: Vec<usize> = (0..=s.len()).filter(|&i| factors.get(i)).collect();
        assert_eq!(marks, vec![0, 1, 3, 5, 6]);

        let uniq: Vec<usize> = (0..=s.len()).filter(|&i| first.get(i)).collect();
        assert_eq!(uniq, vec![0, 1, 5]);
    }

    #[test]
    fn lyndon_factors_nonincreasing() {
        // mississippi = m . iss . iss . ipp . i
        let s = b"mississippi";
        let mut factors = BitSet::new(s.len() + 1).unwrap();

        let count = lyndon_factors(s, &mut factors, None);

        assert_eq!(count, 5);

        let marks: Vec<usize> = (0..=s.len()).filter(|&i| factors.get(i)).collect();
        assert_eq!(marks, vec![0, 1, 4, 7, 10, 11]);

        for w in marks.windows(3) {
            assert!(s[w[0]..w[1]] >= s[w[1]..w[2]]);
        }
    }

    #[test]
    fn lyndon_factors_run_of_equal_symbols() {
        let s = b"aaaa";
        let mut factors = BitSet::new(s.len() + 1).unwrap();
        let mut first = BitSet::new(s.len() + 1).unwrap();

        let count = lyndon_factors(s, &mut factors, Some(&mut first));

        assert_eq!(count, 4);
        assert!((0..=4).all(|i| factors.get(i)));

        let uniq: Vec<usize> = (0..=s.len()).filter(|&i| first.get(i)).collect();
        assert_eq!(uniq, vec![0]);
    }

    #[test]
    fn buckets_cumulative() {
        let s = "abbaebabdab"
            .chars()
            .map(|c| c as u8 - b'a')
            .collect::<Vec<_>>();

        let buckets = fill_buckets(&s, 5).unwrap();

        assert_eq!(buckets, vec![0, 4, 9, 9, 10, 11]);
    }

    #[test]
    fn classify_banana() {
        // index   012345
        // string  banana
        // type    SSLSLS
        // special b at 0, a at 5
        let s = b"banana";
        let mut factors = BitSet::new(s.len() + 1).unwrap();
        lyndon_factors(s, &mut factors, None);

        let mut stype = BitSet::new(s.len()).unwrap();
        let mut special = BitSet::new(s.len() + 1).unwrap();
        classify_suffixes(s, &factors, &mut stype, &mut special);

        let s_marks: Vec<usize> = (0..s.len()).filter(|&i| stype.get(i)).collect();
        assert_eq!(s_marks, vec![0, 1, 3, 5]);

        let spc_marks: Vec<usize> = (0..=s.len()).filter(|&i| special.get(i)).collect();
        assert_eq!(spc_marks, vec![0, 5, 6]);
    }

    #[test]
    fn classify_all_singletons() {
        let s = b"zyxw";
        let mut factors = BitSet::new(s.len() + 1).unwrap();
        lyndon_factors(s, &mut factors, None);

        let mut stype = BitSet::new(s.len()).unwrap();
        let mut special = BitSet::new(s.len() + 1).unwrap();
        classify_suffixes(s, &factors, &mut stype, &mut special);

        assert!((0..=s.len()).all(|i| special.get(i)));
    }

    #[test]
    fn csa_trivial() {
        assert_eq!(csa_of(b""), Vec::<i32>::new());
        assert_eq!(csa_of(b"a"), vec![0]);
        assert_eq!(csa_of(b"ab"), vec![0, 1]);
        assert_eq!(csa_of(b"abc"), vec![0, 1, 2]);
    }

    #[test]
    fn csa_banana() {
        assert_eq!(csa_of(b"banana"), vec![5, 3, 1, 0, 4, 2]);
    }

    #[test]
    fn csa_mississippi() {
        assert_eq!(csa_of(b"mississippi"), vec![10, 7, 4, 1, 0, 9, 8, 6, 3, 5, 2]);
    }

    #[test]
    fn csa_singleton_factors_sort_from_the_back() {
        // All circular suffixes of a run of one symbol are equal; the pending-factor drain
        // places the later (lexicographically not larger) factor first.
        assert_eq!(csa_of(b"aaaa"), vec![3, 2, 1, 0]);
        assert_eq!(csa_of(b"zyxw"), vec![3, 2, 1, 0]);
    }

    #[test]
    fn csa_is_permutation() {
        for s in [
            b"abracadabra".as_slice(),
            b"mississippi",
            b"zzzyyyxxx",
            b"the quick brown fox jumps over the lazy dog",
        ] {
            assert!(is_permutation(&csa_of(s)), "failed for {:?}", s);
        }
    }

    #[test]
    fn bbwt_trivial() {
        assert_eq!(bbwt_of(b""), b"");
        assert_eq!(bbwt_of(b"a"), b"a");
        assert_eq!(bbwt_of(b"ab"), b"ba");
        assert_eq!(bbwt_of(b"ba"), b"ab");
        assert_eq!(bbwt_of(b"abc"), b"cab");
    }

    #[test]
    fn bbwt_fixed_points() {
        assert_eq!(bbwt_of(b"aaaa"), b"aaaa");
        assert_eq!(bbwt_of(b"zzzzzzzz"), b"zzzzzzzz");
    }

    #[test]
    fn bbwt_banana() {
        assert_eq!(bbwt_of(b"banana"), b"annbaa");
    }

    #[test]
    fn bbwt_mississippi() {
        assert_eq!(bbwt_of(b"mississippi"), b"ipssmpissii");
    }

    #[test]
    fn bbwt_is_a_permutation_of_the_input() {
        for s in [
            b"abracadabra".as_slice(),
            b"mississippi",
            b"no sentinel needed",
        ] {
            let mut expected = s.to_vec();
            expected.sort_unstable();

            let mut got = bbwt_of(s);
            got.sort_unstable();

            assert_eq!(got, expected);
        }
    }

    #[test]
    fn bbwt_in_place_matches_bbwt() {
        for s in [
            b"".as_slice(),
            b"a",
            b"banana",
            b"mississippi",
            b"zyxwvutsrq",
            b"abababababab",
        ] {
            let mut data = s.to_vec();
            let mut csa = vec![0i32; s.len()];

            bbwt_in_place(&mut data, &mut csa, 256).unwrap();

            assert_eq!(data, bbwt_of(s), "failed for {:?}", s);
        }
    }

    #[test]
    fn unbbwt_concrete() {
        assert_eq!(unbbwt_of(b""), b"");
        assert_eq!(unbbwt_of(b"a"), b"a");
        assert_eq!(unbbwt_of(b"cab"), b"abc");
        assert_eq!(unbbwt_of(b"annbaa"), b"banana");
        assert_eq!(unbbwt_of(b"ipssmpissii"), b"mississippi");
    }

    #[test]
    fn roundtrip_ascii() {
        for s in [
            b"hello world".as_slice(),
            b"abracadabra",
            b"zyxwvutsrqponm",
            b"aabbccaabbcc",
            b"the quick brown fox jumps over the lazy dog",
        ] {
            assert_eq!(unbbwt_of(&bbwt_of(s)), s, "failed for {:?}", s);
        }
    }

    #[test]
    fn roundtrip_wide_types() {
        let s: Vec<u16> = vec![300, 7, 300, 7, 300, 900, 2, 2, 899];

        let mut t = vec![0u16; s.len()];
        let mut csa = vec![0i64; s.len()];
        bbwt(&s, &mut t, &mut csa, 1000).unwrap();

        let mut out = vec![0u16; s.len()];
        unbbwt(&t, &mut out, 1000).unwrap();

        assert_eq!(out, s);
    }

    #[test]
    fn roundtrip_large_random() {
        use rand::{rngs::SmallRng, Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(321);

        for alph in [2usize, 4, 256] {
            let s: Vec<u8> = (0..100_000).map(|_| rng.gen_range(0..alph as u16) as u8).collect();

            let mut t = vec![0u8; s.len()];
            let mut csa = vec![0i32; s.len()];
            bbwt(&s, &mut t, &mut csa, 256).unwrap();

            let mut out = vec![0u8; s.len()];
            unbbwt(&t, &mut out, 256).unwrap();

            assert_eq!(out, s, "failed for alphabet size {}", alph);
        }
    }

    #[test]
    #[should_panic]
    fn csa_buffer_too_small() {
        let mut csa = vec![0i32; 2];
        let _ = circular_suffix_array(b"abc", &mut csa, 256);
    }

    #[test]
    #[should_panic]
    fn symbol_out_of_alphabet() {
        let mut csa = vec![0i32; 3];
        let _ = circular_suffix_array(&[1u8, 9, 1], &mut csa, 4);
    }

    use proptest::collection::*;
    use proptest::prelude::*;

    const BINARY: std::ops::Range<u8> = 0..2;
    const QUATERNARY: std::ops::Range<u8> = 0..4;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]
        #[test]
        fn roundtrip_binary(s in vec(BINARY, 0..512)) {
            prop_assert_eq!(unbbwt_of(&bbwt_of(&s)), s);
        }

        #[test]
        fn roundtrip_quaternary(s in vec(QUATERNARY, 0..512)) {
            prop_assert_eq!(unbbwt_of(&bbwt_of(&s)), s);
        }

        #[test]
        fn roundtrip_bytes(s in vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(unbbwt_of(&bbwt_of(&s)), s);
        }

        #[test]
        fn csa_permutation(s in vec(any::<u8>(), 1..512)) {
            prop_assert!(is_permutation(&csa_of(&s)));
        }

        #[test]
        fn transform_permutes_symbols(s in vec(any::<u8>(), 0..512)) {
            let mut expected = s.clone();
            expected.sort_unstable();

            let mut got = bbwt_of(&s);
            got.sort_unstable();

            prop_assert_eq!(got, expected);
        }

        #[test]
        fn in_place_agrees(s in vec(any::<u8>(), 0..512)) {
            let mut data = s.clone();
            let mut csa = vec![0i32; s.len()];

            bbwt_in_place(&mut data, &mut csa, 256).unwrap();

            prop_assert_eq!(data, bbwt_of(&s));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]
        #[test]
        fn roundtrip_binary_long(s in vec(BINARY, 0..10_000)) {
            prop_assert_eq!(unbbwt_of(&bbwt_of(&s)), s);
        }
    }
}
