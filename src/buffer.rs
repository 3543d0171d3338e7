//! Zero-copy character buffers
//!
//! A [`CharBuffer`] is an immutable window (offset + length) into a shared,
//! reference-counted character array. Views, substrings and split segments
//! share the backing array, so turning one raw line into a dozen record
//! fields costs a dozen `Arc` clones instead of a dozen string allocations.
//!
//! The buffer itself can never be mutated. Code that needs to assemble
//! characters uses a [`CharBufferBuilder`] and converts it once finished.

use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Immutable, cheaply clonable view over a shared character array.
///
/// Equality, ordering and hashing consider only the viewed characters, never
/// the identity of the backing array or the position of the window in it.
#[derive(Clone)]
pub struct CharBuffer {
    src: Arc<[char]>,
    from: usize,
    len: usize,
    hash: OnceCell<u32>,
}

impl CharBuffer {
    /// An empty buffer.
    pub fn empty() -> Self {
        Self::from_shared(Arc::from(Vec::new()))
    }

    /// Wrap a complete backing array.
    pub fn from_shared(src: Arc<[char]>) -> Self {
        let len = src.len();
        Self {
            src,
            from: 0,
            len,
            hash: OnceCell::new(),
        }
    }

    fn window(&self, from: usize, len: usize) -> Self {
        debug_assert!(from + len <= self.src.len());
        Self {
            src: Arc::clone(&self.src),
            from,
            len,
            hash: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The viewed characters.
    pub fn as_chars(&self) -> &[char] {
        &self.src[self.from..self.from + self.len]
    }

    /// Character at `pos`, or `None` when `pos` lies outside the view.
    pub fn get(&self, pos: usize) -> Option<char> {
        self.as_chars().get(pos).copied()
    }

    /// Character at `pos`, or `'\0'` when `pos` lies outside the view.
    pub fn peek_ahead(&self, pos: usize) -> char {
        self.get(pos).unwrap_or('\0')
    }

    /// View of `len` characters starting at `from`, relative to this view.
    ///
    /// # Panics
    ///
    /// Panics if the requested window does not fit into this view.
    pub fn view(&self, from: usize, len: usize) -> Self {
        match self.get_view(from, len) {
            Some(view) => view,
            None => panic!(
                "view {}..{} out of range for buffer of length {}",
                from,
                from.saturating_add(len),
                self.len
            ),
        }
    }

    /// Checked variant of [`CharBuffer::view`].
    pub fn get_view(&self, from: usize, len: usize) -> Option<Self> {
        let end = from.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(self.window(self.from + from, len))
    }

    /// View of the characters in `from..to`, relative to this view.
    ///
    /// # Panics
    ///
    /// Panics if `from > to` or `to > self.len()`.
    pub fn view_to(&self, from: usize, to: usize) -> Self {
        assert!(from <= to, "view start {} is after end {}", from, to);
        self.view(from, to - from)
    }

    /// View from `from` to the end of this view.
    pub fn substring_from(&self, from: usize) -> Self {
        self.view_to(from, self.len)
    }

    /// Lazily split at every occurrence of `separator`.
    ///
    /// A trailing segment after the last separator is only produced when the
    /// buffer does not end with the separator; an empty buffer produces a
    /// single empty segment.
    pub fn split(&self, separator: char) -> Split {
        Split {
            buffer: self.clone(),
            separator,
            start: 0,
            emitted: false,
            finished: false,
        }
    }

    pub fn index_of_char(&self, c: char) -> Option<usize> {
        self.as_chars().iter().position(|&x| x == c)
    }

    pub fn index_of(&self, needle: &CharBuffer) -> Option<usize> {
        self.index_of_from(needle, 0)
    }

    /// First position at or after `from` where `needle` occurs.
    ///
    /// Scans for candidate positions of the needle's first character and
    /// compares the remainder only there.
    pub fn index_of_from(&self, needle: &CharBuffer, from: usize) -> Option<usize> {
        let hay = self.as_chars();
        let pat = needle.as_chars();

        if from > hay.len() {
            return None;
        }
        if pat.is_empty() {
            return Some(from);
        }
        if pat.len() > hay.len() {
            return None;
        }

        let first = pat[0];
        let max = hay.len() - pat.len();
        let mut i = from;
        while i <= max {
            if hay[i] != first {
                i += 1;
                while i <= max && hay[i] != first {
                    i += 1;
                }
            }
            if i <= max && hay[i + 1..i + pat.len()] == pat[1..] {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    pub fn last_index_of(&self, needle: &CharBuffer) -> Option<usize> {
        self.last_index_of_from(needle, self.len)
    }

    /// Last position at or before `from` where `needle` occurs.
    pub fn last_index_of_from(&self, needle: &CharBuffer, from: usize) -> Option<usize> {
        let hay = self.as_chars();
        let pat = needle.as_chars();
        let max = hay.len().checked_sub(pat.len())?;
        let start = from.min(max);

        (0..=start).rev().find(|&i| hay[i..i + pat.len()] == *pat)
    }

    pub fn starts_with(&self, prefix: &CharBuffer) -> bool {
        self.as_chars().starts_with(prefix.as_chars())
    }

    pub fn ends_with(&self, suffix: &CharBuffer) -> bool {
        self.as_chars().ends_with(suffix.as_chars())
    }

    /// Concatenate two buffers into one freshly allocated backing array.
    pub fn concat(a: &CharBuffer, b: &CharBuffer) -> Self {
        // exact-size iterator, so the Arc slice is allocated once
        let src: Arc<[char]> = a.as_chars().iter().chain(b.as_chars()).copied().collect();
        Self::from_shared(src)
    }

    pub fn concat3(a: &CharBuffer, b: &CharBuffer, c: &CharBuffer) -> Self {
        let src: Arc<[char]> = a
            .as_chars()
            .iter()
            .chain(b.as_chars())
            .chain(c.as_chars())
            .copied()
            .collect();
        Self::from_shared(src)
    }

    pub fn concat_char(a: &CharBuffer, c: char) -> Self {
        let src: Arc<[char]> = a
            .as_chars()
            .iter()
            .copied()
            .chain(std::iter::once(c))
            .collect();
        Self::from_shared(src)
    }

    /// Copy of this buffer with every `c` replaced by `replacement`.
    pub fn replace_char(&self, c: char, replacement: &str) -> Self {
        let mut builder = CharBufferBuilder::with_capacity(self.len + replacement.len());
        for &x in self.as_chars() {
            if x == c {
                builder.push_str(replacement);
            } else {
                builder.push(x);
            }
        }
        builder.build()
    }

    pub fn to_text(&self) -> String {
        self.as_chars().iter().collect()
    }

    /// Compare the viewed content against a string slice without allocating.
    pub fn eq_str(&self, s: &str) -> bool {
        let mut chars = s.chars();
        for &c in self.as_chars() {
            if chars.next() != Some(c) {
                return false;
            }
        }
        chars.next().is_none()
    }

    /// Polynomial (base 31) hash of the viewed content, cached after the
    /// first call.
    pub fn hash_code(&self) -> u32 {
        *self.hash.get_or_init(|| polynomial_hash(self.as_chars()))
    }

    pub fn to_debug_string(&self) -> String {
        format!(
            "base={}\ncurrent={}\nfrom={}, length={}",
            self.src.iter().collect::<String>(),
            self,
            self.from,
            self.len
        )
    }
}

// Three characters per round; equivalent to the plain `h * 31 + c` fold.
fn polynomial_hash(chars: &[char]) -> u32 {
    const P1: u32 = 31;
    const P2: u32 = 31 * 31;
    const P3: u32 = 31 * 31 * 31;

    let mut h: u32 = 0;
    let mut blocks = chars.chunks_exact(3);
    for block in &mut blocks {
        h = h
            .wrapping_mul(P3)
            .wrapping_add((block[0] as u32).wrapping_mul(P2))
            .wrapping_add((block[1] as u32).wrapping_mul(P1))
            .wrapping_add(block[2] as u32);
    }
    for &c in blocks.remainder() {
        h = h.wrapping_mul(P1).wrapping_add(c as u32);
    }
    h
}

impl Default for CharBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&str> for CharBuffer {
    fn from(s: &str) -> Self {
        let chars: Vec<char> = s.chars().collect();
        Self::from_shared(Arc::from(chars))
    }
}

impl From<String> for CharBuffer {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Vec<char>> for CharBuffer {
    fn from(chars: Vec<char>) -> Self {
        Self::from_shared(Arc::from(chars))
    }
}

impl PartialEq for CharBuffer {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        if Arc::ptr_eq(&self.src, &other.src) && self.from == other.from {
            return true;
        }
        self.as_chars() == other.as_chars()
    }
}

impl Eq for CharBuffer {}

impl PartialEq<str> for CharBuffer {
    fn eq(&self, other: &str) -> bool {
        self.eq_str(other)
    }
}

impl PartialEq<&str> for CharBuffer {
    fn eq(&self, other: &&str) -> bool {
        self.eq_str(other)
    }
}

impl PartialOrd for CharBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CharBuffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_chars().cmp(other.as_chars())
    }
}

impl Hash for CharBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

impl fmt::Display for CharBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use fmt::Write;
        for &c in self.as_chars() {
            f.write_char(c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CharBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharBuffer({:?})", self.to_text())
    }
}

impl Serialize for CharBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Iterator returned by [`CharBuffer::split`].
pub struct Split {
    buffer: CharBuffer,
    separator: char,
    start: usize,
    emitted: bool,
    finished: bool,
}

impl Iterator for Split {
    type Item = CharBuffer;

    fn next(&mut self) -> Option<CharBuffer> {
        if self.finished {
            return None;
        }

        let len = self.buffer.len();
        let rest = &self.buffer.as_chars()[self.start..];
        match rest.iter().position(|&c| c == self.separator) {
            Some(offset) => {
                let end = self.start + offset;
                let segment = self.buffer.view_to(self.start, end);
                self.start = end + 1;
                self.emitted = true;
                Some(segment)
            }
            None => {
                self.finished = true;
                if !self.emitted || self.start < len {
                    Some(self.buffer.view_to(self.start, len))
                } else {
                    None
                }
            }
        }
    }
}

impl std::iter::FusedIterator for Split {}

/// Mutable, exclusively owned character storage that turns into a
/// [`CharBuffer`].
#[derive(Debug, Default, Clone)]
pub struct CharBufferBuilder {
    chars: Vec<char>,
}

impl CharBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chars: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn push(&mut self, c: char) -> &mut Self {
        self.chars.push(c);
        self
    }

    pub fn push_str(&mut self, s: &str) -> &mut Self {
        self.chars.extend(s.chars());
        self
    }

    pub fn push_buffer(&mut self, b: &CharBuffer) -> &mut Self {
        self.chars.extend_from_slice(b.as_chars());
        self
    }

    /// Overwrite the character at `pos`. Returns `false` when `pos` is out of
    /// range.
    pub fn put(&mut self, pos: usize, c: char) -> bool {
        match self.chars.get_mut(pos) {
            Some(slot) => {
                *slot = c;
                true
            }
            None => false,
        }
    }

    pub fn build(self) -> CharBuffer {
        CharBuffer::from(self.chars)
    }
}

impl From<&str> for CharBufferBuilder {
    fn from(s: &str) -> Self {
        Self {
            chars: s.chars().collect(),
        }
    }
}
