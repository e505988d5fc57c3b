//! Functionality relating to the text value type
//!
//! `Text` is the string type stored as array keys and values. It is a single
//! machine word with three storage classes:
//!
//! - *inline*: strings of up to 7 bytes are packed directly into the word and
//!   never allocate;
//! - *heap*: longer strings live in a single allocation holding a reference
//!   count, a cached hash and the bytes;
//! - *interned*: heap layout whose count is pinned at the static sentinel.
//!   Interned strings are owned by the process-wide intern cache and are never
//!   freed or mutated, so handle identity is a valid equality fast path.

use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::HashSet;
use lazy_static::lazy_static;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout, LayoutError};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Deref;
use std::ptr::{copy_nonoverlapping, NonNull};
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};
use std::sync::Mutex;

use crate::STATIC_RC;

/// Alignment of heap headers; the low bits of a heap word are always zero.
const ALIGNMENT: usize = 8;
const TAG_BITS: usize = 3;
const TAG_INLINE: usize = 1;

/// Longest string that fits in the handle word itself.
const INLINE_MAX_LEN: usize = 7;

#[repr(C)]
#[repr(align(8))]
struct Header {
    rc: AtomicU32,
    /// Cached content hash; 0 means "not yet computed".
    hash: AtomicU32,
    // 32 bits of length allows up to 4 GiB of text
    len: u32,
}

impl Header {
    fn len(&self) -> usize {
        self.len as usize
    }
    fn str_ptr(&self) -> *const u8 {
        // Safety: pointers to the end of structs are allowed
        unsafe { (self as *const Header).add(1).cast() }
    }
    fn bytes(&self) -> &[u8] {
        // Safety: `len` must be accurate
        unsafe { std::slice::from_raw_parts(self.str_ptr(), self.len()) }
    }
    fn str(&self) -> &str {
        // Safety: UTF-8 enforced on construction
        unsafe { std::str::from_utf8_unchecked(self.bytes()) }
    }
}

lazy_static! {
    /// Process-wide hash state; every cached text hash comes from here so
    /// hashes are comparable across all keys for the lifetime of the process.
    static ref HASH_STATE: DefaultHashBuilder = DefaultHashBuilder::default();
    static ref INTERN_CACHE: Mutex<HashSet<InternEntry>> = Mutex::new(HashSet::new());
}

fn content_hash(s: &str) -> u32 {
    let mut hasher = HASH_STATE.build_hasher();
    s.hash(&mut hasher);
    let h = hasher.finish() as u32;
    // 0 is reserved to mean "not computed"
    if h == 0 {
        1
    } else {
        h
    }
}

/// Cache entry owning a pinned heap header.
struct InternEntry {
    ptr: NonNull<Header>,
}

// Safety: entries are immutable for the life of the process and the count is
// atomic.
unsafe impl Send for InternEntry {}

impl InternEntry {
    fn header(&self) -> &Header {
        // Safety: pointer is always valid
        unsafe { self.ptr.as_ref() }
    }
}

impl PartialEq for InternEntry {
    fn eq(&self, other: &Self) -> bool {
        self.header().str() == other.header().str()
    }
}
impl Eq for InternEntry {}
impl Hash for InternEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.header().str().hash(state);
    }
}
impl Borrow<str> for InternEntry {
    fn borrow(&self) -> &str {
        self.header().str()
    }
}

/// The text value type: an immutable string with small-buffer and interning
/// optimizations.
///
/// Cloning a `Text` is cheap: inline strings are copied bitwise, heap strings
/// bump an embedded reference count, and interned strings are pinned for the
/// life of the process and skip counting entirely.
///
/// Two handles with the same interned (or inline) identity compare equal
/// without looking at the bytes; content comparison is the fallback for
/// un-interned heap text.
pub struct Text {
    raw: usize,
}

// Safety: the heap header is immutable apart from its atomic fields.
unsafe impl Send for Text {}
unsafe impl Sync for Text {}

impl Text {
    fn layout(len: usize) -> Result<Layout, LayoutError> {
        Ok(Layout::new::<Header>()
            .extend(Layout::array::<u8>(len)?)?
            .0
            .pad_to_align())
    }

    fn alloc(s: &str, rc: u32) -> NonNull<Header> {
        assert!(s.len() < u32::MAX as usize);
        let layout = Self::layout(s.len()).expect("layout is expected to return a valid value");
        unsafe {
            let ptr = alloc(layout).cast::<Header>();
            if ptr.is_null() {
                handle_alloc_error(layout);
            }
            ptr.write(Header {
                rc: AtomicU32::new(rc),
                hash: AtomicU32::new(0),
                len: s.len() as u32,
            });
            copy_nonoverlapping(s.as_ptr(), ptr.add(1).cast::<u8>(), s.len());
            NonNull::new_unchecked(ptr)
        }
    }

    fn dealloc(ptr: *mut Header) {
        unsafe {
            let layout = Self::layout((*ptr).len()).expect("allocated with a valid layout");
            dealloc(ptr.cast(), layout);
        }
    }

    /// Pack a short string into the handle word.
    /// Safety: `s` must be at most [`INLINE_MAX_LEN`] bytes.
    unsafe fn new_inline(s: &str) -> Self {
        // 1 byte for the tag and length, up to 7 bytes for the string
        let bytes = s.as_bytes();
        let mut data = [0u8; 8];
        data[0] = ((s.len() << TAG_BITS) | TAG_INLINE) as u8;
        data[1..1 + bytes.len()].copy_from_slice(bytes);
        Text {
            raw: usize::from_ne_bytes(data),
        }
    }

    /// The empty string. Does not allocate.
    #[must_use]
    pub fn empty() -> Self {
        // Safety: zero bytes trivially fit inline
        unsafe { Self::new_inline("") }
    }

    /// Creates an un-interned `Text`. Short strings are stored inline; longer
    /// ones get their own counted allocation.
    #[must_use]
    pub fn new(s: &str) -> Self {
        if s.len() <= INLINE_MAX_LEN {
            unsafe { Self::new_inline(s) }
        } else {
            Text {
                raw: Self::alloc(s, 1).as_ptr() as usize,
            }
        }
    }

    /// Interns `s` in the process-wide cache and returns the canonical handle.
    ///
    /// Interned text is pinned for the life of the process: its count is the
    /// static sentinel and it is never freed. Use this for literal and other
    /// long-lived strings; prefer [`Text::new`] for transient values.
    #[must_use]
    pub fn intern(s: &str) -> Self {
        if s.len() <= INLINE_MAX_LEN {
            // Inline identity *is* the content, which makes short strings
            // interned by construction.
            return unsafe { Self::new_inline(s) };
        }
        let mut cache = INTERN_CACHE.lock().expect("intern cache lock should succeed");
        let entry = cache.get_or_insert_with(s, |s| InternEntry {
            ptr: Self::alloc(s, STATIC_RC),
        });
        Text {
            raw: entry.ptr.as_ptr() as usize,
        }
    }

    fn is_inline(&self) -> bool {
        self.raw % ALIGNMENT == TAG_INLINE
    }

    fn header(&self) -> &Header {
        debug_assert!(!self.is_inline());
        // Safety: a non-inline word is a valid header pointer
        unsafe { &*(self.raw as *const Header) }
    }

    /// Returns the length of this string in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.is_inline() {
            (self.raw & 0xFF) >> TAG_BITS
        } else {
            self.header().len()
        }
    }

    /// Returns `true` if this is the empty string "".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtains a `&str` from this `Text`. This is a cheap operation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        if self.is_inline() {
            let bytes: &[u8; 8] = unsafe { &*(&self.raw as *const usize as *const [u8; 8]) };
            // Safety: inline bytes are a whole `str` copied on construction
            unsafe { std::str::from_utf8_unchecked(&bytes[1..1 + self.len()]) }
        } else {
            self.header().str()
        }
    }

    /// Obtains a byte slice from this `Text`.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }

    /// Whether this handle has interned identity: equal content implies equal
    /// handle bits, so identity comparison doubles as equality. True for all
    /// inline strings and for cache-pinned heap strings.
    #[must_use]
    pub fn is_interned(&self) -> bool {
        self.is_inline() || self.header().rc.load(Relaxed) == STATIC_RC
    }

    /// The cached content hash, computing and memoizing it on first use.
    /// Every key lookup goes through this instead of rehashing the bytes.
    #[must_use]
    pub fn hash_code(&self) -> u32 {
        if self.is_inline() {
            return content_hash(self.as_str());
        }
        let hd = self.header();
        let mut h = hd.hash.load(Relaxed);
        if h == 0 {
            h = content_hash(hd.str());
            hd.hash.store(h, Relaxed);
        }
        h
    }

    /// Identity comparison: same word, same storage.
    #[must_use]
    pub fn same_identity(&self, other: &Text) -> bool {
        self.raw == other.raw
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self) -> u32 {
        if self.is_inline() {
            STATIC_RC
        } else {
            self.header().rc.load(Relaxed)
        }
    }
}

impl Clone for Text {
    fn clone(&self) -> Self {
        if !self.is_inline() {
            let hd = self.header();
            if hd.rc.load(Relaxed) != STATIC_RC {
                hd.rc.fetch_add(1, Relaxed);
            }
        }
        Text { raw: self.raw }
    }
}

impl Drop for Text {
    fn drop(&mut self) {
        if self.is_inline() {
            return;
        }
        let hd = self.header();
        if hd.rc.load(Relaxed) == STATIC_RC {
            // Interned text is process-lifetime; never freed.
            return;
        }
        if hd.rc.fetch_sub(1, Relaxed) == 1 {
            Self::dealloc(self.raw as *mut Header);
        }
    }
}

impl Deref for Text {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Default for Text {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&str> for Text {
    fn from(other: &str) -> Self {
        Self::intern(other)
    }
}

impl From<String> for Text {
    fn from(other: String) -> Self {
        Self::new(other.as_str())
    }
}

impl From<&String> for Text {
    fn from(other: &String) -> Self {
        Self::new(other.as_str())
    }
}

impl From<Text> for String {
    fn from(other: Text) -> Self {
        other.as_str().into()
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        // Interned identity is a valid fast path; content is the fallback.
        if self.raw == other.raw {
            return true;
        }
        self.len() == other.len() && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Text {}

impl PartialEq<str> for Text {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<Text> for str {
    fn eq(&self, other: &Text) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<&str> for Text {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Ord for Text {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.raw == other.raw {
            Ordering::Equal
        } else {
            self.as_str().cmp(other.as_str())
        }
    }
}

impl PartialOrd for Text {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

impl Debug for Text {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

impl Display for Text {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_intern() {
        let x = Text::intern("foofoofoo");
        let y = Text::intern("barbarbar");
        let z = Text::intern("foofoofoo");

        assert_eq!(x.as_str().as_ptr(), z.as_str().as_ptr());
        assert_ne!(x.as_str().as_ptr(), y.as_str().as_ptr());
        assert_eq!(x.as_str(), "foofoofoo");
        assert_eq!(y.as_str(), "barbarbar");
        assert!(x.is_interned());
    }

    #[test]
    fn inline_strings() {
        for s in ["", "a", "hi", "hello", "1234567"] {
            let t = Text::new(s);
            assert!(t.is_inline(), "{s:?} should be inline");
            assert!(t.is_interned());
            assert_eq!(t.as_str(), s);
            assert_eq!(t.len(), s.len());
        }
        let t = Text::new("12345678");
        assert!(!t.is_inline());
        assert_eq!(t.as_str(), "12345678");
    }

    #[test]
    fn inline_identity_is_content() {
        let a = Text::new("key");
        let b = Text::intern("key");
        assert!(a.same_identity(&b));
    }

    #[test]
    fn utf8_boundaries() {
        let crab = Text::new("🦀"); // 4 bytes
        assert!(crab.is_inline());
        assert_eq!(crab.as_str(), "🦀");

        let two = Text::new("🦀🔥"); // 8 bytes, spills to the heap
        assert!(!two.is_inline());
        assert_eq!(two.as_str(), "🦀🔥");
    }

    #[test]
    fn heap_refcounting() {
        let t = Text::new("a longer string");
        assert_eq!(t.refcount(), 1);
        let u = t.clone();
        assert_eq!(t.refcount(), 2);
        drop(u);
        assert_eq!(t.refcount(), 1);
    }

    #[test]
    fn interned_skips_counting() {
        let t = Text::intern("interned-and-pinned");
        let rc = t.refcount();
        let u = t.clone();
        assert_eq!(t.refcount(), rc);
        drop(u);
        assert_eq!(t.refcount(), rc);
    }

    #[test]
    fn hash_is_cached_and_stable() {
        let t = Text::new("hash me, I am long");
        let h1 = t.hash_code();
        let h2 = t.hash_code();
        assert_eq!(h1, h2);
        assert_ne!(h1, 0);

        let u = Text::new("hash me, I am long");
        assert_eq!(u.hash_code(), h1);
    }

    #[test]
    fn content_equality_fallback() {
        let a = Text::new("not interned text");
        let b = Text::new("not interned text");
        assert!(!a.same_identity(&b));
        assert_eq!(a, b);
    }
}
