//! Zero-copy, segment-backed immutable byte sequence.
//!
//! A [`Buffer`] is an ordered list of [`Segment`]s. Each segment is one of
//! three memory modes:
//!
//! - [`Segment::Owned`]: the buffer allocated and owns the bytes.
//! - [`Segment::Static`]: a `'static` slice, never needs releasing.
//! - [`Segment::Volatile`]: borrowed from an external source (the ring)
//!   for a bounded lifetime. A volatile segment is either the *primary*
//!   holder of that lifetime or a *secondary* copy taken from a primary; if
//!   the primary is dropped while secondaries still reference the same
//!   backing bytes, the bytes are copied in so the secondaries keep working
//!   ("copy-on-drop for volatile primary").

use std::cmp::Ordering;
use std::sync::Arc;

use vigil_common::{IntakeError, IntakeResult};

/// Shared backing storage for a volatile region: the raw bytes plus a count
/// of how many [`Segment::Volatile`] instances (primary + secondaries)
/// still reference it. When the primary is dropped while the count is
/// still above one, [`VolatileCell::take_ownership`] is used to promote the
/// content into an owned `Arc<[u8]>` so secondaries remain valid.
#[derive(Debug)]
struct VolatileCell {
    bytes: parking_lot::Mutex<VolatileState>,
}

#[derive(Debug)]
enum VolatileState {
    Borrowed(*const u8, usize),
    Owned(Arc<[u8]>),
}

// SAFETY: `Borrowed` pointers are only ever dereferenced while the primary
// segment that created them is alive, which the `Buffer`/`Segment` API
// enforces by copying the bytes out (`take_ownership`) before the primary
// can be dropped. The pointee itself is `Send`/`Sync` plain bytes.
unsafe impl Send for VolatileCell {}
unsafe impl Sync for VolatileCell {}

impl VolatileCell {
    fn borrowed(ptr: *const u8, len: usize) -> Arc<Self> {
        Arc::new(VolatileCell {
            bytes: parking_lot::Mutex::new(VolatileState::Borrowed(ptr, len)),
        })
    }

    fn as_slice(&self) -> Arc<[u8]> {
        let guard = self.bytes.lock();
        match &*guard {
            VolatileState::Owned(owned) => owned.clone(),
            VolatileState::Borrowed(ptr, len) => {
                // SAFETY: see the `unsafe impl Send`/`Sync` note above.
                let slice = unsafe { std::slice::from_raw_parts(*ptr, *len) };
                Arc::from(slice)
            }
        }
    }

    /// Copies the borrowed bytes into owned storage. Idempotent: calling it
    /// more than once (e.g. once per secondary still alive) is safe and
    /// cheap after the first call.
    fn take_ownership(&self) {
        let mut guard = self.bytes.lock();
        if let VolatileState::Borrowed(ptr, len) = &*guard {
            // SAFETY: see the `unsafe impl Send`/`Sync` note above.
            let slice = unsafe { std::slice::from_raw_parts(*ptr, *len) };
            *guard = VolatileState::Owned(Arc::from(slice));
        }
    }
}

/// A continuous part of the buffer's memory, in one of three modes.
#[derive(Clone)]
pub enum Segment {
    Owned(Arc<Vec<u8>>, usize, usize),
    Static(&'static [u8]),
    /// `cell` is shared between the primary segment and every secondary cut
    /// from it; `is_primary` marks the one whose drop must trigger
    /// copy-in if secondaries remain.
    Volatile {
        cell: Arc<VolatileCell>,
        offset: usize,
        len: usize,
        is_primary: bool,
    },
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment").field("len", &self.len()).finish()
    }
}

impl Segment {
    pub fn owned(data: Vec<u8>) -> Self {
        let len = data.len();
        Segment::Owned(Arc::new(data), 0, len)
    }

    pub fn static_slice(data: &'static [u8]) -> Self {
        Segment::Static(data)
    }

    /// Builds a *primary* volatile segment borrowing `data` for the
    /// duration the returned `Segment` (and its clones) are alive. Callers
    /// must ensure `data` outlives every use of the returned segment until
    /// [`Buffer::serialize`] or a drop has forced a copy-in.
    ///
    /// # Safety
    /// `data` must remain valid for as long as any segment or subbuffer
    /// derived from the returned value exists and has not been serialized.
    pub unsafe fn volatile(data: &[u8]) -> Self {
        Segment::Volatile {
            cell: VolatileCell::borrowed(data.as_ptr(), data.len()),
            offset: 0,
            len: data.len(),
            is_primary: true,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Segment::Owned(_, _, len) => *len,
            Segment::Static(s) => s.len(),
            Segment::Volatile { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_bytes(&self) -> Arc<[u8]> {
        match self {
            Segment::Owned(data, start, len) => Arc::from(&data[*start..*start + *len]),
            Segment::Static(s) => Arc::from(*s),
            Segment::Volatile { cell, offset, len, .. } => {
                let full = cell.as_slice();
                Arc::from(&full[*offset..*offset + *len])
            }
        }
    }

    fn sub(&self, start: usize, end: usize) -> Segment {
        debug_assert!(start <= end && end <= self.len());
        match self {
            Segment::Owned(data, off, _) => Segment::Owned(data.clone(), off + start, end - start),
            Segment::Static(s) => Segment::Static(&s[start..end]),
            Segment::Volatile { cell, offset, .. } => Segment::Volatile {
                cell: cell.clone(),
                offset: offset + start,
                len: end - start,
                is_primary: false,
            },
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Segment::Volatile { cell, is_primary: true, .. } = self {
            // Only the primary triggers copy-in; secondaries simply drop
            // their `Arc` clone. If this was the last reference to `cell`
            // entirely, the copy is wasted work but harmless.
            if Arc::strong_count(cell) > 1 {
                cell.take_ownership();
            }
        }
    }
}

/// Zero-copy, segment-backed immutable byte sequence. See the module docs
/// for the memory-mode contract.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    segments: Vec<Segment>,
    len: usize,
    /// Cached pointer into a single collapsed segment, populated by
    /// `serialize()`.
    serialized: Option<Arc<[u8]>>,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer::default()
    }

    pub fn from_static(data: &'static [u8]) -> Self {
        Buffer::from_segment(Segment::static_slice(data))
    }

    pub fn from_owned(data: Vec<u8>) -> Self {
        let len = data.len();
        Buffer {
            serialized: Some(Arc::from(data.as_slice())),
            segments: vec![Segment::owned(data)],
            len,
        }
    }

    /// # Safety
    /// See [`Segment::volatile`].
    pub unsafe fn from_volatile(data: &[u8]) -> Self {
        Buffer::from_segment(Segment::volatile(data))
    }

    fn from_segment(segment: Segment) -> Self {
        let len = segment.len();
        Buffer {
            segments: vec![segment],
            len,
            serialized: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments_number(&self) -> usize {
        self.segments.len()
    }

    /// Idempotently collapses the buffer into a single owned segment.
    /// Required before any [`Buffer::data`] call.
    pub fn serialize(&mut self) {
        if self.serialized.is_some() {
            return;
        }
        let mut joined = Vec::with_capacity(self.len);
        for seg in &self.segments {
            joined.extend_from_slice(&seg.as_bytes());
        }
        let owned: Arc<[u8]> = Arc::from(joined);
        self.serialized = Some(owned.clone());
        self.segments = vec![Segment::Owned(Arc::new(owned.to_vec()), 0, owned.len())];
    }

    /// Returns a pointer to the start of the serialized buffer. Calls
    /// `serialize()` if needed.
    pub fn data(&mut self) -> Arc<[u8]> {
        self.serialize();
        self.serialized.clone().expect("serialize() just ran")
    }

    /// Returns the buffer contents as a contiguous slice without mutating
    /// `self`, copying only if more than one segment is present.
    pub fn as_contiguous(&self) -> Arc<[u8]> {
        if let Some(cached) = &self.serialized {
            return cached.clone();
        }
        if self.segments.len() == 1 {
            return self.segments[0].as_bytes();
        }
        let mut joined = Vec::with_capacity(self.len);
        for seg in &self.segments {
            joined.extend_from_slice(&seg.as_bytes());
        }
        Arc::from(joined)
    }

    /// New buffer sharing underlying containers; O(segments).
    pub fn subbuffer(&self, start: usize, end: usize) -> IntakeResult<Buffer> {
        if start > end || end > self.len {
            return Err(IntakeError::parse(format!(
                "subbuffer range [{start},{end}) exceeds buffer length {}",
                self.len
            )));
        }
        let mut result_segments = Vec::new();
        let mut pos = 0usize;
        for seg in &self.segments {
            let seg_start = pos;
            let seg_end = pos + seg.len();
            pos = seg_end;

            let lo = start.max(seg_start);
            let hi = end.min(seg_end);
            if lo < hi {
                result_segments.push(seg.sub(lo - seg_start, hi - seg_start));
            }
        }
        Ok(Buffer {
            len: end - start,
            segments: result_segments,
            serialized: None,
        })
    }

    /// Returns a typed, borrowed view at `offset`. Fails if `offset +
    /// size_of::<T>()` exceeds the buffer length. The caller picks `T` to
    /// be a plain-old-data little/big-endian primitive; this function only
    /// guards the bounds check, the caller interprets the bytes.
    pub fn typed_view(&self, offset: usize, size: usize) -> IntakeResult<Arc<[u8]>> {
        if offset + size > self.len {
            return Err(IntakeError::parse(format!(
                "typed view at offset {offset} size {size} exceeds buffer length {}",
                self.len
            )));
        }
        let contiguous = self.as_contiguous();
        Ok(Arc::from(&contiguous[offset..offset + size]))
    }

    pub fn contains(&self, needle: u8) -> bool {
        self.as_contiguous().iter().any(|b| *b == needle)
    }

    pub fn find_first_of(&self, needle: u8, start: usize) -> Option<usize> {
        let data = self.as_contiguous();
        data.iter().skip(start).position(|b| *b == needle).map(|i| i + start)
    }

    pub fn find_last_of(&self, needle: u8) -> Option<usize> {
        let data = self.as_contiguous();
        data.iter().rposition(|b| *b == needle)
    }

    pub fn find_first_not_of(&self, needle: u8, start: usize) -> Option<usize> {
        let data = self.as_contiguous();
        data.iter().skip(start).position(|b| *b != needle).map(|i| i + start)
    }

    pub fn is_equal_lower_case(&self, other: &Buffer) -> bool {
        let a = self.as_contiguous();
        let b = other.as_contiguous();
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
    }

    pub fn truncate_head(&mut self, size: usize) {
        let end = self.len;
        if let Ok(sub) = self.subbuffer(size.min(end), end) {
            *self = sub;
        }
    }

    pub fn truncate_tail(&mut self, size: usize) {
        let new_end = self.len.saturating_sub(size);
        if let Ok(sub) = self.subbuffer(0, new_end) {
            *self = sub;
        }
    }

    pub fn keep_head(&mut self, size: usize) {
        if let Ok(sub) = self.subbuffer(0, size.min(self.len)) {
            *self = sub;
        }
    }

    pub fn keep_tail(&mut self, size: usize) {
        let start = self.len.saturating_sub(size);
        if let Ok(sub) = self.subbuffer(start, self.len) {
            *self = sub;
        }
    }

    pub fn concat(&self, other: &Buffer) -> Buffer {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.clone());
        Buffer {
            len: self.len + other.len,
            segments,
            serialized: None,
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.as_contiguous() == other.as_contiguous()
    }
}
impl Eq for Buffer {}

impl PartialOrd for Buffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.as_contiguous().cmp(&other.as_contiguous()))
    }
}
impl Ord for Buffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_contiguous().cmp(&other.as_contiguous())
    }
}

impl std::hash::Hash for Buffer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_contiguous().hash(state);
    }
}

impl From<&str> for Buffer {
    fn from(value: &str) -> Self {
        Buffer::from_owned(value.as_bytes().to_vec())
    }
}

impl From<String> for Buffer {
    fn from(value: String) -> Self {
        Buffer::from_owned(value.into_bytes())
    }
}

impl std::fmt::Display for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.as_contiguous()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_buffer_round_trips() {
        let buf = Buffer::from_owned(b"hello world".to_vec());
        assert_eq!(buf.len(), 11);
        assert_eq!(&*buf.as_contiguous(), b"hello world");
    }

    #[test]
    fn subbuffer_spans_multiple_segments() {
        let a = Buffer::from_owned(b"hello ".to_vec());
        let b = Buffer::from_owned(b"world".to_vec());
        let joined = a.concat(&b);
        assert_eq!(joined.segments_number(), 2);

        let sub = joined.subbuffer(3, 8).unwrap();
        assert_eq!(&*sub.as_contiguous(), b"lo wo");
    }

    #[test]
    fn subbuffer_out_of_range_errors() {
        let buf = Buffer::from_owned(b"short".to_vec());
        assert!(buf.subbuffer(0, 100).is_err());
    }

    #[test]
    fn concat_then_subbuffer_equals_serialized_subbuffer() {
        // Property P4: (a + b).subbuffer(i, j) == a.serialize().subbuffer(i, j)
        let a = Buffer::from_owned(b"abcdef".to_vec());
        let b = Buffer::from_owned(b"ghijkl".to_vec());
        let joined = a.concat(&b);

        let mut a_serialized = a.clone();
        a_serialized.serialize();
        let whole_serialized = a_serialized.concat(&b);

        for i in 0..=joined.len() {
            for j in i..=joined.len() {
                assert_eq!(
                    joined.subbuffer(i, j).unwrap(),
                    whole_serialized.subbuffer(i, j).unwrap()
                );
            }
        }
    }

    #[test]
    fn volatile_segment_survives_primary_drop_via_copy_in() {
        let backing = vec![1u8, 2, 3, 4, 5];
        let (secondary, primary_len) = {
            // SAFETY: `backing` outlives this scope.
            let primary = unsafe { Buffer::from_volatile(&backing) };
            let secondary = primary.subbuffer(1, 4).unwrap();
            (secondary, primary.len())
            // `primary` drops here; copy-in should preserve `secondary`.
        };
        assert_eq!(primary_len, 5);
        assert_eq!(&*secondary.as_contiguous(), &[2, 3, 4]);
    }

    #[test]
    fn is_equal_lower_case_ignores_case() {
        let a = Buffer::from("Content-Type");
        let b = Buffer::from("content-type");
        assert!(a.is_equal_lower_case(&b));
    }

    #[test]
    fn find_first_of_locates_delimiter() {
        let buf = Buffer::from("a,b,c");
        assert_eq!(buf.find_first_of(b',', 0), Some(1));
        assert_eq!(buf.find_first_of(b',', 2), Some(3));
        assert_eq!(buf.find_first_of(b'z', 0), None);
    }
}
