//! Shared-Memory Ring (§4.5).
//!
//! A fixed-capacity FIFO of length-prefixed frames living in a named,
//! pre-sized memory-mapped file, owned by the agent and joined by one
//! plugin worker. The header occupies the first [`HEADER_LEN`] bytes of
//! the mapping; everything after it is the circular data area. A magic
//! value plus an explicit corruption flag let [`SharedRing::is_corrupted`]
//! distinguish a sane-but-empty ring from one a misbehaving peer has
//! scribbled over.
//!
//! The mapped file is created by this process and carries the worker's
//! `uid`/`gid` in its metadata for diagnostics only — the actual trust
//! boundary is the handshake's peer-credential check (`UnixStream::
//! peer_cred`), not filesystem ownership (§7: "a transport, not an
//! authorization boundary").

use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use vigil_common::{IntakeError, IntakeResult};

const MAGIC: u32 = 0x52_49_4E_47; // "RING"
const HEADER_LEN: usize = 32;
const DEFAULT_BYTES_PER_ELEMENT: usize = 4096;

const OFF_MAGIC: usize = 0;
const OFF_WRITE: usize = 4;
const OFF_READ: usize = 8;
const OFF_COUNT: usize = 12;
const OFF_CAPACITY_ELEMENTS: usize = 16;
const OFF_DATA_LEN: usize = 20;
const OFF_USED_BYTES: usize = 24;
const OFF_CORRUPTED: usize = 28;

/// One dequeued frame: its total length and a borrow into the mapping.
/// Borrowed rather than copied because the ring, like the rest of this
/// crate's transport layer, treats the mapped bytes as volatile memory the
/// codec reads in place (`crate::session` holds no reference across a
/// `pop`).
pub enum Received<'a> {
    Frame { data: &'a [u8] },
    Corrupted,
    Empty,
}

/// A single worker's shared-memory ring, mapped into this process.
pub struct SharedRing {
    mmap: MmapMut,
    path: PathBuf,
    unique_id: String,
    uid: u32,
    gid: u32,
}

impl SharedRing {
    /// Creates (or truncates and recreates) the backing file at `path`,
    /// sized for `segments * elements` frames of up to
    /// [`DEFAULT_BYTES_PER_ELEMENT`] bytes each, and maps it.
    pub fn init(
        unique_id: &str,
        uid: u32,
        gid: u32,
        segments: u32,
        elements: u32,
        path: &Path,
    ) -> IntakeResult<Self> {
        let data_len = (segments.max(1) as usize)
            * (elements.max(1) as usize)
            * DEFAULT_BYTES_PER_ELEMENT;
        let total_len = HEADER_LEN + data_len;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_len as u64)?;

        let mut perms = file.metadata()?.permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o666);
        std::fs::set_permissions(path, perms)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        write_u32(&mut mmap, OFF_MAGIC, MAGIC);
        write_u32(&mut mmap, OFF_WRITE, 0);
        write_u32(&mut mmap, OFF_READ, 0);
        write_u32(&mut mmap, OFF_COUNT, 0);
        write_u32(&mut mmap, OFF_CAPACITY_ELEMENTS, segments.max(1) * elements.max(1));
        write_u32(&mut mmap, OFF_DATA_LEN, data_len as u32);
        write_u32(&mut mmap, OFF_USED_BYTES, 0);
        write_u32(&mut mmap, OFF_CORRUPTED, 0);

        Ok(SharedRing {
            mmap,
            path: path.to_path_buf(),
            unique_id: unique_id.to_string(),
            uid,
            gid,
        })
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    fn read_header_u32(&self, offset: usize) -> u32 {
        read_u32(&self.mmap, offset)
    }

    fn data_len(&self) -> usize {
        self.read_header_u32(OFF_DATA_LEN) as usize
    }

    fn capacity_elements(&self) -> u32 {
        self.read_header_u32(OFF_CAPACITY_ELEMENTS)
    }

    pub fn is_corrupted(&self) -> bool {
        self.read_header_u32(OFF_MAGIC) != MAGIC || self.read_header_u32(OFF_CORRUPTED) != 0
    }

    pub fn is_data_available(&self) -> bool {
        !self.is_corrupted() && self.read_header_u32(OFF_COUNT) > 0
    }

    /// Reads the frame at the head of the ring without removing it. Takes
    /// `&mut self` because a corrupted peer can be discovered mid-read, in
    /// which case this also flips the corruption flag.
    pub fn receive(&mut self) -> Received<'_> {
        if self.is_corrupted() {
            return Received::Corrupted;
        }
        if self.read_header_u32(OFF_COUNT) == 0 {
            return Received::Empty;
        }

        let data_len = self.data_len();
        let read_offset = self.read_header_u32(OFF_READ) as usize;

        let Some(frame_len) = self.read_wrapping_u32(read_offset, data_len) else {
            self.mark_corrupted();
            return Received::Corrupted;
        };

        let payload_start = (read_offset + 4) % data_len;
        match self.wrapping_slice(payload_start, frame_len as usize, data_len) {
            Some(slice) => Received::Frame { data: slice },
            None => {
                self.mark_corrupted();
                Received::Corrupted
            }
        }
    }

    /// Drops the frame currently at the head of the ring.
    pub fn pop(&mut self) -> IntakeResult<()> {
        if self.is_corrupted() {
            return Err(IntakeError::ipc_corruption("pop on corrupted ring"));
        }
        let count = self.read_header_u32(OFF_COUNT);
        if count == 0 {
            return Ok(());
        }

        let data_len = self.data_len();
        let read_offset = self.read_header_u32(OFF_READ) as usize;
        let Some(frame_len) = self.read_wrapping_u32(read_offset, data_len) else {
            self.mark_corrupted();
            return Err(IntakeError::ipc_corruption("frame length unreadable on pop"));
        };

        let consumed = 4 + frame_len as usize;
        let new_read = (read_offset + consumed) % data_len;
        write_u32(&mut self.mmap, OFF_READ, new_read as u32);
        write_u32(&mut self.mmap, OFF_COUNT, count - 1);

        let used = self.read_header_u32(OFF_USED_BYTES) as usize;
        write_u32(&mut self.mmap, OFF_USED_BYTES, used.saturating_sub(consumed) as u32);
        Ok(())
    }

    /// Atomically enqueues a multi-segment frame: the segments are
    /// concatenated behind one length prefix, matching the wire guarantee
    /// that a reply is never observed partially written.
    pub fn send_chunked(&mut self, segments: &[&[u8]]) -> IntakeResult<()> {
        if self.is_corrupted() {
            return Err(IntakeError::ipc_corruption("send_chunked on corrupted ring"));
        }

        let payload_len: usize = segments.iter().map(|s| s.len()).sum();
        let needed = 4 + payload_len;
        let data_len = self.data_len();
        let capacity_elements = self.capacity_elements();
        let count = self.read_header_u32(OFF_COUNT);
        let used = self.read_header_u32(OFF_USED_BYTES) as usize;

        if count >= capacity_elements || used + needed > data_len {
            return Err(IntakeError::ring_full(format!(
                "ring {} has no room for a {needed}-byte frame",
                self.unique_id
            )));
        }

        let write_offset = self.read_header_u32(OFF_WRITE) as usize;
        self.write_wrapping_u32(write_offset, payload_len as u32, data_len);

        let mut cursor = (write_offset + 4) % data_len;
        for segment in segments {
            self.write_wrapping_bytes(cursor, segment, data_len);
            cursor = (cursor + segment.len()) % data_len;
        }

        write_u32(&mut self.mmap, OFF_WRITE, cursor as u32);
        write_u32(&mut self.mmap, OFF_COUNT, count + 1);
        write_u32(&mut self.mmap, OFF_USED_BYTES, (used + needed) as u32);
        Ok(())
    }

    /// Wipes the ring back to empty-and-sane, keeping the mapping in place.
    pub fn reset(&mut self, elements: u32) {
        write_u32(&mut self.mmap, OFF_MAGIC, MAGIC);
        write_u32(&mut self.mmap, OFF_WRITE, 0);
        write_u32(&mut self.mmap, OFF_READ, 0);
        write_u32(&mut self.mmap, OFF_COUNT, 0);
        write_u32(&mut self.mmap, OFF_USED_BYTES, 0);
        write_u32(&mut self.mmap, OFF_CORRUPTED, 0);
        if elements > 0 {
            write_u32(&mut self.mmap, OFF_CAPACITY_ELEMENTS, elements);
        }
    }

    /// Captures the raw header fields for diagnostics (§4.5 `dump`).
    pub fn dump(&self) -> String {
        format!(
            "ring[{}] magic={:#x} write={} read={} count={} cap_elems={} data_len={} used={} corrupted={}",
            self.unique_id,
            self.read_header_u32(OFF_MAGIC),
            self.read_header_u32(OFF_WRITE),
            self.read_header_u32(OFF_READ),
            self.read_header_u32(OFF_COUNT),
            self.capacity_elements(),
            self.data_len(),
            self.read_header_u32(OFF_USED_BYTES),
            self.read_header_u32(OFF_CORRUPTED),
        )
    }

    /// Unmaps and removes the backing file. Any further use of `self` after
    /// this would be a programmer error; callers drop it immediately after.
    pub fn destroy(self) -> IntakeResult<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mark_corrupted(&mut self) {
        write_u32(&mut self.mmap, OFF_CORRUPTED, 1);
    }

    fn read_wrapping_u32(&self, offset: usize, data_len: usize) -> Option<u32> {
        if data_len < 4 {
            return None;
        }
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            let pos = HEADER_LEN + (offset + i) % data_len;
            *b = *self.mmap.get(pos)?;
        }
        Some(u32::from_le_bytes(bytes))
    }

    fn write_wrapping_u32(&mut self, offset: usize, value: u32, data_len: usize) {
        let bytes = value.to_le_bytes();
        for (i, b) in bytes.iter().enumerate() {
            let pos = HEADER_LEN + (offset + i) % data_len;
            self.mmap[pos] = *b;
        }
    }

    fn write_wrapping_bytes(&mut self, offset: usize, data: &[u8], data_len: usize) {
        for (i, b) in data.iter().enumerate() {
            let pos = HEADER_LEN + (offset + i) % data_len;
            self.mmap[pos] = *b;
        }
    }

    /// Returns a borrowed slice of `len` bytes starting at `offset`, or
    /// `None` if it would wrap (the caller treats a wrap mid-frame as
    /// corruption, since frames are written contiguously by us and should
    /// never need to wrap mid-payload within one `receive`).
    fn wrapping_slice(&self, offset: usize, len: usize, data_len: usize) -> Option<&[u8]> {
        if len > data_len {
            return None;
        }
        let start = HEADER_LEN + offset;
        let end = start + len;
        if offset + len <= data_len {
            self.mmap.get(start..end)
        } else {
            None
        }
    }
}

fn read_u32(mmap: &MmapMut, offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&mmap[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn write_u32(mmap: &mut MmapMut, offset: usize, value: u32) {
    mmap[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_at(dir: &tempfile::TempDir, name: &str) -> SharedRing {
        SharedRing::init("worker-1", 1000, 1000, 1, 4, &dir.path().join(name)).unwrap()
    }

    #[test]
    fn fresh_ring_is_empty_and_sane() {
        let dir = tempfile::tempdir().unwrap();
        let ring = ring_at(&dir, "ring0");
        assert!(!ring.is_corrupted());
        assert!(!ring.is_data_available());
    }

    #[test]
    fn send_then_receive_round_trips_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = ring_at(&dir, "ring1");
        ring.send_chunked(&[b"hello-", b"world"]).unwrap();

        assert!(ring.is_data_available());
        match ring.receive() {
            Received::Frame { data } => assert_eq!(data, b"hello-world"),
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn pop_advances_past_consumed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = ring_at(&dir, "ring2");
        ring.send_chunked(&[b"first"]).unwrap();
        ring.send_chunked(&[b"second"]).unwrap();

        match ring.receive() {
            Received::Frame { data } => assert_eq!(data, b"first"),
            _ => panic!("expected first frame"),
        }
        ring.pop().unwrap();
        match ring.receive() {
            Received::Frame { data } => assert_eq!(data, b"second"),
            _ => panic!("expected second frame"),
        }
    }

    #[test]
    fn send_chunked_rejects_oversized_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = SharedRing::init("worker-1", 1000, 1000, 1, 1, &dir.path().join("ring3"))
            .unwrap();
        let huge = vec![0u8; DEFAULT_BYTES_PER_ELEMENT * 2];
        assert!(ring.send_chunked(&[&huge]).is_err());
    }

    #[test]
    fn reset_clears_corruption_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = ring_at(&dir, "ring4");
        ring.send_chunked(&[b"data"]).unwrap();
        ring.mark_corrupted();
        assert!(ring.is_corrupted());

        ring.reset(4);
        assert!(!ring.is_corrupted());
        assert!(!ring.is_data_available());
    }

    #[test]
    fn destroy_removes_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring5");
        let ring = SharedRing::init("worker-1", 1000, 1000, 1, 4, &path).unwrap();
        ring.destroy().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn ring_wraps_around_data_area() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = SharedRing::init("worker-1", 1000, 1000, 1, 1, &dir.path().join("ring6"))
            .unwrap();

        // Fill and drain repeatedly so the write/read cursors wrap past the
        // end of the (small) data area.
        for i in 0..20u8 {
            let payload = vec![i; 100];
            ring.send_chunked(&[&payload]).unwrap();
            match ring.receive() {
                Received::Frame { data } => assert_eq!(data, payload.as_slice()),
                _ => panic!("expected frame {i}"),
            }
            ring.pop().unwrap();
        }
    }
}
