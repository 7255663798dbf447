//! Reassembler (C2): joins multi-chunk records from [`crate::protocol::scan`]
//! back into complete payloads, keyed by producer pid.
//!
//! Chunks from the same pid can interleave with chunks from other pids (two
//! processes writing to the collector pipe concurrently). The reassembler
//! uses a fixed table of 256 buckets (`pid % 256`), but two different pids
//! can and do collide on the same bucket while both have a record in
//! flight, so each bucket holds a short list of slots rather than one: a
//! chunk is matched to its slot by a linear scan for `pid` within the
//! bucket's list, extending it if found or appending a fresh slot if not.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::destination::DestKind;

const NUM_BUCKETS: usize = 256;

/// Most records fit in one chunk well under this many bytes (a handful of
/// lines of formatted log output), so the common case never touches the
/// heap; only a record spanning several continuation chunks spills over.
type RecordBuf = SmallVec<[u8; 256]>;

#[derive(Debug)]
struct ReassemblySlot {
    pid: u32,
    dest: DestKind,
    buffer: RecordBuf,
}

/// A bucket's active slots. Collisions (two different pids hashing to the
/// same `pid % 256`) are rare enough that a one-element inline list covers
/// the common case without a heap allocation.
type Bucket = SmallVec<[ReassemblySlot; 1]>;

/// Per-pid chunk accumulator. One bucket per `pid % 256`; each bucket holds
/// every pid currently hashing to it with a record in flight.
#[derive(Debug)]
pub struct Reassembler {
    buckets: Vec<Bucket>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Reassembler {
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::new()).collect(),
        }
    }
}

impl Reassembler {
    fn bucket_index(pid: u32) -> usize {
        (pid % NUM_BUCKETS as u32) as usize
    }

    /// Feed one chunk. Returns the complete record (destination, bytes) once
    /// a chunk with `is_last` arrives for its pid; otherwise buffers the
    /// chunk and returns `None`.
    ///
    /// A different pid already occupying this bucket (a collision on
    /// `pid % 256`, or an interrupted record from a process that died
    /// mid-record) does not disturb this pid's slot: the bucket holds both,
    /// exactly as the original's `buffer_lists[NBUFFER_LISTS]` grows its
    /// list with `lappend` on collision rather than recycling a slot.
    pub fn on_chunk(&mut self, pid: u32, dest: DestKind, payload: &[u8], is_last: bool) -> Option<(DestKind, Vec<u8>)> {
        let idx = Self::bucket_index(pid);
        let bucket = &mut self.buckets[idx];

        match bucket.iter_mut().find(|s| s.pid == pid) {
            Some(existing) => existing.buffer.extend_from_slice(payload),
            None => bucket.push(ReassemblySlot {
                pid,
                dest,
                buffer: RecordBuf::from_slice(payload),
            }),
        }

        if is_last {
            let pos = bucket.iter().position(|s| s.pid == pid).expect("slot was just populated");
            let finished = bucket.swap_remove(pos);
            Some((finished.dest, finished.buffer.into_vec()))
        } else {
            None
        }
    }

    /// Drain every slot with an in-progress record, across every bucket, for
    /// shutdown flush. The original writes residual partial records straight
    /// to the log file (§4.2 edge case: a producer that dies mid-record)
    /// rather than discarding them.
    pub fn flush_residual(&mut self) -> VecDeque<(u32, DestKind, Vec<u8>)> {
        let mut out = VecDeque::new();
        for bucket in self.buckets.iter_mut() {
            for finished in bucket.drain(..) {
                out.push_back((finished.pid, finished.dest, finished.buffer.into_vec()));
            }
        }
        out
    }
}
