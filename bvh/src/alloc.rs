//! Word arena for nodes and leaves.
//!
//! Builder threads draw chunks from a lock-free queue and bump-allocate inside
//! them through a [`ThreadAllocator`]. Chunks are either owned by the arena or
//! carved out of finished ranges of the reference array, in which case the
//! array itself has to be handed to the [`Arena`] once the build is done.

use crossbeam::queue::SegQueue;
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::{BuildError, PrimRef, PRIM_REF_WORDS};

/// Block id of storage living inside the shared reference array.
pub const SHARED_BLOCK: u32 = (1 << 30) - 1;

/// Finished ranges smaller than this many words are not worth reusing.
const MIN_SHARED_WORDS: usize = 64;

/// Location of an allocation: block id plus word offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub block: u32,
    pub offset: u32,
}

enum Chunk<'p> {
    Owned { id: u32, words: Vec<u32> },
    Shared { base: u32, words: &'p mut [u32] },
}

impl<'p> Chunk<'p> {
    fn len(&self) -> usize {
        match self {
            Chunk::Owned { words, .. } => words.len(),
            Chunk::Shared { words, .. } => words.len(),
        }
    }

    fn block(&self) -> u32 {
        match self {
            Chunk::Owned { id, .. } => *id,
            Chunk::Shared { .. } => SHARED_BLOCK,
        }
    }

    fn base(&self) -> u32 {
        match self {
            Chunk::Owned { .. } => 0,
            Chunk::Shared { base, .. } => *base,
        }
    }

    fn words_mut(&mut self) -> &mut [u32] {
        match self {
            Chunk::Owned { words, .. } => words.as_mut_slice(),
            Chunk::Shared { words, .. } => words,
        }
    }
}

struct Retired {
    id: u32,
    words: Vec<u32>,
    used: usize,
}

#[inline(always)]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

pub struct BlockAllocator<'p> {
    block_words: AtomicUsize,
    next_id: AtomicU32,
    reserved: SegQueue<Chunk<'p>>,
    retired: SegQueue<Retired>,
    reserved_bytes: AtomicUsize,
    used_bytes: AtomicUsize,
    shared_bytes: AtomicUsize,
    uses_shared: AtomicBool,
    memory_limit: Option<usize>,
}

impl<'p> BlockAllocator<'p> {
    pub fn new(block_bytes: usize, memory_limit: Option<usize>) -> Self {
        Self {
            block_words: AtomicUsize::new((block_bytes / 4).max(MIN_SHARED_WORDS)),
            next_id: AtomicU32::new(0),
            reserved: SegQueue::new(),
            retired: SegQueue::new(),
            reserved_bytes: AtomicUsize::new(0),
            used_bytes: AtomicUsize::new(0),
            shared_bytes: AtomicUsize::new(0),
            uses_shared: AtomicBool::new(false),
            memory_limit,
        }
    }

    /// Reserves `bytes` up front so that most builds never grow.
    pub fn estimate(&self, bytes: usize) -> Result<(), BuildError> {
        let words = (bytes + 3) / 4;
        if words == 0 {
            return Ok(());
        }
        let chunk = self.new_chunk(words)?;
        self.reserved.push(chunk);
        Ok(())
    }

    /// Per-thread handle. Handles must be dropped before [`finish`](Self::finish).
    pub fn cached(&self) -> ThreadAllocator<'_, 'p> {
        ThreadAllocator {
            parent: self,
            current: None,
            cursor: 0,
        }
    }

    /// Hands a finished range of the reference array, starting at reference
    /// index `begin`, over for node and leaf storage.
    pub fn add_block(&self, begin: usize, prims: &'p mut [PrimRef]) {
        let base = begin * PRIM_REF_WORDS;
        let words: &'p mut [u32] = bytemuck::cast_slice_mut(prims);
        if words.len() < MIN_SHARED_WORDS || base + words.len() > u32::MAX as usize {
            return;
        }

        trace!("reusing finished range at {} ({} words)", begin, words.len());
        self.shared_bytes.fetch_add(words.len() * 4, Ordering::Relaxed);
        self.uses_shared.store(true, Ordering::Release);
        self.reserved.push(Chunk::Shared {
            base: base as u32,
            words,
        });
    }

    pub fn uses_shared(&self) -> bool {
        self.uses_shared.load(Ordering::Acquire)
    }

    fn new_chunk(&self, words: usize) -> Result<Chunk<'p>, BuildError> {
        let bytes = words * 4;
        let total = self.reserved_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(limit) = self.memory_limit {
            if total > limit {
                self.reserved_bytes.fetch_sub(bytes, Ordering::Relaxed);
                return Err(BuildError::OutOfMemory { requested: bytes });
            }
        }

        let mut storage: Vec<u32> = Vec::new();
        if storage.try_reserve_exact(words).is_err() {
            self.reserved_bytes.fetch_sub(bytes, Ordering::Relaxed);
            return Err(BuildError::OutOfMemory { requested: bytes });
        }
        storage.resize(words, 0);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id >= SHARED_BLOCK {
            self.reserved_bytes.fetch_sub(bytes, Ordering::Relaxed);
            return Err(BuildError::OutOfMemory { requested: bytes });
        }
        Ok(Chunk::Owned { id, words: storage })
    }

    fn retire(&self, chunk: Chunk<'p>, used: usize) {
        if let Chunk::Owned { id, words } = chunk {
            self.retired.push(Retired { id, words, used });
        }
    }

    /// Collects every chunk into the final arena.
    pub fn finish(self) -> Arena {
        let mut blocks: Vec<Retired> = Vec::with_capacity(self.next_id.load(Ordering::Relaxed) as usize);
        while let Some(retired) = self.retired.pop() {
            blocks.push(retired);
        }
        while let Some(chunk) = self.reserved.pop() {
            if let Chunk::Owned { id, words } = chunk {
                blocks.push(Retired { id, words, used: 0 });
            }
        }
        blocks.sort_by_key(|b| b.id);

        Arena {
            blocks: blocks
                .into_iter()
                .map(|b| Block {
                    words: b.words,
                    used: b.used,
                })
                .collect(),
            shared: None,
            uses_shared: self.uses_shared.load(Ordering::Acquire),
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
            shared_bytes: self.shared_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Bump allocator over one chunk at a time.
pub struct ThreadAllocator<'a, 'p> {
    parent: &'a BlockAllocator<'p>,
    current: Option<Chunk<'p>>,
    cursor: usize,
}

impl<'a, 'p> ThreadAllocator<'a, 'p> {
    pub fn parent(&self) -> &'a BlockAllocator<'p> {
        self.parent
    }

    /// Returns `bytes` of zeroed, word aligned storage. `align` is in bytes.
    pub fn allocate(&mut self, bytes: usize, align: usize) -> Result<(BlockRef, &mut [u32]), BuildError> {
        let words = (bytes + 3) / 4;
        let align = (align / 4).max(1);

        let fits = match &self.current {
            Some(chunk) => align_up(self.cursor, align) + words <= chunk.len(),
            None => false,
        };
        if !fits {
            self.refill(words + align - 1)?;
        }

        let start = align_up(self.cursor, align);
        self.cursor = start + words;
        self.parent.used_bytes.fetch_add(words * 4, Ordering::Relaxed);

        let chunk = self
            .current
            .as_mut()
            .ok_or(BuildError::OutOfMemory { requested: bytes })?;
        let block_ref = BlockRef {
            block: chunk.block(),
            offset: chunk.base() + start as u32,
        };
        let storage = &mut chunk.words_mut()[start..start + words];
        storage.fill(0);
        Ok((block_ref, storage))
    }

    fn refill(&mut self, words: usize) -> Result<(), BuildError> {
        if let Some(chunk) = self.current.take() {
            self.parent.retire(chunk, self.cursor);
        }
        self.cursor = 0;

        if let Some(chunk) = self.parent.reserved.pop() {
            if chunk.len() >= words {
                self.current = Some(chunk);
                return Ok(());
            }
            if matches!(chunk, Chunk::Owned { .. }) {
                self.parent.reserved.push(chunk);
            }
        }

        let size = self.parent.block_words.load(Ordering::Relaxed).max(words);
        self.current = Some(self.parent.new_chunk(size)?);
        Ok(())
    }
}

impl<'a, 'p> Drop for ThreadAllocator<'a, 'p> {
    fn drop(&mut self) {
        if let Some(chunk) = self.current.take() {
            self.parent.retire(chunk, self.cursor);
        }
    }
}

struct Block {
    words: Vec<u32>,
    used: usize,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub blocks: usize,
    pub used_bytes: usize,
    pub reserved_bytes: usize,
    pub shared_bytes: usize,
}

/// Storage of a finished tree.
#[derive(Default)]
pub struct Arena {
    blocks: Vec<Block>,
    shared: Option<Vec<PrimRef>>,
    uses_shared: bool,
    used_bytes: usize,
    shared_bytes: usize,
}

impl Arena {
    /// Words starting at `r` up to the end of its block.
    #[inline(always)]
    pub fn words(&self, r: BlockRef) -> &[u32] {
        if r.block == SHARED_BLOCK {
            let shared = self.shared.as_deref().unwrap_or(&[]);
            &bytemuck::cast_slice::<PrimRef, u32>(shared)[r.offset as usize..]
        } else {
            &self.blocks[r.block as usize].words[r.offset as usize..]
        }
    }

    /// True when some nodes live inside the reference array, which must then
    /// be handed over with [`share`](Self::share).
    pub fn uses_shared(&self) -> bool {
        self.uses_shared
    }

    /// Transfers ownership of the reference array to the arena.
    pub fn share(&mut self, prims: Vec<PrimRef>) {
        self.shared = Some(prims);
    }

    /// Takes the reference array back, invalidating any node stored in it.
    pub fn unshare(&mut self) -> Option<Vec<PrimRef>> {
        self.uses_shared = false;
        self.shared.take()
    }

    pub fn is_shared(&self) -> bool {
        self.shared.is_some()
    }

    /// Releases reserved but unused capacity.
    pub fn shrink(&mut self) {
        for block in self.blocks.iter_mut() {
            block.words.truncate(block.used);
            block.words.shrink_to_fit();
        }
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            blocks: self.blocks.len(),
            used_bytes: self.used_bytes,
            reserved_bytes: self.blocks.iter().map(|b| b.words.capacity() * 4).sum(),
            shared_bytes: if self.shared.is_some() { self.shared_bytes } else { 0 },
        }
    }
}
