use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Included, Unbounded};

/// A contiguous unused byte range inside one block.
///
/// Field order is the sort order of the size view: size first, then offset,
/// then block, so a range starting at `(n, 0, 0)` yields the smallest spans
/// that are at least `n` bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreeSpan {
    pub size: u64,
    pub offset: u64,
    pub block: u32,
}

/// Where a request lands inside a chosen span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub span: FreeSpan,
    pub aligned_offset: u64,
}

#[inline]
pub fn align_up(offset: u64, alignment: u64) -> u64 {
    let mask = alignment.max(1) - 1;
    (offset + mask) & !mask
}

/// Free space of one memory type, viewed two ways.
///
/// `by_size` answers "smallest span that might hold N bytes" across every
/// block of the type; `by_offset[block]` answers adjacency questions when
/// coalescing. Both views are only ever changed together through
/// [`FreeSpanIndex::insert`] and [`FreeSpanIndex::remove`].
#[derive(Debug, Default)]
pub struct FreeSpanIndex {
    by_size: BTreeSet<FreeSpan>,
    by_offset: Vec<BTreeMap<u64, u64>>,
    capacities: Vec<u64>,
}

impl FreeSpanIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh block whose whole capacity is free and returns its index.
    pub fn add_block(&mut self, capacity: u64) -> u32 {
        let block = self.by_offset.len() as u32;
        self.by_offset.push(BTreeMap::new());
        self.capacities.push(capacity);
        self.insert(FreeSpan {
            size: capacity,
            offset: 0,
            block,
        });
        block
    }

    pub fn block_count(&self) -> usize {
        self.by_offset.len()
    }

    pub fn span_count(&self) -> usize {
        self.by_size.len()
    }

    pub fn largest(&self) -> Option<FreeSpan> {
        self.by_size.last().copied()
    }

    /// Free spans of `block` in offset order, as `(offset, size)`.
    pub fn spans(&self, block: u32) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.by_offset
            .get(block as usize)
            .into_iter()
            .flat_map(|m| m.iter().map(|(&o, &s)| (o, s)))
    }

    pub fn free_bytes(&self, block: u32) -> u64 {
        self.spans(block).map(|(_, s)| s).sum()
    }

    /// Finds the first span, in size order, that holds `size` bytes once its
    /// start is rounded up to `alignment`.
    ///
    /// The scan starts at the smallest span with `span.size >= size` and walks
    /// towards bigger spans, so alignment slack can push the pick past the
    /// tightest fit.
    pub fn find(&self, size: u64, alignment: u64) -> Option<Placement> {
        let start = FreeSpan {
            size,
            offset: 0,
            block: 0,
        };
        self.by_size
            .range((Included(start), Unbounded))
            .find_map(|span| {
                let aligned_offset = align_up(span.offset, alignment);
                let slack = aligned_offset - span.offset;
                (slack <= span.size && span.size - slack >= size).then_some(Placement {
                    span: *span,
                    aligned_offset,
                })
            })
    }

    /// Carves `size` bytes at `placement.aligned_offset` out of the chosen
    /// span, keeping the alignment head and the tail as free spans.
    pub fn take(&mut self, placement: Placement, size: u64) {
        let Placement {
            span,
            aligned_offset,
        } = placement;
        debug_assert!(aligned_offset >= span.offset);
        debug_assert!(aligned_offset + size <= span.offset + span.size);

        self.remove(span);

        let head = aligned_offset - span.offset;
        if head > 0 {
            self.insert(FreeSpan {
                size: head,
                offset: span.offset,
                block: span.block,
            });
        }

        let tail = span.size - head - size;
        if tail > 0 {
            self.insert(FreeSpan {
                size: tail,
                offset: aligned_offset + size,
                block: span.block,
            });
        }
    }

    /// Returns `[offset, offset + size)` of `block` to the free pool and merges
    /// it with free neighbours on either side.
    pub fn release(&mut self, block: u32, offset: u64, size: u64) {
        self.insert(FreeSpan {
            size,
            offset,
            block,
        });

        // Every other span in the block is already coalesced, so sweeping
        // forward from the predecessor merges both sides in one pass.
        let spans = &self.by_offset[block as usize];
        let (mut cur_offset, mut cur_size) = spans
            .range(..offset)
            .next_back()
            .map(|(&o, &s)| (o, s))
            .unwrap_or((offset, size));

        loop {
            let next = self.by_offset[block as usize]
                .range((Excluded(cur_offset), Unbounded))
                .next()
                .map(|(&o, &s)| (o, s));
            let Some((next_offset, next_size)) = next else {
                break;
            };

            if cur_offset + cur_size == next_offset {
                self.remove(FreeSpan {
                    size: cur_size,
                    offset: cur_offset,
                    block,
                });
                self.remove(FreeSpan {
                    size: next_size,
                    offset: next_offset,
                    block,
                });
                cur_size += next_size;
                self.insert(FreeSpan {
                    size: cur_size,
                    offset: cur_offset,
                    block,
                });
                continue;
            }

            if next_offset > offset {
                break;
            }
            cur_offset = next_offset;
            cur_size = next_size;
        }
    }

    /// Drops every span and block.
    pub fn clear(&mut self) {
        self.by_size.clear();
        self.by_offset.clear();
        self.capacities.clear();
    }

    fn insert(&mut self, span: FreeSpan) {
        let prev = self.by_offset[span.block as usize].insert(span.offset, span.size);
        debug_assert!(prev.is_none(), "free span {span:?} inserted twice");
        self.by_size.insert(span);
    }

    fn remove(&mut self, span: FreeSpan) {
        let removed = self.by_offset[span.block as usize].remove(&span.offset);
        debug_assert_eq!(removed, Some(span.size));
        let removed = self.by_size.remove(&span);
        debug_assert!(removed, "free span {span:?} missing from size view");
    }

    /// Checks that both views agree and no spans in a block overlap.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut from_blocks = BTreeSet::new();
        for (block, spans) in self.by_offset.iter().enumerate() {
            let mut end = 0;
            for (&offset, &size) in spans {
                assert!(size > 0, "empty span in block {block}");
                assert!(offset >= end, "overlapping spans in block {block}");
                assert!(
                    offset + size <= self.capacities[block],
                    "span past end of block {block}"
                );
                end = offset + size;
                from_blocks.insert(FreeSpan {
                    size,
                    offset,
                    block: block as u32,
                });
            }
        }
        assert_eq!(from_blocks, self.by_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(index: &FreeSpanIndex, block: u32) -> Vec<(u64, u64)> {
        index.spans(block).collect()
    }

    fn alloc(index: &mut FreeSpanIndex, size: u64, alignment: u64) -> (u32, u64) {
        let placement = index.find(size, alignment).unwrap();
        index.take(placement, size);
        index.assert_consistent();
        (placement.span.block, placement.aligned_offset)
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(300, 1), 300);
        assert_eq!(align_up(300, 0), 300);
        assert_eq!(align_up(512, 512), 512);
    }

    #[test]
    fn coalescing_round_trip() {
        let mut index = FreeSpanIndex::new();
        index.add_block(1024);

        assert_eq!(alloc(&mut index, 300, 1), (0, 0));
        assert_eq!(spans(&index, 0), vec![(300, 724)]);

        assert_eq!(alloc(&mut index, 200, 1), (0, 300));
        assert_eq!(spans(&index, 0), vec![(500, 524)]);

        index.release(0, 0, 300);
        index.assert_consistent();
        assert_eq!(spans(&index, 0), vec![(0, 300), (500, 524)]);

        index.release(0, 300, 200);
        index.assert_consistent();
        assert_eq!(spans(&index, 0), vec![(0, 1024)]);
        assert_eq!(index.span_count(), 1);
    }

    #[test]
    fn release_merges_with_successor_only() {
        let mut index = FreeSpanIndex::new();
        index.add_block(1024);
        alloc(&mut index, 100, 1); // 0..100
        alloc(&mut index, 100, 1); // 100..200
        alloc(&mut index, 100, 1); // 200..300

        index.release(0, 100, 100);
        assert_eq!(spans(&index, 0), vec![(100, 100), (300, 724)]);

        index.release(0, 200, 100);
        index.assert_consistent();
        assert_eq!(spans(&index, 0), vec![(100, 924)]);
    }

    #[test]
    fn alignment_slack_keeps_head_span() {
        let mut index = FreeSpanIndex::new();
        index.add_block(1024);
        alloc(&mut index, 10, 1); // 0..10

        let (_, offset) = alloc(&mut index, 100, 64);
        assert_eq!(offset, 64);
        assert_eq!(spans(&index, 0), vec![(10, 54), (164, 860)]);
    }

    #[test]
    fn alignment_can_skip_tightest_fit() {
        let mut index = FreeSpanIndex::new();
        index.add_block(1024);
        alloc(&mut index, 1, 1); // 0..1
        alloc(&mut index, 127, 1); // 1..128
        alloc(&mut index, 896, 1); // 128..1024
        index.release(0, 1, 127); // free (1, 127)
        index.release(0, 128, 896); // merges into (1, 1023)
        assert_eq!(spans(&index, 0), vec![(1, 1023)]);

        // second block with an aligned 200 byte hole
        index.add_block(1024);
        let b = 1;
        let p = index
            .find(1024, 1)
            .filter(|p| p.span.block == b)
            .unwrap();
        index.take(p, 1024);
        index.release(b, 256, 200);
        index.assert_consistent();

        // (1, 1023) is bigger than (256, 200), so size order visits the hole
        // first and it satisfies a 256 alignment.
        let placement = index.find(150, 256).unwrap();
        assert_eq!(placement.span.block, b);
        assert_eq!(placement.aligned_offset, 256);

        // a 200 byte request aligned to 512 does not fit the hole at 256
        let placement = index.find(200, 512).unwrap();
        assert_eq!(placement.span.block, 0);
        assert_eq!(placement.aligned_offset, 512);
    }

    #[test]
    fn find_returns_none_when_nothing_fits() {
        let mut index = FreeSpanIndex::new();
        index.add_block(1024);
        alloc(&mut index, 1000, 1);
        assert!(index.find(25, 1).is_none());
        assert!(index.find(24, 1).is_some());
        assert!(index.find(24, 16).is_none());
    }

    #[test]
    fn blocks_are_independent() {
        let mut index = FreeSpanIndex::new();
        index.add_block(1024);
        index.add_block(1024);
        alloc(&mut index, 1024, 1);
        alloc(&mut index, 1024, 1);
        assert_eq!(index.span_count(), 0);

        index.release(1, 0, 1024);
        index.release(0, 0, 1024);
        index.assert_consistent();
        assert_eq!(spans(&index, 0), vec![(0, 1024)]);
        assert_eq!(spans(&index, 1), vec![(0, 1024)]);
        assert_eq!(index.largest().unwrap().size, 1024);
    }
}
