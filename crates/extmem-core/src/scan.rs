//! Scan-style algorithms over an external vector
//!
//! External equivalents of `for_each`, `for_each` (mutating), `generate`
//! and `find`, built on the buffered streams so computation overlaps the
//! I/O. Ranges need not be block-aligned: values of a partially covered
//! block outside the range are read and discarded (non-mutating) or
//! copied through unchanged (mutating), so neighbours survive intact.

use crate::bufread::BufReader;
use crate::bufwrite::BufWriter;
use crate::vector::ExtVec;
use bytemuck::Pod;
use extmem_common::Result;
use extmem_io::BlockManager;
use std::ops::Range;

fn buffer_count(mgr: &BlockManager, nbuffers: usize) -> usize {
    if nbuffers == 0 {
        2 * mgr.disks()
    } else {
        nbuffers
    }
}

/// Apply `f` to every value of `v` in `range`, in order.
///
/// `nbuffers` blocks overlap the reads; 0 picks `2 * disks`.
pub fn for_each<V, F>(v: &mut ExtVec<V>, range: Range<u64>, mut f: F, nbuffers: usize) -> Result<()>
where
    V: Pod,
    F: FnMut(V),
{
    if range.start >= range.end {
        return Ok(());
    }
    assert!(range.end <= v.len(), "range beyond the vector");
    v.flush()?;

    let elems = v.block_len() as u64;
    let nbuffers = buffer_count(v.manager(), nbuffers);
    let first_block = (range.start / elems) as usize;
    let end_block = range.end.div_ceil(elems) as usize;
    let covered = &v.bids()[first_block..end_block];

    let mut input: BufReader<V> = BufReader::new(
        v.manager().io(),
        covered,
        (covered.len() as u64) * elems,
        nbuffers,
    )?;

    // Values of the first block that precede the range are read and
    // discarded so the cursor lands on range.start.
    let mut cur = first_block as u64 * elems;
    while cur < range.start {
        input.advance()?;
        cur += 1;
    }
    while cur < range.end {
        f(input.read_value()?);
        cur += 1;
    }
    // Values after range.end are discarded when the reader drops.
    Ok(())
}

/// Apply `f` to every value of `v` in `range`, writing the (possibly
/// modified) values back through a buffered output stream.
///
/// Values of partially covered blocks outside the range are copied
/// through unchanged. The reader and writer split `nbuffers` between
/// them; 0 picks `2 * disks`.
pub fn for_each_m<V, F>(
    v: &mut ExtVec<V>,
    range: Range<u64>,
    mut f: F,
    nbuffers: usize,
) -> Result<()>
where
    V: Pod,
    F: FnMut(&mut V),
{
    if range.start >= range.end {
        return Ok(());
    }
    assert!(range.end <= v.len(), "range beyond the vector");
    v.flush()?;

    let elems = v.block_len() as u64;
    let nbuffers = buffer_count(v.manager(), nbuffers);
    let first_block = (range.start / elems) as usize;
    let end_block = range.end.div_ceil(elems) as usize;
    let covered = &v.bids()[first_block..end_block];

    let mut input: BufReader<V> = BufReader::new(
        v.manager().io(),
        covered,
        (covered.len() as u64) * elems,
        (nbuffers / 2).max(1),
    )?;
    let mut output: BufWriter<V> =
        BufWriter::new(v.manager().io(), covered, (nbuffers / 2).max(1))?;

    let mut cur = first_block as u64 * elems;
    while cur < range.start {
        output.push(input.read_value()?)?;
        cur += 1;
    }
    while cur < range.end {
        let mut value = input.read_value()?;
        f(&mut value);
        output.push(value)?;
        cur += 1;
    }
    let block_end = end_block as u64 * elems;
    while cur < block_end {
        output.push(input.read_value()?)?;
        cur += 1;
    }
    drop(input);
    output.flush()?;

    // The covered blocks were rewritten behind the vector's page cache.
    v.invalidate_pages(first_block..end_block);
    Ok(())
}

/// Assign `g()` to every value of `v` in `range`, in order.
///
/// Whole blocks go through a buffered output stream; the leading partial
/// block is written element-wise through the vector and the trailing
/// partial block's tail is copied through unchanged. `nbuffers` blocks
/// overlap the writes; 0 picks `2 * disks`.
pub fn generate<V, G>(v: &mut ExtVec<V>, range: Range<u64>, mut g: G, nbuffers: usize) -> Result<()>
where
    V: Pod,
    G: FnMut() -> V,
{
    if range.start >= range.end {
        return Ok(());
    }
    assert!(range.end <= v.len(), "range beyond the vector");

    let elems = v.block_len() as u64;
    let nbuffers = buffer_count(v.manager(), nbuffers);

    // Walk to a block boundary through the vector itself.
    let mut cur = range.start;
    while cur % elems != 0 && cur < range.end {
        v.set(cur, g())?;
        cur += 1;
    }
    v.flush()?;
    if cur == range.end {
        return Ok(());
    }

    let first_block = (cur / elems) as usize;
    let end_block = range.end.div_ceil(elems) as usize;
    let covered = &v.bids()[first_block..end_block];
    let mut output: BufWriter<V> = BufWriter::new(v.manager().io(), covered, nbuffers)?;

    while cur < range.end {
        output.push(g())?;
        cur += 1;
    }
    // Copy the last block's surviving tail through unchanged; it is read
    // from the still-untouched on-disk block.
    let tail_end = (end_block as u64 * elems).min(v.len());
    while cur < tail_end {
        let old = v.get(cur)?;
        output.push(old)?;
        cur += 1;
    }
    output.flush()?;

    v.invalidate_pages(first_block..end_block);
    Ok(())
}

/// Index of the first value equal to `value` in `range`, or `range.end`
/// if there is none.
///
/// `nbuffers` blocks overlap the reads; 0 picks `2 * disks`.
pub fn find<V>(v: &mut ExtVec<V>, range: Range<u64>, value: V, nbuffers: usize) -> Result<u64>
where
    V: Pod + PartialEq,
{
    if range.start >= range.end {
        return Ok(range.end);
    }
    assert!(range.end <= v.len(), "range beyond the vector");
    v.flush()?;

    let elems = v.block_len() as u64;
    let nbuffers = buffer_count(v.manager(), nbuffers);
    let first_block = (range.start / elems) as usize;
    let end_block = range.end.div_ceil(elems) as usize;
    let covered = &v.bids()[first_block..end_block];

    let mut input: BufReader<V> = BufReader::new(
        v.manager().io(),
        covered,
        (covered.len() as u64) * elems,
        nbuffers,
    )?;

    let mut cur = first_block as u64 * elems;
    while cur < range.start {
        input.advance()?;
        cur += 1;
    }
    while cur < range.end {
        if input.read_value()? == value {
            return Ok(cur);
        }
        cur += 1;
    }
    Ok(range.end)
}
