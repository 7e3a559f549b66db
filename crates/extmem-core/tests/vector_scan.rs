//! External vector and scan algorithm tests, including the buffered
//! stream / indexed access equivalence and a file-backed run.

use extmem_common::StorageConfig;
use extmem_core::{find, for_each, for_each_m, generate, BufReader, ExtVec};
use extmem_io::{BlockIo, BlockManager, FileIo, MemIo};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn mem_mgr(disks: usize) -> Arc<BlockManager> {
    Arc::new(BlockManager::striped(Arc::new(MemIo::new(disks, 16))))
}

#[test]
fn bufreader_equals_indexed_access() {
    // 103 values with 4-value blocks: 26 blocks, the last one partial.
    let mut v: ExtVec<u32> = ExtVec::new(mem_mgr(2), 103).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let mut expected = Vec::new();
    for i in 0..103 {
        let value = rng.gen();
        v.set(i, value).unwrap();
        expected.push(value);
    }
    v.flush().unwrap();

    let mut reader: BufReader<u32> =
        BufReader::new(v.manager().io(), v.bids(), v.len(), 4).unwrap();
    let mut streamed = Vec::new();
    while !reader.is_empty() {
        streamed.push(reader.read_value().unwrap());
    }
    assert_eq!(streamed, expected);

    // Indexed access agrees after the streaming pass.
    for i in 0..103 {
        assert_eq!(v.get(i).unwrap(), expected[i as usize]);
    }
}

#[test]
fn for_each_covers_unaligned_ranges() {
    let mut v: ExtVec<u32> = ExtVec::new(mem_mgr(1), 50).unwrap();
    for i in 0..50 {
        v.set(i, i as u32).unwrap();
    }

    for range in [0..50u64, 1..50, 0..49, 3..47, 17..18, 4..8] {
        let mut seen = Vec::new();
        for_each(&mut v, range.clone(), |x| seen.push(x), 0).unwrap();
        let expected: Vec<u32> = (range.start as u32..range.end as u32).collect();
        assert_eq!(seen, expected, "range {range:?}");
    }
}

#[test]
fn for_each_m_random_ranges_match_model() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut v: ExtVec<i32> = ExtVec::new(mem_mgr(2), 80).unwrap();
    let mut model = vec![0i32; 80];
    for i in 0..80u64 {
        let value = rng.gen_range(-100..100);
        v.set(i, value).unwrap();
        model[i as usize] = value;
    }

    for _ in 0..10 {
        let a = rng.gen_range(0..80);
        let b = rng.gen_range(a..=80);
        for_each_m(&mut v, a..b, |x| *x = x.wrapping_mul(3) + 1, 0).unwrap();
        for x in &mut model[a as usize..b as usize] {
            *x = x.wrapping_mul(3) + 1;
        }
        for i in 0..80u64 {
            assert_eq!(v.get(i).unwrap(), model[i as usize], "after {a}..{b}");
        }
    }
}

#[test]
fn generate_fills_and_find_locates() {
    let mut v: ExtVec<u32> = ExtVec::new(mem_mgr(2), 200).unwrap();
    let mut counter = 0;
    generate(
        &mut v,
        0..200,
        || {
            counter += 1;
            counter * 10
        },
        0,
    )
    .unwrap();

    // Every value is locatable at its index.
    assert_eq!(find(&mut v, 0..200, 10, 0).unwrap(), 0);
    assert_eq!(find(&mut v, 0..200, 1000, 0).unwrap(), 99);
    assert_eq!(find(&mut v, 0..200, 2000, 0).unwrap(), 199);
    // Values before the range start are not found.
    assert_eq!(find(&mut v, 100..200, 10, 0).unwrap(), 200);
    // Absent values report the range end.
    assert_eq!(find(&mut v, 0..200, 15, 0).unwrap(), 200);
}

#[test]
fn generate_respects_leading_and_trailing_values() {
    let mut v: ExtVec<u32> = ExtVec::new(mem_mgr(1), 23).unwrap();
    for i in 0..23 {
        v.set(i, 900 + i as u32).unwrap();
    }
    // 6..17 starts and ends inside a block.
    generate(&mut v, 6..17, || 1, 0).unwrap();
    for i in 0..23 {
        let expected = if (6..17).contains(&i) { 1 } else { 900 + i as u32 };
        assert_eq!(v.get(i).unwrap(), expected, "index {i}");
    }
}

#[test]
fn file_backed_vector_scan() {
    let dir = tempfile::tempdir().unwrap();
    let io = FileIo::create(&StorageConfig {
        data_dir: dir.path().to_path_buf(),
        disks: 2,
        block_bytes: 32,
        direct_io: false,
    })
    .unwrap();
    let mgr = Arc::new(BlockManager::striped(Arc::new(io) as Arc<dyn BlockIo>));

    let mut v: ExtVec<u64> = ExtVec::new(mgr, 500).unwrap();
    let mut next = 0;
    generate(
        &mut v,
        0..500,
        || {
            next += 1;
            next
        },
        0,
    )
    .unwrap();

    let mut sum = 0u64;
    for_each(&mut v, 0..500, |x| sum += x, 0).unwrap();
    assert_eq!(sum, (1..=500u64).sum());

    for_each_m(&mut v, 250..500, |x| *x = 0, 0).unwrap();
    let mut sum = 0u64;
    for_each(&mut v, 0..500, |x| sum += x, 0).unwrap();
    assert_eq!(sum, (1..=250u64).sum());

    assert_eq!(find(&mut v, 0..500, 250, 0).unwrap(), 249);
    assert_eq!(find(&mut v, 0..500, 251, 0).unwrap(), 500);
}
