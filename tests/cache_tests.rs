//! Hit/miss behaviour of the cache model against hand-worked and randomized traces.

use cache_model::cache::{AccessResult, AccessType, Cache, ConfigError};
use test_log::test;

use AccessResult::{Hit, Miss};
use AccessType::{Read, Write};

fn run(cache: &mut Cache, addrs: &[u64]) -> Vec<AccessResult> {
    addrs.iter().map(|&a| cache.access(a, Read)).collect()
}

/// Walks through the 64 B, 16 B line, 2-way example: 0, 32 and 64 share set 0.
#[test]
fn test_two_way_lru_example() {
    let mut cache = Cache::new(64, 16, 2).unwrap();
    assert_eq!(cache.geometry().n_sets(), 2);
    assert_eq!(
        run(&mut cache, &[0, 32, 0, 64, 32]),
        vec![Miss, Miss, Hit, Miss, Miss]
    );
    // 0 was touched after 32 and survives the eviction by 64
    assert!(cache.probe(64));
    assert!(cache.probe(32));
    assert!(!cache.probe(0));
}

/// Two same-set addresses thrash a direct-mapped cache.
#[test]
fn test_direct_mapped_thrashing() {
    let mut cache = Cache::new(256, 16, 1).unwrap();
    let a = 0x40;
    let b = a + 256;
    assert_eq!(run(&mut cache, &[a, b, a]), vec![Miss, Miss, Miss]);
    assert_eq!(cache.stats().read_misses, 3);
}

#[test]
fn test_n_way_set_fits_then_evicts_lru() {
    for assoc in [2usize, 4, 8, 16] {
        let size = 16 * assoc * 4;
        let stride = (size / assoc) as u64;

        let mut cache = Cache::new(size, 16, assoc).unwrap();
        let addrs: Vec<u64> = (0..assoc as u64).map(|i| i * stride).collect();
        run(&mut cache, &addrs);
        assert_eq!(cache.access(addrs[0], Read), Hit, "assoc {assoc}");

        let mut cache = Cache::new(size, 16, assoc).unwrap();
        let addrs: Vec<u64> = (0..=assoc as u64).map(|i| i * stride).collect();
        run(&mut cache, &addrs);
        assert_eq!(cache.access(addrs[0], Read), Miss, "assoc {assoc}");
        // only the oldest line left
        assert!(addrs[2..].iter().all(|&a| cache.probe(a)));
    }
}

#[test]
fn test_repeated_address_hits_after_first() {
    for (size, block, assoc) in [(64, 16, 1), (1024, 32, 4), (4096, 64, 64)] {
        let mut cache = Cache::new(size, block, assoc).unwrap();
        let addr = 0xdead_beef;
        assert_eq!(cache.access(addr, Write), Miss);
        for _ in 0..20 {
            assert_eq!(cache.access(addr, Read), Hit);
        }
    }
}

#[test]
fn test_flush_forces_misses() {
    let mut cache = Cache::new(1024, 32, 4).unwrap();
    let addrs: Vec<u64> = (0..32).map(|i| i * 32).collect();
    run(&mut cache, &addrs);
    assert!(run(&mut cache, &addrs).iter().all(|r| *r == Hit));

    let before = cache.stats();
    cache.flush();
    assert_eq!(cache.stats(), before);
    assert!(cache.lines().iter().all(|l| !l.valid && l.tag == 0 && l.last_used == 0));
    assert!(run(&mut cache, &addrs).iter().all(|r| *r == Miss));
}

#[test]
fn test_statistics_tally() {
    let mut cache = Cache::new(64, 16, 1).unwrap();
    cache.access(0, Read); // miss
    cache.access(4, Read); // hit
    cache.access(16, Write); // miss
    cache.access(20, Write); // hit
    cache.access(64, Read); // miss, evicts 0
    cache.access(0, Write); // miss

    let stats = cache.stats();
    assert_eq!(stats.reads, 3);
    assert_eq!(stats.read_misses, 2);
    assert_eq!(stats.writes, 3);
    assert_eq!(stats.write_misses, 2);

    cache.reset_statistics();
    assert_eq!(cache.stats().accesses(), 0);
    assert!(cache.probe(0));
    assert!(cache.probe(16));
}

#[test]
fn test_resize_rejection_is_atomic() {
    let mut cache = Cache::new(1024, 32, 4).unwrap();
    cache.access(0x100, Read);
    let snapshot = cache.lines().to_vec();

    assert_eq!(
        cache.resize(1024, 32, 64),
        Err(ConfigError::AssocTooLarge {
            assoc: 64,
            blocks: 32
        })
    );
    assert!(cache.resize(1024, 0, 4).is_err());
    assert_eq!(cache.lines(), &snapshot[..]);
    assert_eq!(cache.geometry().assoc(), 4);
    assert!(cache.probe(0x100));
}

#[test]
fn test_instances_are_independent() {
    let mut a = Cache::new(64, 16, 2).unwrap();
    let mut b = Cache::new(64, 16, 2).unwrap();
    for i in 0..10 {
        a.access(i * 16, Read);
    }
    b.access(0, Read);
    assert_eq!(a.clock(), 10);
    assert_eq!(b.clock(), 1);
    assert_eq!(b.lines().iter().filter(|l| l.valid).count(), 1);
}

#[test]
fn test_inspect_does_not_mutate() {
    let mut cache = Cache::new(128, 16, 2).unwrap();
    run(&mut cache, &[0, 16, 64]);
    let clock = cache.clock();
    let snapshot = cache.inspect();
    assert_eq!(snapshot.clock, clock);
    assert_eq!(snapshot.lines.len(), 8);
    assert_eq!(snapshot.stats.reads, 3);
    let _ = snapshot.to_string();
    assert_eq!(cache.clock(), clock);
}

/// Per-set recency lists, most recent first.
struct ReferenceLru {
    block_bits: u32,
    n_sets: u64,
    assoc: usize,
    sets: Vec<Vec<u64>>,
}

impl ReferenceLru {
    fn new(size: usize, block: usize, assoc: usize) -> Self {
        let n_sets = size / block / assoc;
        ReferenceLru {
            block_bits: block.ilog2(),
            n_sets: n_sets as u64,
            assoc,
            sets: vec![Vec::new(); n_sets],
        }
    }

    fn access(&mut self, addr: u64) -> AccessResult {
        let block = addr >> self.block_bits;
        let set = &mut self.sets[(block % self.n_sets) as usize];
        if let Some(pos) = set.iter().position(|&b| b == block) {
            set.remove(pos);
            set.insert(0, block);
            Hit
        } else {
            set.insert(0, block);
            set.truncate(self.assoc);
            Miss
        }
    }
}

#[test]
fn test_matches_reference_lru_on_random_traces() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for (size, block, assoc) in [(256, 16, 1), (512, 16, 2), (1024, 32, 4), (2048, 64, 8), (512, 32, 16)] {
        let mut cache = Cache::new(size, block, assoc).unwrap();
        let mut reference = ReferenceLru::new(size, block, assoc);
        let (mut reads, mut read_misses, mut writes, mut write_misses) = (0, 0, 0, 0);

        for _ in 0..20_000 {
            let addr = rng.u64(0..(size as u64 * 4));
            let ty = if rng.bool() { Read } else { Write };
            let expected = reference.access(addr);
            assert_eq!(cache.access(addr, ty), expected, "geometry {size}/{block}/{assoc}");
            match ty {
                Read => {
                    reads += 1;
                    read_misses += u64::from(expected == Miss);
                }
                Write => {
                    writes += 1;
                    write_misses += u64::from(expected == Miss);
                }
            }
        }

        let stats = cache.stats();
        assert_eq!(
            (stats.reads, stats.read_misses, stats.writes, stats.write_misses),
            (reads, read_misses, writes, write_misses)
        );
    }
}
