use divan::{black_box, Bencher, Divan};
use hatmap::{HatConfig, HatMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() {
    let divan = Divan::from_args().sample_count(100);
    divan.main();
}

const N: usize = 100_000;

fn keys(seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..N)
        .map(|_| {
            let len = rng.random_range(4..=16);
            (0..len).map(|_| rng.random_range(1u8..=127)).collect()
        })
        .collect()
}

fn filled(keys: &[Vec<u8>]) -> HatMap {
    let mut map = HatMap::new(3, 8);
    for (i, key) in keys.iter().enumerate() {
        map.cell(key).copy_from_slice(&(i as u64).to_le_bytes());
    }
    map
}

#[divan::bench]
fn insert(bencher: Bencher) {
    let keys = keys(1);
    bencher.bench_local(|| {
        let mut map = HatMap::new(3, 8);
        for key in &keys {
            map.cell(black_box(key));
        }
        map.len()
    });
}

#[divan::bench(args = [0, 3])]
fn insert_boot_levels(bencher: Bencher, boot: usize) {
    let keys = keys(2);
    bencher.bench_local(|| {
        let mut map = HatMap::with_config(HatConfig::new(boot, 8));
        for key in &keys {
            map.cell(black_box(key));
        }
        map.len()
    });
}

#[divan::bench]
fn find_hit(bencher: Bencher) {
    let keys = keys(3);
    let map = filled(&keys);
    bencher.bench_local(|| {
        let mut found = 0usize;
        for key in &keys {
            if map.find(black_box(key)).is_some() {
                found += 1;
            }
        }
        found
    });
}

#[divan::bench]
fn find_miss(bencher: Bencher) {
    let keys = keys(4);
    let map = filled(&keys);
    let probes = keys(5);
    bencher.bench_local(|| {
        let mut found = 0usize;
        for key in &probes {
            if map.find(black_box(key)).is_some() {
                found += 1;
            }
        }
        found
    });
}

#[divan::bench]
fn ordered_scan(bencher: Bencher) {
    let keys = keys(6);
    let map = filled(&keys);
    bencher.bench_local(|| {
        let mut cursor = map.cursor();
        let mut visited = 0usize;
        while cursor.next() {
            visited += 1;
        }
        visited
    });
}

#[divan::bench]
fn seek_random(bencher: Bencher) {
    let keys = keys(7);
    let map = filled(&keys);
    let probes = keys(8);
    bencher.bench_local(|| {
        let mut cursor = map.cursor();
        let mut positioned = 0usize;
        for probe in probes.iter().take(1000) {
            if cursor.seek(black_box(probe)) {
                positioned += 1;
            }
        }
        positioned
    });
}
