// Readers run without the write lock while one thread mutates the table. A
// reader must never see a value that does not belong to the key it looked up,
// and never a half published entry.

use dynamap::{DictStorage, Error, Key, SetStorage};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Barrier,
};

const NUM_KEYS: i64 = 256;
const NUM_READERS: usize = 8;
const ROUNDS: u64 = 200;

// The value stored for `key` in `round`. Every field can be checked against
// the key it was found under.
#[derive(Clone, Debug)]
struct Stamp {
    key: i64,
    round: u64,
    check: u64,
}

impl Stamp {
    fn new(key: i64, round: u64) -> Self {
        Self {
            key,
            round,
            check: (key as u64).wrapping_mul(31) ^ round,
        }
    }

    fn is_intact(&self) -> bool {
        self.check == (self.key as u64).wrapping_mul(31) ^ self.round
    }
}

fn key_of(i: i64) -> Key {
    // Mixed key types, so the readers also race with the promotion.
    if i % 3 == 0 {
        Key::from(format!("k{i}"))
    } else {
        Key::Int(i)
    }
}

#[test]
fn readers_never_see_torn_entries() {
    let dict = Arc::new(DictStorage::<Stamp>::new());
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(NUM_READERS + 1));

    let readers: Vec<_> = (0..NUM_READERS)
        .map(|_| {
            let dict = Arc::clone(&dict);
            let done = Arc::clone(&done);
            let barrier = Arc::clone(&barrier);

            std::thread::spawn(move || {
                barrier.wait();
                let mut observed = 0_u64;

                while !done.load(Ordering::Acquire) {
                    for i in 0..NUM_KEYS {
                        if let Some(stamp) = dict.get(&key_of(i)).unwrap() {
                            assert!(stamp.is_intact(), "{stamp:?}");
                            assert_eq!(stamp.key, i);
                            observed += 1;
                        }
                    }
                    assert!(dict.len() <= NUM_KEYS as usize);
                }
                observed
            })
        })
        .collect();

    barrier.wait();
    for round in 0..ROUNDS {
        for i in 0..NUM_KEYS {
            match (i + round as i64) % 4 {
                0 => {
                    dict.remove(&key_of(i)).unwrap();
                }
                _ => {
                    dict.add(key_of(i), Stamp::new(i, round)).unwrap();
                }
            }
        }
        if round % 50 == 49 {
            dict.clear();
        }
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn iteration_with_a_concurrent_writer() {
    let set = Arc::new(SetStorage::new());
    for i in 0..NUM_KEYS {
        set.add(i).unwrap();
    }
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let set = Arc::clone(&set);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut i = NUM_KEYS;
            while !done.load(Ordering::Acquire) {
                set.add(i).unwrap();
                set.remove(&Key::Int(i - NUM_KEYS)).unwrap();
                i += 1;
            }
        })
    };

    let mut completed = 0;
    let mut invalidated = 0;
    for _ in 0..200 {
        let mut seen = 0;
        let mut failed = false;
        for item in set.iter() {
            match item {
                Ok(key) => {
                    assert!(matches!(key, Key::Int(_)));
                    seen += 1;
                }
                Err(Error::ChangedDuringIteration) => failed = true,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        if failed {
            invalidated += 1;
        } else {
            completed += 1;
            assert!(seen <= NUM_KEYS as usize + 1);
        }
    }
    done.store(true, Ordering::Release);
    writer.join().unwrap();

    assert_eq!(completed + invalidated, 200);
}

#[test]
fn concurrent_growth_is_visible_to_readers() {
    const MAX_VALUE: i64 = 10_000;

    let dict = Arc::new(DictStorage::<i64>::new());
    let barrier = Arc::new(Barrier::new(2));

    let reader = {
        let dict = Arc::clone(&dict);
        let barrier = Arc::clone(&barrier);
        std::thread::spawn(move || {
            barrier.wait();
            // Keys are added in order, so once a key is visible every smaller
            // key must be visible too.
            let mut highest = -1;
            while highest < MAX_VALUE - 1 {
                let next = highest + 1;
                if dict.get(&Key::Int(next)).unwrap() == Some(next) {
                    for i in 0..=next {
                        if i % 1_000 == 0 {
                            assert_eq!(dict.get(&Key::Int(i)).unwrap(), Some(i));
                        }
                    }
                    highest = next;
                }
            }
        })
    };

    barrier.wait();
    for i in 0..MAX_VALUE {
        dict.add(i, i).unwrap();
    }
    reader.join().unwrap();
}
