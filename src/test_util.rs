use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_epoch::Owned;

/// A value that records its own destruction in a [`DropNotifier`].
#[derive(Debug)]
pub(crate) struct NoisyDropper<T> {
    parent: Arc<DropNotifier>,
    pub elem: T,
}

impl<T> NoisyDropper<T> {
    pub(crate) fn new(parent: Arc<DropNotifier>, elem: T) -> Self {
        Self { parent, elem }
    }
}

impl<T> Drop for NoisyDropper<T> {
    fn drop(&mut self) {
        assert!(!self.parent.dropped.swap(true, Ordering::Relaxed));
    }
}

#[derive(Debug)]
pub(crate) struct DropNotifier {
    dropped: AtomicBool,
}

impl DropNotifier {
    pub(crate) fn new() -> Self {
        Self {
            dropped: AtomicBool::new(false),
        }
    }

    pub(crate) fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Pushes enough garbage through the epoch collector that everything deferred
/// before the call has been destroyed.
pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}

/// Writes the behaviour tests every map flavour must pass. `$m` must provide
/// `new`, `with_capacity`, `add`, `get`, `remove`, `len` and `is_empty`, and
/// accept `i64` values.
#[macro_export]
macro_rules! write_test_cases_for_me {
    ($m:ident) => {
        #[test]
        fn insertion() {
            const MAX_VALUE: i64 = 512;

            let map = $m::with_capacity(MAX_VALUE as usize);
            let buckets = map.bucket_count();

            for i in 0..MAX_VALUE {
                assert!(map.add(i, i).unwrap());

                assert!(!map.is_empty());
                assert_eq!(map.len(), (i + 1) as usize);

                for j in 0..=i {
                    assert_eq!(map.get(&$crate::Key::Int(j)).unwrap(), Some(j));
                }
                for k in i + 1..MAX_VALUE {
                    assert_eq!(map.get(&$crate::Key::Int(k)).unwrap(), None);
                }
            }

            assert_eq!(map.bucket_count(), buckets);
            $crate::test_util::run_deferred();
        }

        #[test]
        fn growth() {
            const MAX_VALUE: i64 = 512;

            let map = $m::new();

            for i in 0..MAX_VALUE {
                assert!(map.add(i, i).unwrap());
                assert_eq!(map.len(), (i + 1) as usize);
                assert!(!map.add(i, i + 1).unwrap());
                assert_eq!(map.len(), (i + 1) as usize);
            }

            for i in 0..MAX_VALUE {
                assert_eq!(map.get(&$crate::Key::Int(i)).unwrap(), Some(i + 1));
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn removal() {
            const MAX_VALUE: i64 = 512;

            let map = $m::with_capacity(MAX_VALUE as usize);

            for i in 0..MAX_VALUE {
                assert!(map.add(i, i).unwrap());
            }

            for i in 0..MAX_VALUE {
                assert_eq!(map.remove(&$crate::Key::Int(i)).unwrap(), Some(i));
                assert_eq!(map.remove(&$crate::Key::Int(i)).unwrap(), None);
                assert_eq!(map.len(), (MAX_VALUE - i - 1) as usize);

                for j in i + 1..MAX_VALUE {
                    assert_eq!(map.get(&$crate::Key::Int(j)).unwrap(), Some(j));
                }
            }

            assert!(map.is_empty());
            $crate::test_util::run_deferred();
        }

        #[test]
        fn string_keys() {
            let map = $m::new();

            for i in 0..128_i64 {
                assert!(map.add(format!("key{i}"), i).unwrap());
            }
            for i in 0..128_i64 {
                let key = $crate::Key::from(format!("key{i}"));
                assert_eq!(map.get(&key).unwrap(), Some(i));
            }
            assert_eq!(map.get(&$crate::Key::from("key128")).unwrap(), None);

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_insertion() {
            const MAX_VALUE: i64 = 512;
            const NUM_THREADS: usize = 64;
            const MAX_INSERTED_VALUE: i64 = (NUM_THREADS as i64) * MAX_VALUE;

            let map = std::sync::Arc::new($m::new());
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let map = std::sync::Arc::clone(&map);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i64 * MAX_VALUE)) {
                            assert!(map.add(j, j).unwrap());
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(std::thread::JoinHandle::join) {
                assert!(result.is_ok());
            }

            assert!(!map.is_empty());
            assert_eq!(map.len(), MAX_INSERTED_VALUE as usize);

            for i in 0..MAX_INSERTED_VALUE {
                assert_eq!(map.get(&$crate::Key::Int(i)).unwrap(), Some(i));
            }

            $crate::test_util::run_deferred();
        }

        #[test]
        fn concurrent_removal() {
            const MAX_VALUE: i64 = 512;
            const NUM_THREADS: usize = 64;
            const MAX_INSERTED_VALUE: i64 = (NUM_THREADS as i64) * MAX_VALUE;

            let map = $m::with_capacity(MAX_INSERTED_VALUE as usize);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(map.add(i, i).unwrap());
            }

            let map = std::sync::Arc::new(map);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let map = std::sync::Arc::clone(&map);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i64 * MAX_VALUE)) {
                            assert_eq!(map.remove(&$crate::Key::Int(j)).unwrap(), Some(j));
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(std::thread::JoinHandle::join) {
                assert!(result.is_ok());
            }

            assert_eq!(map.len(), 0);

            for i in 0..MAX_INSERTED_VALUE {
                assert_eq!(map.get(&$crate::Key::Int(i)).unwrap(), None);
            }

            $crate::test_util::run_deferred();
        }
    };
}
