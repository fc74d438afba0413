use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::ControlFlow;

fn validate_trie<V>(t: &HatTrie<V>) {
    validate_links(t, true);
}

/// Checks reachability and bookkeeping. Thresholds are skipped when a burst
/// may have been cut short.
fn validate_links<V>(t: &HatTrie<V>, check_thresholds: bool) {
    let mut seen_nodes: HashSet<u32> = HashSet::new();
    let mut seen_containers: HashSet<u32> = HashSet::new();
    let mut stored = 0usize;

    let mut stack = vec![t.root];
    while let Some(id) = stack.pop() {
        assert!(seen_nodes.insert(id.0), "node {} reachable twice", id.0);
        let node = t.nodes.get(id.0);
        if node.value.is_some() {
            stored += 1;
        }
        for (_, child) in node.children() {
            match child {
                Child::Node(next) => stack.push(next),
                Child::Container(cid) => {
                    assert!(
                        seen_containers.insert(cid.0),
                        "container {} reachable twice",
                        cid.0
                    );
                    let c = t.containers.get(cid.0);
                    assert!(!c.is_empty(), "empty container must be pruned");
                    assert!(
                        !check_thresholds || !c.is_overfull(&t.config),
                        "container over thresholds: {} entries, {} bytes",
                        c.len(),
                        c.total_bytes()
                    );

                    let mut entries = 0;
                    let mut bytes = 0;
                    let mut suffixes = HashSet::new();
                    for (suffix, _) in c.iter() {
                        entries += 1;
                        if !suffix.is_empty() {
                            bytes += container::encoded_len(suffix.len());
                        }
                        assert!(suffix.len() <= c.max_suffix(), "max_suffix too small");
                        assert!(suffixes.insert(suffix.to_vec()), "duplicate suffix");
                    }
                    assert_eq!(entries, c.len(), "container count drifted");
                    assert_eq!(bytes, c.total_bytes(), "container byte total drifted");
                    stored += entries;
                }
            }
        }
    }

    assert_eq!(seen_nodes.len(), t.nodes.len(), "unreachable nodes in arena");
    assert_eq!(
        seen_containers.len(),
        t.containers.len(),
        "unreachable containers in arena"
    );
    assert_eq!(stored, t.len, "stored key count must match HatTrie::len");
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    // A narrow alphabet makes shared prefixes and repeated keys common.
    let byte = prop_oneof![
        4 => prop::sample::select(vec![0x00u8, b'a', b'b', 0x80, 0xFF]),
        1 => any::<u8>(),
    ];
    prop::collection::vec(byte, 0..=12)
}

fn config_strategy() -> impl Strategy<Value = Config> {
    (1usize..=8, 1usize..=64, prop::sample::select(vec![1usize, 2, 4])).prop_map(
        |(max_count, max_bytes, initial_slots)| {
            Config::default()
                .with_max_count(max_count)
                .with_max_bytes(max_bytes)
                .with_initial_slots(initial_slots)
        },
    )
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 8)]
    Insert(#[proptest(strategy = "key_strategy()")] Vec<u8>, u64),
    #[proptest(weight = 4)]
    Increment(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 4)]
    Remove(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 3)]
    Get(#[proptest(strategy = "key_strategy()")] Vec<u8>),
}

fn naive_prefixes(m: &BTreeMap<Vec<u8>, u64>, query: &[u8]) -> Vec<(Vec<u8>, u64)> {
    m.iter()
        .filter(|(k, _)| query.starts_with(k))
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

fn walked(t: &mut HatTrie, query: &[u8]) -> Vec<(Vec<u8>, u64)> {
    let mut out = Vec::new();
    t.walk(query, |k, v| {
        out.push((k.to_vec(), *v));
        ControlFlow::Continue(())
    });
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(
        cfg in config_strategy(),
        ops in prop::collection::vec(any::<Op>(), 0..=1000),
    ) {
        let mut t: HatTrie = HatTrie::with_config(cfg).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.insert(&key, value).unwrap();
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Increment(key) => {
                    let got = t.get_or_insert(&key).unwrap();
                    *got = got.wrapping_add(1);
                    let got = *got;
                    let expected = m.entry(key).or_insert(0);
                    *expected = expected.wrapping_add(1);
                    prop_assert_eq!(got, *expected);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(&key);
                    let old_m = m.remove(key.as_slice());
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get(&key).copied();
                    let got_m = m.get(key.as_slice()).copied();
                    prop_assert_eq!(got_t, got_m);
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_trie(&t);

        let got: Vec<(Vec<u8>, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(Vec<u8>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(got, expected);

        let unsorted: BTreeSet<(Vec<u8>, u64)> = t.iter_unsorted().map(|(k, v)| (k, *v)).collect();
        prop_assert_eq!(unsorted.len(), m.len());
        prop_assert!(unsorted.iter().all(|(k, v)| m.get(k) == Some(v)));
    }

    #[test]
    fn prop_walk_matches_naive(
        cfg in config_strategy(),
        keys in prop::collection::vec(key_strategy(), 0..=200),
        queries in prop::collection::vec(key_strategy(), 1..=50),
    ) {
        let mut t: HatTrie = HatTrie::with_config(cfg).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
        for (i, k) in keys.into_iter().enumerate() {
            t.insert(&k, i as u64).unwrap();
            m.insert(k, i as u64);
        }
        validate_trie(&t);

        // Extending stored keys guarantees queries that actually hit.
        let extended: Vec<Vec<u8>> = m.keys().map(|k| [k.as_slice(), &b"\xFFa"[..]].concat()).collect();
        for query in queries.iter().chain(extended.iter()) {
            let expected = naive_prefixes(&m, query);
            prop_assert_eq!(
                t.longest_prefix(query).map(|(n, v)| (n, *v)),
                expected.last().map(|(k, v)| (k.len(), *v))
            );
            prop_assert_eq!(walked(&mut t, query), expected);
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_keys() -> Vec<Vec<u8>> {
    vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"a\0".to_vec(),
    ]
}

/// Bursts on every second key.
fn burst_happy() -> Config {
    Config::default().with_max_count(1).with_initial_slots(1)
}

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&small_keys(), |perm| {
        let mut t: HatTrie = HatTrie::with_config(burst_happy()).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.insert(&k, v).unwrap(), m.insert(k, v));
            validate_trie(&t);
        }

        let got: Vec<(Vec<u8>, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(Vec<u8>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_keys();

    // Insert in a fixed order, then remove in all permutations.
    let mut base_trie: HatTrie = HatTrie::with_config(burst_happy()).unwrap();
    let mut base_map: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
    for (i, k) in keys.iter().enumerate() {
        let v = i as u64;
        assert_eq!(base_trie.insert(k, v).unwrap(), base_map.insert(k.clone(), v));
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_trie.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.remove(&k), m.remove(k.as_slice()));
            assert_eq!(t.len(), m.len());
            validate_trie(&t);
            let got: Vec<Vec<u8>> = t.keys().collect();
            let expected: Vec<Vec<u8>> = m.keys().cloned().collect();
            assert_eq!(got, expected);
        }
        assert!(t.is_empty());
        assert_eq!(t.stats().containers, 0);
    });
}

// =============================================================================
// Allocation failure
// =============================================================================

thread_local! {
    /// Allocations this thread may still make; `None` means unlimited.
    static ALLOC_BUDGET: Cell<Option<usize>> = const { Cell::new(None) };
}

/// System allocator that fails once the calling thread's budget runs out.
struct BudgetAlloc;

impl BudgetAlloc {
    fn exhausted() -> bool {
        ALLOC_BUDGET
            .try_with(|budget| match budget.get() {
                None => false,
                Some(0) => true,
                Some(n) => {
                    budget.set(Some(n - 1));
                    false
                }
            })
            .unwrap_or(false)
    }
}

unsafe impl GlobalAlloc for BudgetAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if Self::exhausted() {
            return std::ptr::null_mut();
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if Self::exhausted() {
            return std::ptr::null_mut();
        }
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static GLOBAL: BudgetAlloc = BudgetAlloc;

/// Runs `f` with at most `n` successful allocations on this thread. `f` must
/// not panic or allocate infallibly.
fn with_alloc_budget<R>(n: usize, f: impl FnOnce() -> R) -> R {
    ALLOC_BUDGET.with(|b| b.set(Some(n)));
    let r = f();
    ALLOC_BUDGET.with(|b| b.set(None));
    r
}

/// Fails each allocation an insert makes in turn, and checks the trie after
/// every failure: earlier keys intact, the new key either absent or fully
/// stored, and every structural link consistent.
fn check_insert_under_failures(cfg: Config, base: &[&[u8]], key: &[u8]) {
    let build = || {
        let mut t: HatTrie = HatTrie::with_config(cfg).unwrap();
        for (i, k) in base.iter().enumerate() {
            t.insert(k, i as u64).unwrap();
        }
        t
    };
    // Unrestricted run first, so lazily initialised tracing callsites are
    // registered before any allocation can fail.
    build().insert(key, 99).unwrap();

    let mut failures = 0;
    for budget in 0.. {
        let mut t = build();
        let r = with_alloc_budget(budget, || t.insert(key, 99));
        let succeeded = r.is_ok();

        let mut expected: BTreeMap<Vec<u8>, u64> = base
            .iter()
            .enumerate()
            .map(|(i, k)| (k.to_vec(), i as u64))
            .collect();
        match r {
            Ok(old) => {
                assert_eq!(old, None);
                expected.insert(key.to_vec(), 99);
                validate_trie(&t);
            }
            Err(e) => {
                assert!(matches!(e, HatTrieError::OutOfMemory(_)), "{e}");
                failures += 1;
                if t.get(key).is_some() {
                    // Stored before a burst ran out of memory.
                    expected.insert(key.to_vec(), 99);
                }
                validate_links(&t, false);
            }
        }
        assert_eq!(t.len(), expected.len(), "budget {budget}");
        let got: Vec<(Vec<u8>, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let want: Vec<(Vec<u8>, u64)> = expected.into_iter().collect();
        assert_eq!(got, want, "budget {budget}");

        // A failed insert must not stop later ones from succeeding.
        t.insert(b"after", 1).unwrap();
        assert_eq!(t.get(b"after"), Some(&1));
        if succeeded {
            break;
        }
    }
    assert!(failures > 0, "insert never allocated");
}

#[test]
fn insert_into_new_container_survives_allocation_failure() {
    check_insert_under_failures(Config::default(), &[b"x"], b"abc");
}

#[test]
fn insert_with_grow_survives_allocation_failure() {
    let base: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'k', b'0' + i]).collect();
    let base: Vec<&[u8]> = base.iter().map(Vec::as_slice).collect();
    let cfg = Config::default().with_initial_slots(1);
    check_insert_under_failures(cfg, &base, b"k9");
}

#[test]
fn insert_with_burst_survives_allocation_failure() {
    let cfg = Config::default().with_max_count(3).with_initial_slots(1);
    check_insert_under_failures(cfg, &[b"a", b"ab", b"ac"], b"ad");
}
