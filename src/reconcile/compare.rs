//! Set-difference matching between local records and remote entities

use std::collections::HashMap;

/// Stable matching key shared by both sides of a reconciliation pass
pub trait SyncKey {
    /// The key this element is matched on (exact equality, no fuzzing)
    fn sync_key(&self) -> String;
}

/// Disjoint outcome of matching a local set against a remote set
#[derive(Debug)]
pub struct ComparedSets<L, R> {
    /// Keys present locally but no longer remote, in local order
    pub removed: Vec<L>,
    /// Keys present on both sides, paired
    pub common: Vec<(L, R)>,
    /// Keys present remotely but not locally, in remote order
    pub added: Vec<R>,
}

/// Match local elements against remote elements by key
///
/// Builds a key index over the smaller side and single-pass scans the
/// other: O(|L|+|R|) time, O(min(|L|,|R|)) auxiliary space. Duplicate keys
/// within one side are malformed input; the first occurrence wins and the
/// remainder are classified as unmatched (`removed` for local duplicates,
/// `added` for remote ones) rather than silently dropped.
pub fn compare_sets<L: SyncKey, R: SyncKey>(local: Vec<L>, remote: Vec<R>) -> ComparedSets<L, R> {
    if local.len() <= remote.len() {
        index_local(local, remote)
    } else {
        index_remote(local, remote)
    }
}

fn index_local<L: SyncKey, R: SyncKey>(local: Vec<L>, remote: Vec<R>) -> ComparedSets<L, R> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(local.len());
    for (i, l) in local.iter().enumerate() {
        index.entry(l.sync_key()).or_insert(i);
    }

    let mut slots: Vec<Option<L>> = local.into_iter().map(Some).collect();
    let mut common = Vec::new();
    let mut added = Vec::new();

    for r in remote {
        match index.get(&r.sync_key()).copied() {
            Some(i) => match slots[i].take() {
                Some(l) => common.push((l, r)),
                // Key already paired: surplus remote duplicate
                None => added.push(r),
            },
            None => added.push(r),
        }
    }

    let removed = slots.into_iter().flatten().collect();
    ComparedSets {
        removed,
        common,
        added,
    }
}

fn index_remote<L: SyncKey, R: SyncKey>(local: Vec<L>, remote: Vec<R>) -> ComparedSets<L, R> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(remote.len());
    for (i, r) in remote.iter().enumerate() {
        index.entry(r.sync_key()).or_insert(i);
    }

    let mut slots: Vec<Option<R>> = remote.into_iter().map(Some).collect();
    let mut common = Vec::new();
    let mut removed = Vec::new();

    for l in local {
        match index.get(&l.sync_key()).copied() {
            Some(i) => match slots[i].take() {
                Some(r) => common.push((l, r)),
                // Key already paired: surplus local duplicate
                None => removed.push(l),
            },
            None => removed.push(l),
        }
    }

    let added = slots.into_iter().flatten().collect();
    ComparedSets {
        removed,
        common,
        added,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    struct Keyed(&'static str);

    impl SyncKey for Keyed {
        fn sync_key(&self) -> String {
            self.0.to_string()
        }
    }

    fn keys(items: &[Keyed]) -> Vec<&'static str> {
        items.iter().map(|k| k.0).collect()
    }

    #[test]
    fn partitions_are_disjoint_and_complete() {
        let local = vec![Keyed("a"), Keyed("b"), Keyed("c")];
        let remote = vec![Keyed("b"), Keyed("c"), Keyed("d"), Keyed("e")];

        let sets = compare_sets(local, remote);

        // |removed| + |common| = |L| and |added| + |common| = |R|
        assert_eq!(sets.removed.len() + sets.common.len(), 3);
        assert_eq!(sets.added.len() + sets.common.len(), 4);

        let mut seen = HashSet::new();
        for k in keys(&sets.removed) {
            assert!(seen.insert(k));
        }
        for (l, r) in &sets.common {
            assert_eq!(l.0, r.0);
            assert!(seen.insert(l.0));
        }
        for k in keys(&sets.added) {
            assert!(seen.insert(k));
        }

        assert_eq!(keys(&sets.removed), vec!["a"]);
        assert_eq!(keys(&sets.added), vec!["d", "e"]);
    }

    #[test]
    fn unchanged_sets_have_no_drift() {
        let local = vec![Keyed("a"), Keyed("b")];
        let remote = vec![Keyed("b"), Keyed("a")];

        let sets = compare_sets(local, remote);
        assert!(sets.removed.is_empty());
        assert!(sets.added.is_empty());
        assert_eq!(sets.common.len(), 2);
    }

    #[test]
    fn empty_sides() {
        let sets = compare_sets(Vec::<Keyed>::new(), vec![Keyed("a")]);
        assert_eq!(keys(&sets.added), vec!["a"]);
        assert!(sets.removed.is_empty());

        let sets = compare_sets(vec![Keyed("a")], Vec::<Keyed>::new());
        assert_eq!(keys(&sets.removed), vec!["a"]);
        assert!(sets.added.is_empty());
    }

    #[test]
    fn duplicate_local_keys_first_seen_wins() {
        // local larger: remote side gets indexed
        let local = vec![Keyed("a"), Keyed("a"), Keyed("b")];
        let remote = vec![Keyed("a")];

        let sets = compare_sets(local, remote);
        assert_eq!(sets.common.len(), 1);
        // Surplus duplicate is reported as removed, not dropped
        assert_eq!(keys(&sets.removed), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_remote_keys_first_seen_wins() {
        // remote larger: local side gets indexed
        let local = vec![Keyed("a")];
        let remote = vec![Keyed("a"), Keyed("a"), Keyed("b")];

        let sets = compare_sets(local, remote);
        assert_eq!(sets.common.len(), 1);
        // Surplus duplicate is reported as added, not dropped
        assert_eq!(keys(&sets.added), vec!["a", "b"]);
    }

    #[test]
    fn both_orientations_agree() {
        // Same logical input, padded so each branch gets exercised
        let local = vec![Keyed("a"), Keyed("b"), Keyed("c"), Keyed("x")];
        let remote = vec![Keyed("b"), Keyed("d")];

        let sets = compare_sets(local, remote);
        assert_eq!(keys(&sets.removed), vec!["a", "c", "x"]);
        assert_eq!(keys(&sets.added), vec!["d"]);
        assert_eq!(sets.common.len(), 1);
    }
}
