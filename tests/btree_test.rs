use std::collections::BTreeMap;
use std::sync::Arc;

use burrow::buffer::BufferPoolManager;
use burrow::common::{BurrowError, IndexConfig, PageId, RowId};
use burrow::index::{BPlusTree, IntegerComparator, TreeNode, TreePage};
use burrow::storage::disk::DiskManager;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    (bpm, temp_file)
}

fn small_config() -> IndexConfig {
    IndexConfig::new(4).with_leaf_max_size(4).with_internal_max_size(4)
}

fn key(k: u32) -> [u8; 4] {
    k.to_le_bytes()
}

fn decode(key: &[u8]) -> u32 {
    u32::from_le_bytes(key.try_into().unwrap())
}

fn rid(k: u32) -> RowId {
    RowId::new(PageId::new(k / 100), k % 100)
}

fn scan(tree: &BPlusTree<IntegerComparator>) -> Vec<u32> {
    tree.begin().unwrap().map(|entry| decode(&entry.unwrap().0)).collect()
}

#[test]
fn test_btree_create() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::new(0, bpm, IntegerComparator, IndexConfig::new(4)).unwrap();

    assert!(tree.is_empty());
    assert_eq!(tree.begin().unwrap(), tree.end().unwrap());
}

#[test]
fn test_btree_rejects_bad_config() {
    let (bpm, _temp) = create_bpm(10);
    let config = IndexConfig::new(4).with_internal_max_size(3);
    assert!(matches!(
        BPlusTree::new(0, bpm, IntegerComparator, config),
        Err(BurrowError::InvalidConfig(_))
    ));
}

#[test]
fn test_btree_insert_and_search() {
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new(0, bpm, IntegerComparator, IndexConfig::new(4)).unwrap();

    assert!(tree.insert(&key(10), rid(10)).unwrap());
    assert!(tree.insert(&key(20), rid(20)).unwrap());
    assert!(tree.insert(&key(30), rid(30)).unwrap());

    assert_eq!(tree.get_value(&key(10)).unwrap(), Some(rid(10)));
    assert_eq!(tree.get_value(&key(20)).unwrap(), Some(rid(20)));
    assert_eq!(tree.get_value(&key(30)).unwrap(), Some(rid(30)));
    assert_eq!(tree.get_value(&key(15)).unwrap(), None);
}

#[test]
fn test_btree_duplicate_insert_keeps_first_value() {
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new(0, bpm, IntegerComparator, small_config()).unwrap();

    assert!(tree.insert(&key(1), rid(1)).unwrap());
    assert!(!tree.insert(&key(1), rid(2)).unwrap());
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_btree_split() {
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();

    for k in 1..=5 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let guard = bpm.fetch_page(tree.root_page_id()).unwrap().unwrap();
    let data = guard.data();
    let TreePage::Internal(root) = TreePage::from_data(&data[..]).unwrap() else {
        panic!("root should be internal after the split");
    };
    assert_eq!(root.size(), 2);
    assert_eq!(decode(root.key_at(1)), 4);

    let sizes: Vec<usize> = (0..2)
        .map(|i| {
            let child = bpm.fetch_page(root.value_at(i)).unwrap().unwrap();
            let child_data = child.data();
            let leaf = TreePage::from_data(&child_data[..]).unwrap();
            assert!(leaf.is_leaf());
            assert_eq!(leaf.parent_page_id(), tree.root_page_id());
            leaf.size()
        })
        .collect();
    assert_eq!(sizes, vec![3, 2]);
}

#[test]
fn test_btree_insert_reverse() {
    let (bpm, _temp) = create_bpm(32);
    let mut tree = BPlusTree::new(0, bpm, IntegerComparator, small_config()).unwrap();

    for k in (0..200).rev() {
        assert!(tree.insert(&key(k), rid(k)).unwrap());
    }
    tree.check_integrity().unwrap();
    assert_eq!(scan(&tree), (0..200).collect::<Vec<_>>());
}

#[test]
fn test_btree_random_operations_match_btreemap() {
    let (bpm, _temp) = create_bpm(64);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0xB0B);

    for _ in 0..2000 {
        let k = rng.gen_range(0..300u32);
        if rng.gen_bool(0.6) {
            let value = RowId::new(PageId::new(k), rng.gen());
            let inserted = tree.insert(&key(k), value).unwrap();
            assert_eq!(inserted, !model.contains_key(&k));
            model.entry(k).or_insert(value);
        } else {
            assert_eq!(tree.remove(&key(k)).unwrap(), model.remove(&k).is_some());
        }
        tree.check_integrity().unwrap();
    }

    for k in 0..300 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), model.get(&k).copied());
    }
    assert_eq!(scan(&tree), model.keys().copied().collect::<Vec<_>>());
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_remove_all_shuffled() {
    let (bpm, _temp) = create_bpm(32);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();

    let mut keys: Vec<u32> = (0..150).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(7));
    for &k in &keys {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    keys.shuffle(&mut StdRng::seed_from_u64(8));
    for &k in &keys {
        assert!(tree.remove(&key(k)).unwrap());
        assert_eq!(tree.get_value(&key(k)).unwrap(), None);
        tree.check_integrity().unwrap();
    }

    assert!(tree.is_empty());
    // Only the roots registry is left on disk.
    assert_eq!(bpm.disk_manager().num_allocated_pages(), 1);
}

#[test]
fn test_btree_range_scan() {
    let (bpm, _temp) = create_bpm(32);
    let mut tree = BPlusTree::new(0, bpm, IntegerComparator, small_config()).unwrap();

    for k in 0..50 {
        tree.insert(&key(k * 10), rid(k * 10)).unwrap();
    }

    let results = tree.range_scan(&key(95), &key(150)).unwrap();
    let keys: Vec<u32> = results.iter().map(|(k, _)| decode(k)).collect();
    assert_eq!(keys, vec![100, 110, 120, 130, 140, 150]);
    assert_eq!(results[0].1, rid(100));

    assert!(tree.range_scan(&key(1000), &key(2000)).unwrap().is_empty());
    assert_eq!(tree.range_scan(&key(0), &key(u32::MAX)).unwrap().len(), 50);
}

#[test]
fn test_btree_begin_at() {
    let (bpm, _temp) = create_bpm(32);
    let mut tree = BPlusTree::new(0, bpm, IntegerComparator, small_config()).unwrap();

    for k in 0..40 {
        tree.insert(&key(k * 2), rid(k * 2)).unwrap();
    }

    let mut iter = tree.begin_at(&key(31)).unwrap();
    let (first, value) = iter.advance().unwrap().unwrap();
    assert_eq!(decode(&first), 32);
    assert_eq!(value, rid(32));

    let rest: Vec<u32> = iter.map(|entry| decode(&entry.unwrap().0)).collect();
    assert_eq!(rest, (17..40).map(|k| k * 2).collect::<Vec<_>>());
}

#[test]
fn test_btree_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, dm));
        let mut tree = BPlusTree::new(3, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
        for k in 0..100 {
            tree.insert(&key(k), rid(k)).unwrap();
        }
        let mut other = BPlusTree::new(4, bpm, IntegerComparator, small_config()).unwrap();
        other.insert(&key(7), rid(7)).unwrap();
    }

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(32, dm));
    let tree = BPlusTree::new(3, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    assert!(!tree.is_empty());
    tree.check_integrity().unwrap();
    assert_eq!(scan(&tree), (0..100).collect::<Vec<_>>());

    let other = BPlusTree::new(4, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    assert_eq!(scan(&other), vec![7]);

    let fresh = BPlusTree::new(5, bpm, IntegerComparator, small_config()).unwrap();
    assert!(fresh.is_empty());
}

#[test]
fn test_btree_reopen_with_other_key_size() {
    let (bpm, _temp) = create_bpm(16);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    tree.insert(&key(1), rid(1)).unwrap();

    let wide = IndexConfig::new(8).with_leaf_max_size(4).with_internal_max_size(4);
    assert!(matches!(
        BPlusTree::new(0, bpm, IntegerComparator, wide),
        Err(BurrowError::KeySizeMismatch { expected: 8, actual: 4 })
    ));
}

#[test]
fn test_btree_wide_keys() {
    let (bpm, _temp) = create_bpm(32);
    let config = IndexConfig::new(8).with_leaf_max_size(6).with_internal_max_size(5);
    let mut tree = BPlusTree::new(0, bpm, IntegerComparator, config).unwrap();

    let keys: Vec<u64> = (0..100).map(|k| k << 33).collect();
    for &k in keys.iter().rev() {
        tree.insert(&k.to_le_bytes(), RowId::new(PageId::new(1), k as u32)).unwrap();
    }
    tree.check_integrity().unwrap();

    let scanned: Vec<u64> = tree
        .begin()
        .unwrap()
        .map(|entry| u64::from_le_bytes(entry.unwrap().0.try_into().unwrap()))
        .collect();
    assert_eq!(scanned, keys);
}

#[test]
fn test_btree_out_of_memory_leaves_tree_intact() {
    // Enough frames for the registry, the root leaf and nothing more.
    let (bpm, _temp) = create_bpm(3);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    for k in 1..=4 {
        tree.insert(&key(k), rid(k)).unwrap();
    }
    let allocated = bpm.disk_manager().num_allocated_pages();

    // The root leaf is full: the split needs a new leaf and a new root while
    // the leaf itself stays pinned.
    let pinned = bpm.fetch_page(PageId::new(0)).unwrap().unwrap();
    assert!(matches!(tree.insert(&key(5), rid(5)), Err(BurrowError::OutOfMemory)));
    drop(pinned);

    assert_eq!(bpm.disk_manager().num_allocated_pages(), allocated);
    assert_eq!(tree.get_value(&key(5)).unwrap(), None);
    assert_eq!(scan(&tree), vec![1, 2, 3, 4]);
    tree.check_integrity().unwrap();

    // With the registry page released there is room again.
    assert!(tree.insert(&key(5), rid(5)).unwrap());
    tree.check_integrity().unwrap();
}

#[test]
fn test_btree_remove_out_of_memory_leaves_tree_intact() {
    let (bpm, _temp) = create_bpm(3);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    for k in 1..=5 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    // Removing 4 underflows its leaf, which needs the leaf, its parent and
    // its sibling at once; the pinned registry page leaves only two frames.
    let pinned = bpm.fetch_page(PageId::new(0)).unwrap().unwrap();
    assert!(matches!(tree.remove(&key(4)), Err(BurrowError::OutOfMemory)));
    assert_eq!(tree.get_value(&key(4)).unwrap(), Some(rid(4)));
    assert_eq!(scan(&tree), vec![1, 2, 3, 4, 5]);
    tree.check_integrity().unwrap();
    drop(pinned);

    // Three frames are enough for the merge and the root collapse after it.
    assert!(tree.remove(&key(4)).unwrap());
    assert_eq!(tree.get_value(&key(4)).unwrap(), None);
    assert_eq!(scan(&tree), vec![1, 2, 3, 5]);
    tree.check_integrity().unwrap();
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_destroy() {
    let (bpm, _temp) = create_bpm(32);
    let mut tree = BPlusTree::new(0, Arc::clone(&bpm), IntegerComparator, small_config()).unwrap();
    for k in 0..60 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    tree.destroy().unwrap();
    assert!(tree.is_empty());
    assert_eq!(bpm.disk_manager().num_allocated_pages(), 1);

    // The same index id starts over.
    let mut reopened = BPlusTree::new(0, bpm, IntegerComparator, small_config()).unwrap();
    assert!(reopened.is_empty());
    reopened.insert(&key(9), rid(9)).unwrap();
    assert_eq!(scan(&reopened), vec![9]);
}
