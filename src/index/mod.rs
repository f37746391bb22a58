pub mod btree_index;
pub mod btree_internal_page;
pub mod btree_iterator;
pub mod btree_leaf_page;
pub mod btree_page;
pub mod key_comparator;

pub use btree_index::BPlusTree;
pub use btree_internal_page::InternalPage;
pub use btree_iterator::IndexIterator;
pub use btree_leaf_page::LeafPage;
pub use btree_page::{IndexPageType, TreeNode, TreeNodeMut, TreePage};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
