pub mod btree;
pub mod heap;
pub mod tuple;
pub mod value;

pub use btree::BPlusTree;
pub use heap::{TableHeap, TableIterator};
pub use tuple::{Rid, Tuple, TupleMeta};
pub use value::{deserialize_values, serialize_values, DataType, Value};
