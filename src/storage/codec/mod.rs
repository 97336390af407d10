pub mod btree_page;
pub mod common;
pub mod heap_page;
pub mod tuple;

pub use btree_page::{
    BTreeHeaderPageCodec, BTreeInternalPageCodec, BTreeLeafPageCodec, BTreeRootPtrPageCodec,
};
pub use common::CommonCodec;
pub use heap_page::HeapPageCodec;
pub use tuple::TupleCodec;

// data + consumed offset
pub type DecodedData<T> = (T, usize);
