pub mod btree_page;
pub mod heap_page;

pub use btree_page::{
    BTreeEntry, BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreeRootPtrPage,
    ROOT_PTR_PAGE_SIZE,
};
pub use heap_page::HeapPage;

use crate::error::{VellumError, VellumResult};
use std::fmt::{Display, Formatter};

/// Stable identifier of a table, derived by hashing the absolute path of the
/// backing file.
pub type TableId = u32;

#[derive(derive_new::new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl Display for HeapPageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "heap({}:{})", self.table_id, self.page_no)
    }
}

/// The role a B+-tree page plays in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BTreePageCategory {
    RootPtr,
    Internal,
    Leaf,
    Header,
}

impl BTreePageCategory {
    pub fn to_code(self) -> u8 {
        match self {
            BTreePageCategory::RootPtr => 0,
            BTreePageCategory::Internal => 1,
            BTreePageCategory::Leaf => 2,
            BTreePageCategory::Header => 3,
        }
    }

    pub fn from_code(code: u8) -> VellumResult<Self> {
        match code {
            0 => Ok(BTreePageCategory::RootPtr),
            1 => Ok(BTreePageCategory::Internal),
            2 => Ok(BTreePageCategory::Leaf),
            3 => Ok(BTreePageCategory::Header),
            other => Err(VellumError::Storage(format!(
                "invalid b+tree page category code {}",
                other
            ))),
        }
    }
}

impl Display for BTreePageCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BTreePageCategory::RootPtr => "root-ptr",
            BTreePageCategory::Internal => "internal",
            BTreePageCategory::Leaf => "leaf",
            BTreePageCategory::Header => "header",
        };
        write!(f, "{}", name)
    }
}

#[derive(derive_new::new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BTreePageId {
    pub table_id: TableId,
    pub page_no: u32,
    pub category: BTreePageCategory,
}

impl Display for BTreePageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "btree({}:{}:{})", self.table_id, self.page_no, self.category)
    }
}

/// Identity of any page the buffer pool can cache. Equality and hashing are
/// structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageId {
    Heap(HeapPageId),
    BTree(BTreePageId),
}

impl PageId {
    pub fn table_id(&self) -> TableId {
        match self {
            PageId::Heap(pid) => pid.table_id,
            PageId::BTree(pid) => pid.table_id,
        }
    }

    pub fn page_no(&self) -> u32 {
        match self {
            PageId::Heap(pid) => pid.page_no,
            PageId::BTree(pid) => pid.page_no,
        }
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PageId::Heap(pid) => write!(f, "{}", pid),
            PageId::BTree(pid) => write!(f, "{}", pid),
        }
    }
}

impl From<HeapPageId> for PageId {
    fn from(pid: HeapPageId) -> Self {
        PageId::Heap(pid)
    }
}

impl From<BTreePageId> for PageId {
    fn from(pid: BTreePageId) -> Self {
        PageId::BTree(pid)
    }
}
