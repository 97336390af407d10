use crate::catalog::{DataType, TupleDescRef};
use crate::error::{VellumError, VellumResult};
use crate::storage::page::{BTreePageCategory, BTreePageId, PageId, TableId};
use crate::storage::tuple::{Field, RecordId, Tuple};
use std::cmp::Ordering;

/// Size in bytes of the root-pointer page at offset 0 of a B+-tree file:
/// root page number (4) + root category (1) + first header page number (4).
pub const ROOT_PTR_PAGE_SIZE: usize = 9;

const POINTER_BITS: usize = 32;

fn field_le(a: &Field, b: &Field) -> bool {
    matches!(
        a.partial_cmp(b),
        Some(Ordering::Less) | Some(Ordering::Equal)
    )
}

fn field_lt(a: &Field, b: &Field) -> bool {
    matches!(a.partial_cmp(b), Some(Ordering::Less))
}

/// The root-pointer page: where the tree hangs and where the free-page header
/// chain starts. Page number 0 is the root pointer itself, so 0 doubles as
/// the null page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeRootPtrPage {
    pub pid: BTreePageId,
    root: Option<BTreePageId>,
    header: Option<BTreePageId>,
}

impl BTreeRootPtrPage {
    pub fn id_for(table_id: TableId) -> BTreePageId {
        BTreePageId::new(table_id, 0, BTreePageCategory::RootPtr)
    }

    pub fn empty(pid: BTreePageId) -> Self {
        Self {
            pid,
            root: None,
            header: None,
        }
    }

    pub fn from_parts(
        pid: BTreePageId,
        root: Option<BTreePageId>,
        header: Option<BTreePageId>,
    ) -> Self {
        Self { pid, root, header }
    }

    pub fn root(&self) -> Option<BTreePageId> {
        self.root
    }

    /// Set the root. The category records whether the tree is a single leaf
    /// or has internal levels.
    pub fn set_root(&mut self, root: Option<BTreePageId>) {
        self.root = root;
    }

    pub fn header(&self) -> Option<BTreePageId> {
        self.header
    }

    pub fn set_header(&mut self, header: Option<BTreePageId>) {
        self.header = header;
    }
}

/**
 * Leaf page format:
 * ```text
 *  ----------------------------------------------------------------------
 *  | PARENT (4) | LEFT SIB (4) | RIGHT SIB (4) | BITMAP | TUPLES | ZEROS |
 *  ----------------------------------------------------------------------
 * ```
 * Tuples are kept sorted on the key field; sibling pointers chain all leaves
 * into a doubly linked list ordered by key. Page number 0 in a pointer field
 * means "none" (for the parent it means the root pointer).
 */
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeLeafPage {
    pub pid: BTreePageId,
    pub desc: TupleDescRef,
    pub key_field: usize,
    parent_no: u32,
    left_sibling_no: u32,
    right_sibling_no: u32,
    max_tuples: usize,
    tuples: Vec<Tuple>,
}

impl BTreeLeafPage {
    /// Three pointer fields share the page with the slot bits and records.
    pub fn max_tuples_for(page_size: usize, desc: &crate::catalog::TupleDesc) -> usize {
        (page_size * 8 - 3 * POINTER_BITS) / (desc.size() * 8 + 1)
    }

    pub fn empty(pid: BTreePageId, desc: TupleDescRef, key_field: usize, page_size: usize) -> Self {
        let max_tuples = Self::max_tuples_for(page_size, &desc);
        Self {
            pid,
            desc,
            key_field,
            parent_no: 0,
            left_sibling_no: 0,
            right_sibling_no: 0,
            max_tuples,
            tuples: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        pid: BTreePageId,
        desc: TupleDescRef,
        key_field: usize,
        parent_no: u32,
        left_sibling_no: u32,
        right_sibling_no: u32,
        max_tuples: usize,
        tuples: Vec<Tuple>,
    ) -> Self {
        let mut page = Self {
            pid,
            desc,
            key_field,
            parent_no,
            left_sibling_no,
            right_sibling_no,
            max_tuples,
            tuples,
        };
        page.assign_record_ids();
        page
    }

    pub fn parent_id(&self) -> BTreePageId {
        if self.parent_no == 0 {
            BTreeRootPtrPage::id_for(self.pid.table_id)
        } else {
            BTreePageId::new(self.pid.table_id, self.parent_no, BTreePageCategory::Internal)
        }
    }

    pub fn parent_no(&self) -> u32 {
        self.parent_no
    }

    /// `page_no == 0` parents the page to the root pointer.
    pub fn set_parent(&mut self, page_no: u32) {
        self.parent_no = page_no;
    }

    pub fn left_sibling_id(&self) -> Option<BTreePageId> {
        (self.left_sibling_no != 0).then(|| {
            BTreePageId::new(
                self.pid.table_id,
                self.left_sibling_no,
                BTreePageCategory::Leaf,
            )
        })
    }

    pub fn right_sibling_id(&self) -> Option<BTreePageId> {
        (self.right_sibling_no != 0).then(|| {
            BTreePageId::new(
                self.pid.table_id,
                self.right_sibling_no,
                BTreePageCategory::Leaf,
            )
        })
    }

    pub fn set_left_sibling(&mut self, page_no: u32) {
        self.left_sibling_no = page_no;
    }

    pub fn set_right_sibling(&mut self, page_no: u32) {
        self.right_sibling_no = page_no;
    }

    pub fn max_tuples(&self) -> usize {
        self.max_tuples
    }

    pub fn num_tuples(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.max_tuples - self.tuples.len()
    }

    pub fn tuple(&self, index: usize) -> VellumResult<&Tuple> {
        self.tuples.get(index).ok_or_else(|| {
            VellumError::Storage(format!(
                "no tuple at slot {} on leaf page {}",
                index, self.pid
            ))
        })
    }

    pub fn key(&self, index: usize) -> VellumResult<&Field> {
        self.tuple(index)?.field(self.key_field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.tuples.iter()
    }

    /// Insert keeping key order (duplicates go after their equals) and stamp
    /// the tuple's record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> VellumResult<()> {
        if *tuple.desc != *self.desc {
            return Err(VellumError::Storage(
                "tuple descriptor does not match the page".to_string(),
            ));
        }
        if self.tuples.len() >= self.max_tuples {
            return Err(VellumError::Storage(
                "the leaf page is full (no empty slots)".to_string(),
            ));
        }
        let key = tuple.field(self.key_field)?.clone();
        let position = self
            .tuples
            .partition_point(|t| t.fields.get(self.key_field).map_or(false, |k| field_le(k, &key)));
        self.tuples.insert(position, tuple.clone());
        self.assign_record_ids();
        tuple.record_id = self.tuples[position].record_id;
        Ok(())
    }

    /// Remove the stored copy of `tuple`, located by record id with a
    /// fall-back scan over equal values.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> VellumResult<()> {
        let by_rid = tuple.record_id.and_then(|rid| {
            if rid.page_id == PageId::BTree(self.pid) {
                let slot = rid.slot as usize;
                (slot < self.tuples.len() && self.tuples[slot] == *tuple).then_some(slot)
            } else {
                None
            }
        });
        let position = by_rid.or_else(|| self.tuples.iter().position(|t| t == tuple));
        let Some(position) = position else {
            return Err(VellumError::Storage(format!(
                "tuple {} is not on leaf page {}",
                tuple, self.pid
            )));
        };
        self.tuples.remove(position);
        self.assign_record_ids();
        Ok(())
    }

    /// Detach the upper `count` tuples, in order. Used when splitting.
    pub fn split_off_back(&mut self, count: usize) -> Vec<Tuple> {
        let at = self.tuples.len() - count;
        let moved = self.tuples.split_off(at);
        self.assign_record_ids();
        moved
    }

    /// Detach the lower `count` tuples, in order. Used when stealing from or
    /// merging with a right sibling.
    pub fn split_off_front(&mut self, count: usize) -> Vec<Tuple> {
        let moved: Vec<Tuple> = self.tuples.drain(..count).collect();
        self.assign_record_ids();
        moved
    }

    fn assign_record_ids(&mut self) {
        for (slot, tuple) in self.tuples.iter_mut().enumerate() {
            tuple.record_id = Some(RecordId::new(PageId::BTree(self.pid), slot as u32));
        }
    }

    pub(crate) fn parts(&self) -> (u32, u32, u32, usize, &[Tuple]) {
        (
            self.parent_no,
            self.left_sibling_no,
            self.right_sibling_no,
            self.max_tuples,
            &self.tuples,
        )
    }
}

/// One separator of an internal page: `key` splits the subtree under
/// `left_child` from the one under `right_child`. Consecutive entries share a
/// child pointer.
#[derive(derive_new::new, Debug, Clone, PartialEq)]
pub struct BTreeEntry {
    pub key: Field,
    pub left_child: BTreePageId,
    pub right_child: BTreePageId,
}

/**
 * Internal page format:
 * ```text
 *  ---------------------------------------------------------------------------
 *  | PARENT (4) | CHILD CATEG (1) | BITMAP | CHILD0 (4) | KEY+CHILD ... | 0s |
 *  ---------------------------------------------------------------------------
 * ```
 * `n` sorted keys share `n + 1` child page numbers; all children are leaves
 * or all are internal pages, recorded once in the child-category byte.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeInternalPage {
    pub pid: BTreePageId,
    pub key_type: DataType,
    parent_no: u32,
    child_category: Option<BTreePageCategory>,
    max_entries: usize,
    keys: Vec<Field>,
    children: Vec<u32>,
}

impl BTreeInternalPage {
    /// Parent pointer, child-category byte and the extra child pointer come
    /// off the top; each entry then costs a key, a pointer and a slot bit.
    pub fn max_entries_for(page_size: usize, key_type: DataType) -> usize {
        (page_size * 8 - 2 * POINTER_BITS - 8) / (key_type.len() * 8 + POINTER_BITS + 1)
    }

    pub fn empty(pid: BTreePageId, key_type: DataType, page_size: usize) -> Self {
        let max_entries = Self::max_entries_for(page_size, key_type);
        Self {
            pid,
            key_type,
            parent_no: 0,
            child_category: None,
            max_entries,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        pid: BTreePageId,
        key_type: DataType,
        parent_no: u32,
        child_category: Option<BTreePageCategory>,
        max_entries: usize,
        keys: Vec<Field>,
        children: Vec<u32>,
    ) -> Self {
        Self {
            pid,
            key_type,
            parent_no,
            child_category,
            max_entries,
            keys,
            children,
        }
    }

    pub fn parent_id(&self) -> BTreePageId {
        if self.parent_no == 0 {
            BTreeRootPtrPage::id_for(self.pid.table_id)
        } else {
            BTreePageId::new(self.pid.table_id, self.parent_no, BTreePageCategory::Internal)
        }
    }

    pub fn parent_no(&self) -> u32 {
        self.parent_no
    }

    pub fn set_parent(&mut self, page_no: u32) {
        self.parent_no = page_no;
    }

    pub fn child_category(&self) -> Option<BTreePageCategory> {
        self.child_category
    }

    pub fn set_child_category(&mut self, category: BTreePageCategory) {
        self.child_category = Some(category);
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn num_entries(&self) -> usize {
        self.keys.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.max_entries - self.keys.len()
    }

    pub fn children(&self) -> &[u32] {
        &self.children
    }

    pub fn key_at(&self, index: usize) -> VellumResult<&Field> {
        self.keys.get(index).ok_or_else(|| {
            VellumError::Storage(format!(
                "no entry at slot {} on internal page {}",
                index, self.pid
            ))
        })
    }

    pub fn set_key(&mut self, index: usize, key: Field) -> VellumResult<()> {
        if index >= self.keys.len() {
            return Err(VellumError::Storage(format!(
                "no entry at slot {} on internal page {}",
                index, self.pid
            )));
        }
        self.keys[index] = key;
        Ok(())
    }

    fn child_pid(&self, page_no: u32) -> VellumResult<BTreePageId> {
        let category = self.child_category.ok_or_else(|| {
            VellumError::Internal(format!(
                "internal page {} has children but no child category",
                self.pid
            ))
        })?;
        Ok(BTreePageId::new(self.pid.table_id, page_no, category))
    }

    pub fn entry(&self, index: usize) -> VellumResult<BTreeEntry> {
        let key = self.key_at(index)?.clone();
        Ok(BTreeEntry::new(
            key,
            self.child_pid(self.children[index])?,
            self.child_pid(self.children[index + 1])?,
        ))
    }

    pub fn entries(&self) -> VellumResult<Vec<BTreeEntry>> {
        (0..self.num_entries()).map(|i| self.entry(i)).collect()
    }

    /// Splice an entry in, reusing whichever of its child pointers already
    /// sits at the insert position; the other one is the new pointer.
    pub fn insert_entry(&mut self, entry: BTreeEntry) -> VellumResult<()> {
        if entry.left_child.category != entry.right_child.category {
            return Err(VellumError::Storage(format!(
                "entry children disagree on category: {} vs {}",
                entry.left_child, entry.right_child
            )));
        }
        if self.keys.len() >= self.max_entries {
            return Err(VellumError::Storage(
                "the internal page is full (no empty slots)".to_string(),
            ));
        }
        if self.child_category.is_none() {
            self.child_category = Some(entry.left_child.category);
        }
        let left = entry.left_child.page_no;
        let right = entry.right_child.page_no;

        if self.keys.is_empty() {
            match self.children.as_slice() {
                [] => self.children = vec![left, right],
                [only] if *only == left => self.children.push(right),
                [only] if *only == right => self.children.insert(0, left),
                _ => {
                    return Err(VellumError::Storage(format!(
                        "entry ({}, {}) does not connect to internal page {}",
                        entry.left_child, entry.right_child, self.pid
                    )))
                }
            }
            self.keys.push(entry.key);
            return Ok(());
        }

        let position = self.keys.partition_point(|k| field_lt(k, &entry.key));
        if self.children.get(position) == Some(&left) {
            self.keys.insert(position, entry.key);
            self.children.insert(position + 1, right);
        } else if self.children.get(position) == Some(&right) {
            self.keys.insert(position, entry.key);
            self.children.insert(position, left);
        } else if let Some(child_pos) = self.children.iter().position(|c| *c == left) {
            // Duplicate keys can leave the key search one slot off; fall back
            // to the position of the existing left child.
            self.keys.insert(child_pos, entry.key);
            self.children.insert(child_pos + 1, right);
        } else {
            return Err(VellumError::Storage(format!(
                "entry ({}, {}) does not connect to internal page {}",
                entry.left_child, entry.right_child, self.pid
            )));
        }
        Ok(())
    }

    /// Drop entry `index` together with its right child pointer.
    pub fn delete_key_and_right_child(&mut self, index: usize) -> VellumResult<()> {
        if index >= self.keys.len() {
            return Err(VellumError::Storage(format!(
                "no entry at slot {} on internal page {}",
                index, self.pid
            )));
        }
        self.keys.remove(index);
        self.children.remove(index + 1);
        Ok(())
    }

    /// Drop entry `index` together with its left child pointer.
    pub fn delete_key_and_left_child(&mut self, index: usize) -> VellumResult<()> {
        if index >= self.keys.len() {
            return Err(VellumError::Storage(format!(
                "no entry at slot {} on internal page {}",
                index, self.pid
            )));
        }
        self.keys.remove(index);
        self.children.remove(index);
        Ok(())
    }

    /// Locate `page_no` among the children and name the parent entries on
    /// either side of it: `(left_entry, right_entry)` indexes.
    pub fn entry_indexes_around(&self, page_no: u32) -> (Option<usize>, Option<usize>) {
        let mut left_entry = None;
        for index in 0..self.num_entries() {
            if self.children[index] == page_no {
                return (left_entry, Some(index));
            }
            if self.children[index + 1] == page_no {
                left_entry = Some(index);
            }
        }
        (left_entry, None)
    }

    pub(crate) fn parts(&self) -> (u32, Option<BTreePageCategory>, usize, &[Field], &[u32]) {
        (
            self.parent_no,
            self.child_category,
            self.max_entries,
            &self.keys,
            &self.children,
        )
    }
}

/**
 * Header page format:
 * ```text
 *  -------------------------------------------
 *  | PREV (4) | NEXT (4) | USED-PAGE BITMAP  |
 *  -------------------------------------------
 * ```
 * Header pages chain together and track which page numbers of the file are in
 * use; a clear bit is a freed page available for reuse. Header page `i` of
 * the chain covers page numbers `[i * slots, (i + 1) * slots)`.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeHeaderPage {
    pub pid: BTreePageId,
    prev_no: u32,
    next_no: u32,
    bitmap: Vec<u8>,
}

impl BTreeHeaderPage {
    pub fn num_slots_for(page_size: usize) -> usize {
        (page_size - 8) * 8
    }

    pub fn empty(pid: BTreePageId, page_size: usize) -> Self {
        Self {
            pid,
            prev_no: 0,
            next_no: 0,
            bitmap: vec![0u8; page_size - 8],
        }
    }

    pub(crate) fn from_parts(pid: BTreePageId, prev_no: u32, next_no: u32, bitmap: Vec<u8>) -> Self {
        Self {
            pid,
            prev_no,
            next_no,
            bitmap,
        }
    }

    /// Mark every covered page as in use. A fresh header page must start this
    /// way: pages it covers that already exist in the file are all live, and
    /// never-written page numbers are handed out by appending, not by the
    /// free list.
    pub fn init(&mut self) {
        for byte in self.bitmap.iter_mut() {
            *byte = 0xff;
        }
    }

    pub fn num_slots(&self) -> usize {
        self.bitmap.len() * 8
    }

    pub fn prev_page_id(&self) -> Option<BTreePageId> {
        (self.prev_no != 0).then(|| {
            BTreePageId::new(self.pid.table_id, self.prev_no, BTreePageCategory::Header)
        })
    }

    pub fn next_page_id(&self) -> Option<BTreePageId> {
        (self.next_no != 0).then(|| {
            BTreePageId::new(self.pid.table_id, self.next_no, BTreePageCategory::Header)
        })
    }

    pub fn set_prev(&mut self, page_no: u32) {
        self.prev_no = page_no;
    }

    pub fn set_next(&mut self, page_no: u32) {
        self.next_no = page_no;
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        (self.bitmap[slot / 8] & (1 << (slot % 8))) != 0
    }

    pub fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.bitmap[slot / 8] |= 1 << (slot % 8);
        } else {
            self.bitmap[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// First free slot, if any.
    pub fn get_empty_slot(&self) -> Option<usize> {
        (0..self.num_slots()).find(|slot| !self.is_slot_used(*slot))
    }

    pub(crate) fn parts(&self) -> (u32, u32, &[u8]) {
        (self.prev_no, self.next_no, &self.bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, TupleDesc};
    use std::sync::Arc;

    fn leaf_desc() -> TupleDescRef {
        Arc::new(TupleDesc::new(vec![
            Column::new("k", DataType::Int),
            Column::new("v", DataType::Int),
        ]))
    }

    fn leaf_pid(page_no: u32) -> BTreePageId {
        BTreePageId::new(9, page_no, BTreePageCategory::Leaf)
    }

    fn internal_pid(page_no: u32) -> BTreePageId {
        BTreePageId::new(9, page_no, BTreePageCategory::Internal)
    }

    #[test]
    fn leaf_keeps_tuples_sorted() {
        let desc = leaf_desc();
        let mut leaf = BTreeLeafPage::empty(leaf_pid(1), desc.clone(), 0, 4096);
        for key in [5, 1, 3, 2, 4] {
            let mut t = Tuple::new(desc.clone(), vec![key.into(), (key * 10).into()]);
            leaf.insert_tuple(&mut t).unwrap();
        }
        let keys: Vec<&Field> = (0..5).map(|i| leaf.key(i).unwrap()).collect();
        assert_eq!(
            keys,
            vec![
                &Field::Int(1),
                &Field::Int(2),
                &Field::Int(3),
                &Field::Int(4),
                &Field::Int(5)
            ]
        );
        // Record ids track the slot order.
        assert_eq!(leaf.tuple(0).unwrap().record_id.unwrap().slot, 0);
        assert_eq!(leaf.tuple(4).unwrap().record_id.unwrap().slot, 4);
    }

    #[test]
    fn leaf_split_off_back_keeps_order() {
        let desc = leaf_desc();
        let mut leaf = BTreeLeafPage::empty(leaf_pid(1), desc.clone(), 0, 4096);
        for key in 1..=6 {
            let mut t = Tuple::new(desc.clone(), vec![key.into(), 0.into()]);
            leaf.insert_tuple(&mut t).unwrap();
        }
        let moved = leaf.split_off_back(3);
        assert_eq!(leaf.num_tuples(), 3);
        assert_eq!(moved.len(), 3);
        assert_eq!(moved[0].fields[0], Field::Int(4));
        assert_eq!(moved[2].fields[0], Field::Int(6));
    }

    #[test]
    fn internal_entry_splicing() {
        let mut page = BTreeInternalPage::empty(internal_pid(10), DataType::Int, 4096);
        page.insert_entry(BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2)))
            .unwrap();
        page.insert_entry(BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3)))
            .unwrap();
        page.insert_entry(BTreeEntry::new(Field::Int(5), leaf_pid(4), leaf_pid(1)))
            .unwrap();

        assert_eq!(page.num_entries(), 3);
        assert_eq!(page.children(), &[4, 1, 2, 3]);
        let first = page.entry(0).unwrap();
        assert_eq!(first.key, Field::Int(5));
        assert_eq!(first.left_child, leaf_pid(4));
        assert_eq!(first.right_child, leaf_pid(1));
    }

    #[test]
    fn internal_delete_leaves_single_child() {
        let mut page = BTreeInternalPage::empty(internal_pid(10), DataType::Int, 4096);
        page.insert_entry(BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2)))
            .unwrap();
        page.delete_key_and_right_child(0).unwrap();
        assert_eq!(page.num_entries(), 0);
        assert_eq!(page.children(), &[1]);
    }

    #[test]
    fn entry_indexes_around_finds_siblings() {
        let mut page = BTreeInternalPage::empty(internal_pid(10), DataType::Int, 4096);
        page.insert_entry(BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2)))
            .unwrap();
        page.insert_entry(BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3)))
            .unwrap();

        assert_eq!(page.entry_indexes_around(1), (None, Some(0)));
        assert_eq!(page.entry_indexes_around(2), (Some(0), Some(1)));
        assert_eq!(page.entry_indexes_around(3), (Some(1), None));
        assert_eq!(page.entry_indexes_around(99), (None, None));
    }

    #[test]
    fn header_page_free_slots() {
        let pid = BTreePageId::new(9, 7, BTreePageCategory::Header);
        let mut header = BTreeHeaderPage::empty(pid, 4096);
        assert_eq!(header.num_slots(), (4096 - 8) * 8);

        header.init();
        assert_eq!(header.get_empty_slot(), None);

        header.mark_slot_used(42, false);
        assert_eq!(header.get_empty_slot(), Some(42));
        header.mark_slot_used(42, true);
        assert_eq!(header.get_empty_slot(), None);
    }
}
