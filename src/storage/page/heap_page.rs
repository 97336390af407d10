use crate::catalog::TupleDescRef;
use crate::error::{VellumError, VellumResult};
use crate::storage::page::{HeapPageId, PageId};
use crate::storage::tuple::{RecordId, Tuple};

/**
 * Slotted heap page format:
 * ```text
 *  ------------------------------------------------------------------
 *  | HEADER BITMAP | SLOT 0 | SLOT 1 | ... | SLOT N-1 | ZERO PADDING |
 *  ------------------------------------------------------------------
 * ```
 *
 * With page size P and tuple width T, the page holds
 * `N = floor(P * 8 / (T * 8 + 1))` fixed-width slots; the extra bit per slot
 * is the used/unused flag. The header is `ceil(N / 8)` bytes and bit `i` of
 * byte `i / 8` (LSB first) marks slot `i` as used. Unused slots still occupy
 * `T` bytes and serialize as zeros.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct HeapPage {
    pub pid: HeapPageId,
    pub desc: TupleDescRef,
    pub(crate) header: Vec<u8>,
    pub(crate) slots: Vec<Option<Tuple>>,
    page_size: usize,
}

impl HeapPage {
    /// Number of tuple slots a page of `page_size` bytes holds for `desc`.
    pub fn num_slots_for(page_size: usize, desc: &crate::catalog::TupleDesc) -> usize {
        (page_size * 8) / (desc.size() * 8 + 1)
    }

    /// Header bytes needed for `num_slots` slot bits.
    pub fn header_size_for(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Build an empty page (all slots unused).
    pub fn empty(pid: HeapPageId, desc: TupleDescRef, page_size: usize) -> Self {
        let num_slots = Self::num_slots_for(page_size, &desc);
        Self {
            pid,
            desc,
            header: vec![0u8; Self::header_size_for(num_slots)],
            slots: vec![None; num_slots],
            page_size,
        }
    }

    pub(crate) fn from_parts(
        pid: HeapPageId,
        desc: TupleDescRef,
        header: Vec<u8>,
        slots: Vec<Option<Tuple>>,
        page_size: usize,
    ) -> Self {
        Self {
            pid,
            desc,
            header,
            slots,
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn num_unused_slots(&self) -> usize {
        (0..self.num_slots())
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        let byte = slot / 8;
        let bit = slot % 8;
        (self.header[byte] & (1 << bit)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        let byte = slot / 8;
        let bit = slot % 8;
        if used {
            self.header[byte] |= 1 << bit;
        } else {
            self.header[byte] &= !(1 << bit);
        }
    }

    /// Store `tuple` in the lowest-index free slot and stamp its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> VellumResult<()> {
        if *tuple.desc != *self.desc {
            return Err(VellumError::Storage(
                "tuple descriptor does not match the page".to_string(),
            ));
        }
        for slot in 0..self.num_slots() {
            if !self.is_slot_used(slot) {
                let record_id = RecordId::new(PageId::Heap(self.pid), slot as u32);
                tuple.record_id = Some(record_id);
                let mut stored = tuple.clone();
                stored.record_id = Some(record_id);
                self.slots[slot] = Some(stored);
                self.mark_slot_used(slot, true);
                return Ok(());
            }
        }
        Err(VellumError::Storage(
            "the page is full (no empty slots)".to_string(),
        ))
    }

    /// Clear the slot holding `tuple`. The record bytes are untouched; they
    /// serialize as zeros once the bit is clear.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> VellumResult<()> {
        let record_id = tuple
            .record_id
            .ok_or_else(|| VellumError::Storage("tuple has no record id".to_string()))?;
        if record_id.page_id != PageId::Heap(self.pid) {
            return Err(VellumError::Storage(
                "this tuple is not on this page".to_string(),
            ));
        }
        let slot = record_id.slot as usize;
        if slot >= self.num_slots() || !self.is_slot_used(slot) {
            return Err(VellumError::Storage(
                "tuple slot is already empty".to_string(),
            ));
        }
        self.mark_slot_used(slot, false);
        self.slots[slot] = None;
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(|slot| slot.as_ref())
    }

    /// Tuples from used slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, TupleDesc};
    use std::sync::Arc;

    fn two_int_desc() -> TupleDescRef {
        Arc::new(TupleDesc::new(vec![
            Column::new("a", DataType::Int),
            Column::new("b", DataType::Int),
        ]))
    }

    #[test]
    fn slot_math_matches_the_layout() {
        let desc = two_int_desc();
        // 4096 * 8 / (8 * 8 + 1) = 504 slots, 63 header bytes.
        assert_eq!(HeapPage::num_slots_for(4096, &desc), 504);
        assert_eq!(HeapPage::header_size_for(504), 63);
    }

    #[test]
    fn insert_uses_lowest_free_slot() {
        let desc = two_int_desc();
        let mut page = HeapPage::empty(HeapPageId::new(1, 0), desc.clone(), 4096);

        let mut t0 = Tuple::new(desc.clone(), vec![0.into(), 0.into()]);
        let mut t1 = Tuple::new(desc.clone(), vec![1.into(), 10.into()]);
        page.insert_tuple(&mut t0).unwrap();
        page.insert_tuple(&mut t1).unwrap();
        assert_eq!(t0.record_id.unwrap().slot, 0);
        assert_eq!(t1.record_id.unwrap().slot, 1);

        page.delete_tuple(&t0).unwrap();
        let mut t2 = Tuple::new(desc, vec![2.into(), 20.into()]);
        page.insert_tuple(&mut t2).unwrap();
        assert_eq!(t2.record_id.unwrap().slot, 0);
    }

    #[test]
    fn fill_then_overflow() {
        let desc = two_int_desc();
        let mut page = HeapPage::empty(HeapPageId::new(1, 0), desc.clone(), 4096);
        for i in 0..504 {
            let mut t = Tuple::new(desc.clone(), vec![i.into(), (i * 10).into()]);
            page.insert_tuple(&mut t).unwrap();
        }
        assert_eq!(page.num_unused_slots(), 0);

        let mut extra = Tuple::new(desc, vec![504.into(), 5040.into()]);
        let err = page.insert_tuple(&mut extra).unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn delete_from_wrong_page_or_empty_slot_fails() {
        let desc = two_int_desc();
        let mut page = HeapPage::empty(HeapPageId::new(1, 0), desc.clone(), 4096);
        let mut t = Tuple::new(desc.clone(), vec![1.into(), 2.into()]);
        page.insert_tuple(&mut t).unwrap();

        let mut other = HeapPage::empty(HeapPageId::new(1, 1), desc, 4096);
        assert!(other.delete_tuple(&t).is_err());

        page.delete_tuple(&t).unwrap();
        assert!(page.delete_tuple(&t).is_err());
    }

    #[test]
    fn iterator_skips_empty_slots() {
        let desc = two_int_desc();
        let mut page = HeapPage::empty(HeapPageId::new(1, 0), desc.clone(), 4096);
        let mut t0 = Tuple::new(desc.clone(), vec![0.into(), 0.into()]);
        let mut t1 = Tuple::new(desc.clone(), vec![1.into(), 1.into()]);
        let mut t2 = Tuple::new(desc, vec![2.into(), 2.into()]);
        page.insert_tuple(&mut t0).unwrap();
        page.insert_tuple(&mut t1).unwrap();
        page.insert_tuple(&mut t2).unwrap();
        page.delete_tuple(&t1).unwrap();

        let seen: Vec<i32> = page
            .iter()
            .map(|t| match t.fields[0] {
                crate::storage::tuple::Field::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seen, vec![0, 2]);
    }
}
