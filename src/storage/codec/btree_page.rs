use crate::catalog::{DataType, TupleDescRef};
use crate::error::{VellumError, VellumResult};
use crate::storage::codec::{CommonCodec, DecodedData, TupleCodec};
use crate::storage::page::{
    BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePageCategory, BTreePageId,
    BTreeRootPtrPage, ROOT_PTR_PAGE_SIZE,
};
use crate::storage::tuple::Field;

fn encode_key(key: &Field, key_type: DataType) -> VellumResult<Vec<u8>> {
    match (key_type, key) {
        (DataType::Int, Field::Int(v)) => Ok(CommonCodec::encode_i32(*v)),
        (DataType::Varchar(max_len), Field::Varchar(v)) => {
            let mut payload = v.as_bytes().to_vec();
            if payload.len() > max_len {
                return Err(VellumError::Storage(format!(
                    "key length {} exceeds column maximum {}",
                    payload.len(),
                    max_len
                )));
            }
            let mut bytes = CommonCodec::encode_u32(payload.len() as u32);
            payload.resize(max_len, 0);
            bytes.extend(payload);
            Ok(bytes)
        }
        (expected, actual) => Err(VellumError::Storage(format!(
            "key {:?} does not match key type {}",
            actual, expected
        ))),
    }
}

fn decode_key(bytes: &[u8], key_type: DataType) -> VellumResult<DecodedData<Field>> {
    match key_type {
        DataType::Int => {
            let (value, offset) = CommonCodec::decode_i32(bytes)?;
            Ok((Field::Int(value), offset))
        }
        DataType::Varchar(max_len) => {
            let (len, offset) = CommonCodec::decode_u32(bytes)?;
            let len = len as usize;
            if len > max_len || bytes.len() < offset + max_len {
                return Err(VellumError::Storage(
                    "malformed string key".to_string(),
                ));
            }
            let value = String::from_utf8(bytes[offset..offset + len].to_vec())
                .map_err(|e| VellumError::Storage(format!("invalid utf-8 in key: {}", e)))?;
            Ok((Field::Varchar(value), offset + max_len))
        }
    }
}

/// Root-pointer page: root page number (0 = none), root category byte, first
/// header page number (0 = none).
pub struct BTreeRootPtrPageCodec;

impl BTreeRootPtrPageCodec {
    pub fn encode(page: &BTreeRootPtrPage) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ROOT_PTR_PAGE_SIZE);
        match page.root() {
            Some(root) => {
                bytes.extend(CommonCodec::encode_u32(root.page_no));
                bytes.extend(CommonCodec::encode_u8(root.category.to_code()));
            }
            None => {
                bytes.extend(CommonCodec::encode_u32(0));
                bytes.extend(CommonCodec::encode_u8(0));
            }
        }
        bytes.extend(CommonCodec::encode_u32(
            page.header().map(|h| h.page_no).unwrap_or(0),
        ));
        bytes
    }

    pub fn decode(pid: BTreePageId, bytes: &[u8]) -> VellumResult<DecodedData<BTreeRootPtrPage>> {
        if bytes.len() < ROOT_PTR_PAGE_SIZE {
            return Err(VellumError::Storage(format!(
                "root pointer page is {} bytes instead of {}",
                bytes.len(),
                ROOT_PTR_PAGE_SIZE
            )));
        }
        let (root_no, offset) = CommonCodec::decode_u32(bytes)?;
        let mut left_bytes = &bytes[offset..];
        let (category_code, offset) = CommonCodec::decode_u8(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (header_no, _) = CommonCodec::decode_u32(left_bytes)?;

        let root = if root_no == 0 {
            None
        } else {
            let category = BTreePageCategory::from_code(category_code)?;
            if !matches!(
                category,
                BTreePageCategory::Leaf | BTreePageCategory::Internal
            ) {
                return Err(VellumError::Storage(format!(
                    "root page {} has category {}",
                    root_no, category
                )));
            }
            Some(BTreePageId::new(pid.table_id, root_no, category))
        };
        let header = (header_no != 0).then(|| {
            BTreePageId::new(pid.table_id, header_no, BTreePageCategory::Header)
        });
        Ok((
            BTreeRootPtrPage::from_parts(pid, root, header),
            ROOT_PTR_PAGE_SIZE,
        ))
    }
}

/// Leaf page: parent, left and right sibling pointers, slot bitmap, then
/// fixed-width tuple records and zero padding.
pub struct BTreeLeafPageCodec;

impl BTreeLeafPageCodec {
    pub fn encode(page: &BTreeLeafPage, page_size: usize) -> VellumResult<Vec<u8>> {
        let (parent_no, left_no, right_no, max_tuples, tuples) = page.parts();
        let mut bytes = Vec::with_capacity(page_size);
        bytes.extend(CommonCodec::encode_u32(parent_no));
        bytes.extend(CommonCodec::encode_u32(left_no));
        bytes.extend(CommonCodec::encode_u32(right_no));

        let mut bitmap = vec![0u8; max_tuples.div_ceil(8)];
        for slot in 0..tuples.len() {
            bitmap[slot / 8] |= 1 << (slot % 8);
        }
        bytes.extend(bitmap);
        for tuple in tuples {
            bytes.extend(TupleCodec::encode(tuple)?);
        }
        bytes.resize(page_size, 0);
        Ok(bytes)
    }

    pub fn decode(
        pid: BTreePageId,
        bytes: &[u8],
        desc: TupleDescRef,
        key_field: usize,
        page_size: usize,
    ) -> VellumResult<DecodedData<BTreeLeafPage>> {
        if bytes.len() != page_size {
            return Err(VellumError::Storage(format!(
                "leaf page size is {} instead of {}",
                bytes.len(),
                page_size
            )));
        }
        let max_tuples = BTreeLeafPage::max_tuples_for(page_size, &desc);
        let record_size = desc.size();

        let (parent_no, _) = CommonCodec::decode_u32(bytes)?;
        let (left_no, _) = CommonCodec::decode_u32(&bytes[4..])?;
        let (right_no, _) = CommonCodec::decode_u32(&bytes[8..])?;
        let bitmap_size = max_tuples.div_ceil(8);
        let bitmap = &bytes[12..12 + bitmap_size];

        let mut tuples = Vec::new();
        let mut offset = 12 + bitmap_size;
        for slot in 0..max_tuples {
            let used = (bitmap[slot / 8] & (1 << (slot % 8))) != 0;
            if used {
                let (tuple, _) =
                    TupleCodec::decode(&bytes[offset..offset + record_size], desc.clone())?;
                tuples.push(tuple);
            }
            offset += record_size;
        }

        Ok((
            BTreeLeafPage::from_parts(
                pid, desc, key_field, parent_no, left_no, right_no, max_tuples, tuples,
            ),
            page_size,
        ))
    }
}

/// Internal page: parent pointer, child-category byte, slot bitmap, the
/// leading child pointer, then `(key, child)` slots and zero padding.
pub struct BTreeInternalPageCodec;

impl BTreeInternalPageCodec {
    pub fn encode(page: &BTreeInternalPage, page_size: usize) -> VellumResult<Vec<u8>> {
        let (parent_no, child_category, max_entries, keys, children) = page.parts();
        let mut bytes = Vec::with_capacity(page_size);
        bytes.extend(CommonCodec::encode_u32(parent_no));
        bytes.extend(CommonCodec::encode_u8(
            child_category.map(|c| c.to_code()).unwrap_or(0),
        ));

        let mut bitmap = vec![0u8; max_entries.div_ceil(8)];
        for slot in 0..keys.len() {
            bitmap[slot / 8] |= 1 << (slot % 8);
        }
        bytes.extend(bitmap);
        bytes.extend(CommonCodec::encode_u32(
            children.first().copied().unwrap_or(0),
        ));
        for (key, child) in keys.iter().zip(children.iter().skip(1)) {
            bytes.extend(encode_key(key, page.key_type)?);
            bytes.extend(CommonCodec::encode_u32(*child));
        }
        bytes.resize(page_size, 0);
        Ok(bytes)
    }

    pub fn decode(
        pid: BTreePageId,
        bytes: &[u8],
        key_type: DataType,
        page_size: usize,
    ) -> VellumResult<DecodedData<BTreeInternalPage>> {
        if bytes.len() != page_size {
            return Err(VellumError::Storage(format!(
                "internal page size is {} instead of {}",
                bytes.len(),
                page_size
            )));
        }
        let max_entries = BTreeInternalPage::max_entries_for(page_size, key_type);
        let entry_size = key_type.len() + 4;

        let (parent_no, _) = CommonCodec::decode_u32(bytes)?;
        let (category_code, _) = CommonCodec::decode_u8(&bytes[4..])?;
        let child_category = if category_code == 0 {
            None
        } else {
            Some(BTreePageCategory::from_code(category_code)?)
        };
        let bitmap_size = max_entries.div_ceil(8);
        let bitmap = &bytes[5..5 + bitmap_size];
        let (child0, _) = CommonCodec::decode_u32(&bytes[5 + bitmap_size..])?;

        let mut keys = Vec::new();
        let mut tail_children = Vec::new();
        let mut offset = 5 + bitmap_size + 4;
        for slot in 0..max_entries {
            let used = (bitmap[slot / 8] & (1 << (slot % 8))) != 0;
            if used {
                let (key, _) = decode_key(&bytes[offset..offset + entry_size], key_type)?;
                let (child, _) = CommonCodec::decode_u32(&bytes[offset + key_type.len()..])?;
                keys.push(key);
                tail_children.push(child);
            }
            offset += entry_size;
        }

        let children = if keys.is_empty() {
            if child0 == 0 {
                Vec::new()
            } else {
                vec![child0]
            }
        } else {
            let mut children = Vec::with_capacity(keys.len() + 1);
            children.push(child0);
            children.extend(tail_children);
            children
        };

        Ok((
            BTreeInternalPage::from_parts(
                pid,
                key_type,
                parent_no,
                child_category,
                max_entries,
                keys,
                children,
            ),
            page_size,
        ))
    }
}

/// Header page: previous and next chain pointers, then the used-page bitmap
/// filling the rest of the page.
pub struct BTreeHeaderPageCodec;

impl BTreeHeaderPageCodec {
    pub fn encode(page: &BTreeHeaderPage, page_size: usize) -> VellumResult<Vec<u8>> {
        let (prev_no, next_no, bitmap) = page.parts();
        if bitmap.len() != page_size - 8 {
            return Err(VellumError::Internal(format!(
                "header bitmap is {} bytes instead of {}",
                bitmap.len(),
                page_size - 8
            )));
        }
        let mut bytes = Vec::with_capacity(page_size);
        bytes.extend(CommonCodec::encode_u32(prev_no));
        bytes.extend(CommonCodec::encode_u32(next_no));
        bytes.extend_from_slice(bitmap);
        Ok(bytes)
    }

    pub fn decode(
        pid: BTreePageId,
        bytes: &[u8],
        page_size: usize,
    ) -> VellumResult<DecodedData<BTreeHeaderPage>> {
        if bytes.len() != page_size {
            return Err(VellumError::Storage(format!(
                "header page size is {} instead of {}",
                bytes.len(),
                page_size
            )));
        }
        let (prev_no, _) = CommonCodec::decode_u32(bytes)?;
        let (next_no, _) = CommonCodec::decode_u32(&bytes[4..])?;
        let bitmap = bytes[8..].to_vec();
        Ok((
            BTreeHeaderPage::from_parts(pid, prev_no, next_no, bitmap),
            page_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, TupleDesc};
    use crate::storage::page::BTreeEntry;
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;

    fn leaf_desc() -> TupleDescRef {
        Arc::new(TupleDesc::new(vec![
            Column::new("k", DataType::Int),
            Column::new("v", DataType::Int),
        ]))
    }

    #[test]
    fn root_ptr_round_trip() {
        let pid = BTreeRootPtrPage::id_for(3);
        let mut page = BTreeRootPtrPage::empty(pid);
        page.set_root(Some(BTreePageId::new(3, 4, BTreePageCategory::Internal)));
        page.set_header(Some(BTreePageId::new(3, 9, BTreePageCategory::Header)));

        let bytes = BTreeRootPtrPageCodec::encode(&page);
        assert_eq!(bytes.len(), ROOT_PTR_PAGE_SIZE);
        let (decoded, _) = BTreeRootPtrPageCodec::decode(pid, &bytes).unwrap();
        assert_eq!(decoded, page);

        // A zero page is a valid empty root pointer.
        let (empty, _) =
            BTreeRootPtrPageCodec::decode(pid, &[0u8; ROOT_PTR_PAGE_SIZE]).unwrap();
        assert_eq!(empty.root(), None);
        assert_eq!(empty.header(), None);
    }

    #[test]
    fn leaf_round_trip() {
        let desc = leaf_desc();
        let pid = BTreePageId::new(3, 2, BTreePageCategory::Leaf);
        let mut page = BTreeLeafPage::empty(pid, desc.clone(), 0, 4096);
        page.set_parent(5);
        page.set_left_sibling(1);
        page.set_right_sibling(4);
        for key in [2, 7, 9] {
            let mut t = Tuple::new(desc.clone(), vec![key.into(), (key * 2).into()]);
            page.insert_tuple(&mut t).unwrap();
        }

        let bytes = BTreeLeafPageCodec::encode(&page, 4096).unwrap();
        assert_eq!(bytes.len(), 4096);
        let (decoded, _) = BTreeLeafPageCodec::decode(pid, &bytes, desc, 0, 4096).unwrap();
        assert_eq!(decoded, page);
        assert_eq!(
            BTreeLeafPageCodec::encode(&decoded, 4096).unwrap(),
            bytes
        );
    }

    #[test]
    fn zeroed_leaf_decodes_empty() {
        let desc = leaf_desc();
        let pid = BTreePageId::new(3, 1, BTreePageCategory::Leaf);
        let (page, _) =
            BTreeLeafPageCodec::decode(pid, &vec![0u8; 4096], desc, 0, 4096).unwrap();
        assert_eq!(page.num_tuples(), 0);
        assert_eq!(page.parent_no(), 0);
        assert_eq!(page.left_sibling_id(), None);
        assert_eq!(page.right_sibling_id(), None);
    }

    #[test]
    fn internal_round_trip() {
        let pid = BTreePageId::new(3, 6, BTreePageCategory::Internal);
        let mut page = BTreeInternalPage::empty(pid, DataType::Int, 4096);
        page.set_parent(8);
        let leaf = |no| BTreePageId::new(3, no, BTreePageCategory::Leaf);
        page.insert_entry(BTreeEntry::new(Field::Int(10), leaf(1), leaf(2)))
            .unwrap();
        page.insert_entry(BTreeEntry::new(Field::Int(20), leaf(2), leaf(3)))
            .unwrap();

        let bytes = BTreeInternalPageCodec::encode(&page, 4096).unwrap();
        let (decoded, _) =
            BTreeInternalPageCodec::decode(pid, &bytes, DataType::Int, 4096).unwrap();
        assert_eq!(decoded, page);

        // Degenerate single-child page (root collapse interim state).
        page.delete_key_and_right_child(1).unwrap();
        page.delete_key_and_right_child(0).unwrap();
        assert_eq!(page.children(), &[1]);
        let bytes = BTreeInternalPageCodec::encode(&page, 4096).unwrap();
        let (decoded, _) =
            BTreeInternalPageCodec::decode(pid, &bytes, DataType::Int, 4096).unwrap();
        assert_eq!(decoded.children(), &[1]);
    }

    #[test]
    fn header_round_trip() {
        let pid = BTreePageId::new(3, 5, BTreePageCategory::Header);
        let mut page = BTreeHeaderPage::empty(pid, 4096);
        page.init();
        page.set_prev(2);
        page.set_next(8);
        page.mark_slot_used(100, false);

        let bytes = BTreeHeaderPageCodec::encode(&page, 4096).unwrap();
        assert_eq!(bytes.len(), 4096);
        let (decoded, _) = BTreeHeaderPageCodec::decode(pid, &bytes, 4096).unwrap();
        assert_eq!(decoded, page);
        assert_eq!(decoded.get_empty_slot(), Some(100));
    }
}
