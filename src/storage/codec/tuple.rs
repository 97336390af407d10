use crate::catalog::{DataType, TupleDescRef};
use crate::error::{VellumError, VellumResult};
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::tuple::{Field, Tuple};

/// Fixed-width tuple record codec.
///
/// Ints are 4-byte big-endian two's complement. Strings are a 4-byte
/// big-endian length followed by exactly `max_len` payload bytes, NUL padded;
/// values longer than the column maximum are rejected on encode, exactly as
/// they are on decode.
pub struct TupleCodec;

impl TupleCodec {
    pub fn encode(tuple: &Tuple) -> VellumResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(tuple.desc.size());
        for (column, field) in tuple.desc.columns.iter().zip(tuple.fields.iter()) {
            match (column.data_type, field) {
                (DataType::Int, Field::Int(v)) => bytes.extend(CommonCodec::encode_i32(*v)),
                (DataType::Varchar(max_len), Field::Varchar(v)) => {
                    let mut payload = v.as_bytes().to_vec();
                    if payload.len() > max_len {
                        return Err(VellumError::Storage(format!(
                            "string length {} exceeds column maximum {}",
                            payload.len(),
                            max_len
                        )));
                    }
                    bytes.extend(CommonCodec::encode_u32(payload.len() as u32));
                    payload.resize(max_len, 0);
                    bytes.extend(payload);
                }
                (expected, actual) => {
                    return Err(VellumError::Storage(format!(
                        "field {:?} does not match column type {}",
                        actual, expected
                    )))
                }
            }
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8], desc: TupleDescRef) -> VellumResult<DecodedData<Tuple>> {
        let mut left_bytes = bytes;
        let mut fields = Vec::with_capacity(desc.num_fields());
        for column in desc.columns.iter() {
            match column.data_type {
                DataType::Int => {
                    let (value, offset) = CommonCodec::decode_i32(left_bytes)?;
                    left_bytes = &left_bytes[offset..];
                    fields.push(Field::Int(value));
                }
                DataType::Varchar(max_len) => {
                    let (len, offset) = CommonCodec::decode_u32(left_bytes)?;
                    left_bytes = &left_bytes[offset..];
                    let len = len as usize;
                    if len > max_len {
                        return Err(VellumError::Storage(format!(
                            "string length {} exceeds column maximum {}",
                            len, max_len
                        )));
                    }
                    if left_bytes.len() < max_len {
                        return Err(VellumError::Internal(format!(
                            "bytes length {} is less than {}",
                            left_bytes.len(),
                            max_len
                        )));
                    }
                    let value = String::from_utf8(left_bytes[..len].to_vec()).map_err(|e| {
                        VellumError::Storage(format!("invalid utf-8 in string field: {}", e))
                    })?;
                    left_bytes = &left_bytes[max_len..];
                    fields.push(Field::Varchar(value));
                }
            }
        }
        Ok((
            Tuple::new(desc, fields),
            bytes.len() - left_bytes.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, TupleDesc};
    use std::sync::Arc;

    #[test]
    fn tuple_codec_round_trip() {
        let desc = Arc::new(TupleDesc::new(vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::Varchar(8)),
        ]));
        let tuple = Tuple::new(desc.clone(), vec![Field::Int(-42), "bob".into()]);

        let bytes = TupleCodec::encode(&tuple).unwrap();
        assert_eq!(bytes.len(), desc.size());

        let (decoded, consumed) = TupleCodec::decode(&bytes, desc).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn string_is_length_prefixed_and_padded() {
        let desc = Arc::new(TupleDesc::new(vec![Column::new(
            "name",
            DataType::Varchar(6),
        )]));
        let tuple = Tuple::new(desc, vec!["ab".into()]);
        let bytes = TupleCodec::encode(&tuple).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0]);
    }

    #[test]
    fn overlong_string_is_rejected() {
        let desc = Arc::new(TupleDesc::new(vec![Column::new(
            "name",
            DataType::Varchar(3),
        )]));
        let tuple = Tuple::new(desc.clone(), vec!["abcdef".into()]);
        let err = TupleCodec::encode(&tuple).unwrap_err();
        assert!(err.to_string().contains("exceeds column maximum"));

        let exact = Tuple::new(desc, vec!["abc".into()]);
        assert!(TupleCodec::encode(&exact).is_ok());
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let desc = Arc::new(TupleDesc::new(vec![Column::new("id", DataType::Int)]));
        let tuple = Tuple::new(desc, vec!["oops".into()]);
        assert!(TupleCodec::encode(&tuple).is_err());
    }
}
