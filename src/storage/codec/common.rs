use crate::error::{VellumError, VellumResult};
use crate::storage::codec::DecodedData;

/// Big-endian fixed-width scalar codec. Every on-disk structure is built out
/// of these primitives.
pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_u8(data: u8) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u8(bytes: &[u8]) -> VellumResult<DecodedData<u8>> {
        if bytes.is_empty() {
            return Err(VellumError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                1
            )));
        }
        Ok((bytes[0], 1))
    }

    pub fn encode_u16(data: u16) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u16(bytes: &[u8]) -> VellumResult<DecodedData<u16>> {
        if bytes.len() < 2 {
            return Err(VellumError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                2
            )));
        }
        Ok((u16::from_be_bytes([bytes[0], bytes[1]]), 2))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> VellumResult<DecodedData<u32>> {
        if bytes.len() < 4 {
            return Err(VellumError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                4
            )));
        }
        Ok((
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }

    pub fn encode_u64(data: u64) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u64(bytes: &[u8]) -> VellumResult<DecodedData<u64>> {
        if bytes.len() < 8 {
            return Err(VellumError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                8
            )));
        }
        let data = [
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ];
        Ok((u64::from_be_bytes(data), 8))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> VellumResult<DecodedData<i32>> {
        if bytes.len() < 4 {
            return Err(VellumError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                4
            )));
        }
        Ok((
            i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips() {
        assert_eq!(
            5u8,
            CommonCodec::decode_u8(&CommonCodec::encode_u8(5u8)).unwrap().0
        );
        assert_eq!(
            5u16,
            CommonCodec::decode_u16(&CommonCodec::encode_u16(5u16))
                .unwrap()
                .0
        );
        assert_eq!(
            5u32,
            CommonCodec::decode_u32(&CommonCodec::encode_u32(5u32))
                .unwrap()
                .0
        );
        assert_eq!(
            5u64,
            CommonCodec::decode_u64(&CommonCodec::encode_u64(5u64))
                .unwrap()
                .0
        );
        assert_eq!(
            -5i32,
            CommonCodec::decode_i32(&CommonCodec::encode_i32(-5i32))
                .unwrap()
                .0
        );
    }

    #[test]
    fn int_encoding_is_big_endian() {
        assert_eq!(CommonCodec::encode_i32(1), vec![0, 0, 0, 1]);
        assert_eq!(CommonCodec::encode_i32(-1), vec![0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn short_input_is_an_error() {
        assert!(CommonCodec::decode_u32(&[1, 2]).is_err());
        assert!(CommonCodec::decode_u8(&[]).is_err());
    }
}
