//! PiPL（Plug-in Property List）资源编解码
//!
//! 资源布局（小端）：
//! ```text
//! 头部: int16 signature(=1), int32 version(=0), int32 count
//! 记录: uint32 vendorId, uint32 key, int32 subId, int32 dataLength,
//!       dataLength 字节数据, 补零到4字节对齐
//! ```

use crate::datatypes::{read_i16, read_i32, remaining, write_i16, write_i32};
use crate::property::{PropertyKey, PropertyRecord, FILTER_KIND, PROPERTY_HEADER_SIZE};
use crate::utils::PiplError;
use std::fmt;
use std::io::Cursor;
use tracing::debug;

pub const RESOURCE_SIGNATURE: i16 = 1;
pub const RESOURCE_VERSION: i32 = 0;
pub const RESOURCE_HEADER_SIZE: usize = 10;

/// 资源被跳过的原因（不是错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 签名不是 1
    Signature(i16),
    /// 版本不是 0
    Version(i32),
    /// 没有任何属性
    NoProperties(i32),
    /// kind 属性不是滤镜
    NotFilter(u32),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Signature(value) => write!(f, "signature {} is not a PiPL signature", value),
            SkipReason::Version(value) => write!(f, "unsupported PiPL version {}", value),
            SkipReason::NoProperties(count) => write!(f, "property count {}", count),
            SkipReason::NotFilter(kind) => {
                write!(f, "plug-in kind {} is not a filter", PropertyKey(*kind).fourcc())
            }
        }
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// 滤镜资源的属性列表（按资源中的顺序）
    Properties(Vec<PropertyRecord>),
    /// 不是本格式或不是滤镜，静默排除
    Skipped(SkipReason),
}

impl DecodeOutcome {
    pub fn into_properties(self) -> Option<Vec<PropertyRecord>> {
        match self {
            DecodeOutcome::Properties(properties) => Some(properties),
            DecodeOutcome::Skipped(_) => None,
        }
    }
}

/// 解析 PiPL 资源字节
pub fn decode_pipl(data: &[u8]) -> Result<DecodeOutcome, PiplError> {
    let mut cursor = Cursor::new(data);

    if remaining(&cursor) < RESOURCE_HEADER_SIZE as u64 {
        return Err(PiplError::malformed(0, "insufficient data for PiPL header"));
    }

    let signature = read_i16(&mut cursor)?;
    if signature != RESOURCE_SIGNATURE {
        return Ok(DecodeOutcome::Skipped(SkipReason::Signature(signature)));
    }

    let version = read_i32(&mut cursor)?;
    if version != RESOURCE_VERSION {
        return Ok(DecodeOutcome::Skipped(SkipReason::Version(version)));
    }

    let count = read_i32(&mut cursor)?;
    if count <= 0 {
        return Ok(DecodeOutcome::Skipped(SkipReason::NoProperties(count)));
    }

    // 每条记录至少16字节
    if count as u64 * PROPERTY_HEADER_SIZE as u64 > remaining(&cursor) {
        return Err(PiplError::malformed(
            cursor.position(),
            format!("{} properties cannot fit in {} bytes", count, remaining(&cursor)),
        ));
    }

    let mut properties = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = cursor.position();
        let property = PropertyRecord::parse(&mut cursor)?;

        if property.key == PropertyKey::KIND {
            let kind = property
                .data_as_u32()
                .ok_or_else(|| PiplError::malformed(offset, "kind property shorter than 4 bytes"))?;

            if kind != FILTER_KIND {
                debug!(kind = %PropertyKey(kind).fourcc(), "skipping non-filter PiPL");
                return Ok(DecodeOutcome::Skipped(SkipReason::NotFilter(kind)));
            }
        }

        properties.push(property);
    }

    Ok(DecodeOutcome::Properties(properties))
}

/// 编码后的资源大小 = 10 + 各记录总长度
pub fn encoded_size(properties: &[PropertyRecord]) -> usize {
    RESOURCE_HEADER_SIZE + properties.iter().map(PropertyRecord::total_length).sum::<usize>()
}

/// 将属性列表序列化为完整的 PiPL 资源
pub fn encode_pipl(properties: &[PropertyRecord]) -> Result<Vec<u8>, PiplError> {
    let mut output = Vec::with_capacity(encoded_size(properties));

    write_i16(&mut output, RESOURCE_SIGNATURE)?;
    write_i32(&mut output, RESOURCE_VERSION)?;
    write_i32(&mut output, properties.len() as i32)?;

    for property in properties {
        property.write(&mut output)?;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::VENDOR_PHOTOSHOP;

    fn filter_properties() -> Vec<PropertyRecord> {
        vec![
            PropertyRecord::new(PropertyKey::KIND, b"MFB8"),
            PropertyRecord::new(PropertyKey::NAME, b"\x0aGauss Blur"),
            PropertyRecord::new(PropertyKey::CATEGORY, b"\x04Blur"),
            PropertyRecord {
                vendor_id: VENDOR_PHOTOSHOP,
                key: PropertyKey::HAS_TERMINOLOGY,
                sub_id: 7,
                data: Vec::new(),
            },
        ]
    }

    #[test]
    fn test_roundtrip_is_byte_exact() {
        let encoded = encode_pipl(&filter_properties()).unwrap();
        assert_eq!(encoded.len(), encoded_size(&filter_properties()));

        let decoded = decode_pipl(&encoded).unwrap().into_properties().unwrap();
        assert_eq!(decoded, filter_properties());
        assert_eq!(encode_pipl(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_unpadded_source_keeps_stored_length() {
        // 数据长度5，填充3，dataLength 字段不含填充
        let mut bytes = vec![1, 0, 0, 0, 0, 0, 1, 0, 0, 0];
        bytes.extend_from_slice(&VENDOR_PHOTOSHOP.to_le_bytes());
        bytes.extend_from_slice(&PropertyKey::NAME.0.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&5i32.to_le_bytes());
        bytes.extend_from_slice(b"\x04Blur\x00\x00\x00");

        let decoded = decode_pipl(&bytes).unwrap().into_properties().unwrap();
        assert_eq!(decoded[0].data_length(), 5);
        assert_eq!(encode_pipl(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_signature_and_version_mismatch_skipped() {
        let mut encoded = encode_pipl(&filter_properties()).unwrap();
        encoded[0] = 2;
        assert_eq!(
            decode_pipl(&encoded).unwrap(),
            DecodeOutcome::Skipped(SkipReason::Signature(2))
        );

        let mut encoded = encode_pipl(&filter_properties()).unwrap();
        encoded[2] = 1;
        assert_eq!(
            decode_pipl(&encoded).unwrap(),
            DecodeOutcome::Skipped(SkipReason::Version(1))
        );
    }

    #[test]
    fn test_non_filter_kind_skipped() {
        let mut properties = filter_properties();
        properties[0] = PropertyRecord::new(PropertyKey::KIND, b"KFB8"); // '8BFK'

        let encoded = encode_pipl(&properties).unwrap();
        assert_eq!(
            decode_pipl(&encoded).unwrap(),
            DecodeOutcome::Skipped(SkipReason::NotFilter(0x3842464b))
        );
    }

    #[test]
    fn test_empty_property_list_skipped() {
        let encoded = encode_pipl(&[]).unwrap();
        assert_eq!(encoded.len(), RESOURCE_HEADER_SIZE);
        assert_eq!(
            decode_pipl(&encoded).unwrap(),
            DecodeOutcome::Skipped(SkipReason::NoProperties(0))
        );
    }

    #[test]
    fn test_truncated_resource_is_malformed() {
        let encoded = encode_pipl(&filter_properties()).unwrap();

        assert!(matches!(decode_pipl(&encoded[..6]), Err(PiplError::Malformed { .. })));
        assert!(matches!(
            decode_pipl(&encoded[..encoded.len() - 20]),
            Err(PiplError::Malformed { .. })
        ));
    }

    #[test]
    fn test_count_larger_than_buffer_is_malformed() {
        let mut encoded = encode_pipl(&filter_properties()).unwrap();
        encoded[6..10].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(decode_pipl(&encoded), Err(PiplError::Malformed { offset: 10, .. })));
    }

    #[test]
    fn test_short_kind_payload_is_malformed() {
        let mut properties = filter_properties();
        properties[0].data = vec![b'M', b'F'];

        let encoded = encode_pipl(&properties).unwrap();
        assert!(matches!(decode_pipl(&encoded), Err(PiplError::Malformed { offset: 10, .. })));
    }
}
