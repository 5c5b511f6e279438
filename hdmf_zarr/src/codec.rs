//! Chunk payload codecs.
//!
//! Fixed-size elements are stored little-endian in C order. Variable-length
//! strings use the `vlen-utf8`/`vlen-bytes` layout: an LE `u32` item count
//! followed by an LE `u32` byte length and payload per item. Chunk bytes are
//! optionally gzip-compressed.

use std::io::Read;

use flate2::bufread::{GzDecoder, GzEncoder};

use crate::{
    builder::{CompressorSelection, ElementData},
    error::ZarrError,
    metadata::{CodecMetadata, FillValueMetadata},
};

/// The default gzip compression level.
pub const DEFAULT_GZIP_LEVEL: u32 = 4;

/// The `vlen-utf8` filter id.
pub const VLEN_UTF8: &str = "vlen-utf8";
/// The `vlen-bytes` filter id.
pub const VLEN_BYTES: &str = "vlen-bytes";

/// Encode fixed-size elements as little-endian bytes in C order.
///
/// Booleans are stored as one byte each. Strings are not fixed-size and must
/// go through [`encode_vlen`].
#[must_use]
pub fn encode_fixed(data: &ElementData) -> Vec<u8> {
    macro_rules! le_bytes {
        ($v:expr) => {
            $v.iter().flat_map(|x| x.to_le_bytes()).collect()
        };
    }
    match data {
        ElementData::Int8(v) => le_bytes!(v),
        ElementData::Int16(v) => le_bytes!(v),
        ElementData::Int32(v) => le_bytes!(v),
        ElementData::Int64(v) => le_bytes!(v),
        ElementData::UInt8(v) => v.clone(),
        ElementData::UInt16(v) => le_bytes!(v),
        ElementData::UInt32(v) => le_bytes!(v),
        ElementData::UInt64(v) => le_bytes!(v),
        ElementData::Float32(v) => le_bytes!(v),
        ElementData::Float64(v) => le_bytes!(v),
        ElementData::Bool(v) => v.iter().map(|b| u8::from(*b)).collect(),
        ElementData::Str(_) => {
            debug_assert!(false, "variable-length data in fixed-size encode");
            Vec::new()
        }
    }
}

/// Decode little-endian bytes into elements shaped like `kind`.
///
/// # Errors
/// Returns [`ZarrError`] if `bytes` is not a whole number of elements.
pub fn decode_fixed(bytes: &[u8], kind: &ElementData) -> Result<ElementData, ZarrError> {
    macro_rules! from_le {
        ($t:ty, $variant:ident) => {{
            const SIZE: usize = std::mem::size_of::<$t>();
            if bytes.len() % SIZE != 0 {
                return Err(ZarrError::InternalInvariant(format!(
                    "chunk payload of {} bytes is not a whole number of elements",
                    bytes.len()
                )));
            }
            ElementData::$variant(
                bytes
                    .chunks_exact(SIZE)
                    .map(|c| <$t>::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )
        }};
    }
    Ok(match kind {
        ElementData::Int8(_) => from_le!(i8, Int8),
        ElementData::Int16(_) => from_le!(i16, Int16),
        ElementData::Int32(_) => from_le!(i32, Int32),
        ElementData::Int64(_) => from_le!(i64, Int64),
        ElementData::UInt8(_) => ElementData::UInt8(bytes.to_vec()),
        ElementData::UInt16(_) => from_le!(u16, UInt16),
        ElementData::UInt32(_) => from_le!(u32, UInt32),
        ElementData::UInt64(_) => from_le!(u64, UInt64),
        ElementData::Float32(_) => from_le!(f32, Float32),
        ElementData::Float64(_) => from_le!(f64, Float64),
        ElementData::Bool(_) => ElementData::Bool(bytes.iter().map(|b| *b != 0).collect()),
        ElementData::Str(_) => ElementData::Str(decode_vlen(bytes)?),
    })
}

/// Encode variable-length strings with the `vlen-utf8` layout.
#[must_use]
pub fn encode_vlen(strings: &[String]) -> Vec<u8> {
    let payload: usize = strings.iter().map(|s| 4 + s.len()).sum();
    let mut out = Vec::with_capacity(4 + payload);
    out.extend((strings.len() as u32).to_le_bytes());
    for s in strings {
        out.extend((s.len() as u32).to_le_bytes());
        out.extend(s.as_bytes());
    }
    out
}

/// Decode a `vlen-utf8` payload.
///
/// # Errors
/// Returns [`ZarrError`] if the payload is truncated or not UTF-8.
pub fn decode_vlen(bytes: &[u8]) -> Result<Vec<String>, ZarrError> {
    let truncated =
        || ZarrError::InternalInvariant("truncated variable-length chunk payload".to_string());
    let mut offset = 0usize;
    let read_u32 = |offset: &mut usize| -> Result<usize, ZarrError> {
        let end = *offset + 4;
        let value = bytes
            .get(*offset..end)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .ok_or_else(truncated)?;
        *offset = end;
        Ok(value as usize)
    };
    let count = read_u32(&mut offset)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(&mut offset)?;
        let end = offset + len;
        let item = bytes.get(offset..end).ok_or_else(truncated)?;
        out.push(
            std::str::from_utf8(item)
                .map_err(|err| ZarrError::InternalInvariant(err.to_string()))?
                .to_string(),
        );
        offset = end;
    }
    Ok(out)
}

/// Build a full-chunk block from an edge-clipped block.
///
/// `map` comes from [`crate::chunk::chunk_fill_map`]: [`Some`] positions copy
/// from the block, [`None`] positions take the fill value.
#[must_use]
pub(crate) fn pad_block(
    block: &ElementData,
    map: &[Option<usize>],
    fill: &FillValueMetadata,
) -> ElementData {
    macro_rules! pad {
        ($v:expr, $variant:ident, $fill:expr) => {{
            let fill = $fill;
            ElementData::$variant(
                map.iter()
                    .map(|i| i.map_or_else(|| fill.clone(), |i| $v[i].clone()))
                    .collect(),
            )
        }};
    }
    let fill_f64 = match fill {
        FillValueMetadata::NaN => f64::NAN,
        FillValueMetadata::Infinity => f64::INFINITY,
        FillValueMetadata::NegInfinity => f64::NEG_INFINITY,
        FillValueMetadata::Number(n) => n.as_f64().unwrap_or_default(),
        FillValueMetadata::Null | FillValueMetadata::String(_) => 0.0,
    };
    let fill_i64 = match fill {
        FillValueMetadata::Number(n) => n.as_i64().unwrap_or_default(),
        _ => 0,
    };
    let fill_u64 = match fill {
        FillValueMetadata::Number(n) => n.as_u64().unwrap_or_default(),
        _ => 0,
    };
    #[allow(clippy::cast_possible_truncation)]
    match block {
        ElementData::Int8(v) => pad!(v, Int8, fill_i64 as i8),
        ElementData::Int16(v) => pad!(v, Int16, fill_i64 as i16),
        ElementData::Int32(v) => pad!(v, Int32, fill_i64 as i32),
        ElementData::Int64(v) => pad!(v, Int64, fill_i64),
        ElementData::UInt8(v) => pad!(v, UInt8, fill_u64 as u8),
        ElementData::UInt16(v) => pad!(v, UInt16, fill_u64 as u16),
        ElementData::UInt32(v) => pad!(v, UInt32, fill_u64 as u32),
        ElementData::UInt64(v) => pad!(v, UInt64, fill_u64),
        ElementData::Float32(v) => pad!(v, Float32, fill_f64 as f32),
        ElementData::Float64(v) => pad!(v, Float64, fill_f64),
        ElementData::Bool(v) => pad!(v, Bool, fill_i64 != 0),
        ElementData::Str(v) => pad!(
            v,
            Str,
            match fill {
                FillValueMetadata::String(s) => s.clone(),
                _ => String::new(),
            }
        ),
    }
}

/// Extract the edge-clipped block from a full-chunk block.
///
/// The inverse of [`pad_block`]: [`Some`] positions of `map` are copied into
/// the extent-shaped output, padding positions are dropped.
#[must_use]
pub(crate) fn unpad_block(full: &ElementData, map: &[Option<usize>]) -> ElementData {
    let extent_len = map.iter().filter(|i| i.is_some()).count();
    macro_rules! unpad {
        ($v:expr, $variant:ident) => {{
            let mut out = vec![Default::default(); extent_len];
            for (position, i) in map.iter().enumerate() {
                if let Some(i) = i {
                    out[*i] = $v[position].clone();
                }
            }
            ElementData::$variant(out)
        }};
    }
    match full {
        ElementData::Int8(v) => unpad!(v, Int8),
        ElementData::Int16(v) => unpad!(v, Int16),
        ElementData::Int32(v) => unpad!(v, Int32),
        ElementData::Int64(v) => unpad!(v, Int64),
        ElementData::UInt8(v) => unpad!(v, UInt8),
        ElementData::UInt16(v) => unpad!(v, UInt16),
        ElementData::UInt32(v) => unpad!(v, UInt32),
        ElementData::UInt64(v) => unpad!(v, UInt64),
        ElementData::Float32(v) => unpad!(v, Float32),
        ElementData::Float64(v) => unpad!(v, Float64),
        ElementData::Bool(v) => unpad!(v, Bool),
        ElementData::Str(v) => unpad!(v, Str),
    }
}

/// Pack fixed-size compound records little-endian, field by field.
///
/// # Errors
/// Returns [`ZarrError`] if a row value does not fit its field's data type.
pub(crate) fn pack_rows(
    rows: &[Vec<crate::object_codec::WireScalar>],
    fields: &[crate::data_type::CompoundField],
) -> Result<Vec<u8>, ZarrError> {
    use crate::data_type::DataType;
    use crate::object_codec::WireScalar;

    let row_size: usize = fields
        .iter()
        .filter_map(|f| f.data_type.fixed_size())
        .sum();
    let mut out = Vec::with_capacity(rows.len() * row_size);
    let mismatch = |field: &crate::data_type::CompoundField| {
        ZarrError::InternalInvariant(format!(
            "compound field {} does not match its declared data type",
            field.name
        ))
    };
    for row in rows {
        for (value, field) in row.iter().zip(fields) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            match (&field.data_type, value) {
                (DataType::Int8, WireScalar::Int(i)) => out.extend((*i as i8).to_le_bytes()),
                (DataType::Int16, WireScalar::Int(i)) => out.extend((*i as i16).to_le_bytes()),
                (DataType::Int32, WireScalar::Int(i)) => out.extend((*i as i32).to_le_bytes()),
                (DataType::Int64, WireScalar::Int(i)) => out.extend(i.to_le_bytes()),
                (DataType::UInt8, WireScalar::UInt(u)) => out.extend((*u as u8).to_le_bytes()),
                (DataType::UInt16, WireScalar::UInt(u)) => out.extend((*u as u16).to_le_bytes()),
                (DataType::UInt32, WireScalar::UInt(u)) => out.extend((*u as u32).to_le_bytes()),
                (DataType::UInt64, WireScalar::UInt(u)) => out.extend(u.to_le_bytes()),
                (DataType::Float32, WireScalar::Float(f)) => {
                    out.extend((*f as f32).to_le_bytes());
                }
                (DataType::Float64, WireScalar::Float(f)) => out.extend(f.to_le_bytes()),
                (DataType::Bool, WireScalar::Bool(b)) => out.push(u8::from(*b)),
                _ => return Err(mismatch(field)),
            }
        }
    }
    Ok(out)
}

/// Unpack fixed-size compound records.
///
/// # Errors
/// Returns [`ZarrError`] if the payload is not a whole number of records.
pub(crate) fn unpack_rows(
    bytes: &[u8],
    fields: &[crate::data_type::CompoundField],
) -> Result<Vec<Vec<crate::object_codec::WireScalar>>, ZarrError> {
    use crate::data_type::DataType;
    use crate::object_codec::WireScalar;

    let row_size: usize = fields
        .iter()
        .filter_map(|f| f.data_type.fixed_size())
        .sum();
    if row_size == 0 || bytes.len() % row_size != 0 {
        return Err(ZarrError::InternalInvariant(format!(
            "compound payload of {} bytes is not a whole number of records",
            bytes.len()
        )));
    }
    macro_rules! take {
        ($t:ty, $cursor:ident) => {{
            const SIZE: usize = std::mem::size_of::<$t>();
            let value = <$t>::from_le_bytes($cursor[..SIZE].try_into().unwrap());
            $cursor = &$cursor[SIZE..];
            value
        }};
    }
    let mut out = Vec::with_capacity(bytes.len() / row_size);
    let mut cursor = bytes;
    while !cursor.is_empty() {
        let mut row = Vec::with_capacity(fields.len());
        for field in fields {
            row.push(match field.data_type {
                DataType::Int8 => WireScalar::Int(i64::from(take!(i8, cursor))),
                DataType::Int16 => WireScalar::Int(i64::from(take!(i16, cursor))),
                DataType::Int32 => WireScalar::Int(i64::from(take!(i32, cursor))),
                DataType::Int64 => WireScalar::Int(take!(i64, cursor)),
                DataType::UInt8 => WireScalar::UInt(u64::from(take!(u8, cursor))),
                DataType::UInt16 => WireScalar::UInt(u64::from(take!(u16, cursor))),
                DataType::UInt32 => WireScalar::UInt(u64::from(take!(u32, cursor))),
                DataType::UInt64 => WireScalar::UInt(take!(u64, cursor)),
                DataType::Float32 => WireScalar::Float(f64::from(take!(f32, cursor))),
                DataType::Float64 => WireScalar::Float(take!(f64, cursor)),
                DataType::Bool => WireScalar::Bool(take!(u8, cursor) != 0),
                _ => {
                    return Err(ZarrError::InternalInvariant(
                        "variable-length field in packed compound payload".to_string(),
                    ))
                }
            });
        }
        out.push(row);
    }
    Ok(out)
}

/// Compress chunk bytes according to a compressor selection.
///
/// # Errors
/// Returns [`ZarrError`] if compression fails.
pub fn compress(bytes: Vec<u8>, compressor: &Option<CodecMetadata>) -> Result<Vec<u8>, ZarrError> {
    match compressor {
        None => Ok(bytes),
        Some(codec) if codec.id == "gzip" => {
            let level = codec
                .configuration
                .get("level")
                .and_then(serde_json::Value::as_u64)
                .map_or(DEFAULT_GZIP_LEVEL, |l| l as u32);
            let mut encoder = GzEncoder::new(
                std::io::Cursor::new(bytes),
                flate2::Compression::new(level),
            );
            let mut out = Vec::new();
            encoder
                .read_to_end(&mut out)
                .map_err(|err| ZarrError::Storage(err.into()))?;
            Ok(out)
        }
        Some(codec) => Err(ZarrError::Unsupported(format!(
            "compressor {} is not supported",
            codec.id
        ))),
    }
}

/// Decompress chunk bytes according to the array's compressor metadata.
///
/// # Errors
/// Returns [`ZarrError`] if the compressor is unknown or decompression fails.
pub fn decompress(bytes: &[u8], compressor: &Option<CodecMetadata>) -> Result<Vec<u8>, ZarrError> {
    match compressor {
        None => Ok(bytes.to_vec()),
        Some(codec) if codec.id == "gzip" => {
            let mut decoder = GzDecoder::new(std::io::Cursor::new(bytes));
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| ZarrError::Storage(err.into()))?;
            Ok(out)
        }
        Some(codec) => Err(ZarrError::Unsupported(format!(
            "compressor {} is not supported",
            codec.id
        ))),
    }
}

/// The compressor metadata for a compressor selection.
#[must_use]
pub fn compressor_metadata(selection: CompressorSelection) -> Option<CodecMetadata> {
    match selection {
        CompressorSelection::Disabled => None,
        CompressorSelection::Default => Some(gzip_metadata(DEFAULT_GZIP_LEVEL)),
        CompressorSelection::Gzip(level) => Some(gzip_metadata(level)),
    }
}

fn gzip_metadata(level: u32) -> CodecMetadata {
    let mut codec = CodecMetadata::new("gzip");
    codec
        .configuration
        .insert("level".to_string(), level.into());
    codec
}
