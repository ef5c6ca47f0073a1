//! Binary wire form of [`Value`], used across the native module boundary.
//!
//! Each value is a tag byte followed by a length-prefixed payload. Numeric
//! values travel as rank-prefixed tensors (rank 0 for scalars), matching the
//! native marshalling ABI. All integers in the framing are little-endian.

use crate::value::{scalar_from_bytes, CodecError, Dtype, EnumValue, Tensor, Value};

const TAG_NULL: u8 = 0;
const TAG_STRING: u8 = 13;
const TAG_LIST: u8 = 14;
const TAG_DICT: u8 = 15;
const TAG_IMAGE: u8 = 16;
const TAG_BINARY: u8 = 17;
const TAG_FILE: u8 = 18;
const TAG_ENUM: u8 = 19;

fn dtype_tag(dtype: Dtype) -> u8 {
    match dtype {
        Dtype::Null => TAG_NULL,
        Dtype::Float16 => 1,
        Dtype::Float32 => 2,
        Dtype::Float64 => 3,
        Dtype::Int8 => 4,
        Dtype::Int16 => 5,
        Dtype::Int32 => 6,
        Dtype::Int64 => 7,
        Dtype::Uint8 => 8,
        Dtype::Uint16 => 9,
        Dtype::Uint32 => 10,
        Dtype::Uint64 => 11,
        Dtype::Bool => 12,
        Dtype::String => TAG_STRING,
        Dtype::List => TAG_LIST,
        Dtype::Dict => TAG_DICT,
        Dtype::Image => TAG_IMAGE,
        Dtype::Binary => TAG_BINARY,
    }
}

fn tag_dtype(tag: u8) -> Option<Dtype> {
    Some(match tag {
        1 => Dtype::Float16,
        2 => Dtype::Float32,
        3 => Dtype::Float64,
        4 => Dtype::Int8,
        5 => Dtype::Int16,
        6 => Dtype::Int32,
        7 => Dtype::Int64,
        8 => Dtype::Uint8,
        9 => Dtype::Uint16,
        10 => Dtype::Uint32,
        11 => Dtype::Uint64,
        12 => Dtype::Bool,
        _ => return None,
    })
}

/// Encode a single value into its wire form.
pub fn encode(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(v) => put_tensor(out, Dtype::Bool, &[], &[*v as u8]),
        Value::Int8(v) => put_tensor(out, Dtype::Int8, &[], &v.to_le_bytes()),
        Value::Int16(v) => put_tensor(out, Dtype::Int16, &[], &v.to_le_bytes()),
        Value::Int32(v) => put_tensor(out, Dtype::Int32, &[], &v.to_le_bytes()),
        Value::Int64(v) => put_tensor(out, Dtype::Int64, &[], &v.to_le_bytes()),
        Value::UInt8(v) => put_tensor(out, Dtype::Uint8, &[], &v.to_le_bytes()),
        Value::UInt16(v) => put_tensor(out, Dtype::Uint16, &[], &v.to_le_bytes()),
        Value::UInt32(v) => put_tensor(out, Dtype::Uint32, &[], &v.to_le_bytes()),
        Value::UInt64(v) => put_tensor(out, Dtype::Uint64, &[], &v.to_le_bytes()),
        Value::Float32(v) => put_tensor(out, Dtype::Float32, &[], &v.to_le_bytes()),
        Value::Float64(v) => put_tensor(out, Dtype::Float64, &[], &v.to_le_bytes()),
        Value::Tensor(t) => put_tensor(out, t.dtype(), t.shape(), t.data()),
        Value::String(s) => {
            out.push(TAG_STRING);
            put_bytes(out, s.as_bytes());
        }
        Value::Binary { data, mime } => {
            out.push(TAG_BINARY);
            put_opt_str(out, mime.as_deref());
            put_bytes(out, data);
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            put_u32(out, items.len() as u32);
            for item in items {
                encode(item, out);
            }
        }
        Value::Record(fields) => {
            out.push(TAG_DICT);
            put_u32(out, fields.len() as u32);
            for (name, value) in fields {
                put_bytes(out, name.as_bytes());
                encode(value, out);
            }
        }
        Value::File { path, mime } => {
            out.push(TAG_FILE);
            put_opt_str(out, mime.as_deref());
            put_bytes(out, path.to_string_lossy().as_bytes());
        }
        Value::Enum { name, value } => {
            out.push(TAG_ENUM);
            put_bytes(out, name.as_bytes());
            match value {
                EnumValue::Str(s) => {
                    out.push(0);
                    put_bytes(out, s.as_bytes());
                }
                EnumValue::Int(v) => {
                    out.push(1);
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
    }
}

/// Encode an ordered name/value map, as passed across the native boundary.
pub fn encode_map(entries: &[(String, Value)]) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, entries.len() as u32);
    for (name, value) in entries {
        put_bytes(&mut out, name.as_bytes());
        encode(value, &mut out);
    }
    out
}

/// Decode a single value from its wire form.
pub fn decode(buf: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader::new(buf);
    let value = decode_one(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

/// Decode an ordered name/value map.
pub fn decode_map(buf: &[u8]) -> Result<Vec<(String, Value)>, CodecError> {
    let mut reader = Reader::new(buf);
    let count = reader.u32()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.string()?;
        let value = decode_one(&mut reader)?;
        entries.push((name, value));
    }
    reader.finish()?;
    Ok(entries)
}

fn decode_one(reader: &mut Reader<'_>) -> Result<Value, CodecError> {
    let tag = reader.u8()?;
    if tag == TAG_NULL {
        return Ok(Value::Null);
    }
    if let Some(dtype) = tag_dtype(tag) {
        let rank = reader.u32()? as usize;
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(reader.u32()? as usize);
        }
        let data = reader.bytes()?.to_vec();
        return if rank == 0 {
            scalar_from_bytes(dtype, &data)
        } else {
            Tensor::new(dtype, shape, data).map(Value::Tensor)
        };
    }
    match tag {
        TAG_STRING => Ok(Value::String(reader.string()?)),
        TAG_BINARY => {
            let mime = reader.opt_string()?;
            let data = reader.bytes()?.to_vec();
            Ok(Value::Binary { data, mime })
        }
        // Images cross the boundary as uint8 pixel tensors.
        TAG_IMAGE => {
            let rank = reader.u32()? as usize;
            let mut shape = Vec::with_capacity(rank);
            for _ in 0..rank {
                shape.push(reader.u32()? as usize);
            }
            let data = reader.bytes()?.to_vec();
            Tensor::new(Dtype::Uint8, shape, data).map(Value::Tensor)
        }
        TAG_LIST => {
            let count = reader.u32()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_one(reader)?);
            }
            Ok(Value::List(items))
        }
        TAG_DICT => {
            let count = reader.u32()?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = reader.string()?;
                fields.push((name, decode_one(reader)?));
            }
            Ok(Value::Record(fields))
        }
        TAG_FILE => {
            let mime = reader.opt_string()?;
            let path = reader.string()?;
            Ok(Value::File {
                path: path.into(),
                mime,
            })
        }
        TAG_ENUM => {
            let name = reader.string()?;
            let value = match reader.u8()? {
                0 => EnumValue::Str(reader.string()?),
                1 => EnumValue::Int(i64::from_le_bytes(
                    reader
                        .take(8)?
                        .try_into()
                        .map_err(|_| CodecError::Decode("short enum payload".into()))?,
                )),
                other => {
                    return Err(CodecError::Decode(format!(
                        "unknown enum value kind: {other}"
                    )))
                }
            };
            Ok(Value::Enum { name, value })
        }
        other => Err(CodecError::Decode(format!("unknown value tag: {other}"))),
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn put_opt_str(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            out.push(1);
            put_bytes(out, s.as_bytes());
        }
        None => out.push(0),
    }
}

fn put_tensor(out: &mut Vec<u8>, dtype: Dtype, shape: &[usize], data: &[u8]) {
    out.push(dtype_tag(dtype));
    put_u32(out, shape.len() as u32);
    for dim in shape {
        put_u32(out, *dim as u32);
    }
    put_bytes(out, data);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CodecError::Decode("unexpected end of payload".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CodecError::Decode("unexpected end of payload".into()))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::Decode("invalid utf-8 in payload".into()))
    }

    fn opt_string(&mut self) -> Result<Option<String>, CodecError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.string()?)),
            other => Err(CodecError::Decode(format!(
                "invalid option marker: {other}"
            ))),
        }
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(CodecError::Decode(format!(
                "{} trailing bytes after value",
                self.buf.len() - self.pos
            )))
        }
    }
}
