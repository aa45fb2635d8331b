//! Opaque structured records
//!
//! cryoSPARC `.cs` files are numpy structured arrays. The field order drifts between
//! cryoSPARC versions, so nothing here assumes a layout: a [Schema] is derived from the
//! array dtype, every [Record] keeps its raw row bytes and field values are decoded on
//! demand. Fields that are never overwritten are written back byte-for-byte.

use npyz::{DType, TypeStr, WriterBuilder};
use regex::Regex;
use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read, Write},
    ops::Deref,
    path::Path,
    sync::Arc,
};

use crate::persist;

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("failed to read or write the structured array")]
    Io(#[from] io::Error),
    #[error("expected a structured (record) dtype, found {0}")]
    NotStructured(String),
    #[error("field {name:?} has unsupported type {descr}")]
    UnsupportedField { name: String, descr: String },
    #[error("invalid type string {0:?}")]
    TypeStr(String),
    #[error("invalid type string regex")]
    Regex(#[from] regex::Error),
    #[error("expected a 1-D array of records, found shape {0:?}")]
    Shape(Vec<u64>),
    #[error("field #{index} is out of range, records have {arity} fields")]
    FieldIndex { index: usize, arity: usize },
    #[error("cannot store {value} in field {name:?} ({codec})")]
    Encode {
        name: String,
        codec: String,
        value: String,
    },
    #[error("record has {found} values, the schema has {expected} fields")]
    Arity { expected: usize, found: usize },
    #[error("structured arrays have different field layouts")]
    SchemaMismatch,
    #[error("no structured array to concatenate")]
    Empty,
}
type Result<T> = std::result::Result<T, RecordError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

/// Storage of a single scalar element
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scalar {
    Bool,
    Int { size: usize, endian: Endian },
    UInt { size: usize, endian: Endian },
    Float { size: usize, endian: Endian },
    Bytes(usize),
    Unicode { chars: usize, endian: Endian },
    Raw(usize),
}
impl Scalar {
    fn size(&self) -> usize {
        match self {
            Scalar::Bool => 1,
            Scalar::Int { size, .. } | Scalar::UInt { size, .. } | Scalar::Float { size, .. } => {
                *size
            }
            Scalar::Bytes(size) | Scalar::Raw(size) => *size,
            Scalar::Unicode { chars, .. } => 4 * chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Codec {
    Scalar(Scalar),
    Array { len: usize, item: Box<Codec> },
}
impl Codec {
    fn size(&self) -> usize {
        match self {
            Codec::Scalar(scalar) => scalar.size(),
            Codec::Array { len, item } => len * item.size(),
        }
    }
}
impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Scalar(scalar) => write!(f, "{:?}", scalar),
            Codec::Array { len, item } => write!(f, "{}x{}", len, item),
        }
    }
}

/// A named field of a record and where its bytes live in the row
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: String,
    offset: usize,
    codec: Codec,
}
impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.codec.size()
    }
}

/// Field layout of a structured array, derived from its dtype
#[derive(Debug, Clone)]
pub struct Schema {
    dtype: DType,
    fields: Vec<FieldSpec>,
    itemsize: usize,
}
impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.itemsize == other.itemsize && self.fields == other.fields
    }
}
impl Schema {
    /// Builds the schema of a structured dtype
    pub fn from_dtype(dtype: &DType) -> Result<Self> {
        let DType::Record(fields) = dtype else {
            return Err(RecordError::NotStructured(dtype.descr()));
        };
        let typestr = Regex::new(r"^([<>|=])([a-zA-Z])(\d*)(\[\w+\])?$")?;
        let mut offset = 0;
        let mut specs = Vec::with_capacity(fields.len());
        for field in fields {
            let codec = codec(&field.name, &field.dtype, &typestr)?;
            let size = codec.size();
            specs.push(FieldSpec {
                name: field.name.clone(),
                offset,
                codec,
            });
            offset += size;
        }
        Ok(Self {
            dtype: dtype.clone(),
            fields: specs,
            itemsize: offset,
        })
    }
    /// The numpy dtype the schema was built from
    pub fn dtype(&self) -> &DType {
        &self.dtype
    }
    /// Number of fields per record
    pub fn arity(&self) -> usize {
        self.fields.len()
    }
    /// Row size in bytes
    pub fn itemsize(&self) -> usize {
        self.itemsize
    }
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|field| field.name())
    }
    fn spec(&self, index: usize) -> Result<&FieldSpec> {
        self.fields.get(index).ok_or(RecordError::FieldIndex {
            index,
            arity: self.fields.len(),
        })
    }
}

fn codec(name: &str, dtype: &DType, typestr: &Regex) -> Result<Codec> {
    match dtype {
        DType::Plain(ts) => Ok(Codec::Scalar(scalar(name, ts, typestr)?)),
        DType::Array(len, item) => Ok(Codec::Array {
            len: *len as usize,
            item: Box::new(codec(name, item, typestr)?),
        }),
        DType::Record(fields) => {
            // nested records are carried through untouched
            let size = fields
                .iter()
                .map(|field| codec(&field.name, &field.dtype, typestr).map(|c| c.size()))
                .sum::<Result<usize>>()?;
            Ok(Codec::Scalar(Scalar::Raw(size)))
        }
    }
}

fn scalar(name: &str, ts: &TypeStr, typestr: &Regex) -> Result<Scalar> {
    let descr = ts.to_string();
    let unsupported = || RecordError::UnsupportedField {
        name: name.to_string(),
        descr: descr.clone(),
    };
    let caps = typestr
        .captures(&descr)
        .ok_or_else(|| RecordError::TypeStr(descr.clone()))?;
    let endian = match &caps[1] {
        ">" => Endian::Big,
        "=" if cfg!(target_endian = "big") => Endian::Big,
        _ => Endian::Little,
    };
    let size: usize = match caps[3].parse() {
        Ok(size) => size,
        Err(_) => return Err(unsupported()),
    };
    let scalar = match (&caps[2], size) {
        ("b", 1) => Scalar::Bool,
        ("i", 1 | 2 | 4 | 8) => Scalar::Int { size, endian },
        ("u", 1 | 2 | 4 | 8) => Scalar::UInt { size, endian },
        ("f", 4 | 8) => Scalar::Float { size, endian },
        ("S" | "a", _) => Scalar::Bytes(size),
        ("U", _) => Scalar::Unicode {
            chars: size,
            endian,
        },
        ("O", _) => return Err(unsupported()),
        _ => Scalar::Raw(size),
    };
    Ok(scalar)
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Array(Vec<FieldValue>),
    Raw(Vec<u8>),
}
impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
    /// Numeric scalar value as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldValue::Int(_) | FieldValue::UInt(_))
    }
    pub fn is_float(&self) -> bool {
        matches!(self, FieldValue::Float(_))
    }
    fn as_i128(&self) -> Option<i128> {
        match self {
            FieldValue::Bool(v) => Some(*v as i128),
            FieldValue::Int(v) => Some(*v as i128),
            FieldValue::UInt(v) => Some(*v as i128),
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0. => Some(*v as i128),
            _ => None,
        }
    }
}
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
            FieldValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            FieldValue::Raw(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

fn read_uint(bytes: &[u8], endian: Endian) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len();
    match endian {
        Endian::Little => {
            buf[..n].copy_from_slice(bytes);
            u64::from_le_bytes(buf)
        }
        Endian::Big => {
            buf[8 - n..].copy_from_slice(bytes);
            u64::from_be_bytes(buf)
        }
    }
}
fn write_uint(out: &mut [u8], value: u64, endian: Endian) {
    let n = out.len();
    match endian {
        Endian::Little => out.copy_from_slice(&value.to_le_bytes()[..n]),
        Endian::Big => out.copy_from_slice(&value.to_be_bytes()[8 - n..]),
    }
}

fn decode(codec: &Codec, bytes: &[u8]) -> FieldValue {
    match codec {
        Codec::Array { item, .. } => FieldValue::Array(
            bytes
                .chunks_exact(item.size())
                .map(|chunk| decode(item, chunk))
                .collect(),
        ),
        Codec::Scalar(scalar) => match scalar {
            Scalar::Bool => FieldValue::Bool(bytes[0] != 0),
            Scalar::UInt { endian, .. } => FieldValue::UInt(read_uint(bytes, *endian)),
            Scalar::Int { size, endian } => {
                let shift = 64 - 8 * size;
                FieldValue::Int(((read_uint(bytes, *endian) << shift) as i64) >> shift)
            }
            Scalar::Float { size: 4, endian } => {
                FieldValue::Float(f32::from_bits(read_uint(bytes, *endian) as u32) as f64)
            }
            Scalar::Float { endian, .. } => {
                FieldValue::Float(f64::from_bits(read_uint(bytes, *endian)))
            }
            Scalar::Bytes(_) => {
                let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                match std::str::from_utf8(&bytes[..end]) {
                    Ok(text) => FieldValue::Text(text.to_string()),
                    Err(_) => FieldValue::Raw(bytes.to_vec()),
                }
            }
            Scalar::Unicode { endian, .. } => bytes
                .chunks_exact(4)
                .map(|c| read_uint(c, *endian) as u32)
                .take_while(|c| *c != 0)
                .map(char::from_u32)
                .collect::<Option<String>>()
                .map_or_else(|| FieldValue::Raw(bytes.to_vec()), FieldValue::Text),
            Scalar::Raw(_) => FieldValue::Raw(bytes.to_vec()),
        },
    }
}

/// Encodes `value` into `out`; returns `false` if the value does not fit the codec
fn encode(codec: &Codec, value: &FieldValue, out: &mut [u8]) -> bool {
    match (codec, value) {
        (Codec::Array { len, item }, FieldValue::Array(items)) if items.len() == *len => out
            .chunks_exact_mut(item.size())
            .zip(items)
            .all(|(chunk, v)| encode(item, v, chunk)),
        (Codec::Array { .. }, _) => false,
        (Codec::Scalar(scalar), value) => match scalar {
            Scalar::Bool => match value {
                FieldValue::Bool(v) => {
                    out[0] = *v as u8;
                    true
                }
                _ => false,
            },
            Scalar::Int { size, endian } => {
                let bits = 8 * *size as u32;
                match value.as_i128() {
                    Some(v) if v >= -(1i128 << (bits - 1)) && v < (1i128 << (bits - 1)) => {
                        write_uint(out, v as i64 as u64, *endian);
                        true
                    }
                    _ => false,
                }
            }
            Scalar::UInt { size, endian } => {
                let bits = 8 * *size as u32;
                match value.as_i128() {
                    Some(v) if v >= 0 && v < (1i128 << bits) => {
                        write_uint(out, v as u64, *endian);
                        true
                    }
                    _ => false,
                }
            }
            Scalar::Float { size, endian } => match value.as_f64() {
                Some(v) if *size == 4 => {
                    write_uint(out, (v as f32).to_bits() as u64, *endian);
                    true
                }
                Some(v) => {
                    write_uint(out, v.to_bits(), *endian);
                    true
                }
                None => false,
            },
            Scalar::Bytes(size) => {
                let bytes = match value {
                    FieldValue::Text(text) => text.as_bytes(),
                    FieldValue::Raw(bytes) => bytes.as_slice(),
                    _ => return false,
                };
                if bytes.len() > *size {
                    return false;
                }
                out.fill(0);
                out[..bytes.len()].copy_from_slice(bytes);
                true
            }
            Scalar::Unicode { chars, endian } => {
                let FieldValue::Text(text) = value else {
                    return false;
                };
                if text.chars().count() > *chars {
                    return false;
                }
                out.fill(0);
                out.chunks_exact_mut(4)
                    .zip(text.chars())
                    .for_each(|(chunk, c)| write_uint(chunk, c as u64, *endian));
                true
            }
            Scalar::Raw(size) => match value {
                FieldValue::Raw(bytes) if bytes.len() == *size => {
                    out.copy_from_slice(bytes);
                    true
                }
                _ => false,
            },
        },
    }
}

/// One row of a structured array
///
/// Cloning a record copies its bytes, clones never share mutable storage.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    bytes: Vec<u8>,
}
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.schema == other.schema
    }
}
impl Record {
    /// Encodes a record from one value per schema field
    pub fn new(schema: Arc<Schema>, values: Vec<FieldValue>) -> Result<Self> {
        if values.len() != schema.arity() {
            return Err(RecordError::Arity {
                expected: schema.arity(),
                found: values.len(),
            });
        }
        let mut record = Self {
            bytes: vec![0u8; schema.itemsize()],
            schema,
        };
        for (index, value) in values.into_iter().enumerate() {
            record.set(index, value)?;
        }
        Ok(record)
    }
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    pub fn arity(&self) -> usize {
        self.schema.arity()
    }
    /// Raw row bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
    /// Decodes the value of the field at `index`
    pub fn field(&self, index: usize) -> Result<FieldValue> {
        let spec = self.schema.spec(index)?;
        Ok(decode(&spec.codec, &self.bytes[spec.range()]))
    }
    /// Decodes all the field values in schema order
    pub fn values(&self) -> impl Iterator<Item = FieldValue> + '_ {
        self.schema
            .fields
            .iter()
            .map(|spec| decode(&spec.codec, &self.bytes[spec.range()]))
    }
    /// Overwrites the field at `index`, the value is converted to the field storage type
    pub fn set(&mut self, index: usize, value: FieldValue) -> Result<()> {
        let spec = self.schema.spec(index)?;
        let mut buf = vec![0u8; spec.codec.size()];
        if !encode(&spec.codec, &value, &mut buf) {
            return Err(RecordError::Encode {
                name: spec.name.clone(),
                codec: spec.codec.to_string(),
                value: value.to_string(),
            });
        }
        let range = spec.range();
        self.bytes[range].copy_from_slice(&buf);
        Ok(())
    }
}

#[doc(hidden)]
pub struct RecordReader(Arc<Schema>);
impl npyz::TypeRead for RecordReader {
    type Value = Record;

    fn read_one<R: Read>(&self, mut reader: R) -> io::Result<Record> {
        let mut bytes = vec![0u8; self.0.itemsize()];
        reader.read_exact(&mut bytes)?;
        Ok(Record {
            schema: self.0.clone(),
            bytes,
        })
    }
}
impl npyz::Deserialize for Record {
    type TypeReader = RecordReader;

    fn reader(dtype: &DType) -> std::result::Result<Self::TypeReader, npyz::DTypeError> {
        Schema::from_dtype(dtype)
            .map(|schema| RecordReader(Arc::new(schema)))
            .map_err(|e| npyz::DTypeError::custom(e.to_string()))
    }
}

#[doc(hidden)]
pub struct RecordWriter(usize);
impl npyz::TypeWrite for RecordWriter {
    type Value = Record;

    fn write_one<W: Write>(&self, mut writer: W, value: &Record) -> io::Result<()> {
        if value.bytes.len() != self.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                RecordError::SchemaMismatch,
            ));
        }
        writer.write_all(&value.bytes)
    }
}
impl npyz::Serialize for Record {
    type TypeWriter = RecordWriter;

    fn writer(dtype: &DType) -> std::result::Result<Self::TypeWriter, npyz::DTypeError> {
        Schema::from_dtype(dtype)
            .map(|schema| RecordWriter(schema.itemsize()))
            .map_err(|e| npyz::DTypeError::custom(e.to_string()))
    }
}

/// A batch of records sharing one schema
#[derive(Debug, Clone)]
pub struct RecordArray {
    schema: Arc<Schema>,
    records: Vec<Record>,
}
impl Deref for RecordArray {
    type Target = [Record];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}
impl RecordArray {
    /// An empty array
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }
    /// Collects records into an array, all records must share `schema`
    pub fn from_records(schema: Arc<Schema>, records: Vec<Record>) -> Result<Self> {
        let mut this = Self::new(schema);
        this.records.reserve(records.len());
        for record in records {
            this.push(record)?;
        }
        Ok(this)
    }
    /// Reads a 1-D structured array in npy format
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let npy = npyz::NpyFile::new(reader)?;
        if npy.shape().len() != 1 {
            return Err(RecordError::Shape(npy.shape().to_vec()));
        }
        let schema = Arc::new(Schema::from_dtype(&npy.dtype())?);
        let records = npy
            .into_vec::<Record>()?
            .into_iter()
            .map(|record| Record {
                schema: schema.clone(),
                bytes: record.bytes,
            })
            .collect();
        Ok(Self { schema, records })
    }
    /// Loads a `.cs` (npy) file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        log::info!("Loading {:?}...", path.as_ref());
        let this = Self::from_reader(BufReader::new(file))?;
        log::info!("... {} records", this.len());
        Ok(this)
    }
    /// Writes the array in npy format with the original dtype
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut npy = npyz::WriteOptions::<Record>::new()
            .dtype(self.schema.dtype().clone())
            .shape(&[self.records.len() as u64])
            .writer(writer)
            .begin_nd()?;
        for record in &self.records {
            npy.push(record)?;
        }
        npy.finish()?;
        Ok(())
    }
    /// Saves the array to `path`, nothing is left at `path` if writing fails
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persist::write_atomic(path, |writer| self.to_writer(writer))
    }
    /// Appends arrays in order, without deduplication
    pub fn concat<I: IntoIterator<Item = RecordArray>>(arrays: I) -> Result<Self> {
        let mut arrays = arrays.into_iter();
        let Some(mut merged) = arrays.next() else {
            return Err(RecordError::Empty);
        };
        for array in arrays {
            if array.schema != merged.schema {
                return Err(RecordError::SchemaMismatch);
            }
            merged.records.extend(array.records);
        }
        Ok(merged)
    }
    pub fn push(&mut self, record: Record) -> Result<()> {
        if record.schema != self.schema {
            return Err(RecordError::SchemaMismatch);
        }
        self.records.push(record);
        Ok(())
    }
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
