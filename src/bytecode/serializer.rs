//! Binary module container.
//!
//! Layout (all payload integers little-endian, the magic big-endian):
//!
//! ```text
//! u32 magic 0xBEBECAFE | u16 version | u16 flags | u32 len + module name
//! main chunk record
//! u32 function count, then per function: u32 len + name, chunk record
//! u32 metadata count, then per entry: u32 len + key, u32 len + value
//! ```
//!
//! A chunk record is `u32 len + name`, `u16 constant count` + tagged
//! constants, `u32 len + bytecode`, `u16 num_locals`, `u8 num_params`.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::bytecode::chunk::{Chunk, ChunkType, Module};
use crate::bytecode::constant::{Constant, ConstantPool};
use crate::error::SerializationError;

pub const MAGIC: u32 = 0xBEBE_CAFE;
pub const FORMAT_VERSION: u16 = 1;
pub const FLAG_LITTLE_ENDIAN: u16 = 0x0001;

pub const TAG_INT: u8 = 0x01;
pub const TAG_FLOAT: u8 = 0x02;
pub const TAG_STRING: u8 = 0x03;
pub const TAG_BOOL: u8 = 0x04;
pub const TAG_EMPTY: u8 = 0x05;

type SerResult<T> = Result<T, SerializationError>;

// ============ Writing ============

/// Write `module` to `out`. The same module always produces the same bytes.
pub fn serialize<W: Write>(module: &Module, out: &mut W) -> SerResult<()> {
    let bytes = serialize_to_vec(module)?;
    out.write_all(&bytes)?;
    Ok(())
}

/// Serialize `module` into a fresh buffer.
pub fn serialize_to_vec(module: &Module) -> SerResult<Vec<u8>> {
    let mut w = ByteWriter::default();
    w.u32_be(MAGIC);
    w.u16(FORMAT_VERSION);
    w.u16(FLAG_LITTLE_ENDIAN);
    w.string(&module.name, "module name")?;

    w.chunk(&module.main)?;

    w.u32(checked_u32(module.functions.len(), "function count", w.len())?);
    for (name, chunk) in &module.functions {
        w.string(name, "function name")?;
        w.chunk(chunk)?;
    }

    w.u32(checked_u32(module.metadata.len(), "metadata count", w.len())?);
    for (key, value) in &module.metadata {
        w.string(key, "metadata key")?;
        w.string(value, "metadata value")?;
    }

    debug!(module = %module.name, bytes = w.len(), "serialized module");
    Ok(w.buf)
}

/// Write `module` to a file.
pub fn save_module(module: &Module, path: impl AsRef<Path>) -> SerResult<()> {
    let bytes = serialize_to_vec(module)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn checked_u32(len: usize, what: &str, offset: usize) -> SerResult<u32> {
    u32::try_from(len).map_err(|_| {
        SerializationError::malformed(format!("{} {} does not fit in u32", what, len), offset)
    })
}

#[derive(Default)]
struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32_be(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, bytes: &[u8], what: &str) -> SerResult<()> {
        let len = checked_u32(bytes.len(), what, self.len())?;
        self.u32(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn string(&mut self, s: &str, what: &str) -> SerResult<()> {
        self.bytes(s.as_bytes(), what)
    }

    fn chunk(&mut self, chunk: &Chunk) -> SerResult<()> {
        self.string(&chunk.name, "chunk name")?;

        let count = u16::try_from(chunk.constants.len()).map_err(|_| {
            SerializationError::malformed(
                format!(
                    "chunk '{}' has {} constants, at most 65535 can be stored",
                    chunk.name,
                    chunk.constants.len()
                ),
                self.len(),
            )
        })?;
        self.u16(count);
        for constant in chunk.constants.iter() {
            self.constant(constant)?;
        }

        self.bytes(&chunk.code, "bytecode length")?;
        self.u16(chunk.num_locals);
        self.u8(chunk.num_params);
        Ok(())
    }

    fn constant(&mut self, constant: &Constant) -> SerResult<()> {
        match constant {
            Constant::Int(n) => {
                self.u8(TAG_INT);
                self.buf.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Float(n) => {
                self.u8(TAG_FLOAT);
                self.buf.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            Constant::Str(s) => {
                self.u8(TAG_STRING);
                self.string(s, "string constant")?;
            }
            Constant::Bool(b) => {
                self.u8(TAG_BOOL);
                self.u8(u8::from(*b));
            }
            Constant::Empty => self.u8(TAG_EMPTY),
        }
        Ok(())
    }
}

// ============ Reading ============

/// Rebuild a module from its serialized bytes.
pub fn deserialize(bytes: &[u8]) -> SerResult<Module> {
    let mut r = ByteReader::new(bytes);

    let magic = r.u32_be("magic number")?;
    if magic != MAGIC {
        return Err(SerializationError::InvalidMagic {
            expected: MAGIC,
            found: magic,
        });
    }

    let version_offset = r.offset;
    let version = r.u16("format version")?;
    if version != FORMAT_VERSION {
        return Err(SerializationError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            found: version,
            offset: version_offset,
        });
    }

    let flags_offset = r.offset;
    let flags = r.u16("flags")?;
    if flags & FLAG_LITTLE_ENDIAN == 0 {
        return Err(SerializationError::malformed(
            format!("flags {:#06x} do not declare a little-endian payload", flags),
            flags_offset,
        ));
    }

    let name = r.string("module name")?;
    let main = r.chunk(ChunkType::Main)?;
    let mut module = Module::new(name, main);

    let function_count = r.u32("function count")?;
    for _ in 0..function_count {
        let name_offset = r.offset;
        let name = r.string("function name")?;
        if module.functions.contains_key(&name) {
            return Err(SerializationError::malformed(
                format!("duplicate function '{}'", name),
                name_offset,
            ));
        }
        let chunk = r.chunk(ChunkType::Function)?;
        module.add_function(name, chunk);
    }

    let metadata_count = r.u32("metadata count")?;
    for _ in 0..metadata_count {
        let key_offset = r.offset;
        let key = r.string("metadata key")?;
        if module.metadata.contains_key(&key) {
            return Err(SerializationError::malformed(
                format!("duplicate metadata key '{}'", key),
                key_offset,
            ));
        }
        let value = r.string("metadata value")?;
        module.metadata.insert(key, value);
    }

    if r.remaining() > 0 {
        return Err(SerializationError::malformed(
            format!("{} unexpected trailing byte(s)", r.remaining()),
            r.offset,
        ));
    }

    debug!(module = %module.name, bytes = bytes.len(), "deserialized module");
    Ok(module)
}

/// Read a whole module from `input`.
pub fn deserialize_from<R: Read>(mut input: R) -> SerResult<Module> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    deserialize(&bytes)
}

/// Read a module from a file.
pub fn load_module(path: impl AsRef<Path>) -> SerResult<Module> {
    let bytes = fs::read(path)?;
    deserialize(&bytes)
}

struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, len: usize, what: &str) -> SerResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(SerializationError::truncated(
                what,
                self.offset,
                len,
                self.remaining(),
            ));
        }
        let bytes = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> SerResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> SerResult<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> SerResult<u16> {
        self.array(what).map(u16::from_le_bytes)
    }

    fn u32(&mut self, what: &str) -> SerResult<u32> {
        self.array(what).map(u32::from_le_bytes)
    }

    fn u32_be(&mut self, what: &str) -> SerResult<u32> {
        self.array(what).map(u32::from_be_bytes)
    }

    fn i64(&mut self, what: &str) -> SerResult<i64> {
        self.array(what).map(i64::from_le_bytes)
    }

    fn f64(&mut self, what: &str) -> SerResult<f64> {
        self.array(what).map(|b| f64::from_bits(u64::from_le_bytes(b)))
    }

    /// A u32 length prefix followed by that many bytes.
    fn length_prefixed(&mut self, what: &str) -> SerResult<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    fn string(&mut self, what: &str) -> SerResult<String> {
        let start = self.offset + 4;
        let bytes = self.length_prefixed(what)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            SerializationError::malformed(
                format!("{} is not valid UTF-8", what),
                start + e.utf8_error().valid_up_to(),
            )
        })
    }

    fn chunk(&mut self, chunk_type: ChunkType) -> SerResult<Chunk> {
        let name = self.string("chunk name")?;
        let mut chunk = Chunk::new(name, chunk_type);

        let count = self.u16("constant count")?;
        let mut constants = ConstantPool::new();
        for _ in 0..count {
            let constant = self.constant()?;
            // At most 65535 entries, always below the pool limit.
            let _ = constants.push(constant);
        }
        chunk.constants = constants;

        chunk.code = self.length_prefixed("bytecode")?.to_vec();
        chunk.num_locals = self.u16("local count")?;
        chunk.num_params = self.u8("parameter count")?;
        Ok(chunk)
    }

    fn constant(&mut self) -> SerResult<Constant> {
        let tag_offset = self.offset;
        let tag = self.u8("constant tag")?;
        match tag {
            TAG_INT => self.i64("integer constant").map(Constant::Int),
            TAG_FLOAT => self.f64("float constant").map(Constant::Float),
            TAG_STRING => self.string("string constant").map(Constant::Str),
            TAG_BOOL => {
                let offset = self.offset;
                match self.u8("boolean constant")? {
                    0 => Ok(Constant::Bool(false)),
                    1 => Ok(Constant::Bool(true)),
                    other => Err(SerializationError::malformed(
                        format!("boolean constant must be 0 or 1, got {}", other),
                        offset,
                    )),
                }
            }
            TAG_EMPTY => Ok(Constant::Empty),
            tag => Err(SerializationError::UnknownTag {
                tag,
                offset: tag_offset,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::OpCode;
    use pretty_assertions::assert_eq;

    fn sample_module() -> Module {
        let mut main = Chunk::new("main", ChunkType::Main);
        main.add_constant(Constant::Int(i64::MIN));
        main.add_constant(Constant::Int(i64::MAX));
        main.add_constant(Constant::Float(f64::INFINITY));
        main.add_constant(Constant::Float(f64::NEG_INFINITY));
        main.add_constant(Constant::Float(f64::NAN));
        main.add_constant(Constant::Float(-0.0));
        main.add_constant(Constant::from(""));
        main.add_constant(Constant::from("héllo wörld ✓"));
        main.add_constant(Constant::Bool(true));
        main.add_constant(Constant::Bool(false));
        main.add_constant(Constant::Empty);
        for i in 0..120 {
            if i % 2 == 0 {
                main.add_constant(Constant::Int(i));
            } else {
                main.add_constant(Constant::Float(i as f64 + 0.5));
            }
        }
        main.write_op(OpCode::LoadConst);
        main.write_u16(0);
        main.write_op(OpCode::Return);
        main.num_locals = 3;

        let mut module = Module::new("sample", main);
        let mut f = Chunk::new("helper", ChunkType::Function);
        f.add_constant(Constant::from("x"));
        f.write_op(OpCode::LoadLocal);
        f.write_u16(0);
        f.write_op(OpCode::Return);
        f.num_locals = 1;
        f.num_params = 1;
        module.add_function("helper", f);
        module.set_metadata("author", "tests");
        module.set_metadata("", "");
        module
    }

    #[test]
    fn test_round_trip() {
        let module = sample_module();
        let bytes = serialize_to_vec(&module).unwrap();
        let loaded = deserialize(&bytes).unwrap();
        assert_eq!(loaded, module);
        assert_eq!(loaded.main.constants.len(), 131);
        match loaded.main.constant(4) {
            Some(Constant::Float(n)) => assert!(n.is_nan()),
            other => panic!("expected NaN, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_empty_module() {
        let module = Module::new("", Chunk::new("", ChunkType::Main));
        let bytes = serialize_to_vec(&module).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), module);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let module = sample_module();
        assert_eq!(
            serialize_to_vec(&module).unwrap(),
            serialize_to_vec(&module.clone()).unwrap()
        );
    }

    #[test]
    fn test_header_layout() {
        let module = Module::new("m", Chunk::new("main", ChunkType::Main));
        let bytes = serialize_to_vec(&module).unwrap();
        assert_eq!(&bytes[0..4], &[0xBE, 0xBE, 0xCA, 0xFE]);
        assert_eq!(&bytes[4..6], &[0x01, 0x00]);
        assert_eq!(&bytes[6..8], &[0x01, 0x00]);
        assert_eq!(&bytes[8..12], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(bytes[12], b'm');
    }

    #[test]
    fn test_constant_encoding() {
        let mut main = Chunk::new("c", ChunkType::Main);
        main.add_constant(Constant::Int(-1));
        main.add_constant(Constant::from("ab"));
        let bytes = serialize_to_vec(&Module::new("", main)).unwrap();
        // header(8) + module name(4) + chunk name(4 + 1) + count(2)
        let at = 19;
        assert_eq!(&bytes[at - 2..at], &[2, 0]);
        assert_eq!(bytes[at], TAG_INT);
        assert_eq!(&bytes[at + 1..at + 9], &[0xFF; 8]);
        assert_eq!(bytes[at + 9], TAG_STRING);
        assert_eq!(&bytes[at + 10..at + 16], &[2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_magic_rejection() {
        let mut bytes = serialize_to_vec(&sample_module()).unwrap();
        bytes[0] = 0xDE;
        let err = deserialize(&bytes).unwrap_err();
        assert!(err.is_invalid_magic(), "got {:?}", err);
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = serialize_to_vec(&sample_module()).unwrap();
        bytes[4] = 2;
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::UnsupportedVersion { found: 2, offset: 4, .. }
        ));
    }

    #[test]
    fn test_truncation_at_every_byte() {
        let bytes = serialize_to_vec(&sample_module()).unwrap();
        for len in 0..bytes.len() {
            match deserialize(&bytes[..len]) {
                Err(SerializationError::InvalidMagic { .. }) => {
                    panic!("truncation at {} reported as bad magic", len)
                }
                Err(_) => {}
                Ok(_) => panic!("truncation at {} was accepted", len),
            }
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let module = Module::new("m", Chunk::new("main", ChunkType::Main));
        let mut bytes = serialize_to_vec(&module).unwrap();
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(err, SerializationError::Truncated { offset: 12, .. }));
    }

    #[test]
    fn test_unknown_constant_tag() {
        let mut main = Chunk::new("c", ChunkType::Main);
        main.add_constant(Constant::Empty);
        let mut bytes = serialize_to_vec(&Module::new("", main)).unwrap();
        bytes[19] = 0x06;
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::UnknownTag { tag: 0x06, offset: 19 }
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = serialize_to_vec(&Module::new("ab", Chunk::new("", ChunkType::Main))).unwrap();
        bytes[13] = 0xFF;
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(err, SerializationError::Malformed { offset: 13, .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = serialize_to_vec(&sample_module()).unwrap();
        bytes.push(0);
        assert!(matches!(
            deserialize(&bytes).unwrap_err(),
            SerializationError::Malformed { .. }
        ));
    }

    #[test]
    fn test_duplicate_function_names_rejected() {
        let mut module = Module::new("dups", Chunk::new("main", ChunkType::Main));
        module.add_function("dup_a", Chunk::new("body_a", ChunkType::Function));
        module.add_function("dup_b", Chunk::new("body_b", ChunkType::Function));
        let mut bytes = serialize_to_vec(&module).unwrap();

        let at = bytes.windows(5).position(|w| w == b"dup_b").unwrap();
        bytes[at..at + 5].copy_from_slice(b"dup_a");
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(err, SerializationError::Malformed { offset, .. } if offset == at - 4));
        assert!(err.to_string().contains("dup_a"));
    }

    #[test]
    fn test_too_many_constants_to_store() {
        let mut main = Chunk::new("big", ChunkType::Main);
        for i in 0..65536 {
            main.add_constant(Constant::Int(i));
        }
        let err = serialize_to_vec(&Module::new("", main)).unwrap_err();
        assert!(err.to_string().contains("65535"));
    }

    #[test]
    fn test_reader_and_writer_streams() {
        let module = sample_module();
        let mut out = Vec::new();
        serialize(&module, &mut out).unwrap();
        let loaded = deserialize_from(std::io::Cursor::new(out)).unwrap();
        assert_eq!(loaded, module);
    }
}
