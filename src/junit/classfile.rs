//! Minimal JVM class-file reader.
//!
//! Reads just enough structure for test discovery and patch metadata: the
//! constant pool, class access flags, this/super class, interfaces, method
//! signatures with their runtime-visible annotations, and the `SourceFile`
//! attribute. Bytecode and field bodies are skipped.

use std::fs;
use std::path::Path;

use thiserror::Error;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

const MAGIC: u32 = 0xCAFE_BABE;

/// Class-file decoding errors
#[derive(Debug, Error)]
pub enum ClassFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a class file (magic {0:#010x})")]
    BadMagic(u32),

    #[error("Class file truncated at offset {0}")]
    Truncated(usize),

    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },

    #[error("Constant pool index {0} does not name the expected entry")]
    BadConstant(u16),

    #[error("Unknown annotation element tag {0:?}")]
    BadElementValue(char),
}

/// One declared method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    /// Runtime-visible annotation type descriptors, e.g. `Lorg/junit/Test;`.
    pub annotations: Vec<String>,
}

impl MethodInfo {
    pub fn is_public(&self) -> bool {
        self.access & ACC_PUBLIC != 0
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access & ACC_ABSTRACT != 0
    }

    pub fn is_native(&self) -> bool {
        self.access & ACC_NATIVE != 0
    }

    pub fn has_annotation(&self, descriptor: &str) -> bool {
        self.annotations.iter().any(|a| a == descriptor)
    }
}

/// Decoded class metadata. Names use dotted binary form (`a.b.C$D`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: u16,
    pub major_version: u16,
    pub methods: Vec<MethodInfo>,
    pub source_file: Option<String>,
}

impl ClassInfo {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        Parser::new(bytes).parse()
    }

    pub fn read(path: &Path) -> Result<Self, ClassFileError> {
        Self::parse(&fs::read(path)?)
    }

    pub fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access & ACC_ABSTRACT != 0
    }
}

/// Turn an internal name (`a/b/C`) into its dotted form.
pub fn dotted(internal: &str) -> String {
    internal.replace('/', ".")
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class(u16),
    Other,
    /// Second slot of a long or double.
    Unusable,
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    pool: Vec<Constant>,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            pool: Vec::new(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(ClassFileError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.pool.get(index as usize) {
            Some(Constant::Utf8(s)) => Ok(s),
            _ => Err(ClassFileError::BadConstant(index)),
        }
    }

    fn class_name(&self, index: u16) -> Result<String, ClassFileError> {
        match self.pool.get(index as usize) {
            Some(Constant::Class(name_index)) => Ok(dotted(self.utf8(*name_index)?)),
            _ => Err(ClassFileError::BadConstant(index)),
        }
    }

    fn parse(mut self) -> Result<ClassInfo, ClassFileError> {
        let magic = self.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let _minor = self.u16()?;
        let major_version = self.u16()?;
        self.read_constant_pool()?;

        let access = self.u16()?;
        let this_class = self.u16()?;
        let name = self.class_name(this_class)?;
        let super_index = self.u16()?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(self.class_name(super_index)?)
        };
        let interface_count = self.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let index = self.u16()?;
            interfaces.push(self.class_name(index)?);
        }

        let field_count = self.u16()?;
        for _ in 0..field_count {
            self.take(6)?;
            self.skip_attributes()?;
        }

        let method_count = self.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(self.read_method()?);
        }

        let mut source_file = None;
        let attribute_count = self.u16()?;
        for _ in 0..attribute_count {
            let attr_name = self.u16()?;
            let len = self.u32()? as usize;
            if self.utf8(attr_name)? == "SourceFile" {
                let index = self.u16()?;
                source_file = Some(self.utf8(index)?.to_string());
                self.take(len.saturating_sub(2))?;
            } else {
                self.take(len)?;
            }
        }

        Ok(ClassInfo {
            name,
            super_name,
            interfaces,
            access,
            major_version,
            methods,
            source_file,
        })
    }

    fn read_constant_pool(&mut self) -> Result<(), ClassFileError> {
        let count = self.u16()?;
        self.pool = Vec::with_capacity(count as usize);
        self.pool.push(Constant::Unusable);
        let mut index = 1u16;
        while index < count {
            let tag = self.u8()?;
            let (constant, slots) = match tag {
                1 => {
                    let len = self.u16()? as usize;
                    let raw = self.take(len)?;
                    (Constant::Utf8(String::from_utf8_lossy(raw).into_owned()), 1)
                }
                7 => (Constant::Class(self.u16()?), 1),
                8 | 16 | 19 | 20 => {
                    self.take(2)?;
                    (Constant::Other, 1)
                }
                15 => {
                    self.take(3)?;
                    (Constant::Other, 1)
                }
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    self.take(4)?;
                    (Constant::Other, 1)
                }
                5 | 6 => {
                    self.take(8)?;
                    (Constant::Other, 2)
                }
                _ => return Err(ClassFileError::UnknownTag { tag, index }),
            };
            self.pool.push(constant);
            if slots == 2 {
                self.pool.push(Constant::Unusable);
            }
            index += slots;
        }
        Ok(())
    }

    fn skip_attributes(&mut self) -> Result<(), ClassFileError> {
        let count = self.u16()?;
        for _ in 0..count {
            self.take(2)?;
            let len = self.u32()? as usize;
            self.take(len)?;
        }
        Ok(())
    }

    fn read_method(&mut self) -> Result<MethodInfo, ClassFileError> {
        let access = self.u16()?;
        let name_index = self.u16()?;
        let descriptor_index = self.u16()?;
        let name = self.utf8(name_index)?.to_string();
        let descriptor = self.utf8(descriptor_index)?.to_string();

        let mut annotations = Vec::new();
        let attribute_count = self.u16()?;
        for _ in 0..attribute_count {
            let attr_name = self.u16()?;
            let len = self.u32()? as usize;
            if self.utf8(attr_name)? == "RuntimeVisibleAnnotations" {
                let end = self.pos + len;
                let count = self.u16()?;
                for _ in 0..count {
                    let type_index = self.read_annotation()?;
                    annotations.push(self.utf8(type_index)?.to_string());
                }
                if self.pos != end {
                    return Err(ClassFileError::Truncated(self.pos));
                }
            } else {
                self.take(len)?;
            }
        }

        Ok(MethodInfo {
            name,
            descriptor,
            access,
            annotations,
        })
    }

    /// Consume one annotation, returning its type index.
    fn read_annotation(&mut self) -> Result<u16, ClassFileError> {
        let type_index = self.u16()?;
        let pairs = self.u16()?;
        for _ in 0..pairs {
            self.take(2)?;
            self.skip_element_value()?;
        }
        Ok(type_index)
    }

    fn skip_element_value(&mut self) -> Result<(), ClassFileError> {
        let tag = self.u8()? as char;
        match tag {
            'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 's' | 'c' => {
                self.take(2)?;
            }
            'e' => {
                self.take(4)?;
            }
            '@' => {
                self.read_annotation()?;
            }
            '[' => {
                let count = self.u16()?;
                for _ in 0..count {
                    self.skip_element_value()?;
                }
            }
            other => return Err(ClassFileError::BadElementValue(other)),
        }
        Ok(())
    }
}
