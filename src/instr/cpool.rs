//! Appendable constant pool fragments.
//!
//! A fragment is a packed run of constant pool entries whose index operands are not yet
//! absolute. Operands below [`EXTERNAL_FLAG`] are fragment-relative and point into the same
//! fragment; operands carrying the flag point into a second fragment that is appended
//! separately. [`Fragment::relocate`] turns both kinds into absolute indices.

use crate::bytecode::classfile::tags;
use crate::error::FragmentError;

/// Marks an operand as pointing into the secondary fragment.
pub const EXTERNAL_FLAG: u32 = 0x1_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentEntry {
    Utf8(String),
    Ref { tag: u8, first: u32, second: Option<u32> },
}

impl FragmentEntry {
    pub fn utf8(value: &str) -> FragmentEntry {
        FragmentEntry::Utf8(value.to_owned())
    }

    pub fn class(name: u32) -> FragmentEntry {
        FragmentEntry::Ref { tag: tags::CLASS, first: name, second: None }
    }

    pub fn name_and_type(name: u32, descriptor: u32) -> FragmentEntry {
        FragmentEntry::Ref { tag: tags::NAME_AND_TYPE, first: name, second: Some(descriptor) }
    }

    pub fn method_ref(class: u32, name_and_type: u32) -> FragmentEntry {
        FragmentEntry::Ref { tag: tags::METHODREF, first: class, second: Some(name_and_type) }
    }

}

/// Operand referring to entry `index` of the secondary fragment.
pub fn external(index: u16) -> u32 {
    EXTERNAL_FLAG | index as u32
}

/// Packed, unrelocated entries plus the byte positions of every operand that needs a base
/// added. Building is pure; relocation copies, so one fragment serves every class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    bytes: Vec<u8>,
    internal_positions: Vec<usize>,
    external_positions: Vec<usize>,
    entry_count: u16,
}

impl Fragment {
    pub fn empty() -> Fragment {
        Fragment::default()
    }

    pub fn build(entries: &[FragmentEntry]) -> Result<Fragment, FragmentError> {
        let mut fragment = Fragment::default();
        for (i, entry) in entries.iter().enumerate() {
            match entry {
                FragmentEntry::Utf8(value) => {
                    let encoded = modified_utf8(value);
                    if encoded.len() > 0xFFFF {
                        return Err(FragmentError::Utf8TooLong(i));
                    }
                    fragment.bytes.push(tags::UTF8);
                    fragment.bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
                    fragment.bytes.extend_from_slice(&encoded);
                },
                FragmentEntry::Ref { tag, first, second } => {
                    match (*tag, second.is_some()) {
                        (tags::CLASS, false) => {},
                        (tags::NAME_AND_TYPE, true)
                        | (tags::FIELDREF, true)
                        | (tags::METHODREF, true)
                        | (tags::INTERFACE_METHODREF, true) => {},
                        (tag, _) => return Err(FragmentError::UnsupportedTag(tag))
                    }
                    fragment.bytes.push(*tag);
                    fragment.push_operand(i, *first, entries.len())?;
                    if let Some(second) = second {
                        fragment.push_operand(i, *second, entries.len())?;
                    }
                }
            }
        }
        if entries.len() > 0xFFFF {
            return Err(FragmentError::PoolOverflow);
        }
        fragment.entry_count = entries.len() as u16;
        Ok(fragment)
    }

    fn push_operand(&mut self,
                    entry: usize,
                    operand: u32,
                    entry_count: usize)
                    -> Result<(), FragmentError> {
        let position = self.bytes.len();
        if operand & EXTERNAL_FLAG != 0 {
            if operand > (EXTERNAL_FLAG | 0xFFFF) {
                return Err(FragmentError::OperandOutOfRange { entry, operand });
            }
            self.external_positions.push(position);
        } else {
            if operand as usize >= entry_count {
                return Err(FragmentError::OperandOutOfRange { entry, operand });
            }
            self.internal_positions.push(position);
        }
        self.bytes.extend_from_slice(&(operand as u16).to_be_bytes());
        Ok(())
    }

    /// Number of constant pool slots this fragment occupies.
    pub fn entry_count(&self) -> u16 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Absolute bytes for a fragment whose first entry lands at `base_internal` and whose
    /// secondary fragment starts at `base_external`.
    pub fn relocate(&self,
                    base_internal: u16,
                    base_external: u16)
                    -> Result<Vec<u8>, FragmentError> {
        if base_internal as u32 + self.entry_count as u32 > 0xFFFF {
            return Err(FragmentError::PoolOverflow);
        }
        let mut bytes = self.bytes.clone();
        let bases = [
            (&self.internal_positions, base_internal),
            (&self.external_positions, base_external),
        ];
        for (positions, base) in bases {
            for &pos in positions {
                let operand = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as u32 + base as u32;
                if operand > 0xFFFF {
                    return Err(FragmentError::PoolOverflow);
                }
                bytes[pos..pos + 2].copy_from_slice(&(operand as u16).to_be_bytes());
            }
        }
        Ok(bytes)
    }
}

/// The JVM's modified UTF-8: NUL takes two bytes and supplementary characters are written
/// as surrogate pairs.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            },
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
