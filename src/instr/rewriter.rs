use crate::bytecode::classfile::{ClassBinary, CP_COUNT_OFFSET};

/// Reassembles a classfile from the original bytes of `class`, the constant pool entries
/// appended to it and one optional replacement `method_info` per method.
///
/// Outside the constant pool count, the appended entries and the replaced methods the result
/// is byte-for-byte the original. The appended entries go after the last original entry, so
/// every original index keeps its meaning.
pub fn rewrite(class: &ClassBinary,
               replacements: &[Option<&[u8]>],
               added_count: u16,
               added_bytes: &[u8])
               -> Vec<u8> {
    let original = class.bytes();
    let growth: isize = class.methods.iter()
        .zip(replacements.iter())
        .map(|(range, replacement)| match replacement {
            Some(bytes) => bytes.len() as isize - (range.end - range.start) as isize,
            None => 0
        })
        .sum();
    let capacity = original.len() as isize + added_bytes.len() as isize + growth;
    let mut out = Vec::with_capacity(capacity.max(0) as usize);

    out.extend_from_slice(&original[..class.intermediate_start]);
    out.extend_from_slice(added_bytes);
    let count = class.cp_count() + added_count;
    out[CP_COUNT_OFFSET..CP_COUNT_OFFSET + 2].copy_from_slice(&count.to_be_bytes());

    // access flags, this, super, interfaces, fields and methods_count
    out.extend_from_slice(&original[class.intermediate_start..class.methods_start + 2]);
    for (i, range) in class.methods.iter().enumerate() {
        match replacements.get(i).copied().flatten() {
            Some(bytes) => out.extend_from_slice(bytes),
            None => out.extend_from_slice(&original[range.start..range.end])
        }
    }
    out.extend_from_slice(&original[class.attributes_start..]);
    out
}
