pub mod classfile;
pub mod io;
pub mod opcodes;
pub mod scanner;
