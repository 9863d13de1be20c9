//! Parsers for Linux `/proc` and `/sys` counter files.

pub mod parser;

pub use parser::ParseError;
