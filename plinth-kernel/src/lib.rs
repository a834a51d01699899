//! Core term and universe operations for a dependently typed kernel: de Bruijn instantiation,
//! beta reduction, universe parameter substitution and universe constraint checking.

pub mod kernel;
pub mod term;

pub use kernel::*;
