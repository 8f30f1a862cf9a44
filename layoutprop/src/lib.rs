pub mod attrs;
pub mod common;
pub mod fusion;
pub mod graph;
pub mod layout;
pub mod oracle;
pub mod passes;
pub mod pprint;
pub mod target;
pub mod tensor;
#[cfg(test)]
mod testing;

pub use smallvec;
