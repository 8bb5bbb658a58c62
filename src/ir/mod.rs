pub mod ast;
pub mod blocks;
pub mod dce;
pub mod eval;
pub mod pprint;
pub mod rename;
pub mod value;

#[cfg(test)]
pub mod ast_builder;
