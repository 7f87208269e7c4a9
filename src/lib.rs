//! Transpiler from a high-level assembly-like language to Mindustry mlog,
//! packed into schematics with pre-wired processor links.

pub mod cli;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod msch;
pub mod schematic;
pub mod style;
pub mod token;
pub mod transpile;

pub use error::TranspileError;
pub use eval::Evaluator;
pub use lexer::tokenize;
pub use msch::{Config, Content, ProcessorConfig, ProcessorLink, Schematic};
pub use schematic::SchemBuilder;
pub use token::{Color, Scope, Token, TokenKind};
pub use transpile::transpile;
