//! Middle end: parse tree to linear LIR
//!
//! ```text
//! parse tree -> AST -> HIR (SSA CFG) -> name saving -> LIR
//! ```
//!
//! [`ast_builder`] desugars the parse tree, [`block_builder`] builds SSA
//! form with on-the-fly phi insertion, [`name_saver`] turns captured,
//! instance, and class names into explicit loads and stores, and
//! [`block_serializer`] flattens each frame into a [`lir::LinearFrame`].

pub mod ast;
pub mod ast_builder;
pub mod block_builder;
pub mod block_serializer;
pub mod error;
pub mod hir;
pub mod lir;
pub mod name_saver;
pub mod validator;

pub use ast_builder::AstBuilder;
pub use block_builder::BlockBuilder;
pub use block_serializer::{serialize, SerializeError};
pub use error::BuildError;
pub use name_saver::{save_names, NameSaverReport};
pub use validator::ValidateError;
