//! Desugared abstract syntax tree
//!
//! The parse tree has one variant per grammar production; the AST has a
//! dozen. Operators, setters, indexing, collection literals, and most call
//! forms become [`MessageAst`]s. Only control flow the HIR builder inlines
//! (`if`, `while`) and binding forms keep their own variants.

use cadenza_sdk::Slot;
use serde::Serialize;

use crate::parser::Span;
use crate::runtime::Symbol;

/// An AST node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Ast {
    /// No expression; evaluates to nil
    Empty,
    /// Expressions evaluated in order; the value is the last one's
    Sequence(Vec<Ast>),
    /// Function literal
    Block(Box<BlockAst>),
    /// Inlined conditional
    If(Box<IfAst>),
    /// Inlined loop
    While(Box<WhileAst>),
    /// Dynamic dispatch
    Message(Box<MessageAst>),
    /// Read of a name
    Name(NameAst),
    /// Rebinding of an existing name
    Assign(Box<AssignAst>),
    /// Declaration of a local variable with its initial value
    Define(Box<DefineAst>),
    /// Compile-time constant
    Constant(Slot),
    /// `^value`
    MethodReturn(Box<Ast>),
    /// `#a, b ...c = array`
    MultiAssign(Box<MultiAssignAst>),
}

/// A function body: arguments, then statements.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BlockAst {
    /// Argument names; `this` first for frames, empty for inlined blocks
    pub argument_names: Vec<Symbol>,
    /// Literal default values, parallel to `argument_names`
    pub argument_defaults: Vec<Slot>,
    /// True if the last argument collects the rest
    pub has_var_args: bool,
    /// Body statements, variable definitions included
    pub statements: Vec<Ast>,
    /// Runtime primitive replacing the body
    pub primitive: Option<Symbol>,
    /// Source location of the opening brace
    pub span: Span,
}

/// `if` with literal arms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IfAst {
    /// Condition expression
    pub condition: Ast,
    /// Taken when the condition is `true`
    pub true_block: BlockAst,
    /// Taken otherwise; empty when the source has no false arm
    pub false_block: BlockAst,
}

/// `while` with literal condition and body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhileAst {
    /// Evaluated before each iteration
    pub condition_block: BlockAst,
    /// Loop body; empty when absent
    pub repeat_block: BlockAst,
}

/// A message send. The receiver is `arguments[0]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageAst {
    /// Selector
    pub selector: Symbol,
    /// Receiver then positional arguments
    pub arguments: Vec<Ast>,
    /// `key: value` arguments
    pub keyword_arguments: Vec<(Symbol, Ast)>,
    /// Source location of the selector
    pub span: Span,
}

/// A name read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NameAst {
    /// The name
    pub name: Symbol,
    /// Source location
    pub span: Span,
}

/// `name = value`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignAst {
    /// Target name
    pub name: NameAst,
    /// New value
    pub value: Ast,
}

/// `var name = value`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefineAst {
    /// Declared name
    pub name: NameAst,
    /// Initial value; nil when the source has none
    pub value: Ast,
}

/// Destructuring assignment from an array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiAssignAst {
    /// The array being destructured
    pub array_value: Ast,
    /// Targets, in order
    pub targets: Vec<NameAst>,
    /// True if the last target receives the remainder
    pub last_is_remain: bool,
}

impl Ast {
    /// Shorthand for a message node.
    pub fn message(selector: Symbol, arguments: Vec<Ast>, span: Span) -> Ast {
        Ast::Message(Box::new(MessageAst {
            selector,
            arguments,
            keyword_arguments: Vec::new(),
            span,
        }))
    }

    /// Shorthand for a name node.
    pub fn name(name: Symbol, span: Span) -> Ast {
        Ast::Name(NameAst { name, span })
    }

    /// True for nodes with no side effects whose value is a constant.
    pub fn is_constant(&self) -> bool {
        matches!(self, Ast::Constant(_) | Ast::Empty)
    }
}
