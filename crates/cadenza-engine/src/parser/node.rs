//! Parse tree
//!
//! Nodes mirror the grammar closely. Each node remembers the index of the
//! token that introduced it and owns its next sibling, so lists (statements,
//! arguments, variable definitions, methods) are intrusive singly linked
//! chains rather than vectors.

use cadenza_sdk::Slot;

/// One parse tree node plus its sibling chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Index of the node's defining token
    pub token: usize,
    /// Production-specific payload
    pub kind: NodeKind,
    /// Next node in the enclosing list
    pub next: Option<Box<Node>>,
}

/// Grammar production of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Nothing; the value of an empty expression sequence
    Empty,

    /// `name = initialValue` inside a var/arg/classvar/const list
    VarDef {
        /// `<` or `<>` marker on a class variable
        has_read_accessor: bool,
        /// `>` or `<>` marker on a class variable
        has_write_accessor: bool,
        /// Optional initializer
        initial_value: Option<Box<Node>>,
    },

    /// A `var`, `classvar`, `const`, or `arg` list; the token tells which
    VarList {
        /// Chain of `VarDef` nodes
        definitions: Option<Box<Node>>,
    },

    /// Block or method arguments
    ArgList {
        /// Chain of `VarList` nodes
        var_list: Option<Box<Node>>,
        /// Token of the `...rest` argument name
        var_args_name: Option<usize>,
    },

    /// Method inside a class body; the token is the selector
    Method {
        /// Prefixed with `*`
        is_class_method: bool,
        /// Token of the `_Primitive` marker
        primitive: Option<usize>,
        /// The method body, a `Block` node
        body: Box<Node>,
    },

    /// `+ ClassName { methods }`
    ClassExt {
        /// Chain of `Method` nodes
        methods: Option<Box<Node>>,
    },

    /// `ClassName [meta] : Super { ... }`; the token is the class name
    Class {
        /// Token of the superclass name
        superclass: Option<usize>,
        /// Token of the bracketed metaclass name
        optional_name: Option<usize>,
        /// Chain of `VarList` nodes
        variables: Option<Box<Node>>,
        /// Chain of `Method` nodes
        methods: Option<Box<Node>>,
    },

    /// `^value`
    Return {
        /// Returned expression
        value: Option<Box<Node>>,
    },

    /// `{ |args| var ...; body }`
    Block {
        /// `ArgList` node
        arguments: Option<Box<Node>>,
        /// Chain of `VarList` nodes
        variables: Option<Box<Node>>,
        /// Token of a `_Primitive` marker
        primitive: Option<usize>,
        /// `ExprSeq` node
        body: Option<Box<Node>>,
    },

    /// Literal value already decoded by the lexer (numbers, chars, nil, booleans)
    Slot(Slot),

    /// One or more adjacent string literals
    String {
        /// Token indices of every piece, in order
        pieces: Vec<usize>,
    },

    /// Symbol literal
    Symbol,

    /// Variable or class name
    Name {
        /// `~name` form
        is_global: bool,
    },

    /// `expr; expr; ...`
    ExprSeq {
        /// Chain of expressions
        expr: Option<Box<Node>>,
    },

    /// `name = value`
    Assign {
        /// `Name` node
        name: Box<Node>,
        /// Assigned expression
        value: Box<Node>,
    },

    /// `target.selector = value`; the token is the selector
    Setter {
        /// Object receiving the value
        target: Box<Node>,
        /// Assigned expression
        value: Box<Node>,
    },

    /// `key: value` inside a call or event literal
    KeyValue {
        /// Key expression
        key: Box<Node>,
        /// Value expression
        value: Box<Node>,
    },

    /// `target.selector(arguments, key: value)`; the token is the selector.
    ///
    /// A missing target means the first argument is the receiver, as in
    /// `max(a, b)`.
    Call {
        /// Receiver
        target: Option<Box<Node>>,
        /// Chain of argument expressions
        arguments: Option<Box<Node>>,
        /// Chain of `KeyValue` nodes
        keyword_arguments: Option<Box<Node>>,
    },

    /// `left op right`, optionally with an adverb `left op.adverb right`
    BinopCall {
        /// Left operand
        left: Box<Node>,
        /// Right operand
        right: Box<Node>,
        /// Adverb node
        adverb: Option<Box<Node>>,
    },

    /// `target.selector(a, *rest)`; the token is the selector
    PerformList {
        /// Receiver
        target: Box<Node>,
        /// Chain of arguments; the last one is the spread list
        arguments: Option<Box<Node>>,
    },

    /// `ClassName(arguments)`
    New {
        /// The class name
        target: Box<Node>,
        /// Chain of arguments
        arguments: Option<Box<Node>>,
        /// Chain of `KeyValue` nodes
        keyword_arguments: Option<Box<Node>>,
    },

    /// `target.(arguments)`
    Value {
        /// The function being evaluated
        target: Box<Node>,
        /// Chain of arguments
        arguments: Option<Box<Node>>,
        /// Chain of `KeyValue` nodes
        keyword_arguments: Option<Box<Node>>,
    },

    /// `target[index]`
    ArrayRead {
        /// Indexed collection
        target: Box<Node>,
        /// Index expression
        index: Box<Node>,
    },

    /// `target[index] = value`
    ArrayWrite {
        /// Indexed collection
        target: Box<Node>,
        /// Index expression
        index: Box<Node>,
        /// Stored expression
        value: Box<Node>,
    },

    /// `target[first, second..last]`
    CopySeries {
        /// Indexed collection
        target: Box<Node>,
        /// First index
        first: Box<Node>,
        /// Optional second index (defines the step)
        second: Option<Box<Node>>,
        /// Optional last index
        last: Option<Box<Node>>,
    },

    /// `[a, b]` or `ClassName[a, b]`
    LiteralList {
        /// Collection class; `Array` when absent
        class_name: Option<Box<Node>>,
        /// Chain of element expressions
        elements: Option<Box<Node>>,
    },

    /// `(key: value, ...)`
    Event {
        /// Chain of `KeyValue` nodes
        elements: Option<Box<Node>>,
    },

    /// `~name`
    EnvironmentAt,

    /// `~name = value`
    EnvironmentPut {
        /// Stored expression
        value: Box<Node>,
    },

    /// `if(cond, {..}, {..})` or `cond.if({..}, {..})` with literal blocks
    If {
        /// Condition expression
        condition: Box<Node>,
        /// `Block` node evaluated when true
        true_block: Box<Node>,
        /// `Block` node evaluated when false
        false_block: Option<Box<Node>>,
    },

    /// `while({..}, {..})` or `{..}.while({..})` with literal blocks
    While {
        /// Condition `Block` node
        condition: Box<Node>,
        /// Body `Block` node
        repeat: Option<Box<Node>>,
    },

    /// `_` placeholder
    CurryArgument,

    /// `#a, b ...rest = value`
    MultiAssign {
        /// Tokens of the target names
        targets: Vec<usize>,
        /// Token of the `...rest` target
        rest: Option<usize>,
        /// Array-valued expression
        value: Box<Node>,
    },
}

impl Node {
    /// Create a node with no siblings.
    pub fn new(token: usize, kind: NodeKind) -> Box<Node> {
        Box::new(Node {
            token,
            kind,
            next: None,
        })
    }

    /// Append `node` to the end of this node's sibling chain.
    pub fn append(&mut self, node: Box<Node>) {
        let mut tail = self;
        while tail.next.is_some() {
            // Checked on the line above; the borrow checker needs the split.
            tail = match tail.next.as_deref_mut() {
                Some(next) => next,
                None => return,
            };
        }
        tail.next = Some(node);
    }

    /// Iterate over this node and all of its following siblings.
    pub fn siblings(&self) -> Siblings<'_> {
        Siblings { node: Some(self) }
    }

    /// True for `{ ... }` literals.
    pub fn is_block(&self) -> bool {
        matches!(self.kind, NodeKind::Block { .. })
    }
}

/// Iterator over a sibling chain.
pub struct Siblings<'a> {
    node: Option<&'a Node>,
}

impl<'a> Iterator for Siblings<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(node)
    }
}

/// Build a sibling chain from a list of nodes, preserving order.
pub fn chain(nodes: Vec<Box<Node>>) -> Option<Box<Node>> {
    let mut head: Option<Box<Node>> = None;
    for mut node in nodes.into_iter().rev() {
        node.next = head;
        head = Some(node);
    }
    head
}

/// Iterate an optional chain.
pub fn iter_chain(head: &Option<Box<Node>>) -> Siblings<'_> {
    Siblings {
        node: head.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_preserves_order() {
        let nodes = vec![
            Node::new(0, NodeKind::Empty),
            Node::new(1, NodeKind::Empty),
            Node::new(2, NodeKind::Empty),
        ];
        let head = chain(nodes);
        let tokens: Vec<usize> = iter_chain(&head).map(|n| n.token).collect();
        assert_eq!(tokens, vec![0, 1, 2]);
    }

    #[test]
    fn test_append_walks_to_tail() {
        let mut head = Node::new(0, NodeKind::Empty);
        head.append(Node::new(1, NodeKind::Empty));
        head.append(Node::new(2, NodeKind::CurryArgument));
        let kinds: Vec<&NodeKind> = head.siblings().map(|n| &n.kind).collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[2], &NodeKind::CurryArgument);
    }
}
