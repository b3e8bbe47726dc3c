//! Class records used for name resolution
//!
//! The compiler asks the class library three questions about a name that no
//! local scope binds: is it an instance variable, a class variable, or a
//! class constant of the class that owns the method being compiled (or one
//! of its superclasses)? Class variables of every class share one global
//! array; each variable's index into that array is fixed when it is added.

use cadenza_sdk::Slot;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::heap::{Heap, HeapError, HeapObject};
use super::symbol_table::{Symbol, SymbolError, SymbolTable};

/// Classes every library starts with, paired with their superclass.
const CORE_CLASSES: &[(&str, Option<&str>)] = &[
    ("Object", None),
    ("Interpreter", Some("Object")),
    ("Array", Some("Object")),
    ("Event", Some("Object")),
    ("Set", Some("Object")),
    ("Function", Some("Object")),
    ("Method", Some("Object")),
    ("Symbol", Some("Object")),
    ("String", Some("Object")),
    ("Integer", Some("Object")),
    ("Float", Some("Object")),
    ("Boolean", Some("Object")),
    ("Char", Some("Object")),
    ("Nil", Some("Object")),
    ("Process", Some("Object")),
    ("Thread", Some("Object")),
];

/// A method registered on a class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodDef {
    /// Selector
    pub selector: Symbol,
    /// Defined with a `*` prefix
    pub is_class_method: bool,
    /// Primitive name; such methods carry no compiled body
    pub primitive: Option<Symbol>,
    /// Pointer to the compiled `FunctionDef`
    pub function: Option<Slot>,
}

/// One class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDef {
    /// Class name
    pub name: Symbol,
    /// Superclass name; `None` only for the root class
    pub superclass: Option<Symbol>,
    /// Instance variables declared by this class, not its superclasses
    pub instance_variables: Vec<Symbol>,
    /// Class variables declared by this class and their global indices
    pub class_variables: Vec<(Symbol, usize)>,
    /// Constants declared by this class
    pub constants: Vec<(Symbol, Slot)>,
    /// Methods, in definition order
    pub methods: Vec<MethodDef>,
    /// Heap object representing the class at run time
    pub object: Slot,
}

impl ClassDef {
    /// Method with the given selector and kind.
    pub fn method(&self, selector: Symbol, is_class_method: bool) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.selector == selector && m.is_class_method == is_class_method)
    }
}

/// Class library errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassError {
    /// A class was defined twice
    #[error("class '{0}' is already defined")]
    Duplicate(String),

    /// A class names a superclass that does not exist
    #[error("class '{class}' has unknown superclass '{superclass}'")]
    UnknownSuperclass {
        /// Class being defined
        class: String,
        /// Missing superclass
        superclass: String,
    },

    /// An extension or lookup names a class that does not exist
    #[error("unknown class '{0}'")]
    UnknownClass(String),

    /// Interning failed
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    /// Allocating the class object failed
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Every known class, by name.
#[derive(Debug, Default)]
pub struct ClassLibrary {
    classes: FxHashMap<Symbol, ClassDef>,
    order: Vec<Symbol>,
    class_variable_values: Vec<Slot>,
}

impl ClassLibrary {
    /// Create a library holding the core classes.
    pub fn bootstrap(symbols: &SymbolTable, heap: &mut Heap) -> Result<Self, ClassError> {
        let mut library = ClassLibrary::default();
        for (name, superclass) in CORE_CLASSES {
            library.define_class(symbols, heap, name, *superclass)?;
        }
        log::debug!("bootstrapped class library with {} classes", library.len());
        Ok(library)
    }

    /// Add a new class.
    pub fn define_class(
        &mut self,
        symbols: &SymbolTable,
        heap: &mut Heap,
        name: &str,
        superclass: Option<&str>,
    ) -> Result<Symbol, ClassError> {
        let symbol = symbols.intern(name)?;
        if self.classes.contains_key(&symbol) {
            return Err(ClassError::Duplicate(name.to_string()));
        }
        let superclass = match superclass {
            Some(superclass) => {
                let super_symbol = symbols.intern(superclass)?;
                if !self.classes.contains_key(&super_symbol) {
                    return Err(ClassError::UnknownSuperclass {
                        class: name.to_string(),
                        superclass: superclass.to_string(),
                    });
                }
                Some(super_symbol)
            }
            None => None,
        };
        let object = heap.allocate(HeapObject::Class(symbol))?;
        self.classes.insert(
            symbol,
            ClassDef {
                name: symbol,
                superclass,
                instance_variables: Vec::new(),
                class_variables: Vec::new(),
                constants: Vec::new(),
                methods: Vec::new(),
                object,
            },
        );
        self.order.push(symbol);
        Ok(symbol)
    }

    /// Look up a class.
    pub fn class(&self, name: Symbol) -> Option<&ClassDef> {
        self.classes.get(&name)
    }

    /// Look up a class for modification.
    pub fn class_mut(&mut self, name: Symbol) -> Option<&mut ClassDef> {
        self.classes.get_mut(&name)
    }

    /// True if `name` names a class.
    pub fn contains(&self, name: Symbol) -> bool {
        self.classes.contains_key(&name)
    }

    /// Classes in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassDef> {
        self.order.iter().filter_map(move |name| self.classes.get(name))
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the library holds no classes.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `name` followed by each of its superclasses.
    pub fn superclass_chain(&self, name: Symbol) -> Vec<&ClassDef> {
        let mut chain = Vec::new();
        let mut next = self.classes.get(&name);
        while let Some(class) = next {
            chain.push(class);
            next = class.superclass.and_then(|s| self.classes.get(&s));
        }
        chain
    }

    /// Every instance variable of `name`, superclass variables first.
    pub fn all_instance_variables(&self, name: Symbol) -> Vec<Symbol> {
        self.superclass_chain(name)
            .into_iter()
            .rev()
            .flat_map(|class| class.instance_variables.iter().copied())
            .collect()
    }

    /// Slot index of instance variable `variable` in objects of class `name`.
    pub fn find_instance_variable(&self, name: Symbol, variable: Symbol) -> Option<usize> {
        self.all_instance_variables(name)
            .iter()
            .rposition(|v| *v == variable)
    }

    /// Global index of class variable `variable`, searching the superclass chain.
    pub fn find_class_variable(&self, name: Symbol, variable: Symbol) -> Option<usize> {
        self.superclass_chain(name).into_iter().find_map(|class| {
            class
                .class_variables
                .iter()
                .find(|(v, _)| *v == variable)
                .map(|(_, index)| *index)
        })
    }

    /// Value of constant `constant`, searching the superclass chain.
    pub fn find_constant(&self, name: Symbol, constant: Symbol) -> Option<Slot> {
        self.superclass_chain(name).into_iter().find_map(|class| {
            class
                .constants
                .iter()
                .find(|(c, _)| *c == constant)
                .map(|(_, value)| *value)
        })
    }

    /// Declare an instance variable on `name`.
    pub fn add_instance_variable(&mut self, name: Symbol, variable: Symbol) -> Result<(), ClassError> {
        let class = self.require_mut(name)?;
        class.instance_variables.push(variable);
        Ok(())
    }

    /// Declare a class variable on `name`, returning its global index.
    pub fn add_class_variable(
        &mut self,
        name: Symbol,
        variable: Symbol,
        initial_value: Slot,
    ) -> Result<usize, ClassError> {
        let index = self.class_variable_values.len();
        let class = self.require_mut(name)?;
        class.class_variables.push((variable, index));
        self.class_variable_values.push(initial_value);
        Ok(index)
    }

    /// Declare a constant on `name`.
    pub fn add_constant(&mut self, name: Symbol, constant: Symbol, value: Slot) -> Result<(), ClassError> {
        let class = self.require_mut(name)?;
        class.constants.push((constant, value));
        Ok(())
    }

    /// Register `method` on `name`, replacing a method with the same selector and kind.
    pub fn add_method(&mut self, name: Symbol, method: MethodDef) -> Result<(), ClassError> {
        let class = self.require_mut(name)?;
        match class
            .methods
            .iter_mut()
            .find(|m| m.selector == method.selector && m.is_class_method == method.is_class_method)
        {
            Some(existing) => *existing = method,
            None => class.methods.push(method),
        }
        Ok(())
    }

    /// Initial values of every class variable, by global index.
    pub fn class_variable_values(&self) -> &[Slot] {
        &self.class_variable_values
    }

    fn require_mut(&mut self, name: Symbol) -> Result<&mut ClassDef, ClassError> {
        self.classes
            .get_mut(&name)
            .ok_or_else(|| ClassError::UnknownClass(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> (SymbolTable, Heap, ClassLibrary) {
        let symbols = SymbolTable::new();
        let mut heap = Heap::new();
        let library = ClassLibrary::bootstrap(&symbols, &mut heap).unwrap();
        (symbols, heap, library)
    }

    #[test]
    fn test_bootstrap_core_classes() {
        let (symbols, _, library) = library();
        let array = symbols.intern("Array").unwrap();
        let object = symbols.intern("Object").unwrap();
        assert!(library.contains(array));
        assert_eq!(library.class(array).unwrap().superclass, Some(object));
        assert_eq!(library.superclass_chain(array).len(), 2);
    }

    #[test]
    fn test_unknown_superclass() {
        let (symbols, mut heap, mut library) = library();
        let err = library
            .define_class(&symbols, &mut heap, "Foo", Some("Missing"))
            .unwrap_err();
        assert!(matches!(err, ClassError::UnknownSuperclass { .. }));
        let err = library.define_class(&symbols, &mut heap, "Array", Some("Object")).unwrap_err();
        assert_eq!(err, ClassError::Duplicate("Array".to_string()));
    }

    #[test]
    fn test_variable_lookup_walks_superclasses() {
        let (symbols, mut heap, mut library) = library();
        let base = library.define_class(&symbols, &mut heap, "Base", Some("Object")).unwrap();
        let derived = library.define_class(&symbols, &mut heap, "Derived", Some("Base")).unwrap();
        let a = symbols.intern("a").unwrap();
        let b = symbols.intern("b").unwrap();
        let shared = symbols.intern("shared").unwrap();
        let limit = symbols.intern("limit").unwrap();

        library.add_instance_variable(base, a).unwrap();
        library.add_instance_variable(derived, b).unwrap();
        let object = symbols.intern("Object").unwrap();
        let root = symbols.intern("root").unwrap();
        library.add_class_variable(object, root, Slot::NIL).unwrap();
        library.add_class_variable(base, shared, Slot::make_int32(3)).unwrap();
        library.add_constant(base, limit, Slot::make_int32(10)).unwrap();

        assert_eq!(library.find_instance_variable(derived, a), Some(0));
        assert_eq!(library.find_instance_variable(derived, b), Some(1));
        assert_eq!(library.find_instance_variable(base, b), None);
        assert_eq!(library.find_class_variable(derived, shared), Some(1));
        assert_eq!(library.find_constant(derived, limit), Some(Slot::make_int32(10)));
        assert_eq!(library.class_variable_values()[1], Slot::make_int32(3));
    }

    #[test]
    fn test_add_method_replaces_same_selector() {
        let (symbols, _, mut library) = library();
        let object = symbols.intern("Object").unwrap();
        let selector = symbols.intern("foo").unwrap();
        let method = |primitive| MethodDef {
            selector,
            is_class_method: false,
            primitive,
            function: None,
        };
        library.add_method(object, method(None)).unwrap();
        library.add_method(object, method(Some(selector))).unwrap();
        let class = library.class(object).unwrap();
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.method(selector, false).unwrap().primitive, Some(selector));
    }
}
