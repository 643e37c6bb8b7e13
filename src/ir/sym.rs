//! Symbols: stack syms (registers) and property syms (fields)
//!
//! Every var stack sym may have type-specialized equivalents (an int32 copy, a float64
//! copy, SIMD copies). Values are always tracked on the var sym; a typed sym maps back
//! to its var sym through `var_equiv`.

use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol id, unique within a function across stack and property syms
pub type SymId = u32;

/// Interned property name id
pub type PropertyId = u32;

/// Machine representation of a register operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IrType {
    /// Boxed dynamic value
    #[default]
    Var,
    Int32,
    Float64,
    Simd128F4,
    Simd128I4,
}

impl IrType {
    /// Whether this is a specialized representation rather than the boxed var
    pub fn is_type_spec(self) -> bool {
        self != IrType::Var
    }

    /// Suffix marking a typed equivalent in dumps
    pub fn suffix(self) -> &'static str {
        match self {
            IrType::Var => "",
            IrType::Int32 => ".i32",
            IrType::Float64 => ".f64",
            IrType::Simd128F4 => ".f4",
            IrType::Simd128I4 => ".i4",
        }
    }
}

/// A register-like symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSym {
    pub id: SymId,
    pub name: String,
    pub ty: IrType,
    /// For typed syms, the var sym they are a copy of
    pub var_equiv: Option<SymId>,
    /// Visible to the interpreter; bailouts must restore it
    pub is_bytecode: bool,
    /// Defined exactly once (parameters, hoisted temporaries)
    pub is_single_def: bool,
}

/// A property of an object held in a stack sym
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySym {
    pub id: SymId,
    pub object: SymId,
    pub property_id: PropertyId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sym {
    Stack(StackSym),
    Property(PropertySym),
}

impl Sym {
    pub fn id(&self) -> SymId {
        match self {
            Sym::Stack(s) => s.id,
            Sym::Property(p) => p.id,
        }
    }
}

/// Well-known property names the optimizer treats specially
pub mod property_names {
    pub const LENGTH: &str = "length";
    pub const ARGUMENTS: &str = "arguments";
    pub const CALLER: &str = "caller";
    pub const VALUE_OF: &str = "valueOf";
    pub const TO_STRING: &str = "toString";
}

/// Symbol table for one function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymTable {
    syms: Vec<Sym>,
    property_names: Vec<String>,
    #[serde(skip)]
    property_ids: HashMap<String, PropertyId>,
    #[serde(skip)]
    typed: HashMap<(SymId, IrType), SymId>,
    #[serde(skip)]
    properties: HashMap<(SymId, PropertyId), SymId>,
    #[serde(skip)]
    object_types: HashMap<SymId, SymId>,
}

impl SymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild lookup indexes after deserialization
    pub fn rebuild_indexes(&mut self) {
        self.property_ids = self
            .property_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as PropertyId))
            .collect();
        self.typed.clear();
        self.properties.clear();
        self.object_types.clear();
        for sym in &self.syms {
            match sym {
                Sym::Stack(s) => {
                    if let Some(var) = s.var_equiv {
                        if s.ty == IrType::Var {
                            self.object_types.insert(var, s.id);
                        } else {
                            self.typed.insert((var, s.ty), s.id);
                        }
                    }
                }
                Sym::Property(p) => {
                    self.properties.insert((p.object, p.property_id), p.id);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    /// Any sym by id
    pub fn get(&self, id: SymId) -> Option<&Sym> {
        self.syms.get(id as usize)
    }

    /// The stack sym `id`, if it is one
    pub fn stack(&self, id: SymId) -> Option<&StackSym> {
        match self.syms.get(id as usize) {
            Some(Sym::Stack(s)) => Some(s),
            _ => None,
        }
    }

    /// The property sym `id`, if it is one
    pub fn property(&self, id: SymId) -> Option<&PropertySym> {
        match self.syms.get(id as usize) {
            Some(Sym::Property(p)) => Some(p),
            _ => None,
        }
    }

    pub fn is_property(&self, id: SymId) -> bool {
        matches!(self.syms.get(id as usize), Some(Sym::Property(_)))
    }

    /// Create a new var stack sym
    pub fn new_var(&mut self, name: impl Into<String>, is_bytecode: bool) -> SymId {
        let id = self.syms.len() as SymId;
        self.syms.push(Sym::Stack(StackSym {
            id,
            name: name.into(),
            ty: IrType::Var,
            var_equiv: None,
            is_bytecode,
            is_single_def: false,
        }));
        id
    }

    /// Create a compiler temporary of the given type
    pub fn new_temp(&mut self, ty: IrType) -> SymId {
        let id = self.syms.len() as SymId;
        self.syms.push(Sym::Stack(StackSym {
            id,
            name: format!("t{}", id),
            ty,
            var_equiv: None,
            is_bytecode: false,
            is_single_def: true,
        }));
        id
    }

    /// The typed copy of a var sym, created on first request
    pub fn typed_equiv(&mut self, var: SymId, ty: IrType) -> SymId {
        let var = self.var_equiv(var);
        if ty == IrType::Var {
            return var;
        }
        if let Some(&id) = self.typed.get(&(var, ty)) {
            return id;
        }
        let base_name = self
            .stack(var)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("s{}", var));
        let id = self.syms.len() as SymId;
        self.syms.push(Sym::Stack(StackSym {
            id,
            name: format!("{}{}", base_name, ty.suffix()),
            ty,
            var_equiv: Some(var),
            is_bytecode: false,
            is_single_def: false,
        }));
        self.typed.insert((var, ty), id);
        id
    }

    /// Look up a typed copy without creating one
    pub fn find_typed_equiv(&self, var: SymId, ty: IrType) -> Option<SymId> {
        if ty == IrType::Var {
            return Some(self.var_equiv(var));
        }
        self.typed.get(&(self.var_equiv(var), ty)).copied()
    }

    /// The var sym a (possibly typed) sym stands for
    pub fn var_equiv(&self, id: SymId) -> SymId {
        match self.stack(id) {
            Some(s) if s.ty != IrType::Var => s.var_equiv.unwrap_or(id),
            _ => id,
        }
    }

    /// Machine type of a stack sym; property syms are var
    pub fn sym_type(&self, id: SymId) -> IrType {
        self.stack(id).map(|s| s.ty).unwrap_or(IrType::Var)
    }

    /// Visible to the bytecode, so its value must be restored on bailout
    pub fn is_bytecode(&self, id: SymId) -> bool {
        self.stack(self.var_equiv(id))
            .map(|s| s.is_bytecode)
            .unwrap_or(false)
    }

    /// Name for dumps. Property syms print as `object.property`.
    pub fn name(&self, id: SymId) -> String {
        match self.syms.get(id as usize) {
            Some(Sym::Stack(s)) => s.name.clone(),
            Some(Sym::Property(p)) => format!(
                "{}.{}",
                self.name(p.object),
                self.property_name(p.property_id)
            ),
            None => format!("?{}", id),
        }
    }

    /// Id of a property name, adding the name if it is new
    pub fn intern_property(&mut self, name: &str) -> PropertyId {
        if let Some(&id) = self.property_ids.get(name) {
            return id;
        }
        let id = self.property_names.len() as PropertyId;
        self.property_names.push(name.to_string());
        self.property_ids.insert(name.to_string(), id);
        id
    }

    /// Id of a property name that has been interned
    pub fn property_id(&self, name: &str) -> Option<PropertyId> {
        self.property_ids.get(name).copied()
    }

    /// Name of an interned property
    pub fn property_name(&self, id: PropertyId) -> &str {
        self.property_names
            .get(id as usize)
            .map(|s| s.as_str())
            .unwrap_or("?")
    }

    /// The property sym for `object.name`, created on first request
    pub fn property_sym(&mut self, object: SymId, name: &str) -> SymId {
        let object = self.var_equiv(object);
        let property_id = self.intern_property(name);
        if let Some(&id) = self.properties.get(&(object, property_id)) {
            return id;
        }
        let id = self.syms.len() as SymId;
        self.syms.push(Sym::Property(PropertySym {
            id,
            object,
            property_id,
        }));
        self.properties.insert((object, property_id), id);
        id
    }

    /// All property syms of an object
    pub fn properties_of(&self, object: SymId) -> Vec<SymId> {
        let object = self.var_equiv(object);
        let mut props: Vec<SymId> = self
            .properties
            .iter()
            .filter(|((o, _), _)| *o == object)
            .map(|(_, &id)| id)
            .collect();
        props.sort_unstable();
        props
    }

    /// Property syms on any object that share a property name with `property`
    pub fn property_equiv_set(&self, property_id: PropertyId) -> Vec<SymId> {
        let mut props: Vec<SymId> = self
            .properties
            .iter()
            .filter(|((_, p), _)| *p == property_id)
            .map(|(_, &id)| id)
            .collect();
        props.sort_unstable();
        props
    }

    /// Property syms named `name` on any object
    pub fn property_equiv_set_by_name(&self, name: &str) -> Vec<SymId> {
        match self.property_id(name) {
            Some(id) => self.property_equiv_set(id),
            None => Vec::new(),
        }
    }

    /// The sym holding an object's type (shape), created on first request.
    /// Type syms are var stack syms whose `var_equiv` points at their object.
    pub fn object_type_sym(&mut self, object: SymId) -> SymId {
        let object = self.var_equiv(object);
        if let Some(&id) = self.object_types.get(&object) {
            return id;
        }
        let name = format!("{}.type", self.name(object));
        let id = self.syms.len() as SymId;
        self.syms.push(Sym::Stack(StackSym {
            id,
            name,
            ty: IrType::Var,
            var_equiv: Some(object),
            is_bytecode: false,
            is_single_def: false,
        }));
        self.object_types.insert(object, id);
        id
    }

    /// The sym tracking the shape of `object`, if one was created
    pub fn find_object_type_sym(&self, object: SymId) -> Option<SymId> {
        self.object_types.get(&self.var_equiv(object)).copied()
    }

    /// Syms that stand for an object's type rather than a value
    pub fn is_object_type_sym(&self, id: SymId) -> bool {
        match self.stack(id) {
            Some(s) => s.ty == IrType::Var && s.var_equiv.is_some(),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sym> {
        self.syms.iter()
    }
}

impl fmt::Display for SymTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sym in &self.syms {
            writeln!(f, "  s{} = {}", sym.id(), self.name(sym.id()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_equiv_is_stable() {
        let mut syms = SymTable::new();
        let x = syms.new_var("x", true);
        let x_i32 = syms.typed_equiv(x, IrType::Int32);
        assert_eq!(syms.typed_equiv(x, IrType::Int32), x_i32);
        assert_eq!(syms.var_equiv(x_i32), x);
        assert_eq!(syms.typed_equiv(x_i32, IrType::Float64), syms.typed_equiv(x, IrType::Float64));
        assert_eq!(syms.name(x_i32), "x.i32");
        assert!(syms.is_bytecode(x_i32));
    }

    #[test]
    fn test_property_equiv_set() {
        let mut syms = SymTable::new();
        let a = syms.new_var("a", true);
        let b = syms.new_var("b", true);
        let a_len = syms.property_sym(a, "length");
        let b_len = syms.property_sym(b, "length");
        let a_x = syms.property_sym(a, "x");
        assert_eq!(syms.property_equiv_set_by_name("length"), vec![a_len, b_len]);
        assert_eq!(syms.properties_of(a), vec![a_len, a_x]);
        assert_eq!(syms.name(a_x), "a.x");
    }

    #[test]
    fn test_object_type_sym() {
        let mut syms = SymTable::new();
        let o = syms.new_var("o", true);
        let t = syms.object_type_sym(o);
        assert_eq!(syms.object_type_sym(o), t);
        assert!(syms.is_object_type_sym(t));
        assert!(!syms.is_object_type_sym(o));
    }

    #[test]
    fn test_rebuild_indexes_after_round_trip() {
        let mut syms = SymTable::new();
        let o = syms.new_var("o", true);
        let x = syms.property_sym(o, "x");
        let json = serde_json::to_string(&syms).unwrap();
        let mut restored: SymTable = serde_json::from_str(&json).unwrap();
        restored.rebuild_indexes();
        assert_eq!(restored.property_sym(o, "x"), x);
    }
}
