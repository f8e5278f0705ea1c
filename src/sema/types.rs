// src/sema/types.rs
//
// Tagged type and type-pack variants stored in a TypeArena. TypeId/TypePackId
// are u32 handles with O(1) equality; all graph edges are handles back into
// the owning arena. Unification rewrites nodes through the transaction log,
// so there is no structural dedup here: identity is allocation identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::errors::ModuleName;
use crate::sema::arena::TypeArena;
use crate::syntax::span::Span;

/// Handle to a type node in a `TypeArena`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    /// Get the raw index (for debugging/serialization)
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Handle to a type-pack node in a `TypeArena`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypePackId(pub(crate) u32);

impl TypePackId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// SmallVec for type children - inline up to 4 (covers most unions and heads)
pub type TypeIdVec = SmallVec<[TypeId; 4]>;

/// Scope depth of a free variable. A free var at a deeper level must not
/// escape upward through a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeLevel {
    pub level: u32,
    pub sub_level: u32,
}

impl TypeLevel {
    pub fn new(level: u32, sub_level: u32) -> Self {
        Self { level, sub_level }
    }

    /// True when a variable at `self` may safely hold types from `other`
    pub fn subsumes(self, other: TypeLevel) -> bool {
        self.level < other.level || (self.level == other.level && self.sub_level <= other.sub_level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Nil,
    Boolean,
    Number,
    String,
    Thread,
    Function,
    Table,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Nil => "nil",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Number => "number",
            PrimitiveKind::String => "string",
            PrimitiveKind::Thread => "thread",
            PrimitiveKind::Function => "function",
            PrimitiveKind::Table => "table",
        }
    }
}

/// A literal type: `"hello"` or `true`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingletonValue {
    Bool(bool),
    Str(String),
}

impl SingletonValue {
    /// The primitive this singleton narrows
    pub fn parent_primitive(&self) -> PrimitiveKind {
        match self {
            SingletonValue::Bool(_) => PrimitiveKind::Boolean,
            SingletonValue::Str(_) => PrimitiveKind::String,
        }
    }
}

/// A table or class property. Read and write types are tracked separately;
/// a plain property has both set to the same type.
#[derive(Debug, Clone)]
pub struct Property {
    pub read_ty: Option<TypeId>,
    pub write_ty: Option<TypeId>,
    pub deprecated: bool,
    pub deprecated_suggestion: Option<String>,
    pub location: Option<Span>,
    pub tags: Vec<String>,
    pub documentation_symbol: Option<String>,
}

impl Property {
    /// A plain read/write property
    pub fn rw(ty: TypeId) -> Self {
        Self {
            read_ty: Some(ty),
            write_ty: Some(ty),
            deprecated: false,
            deprecated_suggestion: None,
            location: None,
            tags: Vec::new(),
            documentation_symbol: None,
        }
    }

    pub fn read_only(ty: TypeId) -> Self {
        Self {
            write_ty: None,
            ..Self::rw(ty)
        }
    }

    /// The type seen by a read; falls back to the write type for write-only props
    pub fn ty(&self) -> Option<TypeId> {
        self.read_ty.or(self.write_ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableIndexer {
    pub key_ty: TypeId,
    pub value_ty: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Result of inference on an unannotated table; may still grow
    Free,
    /// Literal table under construction; property addition permitted
    Unsealed,
    /// Fully known shape; width subtyping applies when it is the supertype
    Sealed,
    /// Quantified away inside a generic function signature
    Generic,
}

#[derive(Debug, Clone)]
pub struct FunctionType {
    pub generics: Vec<TypeId>,
    pub generic_packs: Vec<TypePackId>,
    pub arg_types: TypePackId,
    pub arg_names: Vec<Option<String>>,
    pub ret_types: TypePackId,
    pub has_self: bool,
    pub tags: Vec<String>,
    pub has_no_free_or_generic_types: bool,
    pub definition: Option<Span>,
}

impl FunctionType {
    pub fn new(arg_types: TypePackId, ret_types: TypePackId) -> Self {
        Self {
            generics: Vec::new(),
            generic_packs: Vec::new(),
            arg_types,
            arg_names: Vec::new(),
            ret_types,
            has_self: false,
            tags: Vec::new(),
            has_no_free_or_generic_types: false,
            definition: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableType {
    pub props: BTreeMap<String, Property>,
    pub indexer: Option<TableIndexer>,
    pub state: TableState,
    pub level: TypeLevel,
    /// Set when unification decided this table is another one; `follow`
    /// treats it like a `Bound` edge
    pub bound_to: Option<TypeId>,
    pub instantiated_type_params: Vec<TypeId>,
    pub instantiated_type_pack_params: Vec<TypePackId>,
    pub definition_module: Option<ModuleName>,
    pub definition_span: Option<Span>,
    pub tags: Vec<String>,
}

impl Default for TableState {
    fn default() -> Self {
        TableState::Unsealed
    }
}

impl TableType {
    pub fn sealed() -> Self {
        Self {
            state: TableState::Sealed,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassType {
    pub name: String,
    pub props: BTreeMap<String, Property>,
    pub parent: Option<TypeId>,
    pub metatable: Option<TypeId>,
    pub indexer: Option<TableIndexer>,
    pub tags: Vec<String>,
    pub definition_module: ModuleName,
}

impl ClassType {
    pub fn new(name: impl Into<String>, definition_module: impl Into<ModuleName>) -> Self {
        Self {
            name: name.into(),
            props: BTreeMap::new(),
            parent: None,
            metatable: None,
            indexer: None,
            tags: Vec::new(),
            definition_module: definition_module.into(),
        }
    }
}

/// An uninstantiated type-level function application. Two instances are
/// equivalent iff the family name and all followed argument identities match.
#[derive(Debug, Clone)]
pub struct TypeFamilyInstance {
    pub family: String,
    pub type_args: Vec<TypeId>,
    pub pack_args: Vec<TypePackId>,
}

impl TypeFamilyInstance {
    pub fn equivalent(&self, other: &TypeFamilyInstance, arena: &TypeArena) -> bool {
        if self.family != other.family
            || self.type_args.len() != other.type_args.len()
            || self.pack_args.len() != other.pack_args.len()
        {
            return false;
        }
        let types_match = self
            .type_args
            .iter()
            .zip(&other.type_args)
            .all(|(&a, &b)| follow(arena, a) == follow(arena, b));
        let packs_match = self
            .pack_args
            .iter()
            .zip(&other.pack_args)
            .all(|(&a, &b)| follow_pack(arena, a) == follow_pack(arena, b));
        types_match && packs_match
    }
}

/// One-shot memoized type computation
#[derive(Clone)]
pub struct LazyType {
    pub thunk: Arc<dyn Fn(&mut TypeArena) -> TypeId + Send + Sync>,
    pub unwrapped: Option<TypeId>,
}

impl fmt::Debug for LazyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyType")
            .field("unwrapped", &self.unwrapped)
            .finish_non_exhaustive()
    }
}

/// An unresolved type-alias application awaiting expansion
#[derive(Debug, Clone)]
pub struct PendingExpansion {
    pub prefix: Option<String>,
    pub name: String,
    pub type_args: Vec<TypeId>,
    pub pack_args: Vec<TypePackId>,
}

#[derive(Debug, Clone)]
pub enum Type {
    /// An unresolved inference variable
    Free { level: TypeLevel },
    /// A universally-quantified variable
    Generic { name: String },
    /// Forwarding indirection written by unification
    Bound(TypeId),
    /// Placeholder awaiting a pending constraint
    Blocked { id: u32 },
    PendingExpansion(PendingExpansion),
    Primitive(PrimitiveKind),
    Singleton(SingletonValue),
    Function(FunctionType),
    Table(TableType),
    Metatable { table: TypeId, metatable: TypeId },
    Class(ClassType),
    Union(TypeIdVec),
    Intersection(TypeIdVec),
    Any,
    Unknown,
    Never,
    Error,
    Negation(TypeId),
    Lazy(LazyType),
    FamilyInstance(TypeFamilyInstance),
}

#[derive(Debug, Clone)]
pub enum TypePack {
    Free { level: TypeLevel },
    Generic { name: String },
    Bound(TypePackId),
    Error,
    Blocked { id: u32 },
    Variadic { ty: TypeId, hidden: bool },
    List { head: TypeIdVec, tail: Option<TypePackId> },
    FamilyInstance(TypeFamilyInstance),
}

/// A type alias definition: parameters plus the aliased type
#[derive(Debug, Clone)]
pub struct TypeFun {
    pub type_params: Vec<TypeFunParam>,
    pub type_pack_params: Vec<TypeFunPackParam>,
    pub ty: TypeId,
}

#[derive(Debug, Clone, Copy)]
pub struct TypeFunParam {
    pub ty: TypeId,
    pub default: Option<TypeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct TypeFunPackParam {
    pub tp: TypePackId,
    pub default: Option<TypePackId>,
}

impl TypeFun {
    pub fn monomorphic(ty: TypeId) -> Self {
        Self {
            type_params: Vec::new(),
            type_pack_params: Vec::new(),
            ty,
        }
    }
}

// Bound chains are short in practice; anything past this is a broken graph.
const FOLLOW_LIMIT: usize = 10_000;

/// Walk `Bound` indirections (and table `bound_to` edges) to the canonical
/// identity. All semantic comparisons happen on followed ids.
pub fn follow(arena: &TypeArena, ty: TypeId) -> TypeId {
    let mut cur = ty;
    for _ in 0..FOLLOW_LIMIT {
        match arena.get(cur) {
            Type::Bound(next) => cur = *next,
            Type::Table(t) if t.bound_to.is_some() => cur = t.bound_to.unwrap(),
            _ => return cur,
        }
    }
    debug_assert!(false, "follow did not terminate; cyclic Bound chain");
    cur
}

pub fn follow_pack(arena: &TypeArena, tp: TypePackId) -> TypePackId {
    let mut cur = tp;
    for _ in 0..FOLLOW_LIMIT {
        match arena.get_pack(cur) {
            TypePack::Bound(next) => cur = *next,
            _ => return cur,
        }
    }
    debug_assert!(false, "follow_pack did not terminate; cyclic Bound chain");
    cur
}

/// Whether a union type has a `nil` option
pub fn is_optional(arena: &TypeArena, ty: TypeId) -> bool {
    let ty = follow(arena, ty);
    match arena.get(ty) {
        Type::Primitive(PrimitiveKind::Nil) => true,
        Type::Union(options) => options
            .iter()
            .any(|&opt| matches!(arena.get(follow(arena, opt)), Type::Primitive(PrimitiveKind::Nil))),
        _ => false,
    }
}

pub fn is_nil(arena: &TypeArena, ty: TypeId) -> bool {
    matches!(arena.get(follow(arena, ty)), Type::Primitive(PrimitiveKind::Nil))
}

/// Whether the followed type is `string` or a string singleton
pub fn is_string(arena: &TypeArena, ty: TypeId) -> bool {
    match arena.get(follow(arena, ty)) {
        Type::Primitive(PrimitiveKind::String) => true,
        Type::Singleton(SingletonValue::Str(_)) => true,
        _ => false,
    }
}

pub fn is_boolean(arena: &TypeArena, ty: TypeId) -> bool {
    match arena.get(follow(arena, ty)) {
        Type::Primitive(PrimitiveKind::Boolean) => true,
        Type::Singleton(SingletonValue::Bool(_)) => true,
        _ => false,
    }
}

/// The metatable attached to a type, if any. String primitives carry the
/// global string metatable, which the caller passes in.
pub fn get_metatable(
    arena: &TypeArena,
    ty: TypeId,
    string_metatable: Option<TypeId>,
) -> Option<TypeId> {
    match arena.get(follow(arena, ty)) {
        Type::Metatable { metatable, .. } => Some(*metatable),
        Type::Class(class) => class.metatable,
        Type::Primitive(PrimitiveKind::String) => string_metatable,
        Type::Singleton(SingletonValue::Str(_)) => string_metatable,
        _ => None,
    }
}

/// Walk a class's parent chain looking for a property
pub fn lookup_class_prop<'a>(
    arena: &'a TypeArena,
    class: &'a ClassType,
    name: &str,
) -> Option<&'a Property> {
    let mut cur = class;
    loop {
        if let Some(prop) = cur.props.get(name) {
            return Some(prop);
        }
        match cur.parent {
            Some(parent) => match arena.get(follow(arena, parent)) {
                Type::Class(parent_class) => cur = parent_class,
                _ => return None,
            },
            None => return None,
        }
    }
}
