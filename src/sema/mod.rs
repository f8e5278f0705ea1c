// src/sema/mod.rs
pub mod arena;
pub mod builtins;
pub mod clone;
pub mod normalize;
pub mod pack;
pub mod scope;
pub mod txn_log;
pub mod type_display;
pub mod types;
pub mod unify;

pub use arena::{BuiltinTypes, TypeArena};
pub use builtins::GlobalTypes;
pub use clone::{CloneState, clone_pack, clone_type};
pub use normalize::{NormalizedType, Normalizer};
pub use scope::{BindingKey, Scope, ScopeId, ScopeTree};
pub use txn_log::TxnLog;
pub use types::{
    ClassType, FunctionType, PrimitiveKind, Property, SingletonValue, TableIndexer, TableState,
    TableType, Type, TypeFamilyInstance, TypeFun, TypeId, TypeLevel, TypePack, TypePackId, follow,
    follow_pack,
};
pub use unify::{Unifier, Variance, is_subtype};
