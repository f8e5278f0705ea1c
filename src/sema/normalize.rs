// src/sema/normalize.rs
//
// Canonicalizes a type into disjoint components for coverage and indexing
// decisions. Results are memoized per arena; the recursion bound reports
// back as None and the caller emits NormalizationTooComplex.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::smallvec;

use crate::sema::arena::{BuiltinTypes, TypeArena};
use crate::sema::types::{PrimitiveKind, SingletonValue, Type, TypeId, TypeIdVec, follow};

const NORMALIZE_RECURSION_LIMIT: u32 = 100;

/// The string component: either all strings (minus finitely many excluded
/// singletons) or a finite set of singletons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedStrings {
    pub all: bool,
    pub singletons: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
}

impl NormalizedStrings {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn all_strings() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn is_never(&self) -> bool {
        !self.all && self.singletons.is_empty()
    }

    fn union_with(&mut self, other: &NormalizedStrings) {
        if other.all {
            self.all = true;
            self.excluded = self
                .excluded
                .intersection(&other.excluded)
                .cloned()
                .collect();
            self.singletons.clear();
        } else if !self.all {
            self.singletons.extend(other.singletons.iter().cloned());
        } else {
            for s in &other.singletons {
                self.excluded.remove(s);
            }
        }
    }

    fn intersect_with(&self, other: &NormalizedStrings) -> NormalizedStrings {
        match (self.all, other.all) {
            (true, true) => NormalizedStrings {
                all: true,
                singletons: BTreeSet::new(),
                excluded: self.excluded.union(&other.excluded).cloned().collect(),
            },
            (true, false) => NormalizedStrings {
                all: false,
                singletons: other
                    .singletons
                    .iter()
                    .filter(|s| !self.excluded.contains(*s))
                    .cloned()
                    .collect(),
                excluded: BTreeSet::new(),
            },
            (false, true) => other.intersect_with(self),
            (false, false) => NormalizedStrings {
                all: false,
                singletons: self
                    .singletons
                    .intersection(&other.singletons)
                    .cloned()
                    .collect(),
                excluded: BTreeSet::new(),
            },
        }
    }
}

/// The function component: the top `function` type or a list of parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedFunctions {
    pub is_top: bool,
    pub parts: Vec<TypeId>,
}

impl NormalizedFunctions {
    pub fn is_never(&self) -> bool {
        !self.is_top && self.parts.is_empty()
    }
}

/// A type decomposed into disjoint components. Component fields that hold a
/// TypeId are either `never` or the id of the component's type.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedType {
    pub tops: TypeId,
    pub booleans: TypeId,
    pub numbers: TypeId,
    pub strings: NormalizedStrings,
    pub threads: TypeId,
    pub errors: TypeId,
    pub nils: TypeId,
    pub classes: Vec<TypeId>,
    pub tables: Vec<TypeId>,
    pub functions: NormalizedFunctions,
    /// Free, generic, blocked, and other opaque type variables
    pub tyvars: Vec<TypeId>,
}

impl NormalizedType {
    pub fn never(builtins: &BuiltinTypes) -> Self {
        Self {
            tops: builtins.never_type,
            booleans: builtins.never_type,
            numbers: builtins.never_type,
            strings: NormalizedStrings::never(),
            threads: builtins.never_type,
            errors: builtins.never_type,
            nils: builtins.never_type,
            classes: Vec::new(),
            tables: Vec::new(),
            functions: NormalizedFunctions::default(),
            tyvars: Vec::new(),
        }
    }

    pub fn has_functions(&self) -> bool {
        !self.functions.is_never()
    }

    pub fn has_tops(&self, builtins: &BuiltinTypes) -> bool {
        self.tops != builtins.never_type
    }

    /// Exactly the primitive `number` and nothing else
    pub fn is_exactly_number(&self, builtins: &BuiltinTypes) -> bool {
        self.numbers == builtins.number_type && self.only_component_is(builtins, Component::Numbers)
    }

    /// Inhabited only by strings
    pub fn is_subtype_of_string(&self, builtins: &BuiltinTypes) -> bool {
        !self.strings.is_never() && self.only_component_is(builtins, Component::Strings)
    }

    pub fn is_inhabited(&self, builtins: &BuiltinTypes) -> bool {
        self.tops != builtins.never_type
            || self.booleans != builtins.never_type
            || self.numbers != builtins.never_type
            || !self.strings.is_never()
            || self.threads != builtins.never_type
            || self.errors != builtins.never_type
            || self.nils != builtins.never_type
            || !self.classes.is_empty()
            || !self.tables.is_empty()
            || !self.functions.is_never()
            || !self.tyvars.is_empty()
    }

    fn only_component_is(&self, builtins: &BuiltinTypes, which: Component) -> bool {
        let never = builtins.never_type;
        self.tops == never
            && (self.booleans == never)
            && (self.numbers == never || which == Component::Numbers)
            && (self.strings.is_never() || which == Component::Strings)
            && self.threads == never
            && self.errors == never
            && self.nils == never
            && self.classes.is_empty()
            && self.tables.is_empty()
            && self.functions.is_never()
            && self.tyvars.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Numbers,
    Strings,
}

/// Memoizing normalizer. One instance per checked module; the cache is keyed
/// on followed type ids within that module's arena.
#[derive(Debug, Default)]
pub struct Normalizer {
    cache: FxHashMap<TypeId, Arc<NormalizedType>>,
    inhabited_cache: FxHashMap<TypeId, bool>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(
        &mut self,
        arena: &TypeArena,
        builtins: &BuiltinTypes,
        ty: TypeId,
    ) -> Option<Arc<NormalizedType>> {
        let ty = follow(arena, ty);
        if let Some(cached) = self.cache.get(&ty) {
            return Some(cached.clone());
        }

        let norm = Arc::new(self.normalize_inner(arena, builtins, ty, 0)?);
        self.cache.insert(ty, norm.clone());
        Some(norm)
    }

    /// Whether a type has at least one value
    pub fn is_inhabited(&mut self, arena: &TypeArena, builtins: &BuiltinTypes, ty: TypeId) -> bool {
        let ty = follow(arena, ty);
        if let Some(&cached) = self.inhabited_cache.get(&ty) {
            return cached;
        }
        // Unprovable either way counts as inhabited.
        let result = match self.normalize(arena, builtins, ty) {
            Some(norm) => norm.is_inhabited(builtins),
            None => true,
        };
        self.inhabited_cache.insert(ty, result);
        result
    }

    /// Whether `left & right` has at least one value. Used to decide if
    /// equality between metatable-differing operands is meaningful.
    pub fn is_intersection_inhabited(
        &mut self,
        arena: &TypeArena,
        builtins: &BuiltinTypes,
        left: TypeId,
        right: TypeId,
    ) -> bool {
        let (Some(left), Some(right)) = (
            self.normalize(arena, builtins, left),
            self.normalize(arena, builtins, right),
        ) else {
            return true;
        };
        intersect(arena, builtins, &left, &right).is_inhabited(builtins)
    }

    fn normalize_inner(
        &mut self,
        arena: &TypeArena,
        builtins: &BuiltinTypes,
        ty: TypeId,
        depth: u32,
    ) -> Option<NormalizedType> {
        if depth > NORMALIZE_RECURSION_LIMIT {
            return None;
        }

        let ty = follow(arena, ty);
        let mut norm = NormalizedType::never(builtins);

        match arena.get(ty) {
            Type::Any => norm.tops = builtins.any_type,
            Type::Unknown => norm.tops = builtins.unknown_type,
            Type::Never => {}
            Type::Error => norm.errors = builtins.error_type,
            Type::Primitive(PrimitiveKind::Nil) => norm.nils = builtins.nil_type,
            Type::Primitive(PrimitiveKind::Boolean) => norm.booleans = builtins.boolean_type,
            Type::Primitive(PrimitiveKind::Number) => norm.numbers = builtins.number_type,
            Type::Primitive(PrimitiveKind::String) => {
                norm.strings = NormalizedStrings::all_strings()
            }
            Type::Primitive(PrimitiveKind::Thread) => norm.threads = builtins.thread_type,
            Type::Primitive(PrimitiveKind::Function) => norm.functions.is_top = true,
            Type::Primitive(PrimitiveKind::Table) => norm.tables.push(builtins.table_type),
            Type::Singleton(SingletonValue::Bool(true)) => norm.booleans = builtins.true_type,
            Type::Singleton(SingletonValue::Bool(false)) => norm.booleans = builtins.false_type,
            Type::Singleton(SingletonValue::Str(value)) => {
                norm.strings.singletons.insert(value.clone());
            }
            Type::Class(_) => norm.classes.push(ty),
            Type::Table(_) | Type::Metatable { .. } => norm.tables.push(ty),
            Type::Function(_) => norm.functions.parts.push(ty),
            Type::Negation(inner) => {
                let inner = follow(arena, *inner);
                match arena.get(inner) {
                    Type::Singleton(SingletonValue::Str(value)) => {
                        norm.strings = NormalizedStrings {
                            all: true,
                            singletons: BTreeSet::new(),
                            excluded: BTreeSet::from([value.clone()]),
                        };
                    }
                    // Other negations stay opaque
                    _ => norm.tyvars.push(ty),
                }
            }
            Type::Lazy(lazy) => match lazy.unwrapped {
                Some(unwrapped) => {
                    return self.normalize_inner(arena, builtins, unwrapped, depth + 1);
                }
                None => norm.tyvars.push(ty),
            },
            Type::Free { .. }
            | Type::Generic { .. }
            | Type::Blocked { .. }
            | Type::PendingExpansion(_)
            | Type::FamilyInstance(_) => norm.tyvars.push(ty),
            Type::Bound(_) => unreachable!("followed above"),
            Type::Union(options) => {
                let options = options.clone();
                for option in options {
                    let part = self.normalize_inner(arena, builtins, option, depth + 1)?;
                    union_in_place(builtins, &mut norm, &part);
                }
            }
            Type::Intersection(parts) => {
                let parts = parts.clone();
                let mut iter = parts.into_iter();
                let Some(first) = iter.next() else {
                    return Some(norm);
                };
                let mut acc = self.normalize_inner(arena, builtins, first, depth + 1)?;
                for part in iter {
                    let next = self.normalize_inner(arena, builtins, part, depth + 1)?;
                    acc = intersect(arena, builtins, &acc, &next);
                }
                norm = acc;
            }
        }

        Some(norm)
    }
}

/// Fold one normalized type into another, component-wise union.
fn union_in_place(builtins: &BuiltinTypes, acc: &mut NormalizedType, other: &NormalizedType) {
    // Any absorbs the union; unknown absorbs everything but any.
    if acc.tops == builtins.any_type || other.tops == builtins.any_type {
        *acc = NormalizedType::never(builtins);
        acc.tops = builtins.any_type;
        return;
    }
    if other.tops == builtins.unknown_type {
        *acc = NormalizedType::never(builtins);
        acc.tops = builtins.unknown_type;
        return;
    }
    if acc.tops == builtins.unknown_type {
        return;
    }

    acc.booleans = union_booleans(builtins, acc.booleans, other.booleans);
    acc.numbers = union_flat(builtins, acc.numbers, other.numbers);
    acc.strings.union_with(&other.strings);
    acc.threads = union_flat(builtins, acc.threads, other.threads);
    acc.errors = union_flat(builtins, acc.errors, other.errors);
    acc.nils = union_flat(builtins, acc.nils, other.nils);
    for &class in &other.classes {
        if !acc.classes.contains(&class) {
            acc.classes.push(class);
        }
    }
    for &table in &other.tables {
        if !acc.tables.contains(&table) {
            acc.tables.push(table);
        }
    }
    if other.functions.is_top {
        acc.functions.is_top = true;
        acc.functions.parts.clear();
    } else if !acc.functions.is_top {
        for &part in &other.functions.parts {
            if !acc.functions.parts.contains(&part) {
                acc.functions.parts.push(part);
            }
        }
    }
    for &var in &other.tyvars {
        if !acc.tyvars.contains(&var) {
            acc.tyvars.push(var);
        }
    }
}

fn union_flat(builtins: &BuiltinTypes, a: TypeId, b: TypeId) -> TypeId {
    if a == builtins.never_type { b } else { a }
}

fn union_booleans(builtins: &BuiltinTypes, a: TypeId, b: TypeId) -> TypeId {
    if a == builtins.never_type {
        b
    } else if b == builtins.never_type || a == b {
        a
    } else {
        // true | false, or singleton | boolean
        builtins.boolean_type
    }
}

/// Component-wise intersection of two normalized types.
pub fn intersect(
    arena: &TypeArena,
    builtins: &BuiltinTypes,
    a: &NormalizedType,
    b: &NormalizedType,
) -> NormalizedType {
    // Tops absorb in the other direction: unknown & X = X, any & X = X
    // under gradual rules.
    if a.tops != builtins.never_type {
        return b.clone();
    }
    if b.tops != builtins.never_type {
        return a.clone();
    }

    let mut out = NormalizedType::never(builtins);
    out.booleans = intersect_booleans(builtins, a.booleans, b.booleans);
    out.numbers = intersect_flat(builtins, a.numbers, b.numbers);
    out.strings = a.strings.intersect_with(&b.strings);
    out.threads = intersect_flat(builtins, a.threads, b.threads);
    out.errors = intersect_flat(builtins, a.errors, b.errors);
    out.nils = intersect_flat(builtins, a.nils, b.nils);

    for &class in &a.classes {
        if b.classes
            .iter()
            .any(|&other| classes_overlap(arena, class, other))
        {
            out.classes.push(class);
        }
    }

    // Table-with-table intersections stay inhabited as overload-style parts;
    // tables against anything else drop out component-wise.
    if !a.tables.is_empty() && !b.tables.is_empty() {
        out.tables.extend(a.tables.iter().copied());
        for &t in &b.tables {
            if !out.tables.contains(&t) {
                out.tables.push(t);
            }
        }
    }

    if a.functions.is_top {
        out.functions = b.functions.clone();
    } else if b.functions.is_top {
        out.functions = a.functions.clone();
    } else if !a.functions.is_never() && !b.functions.is_never() {
        out.functions.parts.extend(a.functions.parts.iter().copied());
        for &part in &b.functions.parts {
            if !out.functions.parts.contains(&part) {
                out.functions.parts.push(part);
            }
        }
    }

    // A tyvar constrains but does not empty the intersection.
    if !a.tyvars.is_empty() || !b.tyvars.is_empty() {
        out.tyvars.extend(a.tyvars.iter().copied());
        for &var in &b.tyvars {
            if !out.tyvars.contains(&var) {
                out.tyvars.push(var);
            }
        }
        if !a.is_inhabited(builtins) || !b.is_inhabited(builtins) {
            out.tyvars.clear();
        }
    }

    out
}

fn intersect_flat(builtins: &BuiltinTypes, a: TypeId, b: TypeId) -> TypeId {
    if a == b { a } else { builtins.never_type }
}

fn intersect_booleans(builtins: &BuiltinTypes, a: TypeId, b: TypeId) -> TypeId {
    if a == b {
        a
    } else if a == builtins.boolean_type {
        b
    } else if b == builtins.boolean_type {
        a
    } else {
        builtins.never_type
    }
}

/// Nominal overlap through either parent chain
fn classes_overlap(arena: &TypeArena, a: TypeId, b: TypeId) -> bool {
    if a == b {
        return true;
    }
    let (Type::Class(ca), Type::Class(cb)) = (arena.get(a), arena.get(b)) else {
        return false;
    };
    is_ancestor_name(arena, ca, &cb.name) || is_ancestor_name(arena, cb, &ca.name)
}

fn is_ancestor_name(arena: &TypeArena, class: &crate::sema::types::ClassType, name: &str) -> bool {
    if class.name == name {
        return true;
    }
    let mut cur = class.parent;
    while let Some(parent) = cur {
        match arena.get(follow(arena, parent)) {
            Type::Class(parent_class) => {
                if parent_class.name == name {
                    return true;
                }
                cur = parent_class.parent;
            }
            _ => return false,
        }
    }
    false
}

/// Rebuild an ordinary type from a normalized one.
pub fn type_from_normal(
    arena: &mut TypeArena,
    builtins: &BuiltinTypes,
    norm: &NormalizedType,
) -> TypeId {
    if norm.tops != builtins.never_type {
        return norm.tops;
    }

    let mut parts: TypeIdVec = smallvec![];
    if norm.booleans != builtins.never_type {
        parts.push(norm.booleans);
    }
    if norm.numbers != builtins.never_type {
        parts.push(norm.numbers);
    }
    if norm.strings.all {
        parts.push(builtins.string_type);
    } else {
        for singleton in &norm.strings.singletons {
            parts.push(arena.add_type(Type::Singleton(SingletonValue::Str(singleton.clone()))));
        }
    }
    if norm.threads != builtins.never_type {
        parts.push(norm.threads);
    }
    if norm.errors != builtins.never_type {
        parts.push(norm.errors);
    }
    if norm.nils != builtins.never_type {
        parts.push(norm.nils);
    }
    parts.extend(norm.classes.iter().copied());
    parts.extend(norm.tables.iter().copied());
    if norm.functions.is_top {
        parts.push(builtins.function_type);
    } else {
        match norm.functions.parts.len() {
            0 => {}
            1 => parts.push(norm.functions.parts[0]),
            _ => {
                let fn_parts: TypeIdVec = norm.functions.parts.iter().copied().collect();
                parts.push(arena.intersection(fn_parts));
            }
        }
    }
    parts.extend(norm.tyvars.iter().copied());

    match parts.len() {
        0 => builtins.never_type,
        1 => parts[0],
        _ => arena.union(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_singletons_covers_boolean() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let both = arena.union(smallvec![builtins.true_type, builtins.false_type]);
        let norm = normalizer.normalize(&arena, &builtins, both).unwrap();
        assert_eq!(norm.booleans, builtins.boolean_type);
    }

    #[test]
    fn union_with_any_is_any() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let u = arena.union(smallvec![builtins.number_type, builtins.any_type]);
        let norm = normalizer.normalize(&arena, &builtins, u).unwrap();
        assert_eq!(norm.tops, builtins.any_type);
        assert_eq!(norm.numbers, builtins.never_type);
    }

    #[test]
    fn never_members_are_absorbed() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let u = arena.union(smallvec![builtins.number_type, builtins.never_type]);
        let norm = normalizer.normalize(&arena, &builtins, u).unwrap();
        assert!(norm.is_exactly_number(&builtins));
    }

    #[test]
    fn nested_unions_flatten() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let inner = arena.union(smallvec![builtins.string_type, builtins.nil_type]);
        let outer = arena.union(smallvec![builtins.number_type, inner]);
        let norm = normalizer.normalize(&arena, &builtins, outer).unwrap();
        assert_eq!(norm.numbers, builtins.number_type);
        assert!(norm.strings.all);
        assert_eq!(norm.nils, builtins.nil_type);
    }

    #[test]
    fn number_string_intersection_is_uninhabited() {
        let arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        assert!(!normalizer.is_intersection_inhabited(
            &arena,
            &builtins,
            builtins.number_type,
            builtins.string_type
        ));
        assert!(normalizer.is_intersection_inhabited(
            &arena,
            &builtins,
            builtins.number_type,
            builtins.number_type
        ));
    }

    #[test]
    fn singleton_strings_intersect_finitely() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let lit = arena.add_type(Type::Singleton(SingletonValue::Str("hi".into())));
        assert!(normalizer.is_intersection_inhabited(&arena, &builtins, lit, builtins.string_type));

        let other = arena.add_type(Type::Singleton(SingletonValue::Str("bye".into())));
        assert!(!normalizer.is_intersection_inhabited(&arena, &builtins, lit, other));
    }

    #[test]
    fn round_trips_on_the_normalized_lattice() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let u = arena.union(smallvec![
            builtins.number_type,
            builtins.string_type,
            builtins.nil_type
        ]);
        let norm = normalizer.normalize(&arena, &builtins, u).unwrap();
        let rebuilt = type_from_normal(&mut arena, &builtins, &norm);
        let norm2 = normalizer.normalize(&arena, &builtins, rebuilt).unwrap();
        assert_eq!(*norm, *norm2);
    }

    #[test]
    fn subtype_of_string_queries() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let mut normalizer = Normalizer::new();

        let lit = arena.add_type(Type::Singleton(SingletonValue::Str("a".into())));
        let norm = normalizer.normalize(&arena, &builtins, lit).unwrap();
        assert!(norm.is_subtype_of_string(&builtins));
        assert!(!norm.is_exactly_number(&builtins));

        let norm = normalizer
            .normalize(&arena, &builtins, builtins.number_type)
            .unwrap();
        assert!(norm.is_exactly_number(&builtins));
    }
}
