// src/sema/scope.rs

use rustc_hash::{FxHashMap, FxHashSet};

use crate::sema::types::{TypeFun, TypeId, TypePackId};
use crate::syntax::ast::NodeId;
use crate::syntax::span::Span;

/// Handle to a scope within one module's `ScopeTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// What a scope binding is keyed on: a local's declaration site or a global's
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingKey {
    Local(NodeId),
    Global(String),
}

#[derive(Debug, Default, Clone)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub bindings: FxHashMap<BindingKey, TypeId>,
    pub type_aliases: FxHashMap<String, TypeFun>,
    pub pack_aliases: FxHashMap<String, TypePackId>,
    /// Imported alias namespaces: prefix -> name -> alias
    pub imported_type_aliases: FxHashMap<String, FxHashMap<String, TypeFun>>,
    pub imported_namespaces: FxHashSet<String>,
    pub return_pack: Option<TypePackId>,
}

/// All scopes of one module, plus the ordered `(span, scope)` list used to
/// find the scope covering a source location.
#[derive(Debug, Default, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    spans: Vec<(Span, ScopeId)>,
}

impl ScopeTree {
    /// A tree with a root scope covering the whole module
    pub fn new(module_span: Span) -> Self {
        let mut tree = Self::default();
        let root = tree.new_scope(None);
        tree.attach(module_span, root);
        tree
    }

    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            ..Default::default()
        });
        id
    }

    /// Record the source span a scope covers. Spans are consulted in
    /// insertion order; ties prefer the first occurrence.
    pub fn attach(&mut self, span: Span, id: ScopeId) {
        self.spans.push((span, id));
    }

    pub fn module_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn spans(&self) -> &[(Span, ScopeId)] {
        &self.spans
    }

    /// Walk the parent chain looking for a binding
    pub fn lookup(&self, scope: ScopeId, key: &BindingKey) -> Option<TypeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(&ty) = scope.bindings.get(key) {
                return Some(ty);
            }
            cur = scope.parent;
        }
        None
    }

    pub fn lookup_type_alias(&self, scope: ScopeId, name: &str) -> Option<&TypeFun> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(alias) = scope.type_aliases.get(name) {
                return Some(alias);
            }
            cur = scope.parent;
        }
        None
    }

    pub fn lookup_imported_type_alias(
        &self,
        scope: ScopeId,
        prefix: &str,
        name: &str,
    ) -> Option<&TypeFun> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(names) = scope.imported_type_aliases.get(prefix) {
                if let Some(alias) = names.get(name) {
                    return Some(alias);
                }
            }
            cur = scope.parent;
        }
        None
    }

    pub fn lookup_pack_alias(&self, scope: ScopeId, name: &str) -> Option<TypePackId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(&pack) = scope.pack_aliases.get(name) {
                return Some(pack);
            }
            cur = scope.parent;
        }
        None
    }

    /// The return pack of the innermost enclosing function
    pub fn return_pack(&self, scope: ScopeId) -> Option<TypePackId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(pack) = scope.return_pack {
                return Some(pack);
            }
            cur = scope.parent;
        }
        None
    }

    /// The scope whose span contains `span` and is tighter than any other
    /// containing scope; ties broken by first occurrence.
    pub fn find_innermost_scope(&self, span: Span) -> ScopeId {
        let mut best = self.module_scope();
        let mut best_span = match self.spans.first() {
            Some(&(first, _)) => first,
            None => return best,
        };

        for &(candidate_span, candidate) in &self.spans {
            if candidate_span.encloses(span)
                && (!best_span.encloses(span)
                    || candidate_span.start > best_span.start
                    || candidate_span.end < best_span.end)
            {
                best = candidate;
                best_span = candidate_span;
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parents() {
        let mut tree = ScopeTree::new(Span::new(0, 100, 1, 1));
        let root = tree.module_scope();
        let child = tree.new_scope(Some(root));

        let key = BindingKey::Global("print".to_string());
        tree.get_mut(root).bindings.insert(key.clone(), crate::sema::arena::BuiltinTypes::new().any_type);

        assert!(tree.lookup(child, &key).is_some());
        assert!(tree.lookup(child, &BindingKey::Global("missing".into())).is_none());
    }

    #[test]
    fn innermost_scope_prefers_tighter_spans() {
        let mut tree = ScopeTree::new(Span::new(0, 100, 1, 1));
        let root = tree.module_scope();
        let outer = tree.new_scope(Some(root));
        tree.attach(Span::new(10, 90, 2, 1), outer);
        let inner = tree.new_scope(Some(outer));
        tree.attach(Span::new(20, 40, 3, 1), inner);

        assert_eq!(tree.find_innermost_scope(Span::new(25, 30, 3, 5)), inner);
        assert_eq!(tree.find_innermost_scope(Span::new(50, 60, 4, 1)), outer);
        assert_eq!(tree.find_innermost_scope(Span::new(0, 5, 1, 1)), root);
    }

    #[test]
    fn equal_spans_tie_break_on_first_occurrence() {
        let mut tree = ScopeTree::new(Span::new(0, 100, 1, 1));
        let root = tree.module_scope();
        let first = tree.new_scope(Some(root));
        tree.attach(Span::new(10, 50, 2, 1), first);
        let second = tree.new_scope(Some(root));
        tree.attach(Span::new(10, 50, 2, 1), second);

        assert_eq!(tree.find_innermost_scope(Span::new(20, 25, 2, 5)), first);
    }

    #[test]
    fn return_pack_comes_from_the_enclosing_function() {
        let mut tree = ScopeTree::new(Span::new(0, 100, 1, 1));
        let root = tree.module_scope();
        let function = tree.new_scope(Some(root));
        let block = tree.new_scope(Some(function));

        let pack = crate::sema::arena::BuiltinTypes::new().empty_type_pack;
        tree.get_mut(function).return_pack = Some(pack);

        assert_eq!(tree.return_pack(block), Some(pack));
        assert_eq!(tree.return_pack(root), None);
    }
}
