// src/check/annot.rs
//
// Type annotation checking: alias applications with their generic parameter
// accounting, swapped type/pack parameters, and unknown symbols.

use crate::check::{TypeChecker, ValueContext};
use crate::errors::{GenericKind, SymbolContext, TypeErrorData};
use crate::sema::pack::{finite, first_type, pack_size};
use crate::sema::types::TypeFun;
use crate::syntax::ast::*;

impl<'a> TypeChecker<'a> {
    pub(crate) fn visit_annotation(&mut self, annot: &TypeAnnot) {
        if let Some(&resolved) = self.module.ast_resolved_types.get(&annot.node_id()) {
            let resolved = crate::sema::types::follow(&self.module.internal_types, resolved);
            self.check_for_family_inhabitance(resolved, annot.span());
        }

        match annot {
            TypeAnnot::Reference(reference) => self.visit_type_reference(reference),
            TypeAnnot::Table(table) => {
                for prop in &table.props {
                    self.visit_annotation(&prop.ty);
                }
                if let Some(indexer) = &table.indexer {
                    self.visit_annotation(&indexer.key);
                    self.visit_annotation(&indexer.value);
                }
            }
            TypeAnnot::Function(function) => {
                self.visit_generic_names(&function.generics, &function.generic_packs);
                self.visit_type_list(&function.arg_types);
                self.visit_type_list(&function.return_types);
            }
            TypeAnnot::Typeof(typeof_annot) => {
                self.visit_expr(&typeof_annot.expr, ValueContext::RValue);
            }
            TypeAnnot::Union(union) => {
                for ty in &union.types {
                    self.visit_annotation(ty);
                }
            }
            TypeAnnot::Intersection(intersection) => {
                for ty in &intersection.types {
                    self.visit_annotation(ty);
                }
            }
        }
    }

    pub(crate) fn visit_type_list(&mut self, list: &TypeListAnnot) {
        for ty in &list.types {
            self.visit_annotation(ty);
        }
        if let Some(tail) = &list.tail {
            self.visit_pack_annotation(tail);
        }
    }

    fn visit_type_reference(&mut self, reference: &TypeReferenceAnnot) {
        for param in &reference.parameters {
            match param {
                TypeParamAnnot::Type(ty) => self.visit_annotation(ty),
                TypeParamAnnot::Pack(pack) => self.visit_pack_annotation(pack),
            }
        }

        let scope = self.module.scopes.find_innermost_scope(reference.span);
        let name = self.str(reference.name).to_string();
        let prefix = reference.prefix.map(|p| self.str(p).to_string());

        let alias = match &prefix {
            Some(prefix) => self
                .module
                .scopes
                .lookup_imported_type_alias(scope, prefix, &name),
            None => self.module.scopes.lookup_type_alias(scope, &name),
        };

        match alias {
            Some(alias) => {
                let alias = alias.clone();
                self.check_alias_application(reference, &name, &alias);
            }
            None => {
                if self.module.scopes.lookup_pack_alias(scope, &name).is_some() {
                    self.report(
                        reference.span,
                        TypeErrorData::SwappedGenericTypeParameter {
                            name,
                            kind: GenericKind::Type,
                        },
                    );
                } else {
                    let symbol = match prefix {
                        Some(prefix) => format!("{}.{}", prefix, name),
                        None => name,
                    };
                    self.report(
                        reference.span,
                        TypeErrorData::UnknownSymbol {
                            name: symbol,
                            context: SymbolContext::Type,
                        },
                    );
                }
            }
        }
    }

    /// The provided type and pack parameters must account for the alias's
    /// declared parameters, default values included. A lone provided pack
    /// holding exactly one type may stand in for a type parameter.
    fn check_alias_application(
        &mut self,
        reference: &TypeReferenceAnnot,
        name: &str,
        alias: &TypeFun,
    ) {
        let types_required = alias.type_params.len();
        let packs_required = alias.type_pack_params.len();

        let has_default_types = alias.type_params.iter().any(|p| p.default.is_some());
        let has_default_packs = alias.type_pack_params.iter().any(|p| p.default.is_some());

        if !reference.has_parameter_list
            && ((types_required > 0 && !has_default_types)
                || (packs_required > 0 && !has_default_packs))
        {
            self.report(
                reference.span,
                TypeErrorData::GenericError {
                    message: "Type parameter list is required".to_string(),
                },
            );
        }

        let mut types_provided = 0usize;
        let mut extra_types = 0usize;
        let mut packs_provided = 0usize;

        for param in &reference.parameters {
            match param {
                TypeParamAnnot::Type(_) => {
                    if packs_provided != 0 {
                        self.report(
                            reference.span,
                            TypeErrorData::GenericError {
                                message: "Type parameters must come before type pack parameters"
                                    .to_string(),
                            },
                        );
                        continue;
                    }
                    if types_provided < types_required {
                        types_provided += 1;
                    } else {
                        extra_types += 1;
                    }
                }
                TypeParamAnnot::Pack(pack) => {
                    let singular_type = self.lookup_pack_annotation(pack).is_some_and(|tp| {
                        let arena = &self.module.internal_types;
                        pack_size(arena, tp) == 1
                            && finite(arena, tp)
                            && first_type(arena, tp, false).is_some()
                    });
                    if types_provided < types_required && singular_type {
                        types_provided += 1;
                    } else {
                        packs_provided += 1;
                    }
                }
            }
        }

        if extra_types != 0 && packs_provided == 0 {
            // Extra types are only collected into a pack if a pack is expected
            if packs_required != 0 {
                packs_provided += 1;
            } else {
                types_provided += extra_types;
            }
        }

        for param in alias.type_params.iter().skip(types_provided) {
            if param.default.is_some() {
                types_provided += 1;
            }
        }

        for param in alias.type_pack_params.iter().skip(packs_provided) {
            if param.default.is_some() {
                packs_provided += 1;
            }
        }

        if extra_types == 0 && packs_provided + 1 == packs_required {
            packs_provided += 1;
        }

        if types_provided != types_required || packs_provided != packs_required {
            self.report(
                reference.span,
                TypeErrorData::IncorrectGenericParameterCount {
                    name: name.to_string(),
                    expected_types: types_required,
                    expected_packs: packs_required,
                    actual_types: types_provided,
                    actual_packs: packs_provided,
                },
            );
        }
    }

    pub(crate) fn visit_pack_annotation(&mut self, pack: &TypePackAnnot) {
        match pack {
            TypePackAnnot::Explicit(explicit) => {
                for ty in &explicit.types {
                    self.visit_annotation(ty);
                }
                if let Some(tail) = &explicit.tail {
                    self.visit_pack_annotation(tail);
                }
            }
            TypePackAnnot::Variadic(variadic) => self.visit_annotation(&variadic.ty),
            TypePackAnnot::Generic(generic) => {
                let scope = self.module.scopes.find_innermost_scope(generic.span);
                let name = self.str(generic.name).to_string();
                if self.module.scopes.lookup_pack_alias(scope, &name).is_some() {
                    return;
                }
                if self.module.scopes.lookup_type_alias(scope, &name).is_some() {
                    self.report(
                        generic.span,
                        TypeErrorData::SwappedGenericTypeParameter {
                            name,
                            kind: GenericKind::Pack,
                        },
                    );
                } else {
                    self.report(
                        generic.span,
                        TypeErrorData::UnknownSymbol {
                            name,
                            context: SymbolContext::Type,
                        },
                    );
                }
            }
        }
    }
}
