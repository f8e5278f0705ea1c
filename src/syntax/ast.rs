// src/syntax/ast.rs
//
// The AST produced by the external parser. Every statement, expression, and
// annotation node carries a NodeId; the per-module type maps are keyed on it.

use crate::syntax::intern::Symbol;
use crate::syntax::span::Span;

/// Unique identifier for AST nodes (statements, expressions, annotations)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

/// A hot comment from the file header, e.g. `--!strict`
#[derive(Debug, Clone)]
pub struct HotComment {
    /// True when the comment appears before the first statement
    pub header: bool,
    pub content: String,
    pub span: Span,
}

/// A parse-time diagnostic produced by the external parser
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

/// Everything the external parser yields for one file
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub root: Block,
    pub hot_comments: Vec<HotComment>,
    pub errors: Vec<ParseError>,
    pub lines: usize,
    pub interner: crate::syntax::intern::Interner,
}

/// A local variable declaration site (binding occurrence)
#[derive(Debug, Clone)]
pub struct LocalVar {
    pub node_id: NodeId,
    pub name: Symbol,
    pub annotation: Option<TypeAnnot>,
    pub span: Span,
}

/// A statement block
#[derive(Debug, Clone)]
pub struct Block {
    pub node_id: NodeId,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Block),
    If(IfStmt),
    While(WhileStmt),
    Repeat(RepeatStmt),
    Break(BreakStmt),
    Continue(ContinueStmt),
    Return(ReturnStmt),
    Expr(ExprStmt),
    Local(LocalStmt),
    For(NumericForStmt),
    ForIn(GenericForStmt),
    Assign(AssignStmt),
    CompoundAssign(CompoundAssignStmt),
    Function(FunctionStmt),
    LocalFunction(LocalFunctionStmt),
    TypeAlias(TypeAliasStmt),
    Error(ErrorStmt),
}

impl Stmt {
    pub fn node_id(&self) -> NodeId {
        match self {
            Stmt::Block(s) => s.node_id,
            Stmt::If(s) => s.node_id,
            Stmt::While(s) => s.node_id,
            Stmt::Repeat(s) => s.node_id,
            Stmt::Break(s) => s.node_id,
            Stmt::Continue(s) => s.node_id,
            Stmt::Return(s) => s.node_id,
            Stmt::Expr(s) => s.node_id,
            Stmt::Local(s) => s.node_id,
            Stmt::For(s) => s.node_id,
            Stmt::ForIn(s) => s.node_id,
            Stmt::Assign(s) => s.node_id,
            Stmt::CompoundAssign(s) => s.node_id,
            Stmt::Function(s) => s.node_id,
            Stmt::LocalFunction(s) => s.node_id,
            Stmt::TypeAlias(s) => s.node_id,
            Stmt::Error(s) => s.node_id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::Block(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::Repeat(s) => s.span,
            Stmt::Break(s) => s.span,
            Stmt::Continue(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Expr(s) => s.span,
            Stmt::Local(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::ForIn(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::CompoundAssign(s) => s.span,
            Stmt::Function(s) => s.span,
            Stmt::LocalFunction(s) => s.span,
            Stmt::TypeAlias(s) => s.span,
            Stmt::Error(s) => s.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub node_id: NodeId,
    pub condition: Expr,
    pub then_body: Block,
    pub else_body: Option<Box<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub node_id: NodeId,
    pub condition: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct RepeatStmt {
    pub node_id: NodeId,
    pub body: Block,
    pub condition: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct BreakStmt {
    pub node_id: NodeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ContinueStmt {
    pub node_id: NodeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub node_id: NodeId,
    pub list: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ExprStmt {
    pub node_id: NodeId,
    pub expr: Expr,
    pub span: Span,
}

/// `local a, b = f(), 1`
#[derive(Debug, Clone)]
pub struct LocalStmt {
    pub node_id: NodeId,
    pub vars: Vec<LocalVar>,
    pub values: Vec<Expr>,
    pub span: Span,
}

/// `for i = from, to, step do ... end`
#[derive(Debug, Clone)]
pub struct NumericForStmt {
    pub node_id: NodeId,
    pub var: LocalVar,
    pub from: Expr,
    pub to: Expr,
    pub step: Option<Expr>,
    pub body: Block,
    pub span: Span,
}

/// `for k, v in values do ... end`
#[derive(Debug, Clone)]
pub struct GenericForStmt {
    pub node_id: NodeId,
    pub vars: Vec<LocalVar>,
    pub values: Vec<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct AssignStmt {
    pub node_id: NodeId,
    pub vars: Vec<Expr>,
    pub values: Vec<Expr>,
    pub span: Span,
}

/// `a op= b`
#[derive(Debug, Clone)]
pub struct CompoundAssignStmt {
    pub node_id: NodeId,
    pub op: BinaryOp,
    pub var: Expr,
    pub value: Expr,
    pub span: Span,
}

/// `function name.path() ... end`
#[derive(Debug, Clone)]
pub struct FunctionStmt {
    pub node_id: NodeId,
    pub name: Expr,
    pub func: FunctionExpr,
    pub span: Span,
}

/// `local function name() ... end`
#[derive(Debug, Clone)]
pub struct LocalFunctionStmt {
    pub node_id: NodeId,
    pub var: LocalVar,
    pub func: FunctionExpr,
    pub span: Span,
}

/// `type Name<T...> = T`
#[derive(Debug, Clone)]
pub struct TypeAliasStmt {
    pub node_id: NodeId,
    pub name: Symbol,
    pub generics: Vec<GenericName>,
    pub generic_packs: Vec<GenericName>,
    pub ty: TypeAnnot,
    pub exported: bool,
    pub span: Span,
}

/// Statement-level parser recovery node
#[derive(Debug, Clone)]
pub struct ErrorStmt {
    pub node_id: NodeId,
    pub expressions: Vec<Expr>,
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// A generic type or pack parameter declaration
#[derive(Debug, Clone)]
pub struct GenericName {
    pub name: Symbol,
    pub default: Option<TypeAnnot>,
    pub span: Span,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub enum Expr {
    Group(GroupExpr),
    Nil(NilExpr),
    Bool(BoolExpr),
    Number(NumberExpr),
    Str(StringExpr),
    Local(LocalExpr),
    Global(GlobalExpr),
    Varargs(VarargsExpr),
    Call(CallExpr),
    IndexName(IndexNameExpr),
    IndexExpr(IndexExprExpr),
    Function(FunctionExpr),
    Table(TableExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    TypeAssertion(TypeAssertionExpr),
    IfElse(IfElseExpr),
    InterpString(InterpStringExpr),
    Error(ErrorExpr),
}

impl Expr {
    pub fn node_id(&self) -> NodeId {
        match self {
            Expr::Group(e) => e.node_id,
            Expr::Nil(e) => e.node_id,
            Expr::Bool(e) => e.node_id,
            Expr::Number(e) => e.node_id,
            Expr::Str(e) => e.node_id,
            Expr::Local(e) => e.node_id,
            Expr::Global(e) => e.node_id,
            Expr::Varargs(e) => e.node_id,
            Expr::Call(e) => e.node_id,
            Expr::IndexName(e) => e.node_id,
            Expr::IndexExpr(e) => e.node_id,
            Expr::Function(e) => e.node_id,
            Expr::Table(e) => e.node_id,
            Expr::Unary(e) => e.node_id,
            Expr::Binary(e) => e.node_id,
            Expr::TypeAssertion(e) => e.node_id,
            Expr::IfElse(e) => e.node_id,
            Expr::InterpString(e) => e.node_id,
            Expr::Error(e) => e.node_id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Group(e) => e.span,
            Expr::Nil(e) => e.span,
            Expr::Bool(e) => e.span,
            Expr::Number(e) => e.span,
            Expr::Str(e) => e.span,
            Expr::Local(e) => e.span,
            Expr::Global(e) => e.span,
            Expr::Varargs(e) => e.span,
            Expr::Call(e) => e.span,
            Expr::IndexName(e) => e.span,
            Expr::IndexExpr(e) => e.span,
            Expr::Function(e) => e.span,
            Expr::Table(e) => e.span,
            Expr::Unary(e) => e.span,
            Expr::Binary(e) => e.span,
            Expr::TypeAssertion(e) => e.span,
            Expr::IfElse(e) => e.span,
            Expr::InterpString(e) => e.span,
            Expr::Error(e) => e.span,
        }
    }

    /// Whether this expression can expand to multiple values in tail position
    pub fn is_multi_value(&self) -> bool {
        matches!(self, Expr::Call(_) | Expr::Varargs(_))
    }
}

#[derive(Debug, Clone)]
pub struct GroupExpr {
    pub node_id: NodeId,
    pub expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct NilExpr {
    pub node_id: NodeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct BoolExpr {
    pub node_id: NodeId,
    pub value: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct NumberExpr {
    pub node_id: NodeId,
    pub value: f64,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StringExpr {
    pub node_id: NodeId,
    pub value: String,
    pub span: Span,
}

/// Reference to a local; `local_id` is the NodeId of the declaration site
#[derive(Debug, Clone)]
pub struct LocalExpr {
    pub node_id: NodeId,
    pub local_id: NodeId,
    pub name: Symbol,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct GlobalExpr {
    pub node_id: NodeId,
    pub name: Symbol,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct VarargsExpr {
    pub node_id: NodeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub node_id: NodeId,
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    /// True for `obj:method(...)` sugar
    pub is_method: bool,
    pub span: Span,
}

/// `expr.name` or `expr:name` (the latter only as a call callee)
#[derive(Debug, Clone)]
pub struct IndexNameExpr {
    pub node_id: NodeId,
    pub expr: Box<Expr>,
    pub index: Symbol,
    pub index_span: Span,
    pub span: Span,
}

/// `expr[index]`
#[derive(Debug, Clone)]
pub struct IndexExprExpr {
    pub node_id: NodeId,
    pub expr: Box<Expr>,
    pub index: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionExpr {
    pub node_id: NodeId,
    pub generics: Vec<GenericName>,
    pub generic_packs: Vec<GenericName>,
    pub self_param: Option<LocalVar>,
    pub params: Vec<LocalVar>,
    pub vararg: bool,
    pub vararg_annotation: Option<TypePackAnnot>,
    pub return_annotation: Option<TypeListAnnot>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TableItemKind {
    /// `value` (positional)
    List,
    /// `name = value`
    Record { key_span: Span, key: Symbol },
    /// `[key] = value`
    General { key: Box<Expr> },
}

#[derive(Debug, Clone)]
pub struct TableItem {
    pub kind: TableItemKind,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct TableExpr {
    pub node_id: NodeId,
    pub items: Vec<TableItem>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Minus,
    Len,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    CompareNe,
    CompareEq,
    CompareLt,
    CompareLe,
    CompareGt,
    CompareGe,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::CompareEq | BinaryOp::CompareNe)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::CompareEq
                | BinaryOp::CompareNe
                | BinaryOp::CompareLt
                | BinaryOp::CompareLe
                | BinaryOp::CompareGt
                | BinaryOp::CompareGe
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "..",
            BinaryOp::CompareNe => "~=",
            BinaryOp::CompareEq => "==",
            BinaryOp::CompareLt => "<",
            BinaryOp::CompareLe => "<=",
            BinaryOp::CompareGt => ">",
            BinaryOp::CompareGe => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub node_id: NodeId,
    pub op: UnaryOp,
    pub expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub node_id: NodeId,
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub span: Span,
}

/// `expr :: T`
#[derive(Debug, Clone)]
pub struct TypeAssertionExpr {
    pub node_id: NodeId,
    pub expr: Box<Expr>,
    pub annotation: TypeAnnot,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct IfElseExpr {
    pub node_id: NodeId,
    pub condition: Box<Expr>,
    pub true_expr: Box<Expr>,
    pub false_expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct InterpStringExpr {
    pub node_id: NodeId,
    pub expressions: Vec<Expr>,
    pub span: Span,
}

/// Expression-level parser recovery node
#[derive(Debug, Clone)]
pub struct ErrorExpr {
    pub node_id: NodeId,
    pub expressions: Vec<Expr>,
    pub span: Span,
}

// ============================================================================
// Type annotations
// ============================================================================

#[derive(Debug, Clone)]
pub enum TypeAnnot {
    Reference(TypeReferenceAnnot),
    Table(TableAnnot),
    Function(FunctionAnnot),
    Typeof(TypeofAnnot),
    Union(UnionAnnot),
    Intersection(IntersectionAnnot),
}

impl TypeAnnot {
    pub fn node_id(&self) -> NodeId {
        match self {
            TypeAnnot::Reference(t) => t.node_id,
            TypeAnnot::Table(t) => t.node_id,
            TypeAnnot::Function(t) => t.node_id,
            TypeAnnot::Typeof(t) => t.node_id,
            TypeAnnot::Union(t) => t.node_id,
            TypeAnnot::Intersection(t) => t.node_id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            TypeAnnot::Reference(t) => t.span,
            TypeAnnot::Table(t) => t.span,
            TypeAnnot::Function(t) => t.span,
            TypeAnnot::Typeof(t) => t.span,
            TypeAnnot::Union(t) => t.span,
            TypeAnnot::Intersection(t) => t.span,
        }
    }
}

/// `Name`, `prefix.Name`, `Name<T, U...>`
#[derive(Debug, Clone)]
pub struct TypeReferenceAnnot {
    pub node_id: NodeId,
    pub prefix: Option<Symbol>,
    pub name: Symbol,
    pub parameters: Vec<TypeParamAnnot>,
    pub has_parameter_list: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeParamAnnot {
    Type(TypeAnnot),
    Pack(TypePackAnnot),
}

#[derive(Debug, Clone)]
pub struct TableAnnotProp {
    pub name: Symbol,
    pub ty: TypeAnnot,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TableAnnotIndexer {
    pub key: Box<TypeAnnot>,
    pub value: Box<TypeAnnot>,
}

#[derive(Debug, Clone)]
pub struct TableAnnot {
    pub node_id: NodeId,
    pub props: Vec<TableAnnotProp>,
    pub indexer: Option<TableAnnotIndexer>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionAnnot {
    pub node_id: NodeId,
    pub generics: Vec<GenericName>,
    pub generic_packs: Vec<GenericName>,
    pub arg_types: TypeListAnnot,
    pub return_types: TypeListAnnot,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeofAnnot {
    pub node_id: NodeId,
    pub expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UnionAnnot {
    pub node_id: NodeId,
    pub types: Vec<TypeAnnot>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct IntersectionAnnot {
    pub node_id: NodeId,
    pub types: Vec<TypeAnnot>,
    pub span: Span,
}

/// An annotated type list with an optional pack tail, e.g. `(number, ...string)`
#[derive(Debug, Clone)]
pub struct TypeListAnnot {
    pub types: Vec<TypeAnnot>,
    pub tail: Option<TypePackAnnot>,
}

#[derive(Debug, Clone)]
pub enum TypePackAnnot {
    Explicit(ExplicitPackAnnot),
    Variadic(VariadicPackAnnot),
    Generic(GenericPackAnnot),
}

impl TypePackAnnot {
    pub fn node_id(&self) -> NodeId {
        match self {
            TypePackAnnot::Explicit(p) => p.node_id,
            TypePackAnnot::Variadic(p) => p.node_id,
            TypePackAnnot::Generic(p) => p.node_id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            TypePackAnnot::Explicit(p) => p.span,
            TypePackAnnot::Variadic(p) => p.span,
            TypePackAnnot::Generic(p) => p.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExplicitPackAnnot {
    pub node_id: NodeId,
    pub types: Vec<TypeAnnot>,
    pub tail: Option<Box<TypePackAnnot>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct VariadicPackAnnot {
    pub node_id: NodeId,
    pub ty: Box<TypeAnnot>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct GenericPackAnnot {
    pub node_id: NodeId,
    pub name: Symbol,
    pub span: Span,
}
