//! Planning and applying wrap edits for a single source file.
//!
//! Processing happens in two phases, so everything the edits depend on is
//! known before any text moves: first a visitor walks the AST collecting
//! insertions (and which extension traits they need), then the insertions
//! are applied by copying slices of the original buffer between them.
//!
//! Every insertion is intra-line. The rewriter never adds or removes a line,
//! which is what keeps compile-time interposition line-accurate.

use std::collections::BTreeSet;
use std::fmt;

use proc_macro2::Span;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use tracing::debug;

use crate::markers::Markers;

#[derive(Clone, Default)]
pub struct RewriteOpts {
    /// Rewrite tuple returns with a block-scoped temporary instead of
    /// `.trace_last()`.
    pub no_wrapn: bool,
}

/// A per-site warning; does not affect the exit code.
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.message)
    }
}

/// One planned insertion; `pos` is a byte offset into the original source.
pub struct Insertion {
    pub pos: usize,
    pub text: String,
}

pub struct ParsedFile {
    pub src: String,
    pub edits: Vec<Insertion>,
    /// Any `use retrace…` or `extern crate retrace` in the file, including
    /// inside nested modules. Interpose mode uses this for eligibility.
    pub uses_lib: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Lines with a `// retrace:skip` that suppressed nothing.
    pub unused_markers: Vec<usize>,
}

impl ParsedFile {
    pub fn changed(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Applies the planned insertions.
    pub fn rewrite(&self) -> String {
        let mut out = String::with_capacity(self.src.len() + self.edits.len() * 16);
        let mut last = 0;
        for edit in &self.edits {
            out.push_str(&self.src[last..edit.pos]);
            out.push_str(&edit.text);
            last = edit.pos;
        }
        out.push_str(&self.src[last..]);
        out
    }
}

/// Parses `src` and plans the edits that annotate its error returns.
///
/// Parse failures leave the file untouched; the error carries the offending
/// `line:column` (the caller prefixes the file name).
pub fn parse_file(name: &str, src: &str, opts: &RewriteOpts) -> retrace::Result<ParsedFile> {
    // Keep spans aligned with the buffer we index into: strip the BOM and a
    // shebang line ourselves and add the offset back when planning edits.
    let (base, line_offset, stripped) = strip_prologue(src);

    let file: syn::File = syn::parse_str(stripped).map_err(|err| {
        let start = err.span().start();
        retrace::errorf!(
            "{}:{}: {err}",
            start.line + line_offset,
            start.column + 1
        )
    })?;

    let mut markers = Markers::scan(stripped);
    let uses_lib = imports_library(&file.items);

    let mut walker = Walker {
        opts,
        markers: &mut markers,
        edits: Vec::new(),
        diagnostics: Vec::new(),
        scopes: vec![scan_scope(&file.items)],
        state: None,
    };
    walker.visit_file(&file);

    let root = walker.scopes.pop();
    let Walker {
        mut edits,
        mut diagnostics,
        ..
    } = walker;

    if let Some(edit) = root.as_ref().and_then(plan_scope_import) {
        edits.push(edit);
    }

    edits.sort_by_key(|edit| edit.pos);
    for edit in &mut edits {
        edit.pos += base;
    }
    for diag in &mut diagnostics {
        diag.line += line_offset;
    }

    let unused_markers = markers
        .unused()
        .into_iter()
        .map(|line| line + line_offset)
        .collect();

    debug!(file = name, edits = edits.len(), "planned rewrite");

    Ok(ParsedFile {
        src: src.to_owned(),
        edits,
        uses_lib,
        diagnostics,
        unused_markers,
    })
}

/// Splits off a BOM and/or shebang line, returning the byte offset, the
/// number of lines removed, and the remainder.
fn strip_prologue(src: &str) -> (usize, usize, &str) {
    let mut base = 0;
    let mut rest = src;
    if let Some(stripped) = rest.strip_prefix('\u{feff}') {
        base += '\u{feff}'.len_utf8();
        rest = stripped;
    }
    let mut lines = 0;
    // `#!` starts a shebang only when not immediately followed by `[`
    // (which would be an inner attribute).
    if rest.starts_with("#!") && !rest.starts_with("#![") {
        let end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        base += end;
        lines = 1;
        rest = &rest[end..];
    }
    (base, lines, rest)
}

// ============================================================================
// File-level classification helpers
// ============================================================================

fn use_tree_root_is_retrace(tree: &syn::UseTree) -> bool {
    match tree {
        syn::UseTree::Path(path) => path.ident == "retrace",
        syn::UseTree::Name(name) => name.ident == "retrace",
        syn::UseTree::Rename(rename) => rename.ident == "retrace",
        syn::UseTree::Group(group) => group.items.iter().any(use_tree_root_is_retrace),
        syn::UseTree::Glob(_) => false,
    }
}

/// Whether any module in the file names the library. Interpose mode uses
/// this for eligibility.
fn imports_library(items: &[syn::Item]) -> bool {
    items.iter().any(|item| match item {
        syn::Item::Use(item) => use_tree_root_is_retrace(&item.tree),
        syn::Item::ExternCrate(item) => item.ident == "retrace",
        syn::Item::Mod(item) => item
            .content
            .as_ref()
            .map(|(_, items)| imports_library(items))
            .unwrap_or(false),
        _ => false,
    })
}

/// Import state of one module scope. A `use` only covers its own module, so
/// every module that receives a method edit needs its own trait import.
struct Scope {
    /// `retrace::Result` (or a glob of it) is visible, so a bare
    /// `Result<T>` counts as the library's alias.
    alias_in_scope: bool,
    /// A `retrace::*` or `retrace::prelude::*` glob carries every trait.
    glob_all: bool,
    /// Extension traits already imported by name.
    imported: BTreeSet<String>,
    last_use_end: Option<usize>,
    first_item_start: Option<usize>,
    /// Traits the edits planned inside this scope require.
    traits: BTreeSet<&'static str>,
}

fn scan_scope(items: &[syn::Item]) -> Scope {
    let mut scope = Scope {
        alias_in_scope: false,
        glob_all: false,
        imported: BTreeSet::new(),
        last_use_end: None,
        first_item_start: None,
        traits: BTreeSet::new(),
    };

    for item in items {
        if scope.first_item_start.is_none() {
            scope.first_item_start = Some(item.span().byte_range().start);
        }
        if let syn::Item::Use(item) = item {
            scope.last_use_end = Some(item.span().byte_range().end);
            collect_retrace_imports(&item.tree, false, &mut scope);
        }
    }
    scope
}

/// Records which library names a use tree brings into scope. `in_retrace`
/// tracks whether the walk has passed through the `retrace` root segment.
fn collect_retrace_imports(tree: &syn::UseTree, in_retrace: bool, scope: &mut Scope) {
    match tree {
        syn::UseTree::Path(path) => {
            let enter = in_retrace || path.ident == "retrace" || path.ident == "prelude";
            if enter {
                collect_retrace_imports(&path.tree, in_retrace || path.ident == "retrace", scope);
            }
        }
        syn::UseTree::Name(item) if in_retrace => scope.record(&item.ident.to_string()),
        syn::UseTree::Rename(item) if in_retrace => scope.record(&item.ident.to_string()),
        syn::UseTree::Glob(_) if in_retrace => {
            scope.glob_all = true;
            scope.alias_in_scope = true;
        }
        syn::UseTree::Group(group) => {
            for item in &group.items {
                collect_retrace_imports(item, in_retrace, scope);
            }
        }
        _ => {}
    }
}

impl Scope {
    fn record(&mut self, name: &str) {
        match name {
            "Result" => self.alias_in_scope = true,
            "ResultExt" | "ErrorExt" | "TraceLast" => {
                self.imported.insert(name.to_owned());
            }
            _ => {}
        }
    }
}

/// Plans the `use ::retrace::{…};` insertion for one scope: after its last
/// use declaration, else immediately before its first item. Both spots keep
/// line numbers intact.
fn plan_scope_import(scope: &Scope) -> Option<Insertion> {
    if scope.glob_all {
        return None;
    }
    let missing: Vec<&str> = scope
        .traits
        .iter()
        .copied()
        .filter(|name| !scope.imported.contains(*name))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let list = missing
        .iter()
        .map(|name| format!("{name} as _"))
        .collect::<Vec<_>>()
        .join(", ");
    let use_line = format!("use ::retrace::{{{list}}};");

    match (scope.last_use_end, scope.first_item_start) {
        (Some(pos), _) => Some(Insertion {
            pos,
            text: format!(" {use_line}"),
        }),
        (None, Some(pos)) => Some(Insertion {
            pos,
            text: format!("{use_line} "),
        }),
        // A scope without items has no edits either.
        (None, None) => None,
    }
}

// ============================================================================
// The walker
// ============================================================================

/// How a classified function returns its errors.
#[derive(Clone)]
enum Regime {
    /// `-> Result<_, Traced>` (or an eligible alias).
    Simple,
    /// `-> (…, Result<_, Traced>, …)`: the WrapN territory.
    Tuple { arity: usize, eligible: Vec<usize> },
}

#[derive(Clone)]
struct FnState {
    regime: Regime,
}

struct Walker<'a> {
    opts: &'a RewriteOpts,
    markers: &'a mut Markers,
    edits: Vec<Insertion>,
    diagnostics: Vec<Diagnostic>,
    /// Module scopes, innermost last; the root scope is index 0.
    scopes: Vec<Scope>,
    state: Option<FnState>,
}

impl Walker<'_> {
    fn alias_in_scope(&self) -> bool {
        self.scopes
            .last()
            .map(|scope| scope.alias_in_scope)
            .unwrap_or(false)
    }

    fn need_trait(&mut self, name: &'static str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.traits.insert(name);
        }
    }

    fn classify_return(&self, output: &syn::ReturnType) -> Option<Regime> {
        let syn::ReturnType::Type(_, ty) = output else {
            return None;
        };
        self.classify_type(ty)
    }

    fn classify_type(&self, ty: &syn::Type) -> Option<Regime> {
        match ty {
            syn::Type::Paren(paren) => self.classify_type(&paren.elem),
            syn::Type::Tuple(tuple) => {
                let eligible: Vec<usize> = tuple
                    .elems
                    .iter()
                    .enumerate()
                    .filter(|(_, elem)| self.is_traced_result(elem))
                    .map(|(i, _)| i)
                    .collect();
                if eligible.is_empty() {
                    None
                } else {
                    Some(Regime::Tuple {
                        arity: tuple.elems.len(),
                        eligible,
                    })
                }
            }
            _ if self.is_traced_result(ty) => Some(Regime::Simple),
            _ => None,
        }
    }

    /// Syntactic eligibility of a result type. Without type information the
    /// rule is: `Result<T, Traced>` under any path prefix, the library's
    /// `retrace::Result<T>` alias, or a bare `Result<T>` when the file
    /// imports that alias.
    fn is_traced_result(&self, ty: &syn::Type) -> bool {
        let syn::Type::Path(type_path) = ty else {
            return false;
        };
        let path = &type_path.path;
        let Some(last) = path.segments.last() else {
            return false;
        };
        if last.ident != "Result" {
            return false;
        }

        let qualified = path
            .segments
            .iter()
            .take(path.segments.len() - 1)
            .any(|seg| seg.ident == "retrace");

        match &last.arguments {
            syn::PathArguments::AngleBracketed(args) => {
                let types: Vec<&syn::Type> = args
                    .args
                    .iter()
                    .filter_map(|arg| match arg {
                        syn::GenericArgument::Type(ty) => Some(ty),
                        _ => None,
                    })
                    .collect();
                match types.len() {
                    1 => qualified || self.alias_in_scope(),
                    2 => type_is_traced(types[1]),
                    _ => false,
                }
            }
            syn::PathArguments::None => qualified || self.alias_in_scope(),
            syn::PathArguments::Parenthesized(_) => false,
        }
    }

    fn enter_fn(&mut self, method_name: Option<&syn::Ident>, sig: &syn::Signature) -> Option<FnState> {
        let mut regime = self.classify_return(&sig.output);

        // A hand-written `trace`/`traced` delegate exists to attribute
        // frames to its caller; wrapping inside it would point every trace
        // at the delegate instead.
        if matches!(regime, Some(Regime::Simple)) {
            if let Some(ident) = method_name {
                if ident == "trace" || ident == "traced" {
                    regime = None;
                }
            }
        }

        std::mem::replace(&mut self.state, regime.map(|regime| FnState { regime }))
    }

    // ------------------------------------------------------------------
    // Return sites
    // ------------------------------------------------------------------

    /// Recurses through tail positions: the last expression of a block, both
    /// branches of a tail `if`, every arm of a tail `match`.
    fn handle_tail_block(&mut self, block: &syn::Block) {
        if let Some(syn::Stmt::Expr(expr, None)) = block.stmts.last() {
            self.handle_tail_expr(expr);
        }
    }

    fn handle_tail_expr(&mut self, expr: &syn::Expr) {
        match expr {
            syn::Expr::Block(inner) => self.handle_tail_block(&inner.block),
            syn::Expr::Unsafe(inner) => self.handle_tail_block(&inner.block),
            syn::Expr::If(inner) => {
                self.handle_tail_block(&inner.then_branch);
                if let Some((_, else_branch)) = &inner.else_branch {
                    self.handle_tail_expr(else_branch);
                }
            }
            syn::Expr::Match(inner) => {
                for arm in &inner.arms {
                    self.handle_tail_expr(&arm.body);
                }
            }
            syn::Expr::Paren(inner) => self.handle_tail_expr(&inner.expr),
            syn::Expr::Group(inner) => self.handle_tail_expr(&inner.expr),
            // `return` in tail position is planned by the return visit.
            syn::Expr::Return(_) => {}
            _ => self.handle_return_site(expr),
        }
    }

    fn handle_return_site(&mut self, expr: &syn::Expr) {
        let Some(state) = self.state.clone() else {
            return;
        };
        match &state.regime {
            Regime::Simple => self.wrap_result_expr(expr),
            Regime::Tuple { arity, eligible } => self.wrap_tuple_expr(expr, *arity, eligible),
        }
    }

    /// Wraps an expression of the function's result type.
    fn wrap_result_expr(&mut self, expr: &syn::Expr) {
        if diverges(expr) || is_ok_literal(expr) || already_wrapped(expr) {
            return;
        }

        if let Some(inner) = err_literal_arg(expr) {
            if already_wrapped(inner) || self.optout(inner.span()) {
                return;
            }
            self.plan_method_suffix(inner, "traced", "ErrorExt");
            return;
        }

        if self.optout(expr.span()) {
            return;
        }
        self.plan_method_suffix(expr, "trace", "ResultExt");
    }

    /// Wraps a return site of a tuple-returning function.
    fn wrap_tuple_expr(&mut self, expr: &syn::Expr, arity: usize, eligible: &[usize]) {
        // A literal tuple names every element, so eligible positions wrap
        // individually.
        if let syn::Expr::Tuple(tuple) = expr {
            for index in eligible {
                if let Some(elem) = tuple.elems.iter().nth(*index) {
                    self.wrap_result_expr(elem);
                }
            }
            return;
        }

        if already_wrapped(expr) || diverges(expr) {
            return;
        }
        if eligible.len() != 1 {
            self.diag(expr.span(), "skipping: multiple error returns");
            return;
        }
        if eligible[0] != arity - 1 {
            self.diag(expr.span(), "skipping: non-final error return");
            return;
        }
        if self.optout(expr.span()) {
            return;
        }

        if self.opts.no_wrapn {
            // `expr` becomes `{ let (__r0, __r1) = expr; (__r0, __r1.trace()) }`.
            let vars: Vec<String> = (0..arity).map(|i| format!("__r{i}")).collect();
            let mut results = vars.clone();
            if let Some(last) = results.last_mut() {
                *last = format!("{last}.trace()");
            }
            let range = expr.span().byte_range();
            self.edits.push(Insertion {
                pos: range.start,
                text: format!("{{ let ({}) = ", vars.join(", ")),
            });
            self.edits.push(Insertion {
                pos: range.end,
                text: format!("; ({}) }}", results.join(", ")),
            });
            self.need_trait("ResultExt");
            return;
        }

        if arity > 6 {
            self.diag(expr.span(), "skipping: incorrect number of return values");
            return;
        }
        self.plan_method_suffix(expr, "trace_last", "TraceLast");
    }

    fn wrap_try(&mut self, try_expr: &syn::ExprTry) {
        let receiver = &*try_expr.expr;
        if already_wrapped(receiver) || self.optout(receiver.span()) {
            return;
        }
        // `?` binds tighter than any operator, so the receiver is always a
        // valid method target as parsed.
        let pos = receiver.span().byte_range().end;
        self.edits.push(Insertion {
            pos,
            text: ".trace()".to_owned(),
        });
        self.need_trait("ResultExt");
    }

    fn plan_method_suffix(&mut self, expr: &syn::Expr, method: &str, trait_name: &'static str) {
        let range = expr.span().byte_range();
        if postfix_safe(expr) {
            self.edits.push(Insertion {
                pos: range.end,
                text: format!(".{method}()"),
            });
        } else {
            self.edits.push(Insertion {
                pos: range.start,
                text: "(".to_owned(),
            });
            self.edits.push(Insertion {
                pos: range.end,
                text: format!(").{method}()"),
            });
        }
        self.need_trait(trait_name);
    }

    fn optout(&mut self, span: Span) -> bool {
        self.markers.use_if_present(span.start().line)
    }

    fn diag(&mut self, span: Span, message: &str) {
        self.diagnostics.push(Diagnostic {
            line: span.start().line,
            message: message.to_owned(),
        });
    }
}

impl<'ast> Visit<'ast> for Walker<'_> {
    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        // A module is its own import scope: trait imports planned inside it
        // must land inside it.
        let Some((_, items)) = &node.content else {
            visit::visit_item_mod(self, node);
            return;
        };
        self.scopes.push(scan_scope(items));
        visit::visit_item_mod(self, node);
        if let Some(edit) = self.scopes.pop().as_ref().and_then(plan_scope_import) {
            self.edits.push(edit);
        }
    }

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        let saved = self.enter_fn(None, &node.sig);
        if self.state.is_some() {
            self.handle_tail_block(&node.block);
        }
        visit::visit_item_fn(self, node);
        self.state = saved;
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        let saved = self.enter_fn(Some(&node.sig.ident), &node.sig);
        if self.state.is_some() {
            self.handle_tail_block(&node.block);
        }
        visit::visit_impl_item_fn(self, node);
        self.state = saved;
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        let saved = self.enter_fn(Some(&node.sig.ident), &node.sig);
        if let (Some(_), Some(block)) = (&self.state, &node.default) {
            self.handle_tail_block(block);
        }
        visit::visit_trait_item_fn(self, node);
        self.state = saved;
    }

    fn visit_expr_closure(&mut self, node: &'ast syn::ExprClosure) {
        // Only a closure with a written return type can be classified; its
        // `?` operators return from the closure, not the enclosing function,
        // so the state never leaks inward.
        let regime = self.classify_return(&node.output);
        let saved = std::mem::replace(&mut self.state, regime.map(|regime| FnState { regime }));
        if self.state.is_some() {
            if let syn::Expr::Block(block) = &*node.body {
                self.handle_tail_block(&block.block);
            } else {
                self.handle_tail_expr(&node.body);
            }
        }
        visit::visit_expr_closure(self, node);
        self.state = saved;
    }

    fn visit_expr_async(&mut self, node: &'ast syn::ExprAsync) {
        // An async block has its own output type we cannot see.
        let saved = self.state.take();
        visit::visit_expr_async(self, node);
        self.state = saved;
    }

    fn visit_expr_const(&mut self, node: &'ast syn::ExprConst) {
        let saved = self.state.take();
        visit::visit_expr_const(self, node);
        self.state = saved;
    }

    fn visit_expr(&mut self, node: &'ast syn::Expr) {
        match node {
            syn::Expr::Try(try_expr) => {
                if matches!(
                    self.state.as_ref().map(|s| &s.regime),
                    Some(Regime::Simple)
                ) {
                    self.wrap_try(try_expr);
                }
            }
            syn::Expr::Return(ret) => {
                if let Some(value) = ret.expr.as_deref() {
                    self.handle_return_site(value);
                }
            }
            _ => {}
        }
        visit::visit_expr(self, node);
    }
}

// ============================================================================
// Expression predicates
// ============================================================================

fn type_is_traced(ty: &syn::Type) -> bool {
    match ty {
        syn::Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|seg| seg.ident == "Traced")
            .unwrap_or(false),
        syn::Type::Paren(paren) => type_is_traced(&paren.elem),
        _ => false,
    }
}

fn is_ok_literal(expr: &syn::Expr) -> bool {
    call_to(expr, "Ok").is_some()
}

fn err_literal_arg(expr: &syn::Expr) -> Option<&syn::Expr> {
    call_to(expr, "Err")
}

/// For `Name(arg)` or `Result::Name(arg)`, the single argument.
fn call_to<'a>(expr: &'a syn::Expr, name: &str) -> Option<&'a syn::Expr> {
    let expr = peel(expr);
    let syn::Expr::Call(call) = expr else {
        return None;
    };
    let syn::Expr::Path(path) = &*call.func else {
        return None;
    };
    let last = path.path.segments.last()?;
    if last.ident != name || call.args.len() != 1 {
        return None;
    }
    call.args.first()
}

fn peel(expr: &syn::Expr) -> &syn::Expr {
    match expr {
        syn::Expr::Paren(inner) => peel(&inner.expr),
        syn::Expr::Group(inner) => peel(&inner.expr),
        _ => expr,
    }
}

/// Whether the expression already is a wrap: a `trace`/`traced`/`trace_last`
/// method call, a qualified call of the library's constructors, or the
/// `errorf!` macro. Purely lexical, like the rest of the planner.
fn already_wrapped(expr: &syn::Expr) -> bool {
    match peel(expr) {
        syn::Expr::MethodCall(call) => {
            let name = call.method.to_string();
            matches!(name.as_str(), "trace" | "traced" | "trace_last")
        }
        syn::Expr::Call(call) => match &*call.func {
            syn::Expr::Path(path) => {
                let mentions_lib = path.path.segments.iter().any(|seg| seg.ident == "retrace");
                let constructor = path
                    .path
                    .segments
                    .last()
                    .map(|seg| {
                        let ident = &seg.ident;
                        ident == "wrap" || ident == "msg" || ident == "join"
                    })
                    .unwrap_or(false);
                mentions_lib && constructor
            }
            _ => false,
        },
        syn::Expr::Macro(mac) => mac
            .mac
            .path
            .segments
            .last()
            .map(|seg| seg.ident == "errorf")
            .unwrap_or(false),
        _ => false,
    }
}

/// Expressions whose value never materializes; suffixing them would at best
/// produce unreachable-code warnings.
fn diverges(expr: &syn::Expr) -> bool {
    match peel(expr) {
        syn::Expr::Return(_) | syn::Expr::Break(_) | syn::Expr::Continue(_) => true,
        syn::Expr::Macro(mac) => mac
            .mac
            .path
            .segments
            .last()
            .map(|seg| {
                let ident = seg.ident.to_string();
                matches!(
                    ident.as_str(),
                    "panic" | "unreachable" | "todo" | "unimplemented"
                )
            })
            .unwrap_or(false),
        syn::Expr::Loop(_) => true,
        _ => false,
    }
}

/// Whether a method suffix can attach without changing precedence.
fn postfix_safe(expr: &syn::Expr) -> bool {
    matches!(
        expr,
        syn::Expr::Array(_)
            | syn::Expr::Await(_)
            | syn::Expr::Call(_)
            | syn::Expr::Field(_)
            | syn::Expr::Group(_)
            | syn::Expr::Index(_)
            | syn::Expr::Lit(_)
            | syn::Expr::Macro(_)
            | syn::Expr::MethodCall(_)
            | syn::Expr::Paren(_)
            | syn::Expr::Path(_)
            | syn::Expr::Try(_)
            | syn::Expr::Tuple(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(src: &str) -> String {
        let parsed = parse_file("test.rs", src, &RewriteOpts::default()).expect("parse");
        parsed.rewrite()
    }

    fn rewrite_opts(src: &str, opts: &RewriteOpts) -> ParsedFile {
        parse_file("test.rs", src, opts).expect("parse")
    }

    #[test]
    fn wraps_a_propagation_site() {
        let src = "use retrace::Result;\nfn f() -> Result<()> {\n    g()?;\n    Ok(())\n}\n";
        let out = rewrite(src);
        assert!(out.contains("g().trace()?;"), "{out}");
        assert!(out.contains("use retrace::Result; use ::retrace::{ResultExt as _};"), "{out}");
    }

    #[test]
    fn ok_literals_are_never_wrapped() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    Ok(())\n}\n";
        let out = rewrite(src);
        assert_eq!(out, src);
    }

    #[test]
    fn err_literals_wrap_the_inner_value() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    Err(make())\n}\n";
        let out = rewrite(src);
        assert!(out.contains("Err(make().traced())"), "{out}");
    }

    #[test]
    fn tail_result_expressions_are_traced() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    helper()\n}\n";
        let out = rewrite(src);
        assert!(out.contains("helper().trace()"), "{out}");
    }

    #[test]
    fn tail_recursion_reaches_if_and_match_arms() {
        let src = "fn f(x: bool) -> Result<(), retrace::Traced> {\n    if x {\n        helper()\n    } else {\n        match x {\n            true => other(),\n            false => Ok(()),\n        }\n    }\n}\n";
        let out = rewrite(src);
        assert!(out.contains("helper().trace()"), "{out}");
        assert!(out.contains("other().trace()"), "{out}");
        assert!(out.contains("false => Ok(()),"), "{out}");
    }

    #[test]
    fn functions_without_eligible_results_are_untouched() {
        let src = "fn f() -> Result<(), std::io::Error> {\n    g()?;\n    Ok(())\n}\n";
        assert_eq!(rewrite(src), src);
    }

    #[test]
    fn closures_with_written_return_types_participate() {
        let src = "fn outer() {\n    let f = |x: u8| -> Result<(), retrace::Traced> { inner(x) };\n}\n";
        let out = rewrite(src);
        assert!(out.contains("inner(x).trace()"), "{out}");
    }

    #[test]
    fn closures_without_types_are_skipped_but_recursed() {
        // The `?` inside the untyped closure returns from the closure, so it
        // must not be wrapped even though the outer fn is eligible.
        let src = "fn f() -> Result<(), retrace::Traced> {\n    let c = || { maybe()?; Some(2) };\n    g()?;\n    Ok(())\n}\n";
        let out = rewrite(src);
        assert!(out.contains("let c = || { maybe()?; Some(2) };"), "{out}");
        assert!(out.contains("g().trace()?;"), "{out}");
    }

    #[test]
    fn already_wrapped_sites_are_left_alone() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    g().trace()?;\n    Err(retrace::msg(\"x\"))\n}\n";
        let out = rewrite(src);
        assert!(out.contains("g().trace()?;"), "{out}");
        assert!(!out.contains("trace().trace()"), "{out}");
        assert!(out.contains("Err(retrace::msg(\"x\"))"), "{out}");
        assert!(!out.contains("msg(\"x\").traced()"), "{out}");
    }

    #[test]
    fn skip_markers_suppress_and_count() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    g()? ; // retrace:skip\n    h()?;\n    Ok(())\n}\n";
        let parsed = rewrite_opts(src, &RewriteOpts::default());
        let out = parsed.rewrite();
        assert!(out.contains("g()? ; // retrace:skip"), "{out}");
        assert!(out.contains("h().trace()?;"), "{out}");
        assert!(parsed.unused_markers.is_empty());
    }

    #[test]
    fn unused_markers_are_reported() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    Ok(()) // retrace:skip\n}\n";
        let parsed = rewrite_opts(src, &RewriteOpts::default());
        assert!(!parsed.changed());
        assert_eq!(parsed.unused_markers, vec![2]);
    }

    #[test]
    fn tuple_returns_use_trace_last() {
        let src = "fn f() -> (u32, retrace::Result<()>) {\n    helper()\n}\n";
        let out = rewrite(src);
        assert!(out.contains("helper().trace_last()"), "{out}");
        assert!(out.contains("TraceLast as _"), "{out}");
    }

    #[test]
    fn tuple_literals_wrap_elementwise() {
        let src = "fn f() -> (u32, retrace::Result<()>) {\n    (1, helper())\n}\n";
        let out = rewrite(src);
        assert!(out.contains("(1, helper().trace())"), "{out}");
    }

    #[test]
    fn no_wrapn_uses_a_block_temporary() {
        let src = "fn f() -> (u32, retrace::Result<()>) {\n    helper()\n}\n";
        let parsed = rewrite_opts(src, &RewriteOpts { no_wrapn: true });
        let out = parsed.rewrite();
        assert!(
            out.contains("{ let (__r0, __r1) = helper(); (__r0, __r1.trace()) }"),
            "{out}"
        );
    }

    #[test]
    fn non_final_error_positions_diagnose_and_skip() {
        let src = "fn f() -> (retrace::Result<()>, u32) {\n    helper()\n}\n";
        let parsed = rewrite_opts(src, &RewriteOpts::default());
        assert!(!parsed.changed());
        assert_eq!(parsed.diagnostics.len(), 1);
        assert!(parsed.diagnostics[0].message.contains("non-final"));
    }

    #[test]
    fn multiple_error_positions_diagnose_and_skip() {
        let src = "fn f() -> (retrace::Result<()>, retrace::Result<()>) {\n    helper()\n}\n";
        let parsed = rewrite_opts(src, &RewriteOpts::default());
        assert!(!parsed.changed());
        assert_eq!(parsed.diagnostics.len(), 1);
        assert!(parsed.diagnostics[0].message.contains("multiple"));
    }

    #[test]
    fn trace_delegates_are_protected() {
        let src = "impl Wrapper {\n    fn trace(self) -> Result<(), retrace::Traced> {\n        self.inner\n    }\n}\n";
        let out = rewrite(src);
        assert_eq!(out, src);
    }

    #[test]
    fn nested_modules_get_their_own_trait_import() {
        // A `use` is module-scoped, so the import has to land inside the
        // module whose functions were edited.
        let src = "mod inner {\n    pub fn go() -> Result<(), retrace::Traced> {\n        helper()\n    }\n}\n";
        let out = rewrite(src);
        assert!(
            out.contains("mod inner {\n    use ::retrace::{ResultExt as _}; pub fn go()"),
            "{out}"
        );
        // Nothing at the root needed wrapping, so no root-level import.
        assert!(!out.starts_with("use"), "{out}");
    }

    #[test]
    fn rewriting_is_idempotent() {
        let src = "use retrace::Result;\nfn f() -> Result<()> {\n    g()?;\n    Err(make())\n}\n";
        let once = rewrite(&rewrite(src));
        let twice = rewrite(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn shebangs_are_preserved() {
        let src = "#!/usr/bin/env run-cargo-script\nfn f() -> Result<(), retrace::Traced> {\n    helper()\n}\n";
        let out = rewrite(src);
        assert!(out.starts_with("#!/usr/bin/env run-cargo-script\n"), "{out}");
        assert!(out.contains("helper().trace()"), "{out}");
    }

    #[test]
    fn non_postfix_expressions_get_parenthesized() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    return if cond() { a() } else { b() };\n}\n";
        let out = rewrite(src);
        assert!(
            out.contains("return (if cond() { a() } else { b() }).trace();"),
            "{out}"
        );
    }

    #[test]
    fn returns_inside_nested_items_use_their_own_classification() {
        let src = "fn f() -> Result<(), retrace::Traced> {\n    fn helper() -> u32 {\n        return 7;\n    }\n    g()?;\n    Ok(())\n}\n";
        let out = rewrite(src);
        assert!(out.contains("return 7;"), "{out}");
        assert!(out.contains("g().trace()?;"), "{out}");
    }
}
