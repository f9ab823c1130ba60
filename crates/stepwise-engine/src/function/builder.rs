use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use super::{FunctionInfo, VariableFlags, VariableInfo};
use crate::instrument::GeneratorFactory;
use crate::span::SourceSpan;

/// Name given to variables declared without one.
const UNNAMED_VARIABLE: &str = "local";

/// Builder for [FunctionInfo].
///
/// It is the compiler-side half of the instrumentation contract: sequence
/// points get their cookie in declaration order and are never renumbered, and
/// variables are laid out so the debugger can address them uniformly.
pub struct FunctionBuilder {
    name: String,
    sequence_points: Vec<SourceSpan>,
    variables: Vec<VariableInfo>,
    used_names: HashSet<String>,
    direct_count: usize,
    captured_count: usize,
    /// Variables grouped by lexical depth.
    scopes: Vec<Vec<usize>>,
    /// Variables of the currently open scopes, outermost first.
    open_scopes: Vec<Vec<usize>>,
    variables_in_scope: Vec<Box<[usize]>>,
    generator_factory: Option<Arc<dyn GeneratorFactory>>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl FunctionBuilder {
    pub(super) fn new(name: String) -> Self {
        Self {
            name,
            sequence_points: Vec::new(),
            variables: Vec::new(),
            used_names: HashSet::new(),
            direct_count: 0,
            captured_count: 0,
            scopes: vec![Vec::new()],
            open_scopes: vec![Vec::new()],
            variables_in_scope: Vec::new(),
            generator_factory: None,
            payload: None,
        }
    }

    /// Appends a sequence point, returning its location cookie.
    pub fn sequence_point(&mut self, span: SourceSpan) -> crate::Result<usize> {
        let cookie = self.sequence_points.len();

        if span.file().is_empty() {
            return Err(crate::Error::MissingSourceFile(cookie));
        }

        let visible = self
            .open_scopes
            .iter()
            .flat_map(|scope| scope.iter().copied())
            .collect();

        self.sequence_points.push(span);
        self.variables_in_scope.push(visible);

        Ok(cookie)
    }

    /// Declares a variable in the innermost open scope.
    ///
    /// A `None` name declares a hidden variable named `local`. Names are made
    /// unique by appending a counter (`x`, `x1`, `x2`, ...).
    pub fn variable(
        &mut self,
        name: Option<&str>,
        ty: impl Into<String>,
        mut flags: VariableFlags,
    ) -> &VariableInfo {
        let base = match name {
            Some(name) => name,
            None => {
                flags.hidden = true;
                UNNAMED_VARIABLE
            }
        };

        let mut unique = base.to_owned();
        let mut suffix = 1usize;
        while self.used_names.contains(&unique) {
            unique = format!("{base}{suffix}");
            suffix += 1;
        }
        self.used_names.insert(unique.clone());

        let local_index = if flags.captured {
            &mut self.captured_count
        } else {
            &mut self.direct_count
        };
        let index = *local_index;
        *local_index += 1;

        let global_index = self.variables.len();
        self.variables.push(VariableInfo::new(
            unique,
            ty.into(),
            flags,
            index,
            global_index,
        ));

        let depth = self.open_scopes.len() - 1;
        self.scopes[depth].push(global_index);
        if let Some(scope) = self.open_scopes.last_mut() {
            scope.push(global_index);
        }

        &self.variables[global_index]
    }

    /// Declares a parameter.
    pub fn parameter(&mut self, name: &str, ty: impl Into<String>) -> &VariableInfo {
        self.variable(Some(name), ty, VariableFlags::PARAMETER)
    }

    /// Declares a plain local.
    pub fn local(&mut self, name: &str, ty: impl Into<String>) -> &VariableInfo {
        self.variable(Some(name), ty, VariableFlags::LOCAL)
    }

    /// Opens a nested lexical scope.
    pub fn enter_scope(&mut self) -> &mut Self {
        let depth = self.open_scopes.len();
        if self.scopes.len() <= depth {
            self.scopes.push(Vec::new());
        }
        self.open_scopes.push(Vec::new());
        self
    }

    /// Closes the innermost lexical scope. The function scope is never closed.
    pub fn exit_scope(&mut self) -> &mut Self {
        if self.open_scopes.len() > 1 {
            self.open_scopes.pop();
        }
        self
    }

    /// Attaches the resumable form of a suspend/resume body.
    pub fn generator(mut self, factory: impl GeneratorFactory + 'static) -> Self {
        self.generator_factory = Some(Arc::new(factory));
        self
    }

    /// Attaches a language-specific payload.
    pub fn payload(mut self, payload: impl Any + Send + Sync) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Builds the function metadata.
    pub fn build(self) -> Arc<FunctionInfo> {
        Arc::new(FunctionInfo::from_parts(
            self.name,
            self.sequence_points,
            self.variables,
            self.scopes.into_iter().map(Vec::into_boxed_slice).collect(),
            self.variables_in_scope,
            self.generator_factory,
            self.payload,
        ))
    }
}
