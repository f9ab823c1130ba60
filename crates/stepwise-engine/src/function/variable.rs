/// Description of one local variable or parameter of a compiled function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    name: String,
    ty: String,
    is_parameter: bool,
    is_hidden: bool,
    is_captured: bool,
    local_index: usize,
    global_index: usize,
}

impl VariableInfo {
    pub(super) const fn new(
        name: String,
        ty: String,
        flags: VariableFlags,
        local_index: usize,
        global_index: usize,
    ) -> Self {
        Self {
            name,
            ty,
            is_parameter: flags.parameter,
            is_hidden: flags.hidden,
            is_captured: flags.captured,
            local_index,
            global_index,
        }
    }

    /// Name shown to the user (unique within the function).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type name.
    pub fn ty(&self) -> &str {
        &self.ty
    }

    /// Whether the variable is a function parameter.
    pub const fn is_parameter(&self) -> bool {
        self.is_parameter
    }

    /// Whether the variable is a compiler temporary, hidden from the user.
    pub const fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    /// Whether the variable is heap-boxed because a nested closure captures it.
    pub const fn is_captured(&self) -> bool {
        self.is_captured
    }

    /// Slot of the variable within its storage class (direct or captured).
    pub const fn local_index(&self) -> usize {
        self.local_index
    }

    /// Slot of the variable within the frame's unified locals array.
    pub const fn global_index(&self) -> usize {
        self.global_index
    }
}

/// Flags of a variable declared through
/// [FunctionBuilder::variable](super::FunctionBuilder::variable).
#[derive(Clone, Copy, Debug, Default)]
pub struct VariableFlags {
    /// The variable is a parameter.
    pub parameter: bool,

    /// The variable is a compiler temporary.
    pub hidden: bool,

    /// The variable is captured by a nested closure.
    pub captured: bool,
}

impl VariableFlags {
    /// Flags of a plain local.
    pub const LOCAL: Self = Self {
        parameter: false,
        hidden: false,
        captured: false,
    };

    /// Flags of a plain parameter.
    pub const PARAMETER: Self = Self {
        parameter: true,
        hidden: false,
        captured: false,
    };

    /// Returns the same flags, marked as captured.
    pub const fn captured(mut self) -> Self {
        self.captured = true;
        self
    }

    /// Returns the same flags, marked as hidden.
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}
