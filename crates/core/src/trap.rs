use core::fmt;

/// A typed runtime failure.
///
/// Execution of Wasm code may produce a [`Trap`], which immediately aborts
/// the current path. Traps cannot be handled by Wasm code; they unwind to
/// the enclosing invocation boundary and are reported to the embedder.
#[derive(Debug, Clone)]
pub struct Trap {
    reason: TrapReason,
}

#[derive(Debug, Clone)]
enum TrapReason {
    /// A trap raised by an instruction.
    Code(TrapCode),
    /// A trap described by a free-form message, e.g. from a host function.
    Message(Box<str>),
}

impl Trap {
    /// Creates a new [`Trap`] described by `message`.
    #[cold]
    pub fn new<T>(message: T) -> Self
    where
        T: Into<Box<str>>,
    {
        Self {
            reason: TrapReason::Message(message.into()),
        }
    }

    /// Returns the [`TrapCode`] if this trap originates from an instruction.
    pub fn code(&self) -> Option<TrapCode> {
        match &self.reason {
            TrapReason::Code(code) => Some(*code),
            TrapReason::Message(_) => None,
        }
    }
}

impl From<TrapCode> for Trap {
    #[cold]
    fn from(code: TrapCode) -> Self {
        Self {
            reason: TrapReason::Code(code),
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.reason {
            TrapReason::Code(code) => fmt::Display::fmt(code, f),
            TrapReason::Message(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for Trap {}

/// The fixed set of instruction-level trap conditions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrapCode {
    /// The `unreachable` instruction was executed.
    Unreachable,
    /// A load or store fell outside the bounds of a linear memory.
    OutOfBoundsMemoryAccess,
    /// A table access fell outside the bounds of the table.
    OutOfBoundsTableAccess,
    /// `call_indirect` addressed a table slot outside the initialised range.
    UndefinedElement,
    /// `call_indirect` hit a null table slot.
    UninitializedElement,
    /// Signed division or remainder overflowed, or a float truncation fell
    /// outside the target integer range.
    IntegerOverflow,
    /// Integer division or remainder by zero.
    IntegerDivideByZero,
    /// A float truncation was applied to a NaN.
    InvalidConversionToInt,
    /// The function loaded by `call_indirect` has a different type than the
    /// instruction declares.
    IndirectCallTypeMismatch,
    /// A host function was invoked with arguments that do not match its
    /// declared signature.
    ExternCallArgTypeMismatch,
    /// The frame stack outgrew its limit.
    StackOverflow,
}

impl TrapCode {
    /// Returns the trap message as used by the reference test suite.
    pub fn trap_message(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::OutOfBoundsMemoryAccess => "out of bounds memory access",
            Self::OutOfBoundsTableAccess => "out of bounds table access",
            Self::UndefinedElement => "undefined element",
            Self::UninitializedElement => "uninitialized element",
            Self::IntegerOverflow => "integer overflow",
            Self::IntegerDivideByZero => "integer divide by zero",
            Self::InvalidConversionToInt => "invalid conversion to integer",
            Self::IndirectCallTypeMismatch => "indirect call type mismatch",
            Self::ExternCallArgTypeMismatch => "extern call argument type mismatch",
            Self::StackOverflow => "call stack exhausted",
        }
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.trap_message())
    }
}
