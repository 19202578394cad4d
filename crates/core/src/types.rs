use core::fmt;

/// The type of a nullable reference value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefType {
    /// A reference to a function.
    Func,
    /// An opaque reference provided by the host.
    Extern,
}

/// The type of a WebAssembly value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValType {
    /// A 32-bit integer, signed or unsigned depending on the operation.
    I32,
    /// A 64-bit integer, signed or unsigned depending on the operation.
    I64,
    /// A 32-bit IEEE 754-2008 floating point number.
    F32,
    /// A 64-bit IEEE 754-2008 floating point number.
    F64,
    /// A nullable reference.
    Ref(RefType),
}

impl ValType {
    /// Returns `true` if `self` is one of the four numeric types.
    pub fn is_num(&self) -> bool {
        !matches!(self, Self::Ref(_))
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Ref(RefType::Func) => "funcref",
            Self::Ref(RefType::Extern) => "externref",
        };
        write!(f, "{name}")
    }
}

/// The signature of a function: its parameter and result types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FuncType {
    params: Box<[ValType]>,
    results: Box<[ValType]>,
}

impl FuncType {
    /// Creates a new [`FuncType`] from the given parameter and result types.
    pub fn new<P, R>(params: P, results: R) -> Self
    where
        P: Into<Box<[ValType]>>,
        R: Into<Box<[ValType]>>,
    {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    /// The parameter types of the function.
    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    /// The result types of the function.
    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, p) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "] -> [")?;
        for (i, r) in self.results.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, "]")
    }
}
