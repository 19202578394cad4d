//! The raw abstract syntax of a module, as delivered by the binary decoder
//! or by an external text front-end.
//!
//! Identifiers are still a mix of numeric indices and textual names at this
//! stage, module fields appear in source order, and block types may be
//! inline signatures. The grouper and rewriter lower this shape into the
//! fully indexed [`Module`](crate::module::Module).

use std::rc::Rc;

use weft_core::{FuncType, RefType, ValType, F32, F64};

/// An identifier as written in the source: a raw index or a textual name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    /// A raw 0-based index into the addressed index space.
    Num(u32),
    /// A textual `$name`, resolved by the rewriter.
    Name(String),
}

impl From<u32> for Id {
    fn from(index: u32) -> Self {
        Self::Num(index)
    }
}

impl From<&str> for Id {
    fn from(name: &str) -> Self {
        Self::Name(name.into())
    }
}

/// A reference to a function type: an index, an inline signature, or both.
///
/// When both are present the rewriter checks that they agree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeUse {
    /// Reference to a declared type, if any.
    pub index: Option<Id>,
    /// Inline parameter/result signature, if any.
    pub inline: Option<InlineSig>,
}

impl TypeUse {
    /// A type use referring to a declared type by index.
    pub fn index(id: impl Into<Id>) -> Self {
        Self {
            index: Some(id.into()),
            inline: None,
        }
    }

    /// A type use carrying only an inline signature.
    pub fn inline(sig: InlineSig) -> Self {
        Self {
            index: None,
            inline: Some(sig),
        }
    }
}

/// An inline function signature, with optionally named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineSig {
    /// Parameters in order; names share the local scope of the function.
    pub params: Vec<Local>,
    /// Result types in order.
    pub results: Vec<ValType>,
}

impl InlineSig {
    /// Drops the parameter names, leaving the plain signature.
    pub fn to_func_type(&self) -> FuncType {
        let params: Vec<ValType> = self.params.iter().map(|local| local.ty).collect();
        FuncType::new(params, self.results.clone())
    }
}

/// The signature annotation of a structured control instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockType {
    /// `[] -> []`.
    Void,
    /// `[] -> [t]`.
    Val(ValType),
    /// A reference to a declared function type.
    TypeUse(TypeUse),
}

/// The raw annotation of a structured control instruction: an optional
/// `$label` and the block signature.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAnnot {
    /// The branch label, when the source named one.
    pub label: Option<String>,
    /// The block signature.
    pub ty: BlockType,
}

impl From<BlockType> for BlockAnnot {
    fn from(ty: BlockType) -> Self {
        Self { label: None, ty }
    }
}

/// Minimum and optional maximum size of a table or memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Initial size.
    pub min: u32,
    /// Upper bound, if any.
    pub max: Option<u32>,
}

/// The type of a table: its limits and element reference type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TableType {
    /// Size bounds, in elements.
    pub limits: Limits,
    /// Type of the stored references.
    pub elem: RefType,
}

/// The type of a linear memory: its limits in 64 KiB pages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemType {
    /// Size bounds, in pages.
    pub limits: Limits,
}

/// The type of a global: its value type and mutability.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GlobalType {
    /// Type of the stored value.
    pub ty: ValType,
    /// Whether `global.set` may target it.
    pub mutable: bool,
}

/// The static operand pair of a memory access instruction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MemArg {
    /// Expected alignment, as a power of two exponent.
    pub align: u32,
    /// Constant byte offset added to the dynamic address.
    pub offset: u32,
}

/// Operand width of a numeric instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NumSize {
    /// 32-bit operands.
    S32,
    /// 64-bit operands.
    S64,
}

/// Signedness of an integer instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sign {
    /// Two's complement signed interpretation.
    S,
    /// Unsigned interpretation.
    U,
}

/// Width of a packed (sub-word) memory access or sign extension.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackSize {
    /// One byte.
    P8,
    /// Two bytes.
    P16,
    /// Four bytes; only meaningful on 64-bit operands.
    P32,
}

impl PackSize {
    /// The access width in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Self::P8 => 1,
            Self::P16 => 2,
            Self::P32 => 4,
        }
    }
}

impl NumSize {
    /// The operand width in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Self::S32 => 4,
            Self::S64 => 8,
        }
    }
}

/// Integer unary operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IUnOp {
    /// Count leading zeros.
    Clz,
    /// Count trailing zeros.
    Ctz,
    /// Count one bits.
    Popcnt,
}

/// Integer binary operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IBinOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Division; traps on zero and signed overflow.
    Div(Sign),
    /// Remainder; traps on zero and signed overflow.
    Rem(Sign),
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Left shift; count masked to the width.
    Shl,
    /// Right shift; count masked to the width.
    Shr(Sign),
    /// Left rotation.
    Rotl,
    /// Right rotation.
    Rotr,
}

/// Integer comparison operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IRelOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt(Sign),
    /// Greater than.
    Gt(Sign),
    /// Less than or equal.
    Le(Sign),
    /// Greater than or equal.
    Ge(Sign),
}

/// Float unary operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FUnOp {
    /// Absolute value.
    Abs,
    /// Sign flip.
    Neg,
    /// Round up.
    Ceil,
    /// Round down.
    Floor,
    /// Round towards zero.
    Trunc,
    /// Round to nearest, ties to even.
    Nearest,
    /// Square root.
    Sqrt,
}

/// Float binary operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FBinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// NaN-propagating minimum.
    Min,
    /// NaN-propagating maximum.
    Max,
    /// Sign transfer.
    Copysign,
}

/// Float comparison operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FRelOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Greater than.
    Gt,
    /// Less than or equal.
    Le,
    /// Greater than or equal.
    Ge,
}

/// A sequence of instructions with shared ownership, so that runtime
/// continuations can point into it without copying.
pub type Expr<X, B> = Rc<[Instr<X, B>]>;

/// One instruction, generic over its identifier representation `X` and its
/// block type representation `B`.
///
/// The raw AST uses `Instr<Id, BlockType>`; the rewriter lowers it to
/// `Instr<u32, FuncType>` with every identifier resolved and every block
/// signature explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr<X, B> {
    /// Trap unconditionally.
    Unreachable,
    /// Do nothing.
    Nop,
    /// A structured block; branch target is its end.
    Block(B, Expr<X, B>),
    /// A structured loop; branch target is its start.
    Loop(B, Expr<X, B>),
    /// Two-armed conditional.
    If(B, Expr<X, B>, Expr<X, B>),
    /// Unconditional branch to the `n`-th enclosing label.
    Br(X),
    /// Conditional branch.
    BrIf(X),
    /// Indexed branch over a table of labels, with a default.
    BrTable(Box<[X]>, X),
    /// Return from the enclosing function.
    Return,
    /// Direct call.
    Call(X),
    /// Indirect call through a table, checked against a declared type.
    CallIndirect(X, B),
    /// Discard the top of the stack.
    Drop,
    /// Pick one of two values by an `i32` condition.
    Select(Option<ValType>),
    /// Read a local or parameter.
    LocalGet(X),
    /// Write a local or parameter.
    LocalSet(X),
    /// Write a local, keeping the value on the stack.
    LocalTee(X),
    /// Read a global.
    GlobalGet(X),
    /// Write a mutable global.
    GlobalSet(X),
    /// Read a table slot.
    TableGet(X),
    /// Write a table slot.
    TableSet(X),
    /// Current size of a table.
    TableSize(X),
    /// Grow a table, returning the old size or `-1`.
    TableGrow(X),
    /// Fill a table span with one reference.
    TableFill(X),
    /// Copy a span between (or within) tables.
    TableCopy {
        /// Destination table.
        dst: X,
        /// Source table.
        src: X,
    },
    /// Copy a span out of a passive element segment.
    TableInit {
        /// Destination table.
        table: X,
        /// Source element segment.
        elem: X,
    },
    /// Drop a passive element segment.
    ElemDrop(X),
    /// Whole-word integer load.
    ILoad(NumSize, MemArg),
    /// Float load.
    FLoad(NumSize, MemArg),
    /// Packed integer load with sign or zero extension.
    ILoadPacked(NumSize, PackSize, Sign, MemArg),
    /// Whole-word integer store.
    IStore(NumSize, MemArg),
    /// Float store.
    FStore(NumSize, MemArg),
    /// Packed integer store of the low bits.
    IStorePacked(NumSize, PackSize, MemArg),
    /// Current memory size in pages.
    MemorySize,
    /// Grow memory, returning the old size in pages or `-1`.
    MemoryGrow,
    /// Fill a byte span with one value.
    MemoryFill,
    /// Copy a byte span within memory.
    MemoryCopy,
    /// Copy bytes out of a passive data segment.
    MemoryInit(X),
    /// Drop a passive data segment.
    DataDrop(X),
    /// A constant `i32`.
    I32Const(i32),
    /// A constant `i64`.
    I64Const(i64),
    /// A constant `f32`.
    F32Const(F32),
    /// A constant `f64`.
    F64Const(F64),
    /// Integer unary operator.
    IUnop(NumSize, IUnOp),
    /// Integer binary operator.
    IBinop(NumSize, IBinOp),
    /// Integer zero test.
    IEqz(NumSize),
    /// Integer comparison.
    IRelop(NumSize, IRelOp),
    /// Float unary operator.
    FUnop(NumSize, FUnOp),
    /// Float binary operator.
    FBinop(NumSize, FBinOp),
    /// Float comparison.
    FRelop(NumSize, FRelOp),
    /// In-place sign extension from a packed width.
    IExtend(NumSize, PackSize),
    /// `i32.wrap_i64`.
    I32WrapI64,
    /// `i64.extend_i32_s` / `_u`.
    I64ExtendI32(Sign),
    /// Trapping float-to-integer truncation: target width, source width.
    ITrunc(NumSize, NumSize, Sign),
    /// Saturating float-to-integer truncation.
    ITruncSat(NumSize, NumSize, Sign),
    /// Integer-to-float conversion: target width, source width.
    FConvertI(NumSize, NumSize, Sign),
    /// `f32.demote_f64`.
    F32DemoteF64,
    /// `f64.promote_f32`.
    F64PromoteF32,
    /// Bit-cast from float to integer of the same width.
    IReinterpretF(NumSize),
    /// Bit-cast from integer to float of the same width.
    FReinterpretI(NumSize),
    /// A null reference.
    RefNull(RefType),
    /// Null test on a reference.
    RefIsNull,
    /// A reference to a declared function.
    RefFunc(X),
}

/// An instruction of the raw AST.
pub type RawInstr = Instr<Id, BlockAnnot>;

/// An instruction sequence of the raw AST.
pub type RawExpr = Expr<Id, BlockAnnot>;

/// A raw module: an ordered sequence of fields, exactly as parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// Optional module name.
    pub id: Option<String>,
    /// Module fields in source order.
    pub fields: Vec<Field>,
}

/// One field of a raw module.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// A declared function type.
    Type(TypeDef),
    /// An import of any kind.
    Import(Import),
    /// A function definition.
    Func(Func),
    /// A table definition.
    Table(Table),
    /// A memory definition.
    Memory(Memory),
    /// A global definition.
    Global(Global),
    /// An export, unresolved until rewrite.
    Export(Export),
    /// The start function.
    Start(Id),
    /// An element segment.
    Elem(Elem),
    /// A data segment.
    Data(Data),
    /// A custom section, retained by name.
    Custom(Custom),
}

/// A declared function type with an optional name.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Optional `$name`.
    pub id: Option<String>,
    /// The declared signature.
    pub ty: FuncType,
}

/// An import: the providing module, the item name, and the declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// Name of the providing module.
    pub module: String,
    /// Name of the item within the providing module.
    pub name: String,
    /// What is imported.
    pub desc: ImportDesc,
}

/// The kind and declared type of an import.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    /// A function with the given type use.
    Func(Option<String>, TypeUse),
    /// A table.
    Table(Option<String>, TableType),
    /// A memory.
    Memory(Option<String>, MemType),
    /// A global.
    Global(Option<String>, GlobalType),
}

/// A locally defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    /// Optional `$name`.
    pub id: Option<String>,
    /// Its type use.
    pub ty: TypeUse,
    /// Declared locals, in order after the parameters.
    pub locals: Vec<Local>,
    /// The body.
    pub body: RawExpr,
}

/// One declared local.
#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    /// Optional `$name`, sharing the parameter scope.
    pub id: Option<String>,
    /// Its type.
    pub ty: ValType,
}

/// A locally defined table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Optional `$name`.
    pub id: Option<String>,
    /// Its type.
    pub ty: TableType,
}

/// A locally defined memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    /// Optional `$name`.
    pub id: Option<String>,
    /// Its type.
    pub ty: MemType,
}

/// A locally defined global with its initialiser.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    /// Optional `$name`.
    pub id: Option<String>,
    /// Its type.
    pub ty: GlobalType,
    /// The constant initialiser expression.
    pub init: RawExpr,
}

/// The kind of an exported or imported item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExternKind {
    /// A function.
    Func,
    /// A table.
    Table,
    /// A memory.
    Memory,
    /// A global.
    Global,
}

/// An export carrying a still-unresolved identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    /// The UTF-8 export name.
    pub name: String,
    /// The kind of the exported item.
    pub kind: ExternKind,
    /// Which item, by index or name.
    pub item: Id,
}

/// An element segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Elem {
    /// Optional `$name`.
    pub id: Option<String>,
    /// Type of the produced references.
    pub ty: RefType,
    /// Initialiser expressions, one per element.
    pub items: Vec<RawExpr>,
    /// Placement mode.
    pub mode: ElemMode,
}

/// Placement of an element segment.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemMode {
    /// Available for `table.init` only.
    Passive,
    /// Contributes to the declared-reference set but is never materialised.
    Declarative,
    /// Written into a table at link time.
    Active {
        /// Destination table.
        table: Id,
        /// Constant offset expression.
        offset: RawExpr,
    },
}

/// A data segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    /// Optional `$name`.
    pub id: Option<String>,
    /// The payload.
    pub bytes: Vec<u8>,
    /// Placement mode.
    pub mode: DataMode,
}

/// Placement of a data segment.
#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    /// Available for `memory.init` only.
    Passive,
    /// Copied into a memory at link time.
    Active {
        /// Destination memory.
        memory: Id,
        /// Constant offset expression.
        offset: RawExpr,
    },
}

/// A custom section, kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Custom {
    /// Section name.
    pub name: String,
    /// Raw payload.
    pub bytes: Vec<u8>,
}
