use crate::nan_preserving_float::{F32, F64};
use crate::trap::TrapCode;
use crate::types::{RefType, ValType};

/// Runtime representation of a concrete value.
///
/// There is no distinction between signed and unsigned integers; operations
/// interpret the bits as one or the other. References carry a handle into
/// the enclosing store, or nothing when null.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    F32(F32),
    /// A 64-bit float.
    F64(F64),
    /// A nullable function reference carrying a store handle.
    FuncRef(Option<u32>),
    /// A nullable opaque host reference.
    ExternRef(Option<u32>),
}

impl Val {
    /// The zero/null value of the given type.
    pub fn default(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Self::I32(0),
            ValType::I64 => Self::I64(0),
            ValType::F32 => Self::F32(F32::from_bits(0)),
            ValType::F64 => Self::F64(F64::from_bits(0)),
            ValType::Ref(RefType::Func) => Self::FuncRef(None),
            ValType::Ref(RefType::Extern) => Self::ExternRef(None),
        }
    }

    /// The type of this value.
    pub fn ty(&self) -> ValType {
        match self {
            Self::I32(_) => ValType::I32,
            Self::I64(_) => ValType::I64,
            Self::F32(_) => ValType::F32,
            Self::F64(_) => ValType::F64,
            Self::FuncRef(_) => ValType::Ref(RefType::Func),
            Self::ExternRef(_) => ValType::Ref(RefType::Extern),
        }
    }

    /// Extracts a `T` if this value has the matching type.
    pub fn try_into<T: FromVal>(self) -> Option<T> {
        T::from_val(self)
    }
}

/// Construction of a Rust value from a [`Val`] of the matching type.
pub trait FromVal: Sized {
    /// Returns `None` if the [`Val`] has a different type than `Self` expects.
    fn from_val(val: Val) -> Option<Self>;
}

macro_rules! impl_from_val {
    ($variant:ident, $ty:ty) => {
        impl FromVal for $ty {
            fn from_val(val: Val) -> Option<Self> {
                match val {
                    Val::$variant(v) => Some(v.transmute_into()),
                    _ => None,
                }
            }
        }
    };
}

impl_from_val!(I32, i32);
impl_from_val!(I32, u32);
impl_from_val!(I64, i64);
impl_from_val!(I64, u64);
impl_from_val!(F32, F32);
impl_from_val!(F64, F64);

impl FromVal for bool {
    fn from_val(val: Val) -> Option<Self> {
        match val {
            Val::I32(v) => Some(v != 0),
            _ => None,
        }
    }
}

macro_rules! impl_val_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Val {
            fn from(v: $ty) -> Self {
                Val::$variant(v.transmute_into())
            }
        }
    };
}

impl_val_from!(I32, i32);
impl_val_from!(I32, u32);
impl_val_from!(I64, i64);
impl_val_from!(I64, u64);
impl_val_from!(F32, F32);
impl_val_from!(F64, F64);

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Val::I32(v as i32)
    }
}

/// Conversion to a narrower type by discarding high bits.
pub trait WrapInto<T> {
    /// Converts `self` by wrapping.
    fn wrap_into(self) -> T;
}

/// Conversion to a wider type by sign or zero extension, or to a float by
/// rounding to nearest.
pub trait ExtendInto<T> {
    /// Converts `self` by extension.
    fn extend_into(self) -> T;
}

/// Reinterpretation of the bits of one type as another of the same width.
pub trait TransmuteInto<T> {
    /// Bit-casts `self`.
    fn transmute_into(self) -> T;
}

/// Float-to-integer truncation towards zero, trapping when the value is a
/// NaN or out of range.
pub trait TryTruncateInto<T, E> {
    /// Converts `self`, or fails with the appropriate trap.
    fn try_truncate_into(self) -> Result<T, E>;
}

/// Float-to-integer truncation that saturates instead of trapping: NaN
/// becomes zero, out-of-range values clamp to the integer range.
pub trait TruncSatInto<T> {
    /// Converts `self`, saturating at the integer range bounds.
    fn trunc_sat_into(self) -> T;
}

/// Conversion from and to little-endian bytes.
pub trait LittleEndianConvert: Sized {
    /// The byte array matching the width of `Self`.
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    /// Serialises `self` into little-endian bytes.
    fn to_le_bytes(self) -> Self::Bytes;

    /// Reconstructs `Self` from little-endian bytes.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

/// Arithmetic shared by integers and floats.
pub trait ArithmeticOps<T>: Sized {
    /// Addition; integers wrap.
    fn add(self, other: T) -> T;
    /// Subtraction; integers wrap.
    fn sub(self, other: T) -> T;
    /// Multiplication; integers wrap.
    fn mul(self, other: T) -> T;
    /// Division; integers trap on zero divisors and signed overflow.
    fn div(self, other: T) -> Result<T, TrapCode>;
}

/// Operations specific to integer values.
pub trait Integer<T>: ArithmeticOps<T> {
    /// Number of leading zero bits.
    fn leading_zeros(self) -> T;
    /// Number of trailing zero bits.
    fn trailing_zeros(self) -> T;
    /// Number of one bits.
    fn count_ones(self) -> T;
    /// Bitwise left rotation; the count is taken modulo the width.
    fn rotl(self, other: T) -> T;
    /// Bitwise right rotation; the count is taken modulo the width.
    fn rotr(self, other: T) -> T;
    /// Remainder; traps on zero divisors and on signed overflow.
    fn rem(self, other: T) -> Result<T, TrapCode>;
}

/// Operations specific to float values.
pub trait Float<T>: ArithmeticOps<T> {
    /// Absolute value.
    fn abs(self) -> T;
    /// Largest integral value not greater than `self`.
    fn floor(self) -> T;
    /// Smallest integral value not less than `self`.
    fn ceil(self) -> T;
    /// Integral part of `self`.
    fn trunc(self) -> T;
    /// Nearest integral value, ties rounding to even.
    fn nearest(self) -> T;
    /// Square root.
    fn sqrt(self) -> T;
    /// Minimum, with NaN propagation.
    fn min(self, other: T) -> T;
    /// Maximum, with NaN propagation.
    fn max(self, other: T) -> T;
    /// `self` with the sign of `other`.
    fn copysign(self, other: T) -> T;
}

macro_rules! impl_wrap_into {
    ($from:ty, $into:ty) => {
        impl WrapInto<$into> for $from {
            fn wrap_into(self) -> $into {
                self as $into
            }
        }
    };
}

impl_wrap_into!(i32, i8);
impl_wrap_into!(i32, i16);
impl_wrap_into!(i64, i8);
impl_wrap_into!(i64, i16);
impl_wrap_into!(i64, i32);

impl WrapInto<F32> for F64 {
    fn wrap_into(self) -> F32 {
        F32::from(self.to_float() as f32)
    }
}

macro_rules! impl_extend_into {
    ($from:ty, $into:ty) => {
        impl ExtendInto<$into> for $from {
            fn extend_into(self) -> $into {
                self as $into
            }
        }
    };
    ($from:ty, $mid:ty, $into:ty) => {
        impl ExtendInto<$into> for $from {
            fn extend_into(self) -> $into {
                <$into>::from(self as $mid)
            }
        }
    };
}

impl_extend_into!(i8, i32);
impl_extend_into!(u8, i32);
impl_extend_into!(i16, i32);
impl_extend_into!(u16, i32);
impl_extend_into!(i8, i64);
impl_extend_into!(u8, i64);
impl_extend_into!(i16, i64);
impl_extend_into!(u16, i64);
impl_extend_into!(i32, i64);
impl_extend_into!(u32, i64);
impl_extend_into!(u32, u64);
impl_extend_into!(i32, f32, F32);
impl_extend_into!(u32, f32, F32);
impl_extend_into!(i64, f32, F32);
impl_extend_into!(u64, f32, F32);
impl_extend_into!(i32, f64, F64);
impl_extend_into!(u32, f64, F64);
impl_extend_into!(i64, f64, F64);
impl_extend_into!(u64, f64, F64);

impl ExtendInto<F64> for F32 {
    fn extend_into(self) -> F64 {
        F64::from(self.to_float() as f64)
    }
}

macro_rules! impl_transmute_self {
    ($($ty:ty),*) => {
        $(
            impl TransmuteInto<$ty> for $ty {
                fn transmute_into(self) -> $ty {
                    self
                }
            }
        )*
    };
}

impl_transmute_self!(i32, i64, u32, u64, F32, F64);

macro_rules! impl_transmute_as {
    ($from:ty, $into:ty) => {
        impl TransmuteInto<$into> for $from {
            fn transmute_into(self) -> $into {
                self as $into
            }
        }
    };
}

impl_transmute_as!(i32, u32);
impl_transmute_as!(u32, i32);
impl_transmute_as!(i64, u64);
impl_transmute_as!(u64, i64);

macro_rules! impl_transmute_float {
    ($float:ident, $signed:ty, $unsigned:ty) => {
        impl TransmuteInto<$signed> for $float {
            fn transmute_into(self) -> $signed {
                self.to_bits() as $signed
            }
        }

        impl TransmuteInto<$unsigned> for $float {
            fn transmute_into(self) -> $unsigned {
                self.to_bits()
            }
        }

        impl TransmuteInto<$float> for $signed {
            fn transmute_into(self) -> $float {
                $float::from_bits(self as $unsigned)
            }
        }

        impl TransmuteInto<$float> for $unsigned {
            fn transmute_into(self) -> $float {
                $float::from_bits(self)
            }
        }
    };
}

impl_transmute_float!(F32, i32, u32);
impl_transmute_float!(F64, i64, u64);

// Truncation bounds. Each constant is the smallest float at or above the
// exclusive upper bound, and the largest float at or below the exclusive
// lower bound, of the target integer range.
macro_rules! impl_try_truncate_into {
    ($float:ident, $prim:ty, $int:ty, $above:expr, $below:expr) => {
        impl TryTruncateInto<$int, TrapCode> for $float {
            fn try_truncate_into(self) -> Result<$int, TrapCode> {
                let value = self.to_float();
                if value.is_nan() {
                    return Err(TrapCode::InvalidConversionToInt);
                }
                let truncated = <$prim as Float<$prim>>::trunc(value);
                if truncated >= $above || truncated <= $below {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(truncated as $int)
            }
        }

        impl TruncSatInto<$int> for $float {
            fn trunc_sat_into(self) -> $int {
                let value = self.to_float();
                if value.is_nan() {
                    return 0;
                }
                let truncated = <$prim as Float<$prim>>::trunc(value);
                if truncated >= $above {
                    <$int>::MAX
                } else if truncated <= $below {
                    <$int>::MIN
                } else {
                    truncated as $int
                }
            }
        }
    };
}

impl_try_truncate_into!(F32, f32, i32, 2147483648.0f32, -2147483904.0f32);
impl_try_truncate_into!(F32, f32, u32, 4294967296.0f32, -1.0f32);
impl_try_truncate_into!(F32, f32, i64, 9223372036854775808.0f32, -9223373136366403584.0f32);
impl_try_truncate_into!(F32, f32, u64, 18446744073709551616.0f32, -1.0f32);
impl_try_truncate_into!(F64, f64, i32, 2147483648.0f64, -2147483649.0f64);
impl_try_truncate_into!(F64, f64, u32, 4294967296.0f64, -1.0f64);
impl_try_truncate_into!(F64, f64, i64, 9223372036854775808.0f64, -9223372036854777856.0f64);
impl_try_truncate_into!(F64, f64, u64, 18446744073709551616.0f64, -1.0f64);

macro_rules! impl_le_convert {
    ($ty:ty, $n:literal) => {
        impl LittleEndianConvert for $ty {
            type Bytes = [u8; $n];

            fn to_le_bytes(self) -> Self::Bytes {
                <$ty>::to_le_bytes(self)
            }

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$ty>::from_le_bytes(bytes)
            }
        }
    };
}

impl_le_convert!(i8, 1);
impl_le_convert!(u8, 1);
impl_le_convert!(i16, 2);
impl_le_convert!(u16, 2);
impl_le_convert!(i32, 4);
impl_le_convert!(u32, 4);
impl_le_convert!(i64, 8);
impl_le_convert!(u64, 8);

impl LittleEndianConvert for F32 {
    type Bytes = [u8; 4];

    fn to_le_bytes(self) -> Self::Bytes {
        self.to_bits().to_le_bytes()
    }

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        Self::from_bits(u32::from_le_bytes(bytes))
    }
}

impl LittleEndianConvert for F64 {
    type Bytes = [u8; 8];

    fn to_le_bytes(self) -> Self::Bytes {
        self.to_bits().to_le_bytes()
    }

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        Self::from_bits(u64::from_le_bytes(bytes))
    }
}

macro_rules! impl_integer_ops {
    ($ty:ty) => {
        impl ArithmeticOps<$ty> for $ty {
            fn add(self, other: $ty) -> $ty {
                self.wrapping_add(other)
            }

            fn sub(self, other: $ty) -> $ty {
                self.wrapping_sub(other)
            }

            fn mul(self, other: $ty) -> $ty {
                self.wrapping_mul(other)
            }

            fn div(self, other: $ty) -> Result<$ty, TrapCode> {
                if other == 0 {
                    return Err(TrapCode::IntegerDivideByZero);
                }
                let (result, overflow) = self.overflowing_div(other);
                if overflow {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(result)
            }
        }

        impl Integer<$ty> for $ty {
            fn leading_zeros(self) -> $ty {
                <$ty>::leading_zeros(self) as $ty
            }

            fn trailing_zeros(self) -> $ty {
                <$ty>::trailing_zeros(self) as $ty
            }

            fn count_ones(self) -> $ty {
                <$ty>::count_ones(self) as $ty
            }

            fn rotl(self, other: $ty) -> $ty {
                self.rotate_left(other as u32 % <$ty>::BITS)
            }

            fn rotr(self, other: $ty) -> $ty {
                self.rotate_right(other as u32 % <$ty>::BITS)
            }

            fn rem(self, other: $ty) -> Result<$ty, TrapCode> {
                if other == 0 {
                    return Err(TrapCode::IntegerDivideByZero);
                }
                let (result, overflow) = self.overflowing_rem(other);
                if overflow {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(result)
            }
        }
    };
}

impl_integer_ops!(i32);
impl_integer_ops!(u32);
impl_integer_ops!(i64);
impl_integer_ops!(u64);

// Rounding and square root go through libm so results do not depend on the
// host math library.
macro_rules! impl_float_ops {
    ($ty:ty, $abs:path, $floor:path, $ceil:path, $trunc:path, $round:path, $sqrt:path, $copysign:path) => {
        impl ArithmeticOps<$ty> for $ty {
            fn add(self, other: $ty) -> $ty {
                self + other
            }

            fn sub(self, other: $ty) -> $ty {
                self - other
            }

            fn mul(self, other: $ty) -> $ty {
                self * other
            }

            fn div(self, other: $ty) -> Result<$ty, TrapCode> {
                Ok(self / other)
            }
        }

        #[allow(clippy::float_cmp)]
        impl Float<$ty> for $ty {
            fn abs(self) -> $ty {
                $abs(self)
            }

            fn floor(self) -> $ty {
                $floor(self)
            }

            fn ceil(self) -> $ty {
                $ceil(self)
            }

            fn trunc(self) -> $ty {
                $trunc(self)
            }

            fn nearest(self) -> $ty {
                let round = $round(self);
                if $abs(self - $trunc(self)) != 0.5 {
                    return round;
                }
                // Exactly half-way: `round` went away from zero, pull back
                // to the even neighbour where needed.
                if round % 2.0 == 1.0 {
                    $floor(self)
                } else if round % 2.0 == -1.0 {
                    $ceil(self)
                } else {
                    round
                }
            }

            fn sqrt(self) -> $ty {
                $sqrt(self)
            }

            fn min(self, other: $ty) -> $ty {
                if self.is_nan() {
                    return self;
                }
                if other.is_nan() {
                    return other;
                }
                if self == other {
                    // min(+0, -0) is -0.
                    return if $copysign(1.0, self) < 0.0 { self } else { other };
                }
                if self < other {
                    self
                } else {
                    other
                }
            }

            fn max(self, other: $ty) -> $ty {
                if self.is_nan() {
                    return self;
                }
                if other.is_nan() {
                    return other;
                }
                if self == other {
                    // max(+0, -0) is +0.
                    return if $copysign(1.0, self) > 0.0 { self } else { other };
                }
                if self > other {
                    self
                } else {
                    other
                }
            }

            fn copysign(self, other: $ty) -> $ty {
                $copysign(self, other)
            }
        }
    };
}

impl_float_ops!(
    f32,
    libm::fabsf,
    libm::floorf,
    libm::ceilf,
    libm::truncf,
    libm::roundf,
    libm::sqrtf,
    libm::copysignf
);
impl_float_ops!(
    f64,
    libm::fabs,
    libm::floor,
    libm::ceil,
    libm::trunc,
    libm::round,
    libm::sqrt,
    libm::copysign
);

macro_rules! impl_wrapped_float {
    ($wrapper:ident, $prim:ty) => {
        impl ArithmeticOps<$wrapper> for $wrapper {
            fn add(self, other: $wrapper) -> $wrapper {
                $wrapper::from(self.to_float() + other.to_float())
            }

            fn sub(self, other: $wrapper) -> $wrapper {
                $wrapper::from(self.to_float() - other.to_float())
            }

            fn mul(self, other: $wrapper) -> $wrapper {
                $wrapper::from(self.to_float() * other.to_float())
            }

            fn div(self, other: $wrapper) -> Result<$wrapper, TrapCode> {
                Ok($wrapper::from(self.to_float() / other.to_float()))
            }
        }

        impl Float<$wrapper> for $wrapper {
            fn abs(self) -> $wrapper {
                Float::abs(self.to_float()).into()
            }

            fn floor(self) -> $wrapper {
                Float::floor(self.to_float()).into()
            }

            fn ceil(self) -> $wrapper {
                Float::ceil(self.to_float()).into()
            }

            fn trunc(self) -> $wrapper {
                Float::trunc(self.to_float()).into()
            }

            fn nearest(self) -> $wrapper {
                Float::nearest(self.to_float()).into()
            }

            fn sqrt(self) -> $wrapper {
                Float::sqrt(self.to_float()).into()
            }

            fn min(self, other: $wrapper) -> $wrapper {
                Float::min(self.to_float(), other.to_float()).into()
            }

            fn max(self, other: $wrapper) -> $wrapper {
                Float::max(self.to_float(), other.to_float()).into()
            }

            fn copysign(self, other: $wrapper) -> $wrapper {
                Float::copysign(self.to_float(), other.to_float()).into()
            }
        }
    };
}

impl_wrapped_float!(F32, f32);
impl_wrapped_float!(F64, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_overflow_traps() {
        assert_eq!(
            ArithmeticOps::div(i32::MIN, -1),
            Err(TrapCode::IntegerOverflow)
        );
        assert_eq!(ArithmeticOps::div(7i32, 0), Err(TrapCode::IntegerDivideByZero));
        assert_eq!(ArithmeticOps::div(7i32, -2), Ok(-3));
        assert_eq!(ArithmeticOps::div(u32::MAX, 2), Ok(u32::MAX / 2));
    }

    #[test]
    fn signed_remainder_overflow_traps() {
        assert_eq!(Integer::rem(i64::MIN, -1), Err(TrapCode::IntegerOverflow));
        assert_eq!(Integer::rem(7i32, 0), Err(TrapCode::IntegerDivideByZero));
        assert_eq!(Integer::rem(-7i32, 2), Ok(-1));
    }

    #[test]
    fn truncation_boundaries() {
        let max: Result<i32, _> = F64::from(2147483647.9f64).try_truncate_into();
        assert_eq!(max, Ok(i32::MAX));
        let over: Result<i32, _> = F64::from(2147483648.0f64).try_truncate_into();
        assert_eq!(over, Err(TrapCode::IntegerOverflow));
        let min: Result<i32, _> = F64::from(-2147483648.9f64).try_truncate_into();
        assert_eq!(min, Ok(i32::MIN));
        let nan: Result<i32, _> = F32::CANONICAL_NAN.try_truncate_into();
        assert_eq!(nan, Err(TrapCode::InvalidConversionToInt));
    }

    #[test]
    fn saturating_truncation_clamps() {
        let over: i32 = F64::from(1e300).trunc_sat_into();
        assert_eq!(over, i32::MAX);
        let under: i32 = F64::from(-1e300).trunc_sat_into();
        assert_eq!(under, i32::MIN);
        let nan: i64 = F64::CANONICAL_NAN.trunc_sat_into();
        assert_eq!(nan, 0);
        let neg: u32 = F32::from(-3.5f32).trunc_sat_into();
        assert_eq!(neg, 0);
    }

    #[test]
    fn nearest_ties_to_even() {
        assert_eq!(Float::nearest(2.5f64), 2.0);
        assert_eq!(Float::nearest(3.5f64), 4.0);
        assert_eq!(Float::nearest(-2.5f64), -2.0);
        assert_eq!(Float::nearest(4.2f64), 4.0);
        assert_eq!(Float::nearest(4.8f64), 5.0);
        assert_eq!(Float::nearest(-0.4f64).to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn min_max_zero_signs() {
        assert_eq!(Float::min(0.0f32, -0.0f32).to_bits(), (-0.0f32).to_bits());
        assert_eq!(Float::max(-0.0f32, 0.0f32).to_bits(), 0.0f32.to_bits());
        assert!(Float::min(f32::NAN, 1.0).is_nan());
    }

    #[test]
    fn rotations_mask_their_count() {
        assert_eq!(Integer::rotl(0x8000_0001u32, 33), 0x0000_0003);
        assert_eq!(Integer::rotr(1u64, 65), 0x8000_0000_0000_0000);
    }
}
