use crate::{
    nan_preserving_float::{F32, F64},
    TrapCode,
};

/// Convert one type to another by wrapping.
pub trait WrapInto<T> {
    /// Convert one type to another by wrapping.
    fn wrap_into(self) -> T;
}

/// Convert one type to another by extending with leading zeroes
/// or the sign bit, as appropriate for the source type.
pub trait ExtendInto<T> {
    /// Convert one type to another by extending.
    fn extend_into(self) -> T;
}

/// Convert a float to an integer by rounding towards zero.
///
/// # Errors
///
/// Traps when the input is NaN or does not fit the target integer.
pub trait TryTruncateInto<T, E> {
    /// Convert a float to an integer by rounding towards zero.
    ///
    /// # Errors
    ///
    /// - If the input float value is NaN.
    /// - If the input float value cannot be represented in the target
    ///   integer type.
    fn try_truncate_into(self) -> Result<T, E>;
}

/// Convert a float to an integer by rounding towards zero with
/// saturating semantics.
///
/// Returns
///
/// - `0` when the input is NaN.
/// - `int::MIN` when the input is -INF or below the representable range.
/// - `int::MAX` when the input is +INF or above the representable range.
pub trait TruncateSaturateInto<T> {
    /// Convert a float to an integer, clamping out-of-range inputs.
    fn truncate_saturate_into(self) -> T;
}

/// Sign-extends `Self` integer type from `T` integer type.
pub trait SignExtendFrom<T> {
    /// Sign-extend the low bits of `self` occupied by `T`.
    fn sign_extend_from(self) -> Self;
}

/// Reinterprets the bits of a value of one type as another type.
pub trait TransmuteInto<T> {
    /// Reinterprets the bits of a value of one type as another type.
    fn transmute_into(self) -> T;
}

/// Arithmetic operations with WebAssembly (wrapping) semantics.
pub trait ArithmeticOps<T>: Copy {
    /// Add two values.
    fn add(self, other: T) -> T;
    /// Subtract two values.
    fn sub(self, other: T) -> T;
    /// Multiply two values.
    fn mul(self, other: T) -> T;
}

/// Integer operations with WebAssembly semantics.
pub trait Integer<T>: ArithmeticOps<T> {
    /// Counts leading zeros in the bitwise representation of the value.
    fn leading_zeros(self) -> T;
    /// Counts trailing zeros in the bitwise representation of the value.
    fn trailing_zeros(self) -> T;
    /// Counts 1-bits in the bitwise representation of the value.
    fn count_ones(self) -> T;
    /// Shift left; the shift count is taken modulo the bit width.
    fn shl(self, other: T) -> T;
    /// Shift right; the shift count is taken modulo the bit width.
    ///
    /// Arithmetic for signed `Self`, logical for unsigned `Self`.
    fn shr(self, other: T) -> T;
    /// Left bit rotation.
    fn rotl(self, other: T) -> T;
    /// Right bit rotation.
    fn rotr(self, other: T) -> T;
    /// Divide two values.
    ///
    /// # Errors
    ///
    /// - If `other` is zero.
    /// - If the signed result is not representable (`MIN / -1`).
    fn div(self, other: T) -> Result<T, TrapCode>;
    /// Compute the division remainder. `MIN % -1` is `0`, not a trap.
    ///
    /// # Errors
    ///
    /// If `other` is zero.
    fn rem(self, other: T) -> Result<T, TrapCode>;
}

/// Float operations with WebAssembly semantics.
pub trait Float<T>: ArithmeticOps<T> {
    /// Absolute value.
    fn abs(self) -> T;
    /// Largest integer less than or equal to the value.
    fn floor(self) -> T;
    /// Smallest integer greater than or equal to the value.
    fn ceil(self) -> T;
    /// Integer part of the value.
    fn trunc(self) -> T;
    /// Nearest integer to the value; ties round to even.
    fn nearest(self) -> T;
    /// Square root of the value.
    fn sqrt(self) -> T;
    /// Division.
    fn div(self, other: T) -> T;
    /// Minimum of two values, propagating NaN and preferring -0.0 on ties.
    fn min(self, other: T) -> T;
    /// Maximum of two values, propagating NaN and preferring +0.0 on ties.
    fn max(self, other: T) -> T;
    /// Copies the sign bit of `other` onto `self`, bit-exactly.
    fn copysign(self, other: T) -> T;
}

macro_rules! impl_wrap_into {
    ( $( impl WrapInto<$into:ident> for $from:ident; )* ) => {
        $(
            impl WrapInto<$into> for $from {
                #[inline]
                fn wrap_into(self) -> $into {
                    self as $into
                }
            }
        )*
    };
}
impl_wrap_into! {
    impl WrapInto<i8> for i32;
    impl WrapInto<i16> for i32;
    impl WrapInto<i8> for i64;
    impl WrapInto<i16> for i64;
    impl WrapInto<i32> for i64;
    impl WrapInto<i32> for i32;
    impl WrapInto<i64> for i64;
    impl WrapInto<u32> for u32;
    impl WrapInto<u64> for u64;
}

impl WrapInto<F32> for F64 {
    #[inline]
    fn wrap_into(self) -> F32 {
        F32::from_float(self.to_float() as f32)
    }
}

macro_rules! impl_extend_into {
    ( $( impl ExtendInto<$into:ident> for $from:ident; )* ) => {
        $(
            impl ExtendInto<$into> for $from {
                #[inline]
                #[allow(clippy::cast_lossless)]
                fn extend_into(self) -> $into {
                    self as $into
                }
            }
        )*
    };
}
impl_extend_into! {
    impl ExtendInto<i32> for i8;
    impl ExtendInto<i32> for u8;
    impl ExtendInto<i32> for i16;
    impl ExtendInto<i32> for u16;
    impl ExtendInto<i32> for i32;
    impl ExtendInto<i64> for i8;
    impl ExtendInto<i64> for u8;
    impl ExtendInto<i64> for i16;
    impl ExtendInto<i64> for u16;
    impl ExtendInto<i64> for i32;
    impl ExtendInto<i64> for u32;
    impl ExtendInto<i64> for i64;
    impl ExtendInto<u64> for u32;
    impl ExtendInto<u64> for u64;
    impl ExtendInto<u32> for u32;
}

impl ExtendInto<F64> for F32 {
    #[inline]
    fn extend_into(self) -> F64 {
        F64::from_float(f64::from(self.to_float()))
    }
}

macro_rules! impl_sign_extend_from {
    ( $( impl SignExtendFrom<$from:ty> for $ty:ty; )* ) => {
        $(
            impl SignExtendFrom<$from> for $ty {
                #[inline]
                fn sign_extend_from(self) -> Self {
                    (self as $from) as Self
                }
            }
        )*
    };
}
impl_sign_extend_from! {
    impl SignExtendFrom<i8> for i32;
    impl SignExtendFrom<i16> for i32;
    impl SignExtendFrom<i8> for i64;
    impl SignExtendFrom<i16> for i64;
    impl SignExtendFrom<i32> for i64;
}

macro_rules! impl_transmute_pair {
    ( $( impl TransmuteInto between $float:ident and $int:ident via $npf:ident; )* ) => {
        $(
            impl TransmuteInto<$int> for $float {
                #[inline]
                fn transmute_into(self) -> $int {
                    self.to_bits() as $int
                }
            }

            impl TransmuteInto<$float> for $int {
                #[inline]
                fn transmute_into(self) -> $float {
                    $float::from_bits(self as _)
                }
            }

            impl TransmuteInto<$int> for $npf {
                #[inline]
                fn transmute_into(self) -> $int {
                    self.to_bits() as $int
                }
            }

            impl TransmuteInto<$npf> for $int {
                #[inline]
                fn transmute_into(self) -> $npf {
                    $npf::from_bits(self as _)
                }
            }
        )*
    };
}
impl_transmute_pair! {
    impl TransmuteInto between f32 and i32 via F32;
    impl TransmuteInto between f64 and i64 via F64;
}

macro_rules! impl_try_truncate_into {
    (@primitive $from:ident, $into:ident, $rmin:literal, $rmax:literal) => {
        impl TryTruncateInto<$into, TrapCode> for $from {
            #[inline]
            fn try_truncate_into(self) -> Result<$into, TrapCode> {
                if self.is_nan() {
                    return Err(TrapCode::InvalidConversionToInteger);
                }
                // The bounds sit just past the representable range so
                // that IEEE rounding at the limits is accounted for.
                if self <= $rmin || self >= $rmax {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(self as _)
            }
        }

        impl TruncateSaturateInto<$into> for $from {
            #[inline]
            fn truncate_saturate_into(self) -> $into {
                if self.is_nan() {
                    return <$into as Default>::default();
                }
                if self.is_infinite() && self.is_sign_positive() {
                    return <$into>::MAX;
                }
                if self.is_infinite() && self.is_sign_negative() {
                    return <$into>::MIN;
                }
                self as _
            }
        }
    };
    (@wrapped $from:ident, $intermediate:ident, $into:ident) => {
        impl TryTruncateInto<$into, TrapCode> for $from {
            #[inline]
            fn try_truncate_into(self) -> Result<$into, TrapCode> {
                self.to_float().try_truncate_into()
            }
        }

        impl TruncateSaturateInto<$into> for $from {
            #[inline]
            fn truncate_saturate_into(self) -> $into {
                self.to_float().truncate_saturate_into()
            }
        }
    };
}

impl_try_truncate_into!(@primitive f32, i32, -2147483904.0_f32, 2147483648.0_f32);
impl_try_truncate_into!(@primitive f32, u32,          -1.0_f32, 4294967296.0_f32);
impl_try_truncate_into!(@primitive f64, i32, -2147483649.0_f64, 2147483648.0_f64);
impl_try_truncate_into!(@primitive f64, u32,          -1.0_f64, 4294967296.0_f64);
impl_try_truncate_into!(@primitive f32, i64, -9223373136366403584.0_f32,  9223372036854775808.0_f32);
impl_try_truncate_into!(@primitive f32, u64,                   -1.0_f32, 18446744073709551616.0_f32);
impl_try_truncate_into!(@primitive f64, i64, -9223372036854777856.0_f64,  9223372036854775808.0_f64);
impl_try_truncate_into!(@primitive f64, u64,                   -1.0_f64, 18446744073709551616.0_f64);
impl_try_truncate_into!(@wrapped F32, f32, i32);
impl_try_truncate_into!(@wrapped F32, f32, u32);
impl_try_truncate_into!(@wrapped F32, f32, i64);
impl_try_truncate_into!(@wrapped F32, f32, u64);
impl_try_truncate_into!(@wrapped F64, f64, i32);
impl_try_truncate_into!(@wrapped F64, f64, u32);
impl_try_truncate_into!(@wrapped F64, f64, i64);
impl_try_truncate_into!(@wrapped F64, f64, u64);

macro_rules! impl_integer_arithmetic_ops {
    ( $( $ty:ident ),* ) => {
        $(
            impl ArithmeticOps<$ty> for $ty {
                #[inline]
                fn add(self, other: $ty) -> $ty {
                    self.wrapping_add(other)
                }
                #[inline]
                fn sub(self, other: $ty) -> $ty {
                    self.wrapping_sub(other)
                }
                #[inline]
                fn mul(self, other: $ty) -> $ty {
                    self.wrapping_mul(other)
                }
            }
        )*
    };
}
impl_integer_arithmetic_ops!(i32, u32, i64, u64);

macro_rules! impl_float_arithmetic_ops {
    ( $( $ty:ty ),* ) => {
        $(
            impl ArithmeticOps<Self> for $ty {
                #[inline]
                fn add(self, other: Self) -> Self {
                    self + other
                }
                #[inline]
                fn sub(self, other: Self) -> Self {
                    self - other
                }
                #[inline]
                fn mul(self, other: Self) -> Self {
                    self * other
                }
            }
        )*
    };
}
impl_float_arithmetic_ops!(f32, f64);

macro_rules! impl_npf_arithmetic_ops {
    ( $( $npf:ident as $float:ident ),* ) => {
        $(
            impl ArithmeticOps<Self> for $npf {
                #[inline]
                fn add(self, other: Self) -> Self {
                    Self::from_float(self.to_float() + other.to_float())
                }
                #[inline]
                fn sub(self, other: Self) -> Self {
                    Self::from_float(self.to_float() - other.to_float())
                }
                #[inline]
                fn mul(self, other: Self) -> Self {
                    Self::from_float(self.to_float() * other.to_float())
                }
            }
        )*
    };
}
impl_npf_arithmetic_ops!(F32 as f32, F64 as f64);

macro_rules! impl_integer {
    ( $( $ty:ty ),* ) => {
        $(
            impl Integer<Self> for $ty {
                #[inline]
                fn leading_zeros(self) -> Self {
                    self.leading_zeros() as _
                }
                #[inline]
                fn trailing_zeros(self) -> Self {
                    self.trailing_zeros() as _
                }
                #[inline]
                fn count_ones(self) -> Self {
                    self.count_ones() as _
                }
                #[inline]
                fn shl(self, other: Self) -> Self {
                    self.wrapping_shl(other as u32)
                }
                #[inline]
                fn shr(self, other: Self) -> Self {
                    self.wrapping_shr(other as u32)
                }
                #[inline]
                fn rotl(self, other: Self) -> Self {
                    self.rotate_left(other as u32)
                }
                #[inline]
                fn rotr(self, other: Self) -> Self {
                    self.rotate_right(other as u32)
                }
                #[inline]
                fn div(self, other: Self) -> Result<Self, TrapCode> {
                    if other == 0 {
                        return Err(TrapCode::IntegerDivideByZero);
                    }
                    match self.overflowing_div(other) {
                        (result, false) => Ok(result),
                        _ => Err(TrapCode::IntegerOverflow),
                    }
                }
                #[inline]
                fn rem(self, other: Self) -> Result<Self, TrapCode> {
                    if other == 0 {
                        return Err(TrapCode::IntegerDivideByZero);
                    }
                    Ok(self.wrapping_rem(other))
                }
            }
        )*
    };
}
impl_integer!(i32, u32, i64, u64);

#[cfg(feature = "std")]
mod fmath {
    pub mod f32 {
        #[inline]
        pub fn abs(v: f32) -> f32 {
            v.abs()
        }
        #[inline]
        pub fn floor(v: f32) -> f32 {
            v.floor()
        }
        #[inline]
        pub fn ceil(v: f32) -> f32 {
            v.ceil()
        }
        #[inline]
        pub fn trunc(v: f32) -> f32 {
            v.trunc()
        }
        #[inline]
        pub fn round(v: f32) -> f32 {
            v.round()
        }
        #[inline]
        pub fn fract(v: f32) -> f32 {
            v.fract()
        }
        #[inline]
        pub fn sqrt(v: f32) -> f32 {
            v.sqrt()
        }
    }

    pub mod f64 {
        #[inline]
        pub fn abs(v: f64) -> f64 {
            v.abs()
        }
        #[inline]
        pub fn floor(v: f64) -> f64 {
            v.floor()
        }
        #[inline]
        pub fn ceil(v: f64) -> f64 {
            v.ceil()
        }
        #[inline]
        pub fn trunc(v: f64) -> f64 {
            v.trunc()
        }
        #[inline]
        pub fn round(v: f64) -> f64 {
            v.round()
        }
        #[inline]
        pub fn fract(v: f64) -> f64 {
            v.fract()
        }
        #[inline]
        pub fn sqrt(v: f64) -> f64 {
            v.sqrt()
        }
    }
}

// Not all float math is available in `core`; `libm` fills the gap
// for no_std builds.
#[cfg(not(feature = "std"))]
mod fmath {
    pub mod f32 {
        #[inline]
        pub fn abs(v: f32) -> f32 {
            libm::fabsf(v)
        }
        #[inline]
        pub fn floor(v: f32) -> f32 {
            libm::floorf(v)
        }
        #[inline]
        pub fn ceil(v: f32) -> f32 {
            libm::ceilf(v)
        }
        #[inline]
        pub fn trunc(v: f32) -> f32 {
            libm::truncf(v)
        }
        #[inline]
        pub fn round(v: f32) -> f32 {
            libm::roundf(v)
        }
        #[inline]
        pub fn fract(v: f32) -> f32 {
            v - trunc(v)
        }
        #[inline]
        pub fn sqrt(v: f32) -> f32 {
            libm::sqrtf(v)
        }
    }

    pub mod f64 {
        #[inline]
        pub fn abs(v: f64) -> f64 {
            libm::fabs(v)
        }
        #[inline]
        pub fn floor(v: f64) -> f64 {
            libm::floor(v)
        }
        #[inline]
        pub fn ceil(v: f64) -> f64 {
            libm::ceil(v)
        }
        #[inline]
        pub fn trunc(v: f64) -> f64 {
            libm::trunc(v)
        }
        #[inline]
        pub fn round(v: f64) -> f64 {
            libm::round(v)
        }
        #[inline]
        pub fn fract(v: f64) -> f64 {
            v - trunc(v)
        }
        #[inline]
        pub fn sqrt(v: f64) -> f64 {
            libm::sqrt(v)
        }
    }
}

macro_rules! impl_float {
    ( $( impl Float for $ty:ident as $fXX:ident using $iXX:ident; )* ) => {
        $(
            impl Float<Self> for $ty {
                #[inline]
                fn abs(self) -> Self {
                    Self::from(fmath::$fXX::abs(<$fXX>::from(self)))
                }
                #[inline]
                fn floor(self) -> Self {
                    Self::from(fmath::$fXX::floor(<$fXX>::from(self)))
                }
                #[inline]
                fn ceil(self) -> Self {
                    Self::from(fmath::$fXX::ceil(<$fXX>::from(self)))
                }
                #[inline]
                fn trunc(self) -> Self {
                    Self::from(fmath::$fXX::trunc(<$fXX>::from(self)))
                }
                #[inline]
                fn nearest(self) -> Self {
                    let this = <$fXX>::from(self);
                    let round = fmath::$fXX::round(this);
                    if fmath::$fXX::abs(fmath::$fXX::fract(this)) != 0.5 {
                        return Self::from(round);
                    }
                    // A tie: `round` went away from zero, fix up to even.
                    let rem = round % 2.0;
                    if rem == 1.0 {
                        Self::from(fmath::$fXX::floor(this))
                    } else if rem == -1.0 {
                        Self::from(fmath::$fXX::ceil(this))
                    } else {
                        Self::from(round)
                    }
                }
                #[inline]
                fn sqrt(self) -> Self {
                    Self::from(fmath::$fXX::sqrt(<$fXX>::from(self)))
                }
                #[inline]
                fn div(self, other: Self) -> Self {
                    Self::from(<$fXX>::from(self) / <$fXX>::from(other))
                }
                #[inline]
                fn min(self, other: Self) -> Self {
                    let lhs = <$fXX>::from(self);
                    let rhs = <$fXX>::from(other);
                    match (lhs.is_nan(), rhs.is_nan()) {
                        (true, false) => self,
                        (false, true) => other,
                        _ => {
                            // Both NaN or both numbers; `-0.0 < +0.0` here.
                            if rhs.is_sign_negative() {
                                return Self::from(rhs.min(lhs));
                            }
                            Self::from(lhs.min(rhs))
                        }
                    }
                }
                #[inline]
                fn max(self, other: Self) -> Self {
                    let lhs = <$fXX>::from(self);
                    let rhs = <$fXX>::from(other);
                    match (lhs.is_nan(), rhs.is_nan()) {
                        (true, false) => self,
                        (false, true) => other,
                        _ => {
                            // Both NaN or both numbers; `+0.0 > -0.0` here.
                            if rhs.is_sign_positive() {
                                return Self::from(rhs.max(lhs));
                            }
                            Self::from(lhs.max(rhs))
                        }
                    }
                }
                #[inline]
                fn copysign(self, other: Self) -> Self {
                    let sign_mask: $iXX = 1 << (<$iXX>::BITS - 1);
                    let self_bits: $iXX = self.transmute_into();
                    let other_bits: $iXX = other.transmute_into();
                    let result = (self_bits & !sign_mask) | (other_bits & sign_mask);
                    result.transmute_into()
                }
            }
        )*
    };
}
impl_float! {
    impl Float for f32 as f32 using i32;
    impl Float for f64 as f64 using i64;
    impl Float for F32 as f32 using i32;
    impl Float for F64 as f64 using i64;
}
