//! Float wrappers that round-trip NaN payloads bit-exactly.
//!
//! The operand stack stores floats as raw bit patterns. Converting
//! through the primitive float types on every push and pop would
//! canonicalize NaNs on some platforms, so the interpreter works with
//! these wrappers and only converts at arithmetic boundaries.

macro_rules! nan_preserving_float {
    (
        $( #[$docs:meta] )*
        struct $name:ident($bits:ty as $float:ty);
    ) => {
        $( #[$docs] )*
        #[derive(Copy, Clone, Default)]
        pub struct $name($bits);

        impl $name {
            /// Creates the float from its underlying bits.
            #[inline]
            pub fn from_bits(bits: $bits) -> Self {
                Self(bits)
            }

            /// Returns the underlying bits of the float.
            #[inline]
            pub fn to_bits(self) -> $bits {
                self.0
            }

            /// Creates the wrapper from the primitive float type.
            #[inline]
            pub fn from_float(value: $float) -> Self {
                Self(value.to_bits())
            }

            /// Returns the primitive float value.
            #[inline]
            pub fn to_float(self) -> $float {
                <$float>::from_bits(self.0)
            }

            /// Returns `true` if the value is a NaN.
            #[inline]
            pub fn is_nan(self) -> bool {
                self.to_float().is_nan()
            }
        }

        impl From<$float> for $name {
            #[inline]
            fn from(value: $float) -> Self {
                Self::from_float(value)
            }
        }

        impl From<$name> for $float {
            #[inline]
            fn from(wrapped: $name) -> $float {
                wrapped.to_float()
            }
        }

        impl PartialEq for $name {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.to_float() == other.to_float()
            }
        }

        impl PartialOrd for $name {
            #[inline]
            fn partial_cmp(&self, other: &Self) -> Option<::core::cmp::Ordering> {
                self.to_float().partial_cmp(&other.to_float())
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                if self.is_nan() {
                    return ::core::write!(f, "nan:0x{:X?}", self.to_bits());
                }
                ::core::fmt::Debug::fmt(&self.to_float(), f)
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                if self.is_nan() {
                    return ::core::write!(f, "nan:0x{:X?}", self.to_bits());
                }
                ::core::fmt::Display::fmt(&self.to_float(), f)
            }
        }
    };
}

nan_preserving_float! {
    /// A NaN preserving `f32` type.
    struct F32(u32 as f32);
}

nan_preserving_float! {
    /// A NaN preserving `f64` type.
    struct F64(u64 as f64);
}
