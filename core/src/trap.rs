use crate::HostError;
use alloc::{boxed::Box, format, string::String};
use core::fmt::{self, Display};

#[cfg(feature = "std")]
use std::error::Error as StdError;

/// Error raised while executing WebAssembly bytecode.
///
/// A [`Trap`] aborts the running computation. It cannot be handled by
/// WebAssembly code other than through the exception handling opcodes
/// and is otherwise reported back to the host embedder.
#[derive(Debug)]
pub struct Trap {
    /// The boxed reason keeps `Trap` a single pointer wide so that
    /// `Result<T, Trap>` stays cheap on the non-error path.
    reason: Box<TrapReason>,
}

#[test]
fn trap_size() {
    assert_eq!(
        core::mem::size_of::<Trap>(),
        core::mem::size_of::<*const ()>()
    );
}

/// The reason of a [`Trap`].
#[derive(Debug)]
enum TrapReason {
    /// A WebAssembly execution trap with one of the canonical messages.
    InstructionTrap(TrapCode),
    /// An error described by a display message.
    Message(Box<str>),
    /// Traps and errors during host execution.
    Host(Box<dyn HostError>),
    /// The thread manager asked the interpreter to terminate.
    ///
    /// Not an error: surfaced so the embedder can distinguish
    /// cooperative cancellation from a genuine trap.
    Terminated,
}

impl Trap {
    fn with_reason(reason: TrapReason) -> Self {
        Self {
            reason: Box::new(reason),
        }
    }

    /// Creates a new [`Trap`] described by a `message`.
    #[cold]
    pub fn new<T>(message: T) -> Self
    where
        T: Into<String>,
    {
        Self::with_reason(TrapReason::Message(message.into().into_boxed_str()))
    }

    /// Creates the [`Trap`] that reports cooperative termination.
    #[cold]
    pub fn terminated() -> Self {
        Self::with_reason(TrapReason::Terminated)
    }

    /// Returns `true` if this [`Trap`] represents cooperative termination.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(&*self.reason, TrapReason::Terminated)
    }

    /// Returns the [`TrapCode`] if the trap originates from Wasm execution.
    #[inline]
    pub fn trap_code(&self) -> Option<TrapCode> {
        match &*self.reason {
            TrapReason::InstructionTrap(trap_code) => Some(*trap_code),
            _ => None,
        }
    }

    /// Downcasts the [`Trap`] into the `T: HostError` if possible.
    #[inline]
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: HostError,
    {
        match &*self.reason {
            TrapReason::Host(host_error) => host_error.downcast_ref(),
            _ => None,
        }
    }

    /// Consumes `self` to downcast the [`Trap`] into the `T: HostError` if possible.
    #[inline]
    pub fn downcast<T>(self) -> Option<T>
    where
        T: HostError,
    {
        match *self.reason {
            TrapReason::Host(host_error) => host_error.downcast().ok().map(|boxed| *boxed),
            _ => None,
        }
    }
}

impl From<TrapCode> for Trap {
    #[cold]
    fn from(error: TrapCode) -> Self {
        Self::with_reason(TrapReason::InstructionTrap(error))
    }
}

impl<E> From<E> for Trap
where
    E: HostError,
{
    #[cold]
    fn from(host_error: E) -> Self {
        Self::with_reason(TrapReason::Host(Box::new(host_error)))
    }
}

impl Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.reason {
            TrapReason::InstructionTrap(trap_code) => Display::fmt(trap_code, f),
            TrapReason::Message(message) => write!(f, "{message}"),
            TrapReason::Host(host_error) => Display::fmt(host_error, f),
            TrapReason::Terminated => write!(f, "terminated by thread manager"),
        }
    }
}

impl PartialEq for Trap {
    fn eq(&self, other: &Self) -> bool {
        format!("{self}") == format!("{other}")
    }
}

#[cfg(feature = "std")]
impl StdError for Trap {
    fn description(&self) -> &str {
        self.trap_code().map_or("", |code| code.trap_message())
    }
}

macro_rules! define_trap_codes {
    (
        $( $(#[$attr:meta])* $ident:ident => $message:literal, )*
    ) => {
        /// The canonical WebAssembly execution traps.
        ///
        /// The associated [`TrapCode::trap_message`] strings are the
        /// observable contract with embedders inspecting an exception.
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum TrapCode {
            $(
                $( #[$attr] )*
                $ident,
            )*
        }

        impl TrapCode {
            /// Returns the trap message surfaced to callers.
            pub fn trap_message(&self) -> &'static str {
                match self {
                    $( Self::$ident => $message, )*
                }
            }
        }
    };
}

define_trap_codes! {
    /// The `unreachable` opcode was executed.
    Unreachable => "unreachable",
    /// A linear memory access was outside the bounds of the memory.
    MemoryOutOfBounds => "out of bounds memory access",
    /// An atomic access whose effective address is not a multiple of
    /// its access width.
    UnalignedAtomic => "unaligned atomic",
    /// Signed division or truncation result does not fit the target type.
    IntegerOverflow => "integer overflow",
    /// Division or remainder with a zero divisor.
    IntegerDivideByZero => "integer divide by zero",
    /// Float-to-int truncation of a NaN.
    InvalidConversionToInteger => "invalid conversion to integer",
    /// `call_indirect` through a table index past the current size.
    UndefinedElement => "undefined element",
    /// `call_indirect` through a null table slot.
    UninitializedElement => "uninitialized element",
    /// `call_indirect` signature check failed.
    IndirectCallTypeMismatch => "indirect call type mismatch",
    /// A resolved function index is outside the instance function space.
    UnknownFunction => "unknown function",
    /// A table access was outside the bounds of the table.
    TableOutOfBounds => "out of bounds table access",
    /// The per-thread wasm stack could not fit another frame.
    StackOverflow => "wasm operand stack overflow",
    /// `struct.get`/`struct.set` on a null structure reference.
    NullStructureReference => "null structure reference",
    /// An array operation on a null array reference.
    NullArrayReference => "null array reference",
    /// `i31.get_s`/`i31.get_u` on a null i31 reference.
    NullI31Reference => "null i31 reference",
    /// `call_ref`/`return_call_ref` on a null function reference.
    NullFunctionReference => "null function reference",
    /// `ref.as_non_null` or similar on a null reference.
    NullReference => "null reference",
    /// `ref.cast` on an incompatible reference.
    CastFailure => "cast failure",
    /// An array element access past the array length.
    ArrayOutOfBounds => "out of bounds array access",
    /// `array.new_data` reading past the end of a data segment.
    DataSegmentOutOfBounds => "data segment out of bounds",
    /// The auxiliary (shadow) stack pointer moved below its boundary.
    AuxStackOverflow => "wasm auxiliary stack overflow",
    /// The auxiliary (shadow) stack pointer moved above its base.
    AuxStackUnderflow => "wasm auxiliary stack underflow",
    /// A thrown exception reached the host without a matching handler.
    UncaughtException => "uncaught wasm exception",
    /// The opcode is not part of the supported instruction set.
    UnsupportedOpcode => "unsupported opcode",
}

impl Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.trap_message())
    }
}
