use core::fmt::{Debug, Display};
use downcast_rs::{impl_downcast, DowncastSync};

/// Trait that allows the host to return custom error.
///
/// It should be useful for representing custom traps,
/// troubles at instantiation time or other host specific conditions.
///
/// Types that implement this trait can automatically be converted
/// into a [`Trap`] and returned from host functions.
///
/// [`Trap`]: crate::Trap
pub trait HostError: 'static + Display + Debug + DowncastSync {}
impl_downcast!(HostError);
