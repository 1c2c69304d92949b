use core::fmt;

use crate::bridge;
use crate::dispatch::TranslatedFn;
use crate::machine::Machine;

/// Something an indirect call can land on.
#[derive(Clone, Copy)]
pub enum Callable {
    /// A translated (or hand-written) function from one of the registries.
    Translated(TranslatedFn),
    /// A kernel import with a marshalling routine.
    Bridge { slot: u16 },
    /// A kernel import without one.
    Stub { slot: u16 },
}

impl Callable {
    /// Calls the target. The caller has already pushed arguments and a return address.
    #[inline]
    pub fn invoke(self, m: &mut Machine) {
        match self {
            Callable::Translated(f) => f(m),
            Callable::Bridge { slot } | Callable::Stub { slot } => bridge::dispatch(m, slot),
        }
    }

    pub fn is_kernel(self) -> bool {
        !matches!(self, Callable::Translated(_))
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Translated(entry) => {
                write!(f, "Translated({:p})", *entry as *const ())
            }
            Callable::Bridge { slot } => write!(f, "Bridge {{ slot: {slot} }}"),
            Callable::Stub { slot } => write!(f, "Stub {{ slot: {slot} }}"),
        }
    }
}
