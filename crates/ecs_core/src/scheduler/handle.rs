use std::fmt;

/// Opaque reference to a registered system, returned by `State::declare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemHandle(pub(crate) u32);

impl SystemHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SystemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
