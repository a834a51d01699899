use std::fmt::{self, Display, Formatter};

use smol_str::SmolStr;

/// An identifier for declarations, binders and universe variables
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Name(SmolStr);

impl Name {
    /// Construct a new name
    pub fn new(name: impl AsRef<str>) -> Self {
        Name(SmolStr::new(name))
    }

    /// Get this name as a string slice
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// A stable hash of this name
    ///
    /// Equal names always have equal hash codes, independently of the process or thread.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::term::Name;
    /// assert_eq!(Name::new("Nat.add").hash_code(), Name::new("Nat.add").hash_code());
    /// ```
    pub fn hash_code(&self) -> u64 {
        fxhash::hash64(self.as_str())
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Self {
        Name::new(name)
    }
}

impl From<String> for Name {
    fn from(name: String) -> Self {
        Name(SmolStr::from(name))
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
