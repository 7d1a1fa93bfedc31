#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Preorder position of a node inside one tree template.
pub type ExecutionIndex = u16;

/// Position of a node in the running instance stack: which stacked tree, and where inside it.
///
/// The default value is unset and loses against every set index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BtNodeIndex {
    pub instance_index: u16,
    pub execution_index: ExecutionIndex,
}

impl BtNodeIndex {
    pub const UNSET: Self = Self {
        instance_index: u16::MAX,
        execution_index: u16::MAX,
    };

    pub const fn new(instance_index: u16, execution_index: ExecutionIndex) -> Self {
        Self {
            instance_index,
            execution_index,
        }
    }

    pub fn is_set(self) -> bool {
        self.instance_index < u16::MAX
    }

    /// Lower instance wins; inside one instance the lower execution index wins.
    pub fn takes_priority_over(self, other: Self) -> bool {
        if self.instance_index != other.instance_index {
            return self.instance_index < other.instance_index;
        }
        self.execution_index < other.execution_index
    }
}

impl Default for BtNodeIndex {
    fn default() -> Self {
        Self::UNSET
    }
}

impl std::fmt::Display for BtNodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_set() {
            write!(f, "{}:{}", self.instance_index, self.execution_index)
        } else {
            f.write_str("unset")
        }
    }
}

/// Which child a composite is on, or one of the two sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChildIndex {
    /// Composite was just activated.
    #[default]
    NotInitialized,
    /// Composite is done; its result goes to the parent.
    ReturnToParent,
    Child(usize),
}

impl ChildIndex {
    pub fn raw(self) -> i32 {
        match self {
            Self::NotInitialized => -1,
            Self::ReturnToParent => -2,
            Self::Child(i) => i as i32,
        }
    }

    pub fn child(self) -> Option<usize> {
        match self {
            Self::Child(i) => Some(i),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRelativePriority {
    Lower,
    Same,
    Higher,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_loses_to_everything() {
        let set = BtNodeIndex::new(3, 40);
        assert!(set.takes_priority_over(BtNodeIndex::UNSET));
        assert!(!BtNodeIndex::UNSET.takes_priority_over(set));
        assert!(!BtNodeIndex::default().is_set());
    }

    #[test]
    fn instance_outranks_execution_index() {
        assert!(BtNodeIndex::new(0, 90).takes_priority_over(BtNodeIndex::new(1, 0)));
        assert!(BtNodeIndex::new(1, 2).takes_priority_over(BtNodeIndex::new(1, 3)));
        assert!(!BtNodeIndex::new(1, 3).takes_priority_over(BtNodeIndex::new(1, 3)));
    }

    #[test]
    fn sentinel_raw_values() {
        assert_eq!(ChildIndex::NotInitialized.raw(), -1);
        assert_eq!(ChildIndex::ReturnToParent.raw(), -2);
        assert_eq!(ChildIndex::Child(4).raw(), 4);
    }
}
