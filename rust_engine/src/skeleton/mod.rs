//! 骨架、关节与角色接口

mod character;
mod joint;
mod manager;

pub use character::{BasicCharacter, Character};
pub use joint::{Joint, JointId, JointPriority};
pub use manager::{Skeleton, MAX_ANIMATED_JOINTS};
