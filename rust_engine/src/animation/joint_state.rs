//! 关节状态与姿势
//!
//! 动画实例每帧把曲线值写入自己的 `JointState`，
//! 下游混合器读取姿势中的状态。

use bitflags::bitflags;
use glam::{Quat, Vec3};

use crate::skeleton::{JointId, JointPriority};

bitflags! {
    /// 关节状态用途位
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct JointUsage: u32 {
        const POS   = 1 << 0;
        const ROT   = 1 << 1;
        const SCALE = 1 << 2;
    }
}

/// 单个关节的动画输出
#[derive(Clone, Debug)]
pub struct JointState {
    /// 未解析的关节为 None（占位）
    pub joint: Option<JointId>,
    pub usage: JointUsage,
    pub priority: JointPriority,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl JointState {
    pub fn new(joint: Option<JointId>) -> Self {
        Self {
            joint,
            usage: JointUsage::empty(),
            priority: JointPriority::USE_MOTION,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.joint.is_some()
    }
}

/// 姿势：参与混合的关节状态下标
#[derive(Clone, Debug, Default)]
pub struct Pose {
    state_indices: Vec<usize>,
}

impl Pose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_joint_state(&mut self, index: usize) {
        if !self.state_indices.contains(&index) {
            self.state_indices.push(index);
        }
    }

    pub fn clear(&mut self) {
        self.state_indices.clear();
    }

    pub fn len(&self) -> usize {
        self.state_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state_indices.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.state_indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_bits() {
        let mut usage = JointUsage::empty();
        assert!(!usage.intersects(JointUsage::ROT));
        // 空用途位不驱动任何通道
        assert!(!usage.intersects(JointUsage::empty()));
        usage |= JointUsage::ROT;
        assert!(usage.intersects(JointUsage::ROT));
        assert!(!usage.intersects(JointUsage::POS));
        assert_eq!((usage | JointUsage::POS).bits(), 3);
        assert_eq!(JointUsage::from_bits(8), None);
    }

    #[test]
    fn test_pose_dedup() {
        let mut pose = Pose::new();
        pose.add_joint_state(2);
        pose.add_joint_state(2);
        assert_eq!(pose.len(), 1);
    }
}
