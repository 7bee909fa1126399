//! 关节占用表
//!
//! 每帧由控制器重置，动画按优先级从高到低更新，
//! 更新后登记自己驱动的关节。约束求解前查询此表，
//! 已被同级或更高优先级占用的链不再求解。

use crate::skeleton::{JointPriority, MAX_ANIMATED_JOINTS};

#[derive(Clone, Debug)]
pub struct JointClaimBoard {
    claims: Vec<Option<JointPriority>>,
}

impl JointClaimBoard {
    pub fn new() -> Self {
        Self {
            claims: vec![None; MAX_ANIMATED_JOINTS],
        }
    }

    /// 清空所有登记
    pub fn reset(&mut self) {
        self.claims.iter_mut().for_each(|c| *c = None);
    }

    /// 登记关节，保留较高的优先级
    pub fn claim(&mut self, joint_num: usize, priority: JointPriority) {
        if let Some(slot) = self.claims.get_mut(joint_num) {
            *slot = Some(slot.map_or(priority, |p| p.max(priority)));
        }
    }

    pub fn claimed_priority(&self, joint_num: usize) -> Option<JointPriority> {
        self.claims.get(joint_num).copied().flatten()
    }

    /// 关节是否已被不低于 `priority` 的动画占用
    pub fn is_claimed_at_or_above(&self, joint_num: usize, priority: JointPriority) -> bool {
        self.claimed_priority(joint_num)
            .map_or(false, |claimed| claimed >= priority)
    }
}

impl Default for JointClaimBoard {
    fn default() -> Self {
        Self::new()
    }
}
