//! 骨架：关节层级、碰撞体与世界空间查询

use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;

use super::{Joint, JointId};

/// 动画关节数量上限
pub const MAX_ANIMATED_JOINTS: usize = 216;

/// 骨架
///
/// 关节按添加顺序存储，父节点必须先于子节点添加。
/// 碰撞体也是节点，同时拥有独立的碰撞体编号。
#[derive(Clone, Debug)]
pub struct Skeleton {
    joints: Vec<Joint>,
    name_to_index: HashMap<String, usize>,
    /// 碰撞体编号 -> 节点
    volumes: Vec<JointId>,
    volume_name_to_id: HashMap<String, usize>,
    animated_joint_count: usize,
    serial_num: u32,
}

impl Skeleton {
    pub fn new() -> Self {
        Self {
            joints: Vec::new(),
            name_to_index: HashMap::new(),
            volumes: Vec::new(),
            volume_name_to_id: HashMap::new(),
            animated_joint_count: 0,
            serial_num: 0,
        }
    }

    /// 添加普通关节，自动分配动画关节编号
    pub fn add_joint(&mut self, name: &str, parent: Option<JointId>, position: Vec3) -> JointId {
        let mut joint = Joint::new(name, parent, position);
        joint.joint_num = Some(self.animated_joint_count);
        self.animated_joint_count += 1;
        self.push(joint)
    }

    /// 添加碰撞体，返回碰撞体编号
    pub fn add_collision_volume(&mut self, name: &str, parent: JointId, position: Vec3, scale: Vec3) -> usize {
        let mut joint = Joint::new(name, Some(parent), position);
        joint.scale = scale;
        joint.is_collision_volume = true;
        let id = self.push(joint);
        let volume_id = self.volumes.len();
        self.volumes.push(id);
        self.volume_name_to_id.insert(name.to_string(), volume_id);
        volume_id
    }

    fn push(&mut self, joint: Joint) -> JointId {
        let index = self.joints.len();
        self.name_to_index.insert(joint.name.clone(), index);
        self.joints.push(joint);
        JointId(index)
    }

    /// 通过名称查找节点
    pub fn find_joint(&self, name: &str) -> Option<JointId> {
        self.name_to_index.get(name).copied().map(JointId)
    }

    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(id.0)
    }

    pub fn joint_mut(&mut self, id: JointId) -> Option<&mut Joint> {
        self.joints.get_mut(id.0)
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn animated_joint_count(&self) -> usize {
        self.animated_joint_count
    }

    pub fn parent(&self, id: JointId) -> Option<JointId> {
        self.joint(id).and_then(|j| j.parent)
    }

    pub fn joint_num(&self, id: JointId) -> Option<usize> {
        self.joint(id).and_then(|j| j.joint_num)
    }

    // ========== 本地变换 ==========

    pub fn position(&self, id: JointId) -> Vec3 {
        self.joint(id).map(|j| j.position).unwrap_or(Vec3::ZERO)
    }

    pub fn rotation(&self, id: JointId) -> Quat {
        self.joint(id).map(|j| j.rotation).unwrap_or(Quat::IDENTITY)
    }

    pub fn set_position(&mut self, id: JointId, position: Vec3) {
        if let Some(joint) = self.joint_mut(id) {
            joint.position = position;
        }
    }

    pub fn set_rotation(&mut self, id: JointId, rotation: Quat) {
        if let Some(joint) = self.joint_mut(id) {
            joint.rotation = rotation;
        }
    }

    pub fn set_scale(&mut self, id: JointId, scale: Vec3) {
        if let Some(joint) = self.joint_mut(id) {
            joint.scale = scale;
        }
    }

    pub fn set_update_xform(&mut self, id: JointId, update: bool) {
        if let Some(joint) = self.joint_mut(id) {
            joint.update_xform = update;
        }
    }

    // ========== 世界空间 ==========

    /// 世界变换矩阵（沿父链向上累乘）
    pub fn world_matrix(&self, id: JointId) -> Mat4 {
        let Some(joint) = self.joint(id) else {
            return Mat4::IDENTITY;
        };
        let local = joint.local_matrix();
        match joint.parent {
            Some(parent) => self.world_matrix(parent) * local,
            None => local,
        }
    }

    pub fn world_position(&self, id: JointId) -> Vec3 {
        self.world_matrix(id).w_axis.truncate()
    }

    /// 世界旋转（不含缩放）
    pub fn world_rotation(&self, id: JointId) -> Quat {
        let Some(joint) = self.joint(id) else {
            return Quat::IDENTITY;
        };
        match joint.parent {
            Some(parent) => self.world_rotation(parent) * joint.rotation,
            None => joint.rotation,
        }
    }

    // ========== 碰撞体 ==========

    pub fn collision_volume_id(&self, name: &str) -> Option<usize> {
        self.volume_name_to_id.get(name).copied()
    }

    pub fn collision_volume(&self, volume_id: usize) -> Option<JointId> {
        self.volumes.get(volume_id).copied()
    }

    pub fn collision_volume_name(&self, volume_id: usize) -> Option<&str> {
        self.collision_volume(volume_id)
            .and_then(|id| self.joint(id))
            .map(|j| j.name.as_str())
    }

    pub fn collision_volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// 碰撞体局部偏移在世界空间中的位置（偏移受碰撞体缩放影响）
    pub fn volume_pos(&self, volume_id: usize, offset: Vec3) -> Vec3 {
        match self.collision_volume(volume_id) {
            Some(id) => self.world_matrix(id).transform_point3(offset),
            None => Vec3::ZERO,
        }
    }

    // ========== 重建 ==========

    pub fn serial_num(&self) -> u32 {
        self.serial_num
    }

    /// 骨架重建后调用，绑定的约束会在下一帧重新初始化
    pub fn mark_rebuilt(&mut self) {
        self.serial_num = self.serial_num.wrapping_add(1);
    }

    /// 标准人形骨架
    pub fn default_avatar() -> Self {
        let mut s = Skeleton::new();
        let root = s.add_joint("mRoot", None, Vec3::ZERO);
        s.add_joint("mScreen", None, Vec3::ZERO);
        let pelvis = s.add_joint("mPelvis", Some(root), Vec3::new(0.0, 0.0, 1.067));
        let torso = s.add_joint("mTorso", Some(pelvis), Vec3::new(0.0, 0.0, 0.084));
        let chest = s.add_joint("mChest", Some(torso), Vec3::new(-0.015, 0.0, 0.205));
        let neck = s.add_joint("mNeck", Some(chest), Vec3::new(-0.01, 0.0, 0.251));
        let head = s.add_joint("mHead", Some(neck), Vec3::new(0.0, 0.0, 0.076));

        s.add_collision_volume("PELVIS", pelvis, Vec3::new(-0.01, 0.0, -0.02), Vec3::new(0.12, 0.16, 0.17));
        s.add_collision_volume("BELLY", torso, Vec3::new(0.028, 0.0, 0.04), Vec3::new(0.09, 0.13, 0.15));
        s.add_collision_volume("CHEST", chest, Vec3::new(0.028, 0.0, 0.07), Vec3::new(0.11, 0.15, 0.2));
        s.add_collision_volume("NECK", neck, Vec3::new(0.0, 0.0, 0.02), Vec3::new(0.05, 0.06, 0.08));
        s.add_collision_volume("HEAD", head, Vec3::new(0.02, 0.0, 0.07), Vec3::new(0.11, 0.09, 0.12));

        for (side, y) in [("Left", 1.0f32), ("Right", -1.0f32)] {
            let v = if side == "Left" { "L" } else { "R" };

            let collar = s.add_joint(&format!("mCollar{}", side), Some(chest), Vec3::new(-0.021, 0.085 * y, 0.165));
            let shoulder = s.add_joint(&format!("mShoulder{}", side), Some(collar), Vec3::new(0.0, 0.079 * y, 0.0));
            let elbow = s.add_joint(&format!("mElbow{}", side), Some(shoulder), Vec3::new(0.0, 0.248 * y, 0.0));
            let wrist = s.add_joint(&format!("mWrist{}", side), Some(elbow), Vec3::new(0.0, 0.205 * y, 0.0));

            let hip = s.add_joint(&format!("mHip{}", side), Some(pelvis), Vec3::new(0.034, 0.127 * y, -0.041));
            let knee = s.add_joint(&format!("mKnee{}", side), Some(hip), Vec3::new(-0.046, -0.001 * y, -0.491));
            let ankle = s.add_joint(&format!("mAnkle{}", side), Some(knee), Vec3::new(-0.001, 0.049 * y, -0.468));
            s.add_joint(&format!("mFoot{}", side), Some(ankle), Vec3::new(0.112, 0.0, -0.061));

            s.add_collision_volume(&format!("{}_UPPER_ARM", v), shoulder, Vec3::new(0.0, 0.12 * y, 0.01), Vec3::new(0.05, 0.17, 0.05));
            s.add_collision_volume(&format!("{}_LOWER_ARM", v), elbow, Vec3::new(0.0, 0.1 * y, 0.0), Vec3::new(0.04, 0.14, 0.04));
            s.add_collision_volume(&format!("{}_HAND", v), wrist, Vec3::new(0.01, 0.05 * y, 0.0), Vec3::new(0.05, 0.08, 0.03));
            s.add_collision_volume(&format!("{}_UPPER_LEG", v), hip, Vec3::new(-0.02, 0.05 * y, -0.22), Vec3::new(0.09, 0.09, 0.32));
            s.add_collision_volume(&format!("{}_LOWER_LEG", v), knee, Vec3::new(-0.02, 0.0, -0.2), Vec3::new(0.06, 0.06, 0.25));
            s.add_collision_volume(&format!("{}_FOOT", v), ankle, Vec3::new(0.077, 0.0, -0.041), Vec3::new(0.13, 0.05, 0.05));
        }
        s
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new()
    }
}
