//! 关节节点与关节优先级

use glam::{Mat4, Quat, Vec3};

/// 关节句柄（骨架内的下标）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointId(pub usize);

/// 关节优先级
///
/// 资产中以 s32 存储，合法值不限于命名常量（例如被钳制后的 6），
/// 因此用整数新类型表示并按整数比较。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointPriority(pub i32);

impl JointPriority {
    /// 使用动作的基础优先级
    pub const USE_MOTION: JointPriority = JointPriority(-1);
    pub const LOW: JointPriority = JointPriority(0);
    pub const MEDIUM: JointPriority = JointPriority(1);
    pub const HIGH: JointPriority = JointPriority(2);
    pub const HIGHER: JointPriority = JointPriority(3);
    pub const HIGHEST: JointPriority = JointPriority(4);
    /// 叠加层，资产中的基础优先级不允许达到此值
    pub const ADDITIVE: JointPriority = JointPriority(7);

    pub fn value(self) -> i32 {
        self.0
    }
}

impl Default for JointPriority {
    fn default() -> Self {
        JointPriority::LOW
    }
}

/// 骨架中的一个节点（普通关节或碰撞体）
#[derive(Clone, Debug)]
pub struct Joint {
    pub name: String,
    pub parent: Option<JointId>,
    /// 动画关节编号，碰撞体为 None
    pub joint_num: Option<usize>,

    // 本地变换（相对父节点）
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,

    /// 是否由外部逻辑（约束求解）驱动变换
    pub update_xform: bool,
    pub is_collision_volume: bool,
}

impl Joint {
    pub fn new(name: &str, parent: Option<JointId>, position: Vec3) -> Self {
        Self {
            name: name.to_string(),
            parent,
            joint_num: None,
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            update_xform: false,
            is_collision_volume: false,
        }
    }

    /// 本地变换矩阵
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
