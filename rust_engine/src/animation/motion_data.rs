//! 动画资产数据模型
//!
//! 一个资产解码后得到 `JointMotionList`：逐关节的曲线 + 全局参数 + 约束描述。
//! 它被同一资产的所有动画实例共享，运行时只读。

use glam::Vec3;

use super::curve::{PositionCurve, RotationCurve, ScaleCurve};
use super::joint_state::{JointState, JointUsage};
use crate::skeleton::JointPriority;

/// 手势数量
pub const NUM_HAND_POSES: u32 = 14;

/// 手势
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum HandPose {
    #[default]
    Spread = 0,
    Relaxed,
    Point,
    Fist,
    RelaxedLeft,
    PointLeft,
    FistLeft,
    RelaxedRight,
    PointRight,
    FistRight,
    SaluteRight,
    Typing,
    PeaceRight,
    PalmRight,
}

impl HandPose {
    pub fn from_u32(value: u32) -> Option<Self> {
        use HandPose::*;
        Some(match value {
            0 => Spread,
            1 => Relaxed,
            2 => Point,
            3 => Fist,
            4 => RelaxedLeft,
            5 => PointLeft,
            6 => FistLeft,
            7 => RelaxedRight,
            8 => PointRight,
            9 => FistRight,
            10 => SaluteRight,
            11 => Typing,
            12 => PeaceRight,
            13 => PalmRight,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// 约束类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintType {
    Point = 0,
    Plane = 1,
}

/// 约束目标类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintTargetType {
    /// 另一个碰撞体
    Body,
    /// 源点正下方的地面
    Ground,
}

/// 局部包围盒（初始为原点）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BBoxLocal {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBoxLocal {
    pub fn add_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }
}

/// 单个关节的动画轨道
#[derive(Clone, Debug, Default)]
pub struct JointMotion {
    pub joint_name: String,
    pub priority: JointPriority,
    pub usage: JointUsage,
    pub rotation_curve: RotationCurve,
    pub position_curve: PositionCurve,
    pub scale_curve: ScaleCurve,
}

impl JointMotion {
    pub fn new(joint_name: &str) -> Self {
        Self {
            joint_name: joint_name.to_string(),
            ..Default::default()
        }
    }

    /// 按用途位写入关节状态
    pub fn update(&self, state: &mut JointState, time: f32, duration: f32, looping: bool) {
        let usage = state.usage;

        if usage.intersects(JointUsage::SCALE) && !self.scale_curve.is_empty() {
            state.scale = self.scale_curve.get_value(time, duration, looping);
        }
        if usage.intersects(JointUsage::ROT) && !self.rotation_curve.is_empty() {
            state.rotation = self.rotation_curve.get_value(time, duration, looping);
        }
        if usage.intersects(JointUsage::POS) && !self.position_curve.is_empty() {
            state.position = self.position_curve.get_value(time, duration, looping);
        }
    }

    pub fn set_loop_in(&mut self, in_point: f32, duration: f32) {
        self.rotation_curve.set_loop_in(in_point, duration);
        self.position_curve.set_loop_in(in_point, duration);
        self.scale_curve.set_loop_in(in_point, duration);
    }

    pub fn set_loop_out(&mut self, out_point: f32, duration: f32) {
        self.rotation_curve.set_loop_out(out_point, duration);
        self.position_curve.set_loop_out(out_point, duration);
        self.scale_curve.set_loop_out(out_point, duration);
    }
}

/// 约束描述（资产内，所有实例共享）
#[derive(Clone, Debug)]
pub struct JointConstraintSharedData {
    /// 链长（不含末端关节）
    pub chain_length: usize,
    /// 链上关节在轨道列表中的下标，末端在前，共 chain_length + 1 个
    pub joint_state_indices: Vec<usize>,
    pub constraint_type: ConstraintType,
    pub source_volume: usize,
    pub source_offset: Vec3,
    pub target_type: ConstraintTargetType,
    /// 目标为地面时无意义
    pub target_volume: usize,
    pub target_offset: Vec3,
    pub target_dir: Vec3,
    pub ease_in_start: f32,
    pub ease_in_stop: f32,
    pub ease_out_start: f32,
    pub ease_out_stop: f32,
}

impl JointConstraintSharedData {
    pub fn new() -> Self {
        Self {
            chain_length: 0,
            joint_state_indices: Vec::new(),
            constraint_type: ConstraintType::Point,
            source_volume: 0,
            source_offset: Vec3::ZERO,
            target_type: ConstraintTargetType::Body,
            target_volume: 0,
            target_offset: Vec3::ZERO,
            target_dir: Vec3::ZERO,
            ease_in_start: 0.0,
            ease_in_stop: 0.0,
            ease_out_start: 0.0,
            ease_out_stop: 0.0,
        }
    }
}

impl Default for JointConstraintSharedData {
    fn default() -> Self {
        Self::new()
    }
}

/// 一个动画资产的全部数据
#[derive(Clone, Debug)]
pub struct JointMotionList {
    pub joint_motions: Vec<JointMotion>,
    pub constraints: Vec<JointConstraintSharedData>,
    pub duration: f32,
    pub looping: bool,
    pub loop_in_point: f32,
    pub loop_out_point: f32,
    pub ease_in_duration: f32,
    pub ease_out_duration: f32,
    pub base_priority: JointPriority,
    pub max_priority: JointPriority,
    pub hand_pose: HandPose,
    /// 空字符串表示没有表情
    pub emote_name: String,
    pub pelvis_bbox: BBoxLocal,
}

impl JointMotionList {
    pub fn new() -> Self {
        Self {
            joint_motions: Vec::new(),
            constraints: Vec::new(),
            duration: 0.0,
            looping: false,
            loop_in_point: 0.0,
            loop_out_point: 0.0,
            ease_in_duration: 0.0,
            ease_out_duration: 0.0,
            base_priority: JointPriority::LOW,
            max_priority: JointPriority::LOW,
            hand_pose: HandPose::Spread,
            emote_name: String::new(),
            pelvis_bbox: BBoxLocal::default(),
        }
    }

    pub fn num_joint_motions(&self) -> usize {
        self.joint_motions.len()
    }

    pub fn joint_motion(&self, index: usize) -> Option<&JointMotion> {
        self.joint_motions.get(index)
    }

    /// 在所有曲线上缓存循环点
    pub fn apply_loop_points(&mut self) {
        let (loop_in, loop_out, duration) = (self.loop_in_point, self.loop_out_point, self.duration);
        for motion in &mut self.joint_motions {
            motion.set_loop_in(loop_in, duration);
            motion.set_loop_out(loop_out, duration);
        }
    }

    /// 曲线上缓存的循环点是否与当前循环点一致
    pub fn loop_points_cached(&self) -> bool {
        let (loop_in, loop_out) = (self.loop_in_point, self.loop_out_point);
        self.joint_motions.iter().all(|m| {
            m.rotation_curve.loop_in_key().map(|k| k.time) == Some(loop_in)
                && m.rotation_curve.loop_out_key().map(|k| k.time) == Some(loop_out)
        })
    }

    /// 输出关键帧统计，返回估算的内存占用（字节）
    pub fn dump_diag_info(&self, quiet: bool) -> usize {
        let mut total = std::mem::size_of::<Self>();
        if !quiet {
            log::info!("Duration: {:.2}", self.duration);
            log::info!("Joint motions: {}", self.joint_motions.len());
        }
        for motion in &self.joint_motions {
            let rot = motion.rotation_curve.len();
            let pos = motion.position_curve.len();
            let scale = motion.scale_curve.len();
            let size = std::mem::size_of::<JointMotion>()
                + rot * std::mem::size_of::<super::curve::Key<glam::Quat>>()
                + (pos + scale) * std::mem::size_of::<super::curve::Key<Vec3>>();
            if !quiet {
                log::info!(
                    "  {}: {} rot keys, {} pos keys, {} scale keys, {} bytes",
                    motion.joint_name,
                    rot,
                    pos,
                    scale,
                    size
                );
            }
            total += size;
        }
        total += self.constraints.len() * std::mem::size_of::<JointConstraintSharedData>();
        if !quiet {
            log::info!("Total: {} bytes", total);
        }
        total
    }
}

impl Default for JointMotionList {
    fn default() -> Self {
        Self::new()
    }
}
