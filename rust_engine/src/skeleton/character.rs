//! 角色能力接口
//!
//! 动画实例通过此接口访问骨架、地面、坐标转换和手势黑板，
//! 不持有角色本身。

use glam::{DVec3, Vec3};
use uuid::Uuid;

use super::{JointPriority, Skeleton};
use crate::animation::HandPose;

/// 角色
pub trait Character {
    fn id(&self) -> Uuid;

    fn skeleton(&self) -> &Skeleton;

    fn skeleton_mut(&mut self) -> &mut Skeleton;

    /// 给定 agent 空间位置下方的地面点与法线
    fn ground(&self, pos: Vec3) -> (Vec3, Vec3);

    fn pos_global_from_agent(&self, pos: Vec3) -> DVec3;

    fn pos_agent_from_global(&self, pos: DVec3) -> Vec3;

    /// 屏幕像素面积，用于决定求解迭代次数
    fn pixel_area(&self) -> f32;

    /// 本帧已写入的手势优先级，未写入时为 None
    fn hand_pose_priority(&self) -> Option<JointPriority>;

    fn set_hand_pose(&mut self, pose: HandPose, priority: JointPriority);

    fn start_emote(&mut self, _emote: &str) {}

    /// 每帧开始时调用，清空上一帧的黑板数据
    fn begin_frame(&mut self) {}
}

/// 平地上的简单角色
#[derive(Clone, Debug)]
pub struct BasicCharacter {
    pub id: Uuid,
    pub skeleton: Skeleton,
    pub ground_height: f32,
    pub ground_normal: Vec3,
    /// agent 坐标原点的全局坐标
    pub region_origin: DVec3,
    pub pixel_area: f32,
    pub hand_pose: Option<(HandPose, JointPriority)>,
    pub emotes: Vec<String>,
}

impl BasicCharacter {
    pub fn new(id: Uuid, skeleton: Skeleton) -> Self {
        Self {
            id,
            skeleton,
            ground_height: 0.0,
            ground_normal: Vec3::Z,
            region_origin: DVec3::ZERO,
            pixel_area: 80000.0,
            hand_pose: None,
            emotes: Vec::new(),
        }
    }
}

impl Character for BasicCharacter {
    fn id(&self) -> Uuid {
        self.id
    }

    fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }

    fn ground(&self, pos: Vec3) -> (Vec3, Vec3) {
        (Vec3::new(pos.x, pos.y, self.ground_height), self.ground_normal)
    }

    fn pos_global_from_agent(&self, pos: Vec3) -> DVec3 {
        self.region_origin + pos.as_dvec3()
    }

    fn pos_agent_from_global(&self, pos: DVec3) -> Vec3 {
        (pos - self.region_origin).as_vec3()
    }

    fn pixel_area(&self) -> f32 {
        self.pixel_area
    }

    fn hand_pose_priority(&self) -> Option<JointPriority> {
        self.hand_pose.map(|(_, p)| p)
    }

    fn set_hand_pose(&mut self, pose: HandPose, priority: JointPriority) {
        self.hand_pose = Some((pose, priority));
    }

    fn start_emote(&mut self, emote: &str) {
        self.emotes.push(emote.to_string());
    }

    fn begin_frame(&mut self) {
        self.hand_pose = None;
    }
}
