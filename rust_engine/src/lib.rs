//! Keyframe Engine - 关键帧骨骼动画运行时
//!
//! 提供：
//! - 版本化二进制动画资产的解析与序列化
//! - 按资产 ID 共享的动画数据缓存
//! - 每个角色的动画实例（加载状态机、循环与缓入缓出）
//! - 基于碰撞体的 IK 约束求解

pub mod animation;
pub mod skeleton;

pub use animation::{
    AnimationCurve, HandPose, JointMotionList, KeyframeDataCache, KeyframeMotion, MotionController,
};
pub use skeleton::{BasicCharacter, Character, JointPriority, Skeleton};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnimError {
    #[error("Animation decode failed: {0}")]
    DecodeFailed(String),

    #[error("Animation encode failed: {0}")]
    EncodeFailed(String),

    #[error("Animation fetch failed: {0}")]
    FetchFailed(String),

    #[error("Joint unresolved: {0}")]
    JointUnresolved(String),

    #[error("Constraint unresolvable: {0}")]
    ConstraintUnresolvable(String),

    #[error("Cache entry already exists: {0}")]
    CacheEntryExists(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, AnimError>;
