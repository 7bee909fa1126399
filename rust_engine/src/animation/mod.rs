//! 关键帧动画系统
//!
//! 提供动画资产的编解码、按资产共享的数据缓存、
//! 每角色的动画实例与控制器，以及关节链约束求解。

mod anim_loader;
mod asset_fetch;
mod claim_board;
mod config;
mod constraint;
mod controller;
mod curve;
mod data_cache;
mod joint_state;
mod keyframe_motion;
mod motion_data;
mod quantize;

pub use anim_loader::{
    decode_motion_list, encode_motion_list, encoded_size, resolve_animated_joint, KEYFRAME_MOTION_SUBVERSION,
    KEYFRAME_MOTION_VERSION, MAX_ANIM_DURATION, MAX_CHAIN_LENGTH, MAX_CONSTRAINTS, MAX_PELVIS_OFFSET,
};
pub use asset_fetch::{AssetSource, FetchReply, MemoryAssetStore};
pub use claim_board::JointClaimBoard;
pub use config::{get_config, reset_config, set_config, SolverConfig};
pub use constraint::{clamp_rescale, smooth_interpolant, ConstraintContext, JointConstraint};
pub use controller::{dispatch_fetch_reply, MotionController};
pub use curve::{
    nlerp, AnimationCurve, Interpolate, InterpolationType, Key, PositionCurve, RotationCurve, ScaleCurve,
};
pub use data_cache::{KeyframeDataCache, MotionListHandle};
pub use joint_state::{JointState, JointUsage, Pose};
pub use keyframe_motion::{AssetStatus, InitStatus, KeyframeMotion};
pub use motion_data::{
    BBoxLocal, ConstraintTargetType, ConstraintType, HandPose, JointConstraintSharedData, JointMotion,
    JointMotionList, NUM_HAND_POSES,
};
pub use quantize::{f32_to_u16, pack_quat, u16_to_f32, unpack_quat};
