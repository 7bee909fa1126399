//! 关节约束求解
//!
//! 让关节链末端的碰撞体点贴合目标（另一碰撞体或地面）。
//! 链上中间关节位置用 Verlet 式松弛保持骨长，再逐级反推旋转。
//! 中间位置以骨盆空间保存，帧间平滑。

use glam::{DVec3, Quat, Vec3};

use super::claim_board::JointClaimBoard;
use super::config::SolverConfig;
use super::curve::nlerp;
use super::joint_state::{JointState, JointUsage};
use super::motion_data::{ConstraintTargetType, ConstraintType, JointConstraintSharedData};
use crate::skeleton::{Character, JointId, JointPriority, Skeleton};

/// 线性重映射并钳制到输出区间
pub fn clamp_rescale(x: f32, in1: f32, in2: f32, out1: f32, out2: f32) -> f32 {
    if (in2 - in1).abs() <= f32::EPSILON {
        return if x >= in2 { out2 } else { out1 };
    }
    let t = ((x - in1) / (in2 - in1)).clamp(0.0, 1.0);
    out1 + (out2 - out1) * t
}

/// 帧率无关的平滑插值系数：1 - 2^(-dt/τ)
pub fn smooth_interpolant(time_constant: f32, frame_delta: f32) -> f32 {
    if time_constant == 0.0 {
        return 1.0;
    }
    (1.0 - 2f32.powf(-frame_delta / time_constant)).clamp(0.0, 1.0)
}

/// 把 from 方向转到 to 方向的最短旋转
fn shortest_arc(from: Vec3, to: Vec3) -> Quat {
    match (from.try_normalize(), to.try_normalize()) {
        (Some(a), Some(b)) => Quat::from_rotation_arc(a, b),
        _ => Quat::IDENTITY,
    }
}

fn state_joint(states: &[JointState], index: usize) -> Option<JointId> {
    states.get(index).and_then(|s| s.joint)
}

/// 求解时需要的外部状态
pub struct ConstraintContext<'a> {
    pub character: &'a mut dyn Character,
    pub joint_states: &'a mut [JointState],
    pub pelvis: JointId,
    /// 动画的基础优先级
    pub priority: JointPriority,
    pub claims: &'a JointClaimBoard,
    pub last_update_time: f32,
    /// 本帧时长，用于平滑插值
    pub frame_delta: f32,
    pub config: &'a SolverConfig,
}

/// 约束的运行时状态（每个动画实例一份）
#[derive(Clone, Debug)]
pub struct JointConstraint {
    pub weight: f32,
    pub total_length: f32,
    /// 中间关节位置（骨盆空间）
    positions: Vec<Vec3>,
    joint_lengths: Vec<f32>,
    joint_length_fractions: Vec<f32>,
    pub active: bool,
    ground_pos: DVec3,
    ground_norm: Vec3,
    source_volume: Option<JointId>,
    target_volume: Option<JointId>,
    pub fixup_distance_rms: f32,
}

impl JointConstraint {
    pub fn new(shared: &JointConstraintSharedData) -> Self {
        let n = shared.chain_length + 1;
        Self {
            weight: 0.0,
            total_length: 0.0,
            positions: vec![Vec3::ZERO; n],
            joint_lengths: vec![0.0; n],
            joint_length_fractions: vec![0.0; n],
            active: false,
            ground_pos: DVec3::ZERO,
            ground_norm: Vec3::Z,
            source_volume: None,
            target_volume: None,
            fixup_distance_rms: 0.0,
        }
    }

    /// 按当前骨架测量骨长
    pub fn initialize(&mut self, shared: &JointConstraintSharedData, skeleton: &Skeleton, states: &[JointState]) {
        let chain = shared.chain_length;
        let source_pos = skeleton.volume_pos(shared.source_volume, shared.source_offset);

        let Some(end_joint) = shared.joint_state_indices.first().and_then(|&i| state_joint(states, i)) else {
            return;
        };
        let source_pos_offset = source_pos.distance(skeleton.world_position(end_joint));

        let Some(end_parent) = skeleton.parent(end_joint) else {
            return;
        };
        self.joint_lengths[0] = skeleton.world_position(end_parent).distance(source_pos);
        self.total_length = self.joint_lengths[0];

        for n in 1..chain {
            let Some(joint) = state_joint(states, shared.joint_state_indices[n]) else {
                return;
            };
            let parent_pos = skeleton
                .parent(joint)
                .map(|p| skeleton.world_position(p))
                .unwrap_or(Vec3::ZERO);
            self.joint_lengths[n] = skeleton.world_position(joint).distance(parent_pos);
            self.total_length += self.joint_lengths[n];
        }

        // 各段占总长的比例，用于整体剪切链
        if self.total_length > 0.0 {
            for n in 1..chain {
                self.joint_length_fractions[n] = self.joint_lengths[n] / self.total_length;
            }
        }

        // 末端关节到约束点
        self.total_length += source_pos_offset;

        self.source_volume = skeleton.collision_volume(shared.source_volume);
        self.target_volume = match shared.target_type {
            ConstraintTargetType::Body => skeleton.collision_volume(shared.target_volume),
            ConstraintTargetType::Ground => None,
        };
    }

    pub fn activate(&mut self, shared: &JointConstraintSharedData, ctx: &mut ConstraintContext) {
        self.active = true;

        if shared.target_type == ConstraintTargetType::Ground {
            let source_pos = ctx
                .character
                .skeleton()
                .volume_pos(shared.source_volume, shared.source_offset);
            let (ground_pos_agent, ground_norm) = ctx.character.ground(source_pos);
            self.ground_norm = ground_norm;
            self.ground_pos = ctx
                .character
                .pos_global_from_agent(ground_pos_agent + shared.target_offset);
        }

        let skeleton = ctx.character.skeleton_mut();
        if let Some(volume) = self.source_volume {
            skeleton.set_update_xform(volume, true);
        }
        if let Some(volume) = self.target_volume {
            skeleton.set_update_xform(volume, true);
        }

        let pelvis_pos = skeleton.world_position(ctx.pelvis);
        let inv_pelvis_rot = skeleton.world_rotation(ctx.pelvis).inverse();
        for n in 1..shared.chain_length {
            let Some(joint) = state_joint(ctx.joint_states, shared.joint_state_indices[n]) else {
                return;
            };
            self.positions[n] = inv_pelvis_rot * (skeleton.world_position(joint) - pelvis_pos);
        }

        self.weight = 1.0;
    }

    pub fn deactivate(&mut self, shared: &JointConstraintSharedData, skeleton: &mut Skeleton) {
        if let Some(volume) = self.source_volume {
            skeleton.set_update_xform(volume, false);
        }
        if shared.target_type != ConstraintTargetType::Ground {
            if let Some(volume) = self.target_volume {
                skeleton.set_update_xform(volume, false);
            }
        }
        self.active = false;
    }

    /// 求解一帧
    ///
    /// 求解期间临时把关键帧旋转写入骨架以得到运动学位置，返回前恢复。
    pub fn apply(&mut self, shared: &JointConstraintSharedData, time: f32, ctx: &mut ConstraintContext) {
        if time < shared.ease_in_start {
            return;
        }
        if time > shared.ease_out_stop {
            if self.active {
                self.deactivate(shared, ctx.character.skeleton_mut());
            }
            return;
        }
        if !self.active || time < shared.ease_in_stop {
            self.activate(shared, ctx);
        }

        let chain = shared.chain_length;
        let mut joints = Vec::with_capacity(chain + 1);
        for &index in &shared.joint_state_indices {
            let Some(joint) = state_joint(ctx.joint_states, index) else {
                return;
            };
            joints.push(joint);
        }
        if joints.len() != chain + 1 {
            return;
        }

        // 链上任一关节已被同级或更高优先级占用则跳过
        {
            let skeleton = ctx.character.skeleton();
            for &joint in &joints {
                if let Some(num) = skeleton.joint_num(joint) {
                    if ctx.claims.is_claimed_at_or_above(num, ctx.priority) {
                        return;
                    }
                }
            }
        }

        let skeleton = ctx.character.skeleton_mut();
        let old_rots: Vec<Quat> = joints.iter().map(|&j| skeleton.rotation(j)).collect();
        for (n, &joint) in joints.iter().enumerate() {
            let rotation = ctx.joint_states[shared.joint_state_indices[n]].rotation;
            skeleton.set_rotation(joint, rotation);
        }

        self.solve(shared, time, &joints, ctx);

        let skeleton = ctx.character.skeleton_mut();
        for (&joint, &rotation) in joints.iter().zip(old_rots.iter()) {
            skeleton.set_rotation(joint, rotation);
        }
    }

    fn solve(&mut self, shared: &JointConstraintSharedData, time: f32, joints: &[JointId], ctx: &mut ConstraintContext) {
        let chain = shared.chain_length;
        let config = ctx.config;
        let indices = &shared.joint_state_indices;

        let root_pos = ctx.character.skeleton().world_position(joints[chain]);
        let keyframe_source_pos = ctx
            .character
            .skeleton()
            .volume_pos(shared.source_volume, shared.source_offset);

        let mut target_pos = match shared.target_type {
            ConstraintTargetType::Ground => ctx.character.pos_agent_from_global(self.ground_pos),
            ConstraintTargetType::Body => ctx
                .character
                .skeleton()
                .volume_pos(shared.target_volume, shared.target_offset),
        };

        if shared.constraint_type == ConstraintType::Plane {
            let skeleton = ctx.character.skeleton();
            let norm = match shared.target_type {
                ConstraintTargetType::Ground => self.ground_norm,
                ConstraintTargetType::Body => {
                    let mut norm = match self.target_volume {
                        Some(volume) => target_pos - skeleton.world_position(volume),
                        None => Vec3::ZERO,
                    };
                    if norm == Vec3::ZERO {
                        norm = -shared.source_offset;
                        if let Some(volume) = self.source_volume {
                            norm = skeleton.world_rotation(volume) * norm;
                        }
                    }
                    norm.normalize_or_zero()
                }
            };
            target_pos = keyframe_source_pos + norm * (target_pos - keyframe_source_pos).dot(norm);
        }

        // 目标不可达时权重平滑衰减，可达时平滑恢复
        if chain != 0
            && root_pos.distance_squared(target_pos) * config.reach_slack > self.total_length * self.total_length
        {
            self.weight = lerp(self.weight, 0.0, smooth_interpolant(0.1, ctx.frame_delta));
        } else {
            self.weight = lerp(self.weight, 1.0, smooth_interpolant(0.3, ctx.frame_delta));
        }

        let ease = if shared.ease_out_stop == 0.0 {
            1.0
        } else {
            clamp_rescale(time, shared.ease_in_start, shared.ease_in_stop, 0.0, 1.0).min(clamp_rescale(
                time,
                shared.ease_out_start,
                shared.ease_out_stop,
                1.0,
                0.0,
            ))
        };
        let weight = self.weight * ease;

        let source_to_target = target_pos - keyframe_source_pos;

        let max_iterations = clamp_rescale(
            ctx.character.pixel_area(),
            config.max_pixel_area,
            config.min_pixel_area,
            config.max_iterations as f32,
            config.min_iterations as f32,
        )
        .round()
        .max(0.0) as u32;

        if config.debug_log {
            log::debug!(
                "Constraint at t={:.3}: weight {:.3}, total length {:.3}, {} iterations",
                time,
                weight,
                self.total_length,
                max_iterations
            );
        }

        if chain == 0 {
            // 只有位移的约束（骨盆）
            let state = &mut ctx.joint_states[indices[0]];
            if state.usage.intersects(JointUsage::POS) {
                let skeleton = ctx.character.skeleton();
                let joint = joints[0];
                let parent_rot = skeleton
                    .parent(joint)
                    .map(|p| skeleton.world_rotation(p))
                    .unwrap_or(Quat::IDENTITY);
                let delta = parent_rot.inverse() * (source_to_target * weight);
                state.position = skeleton.position(joint) + delta;
            }
            return;
        }

        let pelvis = ctx.pelvis;
        let skeleton = ctx.character.skeleton();
        let end_joint = joints[0];
        let end_rot = skeleton.world_rotation(end_joint);
        let pelvis_pos = skeleton.world_position(pelvis);
        let pelvis_rot = skeleton.world_rotation(pelvis);

        // 链两端直接放到目标位置和根关节位置
        let mut positions = vec![Vec3::ZERO; chain + 1];
        positions[0] = keyframe_source_pos.lerp(target_pos, weight);
        positions[chain] = root_pos;

        let time_constant = 1.0 / clamp_rescale(self.fixup_distance_rms, 0.0, 0.5, 0.2, 8.0);
        let smoothing = smooth_interpolant(time_constant, ctx.frame_delta);
        for n in 1..chain {
            let kinematic = skeleton.world_position(joints[n]) + source_to_target * self.joint_length_fractions[n];
            let previous = pelvis_rot * self.positions[n] + pelvis_pos;
            positions[n] = previous.lerp(kinematic, smoothing);
        }

        let k = config.joint_length_k;
        let mut velocities = vec![Vec3::ZERO; chain.saturating_sub(1)];
        for iteration in 0..max_iterations {
            let mut finished = 0;
            for n in 1..chain {
                // 朝子关节
                let mut acceleration = (positions[n - 1] - positions[n])
                    * (positions[n].distance(positions[n - 1]) - self.joint_lengths[n - 1])
                    * k;
                // 朝父关节
                acceleration += (positions[n + 1] - positions[n])
                    * (positions[n + 1].distance(positions[n]) - self.joint_lengths[n])
                    * k;

                if acceleration.length_squared() < config.min_acceleration_squared {
                    finished += 1;
                }

                velocities[n - 1] *= 0.7;
                positions[n] += velocities[n - 1] + acceleration * 0.5;
                velocities[n - 1] += acceleration;
            }

            if iteration >= config.min_iteration_count && finished == chain - 1 {
                break;
            }
        }
        if positions.iter().any(|p| !p.is_finite()) {
            log::debug!("Constraint relaxation diverged at t={:.3}, skipping frame", time);
            return;
        }

        // 从根向末端逐级求旋转
        for n in (1..=chain).rev() {
            let skeleton = ctx.character.skeleton();
            let joint = joints[n];
            let child = joints[n - 1];
            let parent_rot = skeleton
                .parent(joint)
                .map(|p| skeleton.world_rotation(p))
                .unwrap_or(Quat::IDENTITY);
            let cur_rot = skeleton.world_rotation(joint);

            let target_at = positions[n - 1] - positions[n];
            // 链底端用碰撞体上的点而不是关节位置
            let current_at = if n == 1 {
                skeleton.volume_pos(shared.source_volume, shared.source_offset) - skeleton.world_position(joint)
            } else {
                cur_rot * skeleton.position(child)
            };
            let fixup = shortest_arc(current_at, target_at);

            let mut target_rot = parent_rot.inverse() * (fixup * cur_rot);
            let state = &mut ctx.joint_states[indices[n]];
            if weight != 1.0 {
                target_rot = nlerp(weight, state.rotation, target_rot);
            }
            state.rotation = target_rot;
            ctx.character.skeleton_mut().set_rotation(joint, target_rot);
        }

        // 末端关节保持原世界朝向
        let skeleton = ctx.character.skeleton();
        let end_parent_rot = skeleton
            .parent(end_joint)
            .map(|p| skeleton.world_rotation(p))
            .unwrap_or(Quat::IDENTITY);
        let end_local_rot = end_parent_rot.inverse() * end_rot;
        let end_state = &mut ctx.joint_states[indices[0]];
        end_state.rotation = if weight == 1.0 {
            end_local_rot
        } else {
            nlerp(weight, end_state.rotation, end_local_rot)
        };

        // 中间位置写回骨盆空间并统计修正量
        let inv_pelvis_rot = pelvis_rot.inverse();
        let delta_time = (time - ctx.last_update_time).abs().max(0.02);
        self.fixup_distance_rms = 0.0;
        for n in 1..chain {
            let new_pos = inv_pelvis_rot * (positions[n] - pelvis_pos);
            self.fixup_distance_rms += new_pos.distance_squared(self.positions[n]) / delta_time;
            self.positions[n] = new_pos;
        }
        if chain > 1 && self.total_length > 0.0 {
            self.fixup_distance_rms *= 1.0 / (self.total_length * (chain - 1) as f32);
            self.fixup_distance_rms = self.fixup_distance_rms.sqrt();
        } else {
            self.fixup_distance_rms = 0.0;
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
