//! 关键帧动画资产加载器
//!
//! 二进制格式（小端）：
//! - 头部：版本号、基础优先级、时长、表情名、循环点、缓入缓出、手势
//! - 逐关节：名称、优先级、旋转关键帧、位移关键帧
//! - 约束：链长、类型、源/目标碰撞体、偏移、缓入缓出窗口
//!
//! 旧格式（0.0 / 0.1）以 f32 存储时间和欧拉角；
//! 新格式（1.0）以 u16 量化存储时间、旋转和位移。

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Quat, Vec3};
use uuid::Uuid;

use crate::skeleton::{JointId, JointPriority, Skeleton, MAX_ANIMATED_JOINTS};
use crate::{AnimError, Result};

use super::curve::{InterpolationType, Key};
use super::joint_state::JointUsage;
use super::motion_data::{
    ConstraintTargetType, ConstraintType, HandPose, JointConstraintSharedData, JointMotion,
    JointMotionList,
};
use super::quantize::{euler_degrees_to_quat, f32_to_u16, pack_quat, u16_to_f32, unpack_quat};

/// 当前格式版本
pub const KEYFRAME_MOTION_VERSION: u16 = 1;
pub const KEYFRAME_MOTION_SUBVERSION: u16 = 0;

/// 动画最大时长（秒）
pub const MAX_ANIM_DURATION: f32 = 60.0;
/// 位移分量范围 ±5 米
pub const MAX_PELVIS_OFFSET: f32 = 5.0;
pub const MAX_CONSTRAINTS: i32 = 10;
pub const MAX_CHAIN_LENGTH: usize = 4;

/// 碰撞体名称字段长度
const VOLUME_NAME_LENGTH: usize = 16;
const GROUND_VOLUME: &str = "GROUND";

/// 按名称解析动画关节
///
/// 碰撞体和编号超出范围的关节视为未解析。
pub fn resolve_animated_joint(skeleton: &Skeleton, name: &str) -> Option<JointId> {
    let id = skeleton.find_joint(name)?;
    match skeleton.joint_num(id) {
        Some(num) if num < MAX_ANIMATED_JOINTS => Some(id),
        _ => None,
    }
}

/// 带资产 ID 上下文的读取器
struct AssetReader<'a> {
    cursor: Cursor<&'a [u8]>,
    asset_id: Uuid,
}

impl<'a> AssetReader<'a> {
    fn new(bytes: &'a [u8], asset_id: Uuid) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            asset_id,
        }
    }

    /// 记录警告并生成解码错误
    fn fail(&self, msg: impl Into<String>) -> AnimError {
        let msg = msg.into();
        log::warn!("{} for animation {}", msg, self.asset_id);
        AnimError::DecodeFailed(format!("{} for animation {}", msg, self.asset_id))
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        self.cursor
            .read_u8()
            .map_err(|e| self.fail(format!("Failed to read {}: {}", what, e)))
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| self.fail(format!("Failed to read {}: {}", what, e)))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| self.fail(format!("Failed to read {}: {}", what, e)))
    }

    fn read_i32(&mut self, what: &str) -> Result<i32> {
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|e| self.fail(format!("Failed to read {}: {}", what, e)))
    }

    /// 读取有限的 f32
    fn read_f32(&mut self, what: &str) -> Result<f32> {
        let v = self
            .cursor
            .read_f32::<LittleEndian>()
            .map_err(|e| self.fail(format!("Failed to read {}: {}", what, e)))?;
        if !v.is_finite() {
            return Err(self.fail(format!("Non-finite {}", what)));
        }
        Ok(v)
    }

    fn read_vec3(&mut self, what: &str) -> Result<Vec3> {
        let x = self.read_f32(what)?;
        let y = self.read_f32(what)?;
        let z = self.read_f32(what)?;
        Ok(Vec3::new(x, y, z))
    }

    fn read_u16_vec3(&mut self, what: &str, lower: f32, upper: f32) -> Result<Vec3> {
        let x = self.read_u16(what)?;
        let y = self.read_u16(what)?;
        let z = self.read_u16(what)?;
        Ok(Vec3::new(
            u16_to_f32(x, lower, upper),
            u16_to_f32(y, lower, upper),
            u16_to_f32(z, lower, upper),
        ))
    }

    /// 以 NUL 结尾的字符串
    fn read_string(&mut self, what: &str) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let b = self.read_u8(what)?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 定长 16 字节名称字段，截断到第一个 NUL
    fn read_volume_name(&mut self, what: &str) -> Result<String> {
        let mut buf = [0u8; VOLUME_NAME_LENGTH];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|e| self.fail(format!("Failed to read {}: {}", what, e)))?;
        let len = buf.iter().position(|&b| b == 0).unwrap_or(VOLUME_NAME_LENGTH);
        Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// 关键帧时间，必须落在 [0, duration]
    fn read_key_time(&mut self, old_version: bool, duration: f32) -> Result<f32> {
        let time = if old_version {
            self.read_f32("key time")?
        } else {
            let t = self.read_u16("key time")?;
            u16_to_f32(t, 0.0, duration)
        };
        if time < 0.0 || time > duration {
            return Err(self.fail(format!("Invalid key time {}", time)));
        }
        Ok(time)
    }
}

/// 解码动画资产
///
/// 任何字段校验失败都会记录一条带资产 ID 的警告并返回错误；
/// 约束数量越界则忽略全部约束，不视为失败。
pub fn decode_motion_list(bytes: &[u8], asset_id: Uuid, skeleton: &Skeleton) -> Result<JointMotionList> {
    let mut r = AssetReader::new(bytes, asset_id);

    let version = r.read_u16("version")?;
    let sub_version = r.read_u16("sub_version")?;
    let old_version = match (version, sub_version) {
        (0, 0) | (0, 1) => true,
        (KEYFRAME_MOTION_VERSION, KEYFRAME_MOTION_SUBVERSION) => false,
        _ => {
            return Err(r.fail(format!("Bad animation version {}.{}", version, sub_version)));
        }
    };

    let mut list = JointMotionList::new();

    // ========== 头部 ==========
    let base_priority = r.read_i32("base_priority")?;
    if base_priority >= JointPriority::ADDITIVE.0 {
        list.base_priority = JointPriority(JointPriority::ADDITIVE.0 - 1);
        list.max_priority = list.base_priority;
    } else if base_priority < JointPriority::USE_MOTION.0 {
        return Err(r.fail(format!("Bad animation base_priority {}", base_priority)));
    } else {
        list.base_priority = JointPriority(base_priority);
    }

    let duration = r.read_f32("duration")?;
    if duration > MAX_ANIM_DURATION {
        return Err(r.fail(format!("Invalid animation duration {}", duration)));
    }
    list.duration = duration;

    let emote_name = r.read_string("emote_name")?;
    if emote_name == asset_id.to_string() {
        return Err(r.fail("Malformed animation, emote name refers to itself"));
    }
    list.emote_name = emote_name;

    list.loop_in_point = r.read_f32("loop_in_point")?;
    list.loop_out_point = r.read_f32("loop_out_point")?;
    list.looping = r.read_i32("loop")? != 0;
    list.ease_in_duration = r.read_f32("ease_in_duration")?.max(0.0);
    list.ease_out_duration = r.read_f32("ease_out_duration")?.max(0.0);

    let hand_pose = r.read_u32("hand_pose")?;
    list.hand_pose = HandPose::from_u32(hand_pose)
        .ok_or_else(|| r.fail(format!("Invalid hand pose {}", hand_pose)))?;

    // ========== 关节轨道 ==========
    let num_motions = r.read_u32("num_joints")? as usize;
    if num_motions == 0 {
        return Err(r.fail("No joints"));
    }
    if num_motions > MAX_ANIMATED_JOINTS {
        return Err(r.fail(format!("Too many joints ({})", num_motions)));
    }

    let mut resolved: Vec<Option<JointId>> = Vec::with_capacity(num_motions);
    list.joint_motions.reserve(num_motions);

    for _ in 0..num_motions {
        let joint_name = r.read_string("joint_name")?;
        if joint_name == "mScreen" || joint_name == "mRoot" {
            return Err(r.fail(format!("Attempted to animate special {} joint", joint_name)));
        }

        let joint = resolve_animated_joint(skeleton, &joint_name);
        if joint.is_none() {
            log::warn!(
                "Joint not found or out of range: {} for animation {}",
                joint_name.replace('\u{7}', " "),
                asset_id
            );
        }
        resolved.push(joint);

        let mut motion = JointMotion::new(&joint_name);

        let priority = r.read_i32("joint_priority")?;
        if priority < JointPriority::USE_MOTION.0 {
            return Err(r.fail(format!("Joint priority {} invalid", priority)));
        }
        motion.priority = JointPriority(priority);
        if motion.priority != JointPriority::USE_MOTION && motion.priority > list.max_priority {
            list.max_priority = motion.priority;
        }

        // 旋转
        let num_rot_keys = r.read_i32("num_rot_keys")?;
        if num_rot_keys < 0 {
            return Err(r.fail(format!("Invalid number of rotation keys {}", num_rot_keys)));
        }
        motion.rotation_curve.interpolation = InterpolationType::Linear;
        if num_rot_keys > 0 {
            motion.usage |= JointUsage::ROT;
        }
        for _ in 0..num_rot_keys {
            let time = r.read_key_time(old_version, duration)?;
            let rotation = if old_version {
                euler_degrees_to_quat(r.read_vec3("rot_angles")?)
            } else {
                let v = r.read_u16_vec3("rot_angle", -1.0, 1.0)?;
                unpack_quat(v.x, v.y, v.z)
            };
            if !rotation.is_finite() {
                return Err(r.fail("Non-finite rotation key"));
            }
            motion.rotation_curve.push(Key::new(time, rotation));
        }
        motion.rotation_curve.sort();

        // 位移
        let num_pos_keys = r.read_i32("num_pos_keys")?;
        if num_pos_keys < 0 {
            return Err(r.fail(format!("Invalid number of position keys {}", num_pos_keys)));
        }
        motion.position_curve.interpolation = InterpolationType::Linear;
        if num_pos_keys > 0 {
            motion.usage |= JointUsage::POS;
        }
        let is_pelvis = joint_name == "mPelvis";
        for _ in 0..num_pos_keys {
            let time = r.read_key_time(old_version, duration)?;
            let position = if old_version {
                r.read_vec3("pos")?
                    .clamp(Vec3::splat(-MAX_PELVIS_OFFSET), Vec3::splat(MAX_PELVIS_OFFSET))
            } else {
                r.read_u16_vec3("pos", -MAX_PELVIS_OFFSET, MAX_PELVIS_OFFSET)?
            };
            if is_pelvis {
                list.pelvis_bbox.add_point(position);
            }
            motion.position_curve.push(Key::new(time, position));
        }
        motion.position_curve.sort();

        list.joint_motions.push(motion);
    }

    // ========== 约束 ==========
    let num_constraints = r.read_i32("num_constraints")?;
    if !(0..=MAX_CONSTRAINTS).contains(&num_constraints) {
        log::warn!(
            "Bad number of constraints... ignoring: {} for animation {}",
            num_constraints,
            asset_id
        );
    } else {
        for _ in 0..num_constraints {
            let constraint = read_constraint(&mut r, skeleton, &resolved, &list.emote_name)?;
            list.constraints.push(constraint);
        }
    }

    log::debug!(
        "Decoded animation {}: {} joints, {} constraints, duration {:.2}",
        asset_id,
        list.joint_motions.len(),
        list.constraints.len(),
        list.duration
    );

    Ok(list)
}

fn read_constraint(
    r: &mut AssetReader<'_>,
    skeleton: &Skeleton,
    resolved: &[Option<JointId>],
    emote_name: &str,
) -> Result<JointConstraintSharedData> {
    let asset_id = r.asset_id;
    let mut c = JointConstraintSharedData::new();

    let chain_length = r.read_u8("chain_length")? as usize;
    if chain_length > resolved.len() || chain_length > MAX_CHAIN_LENGTH {
        return Err(r.fail(format!("Invalid constraint chain length {}", chain_length)));
    }
    c.chain_length = chain_length;

    c.constraint_type = match r.read_u8("constraint_type")? {
        0 => ConstraintType::Point,
        1 => ConstraintType::Plane,
        other => return Err(r.fail(format!("Invalid constraint type {}", other))),
    };

    let source = r.read_volume_name("source_volume")?;
    c.source_volume = skeleton.collision_volume_id(&source).ok_or_else(|| {
        unresolvable(asset_id, format!("Not a valid source constraint volume {}", source))
    })?;
    c.source_offset = r.read_vec3("source_offset")?;

    let target = r.read_volume_name("target_volume")?;
    if target == GROUND_VOLUME {
        c.target_type = ConstraintTargetType::Ground;
    } else {
        c.target_type = ConstraintTargetType::Body;
        c.target_volume = skeleton.collision_volume_id(&target).ok_or_else(|| {
            unresolvable(asset_id, format!("Not a valid target constraint volume {}", target))
        })?;
    }
    c.target_offset = r.read_vec3("target_offset")?;
    c.target_dir = r.read_vec3("target_dir")?;

    c.ease_in_start = r.read_f32("ease_in_start")?;
    c.ease_in_stop = r.read_f32("ease_in_stop")?;
    c.ease_out_start = r.read_f32("ease_out_start")?;
    c.ease_out_stop = r.read_f32("ease_out_stop")?;

    // 从碰撞体所在关节向上走 chain_length + 1 层
    let mut joint = skeleton
        .collision_volume(c.source_volume)
        .ok_or_else(|| unresolvable(asset_id, format!("Missing source constraint volume {}", source)))?;
    for i in 0..=chain_length {
        let parent = skeleton.parent(joint).ok_or_else(|| {
            let name = skeleton.joint(joint).map(|j| j.name.as_str()).unwrap_or("");
            unresolvable(asset_id, format!("Joint with no parent: {} Emote: {}", name, emote_name))
        })?;
        joint = parent;

        let mut index = None;
        for (j, resolved_joint) in resolved.iter().enumerate() {
            match resolved_joint {
                None => {
                    log::warn!("Invalid joint {} for animation {}", j, asset_id);
                    return Err(AnimError::JointUnresolved(format!(
                        "track {} for animation {}",
                        j, asset_id
                    )));
                }
                Some(id) if *id == joint => {
                    index = Some(j);
                    break;
                }
                Some(_) => {}
            }
        }
        let index = index
            .ok_or_else(|| unresolvable(asset_id, format!("No joint index for constraint {}", i)))?;
        c.joint_state_indices.push(index);
    }

    Ok(c)
}

fn unresolvable(asset_id: Uuid, msg: String) -> AnimError {
    log::warn!("{} for animation {}", msg, asset_id);
    AnimError::ConstraintUnresolvable(format!("{} for animation {}", msg, asset_id))
}

// ========== 序列化 ==========

fn write_err(what: &str, e: std::io::Error) -> AnimError {
    AnimError::EncodeFailed(format!("Failed to write {}: {}", what, e))
}

fn write_string<W: Write>(w: &mut W, s: &str, what: &str) -> Result<()> {
    w.write_all(s.as_bytes()).map_err(|e| write_err(what, e))?;
    w.write_u8(0).map_err(|e| write_err(what, e))
}

fn write_vec3<W: Write>(w: &mut W, v: Vec3, what: &str) -> Result<()> {
    for c in v.to_array() {
        w.write_f32::<LittleEndian>(c).map_err(|e| write_err(what, e))?;
    }
    Ok(())
}

fn write_u16_vec3<W: Write>(w: &mut W, v: Vec3, lower: f32, upper: f32, what: &str) -> Result<()> {
    for c in v.to_array() {
        w.write_u16::<LittleEndian>(f32_to_u16(c, lower, upper))
            .map_err(|e| write_err(what, e))?;
    }
    Ok(())
}

/// 定长名称：最多 15 字节 + NUL，其余补零
fn write_volume_name<W: Write>(w: &mut W, name: &str, what: &str) -> Result<()> {
    let mut buf = [0u8; VOLUME_NAME_LENGTH];
    let bytes = name.as_bytes();
    let len = bytes.len().min(VOLUME_NAME_LENGTH - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    w.write_all(&buf).map_err(|e| write_err(what, e))
}

/// 以当前版本（1.0）序列化动画数据
pub fn encode_motion_list(list: &JointMotionList, skeleton: &Skeleton) -> Result<Vec<u8>> {
    let mut w: Vec<u8> = Vec::new();
    let duration = list.duration;

    w.write_u16::<LittleEndian>(KEYFRAME_MOTION_VERSION)
        .map_err(|e| write_err("version", e))?;
    w.write_u16::<LittleEndian>(KEYFRAME_MOTION_SUBVERSION)
        .map_err(|e| write_err("sub_version", e))?;
    w.write_i32::<LittleEndian>(list.base_priority.0)
        .map_err(|e| write_err("base_priority", e))?;
    w.write_f32::<LittleEndian>(duration)
        .map_err(|e| write_err("duration", e))?;
    write_string(&mut w, &list.emote_name, "emote_name")?;
    w.write_f32::<LittleEndian>(list.loop_in_point)
        .map_err(|e| write_err("loop_in_point", e))?;
    w.write_f32::<LittleEndian>(list.loop_out_point)
        .map_err(|e| write_err("loop_out_point", e))?;
    w.write_i32::<LittleEndian>(list.looping as i32)
        .map_err(|e| write_err("loop", e))?;
    w.write_f32::<LittleEndian>(list.ease_in_duration)
        .map_err(|e| write_err("ease_in_duration", e))?;
    w.write_f32::<LittleEndian>(list.ease_out_duration)
        .map_err(|e| write_err("ease_out_duration", e))?;
    w.write_u32::<LittleEndian>(list.hand_pose.as_u32())
        .map_err(|e| write_err("hand_pose", e))?;
    w.write_u32::<LittleEndian>(list.joint_motions.len() as u32)
        .map_err(|e| write_err("num_joints", e))?;

    for motion in &list.joint_motions {
        write_string(&mut w, &motion.joint_name, "joint_name")?;
        w.write_i32::<LittleEndian>(motion.priority.0)
            .map_err(|e| write_err("joint_priority", e))?;

        let rot_keys = motion.rotation_curve.keys();
        w.write_i32::<LittleEndian>(rot_keys.len() as i32)
            .map_err(|e| write_err("num_rot_keys", e))?;
        for key in rot_keys {
            w.write_u16::<LittleEndian>(f32_to_u16(key.time, 0.0, duration))
                .map_err(|e| write_err("time", e))?;
            write_u16_vec3(&mut w, pack_quat(key.value), -1.0, 1.0, "rot_angle")?;
        }

        let pos_keys = motion.position_curve.keys();
        w.write_i32::<LittleEndian>(pos_keys.len() as i32)
            .map_err(|e| write_err("num_pos_keys", e))?;
        for key in pos_keys {
            w.write_u16::<LittleEndian>(f32_to_u16(key.time, 0.0, duration))
                .map_err(|e| write_err("time", e))?;
            write_u16_vec3(&mut w, key.value, -MAX_PELVIS_OFFSET, MAX_PELVIS_OFFSET, "pos")?;
        }

        log::debug!(
            "Encoded joint {}: {} rot keys, {} pos keys",
            motion.joint_name,
            rot_keys.len(),
            pos_keys.len()
        );
    }

    w.write_i32::<LittleEndian>(list.constraints.len() as i32)
        .map_err(|e| write_err("num_constraints", e))?;
    for c in &list.constraints {
        w.write_u8(c.chain_length as u8)
            .map_err(|e| write_err("chain_length", e))?;
        w.write_u8(c.constraint_type as u8)
            .map_err(|e| write_err("constraint_type", e))?;

        let source = skeleton.collision_volume_name(c.source_volume).ok_or_else(|| {
            AnimError::EncodeFailed(format!("Unknown source volume {}", c.source_volume))
        })?;
        write_volume_name(&mut w, source, "source_volume")?;
        write_vec3(&mut w, c.source_offset, "source_offset")?;

        let target = match c.target_type {
            ConstraintTargetType::Ground => GROUND_VOLUME,
            ConstraintTargetType::Body => skeleton.collision_volume_name(c.target_volume).ok_or_else(|| {
                AnimError::EncodeFailed(format!("Unknown target volume {}", c.target_volume))
            })?,
        };
        write_volume_name(&mut w, target, "target_volume")?;
        write_vec3(&mut w, c.target_offset, "target_offset")?;
        write_vec3(&mut w, c.target_dir, "target_dir")?;

        for (value, what) in [
            (c.ease_in_start, "ease_in_start"),
            (c.ease_in_stop, "ease_in_stop"),
            (c.ease_out_start, "ease_out_start"),
            (c.ease_out_stop, "ease_out_stop"),
        ] {
            w.write_f32::<LittleEndian>(value).map_err(|e| write_err(what, e))?;
        }
    }

    Ok(w)
}

/// 序列化后的字节数
pub fn encoded_size(list: &JointMotionList, skeleton: &Skeleton) -> Result<usize> {
    encode_motion_list(list, skeleton).map(|bytes| bytes.len())
}
