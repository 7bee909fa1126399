//! 关键帧动画实例
//!
//! 每个 (角色, 资产) 一个实例。数据来自共享缓存，实例只持有
//! 关节状态、约束运行时状态和播放时间。
//!
//! 加载状态机：
//! ```text
//! Undefined ──缓存命中/本地读取成功──▶ Loaded
//!     │ 本地没有
//!     ▼
//! NeedsFetch ──发起获取──▶ Fetched ──回调成功──▶ Loaded
//!                              └──回调失败──▶ FetchFailed
//! ```

use std::sync::Arc;

use uuid::Uuid;

use super::anim_loader::{decode_motion_list, encode_motion_list, encoded_size, resolve_animated_joint};
use super::asset_fetch::AssetSource;
use super::claim_board::JointClaimBoard;
use super::config::get_config;
use super::constraint::{ConstraintContext, JointConstraint};
use super::data_cache::{KeyframeDataCache, MotionListHandle};
use super::joint_state::{JointState, Pose};
use super::motion_data::{BBoxLocal, HandPose, JointMotionList};
use crate::skeleton::{Character, JointId, JointPriority, Skeleton};
use crate::{AnimError, Result};

/// 约束需要的骨盆关节
const PELVIS_JOINT: &str = "mPelvis";

/// 资产加载状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetStatus {
    Undefined,
    NeedsFetch,
    Fetched,
    Loaded,
    FetchFailed,
}

/// 初始化结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStatus {
    Success,
    /// 数据尚未到达，稍后重试
    Hold,
    Failure,
}

/// 关键帧动画实例
pub struct KeyframeMotion {
    id: Uuid,
    asset_status: AssetStatus,
    motion_list: Option<MotionListHandle>,
    /// 与轨道一一对应，未解析的关节保留占位
    joint_states: Vec<JointState>,
    pose: Pose,
    constraints: Vec<JointConstraint>,
    pelvis: Option<JointId>,
    last_skeleton_serial: Option<u32>,
    last_update_time: f32,
    last_looped_time: f32,
    activation_timestamp: f32,
    stop_timestamp: f32,
    stopped: bool,
    active: bool,
}

impl KeyframeMotion {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            asset_status: AssetStatus::Undefined,
            motion_list: None,
            joint_states: Vec::new(),
            pose: Pose::new(),
            constraints: Vec::new(),
            pelvis: None,
            last_skeleton_serial: None,
            last_update_time: 0.0,
            last_looped_time: 0.0,
            activation_timestamp: 0.0,
            stop_timestamp: 0.0,
            stopped: false,
            active: false,
        }
    }

    fn list(&self) -> Option<Arc<JointMotionList>> {
        self.motion_list.as_ref().map(MotionListHandle::get)
    }

    // ========== 加载 ==========

    /// 推进加载状态机
    pub fn on_initialize(
        &mut self,
        character: &dyn Character,
        cache: &KeyframeDataCache,
        source: &dyn AssetSource,
    ) -> InitStatus {
        match self.asset_status {
            AssetStatus::NeedsFetch => {
                if self.id.is_nil() {
                    log::warn!("Can't fetch animation with a null asset id");
                    self.asset_status = AssetStatus::FetchFailed;
                    return InitStatus::Failure;
                }
                self.asset_status = AssetStatus::Fetched;
                source.request_fetch(self.id, character.id());
                return InitStatus::Hold;
            }
            AssetStatus::Fetched => return InitStatus::Hold,
            AssetStatus::FetchFailed => return InitStatus::Failure,
            AssetStatus::Loaded => return InitStatus::Success,
            AssetStatus::Undefined => {}
        }

        if let Some(handle) = cache.get(&self.id) {
            self.bind(handle, character.skeleton());
            if !self.setup_pose(character.skeleton()) {
                self.asset_status = AssetStatus::FetchFailed;
                return InitStatus::Failure;
            }
            self.asset_status = AssetStatus::Loaded;
            return InitStatus::Success;
        }

        match source.read_local(self.id) {
            Ok(None) => {
                self.asset_status = AssetStatus::NeedsFetch;
                InitStatus::Hold
            }
            Ok(Some(bytes)) => match self.deserialize(&bytes, character.skeleton(), cache) {
                Ok(()) => InitStatus::Success,
                Err(e) => {
                    log::warn!("Failed to decode local animation {}: {}", self.id, e);
                    self.asset_status = AssetStatus::FetchFailed;
                    InitStatus::Failure
                }
            },
            Err(e) => {
                log::warn!("Failed to read local animation {}: {}", self.id, e);
                self.asset_status = AssetStatus::FetchFailed;
                InitStatus::Failure
            }
        }
    }

    /// 解码资产并发布到缓存
    ///
    /// 同一资产已有缓存条目时原地替换，其他实例随之看到新数据。
    pub fn deserialize(&mut self, bytes: &[u8], skeleton: &Skeleton, cache: &KeyframeDataCache) -> Result<()> {
        let mut list = decode_motion_list(bytes, self.id, skeleton)?;
        list.apply_loop_points();
        let handle = cache.insert_or_replace(self.id, list);
        self.bind(handle, skeleton);
        if !self.setup_pose(skeleton) {
            self.asset_status = AssetStatus::FetchFailed;
            return Err(AnimError::ConstraintUnresolvable(format!(
                "animation {} has constraints but the skeleton has no pelvis",
                self.id
            )));
        }
        self.asset_status = AssetStatus::Loaded;
        Ok(())
    }

    /// 异步获取完成
    pub fn on_load_complete(&mut self, result: Result<Vec<u8>>, skeleton: &Skeleton, cache: &KeyframeDataCache) {
        if self.asset_status == AssetStatus::Loaded {
            return;
        }
        match result {
            Ok(bytes) => match self.deserialize(&bytes, skeleton, cache) {
                Ok(()) => log::debug!("Loaded animation {}", self.id),
                Err(e) => {
                    log::warn!("Failed to decode fetched animation {}: {}", self.id, e);
                    self.asset_status = AssetStatus::FetchFailed;
                }
            },
            Err(e) => {
                log::warn!("Failed to fetch animation {}: {}", self.id, e);
                self.asset_status = AssetStatus::FetchFailed;
            }
        }
    }

    /// 为每条轨道建立关节状态
    fn bind(&mut self, handle: MotionListHandle, skeleton: &Skeleton) {
        let list = handle.get();
        self.joint_states = list
            .joint_motions
            .iter()
            .map(|motion| {
                let joint = resolve_animated_joint(skeleton, &motion.joint_name);
                if joint.is_none() {
                    log::debug!("Joint {} not found, track kept as placeholder", motion.joint_name);
                }
                let mut state = JointState::new(joint);
                state.usage = motion.usage;
                state.priority = motion.priority;
                state
            })
            .collect();
        self.motion_list = Some(handle);
    }

    /// 建立姿势和约束运行时状态
    ///
    /// 有约束但骨架缺少骨盆时返回 false。
    pub fn setup_pose(&mut self, skeleton: &Skeleton) -> bool {
        let Some(handle) = self.motion_list.clone() else {
            return false;
        };
        let list = handle.get();

        self.pose.clear();
        for (index, state) in self.joint_states.iter().enumerate() {
            if state.is_resolved() {
                self.pose.add_joint_state(index);
            }
        }

        let states = &self.joint_states;
        let constraints = list
            .constraints
            .iter()
            .map(|shared| {
                let mut constraint = JointConstraint::new(shared);
                constraint.initialize(shared, skeleton, states);
                constraint
            })
            .collect();
        self.constraints = constraints;
        self.last_skeleton_serial = Some(skeleton.serial_num());

        if !list.loop_points_cached() {
            handle.update(JointMotionList::apply_loop_points);
        }

        self.pelvis = skeleton.find_joint(PELVIS_JOINT);
        if !list.constraints.is_empty() && self.pelvis.is_none() {
            log::warn!("Animation {} has constraints but the skeleton has no pelvis", self.id);
            return false;
        }
        true
    }

    // ========== 播放 ==========

    pub fn on_activate(&mut self, character: &mut dyn Character) -> bool {
        if let Some(list) = self.list() {
            // 表情指向自身时不触发
            if !list.emote_name.is_empty() && list.emote_name != self.id.to_string() {
                character.start_emote(&list.emote_name);
            }
        }
        self.last_looped_time = 0.0;
        true
    }

    /// 在全局时间 `time` 开始播放
    pub fn activate(&mut self, time: f32, character: &mut dyn Character) -> bool {
        self.activation_timestamp = time;
        self.stop_timestamp = 0.0;
        self.stopped = false;
        self.active = true;
        self.last_update_time = 0.0;
        self.on_activate(character)
    }

    /// 更新一帧
    ///
    /// `time` 为相对激活时刻的时间。返回 false 表示动画已播放完毕。
    pub fn on_update(&mut self, time: f32, character: &mut dyn Character, claims: &JointClaimBoard) -> bool {
        let Some(list) = self.list() else {
            return false;
        };
        let time = time.max(0.0);
        let duration = list.duration;

        let looped = if list.looping {
            if duration == 0.0 {
                0.0
            } else if self.stopped {
                // 停止后不再回绕，播放到结尾
                (self.last_looped_time + (time - self.last_update_time)).min(duration)
            } else if time > list.loop_out_point {
                let loop_len = list.loop_out_point - list.loop_in_point;
                if loop_len == 0.0 {
                    list.loop_out_point
                } else {
                    list.loop_in_point + (time - list.loop_out_point) % loop_len
                }
            } else {
                time
            }
        } else {
            time
        };
        self.last_looped_time = looped;

        self.apply_keyframes(looped, character, &list);

        let frame_delta = (time - self.last_update_time).abs();
        self.apply_constraints(looped, frame_delta, character, claims, &list);

        self.last_update_time = time;
        looped <= duration
    }

    fn apply_keyframes(&mut self, time: f32, character: &mut dyn Character, list: &JointMotionList) {
        for (motion, state) in list.joint_motions.iter().zip(self.joint_states.iter_mut()) {
            motion.update(state, time, list.duration, list.looping);
        }

        // 同一帧内只有不低于已写入优先级的动画能覆盖手势
        let can_write = character
            .hand_pose_priority()
            .map_or(true, |priority| list.max_priority >= priority);
        if can_write {
            character.set_hand_pose(list.hand_pose, list.max_priority);
        }
    }

    fn apply_constraints(
        &mut self,
        time: f32,
        frame_delta: f32,
        character: &mut dyn Character,
        claims: &JointClaimBoard,
        list: &JointMotionList,
    ) {
        if self.constraints.is_empty() {
            return;
        }
        let Some(pelvis) = self.pelvis else {
            return;
        };

        // 骨架重建后重新测量骨长
        let serial = character.skeleton().serial_num();
        if self.last_skeleton_serial != Some(serial) {
            for (constraint, shared) in self.constraints.iter_mut().zip(&list.constraints) {
                constraint.initialize(shared, character.skeleton(), &self.joint_states);
            }
            self.last_skeleton_serial = Some(serial);
        }

        let config = get_config();
        let mut ctx = ConstraintContext {
            character,
            joint_states: &mut self.joint_states,
            pelvis,
            priority: list.base_priority,
            claims,
            last_update_time: self.last_update_time,
            frame_delta,
            config: &config,
        };
        for (constraint, shared) in self.constraints.iter_mut().zip(&list.constraints) {
            constraint.apply(shared, time, &mut ctx);
        }
    }

    pub fn on_deactivate(&mut self, character: &mut dyn Character) {
        if let Some(list) = self.list() {
            for (constraint, shared) in self.constraints.iter_mut().zip(&list.constraints) {
                constraint.deactivate(shared, character.skeleton_mut());
            }
        }
        self.active = false;
    }

    /// 请求在 `time` 停止
    ///
    /// 循环动画延后到当前循环结束后播完尾段再停。
    pub fn set_stop_time(&mut self, time: f32) {
        self.stop_timestamp = time;
        self.stopped = true;

        let Some(list) = self.list() else {
            return;
        };
        if list.looping && list.loop_out_point != list.duration {
            let start_loop_time = self.activation_timestamp + list.loop_in_point;
            let loop_len = list.loop_out_point - list.loop_in_point;
            let loop_fraction_time = if loop_len == 0.0 {
                0.0
            } else {
                (time - start_loop_time) % loop_len
            };
            self.stop_timestamp = time.max(
                time - loop_fraction_time + (list.duration - list.loop_in_point) - list.ease_out_duration,
            );
        }
    }

    /// 在占用表中登记本动画驱动的关节
    pub fn claim_joints(&self, skeleton: &Skeleton, claims: &mut JointClaimBoard) {
        let Some(list) = self.list() else {
            return;
        };
        for &index in self.pose.indices() {
            let Some(state) = self.joint_states.get(index) else {
                continue;
            };
            let Some(num) = state.joint.and_then(|j| skeleton.joint_num(j)) else {
                continue;
            };
            if state.usage.is_empty() {
                continue;
            }
            let priority = if state.priority == JointPriority::USE_MOTION {
                list.base_priority
            } else {
                state.priority
            };
            claims.claim(num, priority);
        }
    }

    // ========== 序列化 ==========

    pub fn serialize(&self, skeleton: &Skeleton) -> Result<Vec<u8>> {
        let list = self
            .list()
            .ok_or_else(|| AnimError::EncodeFailed(format!("animation {} not loaded", self.id)))?;
        encode_motion_list(&list, skeleton)
    }

    pub fn file_size(&self, skeleton: &Skeleton) -> Result<usize> {
        let list = self
            .list()
            .ok_or_else(|| AnimError::EncodeFailed(format!("animation {} not loaded", self.id)))?;
        encoded_size(&list, skeleton)
    }

    // ========== 属性修改（写时复制，所有共享实例可见） ==========

    fn edit<F: FnOnce(&mut JointMotionList)>(&self, f: F) {
        if let Some(handle) = &self.motion_list {
            handle.update(f);
        }
    }

    /// 整体平移所有关节优先级
    pub fn set_priority(&mut self, priority: JointPriority) {
        let Some(list) = self.list() else {
            return;
        };
        let delta = priority.value() - list.base_priority.value();
        self.edit(|list| {
            list.base_priority = priority;
            list.max_priority = priority;
            for motion in &mut list.joint_motions {
                let shifted = (motion.priority.value() + delta)
                    .clamp(JointPriority::LOW.value(), JointPriority::HIGHEST.value());
                motion.priority = JointPriority(shifted);
            }
        });
        if let Some(list) = self.list() {
            for (motion, state) in list.joint_motions.iter().zip(self.joint_states.iter_mut()) {
                state.priority = motion.priority;
            }
        }
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.edit(|list| list.looping = looping);
    }

    pub fn set_loop_in(&mut self, in_point: f32) {
        self.edit(|list| {
            list.loop_in_point = in_point;
            list.apply_loop_points();
        });
    }

    pub fn set_loop_out(&mut self, out_point: f32) {
        self.edit(|list| {
            list.loop_out_point = out_point;
            list.apply_loop_points();
        });
    }

    pub fn set_ease_in(&mut self, ease_in: f32) {
        self.edit(|list| list.ease_in_duration = ease_in.max(0.0));
    }

    pub fn set_ease_out(&mut self, ease_out: f32) {
        self.edit(|list| list.ease_out_duration = ease_out.max(0.0));
    }

    /// 空字符串清除表情
    pub fn set_emote(&mut self, emote: &str) {
        self.edit(|list| list.emote_name = emote.to_string());
    }

    pub fn set_hand_pose(&mut self, pose: HandPose) {
        self.edit(|list| list.hand_pose = pose);
    }

    // ========== 查询 ==========

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn asset_status(&self) -> AssetStatus {
        self.asset_status
    }

    pub fn is_loaded(&self) -> bool {
        self.asset_status == AssetStatus::Loaded
    }

    pub fn motion_list(&self) -> Option<&MotionListHandle> {
        self.motion_list.as_ref()
    }

    pub fn joint_states(&self) -> &[JointState] {
        &self.joint_states
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn constraints(&self) -> &[JointConstraint] {
        &self.constraints
    }

    pub fn last_looped_time(&self) -> f32 {
        self.last_looped_time
    }

    pub fn activation_timestamp(&self) -> f32 {
        self.activation_timestamp
    }

    pub fn stop_timestamp(&self) -> f32 {
        self.stop_timestamp
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn duration(&self) -> f32 {
        self.list().map_or(0.0, |l| l.duration)
    }

    pub fn is_looping(&self) -> bool {
        self.list().map_or(false, |l| l.looping)
    }

    pub fn loop_in_point(&self) -> f32 {
        self.list().map_or(0.0, |l| l.loop_in_point)
    }

    pub fn loop_out_point(&self) -> f32 {
        self.list().map_or(0.0, |l| l.loop_out_point)
    }

    pub fn ease_in_duration(&self) -> f32 {
        self.list().map_or(0.0, |l| l.ease_in_duration)
    }

    pub fn ease_out_duration(&self) -> f32 {
        self.list().map_or(0.0, |l| l.ease_out_duration)
    }

    pub fn priority(&self) -> JointPriority {
        self.list().map_or(JointPriority::LOW, |l| l.base_priority)
    }

    pub fn max_priority(&self) -> JointPriority {
        self.list().map_or(JointPriority::LOW, |l| l.max_priority)
    }

    pub fn hand_pose(&self) -> HandPose {
        self.list().map_or(HandPose::Spread, |l| l.hand_pose)
    }

    pub fn emote_name(&self) -> String {
        self.list().map(|l| l.emote_name.clone()).unwrap_or_default()
    }

    pub fn pelvis_bbox(&self) -> BBoxLocal {
        self.list().map(|l| l.pelvis_bbox).unwrap_or_default()
    }

    pub fn num_joint_motions(&self) -> usize {
        self.list().map_or(0, |l| l.num_joint_motions())
    }
}

impl std::fmt::Debug for KeyframeMotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyframeMotion")
            .field("id", &self.id)
            .field("asset_status", &self.asset_status)
            .field("active", &self.active)
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::anim_loader::tests::leg_motion_list;
    use crate::animation::asset_fetch::MemoryAssetStore;
    use crate::animation::curve::Key;
    use crate::animation::joint_state::JointUsage;
    use crate::animation::motion_data::{ConstraintTargetType, JointConstraintSharedData, JointMotion};
    use crate::skeleton::BasicCharacter;
    use glam::{Quat, Vec3};

    fn setup() -> (BasicCharacter, KeyframeDataCache, MemoryAssetStore) {
        let character = BasicCharacter::new(Uuid::new_v4(), Skeleton::default_avatar());
        (character, KeyframeDataCache::new(), MemoryAssetStore::new())
    }

    fn looping_list(duration: f32, loop_in: f32, loop_out: f32) -> JointMotionList {
        let mut list = JointMotionList::new();
        list.duration = duration;
        list.looping = true;
        list.loop_in_point = loop_in;
        list.loop_out_point = loop_out;
        list.ease_out_duration = 1.0;
        let mut chest = JointMotion::new("mChest");
        chest.usage = JointUsage::ROT;
        chest.rotation_curve.push(Key::new(0.0, Quat::IDENTITY));
        chest.rotation_curve.push(Key::new(duration, Quat::from_rotation_z(1.0)));
        list.joint_motions.push(chest);
        list
    }

    /// 通过缓存命中加载，返回的句柄需保持存活
    fn loaded(
        list: JointMotionList,
        character: &BasicCharacter,
        cache: &KeyframeDataCache,
        store: &MemoryAssetStore,
    ) -> (KeyframeMotion, MotionListHandle) {
        let id = Uuid::new_v4();
        let handle = cache.insert_or_replace(id, list);
        let mut motion = KeyframeMotion::new(id);
        assert_eq!(motion.on_initialize(character, cache, store), InitStatus::Success);
        (motion, handle)
    }

    #[test]
    fn test_loop_wraps_after_loop_out() {
        let (mut character, cache, store) = setup();
        let (mut motion, _handle) = loaded(looping_list(20.0, 3.0, 16.0), &character, &cache, &store);
        let claims = JointClaimBoard::new();
        motion.activate(0.0, &mut character);

        assert!(motion.on_update(10.0, &mut character, &claims));
        assert!((motion.last_looped_time() - 10.0).abs() < 1e-4);
        assert!(motion.on_update(18.0, &mut character, &claims));
        assert!((motion.last_looped_time() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_duration_and_negative_time() {
        let (mut character, cache, store) = setup();
        let mut list = looping_list(1.0, 0.0, 1.0);
        list.duration = 0.0;
        list.loop_out_point = 0.0;
        let (mut motion, _handle) = loaded(list, &character, &cache, &store);
        let claims = JointClaimBoard::new();
        motion.activate(0.0, &mut character);
        assert!(motion.on_update(5.0, &mut character, &claims));
        assert_eq!(motion.last_looped_time(), 0.0);

        let (mut motion, _h2) = loaded(looping_list(2.0, 0.0, 2.0), &character, &cache, &store);
        motion.activate(0.0, &mut character);
        motion.on_update(-1.0, &mut character, &claims);
        assert_eq!(motion.last_looped_time(), 0.0);
    }

    #[test]
    fn test_non_looping_finishes_after_duration() {
        let (mut character, cache, store) = setup();
        let mut list = looping_list(2.0, 0.0, 2.0);
        list.looping = false;
        let (mut motion, _handle) = loaded(list, &character, &cache, &store);
        let claims = JointClaimBoard::new();
        motion.activate(0.0, &mut character);
        assert!(motion.on_update(2.0, &mut character, &claims));
        assert!(!motion.on_update(2.5, &mut character, &claims));
    }

    #[test]
    fn test_stop_time_finishes_current_loop() {
        let (mut character, cache, store) = setup();
        let (mut motion, _handle) = loaded(looping_list(20.0, 3.0, 16.0), &character, &cache, &store);
        motion.activate(0.0, &mut character);
        motion.set_stop_time(18.0);
        assert!(motion.is_stopped());
        // (18 - 2) + (20 - 3) - 1
        assert!((motion.stop_timestamp() - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_stop_time_without_loop_tail() {
        let (mut character, cache, store) = setup();
        let (mut motion, _handle) = loaded(looping_list(20.0, 3.0, 20.0), &character, &cache, &store);
        motion.activate(0.0, &mut character);
        motion.set_stop_time(7.5);
        assert_eq!(motion.stop_timestamp(), 7.5);
    }

    #[test]
    fn test_stopped_loop_plays_to_end() {
        let (mut character, cache, store) = setup();
        let (mut motion, _handle) = loaded(looping_list(20.0, 3.0, 16.0), &character, &cache, &store);
        let claims = JointClaimBoard::new();
        motion.activate(0.0, &mut character);
        motion.on_update(18.0, &mut character, &claims);
        motion.set_stop_time(18.0);

        motion.on_update(19.0, &mut character, &claims);
        assert!((motion.last_looped_time() - 6.0).abs() < 1e-4);
        assert!(motion.on_update(40.0, &mut character, &claims));
        assert_eq!(motion.last_looped_time(), 20.0);
    }

    #[test]
    fn test_hand_pose_contest() {
        let (mut character, cache, store) = setup();
        let mut high = looping_list(2.0, 0.0, 2.0);
        high.max_priority = JointPriority::HIGH;
        high.hand_pose = HandPose::Fist;
        let mut low = looping_list(2.0, 0.0, 2.0);
        low.max_priority = JointPriority::LOW;
        low.hand_pose = HandPose::Point;
        let (mut a, _ha) = loaded(high, &character, &cache, &store);
        let (mut b, _hb) = loaded(low, &character, &cache, &store);
        let claims = JointClaimBoard::new();
        a.activate(0.0, &mut character);
        b.activate(0.0, &mut character);

        character.begin_frame();
        a.on_update(0.5, &mut character, &claims);
        b.on_update(0.5, &mut character, &claims);
        assert_eq!(character.hand_pose, Some((HandPose::Fist, JointPriority::HIGH)));

        character.begin_frame();
        b.on_update(0.6, &mut character, &claims);
        a.on_update(0.6, &mut character, &claims);
        assert_eq!(character.hand_pose, Some((HandPose::Fist, JointPriority::HIGH)));
    }

    #[test]
    fn test_fetch_state_machine() {
        let (character, cache, store) = setup();
        let id = Uuid::new_v4();
        let bytes = encode_motion_list(&leg_motion_list(&character.skeleton), &character.skeleton).unwrap();
        store.insert_remote(id, bytes);

        let mut motion = KeyframeMotion::new(id);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Hold);
        assert_eq!(motion.asset_status(), AssetStatus::NeedsFetch);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Hold);
        assert_eq!(motion.asset_status(), AssetStatus::Fetched);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Hold);

        let mut replies = store.poll_replies();
        assert_eq!(replies.len(), 1);
        let reply = replies.remove(0);
        assert_eq!(reply.character_id, character.id);
        motion.on_load_complete(reply.result, &character.skeleton, &cache);
        assert!(motion.is_loaded());
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Success);
        assert!(cache.contains(&id));
        assert_eq!(motion.joint_states().len(), 4);
        assert_eq!(motion.pose().len(), 4);
    }

    #[test]
    fn test_fetch_failure() {
        let (character, cache, store) = setup();
        let mut motion = KeyframeMotion::new(Uuid::new_v4());
        motion.on_initialize(&character, &cache, &store);
        motion.on_initialize(&character, &cache, &store);
        let reply = store.poll_replies().remove(0);
        motion.on_load_complete(reply.result, &character.skeleton, &cache);
        assert_eq!(motion.asset_status(), AssetStatus::FetchFailed);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Failure);
    }

    #[test]
    fn test_null_id_fails() {
        let (character, cache, store) = setup();
        let mut motion = KeyframeMotion::new(Uuid::nil());
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Hold);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Failure);
        assert!(store.poll_replies().is_empty());
    }

    #[test]
    fn test_corrupt_local_data_fails() {
        let (character, cache, store) = setup();
        let id = Uuid::new_v4();
        store.insert_local(id, vec![1, 0, 0]);
        let mut motion = KeyframeMotion::new(id);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Failure);
        assert_eq!(motion.asset_status(), AssetStatus::FetchFailed);
        assert!(!cache.contains(&id));
    }

    #[test]
    fn test_local_data_loads_immediately() {
        let (character, cache, store) = setup();
        let id = Uuid::new_v4();
        let bytes = encode_motion_list(&leg_motion_list(&character.skeleton), &character.skeleton).unwrap();
        store.insert_local(id, bytes.clone());
        let mut motion = KeyframeMotion::new(id);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Success);
        assert_eq!(motion.serialize(&character.skeleton).unwrap().len(), bytes.len());
        assert_eq!(motion.file_size(&character.skeleton).unwrap(), bytes.len());
    }

    /// 没有骨盆的单腿骨架，以及带一条地面约束的动画
    fn leg_without_pelvis() -> (BasicCharacter, JointMotionList) {
        let mut skeleton = Skeleton::new();
        let base = skeleton.add_joint("mBase", None, Vec3::new(0.0, 0.0, 1.0));
        let hip = skeleton.add_joint("mHipLeft", Some(base), Vec3::new(0.0, 0.1, -0.05));
        let knee = skeleton.add_joint("mKneeLeft", Some(hip), Vec3::new(0.0, 0.0, -0.45));
        let ankle = skeleton.add_joint("mAnkleLeft", Some(knee), Vec3::new(0.0, 0.0, -0.45));
        let foot = skeleton.add_collision_volume("L_FOOT", ankle, Vec3::new(0.077, 0.0, -0.041), Vec3::ONE);

        let mut list = JointMotionList::new();
        list.duration = 2.0;
        list.loop_out_point = 2.0;
        for name in ["mHipLeft", "mKneeLeft", "mAnkleLeft"] {
            let mut m = JointMotion::new(name);
            m.usage = JointUsage::ROT;
            m.rotation_curve.push(Key::new(0.0, Quat::IDENTITY));
            m.rotation_curve.push(Key::new(1.0, Quat::from_rotation_y(0.3)));
            list.joint_motions.push(m);
        }
        let mut c = JointConstraintSharedData::new();
        c.chain_length = 1;
        c.source_volume = foot;
        c.target_type = ConstraintTargetType::Ground;
        c.joint_state_indices = vec![2, 1];
        list.constraints.push(c);

        (BasicCharacter::new(Uuid::new_v4(), skeleton), list)
    }

    #[test]
    fn test_constraints_without_pelvis_fail_local_load() {
        let (character, list) = leg_without_pelvis();
        let (cache, store) = (KeyframeDataCache::new(), MemoryAssetStore::new());
        let id = Uuid::new_v4();
        store.insert_local(id, encode_motion_list(&list, &character.skeleton).unwrap());

        let mut motion = KeyframeMotion::new(id);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Failure);
        assert_eq!(motion.asset_status(), AssetStatus::FetchFailed);
        assert!(!motion.is_loaded());
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Failure);
    }

    #[test]
    fn test_constraints_without_pelvis_fail_cache_hit() {
        let (character, list) = leg_without_pelvis();
        let (cache, store) = (KeyframeDataCache::new(), MemoryAssetStore::new());
        let id = Uuid::new_v4();
        let _handle = cache.insert_or_replace(id, list);

        let mut motion = KeyframeMotion::new(id);
        assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Failure);
        assert_eq!(motion.asset_status(), AssetStatus::FetchFailed);
    }

    #[test]
    fn test_constraints_without_pelvis_fail_deserialize() {
        let (character, list) = leg_without_pelvis();
        let cache = KeyframeDataCache::new();
        let bytes = encode_motion_list(&list, &character.skeleton).unwrap();

        let mut motion = KeyframeMotion::new(Uuid::new_v4());
        let result = motion.deserialize(&bytes, &character.skeleton, &cache);
        assert!(matches!(result, Err(AnimError::ConstraintUnresolvable(_))));
        assert_eq!(motion.asset_status(), AssetStatus::FetchFailed);
    }

    #[test]
    fn test_duplicate_fetch_replies_share_one_entry() {
        let (character, cache, store) = setup();
        let id = Uuid::new_v4();
        let bytes = encode_motion_list(&leg_motion_list(&character.skeleton), &character.skeleton).unwrap();
        store.insert_remote(id, bytes);

        // 两个实例同时等待同一资产，各自收到一次回调
        let mut a = KeyframeMotion::new(id);
        let mut b = KeyframeMotion::new(id);
        for motion in [&mut a, &mut b] {
            assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Hold);
            assert_eq!(motion.on_initialize(&character, &cache, &store), InitStatus::Hold);
            assert_eq!(motion.asset_status(), AssetStatus::Fetched);
        }
        let mut replies = store.poll_replies();
        assert_eq!(replies.len(), 2);

        a.on_load_complete(replies.remove(0).result, &character.skeleton, &cache);
        let first = a.motion_list().unwrap().get();
        b.on_load_complete(replies.remove(0).result, &character.skeleton, &cache);

        assert!(a.is_loaded() && b.is_loaded());
        assert_eq!(cache.len(), 1);
        assert_eq!(a.motion_list().unwrap().ref_count(), 2);
        let second = b.motion_list().unwrap().get();
        assert!(Arc::ptr_eq(&a.motion_list().unwrap().get(), &second));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_instances_share_cached_data() {
        let (character, cache, store) = setup();
        let (mut a, handle) = loaded(looping_list(2.0, 0.0, 2.0), &character, &cache, &store);
        let mut b = KeyframeMotion::new(a.id());
        assert_eq!(b.on_initialize(&character, &cache, &store), InitStatus::Success);
        assert_eq!(handle.ref_count(), 3);

        a.set_loop(false);
        assert!(!b.is_looping());
        b.set_ease_out(-1.0);
        assert_eq!(a.ease_out_duration(), 0.0);

        drop(a);
        drop(b);
        assert_eq!(handle.ref_count(), 1);
    }

    #[test]
    fn test_unresolved_joint_is_placeholder() {
        let (character, cache, store) = setup();
        let mut list = looping_list(2.0, 0.0, 2.0);
        list.joint_motions.push(JointMotion::new("mTailNotPresent"));
        let (motion, _handle) = loaded(list, &character, &cache, &store);
        assert_eq!(motion.joint_states().len(), 2);
        assert!(!motion.joint_states()[1].is_resolved());
        assert_eq!(motion.pose().len(), 1);
    }

    #[test]
    fn test_set_priority_shifts_joints() {
        let (character, cache, store) = setup();
        let list = leg_motion_list(&character.skeleton);
        let (mut motion, _handle) = loaded(list, &character, &cache, &store);
        motion.set_priority(JointPriority::HIGHEST);
        assert_eq!(motion.priority(), JointPriority::HIGHEST);
        assert_eq!(motion.max_priority(), JointPriority::HIGHEST);
        // HIGH + 3 钳制到 HIGHEST；USE_MOTION + 3 = HIGH
        assert_eq!(motion.joint_states()[0].priority, JointPriority::HIGHEST);
        assert_eq!(motion.joint_states()[1].priority, JointPriority::HIGH);
    }

    #[test]
    fn test_loop_points_are_cached_on_setup() {
        let (character, cache, store) = setup();
        let (mut motion, handle) = loaded(looping_list(20.0, 3.0, 16.0), &character, &cache, &store);
        assert!(handle.get().loop_points_cached());
        motion.set_loop_in(4.0);
        assert_eq!(motion.loop_in_point(), 4.0);
        assert!(handle.get().loop_points_cached());
    }

    #[test]
    fn test_emote_started_on_activate() {
        let (mut character, cache, store) = setup();
        let mut list = looping_list(2.0, 0.0, 2.0);
        list.emote_name = "express_smile".to_string();
        let (mut motion, _handle) = loaded(list, &character, &cache, &store);
        motion.activate(1.0, &mut character);
        assert_eq!(character.emotes, vec!["express_smile".to_string()]);
        assert_eq!(motion.activation_timestamp(), 1.0);
    }

    #[test]
    fn test_constraints_run_and_deactivate() {
        let (mut character, cache, store) = setup();
        let list = leg_motion_list(&character.skeleton);
        let (mut motion, _handle) = loaded(list, &character, &cache, &store);
        let claims = JointClaimBoard::new();
        motion.activate(0.0, &mut character);

        assert!(motion.on_update(0.6, &mut character, &claims));
        assert!(motion.constraints()[0].active);
        assert!(motion.joint_states().iter().all(|s| s.rotation.is_finite()));

        let volume = character.skeleton.collision_volume(
            character.skeleton.collision_volume_id("L_FOOT").unwrap(),
        ).unwrap();
        assert!(character.skeleton.joint(volume).unwrap().update_xform);
        motion.on_deactivate(&mut character);
        assert!(!motion.is_active());
        assert!(!character.skeleton.joint(volume).unwrap().update_xform);
    }

    #[test]
    fn test_claim_joints_uses_base_priority() {
        let (character, cache, store) = setup();
        let list = leg_motion_list(&character.skeleton);
        let (motion, _handle) = loaded(list, &character, &cache, &store);
        let mut claims = JointClaimBoard::new();
        motion.claim_joints(&character.skeleton, &mut claims);

        let skeleton = &character.skeleton;
        let num = |name: &str| skeleton.joint_num(skeleton.find_joint(name).unwrap()).unwrap();
        assert_eq!(claims.claimed_priority(num("mPelvis")), Some(JointPriority::HIGH));
        assert_eq!(claims.claimed_priority(num("mKneeLeft")), Some(JointPriority::MEDIUM));
        assert!(claims.claimed_priority(num("mChest")).is_none());
    }
}
