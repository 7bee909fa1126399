//! 动画控制器
//!
//! 每个角色一个控制器，管理该角色上的动画实例：
//! - 启动时推进加载状态机，数据未到达的实例进入等待队列
//! - 每帧按优先级从高到低更新，并在占用表中登记驱动的关节
//! - 到达停止时刻或播放完毕的实例被停用

use std::cmp::Reverse;
use std::collections::HashMap;

use uuid::Uuid;

use super::asset_fetch::{AssetSource, FetchReply};
use super::claim_board::JointClaimBoard;
use super::data_cache::KeyframeDataCache;
use super::keyframe_motion::{InitStatus, KeyframeMotion};
use crate::skeleton::{Character, JointPriority};

pub struct MotionController<C: Character> {
    character: C,
    cache: KeyframeDataCache,
    motions: HashMap<Uuid, KeyframeMotion>,
    /// 正在播放的动画
    active: Vec<Uuid>,
    /// 等待数据的动画
    pending: Vec<Uuid>,
    claims: JointClaimBoard,
}

impl<C: Character> MotionController<C> {
    pub fn new(character: C, cache: KeyframeDataCache) -> Self {
        Self {
            character,
            cache,
            motions: HashMap::new(),
            active: Vec::new(),
            pending: Vec::new(),
            claims: JointClaimBoard::new(),
        }
    }

    /// 使用进程级缓存
    pub fn with_global_cache(character: C) -> Self {
        Self::new(character, KeyframeDataCache::global().clone())
    }

    pub fn character(&self) -> &C {
        &self.character
    }

    pub fn character_mut(&mut self) -> &mut C {
        &mut self.character
    }

    pub fn cache(&self) -> &KeyframeDataCache {
        &self.cache
    }

    pub fn claims(&self) -> &JointClaimBoard {
        &self.claims
    }

    pub fn find_motion(&self, id: &Uuid) -> Option<&KeyframeMotion> {
        self.motions.get(id)
    }

    pub fn find_motion_mut(&mut self, id: &Uuid) -> Option<&mut KeyframeMotion> {
        self.motions.get_mut(id)
    }

    pub fn is_motion_active(&self, id: &Uuid) -> bool {
        self.active.contains(id)
    }

    pub fn is_motion_pending(&self, id: &Uuid) -> bool {
        self.pending.contains(id)
    }

    pub fn active_motions(&self) -> &[Uuid] {
        &self.active
    }

    /// 启动动画
    ///
    /// 数据未就绪时进入等待队列并返回 true；加载失败返回 false。
    pub fn start_motion(&mut self, id: Uuid, time: f32, source: &dyn AssetSource) -> bool {
        let motion = self
            .motions
            .entry(id)
            .or_insert_with(|| KeyframeMotion::new(id));

        if self.active.contains(&id) {
            if !motion.is_stopped() {
                return true;
            }
            // 正在停止的动画重新开始
            motion.on_deactivate(&mut self.character);
            self.active.retain(|a| *a != id);
        }

        match motion.on_initialize(&self.character, &self.cache, source) {
            InitStatus::Success => {
                motion.activate(time, &mut self.character);
                self.active.push(id);
                true
            }
            InitStatus::Hold => {
                if !self.pending.contains(&id) {
                    self.pending.push(id);
                }
                true
            }
            InitStatus::Failure => {
                log::warn!("Failed to initialize animation {}", id);
                self.motions.remove(&id);
                false
            }
        }
    }

    /// 请求在 `time` 停止；循环动画会先播完当前循环
    pub fn stop_motion(&mut self, id: &Uuid, time: f32) -> bool {
        self.pending.retain(|p| p != id);
        if !self.active.contains(id) {
            return false;
        }
        match self.motions.get_mut(id) {
            Some(motion) => {
                motion.set_stop_time(time);
                true
            }
            None => false,
        }
    }

    /// 立即停用
    pub fn stop_motion_immediately(&mut self, id: &Uuid) -> bool {
        self.pending.retain(|p| p != id);
        if !self.active.contains(id) {
            return false;
        }
        self.deactivate_motion(id);
        true
    }

    /// 停用并释放实例（同时释放对缓存数据的引用）
    pub fn remove_motion(&mut self, id: &Uuid) {
        self.stop_motion_immediately(id);
        self.motions.remove(id);
    }

    fn deactivate_motion(&mut self, id: &Uuid) {
        if let Some(motion) = self.motions.get_mut(id) {
            motion.on_deactivate(&mut self.character);
        }
        self.active.retain(|a| a != id);
    }

    /// 更新一帧
    pub fn update(&mut self, time: f32, source: &dyn AssetSource) {
        self.character.begin_frame();
        self.update_pending(time, source);

        self.claims.reset();

        // 高优先级先更新，低优先级的约束看到已占用的关节
        let mut order = self.active.clone();
        order.sort_by_key(|id| {
            Reverse(
                self.motions
                    .get(id)
                    .map_or(JointPriority::LOW, KeyframeMotion::priority),
            )
        });

        let mut finished = Vec::new();
        for id in order {
            let Some(motion) = self.motions.get_mut(&id) else {
                finished.push(id);
                continue;
            };
            if motion.is_stopped() && time >= motion.stop_timestamp() {
                finished.push(id);
                continue;
            }

            let playing = motion.on_update(
                time - motion.activation_timestamp(),
                &mut self.character,
                &self.claims,
            );
            motion.claim_joints(self.character.skeleton(), &mut self.claims);
            if !playing {
                finished.push(id);
            }
        }

        for id in finished {
            log::debug!("Animation {} finished", id);
            self.deactivate_motion(&id);
        }
    }

    /// 重试等待中的动画
    fn update_pending(&mut self, time: f32, source: &dyn AssetSource) {
        let pending = std::mem::take(&mut self.pending);
        for id in pending {
            let Some(motion) = self.motions.get_mut(&id) else {
                continue;
            };
            match motion.on_initialize(&self.character, &self.cache, source) {
                InitStatus::Success => {
                    motion.activate(time, &mut self.character);
                    self.active.push(id);
                }
                InitStatus::Hold => self.pending.push(id),
                InitStatus::Failure => {
                    log::warn!("Failed to load animation {}", id);
                    self.motions.remove(&id);
                }
            }
        }
    }

    /// 处理异步获取结果，返回是否交给了某个动画实例
    pub fn on_fetch_reply(&mut self, reply: FetchReply) -> bool {
        if reply.character_id != self.character.id() {
            return false;
        }
        match self.motions.get_mut(&reply.asset_id) {
            Some(motion) => {
                motion.on_load_complete(reply.result, self.character.skeleton(), &self.cache);
                true
            }
            None => {
                log::warn!("No existing motion for asset data {}", reply.asset_id);
                false
            }
        }
    }
}

/// 按角色 ID 把获取结果分发给对应的控制器
///
/// 角色已不存在时静默丢弃。
pub fn dispatch_fetch_reply<C: Character>(controllers: &mut [MotionController<C>], reply: FetchReply) -> bool {
    match controllers
        .iter_mut()
        .find(|c| c.character().id() == reply.character_id)
    {
        Some(controller) => controller.on_fetch_reply(reply),
        None => {
            log::debug!("Fetch reply for unknown character {}", reply.character_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::anim_loader::encode_motion_list;
    use crate::animation::anim_loader::tests::leg_motion_list;
    use crate::animation::asset_fetch::MemoryAssetStore;
    use crate::skeleton::{BasicCharacter, Skeleton};

    fn controller() -> MotionController<BasicCharacter> {
        let character = BasicCharacter::new(Uuid::new_v4(), Skeleton::default_avatar());
        MotionController::new(character, KeyframeDataCache::new())
    }

    fn leg_bytes(controller: &MotionController<BasicCharacter>, looping: bool) -> Vec<u8> {
        let skeleton = &controller.character().skeleton;
        let mut list = leg_motion_list(skeleton);
        list.looping = looping;
        encode_motion_list(&list, skeleton).unwrap()
    }

    #[test]
    fn test_start_with_local_data() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        store.insert_local(id, leg_bytes(&c, false));

        assert!(c.start_motion(id, 1.0, &store));
        assert!(c.is_motion_active(&id));
        c.update(1.5, &store);
        let motion = c.find_motion(&id).unwrap();
        assert!((motion.last_looped_time() - 0.5).abs() < 1e-4);
        assert_eq!(c.character().hand_pose.map(|(p, _)| p), Some(crate::animation::HandPose::Fist));
    }

    #[test]
    fn test_pending_until_fetch_reply() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        store.insert_remote(id, leg_bytes(&c, false));

        assert!(c.start_motion(id, 0.0, &store));
        assert!(c.is_motion_pending(&id));
        // 第二次初始化才发出请求
        c.update(0.1, &store);
        let replies = store.poll_replies();
        assert_eq!(replies.len(), 1);

        let mut controllers = vec![c];
        for reply in replies {
            assert!(dispatch_fetch_reply(&mut controllers, reply));
        }
        let mut c = controllers.remove(0);
        c.update(0.2, &store);
        assert!(c.is_motion_active(&id));
        assert!(!c.is_motion_pending(&id));
        assert_eq!(c.find_motion(&id).unwrap().activation_timestamp(), 0.2);
    }

    #[test]
    fn test_failed_fetch_removes_motion() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        c.start_motion(id, 0.0, &store);
        c.update(0.1, &store);
        for reply in store.poll_replies() {
            c.on_fetch_reply(reply);
        }
        c.update(0.2, &store);
        assert!(c.find_motion(&id).is_none());
        assert!(!c.is_motion_active(&id));
    }

    #[test]
    fn test_reply_for_other_character_ignored() {
        let mut c = controller();
        let reply = FetchReply {
            asset_id: Uuid::new_v4(),
            character_id: Uuid::new_v4(),
            result: Ok(Vec::new()),
        };
        assert!(!c.on_fetch_reply(reply));
    }

    #[test]
    fn test_finished_motion_deactivated() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        store.insert_local(id, leg_bytes(&c, false));
        c.start_motion(id, 0.0, &store);
        c.update(1.0, &store);
        assert!(c.is_motion_active(&id));
        c.update(2.5, &store);
        assert!(!c.is_motion_active(&id));
        assert!(!c.find_motion(&id).unwrap().is_active());
    }

    #[test]
    fn test_stop_waits_for_stop_timestamp() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        store.insert_local(id, leg_bytes(&c, true));
        c.start_motion(id, 0.0, &store);
        c.update(5.0, &store);
        assert!(c.is_motion_active(&id));

        // 循环出点等于时长，立即停止
        assert!(c.stop_motion(&id, 5.5));
        c.update(5.4, &store);
        assert!(c.is_motion_active(&id));
        c.update(5.6, &store);
        assert!(!c.is_motion_active(&id));
    }

    #[test]
    fn test_update_claims_driven_joints() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        store.insert_local(id, leg_bytes(&c, true));
        c.start_motion(id, 0.0, &store);
        c.update(0.6, &store);

        let num = |c: &MotionController<BasicCharacter>, name: &str| {
            let skeleton = &c.character().skeleton;
            skeleton.joint_num(skeleton.find_joint(name).unwrap()).unwrap()
        };
        let (pelvis, knee) = (num(&c, "mPelvis"), num(&c, "mKneeLeft"));
        assert_eq!(c.claims().claimed_priority(pelvis), Some(JointPriority::HIGH));
        assert_eq!(c.claims().claimed_priority(knee), Some(JointPriority::MEDIUM));

        // MEDIUM -> HIGHER 平移 2 级
        c.find_motion_mut(&id).unwrap().set_priority(JointPriority::HIGHER);
        c.update(0.7, &store);
        assert_eq!(c.claims().claimed_priority(pelvis), Some(JointPriority::HIGHEST));
        assert_eq!(c.claims().claimed_priority(knee), Some(JointPriority::MEDIUM));
    }

    #[test]
    fn test_high_priority_motion_blocks_lower_constraint() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let (high, low) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert_local(high, leg_bytes(&c, true));
        store.insert_local(low, leg_bytes(&c, true));
        c.start_motion(low, 0.0, &store);
        c.start_motion(high, 0.0, &store);
        c.find_motion_mut(&high).unwrap().set_priority(JointPriority::HIGHER);
        c.update(0.6, &store);

        // 低优先级动画的约束链已被占用，膝盖保持关键帧值
        let low = c.find_motion(&low).unwrap();
        let keyframe = low.motion_list().unwrap().get().joint_motions[2]
            .rotation_curve
            .get_value(0.6, 2.0, true);
        assert_eq!(low.joint_states()[2].rotation, keyframe);
        assert!(c.find_motion(&high).unwrap().constraints()[0].active);
    }

    #[test]
    fn test_remove_releases_cache_entry() {
        let mut c = controller();
        let store = MemoryAssetStore::new();
        let id = Uuid::new_v4();
        store.insert_local(id, leg_bytes(&c, false));
        c.start_motion(id, 0.0, &store);
        assert!(c.cache().contains(&id));
        c.remove_motion(&id);
        assert!(c.find_motion(&id).is_none());
        assert!(!c.cache().contains(&id));
    }
}
