//! 动画数据缓存
//!
//! 以资产 ID 为键共享解码后的 `JointMotionList`。
//! 缓存只持有弱引用；最后一个持有者释放句柄时条目自动移除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use once_cell::sync::Lazy;
use uuid::Uuid;

use super::motion_data::JointMotionList;
use crate::{AnimError, Result};

type Registry = Mutex<HashMap<Uuid, Weak<CacheEntry>>>;

struct CacheEntry {
    asset_id: Uuid,
    data: RwLock<Arc<JointMotionList>>,
    registry: Weak<Registry>,
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Ok(mut map) = registry.lock() else {
            return;
        };
        // 同一 ID 可能已被新条目替换，只移除已失效的弱引用
        let stale = map
            .get(&self.asset_id)
            .map_or(false, |weak| weak.strong_count() == 0);
        if stale {
            map.remove(&self.asset_id);
            log::debug!("Released animation data {}", self.asset_id);
        }
    }
}

/// 共享动画数据句柄
///
/// 克隆句柄即增加引用；数据本身通过 `get` 取得不可变快照。
#[derive(Clone)]
pub struct MotionListHandle {
    entry: Arc<CacheEntry>,
}

impl MotionListHandle {
    pub fn asset_id(&self) -> Uuid {
        self.entry.asset_id
    }

    /// 当前数据快照
    pub fn get(&self) -> Arc<JointMotionList> {
        match self.entry.data.read() {
            Ok(data) => Arc::clone(&*data),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// 原地替换数据，所有持有同一条目的实例立即可见
    pub fn replace(&self, list: JointMotionList) {
        let list = Arc::new(list);
        match self.entry.data.write() {
            Ok(mut data) => *data = list,
            Err(poisoned) => *poisoned.into_inner() = list,
        }
    }

    /// 写时复制修改
    pub fn update<F: FnOnce(&mut JointMotionList)>(&self, f: F) {
        let mut list = (*self.get()).clone();
        f(&mut list);
        self.replace(list);
    }

    /// 共享此条目的句柄数量
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.entry)
    }
}

impl std::fmt::Debug for MotionListHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionListHandle")
            .field("asset_id", &self.entry.asset_id)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// 动画数据缓存
///
/// 可以注入到各个控制器中；`global()` 提供进程级默认实例。
#[derive(Clone)]
pub struct KeyframeDataCache {
    entries: Arc<Registry>,
}

static GLOBAL_CACHE: Lazy<KeyframeDataCache> = Lazy::new(KeyframeDataCache::new);

impl KeyframeDataCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 进程级缓存
    pub fn global() -> &'static KeyframeDataCache {
        &GLOBAL_CACHE
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Weak<CacheEntry>>> {
        match self.entries.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 查找仍然存活的条目
    pub fn get(&self, asset_id: &Uuid) -> Option<MotionListHandle> {
        let map = self.lock();
        map.get(asset_id)
            .and_then(Weak::upgrade)
            .map(|entry| MotionListHandle { entry })
    }

    /// 新建条目，已存在时失败
    pub fn create(&self, asset_id: Uuid, list: JointMotionList) -> Result<MotionListHandle> {
        let mut map = self.lock();
        if map.get(&asset_id).map_or(false, |w| w.strong_count() > 0) {
            return Err(AnimError::CacheEntryExists(asset_id));
        }
        let entry = self.new_entry(asset_id, list);
        map.insert(asset_id, Arc::downgrade(&entry));
        Ok(MotionListHandle { entry })
    }

    /// 插入或替换
    ///
    /// 已有存活条目时原地替换其数据，返回同一条目的句柄；
    /// 多次解码同一资产只会保留一份数据。
    pub fn insert_or_replace(&self, asset_id: Uuid, list: JointMotionList) -> MotionListHandle {
        let existing = {
            let map = self.lock();
            map.get(&asset_id).and_then(Weak::upgrade)
        };
        if let Some(entry) = existing {
            let handle = MotionListHandle { entry };
            handle.replace(list);
            return handle;
        }

        let mut map = self.lock();
        // 加锁间隙中可能有其他线程插入
        if let Some(entry) = map.get(&asset_id).and_then(Weak::upgrade) {
            drop(map);
            let handle = MotionListHandle { entry };
            handle.replace(list);
            return handle;
        }
        let entry = self.new_entry(asset_id, list);
        map.insert(asset_id, Arc::downgrade(&entry));
        MotionListHandle { entry }
    }

    fn new_entry(&self, asset_id: Uuid, list: JointMotionList) -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            asset_id,
            data: RwLock::new(Arc::new(list)),
            registry: Arc::downgrade(&self.entries),
        })
    }

    /// 从缓存中移除；已发出的句柄仍然有效
    pub fn remove(&self, asset_id: &Uuid) {
        self.lock().remove(asset_id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn contains(&self, asset_id: &Uuid) -> bool {
        self.lock()
            .get(asset_id)
            .map_or(false, |w| w.strong_count() > 0)
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 输出每个条目的统计信息，返回总字节数
    pub fn dump_diag_info(&self, quiet: bool) -> usize {
        let handles: Vec<MotionListHandle> = {
            let map = self.lock();
            map.values()
                .filter_map(Weak::upgrade)
                .map(|entry| MotionListHandle { entry })
                .collect()
        };

        let mut total = 0;
        for handle in &handles {
            if !quiet {
                log::info!("-----------------------------------------------------");
                log::info!("Keyframe data {}", handle.asset_id());
            }
            total += handle.get().dump_diag_info(quiet);
        }
        log::info!(
            "{} keyframe animations, {} bytes total",
            handles.len(),
            total
        );
        total
    }
}

impl Default for KeyframeDataCache {
    fn default() -> Self {
        Self::new()
    }
}
