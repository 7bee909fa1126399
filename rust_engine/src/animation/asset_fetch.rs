//! 资产来源
//!
//! 本地存储同步读取；网络获取异步完成，结果以 `FetchReply` 投递，
//! 由控制器按 (角色 ID, 资产 ID) 分发给对应的动画实例。

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use uuid::Uuid;

use crate::{AnimError, Result};

/// 资产来源
pub trait AssetSource {
    /// 本地已有的资产数据；`Ok(None)` 表示需要从网络获取
    fn read_local(&self, asset_id: Uuid) -> Result<Option<Vec<u8>>>;

    /// 发起异步获取，完成后应投递一个 `FetchReply`
    fn request_fetch(&self, asset_id: Uuid, character_id: Uuid);
}

/// 异步获取的结果
#[derive(Debug)]
pub struct FetchReply {
    pub asset_id: Uuid,
    pub character_id: Uuid,
    pub result: Result<Vec<u8>>,
}

/// 内存资产存储
///
/// `remote` 模拟网络端，`poll_replies` 处理积压的请求并把结果写入本地。
pub struct MemoryAssetStore {
    local: Mutex<HashMap<Uuid, Vec<u8>>>,
    remote: Mutex<HashMap<Uuid, Vec<u8>>>,
    request_tx: Sender<(Uuid, Uuid)>,
    request_rx: Receiver<(Uuid, Uuid)>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        let (request_tx, request_rx) = channel();
        Self {
            local: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            request_tx,
            request_rx,
        }
    }

    pub fn insert_local(&self, asset_id: Uuid, data: Vec<u8>) {
        if let Ok(mut local) = self.local.lock() {
            local.insert(asset_id, data);
        }
    }

    pub fn insert_remote(&self, asset_id: Uuid, data: Vec<u8>) {
        if let Ok(mut remote) = self.remote.lock() {
            remote.insert(asset_id, data);
        }
    }

    /// 处理所有积压的获取请求
    pub fn poll_replies(&self) -> Vec<FetchReply> {
        let mut replies = Vec::new();
        for (asset_id, character_id) in self.request_rx.try_iter() {
            let found = self
                .remote
                .lock()
                .ok()
                .and_then(|remote| remote.get(&asset_id).cloned());
            let result = match found {
                Some(data) => {
                    self.insert_local(asset_id, data.clone());
                    Ok(data)
                }
                None => Err(AnimError::FetchFailed(format!("asset {} not found", asset_id))),
            };
            log::debug!("Fetch reply for {} (character {}): ok={}", asset_id, character_id, result.is_ok());
            replies.push(FetchReply {
                asset_id,
                character_id,
                result,
            });
        }
        replies
    }
}

impl Default for MemoryAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetSource for MemoryAssetStore {
    fn read_local(&self, asset_id: Uuid) -> Result<Option<Vec<u8>>> {
        let local = self
            .local
            .lock()
            .map_err(|_| AnimError::FetchFailed("local store poisoned".to_string()))?;
        Ok(local.get(&asset_id).filter(|data| !data.is_empty()).cloned())
    }

    fn request_fetch(&self, asset_id: Uuid, character_id: Uuid) {
        if self.request_tx.send((asset_id, character_id)).is_err() {
            log::warn!("Asset request queue closed, dropping fetch for {}", asset_id);
        }
    }
}
