//! 关键帧曲线
//!
//! 旋转、位移、缩放三种曲线共用同一套查找和插值逻辑，
//! 差异只在 `Interpolate` 的实现上。

use glam::{Quat, Vec3};

/// 插值方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InterpolationType {
    /// 阶跃：保持前一个关键帧的值
    Step,
    #[default]
    Linear,
}

/// 可插值的关键帧值
pub trait Interpolate: Copy + Default {
    fn interpolate(a: Self, b: Self, u: f32) -> Self;
}

impl Interpolate for Vec3 {
    fn interpolate(a: Self, b: Self, u: f32) -> Self {
        a.lerp(b, u)
    }
}

impl Interpolate for Quat {
    fn interpolate(a: Self, b: Self, u: f32) -> Self {
        nlerp(u, a, b)
    }
}

/// 归一化线性插值，走最短路径
pub fn nlerp(t: f32, a: Quat, b: Quat) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    let q = a * (1.0 - t) + b * t;
    if q.length_squared() > f32::EPSILON {
        q.normalize()
    } else {
        a
    }
}

/// 关键帧
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Key<T> {
    pub time: f32,
    pub value: T,
}

impl<T> Key<T> {
    pub fn new(time: f32, value: T) -> Self {
        Self { time, value }
    }
}

/// 关键帧曲线
///
/// 关键帧按时间升序存储；循环入点/出点是缓存的合成关键帧，
/// 循环播放越过最后一个关键帧时朝循环入点插值，避免跳变。
#[derive(Clone, Debug)]
pub struct AnimationCurve<T> {
    pub interpolation: InterpolationType,
    keys: Vec<Key<T>>,
    loop_in_key: Option<Key<T>>,
    loop_out_key: Option<Key<T>>,
}

impl<T: Interpolate> AnimationCurve<T> {
    pub fn new() -> Self {
        Self {
            interpolation: InterpolationType::Linear,
            keys: Vec::new(),
            loop_in_key: None,
            loop_out_key: None,
        }
    }

    pub fn from_keys(mut keys: Vec<Key<T>>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            keys,
            ..Self::new()
        }
    }

    /// 追加关键帧（调用方负责最终排序）
    pub fn push(&mut self, key: Key<T>) {
        self.keys.push(key);
    }

    /// 按时间稳定排序
    pub fn sort(&mut self) {
        self.keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    }

    pub fn keys(&self) -> &[Key<T>] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn loop_in_key(&self) -> Option<&Key<T>> {
        self.loop_in_key.as_ref()
    }

    pub fn loop_out_key(&self) -> Option<&Key<T>> {
        self.loop_out_key.as_ref()
    }

    /// 计算给定时间的值
    ///
    /// - 无关键帧：默认值（零向量 / 单位四元数）
    /// - 早于第一个关键帧：第一个关键帧的值
    /// - 晚于最后一个关键帧：循环时朝循环入点插值（在 `duration` 处到达），否则保持
    pub fn get_value(&self, time: f32, duration: f32, looping: bool) -> T {
        let Some(last) = self.keys.last() else {
            return T::default();
        };

        // 第一个 time >= 查询时间的关键帧
        let right = self.keys.partition_point(|k| k.time < time);

        if right == self.keys.len() {
            return match self.loop_in_key {
                Some(loop_in) if looping && duration > last.time => {
                    let u = ((time - last.time) / (duration - last.time)).clamp(0.0, 1.0);
                    self.interp(u, last, &loop_in)
                }
                _ => last.value,
            };
        }

        let after = &self.keys[right];
        if right == 0 || after.time == time {
            return after.value;
        }

        let before = &self.keys[right - 1];
        let u = (time - before.time) / (after.time - before.time);
        self.interp(u, before, after)
    }

    fn interp(&self, u: f32, before: &Key<T>, after: &Key<T>) -> T {
        match self.interpolation {
            InterpolationType::Step => before.value,
            InterpolationType::Linear => {
                T::interpolate(before.value, after.value, u)
            }
        }
    }

    /// 缓存循环入点的值（按不循环求值）
    pub fn set_loop_in(&mut self, in_point: f32, duration: f32) {
        let value = self.get_value(in_point, duration, false);
        self.loop_in_key = Some(Key::new(in_point, value));
    }

    /// 缓存循环出点的值（按不循环求值）
    pub fn set_loop_out(&mut self, out_point: f32, duration: f32) {
        let value = self.get_value(out_point, duration, false);
        self.loop_out_key = Some(Key::new(out_point, value));
    }
}

impl<T: Interpolate> Default for AnimationCurve<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type RotationCurve = AnimationCurve<Quat>;
pub type PositionCurve = AnimationCurve<Vec3>;
pub type ScaleCurve = AnimationCurve<Vec3>;
