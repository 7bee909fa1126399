//! 16 位定点量化
//!
//! 新格式中时间、旋转分量和位移分量均以 u16 存储，
//! 映射到各自的取值区间。

use glam::{EulerRot, Quat, Vec3};

const U16_MAX_F: f32 = 65535.0;

/// u16 -> f32，映射到 [lower, upper]
///
/// 误差范围内接近零的值直接吸附为 0，保证 0 可以精确往返。
pub fn u16_to_f32(ival: u16, lower: f32, upper: f32) -> f32 {
    let delta = upper - lower;
    let val = ival as f32 / U16_MAX_F * delta + lower;
    let max_error = delta / U16_MAX_F;
    if val.abs() < max_error {
        0.0
    } else {
        val
    }
}

/// f32 -> u16，先钳制到 [lower, upper] 再四舍五入
pub fn f32_to_u16(val: f32, lower: f32, upper: f32) -> u16 {
    let delta = upper - lower;
    if delta <= 0.0 || !val.is_finite() {
        return 0;
    }
    let v = val.clamp(lower, upper);
    ((v - lower) / delta * U16_MAX_F).round() as u16
}

/// 由 x, y, z 分量还原单位四元数，w 取非负根
pub fn unpack_quat(x: f32, y: f32, z: f32) -> Quat {
    let w2 = 1.0 - (x * x + y * y + z * z);
    let w = if w2 > 0.0 { w2.sqrt() } else { 0.0 };
    Quat::from_xyzw(x, y, z, w).normalize()
}

/// 取单位四元数的 x, y, z，w 为负时整体取反（q 与 -q 表示同一旋转）
pub fn pack_quat(q: Quat) -> Vec3 {
    let q = q.normalize();
    if q.w < 0.0 {
        Vec3::new(-q.x, -q.y, -q.z)
    } else {
        Vec3::new(q.x, q.y, q.z)
    }
}

/// 旧格式欧拉角（度），按 Z·Y·X 顺序合成
pub fn euler_degrees_to_quat(degrees: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::XYZ,
        degrees.x.to_radians(),
        degrees.y.to_radians(),
        degrees.z.to_radians(),
    )
}
