//! 约束求解配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 约束求解配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct SolverConfig {
    // ========== 松弛求解 ==========
    /// 关节长度弹簧系数，默认 0.7
    pub joint_length_k: f32,
    /// 最大迭代次数（大像素面积时），默认 20
    pub max_iterations: u32,
    /// 最小迭代次数（小像素面积时），默认 1
    pub min_iterations: u32,
    /// 提前收敛前至少执行的迭代次数，默认 2
    pub min_iteration_count: u32,
    /// 收敛判定的加速度平方阈值，默认 0.0005²
    pub min_acceleration_squared: f32,

    // ========== 细节层级 ==========
    /// 达到此像素面积时使用最大迭代次数，默认 80000
    pub max_pixel_area: f32,
    /// 低于此像素面积时使用最小迭代次数，默认 1000
    pub min_pixel_area: f32,

    // ========== 可达性 ==========
    /// 可达判定余量：dist² × 此值 > 链长² 视为不可达，默认 0.95
    pub reach_slack: f32,

    // ========== 调试 ==========
    /// 输出每帧求解调试日志，默认 false
    pub debug_log: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            joint_length_k: 0.7,
            max_iterations: 20,
            min_iterations: 1,
            min_iteration_count: 2,
            min_acceleration_squared: 0.0005 * 0.0005,
            max_pixel_area: 80000.0,
            min_pixel_area: 1000.0,
            reach_slack: 0.95,
            debug_log: false,
        }
    }
}

/// 全局配置实例
static CONFIG: Lazy<RwLock<SolverConfig>> = Lazy::new(|| RwLock::new(SolverConfig::default()));

/// 获取当前配置（克隆）
pub fn get_config() -> SolverConfig {
    CONFIG.read().map(|c| c.clone()).unwrap_or_default()
}

/// 更新配置
pub fn set_config(config: SolverConfig) {
    if let Ok(mut c) = CONFIG.write() {
        *c = config;
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(SolverConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SolverConfig::default();
        assert_eq!(c.max_iterations, 20);
        assert_eq!(c.min_iterations, 1);
        assert!((c.joint_length_k - 0.7).abs() < 0.001);
        assert!((c.min_acceleration_squared - 2.5e-7).abs() < 1e-9);
    }
}
