//! 計算バックエンドの選択
//!
//! CPU は `burn-ndarray`、GPU は `burn-wgpu` を使用します。学習時はどちらも
//! `Autodiff` で包みます。

use burn::backend::{Autodiff, Wgpu};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use crate::model::DeviceType;

/// CPU 推論バックエンド
pub type CpuBackend = NdArray;
/// GPU 推論バックエンド
pub type GpuBackend = Wgpu;
/// CPU 学習バックエンド
pub type CpuTrainingBackend = Autodiff<CpuBackend>;
/// GPU 学習バックエンド
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// 既定のアダプタ（利用可能なら独立GPU）
pub fn gpu_device() -> WgpuDevice {
    WgpuDevice::default()
}

/// `/health` などに表示するデバイス名
pub trait DeviceLabel {
    fn label(&self) -> String;
}

impl DeviceLabel for NdArrayDevice {
    fn label(&self) -> String {
        "cpu".to_string()
    }
}

impl DeviceLabel for WgpuDevice {
    fn label(&self) -> String {
        match self {
            WgpuDevice::DefaultDevice => "wgpu".to_string(),
            WgpuDevice::DiscreteGpu(index) => format!("wgpu:discrete:{}", index),
            WgpuDevice::IntegratedGpu(index) => format!("wgpu:integrated:{}", index),
            WgpuDevice::Cpu => "wgpu:cpu".to_string(),
            other => format!("wgpu:{:?}", other).to_lowercase(),
        }
    }
}

/// 表示用のバックエンド名
pub fn backend_name(device_type: DeviceType) -> &'static str {
    match device_type {
        DeviceType::Cpu => "ndarray (CPU)",
        DeviceType::Wgpu => "wgpu (GPU)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_labels() {
        assert_eq!(cpu_device().label(), "cpu");
        assert_eq!(WgpuDevice::DefaultDevice.label(), "wgpu");
        assert_eq!(WgpuDevice::DiscreteGpu(1).label(), "wgpu:discrete:1");
    }
}
