pub use burn::{
    backend::wgpu::{WgpuDevice, WgpuRuntime},
    tensor::backend::{AutodiffBackend, Backend},
};

use burn::backend::autodiff;

pub type Autodiff<B> = autodiff::Autodiff<B>;
pub type Wgpu = burn_jit::JitBackend<WgpuRuntime, f32, i32, u32>;

/// Waiting for the queued work on `device` to finish.
///
/// The tensors dropped before this call are released by the backend allocator,
/// so it serves as the reclaim point after bulk surgery on large buffers.
#[inline]
pub fn reclaim<B: Backend>(device: &B::Device) {
    B::sync(device);

    #[cfg(all(debug_assertions, not(test)))]
    log::debug!(target: "gausplat::trainer::backend", "reclaim");
}
