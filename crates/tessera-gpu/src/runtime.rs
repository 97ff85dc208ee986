//! Process-wide Vulkan runtime handle.

use crate::error::{GpuError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RuntimeInner {
    entry: ash::Entry,
    live_contexts: AtomicUsize,
}

/// Loaded Vulkan entry points shared by every context in the process.
///
/// Obtained once through [`GpuRuntime::initialize`] and handed to each
/// context constructor. Cloning is cheap; all clones share the same loader
/// and live-context count.
#[derive(Clone)]
pub struct GpuRuntime {
    inner: Arc<RuntimeInner>,
}

impl GpuRuntime {
    /// Load the Vulkan library.
    pub fn initialize() -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        tracing::debug!("Vulkan loader initialized");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                entry,
                live_contexts: AtomicUsize::new(0),
            }),
        })
    }

    /// Vulkan entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.inner.entry
    }

    /// Number of contexts currently alive on this runtime.
    pub fn live_contexts(&self) -> usize {
        self.inner.live_contexts.load(Ordering::Acquire)
    }

    pub(crate) fn register_context(&self) -> ContextRegistration {
        self.inner.live_contexts.fetch_add(1, Ordering::AcqRel);
        ContextRegistration {
            runtime: self.clone(),
        }
    }
}

/// Keeps a context counted as live until dropped.
pub(crate) struct ContextRegistration {
    runtime: GpuRuntime,
}

impl ContextRegistration {
    pub(crate) fn runtime(&self) -> &GpuRuntime {
        &self.runtime
    }
}

impl Drop for ContextRegistration {
    fn drop(&mut self) {
        let previous = self
            .runtime
            .inner
            .live_contexts
            .fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            tracing::debug!("Last GPU context released");
        }
    }
}
