use kernel_info::env::NENV;

/// Runtime sizing of a [`Kernel`](crate::Kernel).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelConfig {
    /// Environment slots; at most [`NENV`].
    pub max_envs: usize,
    /// Size of the physical page pool, including the reserved page 0.
    pub physical_pages: u32,
    /// Pages of kernel image mapped above `KERNBASE` in every address space.
    pub kernel_image_pages: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_envs: NENV,
            physical_pages: 8192,
            kernel_image_pages: 16,
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = max_envs.clamp(1, NENV);
        self
    }

    #[must_use]
    pub const fn with_physical_pages(mut self, pages: u32) -> Self {
        self.physical_pages = pages;
        self
    }

    #[must_use]
    pub const fn with_kernel_image_pages(mut self, pages: u32) -> Self {
        self.kernel_image_pages = pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_count_is_clamped() {
        assert_eq!(KernelConfig::default().with_max_envs(0).max_envs, 1);
        assert_eq!(KernelConfig::default().with_max_envs(1 << 20).max_envs, NENV);
    }
}
