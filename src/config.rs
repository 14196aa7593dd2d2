//! Boot-time layout of the simulated machine.

use crate::memory::{PGSIZE, PT_SIZE};

/// Default size of physical memory (and of the identity-mapped region).
pub const DEFAULT_PHY_MEM: usize = 16 * 1024 * 1024;

/// Default end of the kernel image; frames above it are handed out.
pub const DEFAULT_KER_MEM: usize = 4 * 1024 * 1024;

/// Default end of process-private user space.
pub const DEFAULT_USR_MEM: usize = 0xC000_0000;

/// Memory layout handed to [`crate::Kernel::boot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// `PHY_MEM`: bytes of physical memory, identity-mapped in every address space.
    pub phy_mem: usize,
    /// `KER_MEM`: physical end of the kernel's static footprint.
    pub ker_mem: usize,
    /// `USR_MEM`: virtual end of user space.
    pub usr_mem: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            phy_mem: DEFAULT_PHY_MEM,
            ker_mem: DEFAULT_KER_MEM,
            usr_mem: DEFAULT_USR_MEM,
        }
    }
}

impl KernelConfig {
    /// A layout with exactly `frames` allocatable frames above the default kernel image.
    pub fn with_free_frames(frames: usize) -> Self {
        let ker_mem = DEFAULT_KER_MEM;
        let wanted = ker_mem + frames * PGSIZE;
        let phy_mem = (wanted + PT_SIZE - 1) / PT_SIZE * PT_SIZE;
        // Push the kernel image up so that only `frames` frames stay free.
        KernelConfig {
            phy_mem,
            ker_mem: phy_mem - frames * PGSIZE,
            usr_mem: DEFAULT_USR_MEM,
        }
    }

    /// Checked once at boot; a bad layout is fatal.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.phy_mem == 0 || self.phy_mem % PT_SIZE != 0 {
            return Err("PHY_MEM must be a non-zero multiple of the page-table span");
        }
        if self.ker_mem % PGSIZE != 0 || self.ker_mem >= self.phy_mem {
            return Err("KER_MEM must be page aligned and below PHY_MEM");
        }
        if self.usr_mem % PT_SIZE != 0 || self.usr_mem <= self.phy_mem {
            return Err("USR_MEM must be table aligned and above PHY_MEM");
        }
        // Frame 0 (null guard), the kernel directory, the shared tables and
        // the idle kernel stack all live below KER_MEM.
        let static_frames = 2 + self.phy_mem / PT_SIZE + 1;
        if static_frames * PGSIZE > self.ker_mem {
            return Err("kernel too big (KER_MEM cannot hold the static page tables)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        assert_eq!(KernelConfig::default().validate(), Ok(()));
    }

    #[test]
    fn with_free_frames_leaves_exactly_that_many() {
        let cfg = KernelConfig::with_free_frames(10);
        assert_eq!((cfg.phy_mem - cfg.ker_mem) / PGSIZE, 10);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn rejects_unaligned_physical_memory() {
        let cfg = KernelConfig { phy_mem: PT_SIZE + PGSIZE, ..KernelConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_kernel_image_above_physical_memory() {
        let cfg = KernelConfig { ker_mem: DEFAULT_PHY_MEM, ..KernelConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
