use unicore_arch::{Arch, ArchKind, ConfigError, Mode};
use unicore_arm::ArmCpu;
use unicore_riscv::RiscvCpu;

/// Build the plugin for `kind`, validating `mode` against it.
pub(crate) fn create_arch(kind: ArchKind, mode: Mode) -> Result<Box<dyn Arch>, ConfigError> {
    Ok(match kind {
        ArchKind::Arm => Box::new(ArmCpu::new(mode)?),
        ArchKind::Riscv => Box::new(RiscvCpu::new(mode)?),
    })
}

/// Whether this build has a plugin for `kind`.
pub fn arch_supported(kind: ArchKind) -> bool {
    match kind {
        ArchKind::Arm | ArchKind::Riscv => true,
    }
}
