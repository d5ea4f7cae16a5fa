//! ELF relocation names shared by the assembly printer and the assembler.

use object::Architecture;

macro_rules! reloc_table {
    ($($name:ident),* $(,)?) => {
        &[$((stringify!($name), object::elf::$name)),*]
    };
}

const X86_64: &[(&str, u32)] = reloc_table![
    R_X86_64_NONE,
    R_X86_64_64,
    R_X86_64_PC32,
    R_X86_64_GOT32,
    R_X86_64_PLT32,
    R_X86_64_COPY,
    R_X86_64_GLOB_DAT,
    R_X86_64_JUMP_SLOT,
    R_X86_64_RELATIVE,
    R_X86_64_GOTPCREL,
    R_X86_64_32,
    R_X86_64_32S,
    R_X86_64_16,
    R_X86_64_PC16,
    R_X86_64_8,
    R_X86_64_PC8,
    R_X86_64_DTPMOD64,
    R_X86_64_DTPOFF64,
    R_X86_64_TPOFF64,
    R_X86_64_TLSGD,
    R_X86_64_TLSLD,
    R_X86_64_DTPOFF32,
    R_X86_64_GOTTPOFF,
    R_X86_64_TPOFF32,
    R_X86_64_PC64,
    R_X86_64_GOTOFF64,
    R_X86_64_GOTPC32,
    R_X86_64_SIZE32,
    R_X86_64_SIZE64,
    R_X86_64_GOTPCRELX,
    R_X86_64_REX_GOTPCRELX,
];

const AARCH64: &[(&str, u32)] = reloc_table![
    R_AARCH64_NONE,
    R_AARCH64_ABS64,
    R_AARCH64_ABS32,
    R_AARCH64_ABS16,
    R_AARCH64_PREL64,
    R_AARCH64_PREL32,
    R_AARCH64_PREL16,
    R_AARCH64_MOVW_UABS_G0,
    R_AARCH64_MOVW_UABS_G0_NC,
    R_AARCH64_MOVW_UABS_G1,
    R_AARCH64_MOVW_UABS_G1_NC,
    R_AARCH64_MOVW_UABS_G2,
    R_AARCH64_MOVW_UABS_G2_NC,
    R_AARCH64_MOVW_UABS_G3,
    R_AARCH64_ADR_PREL_LO21,
    R_AARCH64_ADR_PREL_PG_HI21,
    R_AARCH64_ADR_PREL_PG_HI21_NC,
    R_AARCH64_ADD_ABS_LO12_NC,
    R_AARCH64_LDST8_ABS_LO12_NC,
    R_AARCH64_TSTBR14,
    R_AARCH64_CONDBR19,
    R_AARCH64_JUMP26,
    R_AARCH64_CALL26,
    R_AARCH64_LDST16_ABS_LO12_NC,
    R_AARCH64_LDST32_ABS_LO12_NC,
    R_AARCH64_LDST64_ABS_LO12_NC,
    R_AARCH64_LDST128_ABS_LO12_NC,
    R_AARCH64_ADR_GOT_PAGE,
    R_AARCH64_LD64_GOT_LO12_NC,
    R_AARCH64_TLSGD_ADR_PAGE21,
    R_AARCH64_TLSGD_ADD_LO12_NC,
    R_AARCH64_TLSDESC_ADR_PAGE21,
    R_AARCH64_TLSDESC_LD64_LO12,
    R_AARCH64_TLSDESC_ADD_LO12,
    R_AARCH64_TLSDESC_CALL,
];

fn table(arch: Architecture) -> &'static [(&'static str, u32)] {
    match arch {
        Architecture::X86_64 => X86_64,
        Architecture::Aarch64 => AARCH64,
        _ => &[],
    }
}

pub fn name(arch: Architecture, r_type: u32) -> Option<&'static str> {
    table(arch).iter().find(|(_, ty)| *ty == r_type).map(|(name, _)| *name)
}

pub fn lookup(arch: Architecture, name: &str) -> Option<u32> {
    table(arch).iter().find(|(n, _)| *n == name).map(|(_, ty)| *ty)
}

/// Relocation a data directive uses for an absolute symbol reference of `size` bytes
pub fn absolute(arch: Architecture, size: u8) -> Option<u32> {
    match (arch, size) {
        (Architecture::X86_64, 8) => Some(object::elf::R_X86_64_64),
        (Architecture::X86_64, 4) => Some(object::elf::R_X86_64_32),
        (Architecture::X86_64, 2) => Some(object::elf::R_X86_64_16),
        (Architecture::X86_64, 1) => Some(object::elf::R_X86_64_8),
        (Architecture::Aarch64, 8) => Some(object::elf::R_AARCH64_ABS64),
        (Architecture::Aarch64, 4) => Some(object::elf::R_AARCH64_ABS32),
        (Architecture::Aarch64, 2) => Some(object::elf::R_AARCH64_ABS16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_resolve_both_ways() {
        let plt32 = lookup(Architecture::X86_64, "R_X86_64_PLT32").expect("PLT32");
        assert_eq!(plt32, 4);
        assert_eq!(name(Architecture::X86_64, plt32), Some("R_X86_64_PLT32"));
        assert_eq!(lookup(Architecture::Aarch64, "R_AARCH64_CALL26"), Some(283));
        assert_eq!(lookup(Architecture::Aarch64, "R_X86_64_64"), None);
        assert_eq!(absolute(Architecture::Aarch64, 1), None);
    }
}
