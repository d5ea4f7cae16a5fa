/// supported C standards
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CStandard {
    C89,
    C99,
    C11,
    C17,
    Gnu89,
    Gnu99,
    Gnu11,
    #[default]
    Gnu17,
}

impl CStandard {
    /// Parse a `-std=` value.
    pub fn parse(s: &str) -> Option<Self> {
        let std = match s {
            "c89" | "c90" | "iso9899:1990" => CStandard::C89,
            "c99" | "iso9899:1999" => CStandard::C99,
            "c11" | "iso9899:2011" => CStandard::C11,
            "c17" | "c18" | "iso9899:2017" | "iso9899:2018" => CStandard::C17,
            "gnu89" | "gnu90" => CStandard::Gnu89,
            "gnu99" => CStandard::Gnu99,
            "gnu11" => CStandard::Gnu11,
            "gnu17" | "gnu18" => CStandard::Gnu17,
            _ => return None,
        };
        Some(std)
    }

    /// Value of `__STDC_VERSION__`, absent for C89.
    pub fn stdc_version(self) -> Option<&'static str> {
        match self {
            CStandard::C89 | CStandard::Gnu89 => None,
            CStandard::C99 | CStandard::Gnu99 => Some("199901L"),
            CStandard::C11 | CStandard::Gnu11 => Some("201112L"),
            CStandard::C17 | CStandard::Gnu17 => Some("201710L"),
        }
    }

    pub fn is_gnu(self) -> bool {
        matches!(
            self,
            CStandard::Gnu89 | CStandard::Gnu99 | CStandard::Gnu11 | CStandard::Gnu17
        )
    }
}

/// Language options affecting compilation behavior
#[derive(Copy, Clone, Debug, Default)]
pub struct LangOptions {
    pub c_standard: CStandard,
    pub pedantic: bool,
    /// Preprocessing assembly source (`-x assembler-with-cpp`).
    pub asm_preprocessor: bool,
}

impl LangOptions {
    pub fn gnu_mode(&self) -> bool {
        self.c_standard.is_gnu()
    }
}
