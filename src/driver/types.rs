//! Input kinds and compilation phases known to the driver.

use std::path::Path;

/// What an input file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    C,
    PreprocessedC,
    Asm,
    AsmWithCpp,
    Object,
}

impl InputType {
    /// Classify by `-x` language name. `None` for unknown names.
    pub fn from_language(lang: &str) -> Option<Self> {
        match lang {
            "c" | "c-header" => Some(InputType::C),
            "cpp-output" => Some(InputType::PreprocessedC),
            "assembler" => Some(InputType::Asm),
            "assembler-with-cpp" => Some(InputType::AsmWithCpp),
            _ => None,
        }
    }

    /// Classify by file extension; anything unrecognized goes to the linker.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") | Some("h") => InputType::C,
            Some("i") => InputType::PreprocessedC,
            Some("s") => InputType::Asm,
            Some("S") | Some("sx") => InputType::AsmWithCpp,
            _ => InputType::Object,
        }
    }

    /// Spelling passed to the front-end's `-x`.
    pub fn language_name(self) -> &'static str {
        match self {
            InputType::C => "c",
            InputType::PreprocessedC => "cpp-output",
            InputType::Asm => "assembler",
            InputType::AsmWithCpp => "assembler-with-cpp",
            InputType::Object => "object",
        }
    }
}

/// The last phase a driver invocation runs.
///
/// Ordered: an earlier phase wins when several phase flags are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Preprocess,
    SyntaxOnly,
    Compile,
    Assemble,
    Link,
}
