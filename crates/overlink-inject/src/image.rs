//! Executable word-size inspection.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use object::FileKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InjectError, InjectResult, LaunchStage};

/// Bytes read from the front of an image; enough for every header we parse.
const HEADER_WINDOW: u64 = 64 * 1024;

/// Interpreter chains longer than this are rejected.
const MAX_INTERPRETER_DEPTH: usize = 4;

/// Address width of an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordSize {
    /// 32-bit image.
    #[serde(rename = "32")]
    Bits32,
    /// 64-bit image.
    #[serde(rename = "64")]
    Bits64,
}

impl WordSize {
    /// Word size of the running process.
    #[must_use]
    pub fn host() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    /// Width in bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }

    /// The other word size.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Bits32 => Self::Bits64,
            Self::Bits64 => Self::Bits32,
        }
    }
}

impl fmt::Display for WordSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Read the word size of the executable at `path`.
///
/// ELF, PE, Mach-O and XCOFF images are recognised. Universal Mach-O
/// binaries adopt the host word size. `#!` scripts are inspected through
/// their interpreter.
///
/// # Errors
///
/// Returns a [`LaunchStage::Inspect`] error if the file cannot be read or is
/// not a recognised executable.
pub fn inspect(path: &Path) -> InjectResult<WordSize> {
    inspect_at_depth(path, 0)
}

fn inspect_at_depth(path: &Path, depth: usize) -> InjectResult<WordSize> {
    let header = read_header(path)?;

    if let Some(interpreter) = shebang_interpreter(&header) {
        if depth >= MAX_INTERPRETER_DEPTH {
            return Err(inspect_err(path, "interpreter chain too deep"));
        }
        let resolved = resolve_interpreter(&interpreter)?;
        debug!(
            script = %path.display(),
            interpreter = %resolved.display(),
            "Inspecting script interpreter"
        );
        return inspect_at_depth(&resolved, depth.saturating_add(1));
    }

    let kind = FileKind::parse(header.as_slice()).map_err(|e| inspect_err(path, e))?;
    let size = match kind {
        FileKind::Elf32 | FileKind::MachO32 | FileKind::Pe32 | FileKind::Xcoff32 => {
            WordSize::Bits32
        },
        FileKind::Elf64 | FileKind::MachO64 | FileKind::Pe64 | FileKind::Xcoff64 => {
            WordSize::Bits64
        },
        FileKind::MachOFat32 | FileKind::MachOFat64 => WordSize::host(),
        other => {
            return Err(inspect_err(
                path,
                format!("{other:?} is not an executable image"),
            ));
        },
    };

    debug!(path = %path.display(), word_size = %size, "Inspected executable");
    Ok(size)
}

fn read_header(path: &Path) -> InjectResult<Vec<u8>> {
    let file = File::open(path).map_err(|e| inspect_err(path, e))?;
    let mut header = Vec::new();
    file.take(HEADER_WINDOW)
        .read_to_end(&mut header)
        .map_err(|e| inspect_err(path, e))?;
    Ok(header)
}

/// Interpreter path from a `#!` first line.
fn shebang_interpreter(header: &[u8]) -> Option<PathBuf> {
    let rest = header.strip_prefix(b"#!")?;
    let line = rest.split(|b| *b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?;
    line.split_whitespace().next().map(PathBuf::from)
}

fn resolve_interpreter(interpreter: &Path) -> InjectResult<PathBuf> {
    if interpreter.is_absolute() {
        return Ok(interpreter.to_path_buf());
    }
    which::which(interpreter).map_err(|e| inspect_err(interpreter, e))
}

fn inspect_err(path: &Path, reason: impl fmt::Display) -> InjectError {
    InjectError::launch(
        LaunchStage::Inspect,
        format!("{}: {reason}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn elf_header(class: u8) -> Vec<u8> {
        // e_ident plus a zeroed remainder large enough for the ELF header.
        let mut bytes = vec![0u8; 64];
        bytes[..4].copy_from_slice(b"\x7fELF");
        bytes[4] = class;
        bytes[5] = 1;
        bytes[6] = 1;
        bytes
    }

    #[test]
    fn test_word_size_helpers() {
        assert_eq!(WordSize::Bits32.bits(), 32);
        assert_eq!(WordSize::Bits64.other(), WordSize::Bits32);
        assert_eq!(WordSize::Bits64.to_string(), "64-bit");
        assert_eq!(serde_json::to_string(&WordSize::Bits32).unwrap(), "\"32\"");
    }

    #[test]
    fn test_elf_classes() {
        let tmp = TempDir::new().unwrap();
        let elf32 = tmp.path().join("a32");
        let elf64 = tmp.path().join("a64");
        std::fs::write(&elf32, elf_header(1)).unwrap();
        std::fs::write(&elf64, elf_header(2)).unwrap();

        assert_eq!(inspect(&elf32).unwrap(), WordSize::Bits32);
        assert_eq!(inspect(&elf64).unwrap(), WordSize::Bits64);
    }

    #[test]
    fn test_script_uses_interpreter() {
        let tmp = TempDir::new().unwrap();
        let interp = tmp.path().join("interp");
        std::fs::write(&interp, elf_header(1)).unwrap();
        let script = tmp.path().join("run.sh");
        std::fs::write(&script, format!("#!{} -e\necho hi\n", interp.display())).unwrap();

        assert_eq!(inspect(&script).unwrap(), WordSize::Bits32);
    }

    #[test]
    fn test_self_referencing_script_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("loop.sh");
        std::fs::write(&script, format!("#!{}\n", script.display())).unwrap();

        let err = inspect(&script).unwrap_err();
        assert_eq!(err.stage(), Some(LaunchStage::Inspect));
    }

    #[test]
    fn test_non_executable_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let text = tmp.path().join("notes.txt");
        std::fs::write(&text, "just text").unwrap();
        assert!(inspect(&text).is_err());
        assert!(inspect(&tmp.path().join("missing")).is_err());
    }

    #[test]
    fn test_current_exe_matches_host() {
        let exe = std::env::current_exe().unwrap();
        assert_eq!(inspect(&exe).unwrap(), WordSize::host());
    }
}
