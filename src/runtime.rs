//! The C++ runtime library that transpiled programs compile against,
//! embedded so `compile` can drop it next to the generated source.

use std::fs;
use std::io;
use std::path::Path;

pub const RUNTIME_HEADER_NAME: &str = "klox_runtime.h";
pub const RUNTIME_SOURCE_NAME: &str = "klox_runtime.cpp";

pub const RUNTIME_HEADER: &str = include_str!("../runtime/klox_runtime.h");
pub const RUNTIME_SOURCE: &str = include_str!("../runtime/klox_runtime.cpp");

/// Write both runtime files into `dir` (typically the directory holding
/// the generated `.cpp`).
pub fn write_runtime(dir: &Path) -> io::Result<()> {
    fs::write(dir.join(RUNTIME_HEADER_NAME), RUNTIME_HEADER)?;
    fs::write(dir.join(RUNTIME_SOURCE_NAME), RUNTIME_SOURCE)?;
    Ok(())
}
