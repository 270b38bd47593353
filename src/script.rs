//! Rendering of harvested commands, either straight to the terminal or as
//! an executable shell script.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// Optional scaffolding for the generated script.
#[derive(Debug, Default)]
pub struct ScriptOptions {
    /// Text block inserted after the header, before the commands.
    pub before: Option<String>,
    /// Interpreter (or its directory) to prepend to `PATH`.
    pub python_path: Option<PathBuf>,
}

/// Writes one `<command>  # <job id>` line per pair, collapsing adjacent
/// duplicates by command text.
pub fn render_commands<W: Write>(out: &mut W, commands: &[(String, u64)]) -> io::Result<()> {
    let mut last: Option<&str> = None;
    for (command, job_id) in commands {
        if last == Some(command.as_str()) {
            continue;
        }
        writeln!(out, "{command}  # {job_id}")?;
        last = Some(command);
    }
    Ok(())
}

/// Renders the full script body: shebang, provenance comment, optional
/// preamble, optional `PATH` line, then the command lines.
pub fn render_script<W: Write>(
    out: &mut W,
    pull_url: &str,
    options: &ScriptOptions,
    commands: &[(String, u64)],
) -> io::Result<()> {
    writeln!(out, "#!/bin/bash\n\n# Failed tests for {pull_url}\n")?;
    if let Some(before) = options.before.as_deref().filter(|text| !text.is_empty()) {
        writeln!(out, "{before}\n")?;
    }
    if let Some(python) = &options.python_path {
        writeln!(out, "export PATH={}:$PATH\n", interpreter_dir(python).display())?;
    }
    render_commands(out, commands)
}

/// Writes the script to disk and sets the owner-executable bit.
pub fn write_script(
    path: &Path,
    pull_url: &str,
    options: &ScriptOptions,
    commands: &[(String, u64)],
) -> Result<()> {
    let mut buffer = Vec::new();
    render_script(&mut buffer, pull_url, options, commands)?;
    std::fs::write(path, &buffer)
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o100);
        std::fs::set_permissions(path, permissions)
            .with_context(|| format!("failed to mark {} executable", path.display()))?;
    }

    Ok(())
}

/// A `--python` argument may name the interpreter itself or its directory;
/// the `PATH` entry always uses the directory.
fn interpreter_dir(python: &Path) -> PathBuf {
    if python.is_dir() {
        python.to_path_buf()
    } else {
        python.parent().unwrap_or(Path::new(".")).to_path_buf()
    }
}

/// Finds the directory of the first `python3`/`python` on `PATH`, for
/// pinning the current interpreter into the script.
pub fn default_python_dir() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for name in ["python3", "python"] {
            if dir.join(name).is_file() {
                return Some(dir);
            }
        }
    }
    None
}
