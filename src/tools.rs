//! Invocation of external command-line tools (bundler, font converters).

use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};

use camino::Utf8Path;
use thiserror::Error;

/// Errors that can occur when running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program is not installed or not on `PATH`.
    #[error("'{0}' was not found on PATH: {1}")]
    NotFound(String, which::Error),

    /// A conversion template has no program.
    #[error("Empty command template")]
    EmptyTemplate,

    /// An I/O error occurred during process execution.
    #[error("IO error while running '{0}': {1}")]
    Io(String, std::io::Error),

    /// The program returned a non-zero exit code.
    #[error("'{program}' failed ({status}):\n{stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Runs `program` with `args`, feeding `stdin` if given, and returns its
/// standard output.
pub fn run(program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<Vec<u8>, ToolError> {
    let path = which::which(program).map_err(|e| ToolError::NotFound(program.to_string(), e))?;
    let io_err = |e| ToolError::Io(program.to_string(), e);

    tracing::debug!(program, ?args, "running external tool");

    let mut child = Command::new(path)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(io_err)?;

    // A program that exits early breaks the pipe; its status and stderr
    // take precedence over the write error.
    let written = match (stdin, child.stdin.take()) {
        (Some(data), Some(mut pipe)) => pipe.write_all(data),
        _ => Ok(()),
    };

    let output = child.wait_with_output().map_err(io_err)?;

    if output.status.success() {
        written.map_err(io_err)?;
    } else {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output.stdout)
}

/// Expands `{input}` and `{output}` in a command template, returning the
/// program and its arguments.
pub fn expand<'a>(
    template: &'a [String],
    input: &Utf8Path,
    output: &Utf8Path,
) -> Result<(&'a str, Vec<String>), ToolError> {
    let (program, args) = template.split_first().ok_or(ToolError::EmptyTemplate)?;

    let args = args
        .iter()
        .map(|arg| {
            arg.replace("{input}", input.as_str())
                .replace("{output}", output.as_str())
        })
        .collect();

    Ok((program, args))
}

/// Runs a conversion template from `input` to `output`.
pub fn convert(template: &[String], input: &Utf8Path, output: &Utf8Path) -> Result<(), ToolError> {
    let (program, args) = expand(template, input, output)?;
    run(program, &args, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_template() {
        let template = ["fonttools", "compress", "-o", "{output}", "{input}"].map(String::from);
        let (program, args) = expand(
            &template,
            Utf8Path::new("src/fonts/convert_fonts/a.ttf"),
            Utf8Path::new("src/fonts/a.woff2"),
        )
        .unwrap();

        assert_eq!(program, "fonttools");
        assert_eq!(
            args,
            vec![
                "compress",
                "-o",
                "src/fonts/a.woff2",
                "src/fonts/convert_fonts/a.ttf"
            ]
        );
    }

    #[test]
    fn test_expand_inline_placeholder() {
        let template = ["pyftsubset", "{input}", "--output-file={output}"].map(String::from);
        let (_, args) = expand(&template, Utf8Path::new("a.ttf"), Utf8Path::new("a.woff")).unwrap();
        assert_eq!(args, vec!["a.ttf", "--output-file=a.woff"]);
    }

    #[test]
    fn test_empty_template() {
        let result = expand(&[], Utf8Path::new("a"), Utf8Path::new("b"));
        assert!(matches!(result, Err(ToolError::EmptyTemplate)));
    }

    #[cfg(unix)]
    #[test]
    fn test_early_exit_reports_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("reject");
        std::fs::write(&program, "#!/bin/sh\necho 'unexpected token' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Far more than a pipe buffer, so the write outlives the program.
        let input = vec![b'a'; 8 << 20];
        let result = run(program.to_str().unwrap(), &[], Some(&input));

        match result {
            Err(ToolError::Failed { status, stderr, .. }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr.trim(), "unexpected token");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let result = run("nagare-definitely-not-installed", &[], None);
        assert!(matches!(result, Err(ToolError::NotFound(..))));
    }
}
