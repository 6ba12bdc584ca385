use std::{
    ffi::OsString,
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    application::conversion::{InputHandle, TransformError, Transformer},
    domain::parameters::RequestParameters,
};

const BYTE_ORDER_MARK: char = '\u{feff}';

#[derive(Debug, Error)]
enum CommandError {
    #[error("failed to stage converter files: {0}")]
    Io(io::Error),
    #[error("converter `{command}` unavailable: {source}")]
    NotFound { command: String, source: io::Error },
    #[error("converter exited with status {exit_code:?}: {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("failed to read converted subtitles: {0}")]
    Read(io::Error),
}

/// Runs an external `danmaku2ass`-compatible executable for each job.
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    command: PathBuf,
}

impl CommandTransformer {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn run(&self, input: &InputHandle, params: &RequestParameters) -> Result<String, CommandError> {
        let started_at = Instant::now();

        // Keeps the staged remote document alive until the command exits.
        let staged;
        let input_path: &Path = match input {
            InputHandle::LocalPath(path) => path,
            InputHandle::Text(text) => {
                let mut file = tempfile::Builder::new()
                    .prefix("danmaku-")
                    .suffix(".xml")
                    .tempfile()
                    .map_err(CommandError::Io)?;
                file.write_all(text.as_bytes()).map_err(CommandError::Io)?;
                file.flush().map_err(CommandError::Io)?;
                staged = file;
                staged.path()
            }
        };

        let output_file = tempfile::Builder::new()
            .prefix("danmaku-")
            .suffix(".ass")
            .tempfile()
            .map_err(CommandError::Io)?;

        let output = Command::new(&self.command)
            .args(arguments(output_file.path(), input_path, params))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    CommandError::NotFound {
                        command: self.command.display().to_string(),
                        source: err,
                    }
                } else {
                    CommandError::Io(err)
                }
            })?;

        if !output.status.success() {
            return Err(CommandError::Cli {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let bytes = fs::read(output_file.path()).map_err(CommandError::Read)?;
        let text = String::from_utf8_lossy(&bytes);

        debug!(
            target = "danmaku_gateway::transformer",
            input = input.kind(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = bytes.len(),
            "Converter finished"
        );

        Ok(text.trim_start_matches(BYTE_ORDER_MARK).to_string())
    }
}

impl Transformer for CommandTransformer {
    fn convert(
        &self,
        input: &InputHandle,
        params: &RequestParameters,
    ) -> Result<String, TransformError> {
        self.run(input, params).map_err(|err| {
            warn!(
                target = "danmaku_gateway::transformer",
                command = %self.command.display(),
                input = input.kind(),
                error = %err,
                "Converter invocation failed"
            );
            TransformError::new(err.to_string())
        })
    }
}

fn arguments(output: &Path, input: &Path, params: &RequestParameters) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-o".into(),
        output.into(),
        "-s".into(),
        format!("{}x{}", params.width(), params.height()).into(),
        "-fn".into(),
        params.font_face().into(),
        "-fs".into(),
        params.font_size().to_string().into(),
        "-a".into(),
        params.text_opacity().to_string().into(),
        "-dl".into(),
        params.comment_duration().to_string().into(),
        "-p".into(),
        params.reserve_blank().to_string().into(),
    ];
    if params.reduce_comments() {
        args.push("-r".into());
    }
    args.push(input.into());
    args
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn make_executable(path: &PathBuf) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn params(query: &str) -> RequestParameters {
        RequestParameters::from_query(query).expect("valid parameters")
    }

    fn fake_converter(dir: &TempDir) -> (PathBuf, PathBuf) {
        let script_path = dir.path().join("fake-danmaku2ass");
        let args_path = dir.path().join("args.log");
        let script = format!(
            r#"#!/bin/sh
set -eu
echo "$@" > "{args_file}"
out=""
input=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o)
      shift
      out="$1"
      ;;
    -s|-fn|-fs|-a|-dl|-p)
      shift
      ;;
    -r)
      ;;
    *)
      input="$1"
      ;;
  esac
  shift
done
if [ -z "$out" ] || [ -z "$input" ]; then
  echo "usage: danmaku2ass -o OUT INPUT" >&2
  exit 2
fi
printf '\357\273\277[Script Info]\n' > "$out"
cat "$input" >> "$out"
"#,
            args_file = args_path.display()
        );
        fs::write(&script_path, script).expect("write script");
        make_executable(&script_path);
        (script_path, args_path)
    }

    #[test]
    fn converts_remote_text_through_staged_file() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args_path) = fake_converter(&dir);
        let transformer = CommandTransformer::new(script);

        let output = transformer
            .convert(
                &InputHandle::Text("<i>remote</i>".to_string()),
                &params("url=http://comment.bilibili.tv/1.xml&w=1920&h=1080&r&p=30"),
            )
            .expect("conversion succeeds");

        assert_eq!(output, "[Script Info]\n<i>remote</i>");

        let args = fs::read_to_string(&args_path).expect("read args");
        assert!(args.contains("-s 1920x1080"), "args: {args}");
        assert!(args.contains("-fn SimHei"), "args: {args}");
        assert!(args.contains("-fs 25"), "args: {args}");
        assert!(args.contains("-a 1"), "args: {args}");
        assert!(args.contains("-dl 5"), "args: {args}");
        assert!(args.contains("-p 30"), "args: {args}");
        assert!(args.contains(" -r "), "args: {args}");
        assert!(args.trim_end().ends_with(".xml"), "args: {args}");
    }

    #[test]
    fn local_paths_are_passed_straight_through() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args_path) = fake_converter(&dir);
        let input = dir.path().join("local.xml");
        fs::write(&input, "<i>local</i>").expect("write input");

        let transformer = CommandTransformer::new(script);
        let output = transformer
            .convert(
                &InputHandle::LocalPath(input.clone()),
                &params("url=file:///ignored&w=1&h=1"),
            )
            .expect("conversion succeeds");

        assert_eq!(output, "[Script Info]\n<i>local</i>");
        let args = fs::read_to_string(&args_path).expect("read args");
        assert!(!args.contains(" -r "), "args: {args}");
        assert!(
            args.trim_end().ends_with(&input.display().to_string()),
            "args: {args}"
        );
    }

    #[test]
    fn surfaces_cli_errors() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = dir.path().join("fake-danmaku2ass");
        fs::write(
            &script_path,
            r#"#!/bin/sh
echo "invalid comment file" >&2
exit 42
"#,
        )
        .expect("write script");
        make_executable(&script_path);

        let err = CommandTransformer::new(script_path)
            .convert(
                &InputHandle::Text(String::new()),
                &params("url=http://comment.bilibili.tv/1.xml&w=1&h=1"),
            )
            .expect_err("expected cli failure");

        let message = err.to_string();
        assert!(message.contains("42"), "{message}");
        assert!(message.contains("invalid comment file"), "{message}");
    }

    #[test]
    fn missing_command_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let err = CommandTransformer::new(dir.path().join("does-not-exist"))
            .convert(
                &InputHandle::Text(String::new()),
                &params("url=http://comment.bilibili.tv/1.xml&w=1&h=1"),
            )
            .expect_err("missing executable");

        assert!(err.to_string().contains("unavailable"));
    }
}
