//! Command lines for the raster conversion utility (`gdal_translate`).

use crate::config::CREATION_OPTION_FLAG;
use crate::perf::ToolCommand;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

/// Creation options for an uncompressed, untiled copy.
pub const UNCOMPRESSED_OPTIONS: [&str; 2] = ["TILED=NO", "COMPRESS=NONE"];

/// Keeps source overviews out of the baseline.
pub const NO_OVERVIEWS_OPTION: &str = "COPY_SRC_OVERVIEWS=NO";

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("conversion exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

#[derive(Debug, Clone)]
pub struct Translator {
    program: PathBuf,
}

impl Translator {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self { program: program.into() }
    }

    fn command(&self, src: &Path, dst: &Path) -> ToolCommand {
        ToolCommand::new(&self.program).arg("-q").arg(src).arg(dst)
    }

    /// Uncompressed copy of a source raster, shared by all write trials.
    pub fn baseline_command(&self, src: &Path, dst: &Path) -> ToolCommand {
        let mut cmd = self.command(src, dst);
        for option in UNCOMPRESSED_OPTIONS.iter().chain([&NO_OVERVIEWS_OPTION]) {
            cmd = cmd.arg(CREATION_OPTION_FLAG).arg(option);
        }
        cmd
    }

    /// Compresses `src` into `dst` with the given creation arguments.
    pub fn write_command(&self, src: &Path, dst: &Path, creation_args: &[String]) -> ToolCommand {
        self.command(src, dst).args(creation_args)
    }

    /// Decompresses `src` into an uncompressed scratch file.
    pub fn read_command(&self, src: &Path, dst: &Path) -> ToolCommand {
        let mut cmd = self.command(src, dst);
        for option in UNCOMPRESSED_OPTIONS {
            cmd = cmd.arg(CREATION_OPTION_FLAG).arg(option);
        }
        cmd
    }

    /// Runs a conversion once, untimed.
    pub fn run(&self, cmd: &ToolCommand) -> Result<(), ConvertError> {
        tracing::debug!(command = %cmd, "running conversion");
        let output = cmd.to_command().output().map_err(|source| ConvertError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ConvertError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
