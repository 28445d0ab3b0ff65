//! Driver for the external elastix/transformix executables.
//!
//! Handles executable discovery, subprocess environment setup, streamed log
//! capture with cancellation, temporary working directories, and the
//! single-pair registration pipeline (elastix, then transformix for the
//! requested outputs).

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::metaimage;
use crate::presets::PresetCatalog;
use crate::settings::{self, EngineSettings};
use crate::transform::Transform;
use crate::volume::Volume;

/// Sink for human-readable progress lines, shared with a UI thread.
pub type LogCallback = Arc<Mutex<dyn FnMut(&str) + Send>>;

/// Directories probed for the elastix executable, relative to the base
/// directory, matching the layouts the engine ships in.
const BIN_DIR_CANDIDATES: &[&str] = &[
    "../../../bin",
    "../../../../bin",
    "../../../../bin/Release",
    "../../../../bin/Debug",
    "../../../../bin/RelWithDebInfo",
    "../../../../bin/MinSizeRel",
];

/// Poll interval for cancellation and process exit while a tool runs.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn elastix_filename() -> &'static str {
    if cfg!(windows) {
        "elastix.exe"
    } else {
        "elastix"
    }
}

pub fn transformix_filename() -> &'static str {
    if cfg!(windows) {
        "transformix.exe"
    } else {
        "transformix"
    }
}

/// One instance of the external registration engine.
pub struct ElastixEngine {
    base_dir: PathBuf,
    parameter_files_dir: PathBuf,
    temp_root: PathBuf,
    /// Resolved (or overridden) binary directory, cached between runs.
    bin_dir: Option<PathBuf>,
    custom_bin_dir: Option<PathBuf>,
    /// Remove per-run working directories once a registration finishes.
    pub delete_temporary_files: bool,
    /// Forward every line of tool output to the log as it arrives. When
    /// off, output is buffered and only surfaced on failure.
    pub log_standard_output: bool,
    log_callback: Option<LogCallback>,
    cancel: CancelToken,
    presets: Option<PresetCatalog>,
}

impl ElastixEngine {
    pub fn new(base_dir: impl Into<PathBuf>, parameter_files_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            parameter_files_dir: parameter_files_dir.into(),
            temp_root: env::temp_dir(),
            bin_dir: None,
            custom_bin_dir: None,
            delete_temporary_files: true,
            log_standard_output: false,
            log_callback: None,
            cancel: CancelToken::new(),
            presets: None,
        }
    }

    /// Like [`ElastixEngine::new`], but applying the persisted settings
    /// (custom binary directory).
    pub fn from_settings(
        base_dir: impl Into<PathBuf>,
        parameter_files_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut engine = Self::new(base_dir, parameter_files_dir);
        engine.custom_bin_dir = settings::load_settings().custom_bin_dir;
        engine
    }

    /// Set and persist a user-chosen binary directory, or clear it to go
    /// back to automatic discovery.
    pub fn set_custom_bin_dir(&mut self, dir: Option<PathBuf>) -> Result<()> {
        self.custom_bin_dir = dir.clone();
        self.bin_dir = None;
        settings::save_settings(&EngineSettings {
            custom_bin_dir: dir,
        })
    }

    /// Override the binary directory for this instance only, bypassing
    /// discovery and persisted settings.
    pub fn set_bin_dir(&mut self, dir: impl Into<PathBuf>) {
        self.bin_dir = Some(dir.into());
    }

    /// Root under which per-run working directories are created.
    pub fn set_temp_root(&mut self, dir: impl Into<PathBuf>) {
        self.temp_root = dir.into();
    }

    pub fn set_log_callback(&mut self, callback: Option<LogCallback>) {
        self.log_callback = callback;
    }

    /// Shared token a caller can hold on to and trigger from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn set_abort_requested(&self, requested: bool) {
        self.cancel.set(requested);
    }

    /// The preset catalog next to the parameter files, loaded once.
    pub fn registration_presets(&mut self) -> Result<&PresetCatalog> {
        let catalog = match self.presets.take() {
            Some(catalog) => catalog,
            None => PresetCatalog::load(&self.parameter_files_dir)?,
        };
        Ok(self.presets.insert(catalog))
    }

    pub(crate) fn add_log(&self, text: &str) {
        log::info!("{text}");
        if let Some(callback) = &self.log_callback {
            if let Ok(mut callback) = callback.lock() {
                (callback)(text);
            }
        }
    }

    /// Directory holding the elastix executable: an instance override, then
    /// the validated custom directory, then the discovery candidates.
    fn resolve_bin_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.bin_dir {
            return Ok(dir.clone());
        }
        let mut searched = Vec::new();
        if let Some(custom) = &self.custom_bin_dir {
            if custom.join(elastix_filename()).is_file() {
                self.bin_dir = Some(custom.clone());
                return Ok(custom.clone());
            }
            searched.push(custom.display().to_string());
        }
        for candidate in BIN_DIR_CANDIDATES {
            let dir = self.base_dir.join(candidate);
            if dir.join(elastix_filename()).is_file() {
                self.bin_dir = Some(dir.clone());
                return Ok(dir);
            }
            searched.push(dir.display().to_string());
        }
        Err(Error::EngineNotFound {
            searched: searched.join("; "),
        })
    }

    /// Command for a tool in the resolved binary directory, with PATH (and
    /// the engine's library directory on non-Windows) prepended.
    fn tool_command(&mut self, tool_filename: &str) -> Result<Command> {
        let bin_dir = self.resolve_bin_dir()?;
        let mut cmd = Command::new(bin_dir.join(tool_filename));
        cmd.env("PATH", prepend_path("PATH", &bin_dir));
        if !cfg!(windows) {
            let lib_dir = bin_dir.join("..").join("lib");
            cmd.env("LD_LIBRARY_PATH", prepend_path("LD_LIBRARY_PATH", &lib_dir));
        }
        Ok(cmd)
    }

    /// Fresh timestamped working directory under the temp root.
    fn create_temp_directory(&self) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let dir = self.temp_root.join("seqreg").join(stamp);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Run a tool to completion, streaming its output. The spawned process
    /// is killed as soon as the cancel token is set; a cancelled run always
    /// returns [`Error::Cancelled`], even when the process manages a clean
    /// exit first.
    fn run_streamed(&self, tool: &str, cmd: &mut Command) -> Result<()> {
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take();
        let verbose = self.log_standard_output;
        let callback = self.log_callback.clone();
        let reader = thread::spawn(move || {
            let mut buffered = String::new();
            if let Some(stdout) = stdout {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if verbose {
                        log::info!("{line}");
                        if let Some(callback) = &callback {
                            if let Ok(mut callback) = callback.lock() {
                                (callback)(&line);
                            }
                        }
                    } else {
                        buffered.push_str(&line);
                        buffered.push('\n');
                    }
                }
            }
            buffered
        });

        let status = loop {
            if self.cancel.is_cancelled() {
                // Kill is idempotent; keep polling until the exit is reaped.
                let _ = child.kill();
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(e.into());
                }
            }
        };
        let buffered = reader.join().unwrap_or_default();

        if self.cancel.is_cancelled() {
            self.add_log(&format!("{tool} was cancelled"));
            return Err(Error::Cancelled);
        }
        if !status.success() {
            if !buffered.is_empty() {
                self.add_log(&buffered);
            }
            return Err(Error::ToolFailed {
                tool: tool.to_string(),
                status: status.code().unwrap_or(-1),
                output: buffered,
            });
        }
        Ok(())
    }

    /// Register `moving` onto `fixed` and collect the requested outputs.
    ///
    /// Both outputs are optional: the resampled moving volume is written
    /// into `output_volume` in place, and `output_transform` receives the
    /// computed displacement-field transform.
    /// Masks restrict the image regions driving the optimization.
    #[allow(clippy::too_many_arguments)]
    pub fn register_volumes(
        &mut self,
        fixed: &Volume,
        moving: &Volume,
        parameter_files: &[PathBuf],
        output_volume: Option<&mut Volume>,
        output_transform: Option<&mut Transform>,
        fixed_mask: Option<&Volume>,
        moving_mask: Option<&Volume>,
    ) -> Result<()> {
        if parameter_files.is_empty() {
            return Err(Error::EmptyPreset);
        }
        // Resolve up front so a configuration problem surfaces before any
        // files are written or processes spawned.
        self.resolve_bin_dir()?;
        let workdir = self.create_temp_directory()?;
        self.add_log(&format!(
            "Volume registration is started in working directory: {}",
            workdir.display()
        ));

        let result = self.run_pair(
            &workdir,
            fixed,
            moving,
            parameter_files,
            output_volume,
            output_transform,
            fixed_mask,
            moving_mask,
        );

        if self.delete_temporary_files {
            if let Err(e) = fs::remove_dir_all(&workdir) {
                log::warn!(
                    "Failed to remove working directory {}: {e}",
                    workdir.display()
                );
            }
        }
        result?;
        self.add_log("Registration is completed");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pair(
        &mut self,
        workdir: &Path,
        fixed: &Volume,
        moving: &Volume,
        parameter_files: &[PathBuf],
        output_volume: Option<&mut Volume>,
        output_transform: Option<&mut Transform>,
        fixed_mask: Option<&Volume>,
        moving_mask: Option<&Volume>,
    ) -> Result<()> {
        let input_dir = workdir.join("input");
        fs::create_dir_all(&input_dir)?;
        let result_transform_dir = workdir.join("result-transform");
        fs::create_dir_all(&result_transform_dir)?;

        let inputs = [
            (Some(fixed), "fixed.mha", "-f"),
            (Some(moving), "moving.mha", "-m"),
            (fixed_mask, "fixedMask.mha", "-fMask"),
            (moving_mask, "movingMask.mha", "-mMask"),
        ];
        let mut elastix_args: Vec<OsString> = Vec::new();
        for (volume, filename, flag) in inputs {
            let Some(volume) = volume else { continue };
            let path = input_dir.join(filename);
            metaimage::write_volume(volume, &path)?;
            elastix_args.push(flag.into());
            elastix_args.push(path.into());
        }
        elastix_args.push("-out".into());
        elastix_args.push(result_transform_dir.clone().into());
        for parameter_file in parameter_files {
            if !parameter_file.is_file() {
                return Err(Error::PresetFileMissing(parameter_file.clone()));
            }
            elastix_args.push("-p".into());
            elastix_args.push(parameter_file.clone().into());
        }

        self.add_log("Register volumes...");
        let mut cmd = self.tool_command(elastix_filename())?;
        cmd.args(&elastix_args);
        self.run_streamed("elastix", &mut cmd)?;

        if output_volume.is_none() && output_transform.is_none() {
            return Ok(());
        }

        let result_resample_dir = workdir.join("result-resample");
        fs::create_dir_all(&result_resample_dir)?;
        let mut transformix_args: Vec<OsString> = vec![
            "-in".into(),
            input_dir.join("moving.mha").into(),
            "-out".into(),
            result_resample_dir.clone().into(),
        ];
        if output_transform.is_some() {
            transformix_args.push("-def".into());
            transformix_args.push("all".into());
        }
        if output_volume.is_some() {
            transformix_args.push("-tp".into());
            transformix_args.push(
                result_transform_dir
                    .join(format!("TransformParameters.{}.txt", parameter_files.len() - 1))
                    .into(),
            );
        }

        self.add_log("Generate output...");
        let mut cmd = self.tool_command(transformix_filename())?;
        cmd.args(&transformix_args);
        self.run_streamed("transformix", &mut cmd)?;

        if let Some(out) = output_volume {
            let loaded = metaimage::read_volume(&result_resample_dir.join("result.mhd"))?;
            out.assign(&loaded);
        }
        if let Some(out) = output_transform {
            let field =
                metaimage::read_displacement_field(&result_resample_dir.join("deformationField.mhd"))?;
            *out = Transform::from_displacement_field(field);
        }
        Ok(())
    }
}

fn prepend_path(var: &str, dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = env::var_os(var) {
        paths.extend(env::split_paths(&existing));
    }
    env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discovery_probes_candidate_directories() {
        let root = TempDir::new().unwrap();
        let base = root.path().join("lib").join("ext").join("mod");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin").join(elastix_filename()), "").unwrap();

        // base/../../../bin resolves to root/bin.
        let mut engine = ElastixEngine::new(&base, root.path());
        let found = engine.resolve_bin_dir().unwrap();
        assert!(found.join(elastix_filename()).is_file());
    }

    #[test]
    fn missing_executable_reports_searched_directories() {
        let root = TempDir::new().unwrap();
        let mut engine = ElastixEngine::new(root.path(), root.path());
        match engine.resolve_bin_dir() {
            Err(Error::EngineNotFound { searched }) => {
                assert!(searched.contains("bin"));
            }
            other => panic!("expected EngineNotFound, got {other:?}"),
        }
    }

    #[test]
    fn instance_override_bypasses_discovery() {
        let root = TempDir::new().unwrap();
        let mut engine = ElastixEngine::new(root.path(), root.path());
        engine.set_bin_dir("/opt/elastix/bin");
        assert_eq!(
            engine.resolve_bin_dir().unwrap(),
            PathBuf::from("/opt/elastix/bin")
        );
    }

    #[test]
    fn prepend_path_puts_directory_first() {
        let joined = prepend_path("SEQREG_TEST_UNSET_VAR", Path::new("/some/bin"));
        let first = env::split_paths(&joined).next().unwrap();
        assert_eq!(first, PathBuf::from("/some/bin"));
    }
}
