//! Local application build and bundle archiving.
//!
//! The build runs as blocking subprocesses before any remote work. Output
//! from the toolchain goes to stderr so stdout stays reserved for the JSON
//! response.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{BuildPaths, Event, EventBus};
use crate::ssh::execute_local_command_passthrough;
use crate::summary::Vars;
use crate::utils::{io, shell};

/// Environment variable carrying the build directory to the build command.
pub const BUILD_LOCATION_VAR: &str = "BUILD_LOCATION";

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub app_name: String,
    pub app_dir: PathBuf,
    pub build_location: PathBuf,
    pub bundle_path: PathBuf,
    pub binary: String,
    /// Passed to every build subprocess; never written to this process's environment.
    pub env: Vars,
    pub architecture: Option<String>,
    pub server: Option<String>,
    pub gzip_level: u32,
}

impl BuildRequest {
    pub fn from_config(config: &Config, build_location: PathBuf, bundle_path: PathBuf) -> Self {
        Self {
            app_name: config.app.name.clone(),
            app_dir: config.app.directory.clone(),
            build_location,
            bundle_path,
            binary: config.builder.binary.clone(),
            env: config.builder.env.clone(),
            architecture: config.build.architecture.clone(),
            server: config.build.server.clone(),
            gzip_level: config.build.gzip_level,
        }
    }

    fn paths(&self) -> BuildPaths {
        BuildPaths {
            bundle_path: self.bundle_path.clone(),
            build_location: self.build_location.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildOutcome {
    Built,
    /// An artifact was already present at the bundle path.
    Reused,
}

pub trait Builder: Send + Sync {
    /// Produce the bundle archive described by `request`.
    ///
    /// Returns without rebuilding when the archive already exists.
    /// `on_start` runs once, right before the first build command.
    fn build_app(&self, request: &BuildRequest, on_start: &dyn Fn(), events: &EventBus) -> Result<BuildOutcome>;
}

/// Builds with the configured toolchain binary and archives with `tar`/`gzip`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppBuilder;

impl Builder for AppBuilder {
    fn build_app(&self, request: &BuildRequest, on_start: &dyn Fn(), events: &EventBus) -> Result<BuildOutcome> {
        if request.bundle_path.exists() {
            log_status!("build", "Found existing bundle file: {}", request.bundle_path.display());
            return Ok(BuildOutcome::Reused);
        }

        if request.binary != "meteor" {
            log_status!("build", "Using build binary: {}", request.binary);
        }
        log_status!("build", "Building started: {}", request.app_name);
        events.publish(Event::BuildStarted(request.paths()));
        on_start();

        if let Err(err) = run_build_steps(request) {
            log_status!("build", "Build error. Check the logs printed above.");
            events.publish(Event::Fail {
                message: err.message.clone(),
            });
            return Err(err);
        }
        log_status!("build", "Build succeeded");
        events.publish(Event::BuildFinished(request.paths()));

        events.publish(Event::ArchiveStarted(request.paths()));
        if let Err(err) = archive_bundle(request) {
            log_status!("archive", "Archiving failed: {}", err.message);
            events.publish(Event::Fail {
                message: err.message.clone(),
            });
            return Err(err);
        }
        events.publish(Event::ArchiveFinished(request.paths()));
        events.publish(Event::Finished(request.paths()));

        Ok(BuildOutcome::Built)
    }
}

fn run_build_steps(request: &BuildRequest) -> Result<()> {
    let binary = shell::quote_arg(&request.binary);
    let env: Vec<(&str, &str)> = request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    // Native modules are always rebuilt; their binary format depends on the build host.
    if request.app_dir.join("package.json").exists() {
        run_step(request, &format!("{} npm install", binary), &env)?;
        run_step(request, &format!("{} npm rebuild", binary), &env)?;
    }

    if request.app_dir.join("typings.json").exists() {
        run_step(request, "typings install", &env)?;
    }

    let location = request.build_location.to_string_lossy().to_string();
    let mut command = format!("{} build --directory {}", binary, shell::quote_path(&location));
    if let Some(arch) = &request.architecture {
        command.push_str(&format!(" --architecture {}", shell::quote_arg(arch)));
    }
    if let Some(server) = &request.server {
        command.push_str(&format!(" --server {}", shell::quote_arg(server)));
    }

    let mut build_env = env.clone();
    build_env.push((BUILD_LOCATION_VAR, location.as_str()));
    run_step(request, &command, &build_env)
}

fn run_step(request: &BuildRequest, command: &str, env: &[(&str, &str)]) -> Result<()> {
    log_status!("build", "Running: {}", command);
    let output = execute_local_command_passthrough(command, Some(&request.app_dir), Some(env));
    if output.success {
        return Ok(());
    }
    Err(Error::deploy_build_failed(
        command,
        output.exit_code,
        request.build_location.display().to_string(),
    ))
}

/// Pack `<build_location>/bundle` as a top-level `bundle/` directory.
fn archive_bundle(request: &BuildRequest) -> Result<()> {
    let bundle_display = request.bundle_path.display().to_string();
    let location_display = request.build_location.display().to_string();
    let archive_error = |error: String| Error::deploy_archive_failed(&bundle_display, &location_display, error);

    let source = request.build_location.join("bundle");
    if !source.is_dir() {
        return Err(archive_error(format!("Bundle directory missing: {}", source.display())));
    }

    if let Some(parent) = request.bundle_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        io::ensure_dir(parent, "create bundle directory").map_err(|e| archive_error(e.message))?;
    }

    log_status!("archive", "Creating tar bundle at: {}", bundle_display);
    let staging = staging_path(&request.bundle_path);
    let staging = shell::quote_path(&staging.to_string_lossy());
    let command = format!(
        "tar -cf {staging} -C {location} bundle && gzip -{level} -c {staging} > {bundle} && rm -f {staging}",
        staging = staging,
        location = shell::quote_path(&location_display),
        level = request.gzip_level,
        bundle = shell::quote_path(&bundle_display),
    );

    let output = execute_local_command_passthrough(&command, None, None);
    if !output.success {
        // Leave no partial artifact behind; it would be reused by the next run.
        let _ = std::fs::remove_file(&request.bundle_path);
        return Err(archive_error(format!("archive command exited with {}", output.exit_code)));
    }
    Ok(())
}

fn staging_path(bundle_path: &Path) -> PathBuf {
    let mut name = bundle_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial.tar");
    bundle_path.with_file_name(name)
}
