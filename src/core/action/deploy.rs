use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::builder::{BuildOutcome, BuildRequest};
use crate::config::Config;
use crate::error::Result;
use crate::events::Event;
use crate::summary::{SummaryMap, SummaryStats};
use crate::task::TaskContext;
use crate::task_builder::{task_builder_for, DeployParams};
use crate::utils::io;

use super::{Action, ActionStage, Deployment};

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Build directory; defaults to `build.directory`, then a temp dir named after the deployment.
    pub build_dir: Option<PathBuf>,
    /// Bundle archive path; defaults to `bundle.tar.gz` inside the build directory.
    pub bundle_file: Option<PathBuf>,
    /// Remove the build directory once every host has reported.
    pub clean: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub deployment_tag: String,
    pub sites: Vec<String>,
    pub build_location: PathBuf,
    pub bundle_path: PathBuf,
    pub build: BuildOutcome,
    pub summary: SummaryMap,
    pub stats: SummaryStats,
    pub has_errors: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Action {
    /// Build the bundle once, then deploy it to every server of `sites`
    /// (all configured sites when empty).
    ///
    /// Hosts that fail are reported in the summary; only a build or archive
    /// failure, or having no reachable server at all, is an `Err`.
    pub fn deploy(&self, deployment: &Deployment, sites: &[String], options: &DeployOptions) -> Result<DeployReport> {
        let result = self.run_deploy(deployment, sites, options);
        self.finish(result)
    }

    fn run_deploy(&self, deployment: &Deployment, sites: &[String], options: &DeployOptions) -> Result<DeployReport> {
        deployment.validate()?;
        let config = self.config.as_ref();
        let site_names = config.resolve_sites(sites)?;
        let build_location = build_location(config, options, deployment);
        let bundle_path = options
            .bundle_file
            .clone()
            .unwrap_or_else(|| build_location.join("bundle.tar.gz"));

        log_status!("action", "Deployment Tag: {}", deployment.tag);
        log_status!("action", "Build Location: {}", build_location.display());
        log_status!("action", "Bundle Path: {}", bundle_path.display());

        self.transition(ActionStage::Building);
        let request = BuildRequest::from_config(config, build_location.clone(), bundle_path.clone());
        let before_building = || {
            self.events.publish(Event::BeforeBuilding {
                deployment_tag: deployment.tag.clone(),
            })
        };
        let build = self.builder.build_app(&request, &before_building, &self.events)?;

        log_status!("action", "Connecting to the servers...");
        self.events.publish(Event::BeforeDeploying {
            deployment_tag: deployment.tag.clone(),
        });

        let check_delay = Duration::from_secs(config.deploy.check_delay);
        let summary = self.execute_sites(&site_names, |_, os, entry| {
            let tasks = task_builder_for(os).deploy(&DeployParams {
                config,
                app_name: &config.app.name,
                bundle_path: &bundle_path,
                env: &entry.env,
                check_delay,
                deployment_tag: &deployment.tag,
            });
            (tasks, TaskContext::default())
        })?;

        let has_errors = summary.has_errors();
        self.events.publish(Event::AfterDeployed {
            deployment_tag: deployment.tag.clone(),
            has_errors,
        });

        let mut warnings = Vec::new();
        if options.clean {
            log_status!("action", "Cleaning up {}", build_location.display());
            if let Err(err) = io::remove_dir(&build_location, "clean build location") {
                warnings.push(format!("Cleanup of {} failed: {}", build_location.display(), err.message));
            }
        }

        let stats = summary.summarize();
        Ok(DeployReport {
            deployment_tag: deployment.tag.clone(),
            sites: site_names,
            build_location,
            bundle_path,
            build,
            summary,
            stats,
            has_errors,
            warnings,
        })
    }
}

fn build_location(config: &Config, options: &DeployOptions, deployment: &Deployment) -> PathBuf {
    options
        .build_dir
        .clone()
        .or_else(|| config.build.directory.clone())
        .unwrap_or_else(|| std::env::temp_dir().join(format!("{}-{}", config.app.name, deployment.tag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigFormat};
    use std::path::Path;

    fn config(build_dir: Option<&str>) -> Config {
        let build = build_dir
            .map(|d| format!(r#", "build": {{ "directory": "{}" }}"#, d))
            .unwrap_or_default();
        let json = format!(
            r#"{{ "app": {{ "name": "shop", "directory": "/src/shop" }}, "sites": {{ "prod": {{ "servers": [] }} }}{} }}"#,
            build
        );
        config::parse(&json, ConfigFormat::Json, "test.json", Path::new("/")).unwrap()
    }

    #[test]
    fn build_location_precedence() {
        let deployment = Deployment::new(Some("v7".to_string()));
        let explicit = DeployOptions {
            build_dir: Some(PathBuf::from("/work/build")),
            ..Default::default()
        };

        assert_eq!(
            build_location(&config(Some("/cfg/build")), &explicit, &deployment),
            PathBuf::from("/work/build")
        );
        assert_eq!(
            build_location(&config(Some("/cfg/build")), &DeployOptions::default(), &deployment),
            PathBuf::from("/cfg/build")
        );
        assert_eq!(
            build_location(&config(None), &DeployOptions::default(), &deployment),
            std::env::temp_dir().join("shop-v7")
        );
    }
}
