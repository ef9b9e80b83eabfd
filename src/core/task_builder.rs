//! OS-specific task sequences for each named operation.
//!
//! Builders are stateless factories: every input comes in through the call,
//! and nothing happens until the returned tasks run against a session.

use std::path::Path;
use std::time::Duration;

use crate::config::{Config, SiteConfig};
use crate::os::OsTag;
use crate::session::ScriptRef;
use crate::summary::Vars;
use crate::task::{sync, CommandTask, DelayTask, ScriptTask, Task, TaskList, UploadTask};
use crate::utils::shell;
use crate::utils::template::{self, TemplateVars};

/// Variable exported by the deploy sequence so `verify.sh` can name the
/// release it reverts to.
pub const PREVIOUS_RELEASE_VAR: &str = "previousRelease";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOp {
    Start,
    Stop,
    Restart,
}

impl ServiceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceOp::Start => "start",
            ServiceOp::Stop => "stop",
            ServiceOp::Restart => "restart",
        }
    }
}

/// Inputs to the deploy sequence for one host.
pub struct DeployParams<'a> {
    pub config: &'a Config,
    pub app_name: &'a str,
    /// Local path of the bundle archive.
    pub bundle_path: &'a Path,
    /// Application environment already resolved for the host.
    pub env: &'a Vars,
    pub check_delay: Duration,
    pub deployment_tag: &'a str,
}

pub trait TaskBuilder: Send + Sync {
    fn os(&self) -> OsTag;

    fn tail_command(&self, app_name: &str, follow: bool) -> String;

    fn service_command(&self, app_name: &str, op: ServiceOp) -> String;

    fn script(&self, config: &Config, name: &str) -> ScriptRef {
        ScriptRef {
            name: format!("{}/{}", self.os(), name),
            path: config
                .scripts
                .as_ref()
                .map(|root| root.join(self.os().as_str()).join(name)),
            builtin: builtin_script(self.os(), name),
        }
    }

    /// upload bundle → write env file → deploy.sh → settle → verify.sh
    fn deploy(&self, params: &DeployParams) -> TaskList {
        let config = params.config;
        let app_root = app_root(config, params.app_name);
        let remote_bundle = format!("{}/tmp/bundle.tar.gz", app_root);

        let mut vars = Vars::new();
        vars.insert(TemplateVars::APP_NAME.to_string(), params.app_name.to_string());
        vars.insert(TemplateVars::APP_ROOT.to_string(), app_root.clone());
        vars.insert(TemplateVars::BUNDLE_PATH.to_string(), remote_bundle.clone());
        vars.insert(TemplateVars::DEPLOY_TAG.to_string(), params.deployment_tag.to_string());
        vars.insert(TemplateVars::PORT.to_string(), config.app.port.to_string());
        vars.insert(
            TemplateVars::CHECK_DELAY.to_string(),
            params.check_delay.as_secs().to_string(),
        );

        TaskList::new("deploy")
            .add(
                CommandTask::new(
                    "read release",
                    format!("cat {} 2>/dev/null || true", shell::quote_path(&format!("{}/config/release", app_root))),
                )
                .capture_as(PREVIOUS_RELEASE_VAR),
            )
            .add(UploadTask::new("upload bundle", params.bundle_path, remote_bundle))
            .add(CommandTask::new("write env", env_file_command(&app_root, params.env)))
            .add(ScriptTask::new("deploy", self.script(config, "deploy.sh"), vars.clone()))
            .add(DelayTask::new("check delay", params.check_delay))
            .add(ScriptTask::new("verify", self.script(config, "verify.sh"), vars))
    }

    fn logs(&self, config: &Config, follow: bool) -> TaskList {
        TaskList::new("logs").add(CommandTask::new("tail", self.tail_command(&config.app.name, follow)))
    }

    /// Directories, runtime, service definition, then certificates when the
    /// site asks for them.
    fn setup(&self, config: &Config, site: &SiteConfig) -> TaskList {
        let app_name = &config.app.name;
        let mut vars = Vars::new();
        vars.insert(TemplateVars::APP_NAME.to_string(), app_name.clone());
        vars.insert(TemplateVars::APP_ROOT.to_string(), app_root(config, app_name));
        vars.insert(TemplateVars::PORT.to_string(), config.app.port.to_string());

        let list = TaskList::new("setup").add(ScriptTask::new("setup", self.script(config, "setup.sh"), vars.clone()));

        match &site.ssl {
            Some(ssl) => {
                vars.insert(TemplateVars::EMAIL.to_string(), ssl.email.clone());
                vars.insert(TemplateVars::DOMAIN.to_string(), ssl.domain.clone());
                let steps: Vec<Box<dyn Task>> = vec![
                    Box::new(ScriptTask::new(
                        "certbot install",
                        self.script(config, "certbot/install.sh"),
                        vars.clone(),
                    )),
                    Box::new(ScriptTask::new(
                        "certbot genssl",
                        self.script(config, "certbot/genssl.sh"),
                        vars,
                    )),
                ];
                list.add(sync("certbot", steps))
            }
            None => list,
        }
    }

    fn service(&self, config: &Config, op: ServiceOp) -> TaskList {
        TaskList::new(op.as_str()).add(CommandTask::new(
            op.as_str(),
            self.service_command(&config.app.name, op),
        ))
    }
}

/// Upstart-managed hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxTaskBuilder;

impl TaskBuilder for LinuxTaskBuilder {
    fn os(&self) -> OsTag {
        OsTag::Linux
    }

    fn tail_command(&self, app_name: &str, follow: bool) -> String {
        tail(&format!("/var/log/upstart/{}.log", app_name), follow)
    }

    fn service_command(&self, app_name: &str, op: ServiceOp) -> String {
        template::render("sudo {{op}} {{appName}}", &[("op", op.as_str()), (TemplateVars::APP_NAME, app_name)])
    }
}

/// SMF-managed hosts (Solaris, SmartOS, illumos).
#[derive(Debug, Default, Clone, Copy)]
pub struct SunOsTaskBuilder;

impl TaskBuilder for SunOsTaskBuilder {
    fn os(&self) -> OsTag {
        OsTag::SunOs
    }

    fn tail_command(&self, app_name: &str, follow: bool) -> String {
        tail(&format!("/var/svc/log/site-{}\\:default.log", app_name), follow)
    }

    fn service_command(&self, app_name: &str, op: ServiceOp) -> String {
        let verb = match op {
            ServiceOp::Start => "enable",
            ServiceOp::Stop => "disable",
            ServiceOp::Restart => "restart",
        };
        template::render(
            "sudo svcadm {{verb}} site-{{appName}}",
            &[("verb", verb), (TemplateVars::APP_NAME, app_name)],
        )
    }
}

static LINUX: LinuxTaskBuilder = LinuxTaskBuilder;
static SUNOS: SunOsTaskBuilder = SunOsTaskBuilder;

pub fn task_builder_for(os: OsTag) -> &'static dyn TaskBuilder {
    match os {
        OsTag::Linux => &LINUX,
        OsTag::SunOs => &SUNOS,
    }
}

fn app_root(config: &Config, app_name: &str) -> String {
    format!("{}/{}", config.app.deploy_root.trim_end_matches('/'), app_name)
}

fn tail(log_path: &str, follow: bool) -> String {
    if follow {
        format!("sudo tail -f {}", log_path)
    } else {
        format!("sudo tail {}", log_path)
    }
}

/// Shell command that writes `env` as `export` lines to the app's env file.
fn env_file_command(app_root: &str, env: &Vars) -> String {
    let lines: Vec<String> = env
        .iter()
        .filter_map(|(name, value)| shell::export_line(name, value))
        .map(|line| shell::quote_arg(&line))
        .collect();
    let target = shell::quote_path(&format!("{}/config/env.sh", app_root));
    if lines.is_empty() {
        format!(": > {}", target)
    } else {
        format!("printf '%s\\n' {} > {}", lines.join(" "), target)
    }
}

fn builtin_script(os: OsTag, name: &str) -> Option<&'static str> {
    let source = match (os, name) {
        (OsTag::Linux, "setup.sh") => include_str!("../../scripts/linux/setup.sh"),
        (OsTag::Linux, "deploy.sh") => include_str!("../../scripts/linux/deploy.sh"),
        (OsTag::Linux, "verify.sh") => include_str!("../../scripts/linux/verify.sh"),
        (OsTag::Linux, "certbot/install.sh") => include_str!("../../scripts/linux/certbot/install.sh"),
        (OsTag::Linux, "certbot/genssl.sh") => include_str!("../../scripts/linux/certbot/genssl.sh"),
        (OsTag::SunOs, "setup.sh") => include_str!("../../scripts/sunos/setup.sh"),
        (OsTag::SunOs, "deploy.sh") => include_str!("../../scripts/sunos/deploy.sh"),
        (OsTag::SunOs, "verify.sh") => include_str!("../../scripts/sunos/verify.sh"),
        (OsTag::SunOs, "certbot/install.sh") => include_str!("../../scripts/sunos/certbot/install.sh"),
        (OsTag::SunOs, "certbot/genssl.sh") => include_str!("../../scripts/sunos/certbot/genssl.sh"),
        _ => return None,
    };
    Some(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigFormat, SslConfig};
    use std::path::PathBuf;

    fn config() -> Config {
        let json = r#"{
            "app": { "name": "shop", "directory": "/src/shop", "port": 3000 },
            "sites": { "prod": { "servers": [ { "host": "web-1" } ] } }
        }"#;
        config::parse(json, ConfigFormat::Json, "test.json", Path::new("/")).unwrap()
    }

    #[test]
    fn tail_commands_per_os() {
        assert_eq!(
            task_builder_for(OsTag::Linux).tail_command("shop", false),
            "sudo tail /var/log/upstart/shop.log"
        );
        assert_eq!(
            task_builder_for(OsTag::SunOs).tail_command("shop", true),
            "sudo tail -f /var/svc/log/site-shop\\:default.log"
        );
    }

    #[test]
    fn service_commands_per_os() {
        assert_eq!(
            task_builder_for(OsTag::Linux).service_command("shop", ServiceOp::Restart),
            "sudo restart shop"
        );
        assert_eq!(
            task_builder_for(OsTag::SunOs).service_command("shop", ServiceOp::Start),
            "sudo svcadm enable site-shop"
        );
        assert_eq!(
            task_builder_for(OsTag::SunOs).service_command("shop", ServiceOp::Stop),
            "sudo svcadm disable site-shop"
        );
    }

    #[test]
    fn dispatch_covers_every_os() {
        for os in OsTag::ALL {
            assert_eq!(task_builder_for(os).os(), os);
        }
    }

    #[test]
    fn deploy_sequence_order() {
        let config = config();
        let env = Vars::new();
        let list = task_builder_for(OsTag::Linux).deploy(&DeployParams {
            config: &config,
            app_name: "shop",
            bundle_path: Path::new("/tmp/shop/bundle.tar.gz"),
            env: &env,
            check_delay: Duration::ZERO,
            deployment_tag: "v1",
        });
        assert_eq!(
            list.task_names(),
            vec!["read release", "upload bundle", "write env", "deploy", "check delay", "verify"]
        );
    }

    #[test]
    fn setup_adds_certbot_only_with_ssl() {
        let mut config = config();
        let builder = task_builder_for(OsTag::Linux);

        let plain = builder.setup(&config, config.site("prod").unwrap());
        assert_eq!(plain.task_names(), vec!["setup"]);

        config.sites.get_mut("prod").unwrap().ssl = Some(SslConfig {
            email: "ops@example.com".to_string(),
            domain: "shop.example.com".to_string(),
        });
        let with_ssl = builder.setup(&config, config.site("prod").unwrap());
        assert_eq!(with_ssl.task_names(), vec!["setup", "certbot"]);
    }

    #[test]
    fn scripts_resolve_under_os_directory() {
        let mut config = config();
        config.scripts = Some(PathBuf::from("/etc/shop/scripts"));

        let script = task_builder_for(OsTag::SunOs).script(&config, "certbot/genssl.sh");

        assert_eq!(script.name, "sunos/certbot/genssl.sh");
        assert_eq!(
            script.path,
            Some(PathBuf::from("/etc/shop/scripts/sunos/certbot/genssl.sh"))
        );
        assert!(script.builtin.unwrap().contains("certbot certonly"));
    }

    #[test]
    fn builtin_scripts_read_bindings_as_variables() {
        let names = ["setup.sh", "deploy.sh", "verify.sh", "certbot/install.sh", "certbot/genssl.sh"];
        for os in OsTag::ALL {
            for name in names {
                let source = builtin_script(os, name).unwrap();
                assert!(!source.contains("{{"), "{}/{} embeds a placeholder", os, name);
            }
        }
    }

    #[test]
    fn env_file_exports_every_variable() {
        let mut env = Vars::new();
        env.insert("ROOT_URL".to_string(), "https://shop.example.com".to_string());
        env.insert("QUOTE".to_string(), "it's".to_string());

        let command = env_file_command("/opt/shop", &env);

        assert!(command.starts_with("printf '%s\\n' "));
        assert!(command.contains("ROOT_URL"));
        assert!(command.ends_with("> '/opt/shop/config/env.sh'"));
        assert_eq!(env_file_command("/opt/shop", &Vars::new()), ": > '/opt/shop/config/env.sh'");
    }
}
