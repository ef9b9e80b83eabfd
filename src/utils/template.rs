//! String template rendering utilities.

use std::collections::BTreeMap;

pub struct TemplateVars;

impl TemplateVars {
    pub const APP_NAME: &'static str = "appName";
    pub const APP_ROOT: &'static str = "appRoot";
    pub const BUNDLE_PATH: &'static str = "bundlePath";
    pub const CHECK_DELAY: &'static str = "checkDelay";
    pub const DEPLOY_TAG: &'static str = "deployTag";
    pub const PORT: &'static str = "port";
    pub const EMAIL: &'static str = "email";
    pub const DOMAIN: &'static str = "domain";
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

pub fn render_map(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
