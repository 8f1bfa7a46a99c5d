// spf-net/src/user_agent.rs
use std::env;

use serde::Serialize;

const CI_VARIABLES: &[&str] = &["BUILD_BUILDID", "BUILD_ID", "CI", "SPF_IS_CI"];

#[derive(Debug, Serialize)]
struct Named {
    name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct UserAgentData {
    installer: Named,
    implementation: Named,
    system: Named,
    cpu: &'static str,
    /// `null` when no CI marker is set.
    ci: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<String>,
}

/// Whether any well-known CI marker variable is present.
pub fn looks_like_ci_with<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    CI_VARIABLES.iter().any(|name| lookup(name).is_some())
}

pub fn looks_like_ci() -> bool {
    looks_like_ci_with(|name| env::var(name).ok())
}

/// `spf/<version> {json}` for the given environment.
pub fn user_agent_with<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let data = UserAgentData {
        installer: Named {
            name: "spf",
            version: Some(env!("CARGO_PKG_VERSION")),
        },
        implementation: Named {
            name: "rustc",
            version: None,
        },
        system: Named {
            name: env::consts::OS,
            version: None,
        },
        cpu: env::consts::ARCH,
        ci: looks_like_ci_with(&lookup).then_some(true),
        user_data: lookup("SPF_USER_AGENT_USER_DATA"),
    };
    let json = serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string());
    format!("spf/{} {}", env!("CARGO_PKG_VERSION"), json)
}

pub fn user_agent() -> String {
    user_agent_with(|name| env::var(name).ok())
}
