// src/core/agent/naming.rs

//! Name parsing: server group monikers and image `appversion` strings.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// `<cluster>-v<sequence>`, where the sequence has at least three digits.
    static ref PUSH_PATTERN: Regex = Regex::new(r"^(.+)-v([0-9]{3,})$").expect("valid push pattern");
    /// `<package>-<version>-<commit|hbuild>[.<hbuild|commit>][~suffix][/<job>/<number>]`
    static ref APP_VERSION_PATTERN: Regex = Regex::new(
        r"^([\w-]+?)-([0-9.a-zA-Z~]+)-(\w+)(?:\.(\w+))?(?:~[\w-]+)?(?:/([\w-]+)/([0-9]+))?$"
    )
    .expect("valid appversion pattern");
}

/// The naming coordinates of a server group: `app-stack-detail-vNNN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moniker {
    pub app: String,
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
}

impl Moniker {
    /// Derives the moniker from a server group name.
    pub fn derive(server_group_name: &str) -> Self {
        let (cluster, sequence) = match PUSH_PATTERN.captures(server_group_name) {
            Some(caps) => (
                caps[1].to_string(),
                caps.get(2).and_then(|m| m.as_str().parse().ok()),
            ),
            None => (server_group_name.to_string(), None),
        };

        let mut parts = cluster.splitn(3, '-');
        let app = parts.next().unwrap_or_default().to_string();
        let stack = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let detail = parts.next().filter(|s| !s.is_empty()).map(str::to_string);

        Self {
            app,
            cluster,
            stack,
            detail,
            sequence,
        }
    }
}

/// The parsed form of an image's `appversion` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersion {
    pub package_name: String,
    pub version: String,
    pub commit: Option<String>,
    pub build_number: Option<String>,
    pub build_job_name: Option<String>,
}

impl AppVersion {
    /// Parses an appversion string. Returns `None` if it does not match the grammar.
    pub fn parse(input: &str) -> Option<Self> {
        let caps = APP_VERSION_PATTERN.captures(input.trim())?;
        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());

        let third = group(3)?;
        let fourth = group(4);
        // The build number is marked with a leading `h` and may come before or after the commit.
        let (build_number, commit) = match third.strip_prefix('h') {
            Some(build) => (Some(build.to_string()), fourth),
            None => (
                fourth.map(|f| f.strip_prefix('h').map(str::to_string).unwrap_or(f)),
                Some(third),
            ),
        };

        Some(Self {
            package_name: group(1)?,
            version: group(2)?,
            commit,
            build_number,
            build_job_name: group(5),
        })
    }
}
