use std::collections::HashSet;

// Upstream operations the gateway is willing to proxy
pub const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
pub const LIST_MODELS_PATH: &str = "v1/models";
pub const USAGE_PATH: &str = "dashboard/billing/usage";
pub const SUBSCRIPTION_PATH: &str = "dashboard/billing/subscription";

pub const UPSTREAM_PATHS: [&str; 4] = [
    CHAT_COMPLETIONS_PATH,
    LIST_MODELS_PATH,
    USAGE_PATH,
    SUBSCRIPTION_PATH,
];

/// Exact-match set of proxyable sub-paths, built once at startup.
#[derive(Debug, Clone)]
pub struct PathAllowlist {
    paths: HashSet<String>,
}

impl PathAllowlist {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize_subpath(p.as_ref()))
                .collect(),
        }
    }

    pub fn upstream_catalog() -> Self {
        Self::new(UPSTREAM_PATHS)
    }

    pub fn is_allowed(&self, subpath: &str) -> bool {
        self.paths.contains(subpath)
    }
}

// "/v1//models/" -> "v1/models"
pub fn normalize_subpath(raw: &str) -> String {
    raw.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
