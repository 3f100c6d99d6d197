use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;

use crate::auth::CredentialPolicy;
use crate::models::PlanTier;
use crate::rate_limit::RatePolicy;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-gateway")]
#[command(about = "Authenticating, rate limiting proxy for an OpenAI-style API")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Upstream API base url
    #[arg(short, long, env = "BASE_URL", default_value = "https://api.openai.com")]
    pub upstream_url: String,

    // Identity provider endpoint returning the signed-in user profile
    #[arg(long, env = "SESSION_URL", default_value = "http://localhost:3000/api/auth/me")]
    pub session_url: String,

    // Redis url for rate windows; in-memory when absent
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    // Prefix of rate window keys
    #[arg(long, env = "RATE_LIMIT_PREFIX", default_value = "query")]
    pub rate_limit_prefix: String,

    // Hobby plan: max requests per window
    #[arg(long, env = "HOBBY_LIMIT_QUERIES", default_value_t = 20)]
    pub hobby_limit_queries: u32,

    // Hobby plan: window in seconds
    #[arg(long, env = "HOBBY_LIMIT_DURATION", default_value_t = 3600)]
    pub hobby_limit_duration: u64,

    // Pro plan: max requests per window (unlimited when absent)
    #[arg(long, env = "PRO_LIMIT_QUERIES")]
    pub pro_limit_queries: Option<u32>,

    // Pro plan: window in seconds
    #[arg(long, env = "PRO_LIMIT_DURATION", default_value_t = 3600)]
    pub pro_limit_duration: u64,

    // Access codes, comma-separated
    #[arg(long, env = "CODE", value_delimiter = ',')]
    pub access_codes: Vec<String>,

    // Server side upstream api key, used for access code callers
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "OPENAI_ORG_ID")]
    pub openai_org_id: Option<String>,

    // Hide the gpt-4 family from the model listing
    #[arg(long, env = "DISABLE_GPT4", value_parser = BoolishValueParser::new())]
    pub disable_gpt4: bool,

    // Extra model id prefixes to hide from the model listing
    #[arg(long = "exclude-model-prefix")]
    pub excluded_model_prefixes: Vec<String>,

    // Upstream timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 600)]
    pub upstream_timeout: u64,

    // Session lookup timeout in seconds
    #[arg(long, env = "SESSION_TIMEOUT", default_value_t = 10)]
    pub session_timeout: u64,
}

impl Args {
    pub fn rate_policies(&self) -> HashMap<PlanTier, RatePolicy> {
        let mut policies = HashMap::from([(
            PlanTier::Hobby,
            RatePolicy::new(
                self.hobby_limit_queries,
                Duration::from_secs(self.hobby_limit_duration),
            ),
        )]);
        if let Some(max) = self.pro_limit_queries {
            policies.insert(
                PlanTier::Pro,
                RatePolicy::new(max, Duration::from_secs(self.pro_limit_duration)),
            );
        }
        policies
    }

    pub fn credential_policy(&self) -> CredentialPolicy {
        CredentialPolicy::from_codes(&self.access_codes)
    }

    pub fn excluded_models(&self) -> Vec<String> {
        let mut prefixes = self.excluded_model_prefixes.clone();
        if self.disable_gpt4 {
            prefixes.push("gpt-4".to_string());
        }
        prefixes
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }
}
